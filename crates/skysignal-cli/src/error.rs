use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] skysignal_core::ValidationError),

    #[error(transparent)]
    Core(#[from] skysignal_core::CoreError),

    #[error("command error: {0}")]
    Command(String),

    #[error("strict mode failed: no reading for {}", .kinds.join(", "))]
    Absent { kinds: Vec<String> },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Command(_) => 2,
            Self::Core(skysignal_core::CoreError::Io(_)) => 10,
            Self::Core(_) => 2,
            Self::Absent { .. } => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
