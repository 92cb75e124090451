use thiserror::Error;

/// Validation errors for domain values and configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("latitude {value} is outside [-90, 90]")]
    LatitudeOutOfRange { value: f64 },
    #[error("longitude {value} is outside [-180, 180]")]
    LongitudeOutOfRange { value: f64 },

    #[error("invalid signal kind '{value}', expected one of radiation, schumann, air_quality, pollen, sea_temperature, k_index, fx_rate")]
    InvalidSignalKind { value: String },
    #[error("invalid provider '{value}'")]
    InvalidProvider { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("timestamp '{value}' is not understood")]
    InvalidTimestamp { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },

    #[error("cached reading observed at {observed_at} is not older than resolution time {resolved_at}")]
    CachedReadingNotInPast {
        observed_at: String,
        resolved_at: String,
    },

    #[error("signal '{kind}' has no providers configured")]
    EmptyCascade { kind: String },
    #[error("signal '{kind}': {reason}")]
    InvalidSignalConfig { kind: String, reason: String },
}

/// Top-level error type for core operations outside the cascade.
///
/// The cascade itself never fails; these errors come from building a
/// resolver (configuration, history backend) or from CLI-facing helpers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    History(#[from] skysignal_history::HistoryError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
