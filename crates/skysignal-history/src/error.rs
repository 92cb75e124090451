use thiserror::Error;

/// Errors that can occur while reading or writing history series.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A series file exists but could not be decoded.
    #[error("history series '{series}' is corrupt: {reason}")]
    Corrupt { series: String, reason: String },

    /// Series names end up in file names and SQL parameters.
    #[error("invalid series name '{0}': expected ASCII letters, digits, '_' or '-'")]
    InvalidSeries(String),

    /// A stored value cannot be represented (timestamp out of range, non-finite value).
    #[error("invalid history data: {0}")]
    InvalidData(String),

    /// The storage-level lock on a series could not be taken.
    #[error("history lock for series '{series}' failed: {reason}")]
    Lock { series: String, reason: String },

    /// A previous writer panicked while holding the series lock.
    #[error("history lock for series '{0}' is poisoned")]
    Poisoned(String),
}
