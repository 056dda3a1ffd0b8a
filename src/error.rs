//! Error types for the backtest engine.

use thiserror::Error;

/// Main error type for the backtest engine.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Indicator '{indicator}' has no valid parameter combinations")]
    EmptyParameterSet { indicator: String },

    #[error("Indicator '{indicator}' failed: {source}")]
    ExecutionError {
        indicator: String,
        #[source]
        source: Box<BacktestError>,
    },

    #[error("Worker pool error: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BacktestError {
    /// Wrap an error raised while processing one indicator.
    pub fn in_indicator(indicator: impl Into<String>, source: BacktestError) -> Self {
        Self::ExecutionError {
            indicator: indicator.into(),
            source: Box::new(source),
        }
    }
}

/// Result type alias for backtest operations.
pub type Result<T> = std::result::Result<T, BacktestError>;
