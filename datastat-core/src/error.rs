// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataStatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid expression: {0}")]
    ExpressionError(String),

    #[error("Invalid input format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<serde_json::Error> for DataStatError {
    fn from(err: serde_json::Error) -> Self {
        DataStatError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DataStatError {
    fn from(err: toml::de::Error) -> Self {
        DataStatError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataStatError>;
