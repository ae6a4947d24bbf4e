use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum LoyaltyError {
    #[error("User not found: {0}")]
    UserNotFound(u64),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Cashback not found: {0}")]
    CashbackNotFound(u64),
    #[error("Persistence error: {0}")]
    PersistenceError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Payment gateway error: {0}")]
    Gateway(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),
}

/// Stable classification of a failure, reported back to event submitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UserNotFound,
    Validation,
    NotFound,
    Persistence,
    Configuration,
    Gateway,
}

impl LoyaltyError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LoyaltyError::UserNotFound(_) => FailureKind::UserNotFound,
            LoyaltyError::ValidationError(_) => FailureKind::Validation,
            LoyaltyError::CashbackNotFound(_) => FailureKind::NotFound,
            LoyaltyError::ConfigError(_) => FailureKind::Configuration,
            LoyaltyError::Gateway(_) => FailureKind::Gateway,
            LoyaltyError::PersistenceError(_)
            | LoyaltyError::CsvError(_)
            | LoyaltyError::IoError(_)
            | LoyaltyError::JsonError(_) => FailureKind::Persistence,
            #[cfg(feature = "storage-rocksdb")]
            LoyaltyError::Storage(_) => FailureKind::Persistence,
        }
    }
}

pub type Result<T> = std::result::Result<T, LoyaltyError>;
