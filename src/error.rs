use thiserror::Error;

/// Failure taxonomy shared by every engine component.
///
/// All variants are per-request failures; none of them is fatal to the process.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds {
        balance: rust_decimal::Decimal,
        required: rust_decimal::Decimal,
    },
    #[error("Too many attempts: {0}")]
    RateLimited(String),
    #[error("Expired: {0}")]
    Expired(String),
    #[error("Already processed: {0}")]
    AlreadyProcessed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    /// Only backend failures are worth retrying; everything else is a
    /// definitive answer about the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }

    /// Stable snake_case name of the variant, for reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Conflict(_) => "conflict",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::InsufficientFunds { .. } => "insufficient_funds",
            EngineError::RateLimited(_) => "rate_limited",
            EngineError::Expired(_) => "expired",
            EngineError::AlreadyProcessed(_) => "already_processed",
            EngineError::Config(_) => "config",
            EngineError::Storage(_) => "storage",
        }
    }

    pub(crate) fn storage(msg: impl Into<String>) -> Self {
        EngineError::Storage(Box::new(std::io::Error::other(msg.into())))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(Box::new(err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(Box::new(err))
    }
}

impl From<csv::Error> for EngineError {
    fn from(err: csv::Error) -> Self {
        EngineError::Validation(format!("CSV error: {}", err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for EngineError {
    fn from(err: rocksdb::Error) -> Self {
        EngineError::Storage(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
