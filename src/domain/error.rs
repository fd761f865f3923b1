//! Error taxonomy shared by every layer.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Accrual service error: {0}")]
    Accrual(#[from] AccrualError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The entity being created is already present
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The resource is claimed by a different owner
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Failed check-digit or domain validation
    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    /// Insufficient balance
    #[error("Payment required: {0}")]
    PaymentRequired(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage, transaction or transport fault
    #[error("Internal error: {0}")]
    Internal(String),

    /// The caller stopped waiting before the operation finished
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Authentication error: {0}")]
    Authentication(String),
}

impl AppError {
    /// Wrap storage and transport faults as an internal failure; business
    /// outcomes pass through untouched.
    #[must_use]
    pub fn into_internal(self) -> Self {
        match self {
            Self::Database(_) | Self::Accrual(_) | Self::Config(_) => {
                Self::Internal(self.to_string())
            }
            other => other,
        }
    }
}

/// Storage errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Commit, rollback or a statement was issued on a finished unit of work
    #[error("No transaction in progress")]
    NoTransaction,
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

/// Accrual service errors
#[derive(Debug, Error)]
pub enum AccrualError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unexpected status {status_code}: {message}")]
    UnexpectedStatus { status_code: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Input validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation failed: {0}")]
    Multiple(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}
