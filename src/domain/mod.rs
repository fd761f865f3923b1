//! Domain layer containing core business types, traits, and error definitions.

mod config;
pub mod error;
pub mod traits;
pub mod types;
pub mod validation;

pub(crate) use config::env_or;
pub use error::{AccrualError, AppError, ConfigError, DatabaseError, ValidationError};
pub use traits::{
    AccrualProvider, OrderRepository, Repositories, TransactionProvider, UnitOfWork,
    UserRepository, WithdrawalRepository,
};
pub use types::{
    AccrualOutcome, AccrualStatus, BalanceResponse, ErrorDetail, ErrorResponse, HealthResponse,
    HealthStatus, Order, OrderResponse, OrderStatus, OrderSubmission, RegisterRequest, User,
    WithdrawRequest, Withdrawal, WithdrawalResponse,
};
pub use validation::luhn_valid;
