//! Infrastructure layer implementations.

pub mod accrual;
pub mod database;

pub use accrual::{AccrualClientConfig, HttpAccrualClient};
pub use database::{PostgresClient, PostgresConfig};
