//! Domain traits defining contracts for external systems.
//!
//! Repository traits run each call as its own statement. Calls that must commit
//! or roll back together go through a [`UnitOfWork`] obtained from a
//! [`TransactionProvider`].

use std::sync::Arc;

use async_trait::async_trait;

use super::error::AppError;
use super::types::{AccrualOutcome, Order, User, Withdrawal};

/// User persistence
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, login: &str) -> Result<Option<User>, AppError>;

    async fn list_users(&self) -> Result<Vec<User>, AppError>;

    /// Fails with `AppError::AlreadyExists` when the login is taken
    async fn create_user(&self, user: &User) -> Result<(), AppError>;

    async fn update_user(&self, user: &User) -> Result<(), AppError>;
}

/// Order persistence
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_order(&self, number: &str) -> Result<Option<Order>, AppError>;

    async fn list_orders(&self) -> Result<Vec<Order>, AppError>;

    /// Fails with `AppError::AlreadyExists` when the number is taken
    async fn create_order(&self, order: &Order) -> Result<(), AppError>;

    async fn update_order(&self, order: &Order) -> Result<(), AppError>;
}

/// Withdrawal persistence
#[async_trait]
pub trait WithdrawalRepository: Send + Sync {
    async fn get_withdrawal(&self, order: &str) -> Result<Option<Withdrawal>, AppError>;

    async fn list_withdrawals(&self) -> Result<Vec<Withdrawal>, AppError>;

    /// Fails with `AppError::AlreadyExists` when the order number is taken
    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), AppError>;
}

/// An open transaction.
///
/// Every statement issued through it belongs to the same transaction. Once
/// `commit` or `rollback` has run, further calls fail with
/// `DatabaseError::NoTransaction`.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn get_user(&mut self, login: &str) -> Result<Option<User>, AppError>;

    async fn update_user(&mut self, user: &User) -> Result<(), AppError>;

    async fn get_order(&mut self, number: &str) -> Result<Option<Order>, AppError>;

    async fn update_order(&mut self, order: &Order) -> Result<(), AppError>;

    async fn create_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), AppError>;

    async fn commit(&mut self) -> Result<(), AppError>;

    async fn rollback(&mut self) -> Result<(), AppError>;
}

/// Source of transactions
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError>;

    /// Check storage connectivity
    async fn health_check(&self) -> Result<(), AppError>;
}

/// External accrual calculation service
#[async_trait]
pub trait AccrualProvider: Send + Sync {
    /// Look up the accrual for an order number.
    ///
    /// Transport faults and unexpected responses are returned as `Err`.
    async fn lookup(&self, number: &str) -> Result<AccrualOutcome, AppError>;
}

/// Handles to every storage contract the core consumes
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub withdrawals: Arc<dyn WithdrawalRepository>,
    pub transactions: Arc<dyn TransactionProvider>,
}

impl Repositories {
    /// Build from a single backend implementing every contract
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UserRepository
            + OrderRepository
            + WithdrawalRepository
            + TransactionProvider
            + 'static,
    {
        Self {
            users: store.clone(),
            orders: store.clone(),
            withdrawals: store.clone(),
            transactions: store,
        }
    }
}
