//! Test doubles for the storage and accrual collaborators.

pub mod mocks;

pub use mocks::{
    MockAccrualProvider, MockAccrualResponse, MockOperation, MockStore, MockUnitOfWork,
};
