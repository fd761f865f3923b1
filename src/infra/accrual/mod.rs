//! Accrual service integration.

mod client;

pub use client::{
    AccrualClientConfig, AccrualResponse, DEFAULT_ACCRUAL_URL, HttpAccrualClient,
    normalize_base_url,
};
