//! Loyalty points ledger.
//!
//! Users submit order numbers, an external accrual service prices them, and
//! the awarded points can be spent through withdrawals. User-facing mutations
//! go through a single-writer task dispatcher; a background worker reconciles
//! orders with the accrual service.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
