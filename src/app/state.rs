//! Application state management.

use std::sync::Arc;

use tracing::warn;

use crate::domain::{HealthResponse, HealthStatus, TransactionProvider};

use super::dispatcher::TaskDispatcher;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: TaskDispatcher,
    /// Used for storage health checks only; ledger work goes through the dispatcher
    pub transactions: Arc<dyn TransactionProvider>,
}

impl AppState {
    /// Create a new application state
    #[must_use]
    pub fn new(dispatcher: TaskDispatcher, transactions: Arc<dyn TransactionProvider>) -> Self {
        Self {
            dispatcher,
            transactions,
        }
    }

    /// Probe storage and summarise service health
    pub async fn health(&self) -> HealthResponse {
        let database = match self.transactions.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };
        HealthResponse::new(database)
    }
}
