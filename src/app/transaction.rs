//! Transaction boundary.
//!
//! [`run_in_transaction`] hands the unit of work to the caller explicitly; no
//! ambient lookup is involved, so a transaction cannot leak between requests.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{error, warn};

use crate::domain::{AppError, TransactionProvider, UnitOfWork};

/// Run `work` inside one transaction.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err` or
/// panics. A panic is re-raised after the rollback. Storage faults leaving the
/// boundary are reported as `AppError::Internal`.
pub async fn run_in_transaction<T, F>(
    provider: &dyn TransactionProvider,
    work: F,
) -> Result<T, AppError>
where
    T: Send,
    F: for<'a> FnOnce(&'a mut dyn UnitOfWork) -> BoxFuture<'a, Result<T, AppError>> + Send,
{
    let mut uow = provider.begin().await.map_err(AppError::into_internal)?;

    let outcome = AssertUnwindSafe(work(uow.as_mut())).catch_unwind().await;

    match outcome {
        Ok(Ok(value)) => {
            uow.commit().await.map_err(|e| {
                error!(error = %e, "Transaction commit failed");
                e.into_internal()
            })?;
            Ok(value)
        }
        Ok(Err(err)) => {
            if let Err(rollback_err) = uow.rollback().await {
                warn!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(err.into_internal())
        }
        Err(panic) => {
            if let Err(rollback_err) = uow.rollback().await {
                warn!(error = %rollback_err, "Transaction rollback after panic failed");
            }
            std::panic::resume_unwind(panic)
        }
    }
}
