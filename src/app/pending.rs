//! Feed of orders awaiting a final accrual result.
//!
//! The tracked set holds every order number currently inside the
//! reconciliation pipeline (queued, scheduled for retry, or held during a
//! rate-limit pause). A number is admitted at most once, which keeps work on a
//! given order serialized.

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Producer side, cloned into the ledger
#[derive(Clone)]
pub struct PendingOrders {
    sender: mpsc::Sender<String>,
    tracked: Arc<DashSet<String>>,
}

/// Consumer side, owned by the reconciliation worker
pub struct PendingReceiver {
    receiver: mpsc::Receiver<String>,
    tracked: Arc<DashSet<String>>,
}

/// Create a bounded pending-order channel
#[must_use]
pub fn pending_channel(capacity: usize) -> (PendingOrders, PendingReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let tracked = Arc::new(DashSet::new());
    (
        PendingOrders {
            sender,
            tracked: Arc::clone(&tracked),
        },
        PendingReceiver { receiver, tracked },
    )
}

impl PendingOrders {
    /// Hand an order to the worker without waiting.
    ///
    /// Returns `false` when the order is already in the pipeline or the queue
    /// cannot take it; in the latter case the periodic sweep picks it up.
    pub fn notify(&self, number: &str) -> bool {
        if !self.tracked.insert(number.to_string()) {
            debug!(order = %number, "Order already awaiting reconciliation");
            return false;
        }

        match self.sender.try_send(number.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(number)) => {
                self.tracked.remove(&number);
                warn!(order = %number, "Pending queue full, order left for the next sweep");
                false
            }
            Err(TrySendError::Closed(number)) => {
                self.tracked.remove(&number);
                debug!(order = %number, "Reconciliation worker not running");
                false
            }
        }
    }

    #[must_use]
    pub fn is_tracked(&self, number: &str) -> bool {
        self.tracked.contains(number)
    }

    /// Number of orders inside the pipeline
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }
}

impl PendingReceiver {
    /// Next freshly submitted order; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Admit an order found by a sweep. Returns `false` if already tracked.
    pub fn track(&self, number: &str) -> bool {
        self.tracked.insert(number.to_string())
    }

    /// Release an order that left the pipeline
    pub fn forget(&self, number: &str) {
        self.tracked.remove(number);
    }

    #[must_use]
    pub fn is_tracked(&self, number: &str) -> bool {
        self.tracked.contains(number)
    }
}
