//! Background reconciliation worker.
//!
//! Polls the accrual service for orders that have not reached a final status
//! and applies the reported result to the ledger. Fresh orders arrive through
//! the pending channel; a periodic sweep of the order table (first tick at
//! startup) recovers anything the channel missed, including orders left over
//! from a previous run.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AccrualOutcome, AccrualProvider, AppError, ConfigError, OrderStatus, Repositories, env_or,
};

use super::pending::PendingReceiver;
use super::transaction::run_in_transaction;

/// Configuration for the reconciliation worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether the worker is enabled
    pub enabled: bool,
    /// Delay before a non-final order is polled again
    pub retry_delay: Duration,
    /// Pause applied when a rate limit carries no usable retry hint
    pub rate_limit_pause: Duration,
    /// Upper bound on one reconciliation attempt
    pub attempt_timeout: Duration,
    /// Period of the full order-table sweep
    pub sweep_interval: Duration,
    /// Capacity of the pending-order channel
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_delay: Duration::from_secs(3),
            rate_limit_pause: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            queue_capacity: 1000,
        }
    }
}

impl WorkerConfig {
    /// Load from the `RECONCILE_*` variables and `ENABLE_RECONCILIATION`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            enabled: env_or("ENABLE_RECONCILIATION", defaults.enabled)?,
            retry_delay: Duration::from_secs(env_or(
                "RECONCILE_RETRY_DELAY_SECS",
                defaults.retry_delay.as_secs(),
            )?),
            rate_limit_pause: Duration::from_secs(env_or(
                "RECONCILE_RATE_LIMIT_PAUSE_SECS",
                defaults.rate_limit_pause.as_secs(),
            )?),
            attempt_timeout: Duration::from_secs(env_or(
                "RECONCILE_ATTEMPT_TIMEOUT_SECS",
                defaults.attempt_timeout.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(env_or(
                "RECONCILE_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
            queue_capacity: env_or("RECONCILE_QUEUE_CAPACITY", defaults.queue_capacity)?,
        })
    }
}

/// Result of one reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// A final status was committed
    Applied(OrderStatus),
    /// A non-final status was observed; poll again later
    Pending(OrderStatus),
    /// Nothing to do: the order is unknown or already final
    Skipped,
    /// Transient failure; poll again later
    Retry,
    /// The accrual service asked for a pause
    RateLimited(Duration),
}

/// Orders waiting for their next poll, earliest due first
#[derive(Debug, Default)]
struct RetrySchedule {
    entries: BinaryHeap<Reverse<(Instant, u64, String)>>,
    seq: u64,
}

impl RetrySchedule {
    fn push(&mut self, number: String, due: Instant) {
        self.seq += 1;
        self.entries.push(Reverse((due, self.seq, number)));
    }

    fn next_due(&self) -> Option<Instant> {
        self.entries.peek().map(|Reverse((due, _, _))| *due)
    }

    fn pop_due(&mut self, now: Instant) -> Option<String> {
        match self.entries.peek() {
            Some(Reverse((due, _, _))) if *due <= now => {
                self.entries.pop().map(|Reverse((_, _, number))| number)
            }
            _ => None,
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Background worker reconciling orders with the accrual service
pub struct ReconciliationWorker {
    repos: Repositories,
    accrual: Arc<dyn AccrualProvider>,
    pending: PendingReceiver,
    config: WorkerConfig,
    schedule: RetrySchedule,
    paused_until: Option<Instant>,
    /// Order interrupted by a rate limit; processed first after the pause
    held: Option<String>,
}

impl ReconciliationWorker {
    #[must_use]
    pub fn new(
        repos: Repositories,
        accrual: Arc<dyn AccrualProvider>,
        pending: PendingReceiver,
        config: WorkerConfig,
    ) -> Self {
        Self {
            repos,
            accrual,
            pending,
            config,
            schedule: RetrySchedule::default(),
            paused_until: None,
            held: None,
        }
    }

    /// Run the worker loop until shutdown is signalled
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            retry_delay = ?self.config.retry_delay,
            sweep_interval = ?self.config.sweep_interval,
            "Reconciliation worker started"
        );

        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut channel_open = true;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Some(until) = self.paused_until {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    () = tokio::time::sleep_until(until) => {
                        self.paused_until = None;
                        info!("Rate-limit pause over, resuming");
                        if let Some(number) = self.held.take() {
                            self.process(number).await;
                        }
                    }
                }
                continue;
            }

            let next_due = self.schedule.next_due();

            // Ready branches are picked at random so that retries which are
            // always due cannot starve fresh orders or the sweep.
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                () = sleep_until_due(next_due), if next_due.is_some() => {
                    if let Some(number) = self.schedule.pop_due(Instant::now()) {
                        self.process(number).await;
                    }
                }
                received = self.pending.recv(), if channel_open => {
                    match received {
                        Some(number) => self.process(number).await,
                        None => {
                            debug!("Pending channel closed, relying on sweeps");
                            channel_open = false;
                        }
                    }
                }
                _ = sweep.tick() => {
                    match self.sweep().await {
                        Ok(0) => {}
                        Ok(count) => info!(count = count, "Sweep enqueued unfinished orders"),
                        Err(e) => warn!(error = %e, "Order sweep failed"),
                    }
                }
            }
        }

        info!(
            scheduled = self.schedule.len(),
            "Reconciliation worker shutting down"
        );
    }

    /// Schedule every non-final order not already in the pipeline.
    ///
    /// Returns how many orders were added.
    pub async fn sweep(&mut self) -> Result<usize, AppError> {
        let orders = self.repos.orders.list_orders().await?;
        let now = Instant::now();
        let mut added = 0;

        for order in orders.into_iter().filter(|o| !o.status.is_terminal()) {
            if self.pending.track(&order.number) {
                self.schedule.push(order.number, now);
                added += 1;
            }
        }

        Ok(added)
    }

    /// One bounded attempt at reconciling `number`
    #[instrument(skip(self))]
    pub async fn reconcile(&self, number: &str) -> Reconciliation {
        match tokio::time::timeout(self.config.attempt_timeout, self.attempt(number)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(error = %e, "Reconciliation attempt failed");
                Reconciliation::Retry
            }
            Err(_) => {
                warn!(
                    timeout = ?self.config.attempt_timeout,
                    "Reconciliation attempt timed out"
                );
                Reconciliation::Retry
            }
        }
    }

    async fn process(&mut self, number: String) {
        match self.reconcile(&number).await {
            Reconciliation::Applied(_) | Reconciliation::Skipped => {
                self.pending.forget(&number);
            }
            Reconciliation::Pending(_) | Reconciliation::Retry => {
                self.schedule
                    .push(number, Instant::now() + self.config.retry_delay);
            }
            Reconciliation::RateLimited(retry_after) => {
                warn!(
                    order = %number,
                    pause = ?retry_after,
                    "Accrual service rate limit hit, pausing"
                );
                self.paused_until = Some(Instant::now() + retry_after);
                self.held = Some(number);
            }
        }
    }

    async fn attempt(&self, number: &str) -> Result<Reconciliation, AppError> {
        let Some(order) = self.repos.orders.get_order(number).await? else {
            warn!("Order not found, dropping");
            return Ok(Reconciliation::Skipped);
        };
        if order.status.is_terminal() {
            debug!(status = %order.status, "Order already final");
            return Ok(Reconciliation::Skipped);
        }

        match self.accrual.lookup(number).await? {
            AccrualOutcome::Reported { status, accrual } => {
                self.commit(number, status.into(), accrual).await
            }
            AccrualOutcome::NotRegistered => {
                debug!("Order not registered with the accrual service yet");
                Ok(Reconciliation::Retry)
            }
            AccrualOutcome::RateLimited { retry_after } => {
                let pause = if retry_after.is_zero() {
                    self.config.rate_limit_pause
                } else {
                    retry_after
                };
                Ok(Reconciliation::RateLimited(pause))
            }
        }
    }

    /// Apply a reported status, and the credit for a processed order, in one
    /// transaction. The order is re-read inside it so a result already applied
    /// is never applied twice.
    async fn commit(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<Reconciliation, AppError> {
        let number_owned = number.to_string();

        let result = run_in_transaction(self.repos.transactions.as_ref(), move |uow| {
            Box::pin(async move {
                let Some(mut order) = uow.get_order(&number_owned).await? else {
                    return Ok(Reconciliation::Skipped);
                };
                if order.status.is_terminal() {
                    return Ok(Reconciliation::Skipped);
                }
                if !status.is_terminal() && order.status == status {
                    return Ok(Reconciliation::Pending(status));
                }

                let credit = match status {
                    OrderStatus::Processed => accrual.filter(|a| *a > Decimal::ZERO),
                    _ => None,
                };
                let owner = match credit {
                    Some(_) => match uow.get_user(&order.owner).await? {
                        Some(user) => Some(user),
                        None => {
                            error!(owner = %order.owner, "Order owner not found, dropping");
                            return Ok(Reconciliation::Skipped);
                        }
                    },
                    None => None,
                };

                order.status = status;
                order.accrual = if status == OrderStatus::Processed {
                    accrual
                } else {
                    None
                };
                uow.update_order(&order).await?;

                if let (Some(amount), Some(mut user)) = (credit, owner) {
                    user.current_points += amount;
                    uow.update_user(&user).await?;
                }

                Ok::<_, AppError>(if status.is_terminal() {
                    Reconciliation::Applied(status)
                } else {
                    Reconciliation::Pending(status)
                })
            })
        })
        .await;

        match &result {
            Ok(Reconciliation::Applied(status)) => {
                info!(status = %status, accrual = ?accrual, "Order reconciled");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Failed to apply accrual result"),
        }
        result
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

/// Spawn the reconciliation worker.
///
/// Returns the join handle and the sender that signals shutdown.
pub fn spawn_worker(
    repos: Repositories,
    accrual: Arc<dyn AccrualProvider>,
    pending: PendingReceiver,
    config: WorkerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconciliationWorker::new(repos, accrual, pending, config);
    let handle = tokio::spawn(worker.run(shutdown_rx));
    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pending::{PendingOrders, pending_channel};
    use crate::domain::{AccrualStatus, Order, User};
    use crate::test_utils::{MockAccrualProvider, MockAccrualResponse, MockOperation, MockStore};
    use rust_decimal_macros::dec;

    struct Harness {
        store: Arc<MockStore>,
        accrual: Arc<MockAccrualProvider>,
        pending: PendingOrders,
        worker: ReconciliationWorker,
    }

    fn harness(config: WorkerConfig) -> Harness {
        let store = Arc::new(MockStore::new());
        let accrual = Arc::new(MockAccrualProvider::new());
        let (pending, receiver) = pending_channel(config.queue_capacity);
        let worker = ReconciliationWorker::new(
            Repositories::from_store(Arc::clone(&store)),
            Arc::clone(&accrual) as Arc<dyn AccrualProvider>,
            receiver,
            config,
        );
        Harness {
            store,
            accrual,
            pending,
            worker,
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            retry_delay: Duration::from_millis(10),
            rate_limit_pause: Duration::from_millis(50),
            attempt_timeout: Duration::from_millis(200),
            sweep_interval: Duration::from_secs(3600),
            ..WorkerConfig::default()
        }
    }

    async fn seed(store: &MockStore, login: &str, number: &str) {
        store.seed_user(User::new(login)).await;
        store.seed_order(Order::new(number, login)).await;
    }

    #[test]
    fn test_retry_schedule_orders_by_due_time() {
        let mut schedule = RetrySchedule::default();
        let now = Instant::now();
        schedule.push("late".to_string(), now + Duration::from_secs(10));
        schedule.push("first".to_string(), now);
        schedule.push("second".to_string(), now);

        assert_eq!(schedule.next_due(), Some(now));
        assert_eq!(schedule.pop_due(now).as_deref(), Some("first"));
        assert_eq!(schedule.pop_due(now).as_deref(), Some("second"));
        assert_eq!(schedule.pop_due(now), None);
        assert_eq!(schedule.len(), 1);
    }

    #[tokio::test]
    async fn test_processed_order_credits_owner() {
        let h = harness(fast_config());
        seed(&h.store, "alice", "79927398713").await;
        h.accrual
            .script("79927398713", vec![MockAccrualResponse::processed(dec!(500))]);

        let outcome = h.worker.reconcile("79927398713").await;

        assert_eq!(outcome, Reconciliation::Applied(OrderStatus::Processed));
        let order = h.store.order("79927398713").await.unwrap();
        assert_eq!(order.status, OrderStatus::Processed);
        assert_eq!(order.accrual, Some(dec!(500)));
        assert_eq!(
            h.store.user("alice").await.unwrap().current_points,
            dec!(500)
        );
    }

    #[tokio::test]
    async fn test_credit_is_applied_once() {
        let h = harness(fast_config());
        seed(&h.store, "alice", "79927398713").await;
        h.accrual
            .script("79927398713", vec![MockAccrualResponse::processed(dec!(500))]);

        h.worker.reconcile("79927398713").await;
        let second = h.worker.reconcile("79927398713").await;

        assert_eq!(second, Reconciliation::Skipped);
        assert_eq!(h.accrual.calls_for("79927398713"), 1);
        assert_eq!(
            h.store.user("alice").await.unwrap().current_points,
            dec!(500)
        );
    }

    #[tokio::test]
    async fn test_invalid_order_is_final_without_credit() {
        let h = harness(fast_config());
        seed(&h.store, "alice", "79927398713").await;
        h.accrual.script(
            "79927398713",
            vec![MockAccrualResponse::status(AccrualStatus::Invalid)],
        );

        let outcome = h.worker.reconcile("79927398713").await;

        assert_eq!(outcome, Reconciliation::Applied(OrderStatus::Invalid));
        assert_eq!(h.store.user("alice").await.unwrap().current_points, dec!(0));
    }

    #[tokio::test]
    async fn test_registered_maps_to_processing() {
        let h = harness(fast_config());
        seed(&h.store, "alice", "79927398713").await;
        h.accrual.script(
            "79927398713",
            vec![MockAccrualResponse::status(AccrualStatus::Registered)],
        );

        let outcome = h.worker.reconcile("79927398713").await;

        assert_eq!(outcome, Reconciliation::Pending(OrderStatus::Processing));
        assert_eq!(
            h.store.order("79927398713").await.unwrap().status,
            OrderStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_not_registered_and_failures_retry() {
        let h = harness(fast_config());
        seed(&h.store, "alice", "79927398713").await;
        assert_eq!(h.worker.reconcile("79927398713").await, Reconciliation::Retry);

        h.accrual.script(
            "79927398713",
            vec![MockAccrualResponse::Failure("connection refused".to_string())],
        );
        assert_eq!(h.worker.reconcile("79927398713").await, Reconciliation::Retry);
        assert_eq!(
            h.store.order("79927398713").await.unwrap().status,
            OrderStatus::New
        );
    }

    #[tokio::test]
    async fn test_rate_limit_uses_hint_or_default_pause() {
        let h = harness(fast_config());
        seed(&h.store, "alice", "79927398713").await;
        h.accrual.script(
            "79927398713",
            vec![
                MockAccrualResponse::rate_limited(Duration::from_secs(7)),
                MockAccrualResponse::rate_limited(Duration::ZERO),
            ],
        );

        assert_eq!(
            h.worker.reconcile("79927398713").await,
            Reconciliation::RateLimited(Duration::from_secs(7))
        );
        assert_eq!(
            h.worker.reconcile("79927398713").await,
            Reconciliation::RateLimited(Duration::from_millis(50))
        );
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out() {
        let h = harness(fast_config());
        seed(&h.store, "alice", "79927398713").await;
        h.accrual.set_delay(Duration::from_secs(5));

        assert_eq!(h.worker.reconcile("79927398713").await, Reconciliation::Retry);
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_order_unchanged() {
        let h = harness(fast_config());
        seed(&h.store, "alice", "79927398713").await;
        h.accrual
            .script("79927398713", vec![MockAccrualResponse::processed(dec!(500))]);
        h.store.fail(MockOperation::UpdateUser);

        assert_eq!(h.worker.reconcile("79927398713").await, Reconciliation::Retry);
        let order = h.store.order("79927398713").await.unwrap();
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.accrual, None);

        h.store.heal(MockOperation::UpdateUser);
        assert_eq!(
            h.worker.reconcile("79927398713").await,
            Reconciliation::Applied(OrderStatus::Processed)
        );
    }

    #[tokio::test]
    async fn test_unknown_and_final_orders_are_skipped() {
        let h = harness(fast_config());
        assert_eq!(h.worker.reconcile("79927398713").await, Reconciliation::Skipped);

        let mut done = Order::new("12345678903", "alice");
        done.status = OrderStatus::Processed;
        h.store.seed_order(done).await;
        assert_eq!(h.worker.reconcile("12345678903").await, Reconciliation::Skipped);
        assert!(h.accrual.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_admits_unfinished_orders_once() {
        let mut h = harness(fast_config());
        seed(&h.store, "alice", "79927398713").await;
        let mut done = Order::new("12345678903", "alice");
        done.status = OrderStatus::Invalid;
        h.store.seed_order(done).await;
        let mut processing = Order::new("4561261212345467", "alice");
        processing.status = OrderStatus::Processing;
        h.store.seed_order(processing).await;

        assert_eq!(h.worker.sweep().await.unwrap(), 2);
        assert_eq!(h.worker.sweep().await.unwrap(), 0);
        assert!(h.pending.is_tracked("79927398713"));
        assert!(!h.pending.is_tracked("12345678903"));
    }

    #[tokio::test]
    async fn test_run_reconciles_notified_order() {
        let h = harness(fast_config());
        seed(&h.store, "alice", "79927398713").await;
        h.accrual.script(
            "79927398713",
            vec![
                MockAccrualResponse::status(AccrualStatus::Processing),
                MockAccrualResponse::processed(dec!(500)),
            ],
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.worker.run(shutdown_rx));

        assert!(h.pending.notify("79927398713") || h.pending.is_tracked("79927398713"));

        let mut credited = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if h.store.user("alice").await.unwrap().current_points == dec!(500) {
                credited = true;
                break;
            }
        }
        assert!(credited);
        assert!(!h.pending.is_tracked("79927398713"));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_pauses_after_rate_limit() {
        let mut config = fast_config();
        config.rate_limit_pause = Duration::from_millis(200);
        let h = harness(config);
        seed(&h.store, "alice", "79927398713").await;
        h.accrual.script(
            "79927398713",
            vec![
                MockAccrualResponse::rate_limited(Duration::ZERO),
                MockAccrualResponse::processed(dec!(10)),
            ],
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.worker.run(shutdown_rx));

        // The startup sweep picks the order up.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.accrual.calls_for("79927398713"), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.accrual.calls_for("79927398713"), 2);
        assert_eq!(h.store.user("alice").await.unwrap().current_points, dec!(10));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_owner_drops_order_without_writes() {
        let mut h = harness(fast_config());
        h.store.seed_order(Order::new("79927398713", "ghost")).await;
        h.accrual
            .script("79927398713", vec![MockAccrualResponse::processed(dec!(500))]);
        assert!(h.worker.pending.track("79927398713"));

        h.worker.process("79927398713".to_string()).await;

        assert!(!h.pending.is_tracked("79927398713"));
        assert_eq!(h.worker.schedule.len(), 0);
        let order = h.store.order("79927398713").await.unwrap();
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.accrual, None);
    }

    #[tokio::test]
    async fn test_rate_limit_holds_other_orders_until_pause_ends() {
        let mut config = fast_config();
        config.rate_limit_pause = Duration::from_millis(200);
        let h = harness(config);
        seed(&h.store, "alice", "79927398713").await;
        h.accrual.script(
            "79927398713",
            vec![
                MockAccrualResponse::rate_limited(Duration::ZERO),
                MockAccrualResponse::processed(dec!(10)),
            ],
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.worker.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.accrual.calls_for("79927398713"), 1);

        seed(&h.store, "bob", "12345678903").await;
        h.accrual
            .script("12345678903", vec![MockAccrualResponse::processed(dec!(20))]);
        assert!(h.pending.notify("12345678903"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.accrual.calls_for("12345678903"), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            h.accrual.calls(),
            vec![
                "79927398713".to_string(),
                "79927398713".to_string(),
                "12345678903".to_string(),
            ]
        );
        assert_eq!(h.store.user("alice").await.unwrap().current_points, dec!(10));
        assert_eq!(h.store.user("bob").await.unwrap().current_points, dec!(20));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_due_retries_do_not_starve_fresh_orders() {
        let config = WorkerConfig {
            retry_delay: Duration::from_millis(1),
            ..fast_config()
        };
        let h = harness(config);
        for i in 0..20 {
            seed(&h.store, &format!("user-{i}"), &format!("backlog-{i}")).await;
        }
        h.accrual.set_delay(Duration::from_millis(5));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.worker.run(shutdown_rx));

        // Let the startup sweep fill the retry schedule.
        tokio::time::sleep(Duration::from_millis(150)).await;
        seed(&h.store, "alice", "79927398713").await;
        h.accrual
            .script("79927398713", vec![MockAccrualResponse::processed(dec!(500))]);
        assert!(h.pending.notify("79927398713"));

        let mut credited = false;
        for _ in 0..150 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if h.store.user("alice").await.unwrap().current_points == dec!(500) {
                credited = true;
                break;
            }
        }
        assert!(credited);
        assert_eq!(h.accrual.calls_for("79927398713"), 1);
        assert!(h.accrual.calls().len() > 20);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let h = harness(fast_config());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.worker.run(shutdown_rx));

        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
