//! End-to-end ledger flows: dispatcher, reconciliation worker and mocks wired
//! together the way `main` wires the real adapters.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use loyalty_ledger::app::{
    DispatcherConfig, LedgerService, TaskDispatcher, WorkerConfig, pending_channel,
    spawn_dispatcher, spawn_worker,
};
use loyalty_ledger::domain::{
    AccrualProvider, AccrualStatus, AppError, Order, OrderStatus, OrderSubmission, Repositories,
    User,
};
use loyalty_ledger::test_utils::{MockAccrualProvider, MockAccrualResponse, MockStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Ledger {
    dispatcher: TaskDispatcher,
    store: Arc<MockStore>,
    accrual: Arc<MockAccrualProvider>,
    worker: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        retry_delay: Duration::from_millis(20),
        rate_limit_pause: Duration::from_millis(100),
        attempt_timeout: Duration::from_millis(500),
        sweep_interval: Duration::from_secs(3600),
        ..WorkerConfig::default()
    }
}

fn start(store: Arc<MockStore>, accrual: Arc<MockAccrualProvider>) -> Ledger {
    let config = worker_config();
    let repos = Repositories::from_store(Arc::clone(&store));
    let (pending, pending_rx) = pending_channel(config.queue_capacity);
    let service = LedgerService::new(repos.clone(), pending);
    let (dispatcher, _handle) = spawn_dispatcher(service, DispatcherConfig::default());
    let (worker, shutdown_tx) = spawn_worker(
        repos,
        Arc::clone(&accrual) as Arc<dyn AccrualProvider>,
        pending_rx,
        config,
    );
    Ledger {
        dispatcher,
        store,
        accrual,
        worker,
        shutdown_tx,
    }
}

impl Ledger {
    async fn stop(self) {
        self.shutdown_tx.send(true).unwrap();
        self.worker.await.unwrap();
    }
}

async fn wait_for_status(store: &MockStore, number: &str, status: OrderStatus) {
    for _ in 0..200 {
        if store.order(number).await.map(|o| o.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("order {number} never reached {status}");
}

#[tokio::test]
async fn test_accrual_then_withdrawals() {
    let store = Arc::new(MockStore::new());
    let accrual = Arc::new(MockAccrualProvider::new());
    accrual.script(
        "79927398713",
        vec![
            MockAccrualResponse::status(AccrualStatus::Registered),
            MockAccrualResponse::processed(dec!(500)),
        ],
    );
    let ledger = start(Arc::clone(&store), accrual);

    ledger.dispatcher.create_user("alice").await.unwrap();
    assert_eq!(
        ledger
            .dispatcher
            .create_order("alice", "79927398713")
            .await
            .unwrap(),
        OrderSubmission::Accepted
    );

    wait_for_status(&store, "79927398713", OrderStatus::Processed).await;
    let user = ledger.dispatcher.get_user("alice").await.unwrap();
    assert_eq!(user.current_points, dec!(500));

    ledger
        .dispatcher
        .create_withdrawal("alice", "12345678903", dec!(200))
        .await
        .unwrap();
    let user = ledger.dispatcher.get_user("alice").await.unwrap();
    assert_eq!(user.current_points, dec!(300));
    assert_eq!(user.withdrawn_points, dec!(200));

    let overdraw = ledger
        .dispatcher
        .create_withdrawal("alice", "4561261212345467", dec!(400))
        .await;
    assert!(matches!(overdraw, Err(AppError::PaymentRequired(_))));
    let user = ledger.dispatcher.get_user("alice").await.unwrap();
    assert_eq!(user.current_points, dec!(300));
    assert_eq!(user.withdrawn_points, dec!(200));

    let orders = ledger.dispatcher.list_orders("alice").await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].accrual, Some(dec!(500)));

    ledger.stop().await;
}

#[tokio::test]
async fn test_resubmission_does_not_double_credit() {
    let store = Arc::new(MockStore::new());
    let accrual = Arc::new(MockAccrualProvider::new());
    accrual.script("79927398713", vec![MockAccrualResponse::processed(dec!(120))]);
    let ledger = start(Arc::clone(&store), accrual);

    ledger.dispatcher.create_user("alice").await.unwrap();
    ledger
        .dispatcher
        .create_order("alice", "79927398713")
        .await
        .unwrap();
    wait_for_status(&store, "79927398713", OrderStatus::Processed).await;

    assert_eq!(
        ledger
            .dispatcher
            .create_order("alice", "79927398713")
            .await
            .unwrap(),
        OrderSubmission::AlreadyAccepted
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        ledger.dispatcher.get_user("alice").await.unwrap().current_points,
        dec!(120)
    );
    assert_eq!(ledger.accrual.calls_for("79927398713"), 1);

    ledger.stop().await;
}

#[tokio::test]
async fn test_unfinished_orders_from_previous_run_are_recovered() {
    let store = Arc::new(MockStore::new());
    store.seed_user(User::new("alice")).await;
    let mut processing = Order::new("79927398713", "alice");
    processing.status = OrderStatus::Processing;
    store.seed_order(processing).await;
    store.seed_order(Order::new("12345678903", "alice")).await;

    let accrual = Arc::new(MockAccrualProvider::new());
    accrual.script("79927398713", vec![MockAccrualResponse::processed(dec!(30))]);
    accrual.script(
        "12345678903",
        vec![MockAccrualResponse::status(AccrualStatus::Invalid)],
    );
    let ledger = start(Arc::clone(&store), accrual);

    wait_for_status(&store, "79927398713", OrderStatus::Processed).await;
    wait_for_status(&store, "12345678903", OrderStatus::Invalid).await;
    assert_eq!(store.user("alice").await.unwrap().current_points, dec!(30));

    ledger.stop().await;
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let store = Arc::new(MockStore::new());
    let accrual = Arc::new(MockAccrualProvider::new());
    accrual.script(
        "79927398713",
        vec![
            MockAccrualResponse::Failure("connection reset".to_string()),
            MockAccrualResponse::rate_limited(Duration::ZERO),
            MockAccrualResponse::processed(dec!(75)),
        ],
    );
    let ledger = start(Arc::clone(&store), accrual);

    ledger.dispatcher.create_user("alice").await.unwrap();
    ledger
        .dispatcher
        .create_order("alice", "79927398713")
        .await
        .unwrap();

    wait_for_status(&store, "79927398713", OrderStatus::Processed).await;
    assert_eq!(store.user("alice").await.unwrap().current_points, dec!(75));
    assert_eq!(ledger.accrual.calls_for("79927398713"), 3);

    ledger.stop().await;
}
