//! Application layer containing business logic and shared state.

pub mod dispatcher;
pub mod pending;
pub mod service;
pub mod state;
pub mod transaction;
pub mod worker;

pub use dispatcher::{DispatcherConfig, Task, TaskDispatcher, spawn_dispatcher};
pub use pending::{PendingOrders, PendingReceiver, pending_channel};
pub use service::LedgerService;
pub use state::AppState;
pub use transaction::run_in_transaction;
pub use worker::{Reconciliation, ReconciliationWorker, WorkerConfig, spawn_worker};

