//! Task dispatcher.
//!
//! Callers submit typed ledger operations to a bounded FIFO queue drained by a
//! single consumer, so user-facing mutations never run concurrently. Each task
//! carries a one-shot reply slot that receives exactly one result.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::domain::{AppError, ConfigError, Order, OrderSubmission, User, Withdrawal, env_or};

use super::service::LedgerService;

/// One-shot slot receiving the result of a task
pub type Reply<T> = oneshot::Sender<Result<T, AppError>>;

/// Ledger operation waiting in the queue
pub enum Task {
    CreateUser {
        login: String,
        reply: Reply<User>,
    },
    GetUser {
        login: String,
        reply: Reply<User>,
    },
    CreateOrder {
        login: String,
        number: String,
        reply: Reply<OrderSubmission>,
    },
    ListOrders {
        login: String,
        reply: Reply<Vec<Order>>,
    },
    CreateWithdrawal {
        login: String,
        order: String,
        sum: Decimal,
        reply: Reply<Withdrawal>,
    },
    ListWithdrawals {
        login: String,
        reply: Reply<Vec<Withdrawal>>,
    },
}

impl Task {
    fn kind(&self) -> &'static str {
        match self {
            Self::CreateUser { .. } => "create_user",
            Self::GetUser { .. } => "get_user",
            Self::CreateOrder { .. } => "create_order",
            Self::ListOrders { .. } => "list_orders",
            Self::CreateWithdrawal { .. } => "create_withdrawal",
            Self::ListWithdrawals { .. } => "list_withdrawals",
        }
    }
}

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Bounded queue size; submitters wait while it is full
    pub queue_capacity: usize,
    /// How long a caller waits for its result
    pub request_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 300,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl DispatcherConfig {
    /// Load from `DISPATCHER_QUEUE_CAPACITY` and `REQUEST_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            queue_capacity: env_or("DISPATCHER_QUEUE_CAPACITY", defaults.queue_capacity)?,
            request_timeout: Duration::from_secs(env_or(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }
}

/// Submission handle, cheap to clone
#[derive(Clone)]
pub struct TaskDispatcher {
    sender: mpsc::Sender<Task>,
    request_timeout: Duration,
}

/// Start the consumer.
///
/// It stops once every [`TaskDispatcher`] clone is dropped and the queue is
/// drained.
pub fn spawn_dispatcher(
    service: LedgerService,
    config: DispatcherConfig,
) -> (TaskDispatcher, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
    let handle = tokio::spawn(run(service, receiver));
    (
        TaskDispatcher {
            sender,
            request_timeout: config.request_timeout,
        },
        handle,
    )
}

async fn run(service: LedgerService, mut receiver: mpsc::Receiver<Task>) {
    info!("Task dispatcher started");

    while let Some(task) = receiver.recv().await {
        let kind = task.kind();
        let executed = AssertUnwindSafe(execute(&service, task, kind))
            .catch_unwind()
            .await;
        if executed.is_err() {
            error!(task = kind, "Task panicked; its caller receives no result");
        }
    }

    info!("Task dispatcher stopped");
}

async fn execute(service: &LedgerService, task: Task, kind: &'static str) {
    match task {
        Task::CreateUser { login, reply } => {
            respond(kind, reply, service.create_user(&login).await);
        }
        Task::GetUser { login, reply } => {
            respond(kind, reply, service.get_user(&login).await);
        }
        Task::CreateOrder {
            login,
            number,
            reply,
        } => {
            let result = service.create_order(&login, &number).await;
            respond(kind, reply, result);
        }
        Task::ListOrders { login, reply } => {
            respond(kind, reply, service.list_orders(&login).await);
        }
        Task::CreateWithdrawal {
            login,
            order,
            sum,
            reply,
        } => {
            let result = service.create_withdrawal(&login, &order, sum).await;
            respond(kind, reply, result);
        }
        Task::ListWithdrawals { login, reply } => {
            respond(kind, reply, service.list_withdrawals(&login).await);
        }
    }
}

fn respond<T>(kind: &'static str, reply: Reply<T>, result: Result<T, AppError>) {
    if reply.send(result).is_err() {
        debug!(task = kind, "Caller stopped waiting; result discarded");
    }
}

impl TaskDispatcher {
    pub async fn create_user(&self, login: &str) -> Result<User, AppError> {
        let login = login.to_string();
        self.dispatch(|reply| Task::CreateUser { login, reply }).await
    }

    pub async fn get_user(&self, login: &str) -> Result<User, AppError> {
        let login = login.to_string();
        self.dispatch(|reply| Task::GetUser { login, reply }).await
    }

    pub async fn create_order(
        &self,
        login: &str,
        number: &str,
    ) -> Result<OrderSubmission, AppError> {
        let (login, number) = (login.to_string(), number.to_string());
        self.dispatch(|reply| Task::CreateOrder {
            login,
            number,
            reply,
        })
        .await
    }

    pub async fn list_orders(&self, login: &str) -> Result<Vec<Order>, AppError> {
        let login = login.to_string();
        self.dispatch(|reply| Task::ListOrders { login, reply }).await
    }

    pub async fn create_withdrawal(
        &self,
        login: &str,
        order: &str,
        sum: Decimal,
    ) -> Result<Withdrawal, AppError> {
        let (login, order) = (login.to_string(), order.to_string());
        self.dispatch(|reply| Task::CreateWithdrawal {
            login,
            order,
            sum,
            reply,
        })
        .await
    }

    pub async fn list_withdrawals(&self, login: &str) -> Result<Vec<Withdrawal>, AppError> {
        let login = login.to_string();
        self.dispatch(|reply| Task::ListWithdrawals { login, reply })
            .await
    }

    /// Same queue with a different caller deadline
    #[must_use]
    pub fn with_timeout(&self, request_timeout: Duration) -> Self {
        Self {
            sender: self.sender.clone(),
            request_timeout,
        }
    }

    /// Run `operation` until `cancel` resolves.
    ///
    /// Returns `AppError::Cancelled` if the caller gives up first. A task that
    /// already reached the queue still executes; only its result is dropped.
    pub async fn until<T, C>(
        &self,
        operation: impl Future<Output = Result<T, AppError>>,
        cancel: C,
    ) -> Result<T, AppError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            () = cancel => Err(AppError::Cancelled("caller cancelled".to_string())),
            result = operation => result,
        }
    }

    async fn dispatch<T>(&self, build: impl FnOnce(Reply<T>) -> Task) -> Result<T, AppError> {
        match tokio::time::timeout(self.request_timeout, self.submit(build)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Cancelled(format!(
                "no result within {:?}",
                self.request_timeout
            ))),
        }
    }

    async fn submit<T>(&self, build: impl FnOnce(Reply<T>) -> Task) -> Result<T, AppError> {
        let (reply, result) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| AppError::Internal("task dispatcher is not running".to_string()))?;
        result
            .await
            .map_err(|_| AppError::Internal("task ended without a result".to_string()))?
    }
}
