//! Mock implementations for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::{
    AccrualError, AccrualOutcome, AccrualProvider, AccrualStatus, AppError, DatabaseError, Order,
    OrderRepository, TransactionProvider, UnitOfWork, User, UserRepository, Withdrawal,
    WithdrawalRepository,
};

/// Storage operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    GetUser,
    CreateUser,
    UpdateUser,
    GetOrder,
    ListOrders,
    CreateOrder,
    UpdateOrder,
    CreateWithdrawal,
    Begin,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    users: HashMap<String, User>,
    orders: HashMap<String, Order>,
    withdrawals: HashMap<String, Withdrawal>,
}

/// In-memory store implementing every repository contract.
///
/// A transaction holds the store lock from `begin` until it finishes and works
/// on a staged copy, so transactions are serialized and a rollback discards
/// every staged write.
pub struct MockStore {
    state: Arc<AsyncMutex<StoreState>>,
    failures: Mutex<HashSet<MockOperation>>,
    is_healthy: AtomicBool,
}

impl MockStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(AsyncMutex::new(StoreState::default())),
            failures: Mutex::new(HashSet::new()),
            is_healthy: AtomicBool::new(true),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Make every subsequent `op` fail
    pub fn fail(&self, op: MockOperation) {
        self.failures.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: MockOperation) {
        self.failures.lock().unwrap().remove(&op);
    }

    pub async fn user(&self, login: &str) -> Option<User> {
        self.state.lock().await.users.get(login).cloned()
    }

    pub async fn order(&self, number: &str) -> Option<Order> {
        self.state.lock().await.orders.get(number).cloned()
    }

    pub async fn all_orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    pub async fn all_withdrawals(&self) -> Vec<Withdrawal> {
        self.state.lock().await.withdrawals.values().cloned().collect()
    }

    /// Insert an order directly, bypassing the dispatcher
    pub async fn seed_order(&self, order: Order) {
        self.state
            .lock()
            .await
            .orders
            .insert(order.number.clone(), order);
    }

    /// Insert a user directly, bypassing the dispatcher
    pub async fn seed_user(&self, user: User) {
        self.state.lock().await.users.insert(user.login.clone(), user);
    }

    fn check_should_fail(&self, op: MockOperation) -> Result<(), AppError> {
        check_failure(&self.failures.lock().unwrap(), op)
    }
}

fn check_failure(failures: &HashSet<MockOperation>, op: MockOperation) -> Result<(), AppError> {
    if failures.contains(&op) {
        return Err(AppError::Database(DatabaseError::Query(format!(
            "Mock error on {:?}",
            op
        ))));
    }
    Ok(())
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for MockStore {
    async fn get_user(&self, login: &str) -> Result<Option<User>, AppError> {
        self.check_should_fail(MockOperation::GetUser)?;
        Ok(self.state.lock().await.users.get(login).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        Ok(self.state.lock().await.users.values().cloned().collect())
    }

    async fn create_user(&self, user: &User) -> Result<(), AppError> {
        self.check_should_fail(MockOperation::CreateUser)?;
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.login) {
            return Err(AppError::AlreadyExists(format!("user {}", user.login)));
        }
        state.users.insert(user.login.clone(), user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), AppError> {
        self.check_should_fail(MockOperation::UpdateUser)?;
        self.state
            .lock()
            .await
            .users
            .insert(user.login.clone(), user.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MockStore {
    async fn get_order(&self, number: &str) -> Result<Option<Order>, AppError> {
        self.check_should_fail(MockOperation::GetOrder)?;
        Ok(self.state.lock().await.orders.get(number).cloned())
    }

    async fn list_orders(&self) -> Result<Vec<Order>, AppError> {
        self.check_should_fail(MockOperation::ListOrders)?;
        Ok(self.state.lock().await.orders.values().cloned().collect())
    }

    async fn create_order(&self, order: &Order) -> Result<(), AppError> {
        self.check_should_fail(MockOperation::CreateOrder)?;
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.number) {
            return Err(AppError::AlreadyExists(format!("order {}", order.number)));
        }
        state.orders.insert(order.number.clone(), order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), AppError> {
        self.check_should_fail(MockOperation::UpdateOrder)?;
        self.state
            .lock()
            .await
            .orders
            .insert(order.number.clone(), order.clone());
        Ok(())
    }
}

#[async_trait]
impl WithdrawalRepository for MockStore {
    async fn get_withdrawal(&self, order: &str) -> Result<Option<Withdrawal>, AppError> {
        Ok(self.state.lock().await.withdrawals.get(order).cloned())
    }

    async fn list_withdrawals(&self) -> Result<Vec<Withdrawal>, AppError> {
        Ok(self.state.lock().await.withdrawals.values().cloned().collect())
    }

    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), AppError> {
        self.check_should_fail(MockOperation::CreateWithdrawal)?;
        let mut state = self.state.lock().await;
        if state.withdrawals.contains_key(&withdrawal.order) {
            return Err(AppError::AlreadyExists(format!(
                "withdrawal {}",
                withdrawal.order
            )));
        }
        state
            .withdrawals
            .insert(withdrawal.order.clone(), withdrawal.clone());
        Ok(())
    }
}

#[async_trait]
impl TransactionProvider for MockStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        self.check_should_fail(MockOperation::Begin)?;
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        let failures = self.failures.lock().unwrap().clone();
        Ok(Box::new(MockUnitOfWork {
            open: Some((guard, staged)),
            failures,
        }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        Ok(())
    }
}

/// Transaction over [`MockStore`]; failures are captured at `begin`
pub struct MockUnitOfWork {
    open: Option<(OwnedMutexGuard<StoreState>, StoreState)>,
    failures: HashSet<MockOperation>,
}

impl MockUnitOfWork {
    fn staged(&mut self, op: MockOperation) -> Result<&mut StoreState, AppError> {
        check_failure(&self.failures, op)?;
        self.open
            .as_mut()
            .map(|(_, staged)| staged)
            .ok_or(AppError::Database(DatabaseError::NoTransaction))
    }
}

#[async_trait]
impl UnitOfWork for MockUnitOfWork {
    async fn get_user(&mut self, login: &str) -> Result<Option<User>, AppError> {
        Ok(self.staged(MockOperation::GetUser)?.users.get(login).cloned())
    }

    async fn update_user(&mut self, user: &User) -> Result<(), AppError> {
        self.staged(MockOperation::UpdateUser)?
            .users
            .insert(user.login.clone(), user.clone());
        Ok(())
    }

    async fn get_order(&mut self, number: &str) -> Result<Option<Order>, AppError> {
        Ok(self
            .staged(MockOperation::GetOrder)?
            .orders
            .get(number)
            .cloned())
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), AppError> {
        self.staged(MockOperation::UpdateOrder)?
            .orders
            .insert(order.number.clone(), order.clone());
        Ok(())
    }

    async fn create_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), AppError> {
        let staged = self.staged(MockOperation::CreateWithdrawal)?;
        if staged.withdrawals.contains_key(&withdrawal.order) {
            return Err(AppError::AlreadyExists(format!(
                "withdrawal {}",
                withdrawal.order
            )));
        }
        staged
            .withdrawals
            .insert(withdrawal.order.clone(), withdrawal.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        let (mut guard, staged) = self
            .open
            .take()
            .ok_or(AppError::Database(DatabaseError::NoTransaction))?;
        if self.failures.contains(&MockOperation::Commit) {
            return Err(AppError::Database(DatabaseError::Transaction(
                "Mock commit failure".to_string(),
            )));
        }
        *guard = staged;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        self.open
            .take()
            .map(|_| ())
            .ok_or(AppError::Database(DatabaseError::NoTransaction))
    }
}

/// Scripted reply of [`MockAccrualProvider`]
#[derive(Debug, Clone)]
pub enum MockAccrualResponse {
    Outcome(AccrualOutcome),
    Failure(String),
}

impl MockAccrualResponse {
    #[must_use]
    pub fn processed(amount: rust_decimal::Decimal) -> Self {
        Self::Outcome(AccrualOutcome::Reported {
            status: AccrualStatus::Processed,
            accrual: Some(amount),
        })
    }

    #[must_use]
    pub fn status(status: AccrualStatus) -> Self {
        Self::Outcome(AccrualOutcome::Reported {
            status,
            accrual: None,
        })
    }

    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::Outcome(AccrualOutcome::RateLimited { retry_after })
    }
}

/// Mock accrual service.
///
/// Replies are consumed in order per order number; the last one repeats.
/// Unknown numbers report `NotRegistered`.
#[derive(Default)]
pub struct MockAccrualProvider {
    scripts: Mutex<HashMap<String, VecDeque<MockAccrualResponse>>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockAccrualProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, number: &str, responses: Vec<MockAccrualResponse>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(number.to_string(), responses.into());
    }

    /// Delay every lookup, for exercising attempt timeouts
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, number: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.as_str() == number)
            .count()
    }

    fn next_response(&self, number: &str) -> MockAccrualResponse {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(number) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or(MockAccrualResponse::Outcome(AccrualOutcome::NotRegistered)),
            None => MockAccrualResponse::Outcome(AccrualOutcome::NotRegistered),
        }
    }
}

#[async_trait]
impl AccrualProvider for MockAccrualProvider {
    async fn lookup(&self, number: &str) -> Result<AccrualOutcome, AppError> {
        self.calls.lock().unwrap().push(number.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_response(number) {
            MockAccrualResponse::Outcome(outcome) => Ok(outcome),
            MockAccrualResponse::Failure(message) => {
                Err(AppError::Accrual(AccrualError::Network(message)))
            }
        }
    }
}
