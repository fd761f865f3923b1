//! Ledger operations.
//!
//! Every method here is driven by the task dispatcher's single consumer, which
//! gives the user-facing side of the ledger one writer at a time.

use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AppError, Order, OrderSubmission, Repositories, User, Withdrawal, luhn_valid,
};

use super::pending::PendingOrders;
use super::transaction::run_in_transaction;

/// Ledger business logic over the repository contracts
pub struct LedgerService {
    repos: Repositories,
    pending: PendingOrders,
}

impl LedgerService {
    #[must_use]
    pub fn new(repos: Repositories, pending: PendingOrders) -> Self {
        Self { repos, pending }
    }

    /// Register a user with a zero balance
    #[instrument(skip(self))]
    pub async fn create_user(&self, login: &str) -> Result<User, AppError> {
        if login.trim().is_empty() {
            return Err(AppError::UnprocessableEntity(
                "login must not be empty".to_string(),
            ));
        }

        if self.repos.users.get_user(login).await?.is_some() {
            return Err(AppError::AlreadyExists(format!("user {login}")));
        }

        let user = User::new(login);
        self.repos.users.create_user(&user).await?;
        info!("User registered");
        Ok(user)
    }

    /// Current and withdrawn balance of a user
    #[instrument(skip(self))]
    pub async fn get_user(&self, login: &str) -> Result<User, AppError> {
        self.repos
            .users
            .get_user(login)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {login}")))
    }

    /// Submit an order number for accrual.
    ///
    /// Resubmitting one's own order is idempotent; a number owned by someone
    /// else is a conflict.
    #[instrument(skip(self))]
    pub async fn create_order(&self, login: &str, number: &str) -> Result<OrderSubmission, AppError> {
        if !luhn_valid(number) {
            return Err(AppError::UnprocessableEntity(format!(
                "order number {number} fails the check digit"
            )));
        }

        if let Some(existing) = self.repos.orders.get_order(number).await? {
            if existing.owner == login {
                debug!("Order already accepted");
                return Ok(OrderSubmission::AlreadyAccepted);
            }
            return Err(AppError::Conflict(format!(
                "order {number} belongs to another user"
            )));
        }

        self.get_user(login).await?;

        let order = Order::new(number, login);
        match self.repos.orders.create_order(&order).await {
            Ok(()) => {}
            Err(AppError::AlreadyExists(_)) => {
                return Err(AppError::Conflict(format!("order {number} already exists")));
            }
            Err(e) => return Err(e),
        }

        info!("Order accepted");
        self.pending.notify(number);
        Ok(OrderSubmission::Accepted)
    }

    /// Orders owned by `login`, newest first
    #[instrument(skip(self))]
    pub async fn list_orders(&self, login: &str) -> Result<Vec<Order>, AppError> {
        let mut orders: Vec<Order> = self
            .repos
            .orders
            .list_orders()
            .await?
            .into_iter()
            .filter(|order| order.owner == login)
            .collect();
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }

    /// Spend `sum` points against an order number.
    ///
    /// The balance is read and debited inside one transaction together with
    /// the withdrawal record.
    #[instrument(skip(self))]
    pub async fn create_withdrawal(
        &self,
        login: &str,
        order: &str,
        sum: Decimal,
    ) -> Result<Withdrawal, AppError> {
        if !luhn_valid(order) {
            return Err(AppError::UnprocessableEntity(format!(
                "order number {order} fails the check digit"
            )));
        }
        if sum <= Decimal::ZERO {
            return Err(AppError::UnprocessableEntity(
                "withdrawal sum must be positive".to_string(),
            ));
        }
        if self.repos.withdrawals.get_withdrawal(order).await?.is_some() {
            return Err(AppError::UnprocessableEntity(format!(
                "order {order} already has a withdrawal"
            )));
        }

        let withdrawal = Withdrawal::new(order, login, sum);
        let record = withdrawal.clone();

        let result = run_in_transaction(self.repos.transactions.as_ref(), move |uow| {
            Box::pin(async move {
                let mut user = uow
                    .get_user(&record.owner)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("user {}", record.owner)))?;

                if user.current_points < record.sum {
                    return Err(AppError::PaymentRequired(format!(
                        "balance {} is below {}",
                        user.current_points, record.sum
                    )));
                }

                uow.create_withdrawal(&record).await?;
                user.current_points -= record.sum;
                user.withdrawn_points += record.sum;
                uow.update_user(&user).await?;
                Ok::<_, AppError>(())
            })
        })
        .await;

        match result {
            Ok(()) => {
                info!("Withdrawal recorded");
                Ok(withdrawal)
            }
            Err(AppError::AlreadyExists(_)) => Err(AppError::UnprocessableEntity(format!(
                "order {order} already has a withdrawal"
            ))),
            Err(e) => {
                warn!(error = %e, "Withdrawal rejected");
                Err(e)
            }
        }
    }

    /// Withdrawals made by `login`, newest first
    #[instrument(skip(self))]
    pub async fn list_withdrawals(&self, login: &str) -> Result<Vec<Withdrawal>, AppError> {
        let mut withdrawals: Vec<Withdrawal> = self
            .repos
            .withdrawals
            .list_withdrawals()
            .await?
            .into_iter()
            .filter(|withdrawal| withdrawal.owner == login)
            .collect();
        withdrawals.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(withdrawals)
    }
}
