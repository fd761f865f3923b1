//! PostgreSQL storage implementation.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, DatabaseError, Order, OrderRepository, OrderStatus, TransactionProvider, UnitOfWork,
    User, UserRepository, Withdrawal, WithdrawalRepository,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_user(row: &PgRow) -> User {
    User {
        login: row.get("login"),
        current_points: row.get("current_points"),
        withdrawn_points: row.get("withdrawn_points"),
    }
}

fn row_to_order(row: &PgRow) -> Result<Order, AppError> {
    let status: String = row.get("status");
    Ok(Order {
        number: row.get("number"),
        owner: row.get("owner"),
        status: status
            .parse::<OrderStatus>()
            .map_err(|e| AppError::Database(DatabaseError::Query(e)))?,
        accrual: row.get("accrual"),
        uploaded_at: row.get("uploaded_at"),
    })
}

fn row_to_withdrawal(row: &PgRow) -> Withdrawal {
    Withdrawal {
        order: row.get("order_number"),
        owner: row.get("owner"),
        sum: row.get("sum"),
        processed_at: row.get("processed_at"),
    }
}

/// Storage error, with unique violations reported as `AlreadyExists`
fn insert_error(err: sqlx::Error, what: String) -> AppError {
    match DatabaseError::from(err) {
        DatabaseError::Duplicate(_) => AppError::AlreadyExists(what),
        other => AppError::Database(other),
    }
}

#[async_trait]
impl UserRepository for PostgresClient {
    #[instrument(skip(self))]
    async fn get_user(&self, login: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(
            "SELECT login, current_points, withdrawn_points FROM users WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(row.as_ref().map(row_to_user))
    }

    #[instrument(skip(self))]
    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query(
            "SELECT login, current_points, withdrawn_points FROM users ORDER BY login",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(rows.iter().map(row_to_user).collect())
    }

    #[instrument(skip(self, user), fields(login = %user.login))]
    async fn create_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (login, current_points, withdrawn_points)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&user.login)
        .bind(user.current_points)
        .bind(user.withdrawn_points)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, format!("user {}", user.login)))?;

        Ok(())
    }

    #[instrument(skip(self, user), fields(login = %user.login))]
    async fn update_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET current_points = $1, withdrawn_points = $2 WHERE login = $3",
        )
        .bind(user.current_points)
        .bind(user.withdrawn_points)
        .bind(&user.login)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PostgresClient {
    #[instrument(skip(self))]
    async fn get_order(&self, number: &str) -> Result<Option<Order>, AppError> {
        let row = sqlx::query(
            "SELECT number, owner, status, accrual, uploaded_at FROM orders WHERE number = $1",
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        row.as_ref().map(row_to_order).transpose()
    }

    #[instrument(skip(self))]
    async fn list_orders(&self) -> Result<Vec<Order>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT number, owner, status, accrual, uploaded_at
            FROM orders
            ORDER BY uploaded_at DESC, number
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        rows.iter().map(row_to_order).collect()
    }

    #[instrument(skip(self, order), fields(number = %order.number))]
    async fn create_order(&self, order: &Order) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO orders (number, owner, status, accrual, uploaded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&order.number)
        .bind(&order.owner)
        .bind(order.status.as_str())
        .bind(order.accrual)
        .bind(order.uploaded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, format!("order {}", order.number)))?;

        Ok(())
    }

    #[instrument(skip(self, order), fields(number = %order.number, status = %order.status))]
    async fn update_order(&self, order: &Order) -> Result<(), AppError> {
        sqlx::query("UPDATE orders SET status = $1, accrual = $2 WHERE number = $3")
            .bind(order.status.as_str())
            .bind(order.accrual)
            .bind(&order.number)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(())
    }
}

#[async_trait]
impl WithdrawalRepository for PostgresClient {
    #[instrument(skip(self))]
    async fn get_withdrawal(&self, order: &str) -> Result<Option<Withdrawal>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT order_number, owner, sum, processed_at
            FROM withdrawals
            WHERE order_number = $1
            "#,
        )
        .bind(order)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(row.as_ref().map(row_to_withdrawal))
    }

    #[instrument(skip(self))]
    async fn list_withdrawals(&self) -> Result<Vec<Withdrawal>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT order_number, owner, sum, processed_at
            FROM withdrawals
            ORDER BY processed_at DESC, order_number
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(rows.iter().map(row_to_withdrawal).collect())
    }

    #[instrument(skip(self, withdrawal), fields(order = %withdrawal.order))]
    async fn create_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), AppError> {
        insert_withdrawal(&self.pool, withdrawal).await
    }
}

async fn insert_withdrawal<'e, E>(executor: E, withdrawal: &Withdrawal) -> Result<(), AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO withdrawals (order_number, owner, sum, processed_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(&withdrawal.order)
    .bind(&withdrawal.owner)
    .bind(withdrawal.sum)
    .bind(withdrawal.processed_at)
    .execute(executor)
    .await
    .map_err(|e| insert_error(e, format!("withdrawal {}", withdrawal.order)))?;

    Ok(())
}

#[async_trait]
impl TransactionProvider for PostgresClient {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))?;
        Ok(Box::new(PgUnitOfWork { tx: Some(tx) }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }
}

/// Open PostgreSQL transaction.
///
/// Reads lock the selected row (`FOR UPDATE`) until the transaction ends, so
/// concurrent read-modify-write sequences on a balance or order serialize.
/// Dropping it without commit rolls back.
pub struct PgUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgUnitOfWork {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, AppError> {
        self.tx
            .as_mut()
            .ok_or(AppError::Database(DatabaseError::NoTransaction))
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn get_user(&mut self, login: &str) -> Result<Option<User>, AppError> {
        let tx = self.tx()?;
        let row = sqlx::query(
            r#"
            SELECT login, current_points, withdrawn_points
            FROM users
            WHERE login = $1
            FOR UPDATE
            "#,
        )
        .bind(login)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(row.as_ref().map(row_to_user))
    }

    async fn update_user(&mut self, user: &User) -> Result<(), AppError> {
        let tx = self.tx()?;
        sqlx::query(
            "UPDATE users SET current_points = $1, withdrawn_points = $2 WHERE login = $3",
        )
        .bind(user.current_points)
        .bind(user.withdrawn_points)
        .bind(&user.login)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(())
    }

    async fn get_order(&mut self, number: &str) -> Result<Option<Order>, AppError> {
        let tx = self.tx()?;
        let row = sqlx::query(
            r#"
            SELECT number, owner, status, accrual, uploaded_at
            FROM orders
            WHERE number = $1
            FOR UPDATE
            "#,
        )
        .bind(number)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), AppError> {
        let tx = self.tx()?;
        sqlx::query("UPDATE orders SET status = $1, accrual = $2 WHERE number = $3")
            .bind(order.status.as_str())
            .bind(order.accrual)
            .bind(&order.number)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(())
    }

    async fn create_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), AppError> {
        let tx = self.tx()?;
        insert_withdrawal(&mut **tx, withdrawal).await
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        let tx = self
            .tx
            .take()
            .ok_or(AppError::Database(DatabaseError::NoTransaction))?;
        tx.commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        let tx = self
            .tx
            .take()
            .ok_or(AppError::Database(DatabaseError::NoTransaction))?;
        tx.rollback()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))
    }
}
