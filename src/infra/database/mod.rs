//! Database implementations.

mod postgres;

pub use postgres::{PgUnitOfWork, PostgresClient, PostgresConfig};
