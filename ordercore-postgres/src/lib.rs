//! PostgreSQL storage backend for ordercore.
//!
//! Concurrency guarantees come from the database, not from application locks:
//!
//! - stock is decremented with a single conditional `UPDATE … WHERE stock >= $n`
//! - carts and orders are row-locked with `SELECT … FOR UPDATE`
//! - merge-add and lazy cart creation use `INSERT … ON CONFLICT`
//! - idempotency is a `UNIQUE (user_id, idempotency_key)` constraint
//!
//! Transactions run at READ COMMITTED. Serialization failures and deadlocks
//! surface as [`StoreError::Transient`] so callers can retry the whole unit of
//! work.

use std::num::NonZeroU32;
use std::time::Duration;

use nutype::nutype;
use ordercore::{Operation, StoreError, TransactionCoordinator};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

mod rows;
mod transaction;

pub use transaction::PostgresTransaction;

const SCHEMA: &str = include_str!("../migrations/0001_schema.sql");

/// Constraint names the schema declares, as reported in unique violations.
pub mod constraints {
    pub const ORDERS_IDEMPOTENCY: &str = "orders_user_id_idempotency_key_key";
    pub const ONE_ACTIVE_CART: &str = "carts_one_active_per_user";
    pub const CART_LINE_PER_PRODUCT: &str = "cart_items_cart_id_product_id_key";
    pub const UNKNOWN: &str = "unknown";
}

#[derive(Debug, Error)]
pub enum PostgresStoreError {
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),

    #[error("failed to apply ordercore schema")]
    MigrationFailed(#[source] sqlx::Error),
}

/// Maximum number of database connections in the pool.
///
/// Must be at least 1, enforced by using `NonZeroU32` as the underlying type.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(NonZeroU32);

/// Configuration for the [`PostgresStore`] connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: NonZeroU32 = match NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect with default configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresStoreError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connect with custom pool configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresStoreError> {
        let connection_string = connection_string.into();
        let max_connections: NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresStoreError::ConnectionFailed)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool, e.g. one shared with the catalog and address services.
    pub const fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Create the ordercore tables and indexes if they do not exist.
    #[instrument(name = "postgres.migrate", skip(self))]
    pub async fn migrate(&self) -> Result<(), PostgresStoreError> {
        let _ = sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(PostgresStoreError::MigrationFailed)?;
        info!("[postgres.migrate] schema is up to date");
        Ok(())
    }
}

impl TransactionCoordinator for PostgresStore {
    type Tx = PostgresTransaction;

    #[instrument(name = "postgres.begin", skip(self), level = "debug")]
    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::BeginTransaction))?;
        Ok(PostgresTransaction::new(tx))
    }
}

/// Translate a database error into the storage taxonomy by SQLSTATE.
pub(crate) fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        match db_error.code().as_deref() {
            // unique_violation
            Some("23505") => {
                let constraint = match db_error.constraint() {
                    Some(constraints::ORDERS_IDEMPOTENCY) => constraints::ORDERS_IDEMPOTENCY,
                    Some(constraints::ONE_ACTIVE_CART) => constraints::ONE_ACTIVE_CART,
                    Some(constraints::CART_LINE_PER_PRODUCT) => constraints::CART_LINE_PER_PRODUCT,
                    _ => constraints::UNKNOWN,
                };
                warn!(
                    error = %db_error,
                    operation = %operation,
                    constraint,
                    "[postgres.unique_violation] uniqueness constraint rejected write"
                );
                return StoreError::UniqueViolation { constraint };
            }
            // serialization_failure, deadlock_detected
            Some("40001" | "40P01") => {
                warn!(
                    error = %db_error,
                    operation = %operation,
                    "[postgres.transient] transaction aborted by concurrent transaction"
                );
                return StoreError::Transient { operation };
            }
            _ => {}
        }
    }

    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    StoreError::StoreFailure { operation }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = PostgresConfig::default();
        let max: NonZeroU32 = config.max_connections.into();
        assert_eq!(max.get(), 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn schema_declares_every_named_constraint() {
        for name in [
            constraints::ORDERS_IDEMPOTENCY,
            constraints::ONE_ACTIVE_CART,
            constraints::CART_LINE_PER_PRODUCT,
        ] {
            assert!(SCHEMA.contains(name), "schema is missing {name}");
        }
    }

    #[test]
    fn non_database_errors_are_store_failures() {
        let error = map_sqlx_error(sqlx::Error::PoolTimedOut, Operation::LockCart);
        assert_eq!(
            error,
            StoreError::StoreFailure {
                operation: Operation::LockCart
            }
        );
    }
}
