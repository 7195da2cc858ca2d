//! PostgreSQL backend for TicketCore.
//!
//! [`PostgresReservationStore`] implements
//! [`ReservationStore`](ticketcore::ReservationStore) with one transaction per
//! admission unit. The unit takes a transaction-scoped advisory lock keyed on
//! the (date, ticket) pair, so the capacity sum and the row write are
//! serialized per key across every process sharing the database.
//! [`PostgresTicketCatalog`] reads ticket prices from the `tickets` table.

mod catalog;
mod store;

use std::env;
use std::num::NonZeroU32;
use std::time::Duration;

use nutype::nutype;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use thiserror::Error;
use ticketcore::{Operation, ReservationId, StoreError};
use tracing::{error, warn};

pub use catalog::PostgresTicketCatalog;
pub use store::PostgresReservationStore;

/// Errors raised while setting up a connection to PostgreSQL.
#[derive(Debug, Error)]
pub enum PostgresError {
    /// The pool could not open its first connection.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),

    /// A connection setting read from the environment is malformed.
    #[error("invalid value for {variable}: {detail}")]
    InvalidSetting {
        /// Environment variable that held the value.
        variable: &'static str,
        /// What was wrong with it.
        detail: String,
    },
}

/// Maximum number of database connections in the pool.
///
/// Must be at least 1, enforced by using `NonZeroU32` as the underlying type.
///
/// # Examples
///
/// ```ignore
/// use std::num::NonZeroU32;
/// use ticketcore_postgres::MaxConnections;
///
/// let small_pool = MaxConnections::new(NonZeroU32::new(5).expect("5 is non-zero"));
/// ```
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(NonZeroU32);

/// Configuration for the PostgreSQL connection pool.
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

impl PostgresConfig {
    pub(crate) async fn connect(&self, connection_string: &str) -> Result<Pool<Postgres>, PostgresError> {
        let max_connections: NonZeroU32 = self.max_connections.into();
        PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
            .connect(connection_string)
            .await
            .map_err(PostgresError::ConnectionFailed)
    }
}

/// Builds a connection URL from the process environment.
///
/// `DATABASE_URL` wins when set. Otherwise the URL is assembled from
/// `DB_USER`, `DB_PASSWORD`, `DB_HOST`, `DB_PORT` and `DB_NAME`, defaulting to
/// `postgres@localhost:5432/jurashow_db`.
pub fn connection_url_from_env() -> Result<String, PostgresError> {
    connection_url_from(|variable| env::var(variable).ok())
}

fn connection_url_from<L>(lookup: L) -> Result<String, PostgresError>
where
    L: Fn(&'static str) -> Option<String>,
{
    let setting = |variable| lookup(variable).filter(|value| !value.trim().is_empty());

    if let Some(url) = setting("DATABASE_URL") {
        return Ok(url);
    }

    let user = setting("DB_USER").unwrap_or_else(|| "postgres".to_string());
    let password = setting("DB_PASSWORD");
    let host = setting("DB_HOST").unwrap_or_else(|| "localhost".to_string());
    let name = setting("DB_NAME").unwrap_or_else(|| "jurashow_db".to_string());
    let port = match setting("DB_PORT") {
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .map_err(|error| PostgresError::InvalidSetting {
                variable: "DB_PORT",
                detail: error.to_string(),
            })?,
        None => 5432,
    };

    let credentials = match password {
        Some(password) => format!("{user}:{password}"),
        None => user,
    };
    Ok(format!("postgres://{credentials}@{host}:{port}/{name}"))
}

const UNIQUE_VIOLATION: &str = "23505";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";

fn sqlstate(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(db_error) => db_error.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// Maps an insert failure, turning a primary key violation into an identity
/// collision.
pub(crate) fn map_insert_error(
    error: sqlx::Error,
    reservation_id: ReservationId,
    after: Duration,
) -> StoreError {
    if sqlstate(&error).as_deref() == Some(UNIQUE_VIOLATION) {
        warn!(
            error = %error,
            reservation_id = %reservation_id,
            "[postgres.identity_collision] reservation id already stored"
        );
        return StoreError::IdentityCollision { reservation_id };
    }
    map_sqlx_error(error, Operation::InsertReservation, after)
}

/// Maps a database error into the store taxonomy. `after` is the bound that
/// was in effect when the step ran.
pub(crate) fn map_sqlx_error(
    error: sqlx::Error,
    operation: Operation,
    after: Duration,
) -> StoreError {
    let code = sqlstate(&error);
    let timed_out = matches!(error, sqlx::Error::PoolTimedOut)
        || matches!(code.as_deref(), Some(LOCK_NOT_AVAILABLE | QUERY_CANCELED));

    if timed_out {
        warn!(
            error = %error,
            operation = %operation,
            "[postgres.timeout] database operation gave up waiting"
        );
        return StoreError::Timeout { operation, after };
    }

    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    StoreError::StoreFailure { operation }
}
