use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{query, query_as, query_scalar, FromRow, PgConnection, Pool, Postgres, Transaction};
use ticketcore::{
    AdmissionPolicy, Buyer, BuyerEmail, BuyerName, CapacityKey, Money, MonthlyStats, Operation,
    PaymentMethod, Quantity, Reservation, ReservationChange, ReservationId, ReservationStore,
    StoreError, TicketId,
};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{map_insert_error, map_sqlx_error, PostgresConfig, PostgresError};

const RESERVATION_COLUMNS: &str = "reservation_id, buyer_name, buyer_email, visit_date, \
     ticket_id, quantity, unit_price, total_price, payment_method";

/// Reservation store backed by PostgreSQL.
///
/// Every admission runs in its own transaction: `lock_timeout` is set to the
/// policy timeout, `pg_advisory_xact_lock(ticket_id, day_number)` serializes
/// the capacity key, the committed quantity is summed and the row is written.
/// The lock is released when the transaction ends, whether it commits or
/// rolls back.
///
/// The policy timeout bounds everything up to the `COMMIT`. The commit itself
/// is never abandoned, so a [`StoreError::Timeout`] always means the unit was
/// rolled back.
#[derive(Debug, Clone)]
pub struct PostgresReservationStore {
    pool: Pool<Postgres>,
    acquire_timeout: Duration,
}

impl PostgresReservationStore {
    /// Create a new store with default configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Create a new store with custom pool configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresError> {
        let connection_string = connection_string.into();
        let pool = config.connect(&connection_string).await?;
        Ok(Self {
            pool,
            acquire_timeout: config.acquire_timeout,
        })
    }

    /// Create a store from an existing connection pool.
    ///
    /// Use this to share one pool with [`PostgresTicketCatalog`](crate::PostgresTicketCatalog).
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        let acquire_timeout = pool.options().get_acquire_timeout();
        Self {
            pool,
            acquire_timeout,
        }
    }

    /// The underlying connection pool.
    pub const fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Check that the database answers.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let _ = query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Ping, self.acquire_timeout))?;
        Ok(())
    }

    /// Apply the bundled schema migrations.
    #[instrument(name = "postgres.migrate", skip(self))]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|error| {
                error!(error = %error, "[postgres.migrate] schema migration failed");
                StoreError::StoreFailure {
                    operation: Operation::Migrate,
                }
            })
    }

    async fn admit_insert(
        &self,
        reservation: Reservation,
        policy: AdmissionPolicy,
    ) -> Result<Staged, StoreError> {
        let key = reservation.capacity_key();
        let after = policy.timeout;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::BeginTransaction, after))?;

        set_lock_timeout(&mut tx, after).await?;
        lock_key(&mut tx, key, after).await?;

        let committed = committed_in(&mut tx, key, None, after).await?;
        policy.admit(key, committed, reservation.quantity)?;

        let _ = query(
            "INSERT INTO reservations (reservation_id, buyer_name, buyer_email, visit_date, \
             ticket_id, quantity, unit_price, total_price, payment_method) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(reservation.reservation_id.into_inner())
        .bind(reservation.buyer.name.as_ref())
        .bind(reservation.buyer.email.as_ref())
        .bind(reservation.date)
        .bind(reservation.ticket_id.into_inner())
        .bind(quantity_column(reservation.quantity))
        .bind(reservation.unit_price.amount())
        .bind(reservation.total_price.amount())
        .bind(reservation.payment_method.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|error| map_insert_error(error, reservation.reservation_id, after))?;

        Ok(Staged {
            tx,
            reservation,
            after,
        })
    }

    async fn admit_update(
        &self,
        reservation_id: ReservationId,
        change: &ReservationChange,
        policy: AdmissionPolicy,
    ) -> Result<Staged, StoreError> {
        let after = policy.timeout;
        let operation = Operation::UpdateReservation;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::BeginTransaction, after))?;

        set_lock_timeout(&mut tx, after).await?;

        // Row lock first, then the key lock of wherever the row is going.
        let row = query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE reservation_id = $1 FOR UPDATE"
        ))
        .bind(reservation_id.into_inner())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| map_sqlx_error(error, operation, after))?
        .ok_or(StoreError::NotFound { reservation_id })?;

        let current = row.into_reservation(operation)?;
        let next = current.apply(change);

        if change.competes_for_capacity(&current) {
            let key = next.capacity_key();
            lock_key(&mut tx, key, after).await?;
            let committed = committed_in(&mut tx, key, Some(reservation_id), after).await?;
            policy.admit(key, committed, next.quantity)?;
        }

        let _ = query(
            "UPDATE reservations SET buyer_name = $2, buyer_email = $3, visit_date = $4, \
             quantity = $5, unit_price = $6, total_price = $7, payment_method = $8 \
             WHERE reservation_id = $1",
        )
        .bind(reservation_id.into_inner())
        .bind(next.buyer.name.as_ref())
        .bind(next.buyer.email.as_ref())
        .bind(next.date)
        .bind(quantity_column(next.quantity))
        .bind(next.unit_price.amount())
        .bind(next.total_price.amount())
        .bind(next.payment_method.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|error| map_sqlx_error(error, operation, after))?;

        Ok(Staged {
            tx,
            reservation: next,
            after,
        })
    }

    async fn fetch_sorted(
        &self,
        filter: &str,
        email: Option<&BuyerEmail>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let operation = Operation::ListReservations;
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations {filter} \
             ORDER BY visit_date DESC, reservation_id DESC"
        );
        let mut statement = query_as::<_, ReservationRow>(&sql);
        if let Some(email) = email {
            statement = statement.bind(email.as_ref());
        }

        statement
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, operation, self.acquire_timeout))?
            .into_iter()
            .map(|row| row.into_reservation(operation))
            .collect()
    }
}

/// An admitted write waiting for its `COMMIT`.
struct Staged {
    tx: Transaction<'static, Postgres>,
    reservation: Reservation,
    after: Duration,
}

impl Staged {
    /// Commit outside the admission bound. Once `COMMIT` is sent the outcome
    /// belongs to the server, so the caller waits for it.
    async fn commit(self) -> Result<Reservation, StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CommitTransaction, self.after))?;
        Ok(self.reservation)
    }
}

/// Runs `unit` with an overall bound. Dropping the unit on expiry drops its
/// transaction, which rolls it back.
async fn bounded<T, F>(operation: Operation, after: Duration, unit: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(after, unit)
        .await
        .map_err(|_| StoreError::Timeout { operation, after })?
}

async fn set_lock_timeout(conn: &mut PgConnection, after: Duration) -> Result<(), StoreError> {
    let _ = query("SELECT set_config('lock_timeout', $1, true)")
        .bind(format!("{}ms", after.as_millis().max(1)))
        .execute(conn)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::AcquireKeyLock, after))?;
    Ok(())
}

/// Days since 2000-01-01, the second half of the advisory lock key.
fn day_number(date: NaiveDate) -> Result<i32, StoreError> {
    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN);
    i32::try_from(date.signed_duration_since(epoch).num_days()).map_err(|_| {
        StoreError::Corrupted {
            operation: Operation::AcquireKeyLock,
            detail: format!("visit date {date} is outside the lockable range"),
        }
    })
}

async fn lock_key(
    conn: &mut PgConnection,
    key: CapacityKey,
    after: Duration,
) -> Result<(), StoreError> {
    let _ = query("SELECT pg_advisory_xact_lock($1, $2)")
        .bind(key.ticket_id.into_inner())
        .bind(day_number(key.date)?)
        .execute(conn)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::AcquireKeyLock, after))?;
    Ok(())
}

async fn committed_in(
    conn: &mut PgConnection,
    key: CapacityKey,
    excluding: Option<ReservationId>,
    after: Duration,
) -> Result<u32, StoreError> {
    let operation = Operation::CommittedQuantity;
    let total: i64 = query_scalar(
        "SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM reservations \
         WHERE visit_date = $1 AND ticket_id = $2 \
           AND ($3::UUID IS NULL OR reservation_id <> $3)",
    )
    .bind(key.date)
    .bind(key.ticket_id.into_inner())
    .bind(excluding.map(ReservationId::into_inner))
    .fetch_one(conn)
    .await
    .map_err(|error| map_sqlx_error(error, operation, after))?;

    u32::try_from(total).map_err(|_| StoreError::Corrupted {
        operation,
        detail: format!("committed quantity {total} for {key} is out of range"),
    })
}

fn quantity_column(quantity: Quantity) -> i32 {
    i32::try_from(quantity.count()).unwrap_or(i32::MAX)
}

#[derive(Debug, FromRow)]
struct ReservationRow {
    reservation_id: Uuid,
    buyer_name: String,
    buyer_email: String,
    visit_date: NaiveDate,
    ticket_id: i32,
    quantity: i32,
    unit_price: Decimal,
    total_price: Decimal,
    payment_method: String,
}

impl ReservationRow {
    fn into_reservation(self, operation: Operation) -> Result<Reservation, StoreError> {
        let corrupted = |detail: String| StoreError::Corrupted {
            operation,
            detail: format!("reservation {}: {detail}", self.reservation_id),
        };

        let name = BuyerName::try_new(self.buyer_name)
            .map_err(|error| corrupted(format!("buyer name: {error}")))?;
        let email = BuyerEmail::try_new(self.buyer_email)
            .map_err(|error| corrupted(format!("buyer email: {error}")))?;
        let ticket_id = TicketId::try_new(self.ticket_id)
            .map_err(|error| corrupted(format!("ticket id: {error}")))?;
        let quantity = u32::try_from(self.quantity)
            .map_err(|error| corrupted(format!("quantity: {error}")))
            .and_then(|n| {
                Quantity::try_new(n).map_err(|error| corrupted(format!("quantity: {error}")))
            })?;
        let unit_price = Money::try_from_decimal(self.unit_price)
            .map_err(|error| corrupted(format!("unit price: {error}")))?;
        let total_price = Money::try_from_decimal(self.total_price)
            .map_err(|error| corrupted(format!("total price: {error}")))?;
        let payment_method: PaymentMethod = self
            .payment_method
            .parse()
            .map_err(|error| corrupted(format!("payment method: {error}")))?;

        Ok(Reservation {
            reservation_id: ReservationId::new(self.reservation_id),
            buyer: Buyer::new(name, email),
            date: self.visit_date,
            ticket_id,
            quantity,
            unit_price,
            total_price,
            payment_method,
        })
    }
}

#[derive(Debug, FromRow)]
struct MonthlyStatsRow {
    month: NaiveDate,
    reservation_count: i64,
    total_revenue: Decimal,
    total_tickets: i64,
    average_revenue: Decimal,
}

impl MonthlyStatsRow {
    fn into_stats(self) -> Result<MonthlyStats, StoreError> {
        let corrupted = |detail: String| StoreError::Corrupted {
            operation: Operation::MonthlyStats,
            detail: format!("month {}: {detail}", self.month),
        };

        Ok(MonthlyStats {
            month: self.month,
            reservation_count: u64::try_from(self.reservation_count)
                .map_err(|error| corrupted(format!("reservation count: {error}")))?,
            total_revenue: Money::try_from_decimal(self.total_revenue)
                .map_err(|error| corrupted(format!("total revenue: {error}")))?,
            total_tickets: u64::try_from(self.total_tickets)
                .map_err(|error| corrupted(format!("total tickets: {error}")))?,
            average_revenue: Money::try_from_decimal(self.average_revenue)
                .map_err(|error| corrupted(format!("average revenue: {error}")))?,
        })
    }
}

impl ReservationStore for PostgresReservationStore {
    #[instrument(
        name = "postgres.insert_reservation",
        skip(self, reservation, policy),
        fields(
            reservation_id = %reservation.reservation_id,
            key = %reservation.capacity_key(),
            quantity = %reservation.quantity
        )
    )]
    async fn insert_reservation(
        &self,
        reservation: Reservation,
        policy: AdmissionPolicy,
    ) -> Result<Reservation, StoreError> {
        let stored = bounded(
            Operation::InsertReservation,
            policy.timeout,
            self.admit_insert(reservation, policy),
        )
        .await?
        .commit()
        .await?;
        info!("[postgres.insert_reservation] reservation committed");
        Ok(stored)
    }

    #[instrument(
        name = "postgres.update_reservation",
        skip(self, change, policy),
        fields(reservation_id = %reservation_id)
    )]
    async fn update_reservation(
        &self,
        reservation_id: ReservationId,
        change: ReservationChange,
        policy: AdmissionPolicy,
    ) -> Result<Reservation, StoreError> {
        let updated = bounded(
            Operation::UpdateReservation,
            policy.timeout,
            self.admit_update(reservation_id, &change, policy),
        )
        .await?
        .commit()
        .await?;
        info!(
            key = %updated.capacity_key(),
            quantity = %updated.quantity,
            "[postgres.update_reservation] reservation updated"
        );
        Ok(updated)
    }

    #[instrument(name = "postgres.delete_reservation", skip(self), fields(reservation_id = %reservation_id))]
    async fn delete_reservation(&self, reservation_id: ReservationId) -> Result<bool, StoreError> {
        let result = query("DELETE FROM reservations WHERE reservation_id = $1")
            .bind(reservation_id.into_inner())
            .execute(&self.pool)
            .await
            .map_err(|error| {
                map_sqlx_error(error, Operation::DeleteReservation, self.acquire_timeout)
            })?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(name = "postgres.find_reservation", skip(self), fields(reservation_id = %reservation_id))]
    async fn find_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        let operation = Operation::FindReservation;
        query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE reservation_id = $1"
        ))
        .bind(reservation_id.into_inner())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, operation, self.acquire_timeout))?
        .map(|row| row.into_reservation(operation))
        .transpose()
    }

    #[instrument(name = "postgres.reservations_by_email", skip(self, email))]
    async fn reservations_by_email(
        &self,
        email: &BuyerEmail,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.fetch_sorted("WHERE lower(buyer_email) = lower($1)", Some(email))
            .await
    }

    #[instrument(name = "postgres.all_reservations", skip(self))]
    async fn all_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        self.fetch_sorted("", None).await
    }

    #[instrument(name = "postgres.committed_quantity", skip(self), fields(key = %key))]
    async fn committed_quantity(
        &self,
        key: CapacityKey,
        excluding: Option<ReservationId>,
    ) -> Result<u32, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(|error| {
            map_sqlx_error(error, Operation::CommittedQuantity, self.acquire_timeout)
        })?;
        committed_in(&mut conn, key, excluding, self.acquire_timeout).await
    }

    #[instrument(name = "postgres.monthly_stats", skip(self))]
    async fn monthly_stats(&self, since: NaiveDate) -> Result<Vec<MonthlyStats>, StoreError> {
        query_as::<_, MonthlyStatsRow>(
            "SELECT date_trunc('month', visit_date)::DATE AS month, \
                    COUNT(*) AS reservation_count, \
                    COALESCE(SUM(total_price), 0)::NUMERIC(14, 2) AS total_revenue, \
                    COALESCE(SUM(quantity), 0)::BIGINT AS total_tickets, \
                    ROUND(AVG(total_price), 2)::NUMERIC(14, 2) AS average_revenue \
             FROM reservations \
             WHERE visit_date >= $1 \
             GROUP BY 1 \
             ORDER BY 1 DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::MonthlyStats, self.acquire_timeout))?
        .into_iter()
        .map(MonthlyStatsRow::into_stats)
        .collect()
    }
}
