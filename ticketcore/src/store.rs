//! Reservation storage contract and the in-memory backend.
//!
//! A store owns reservation rows and is responsible for making every
//! admission decision atomic with the write it guards. Both the insert and
//! the update paths receive the [`AdmissionPolicy`] to enforce, so the
//! aggregate read and the row write happen inside one unit that is serialized
//! per [`CapacityKey`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use thiserror::Error;

use crate::ledger::{AdmissionPolicy, CapacityExceeded};
use crate::reservation::{Reservation, ReservationChange};
use crate::stats::{rollup, MonthlyStats};
use crate::types::{BuyerEmail, CapacityKey, ReservationId};

/// Identifies the storage step that failed.
///
/// Used by [`StoreError::StoreFailure`] and [`StoreError::Timeout`] to name
/// which operation encountered an infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Writing a new reservation.
    InsertReservation,
    /// Changing an existing reservation.
    UpdateReservation,
    /// Removing a reservation.
    DeleteReservation,
    /// Loading one reservation.
    FindReservation,
    /// Listing reservations.
    ListReservations,
    /// Summing the committed quantity of a key.
    CommittedQuantity,
    /// Computing monthly rollups.
    MonthlyStats,
    /// Looking a ticket up in the catalog.
    ResolveTicket,
    /// Beginning a database transaction.
    BeginTransaction,
    /// Waiting for the lock serializing a capacity key.
    AcquireKeyLock,
    /// Committing a database transaction.
    CommitTransaction,
    /// Applying schema migrations.
    Migrate,
    /// Checking connectivity.
    Ping,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InsertReservation => "insert_reservation",
            Self::UpdateReservation => "update_reservation",
            Self::DeleteReservation => "delete_reservation",
            Self::FindReservation => "find_reservation",
            Self::ListReservations => "list_reservations",
            Self::CommittedQuantity => "committed_quantity",
            Self::MonthlyStats => "monthly_stats",
            Self::ResolveTicket => "resolve_ticket",
            Self::BeginTransaction => "begin_transaction",
            Self::AcquireKeyLock => "acquire_key_lock",
            Self::CommitTransaction => "commit_transaction",
            Self::Migrate => "migrate",
            Self::Ping => "ping",
        };
        f.write_str(name)
    }
}

/// Error type returned by reservation store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The admission check inside the write unit rejected the quantity.
    /// Nothing was written.
    #[error(transparent)]
    CapacityExceeded(#[from] CapacityExceeded),

    /// A reservation with the generated identity already exists. Nothing was
    /// written; the caller should retry with a fresh identity.
    #[error("reservation id {reservation_id} already exists")]
    IdentityCollision {
        /// The colliding identity.
        reservation_id: ReservationId,
    },

    /// The reservation to update does not exist.
    #[error("reservation {reservation_id} not found")]
    NotFound {
        /// Identifier that was looked up.
        reservation_id: ReservationId,
    },

    /// The unit did not complete within the policy timeout and was rolled
    /// back.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Step that was running when the bound expired.
        operation: Operation,
        /// The bound.
        after: Duration,
    },

    /// Infrastructure failure surfaced by the backing store (e.g., connection
    /// drops).
    #[error("{operation} operation failed")]
    StoreFailure {
        /// Step that failed.
        operation: Operation,
    },

    /// A stored row could not be decoded into a valid reservation.
    #[error("{operation} read an invalid row: {detail}")]
    Corrupted {
        /// Step that read the row.
        operation: Operation,
        /// What was wrong with it.
        detail: String,
    },
}

/// Trait defining the contract for reservation store implementations.
///
/// Implementations include:
/// - [`InMemoryReservationStore`]: lock-based backend for tests and
///   single-process use
/// - `ticketcore-postgres`: PostgreSQL backend using transactions and
///   advisory locks
///
/// # Admission atomicity
///
/// [`insert_reservation`](Self::insert_reservation) and
/// [`update_reservation`](Self::update_reservation) must read the committed
/// quantity of the target key and write the row in one unit, serialized
/// against every other admission on the same key, and must not block
/// admissions on other keys. A unit that exceeds `policy.timeout` fails with
/// [`StoreError::Timeout`] and leaves no trace.
pub trait ReservationStore {
    /// Produce a fresh reservation identity.
    fn generate_reservation_id(&self) -> ReservationId {
        ReservationId::generate()
    }

    /// Admit and persist a new reservation.
    ///
    /// Fails with [`StoreError::CapacityExceeded`] when the committed quantity
    /// of the reservation's key plus its quantity exceeds the policy capacity,
    /// and with [`StoreError::IdentityCollision`] when its identity is taken.
    fn insert_reservation(
        &self,
        reservation: Reservation,
        policy: AdmissionPolicy,
    ) -> impl Future<Output = Result<Reservation, StoreError>> + Send;

    /// Apply `change` to a stored reservation and return the new row.
    ///
    /// When the change moves the reservation to another date or changes its
    /// quantity, the new quantity is admitted against the target key with the
    /// reservation's own prior contribution excluded.
    fn update_reservation(
        &self,
        reservation_id: ReservationId,
        change: ReservationChange,
        policy: AdmissionPolicy,
    ) -> impl Future<Output = Result<Reservation, StoreError>> + Send;

    /// Delete a reservation. Returns `false` if it did not exist.
    fn delete_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Load one reservation.
    fn find_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>, StoreError>> + Send;

    /// Reservations whose buyer email matches ignoring case, ordered like
    /// [`all_reservations`](Self::all_reservations).
    fn reservations_by_email(
        &self,
        email: &BuyerEmail,
    ) -> impl Future<Output = Result<Vec<Reservation>, StoreError>> + Send;

    /// Every reservation, ordered by date descending then identity
    /// descending.
    fn all_reservations(&self) -> impl Future<Output = Result<Vec<Reservation>, StoreError>> + Send;

    /// Sum of the quantities stored under `key`, optionally leaving one
    /// reservation out. Advisory outside an admission unit.
    fn committed_quantity(
        &self,
        key: CapacityKey,
        excluding: Option<ReservationId>,
    ) -> impl Future<Output = Result<u32, StoreError>> + Send;

    /// Monthly rollups of reservations visiting on or after `since`, most
    /// recent month first.
    fn monthly_stats(
        &self,
        since: NaiveDate,
    ) -> impl Future<Output = Result<Vec<MonthlyStats>, StoreError>> + Send;
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Exclusive hold on one capacity key.
///
/// Releasing the last hold on a key removes the key's lock from the table,
/// so the table only tracks keys with an admission in flight or waiting.
struct KeyLease {
    shared: Arc<Shared>,
    key: CapacityKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.shared.key_locks.lock();
        // Waiters hold their own clone, so only an idle lock has a count of one.
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            let _ = locks.remove(&self.key);
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    rows: Mutex<HashMap<ReservationId, Reservation>>,
    key_locks: Mutex<HashMap<CapacityKey, KeyLock>>,
}

/// Thread-safe in-memory reservation store.
///
/// Rows live behind a synchronous mutex that is never held across an await.
/// Admissions take an async lock scoped to their [`CapacityKey`], so waiting
/// admissions for one key never delay another key. A key's lock is dropped
/// from the lock table once no admission holds or awaits it, so the table
/// grows with concurrent keys, not with every key ever booked. A wait that
/// is abandoned on timeout leaves its entry until the key is next admitted.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReservationStore {
    shared: Arc<Shared>,
}

impl InMemoryReservationStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored reservations.
    pub fn len(&self) -> usize {
        self.shared.rows.lock().len()
    }

    /// True when the store holds no reservations.
    pub fn is_empty(&self) -> bool {
        self.shared.rows.lock().is_empty()
    }

    async fn lock_key(&self, key: CapacityKey) -> KeyLease {
        let lock: KeyLock = Arc::clone(self.shared.key_locks.lock().entry(key).or_default());
        let guard = lock.lock_owned().await;
        KeyLease {
            shared: Arc::clone(&self.shared),
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.shared.key_locks.lock().len()
    }

    async fn admit_insert(
        &self,
        reservation: Reservation,
        policy: AdmissionPolicy,
    ) -> Result<Reservation, StoreError> {
        let key = reservation.capacity_key();
        let _key_guard = self.lock_key(key).await;

        let mut rows = self.shared.rows.lock();
        if rows.contains_key(&reservation.reservation_id) {
            return Err(StoreError::IdentityCollision {
                reservation_id: reservation.reservation_id,
            });
        }

        let committed = sum_quantities(&rows, key, None);
        policy.admit(key, committed, reservation.quantity)?;

        let _ = rows.insert(reservation.reservation_id, reservation.clone());
        Ok(reservation)
    }

    async fn admit_update(
        &self,
        reservation_id: ReservationId,
        change: &ReservationChange,
        policy: AdmissionPolicy,
    ) -> Result<Reservation, StoreError> {
        loop {
            let target_key = {
                let mut rows = self.shared.rows.lock();
                let current = rows
                    .get(&reservation_id)
                    .ok_or(StoreError::NotFound { reservation_id })?;
                let next = current.apply(change);

                if !change.competes_for_capacity(current) {
                    let _ = rows.insert(reservation_id, next.clone());
                    return Ok(next);
                }
                next.capacity_key()
            };

            let _key_guard = self.lock_key(target_key).await;

            let mut rows = self.shared.rows.lock();
            let current = rows
                .get(&reservation_id)
                .ok_or(StoreError::NotFound { reservation_id })?;
            let next = current.apply(change);

            // The row moved to another key while we waited.
            if next.capacity_key() != target_key {
                continue;
            }

            if change.competes_for_capacity(current) {
                let committed = sum_quantities(&rows, target_key, Some(reservation_id));
                policy.admit(target_key, committed, next.quantity)?;
            }

            let _ = rows.insert(reservation_id, next.clone());
            return Ok(next);
        }
    }

    fn sorted(mut reservations: Vec<Reservation>) -> Vec<Reservation> {
        reservations.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.reservation_id.cmp(&a.reservation_id))
        });
        reservations
    }
}

fn sum_quantities(
    rows: &HashMap<ReservationId, Reservation>,
    key: CapacityKey,
    excluding: Option<ReservationId>,
) -> u32 {
    rows.values()
        .filter(|row| row.capacity_key() == key && Some(row.reservation_id) != excluding)
        .fold(0u32, |total, row| total.saturating_add(row.quantity.count()))
}

async fn bounded<T, F>(operation: Operation, after: Duration, unit: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(after, unit)
        .await
        .map_err(|_| StoreError::Timeout { operation, after })?
}

impl ReservationStore for InMemoryReservationStore {
    async fn insert_reservation(
        &self,
        reservation: Reservation,
        policy: AdmissionPolicy,
    ) -> Result<Reservation, StoreError> {
        bounded(
            Operation::InsertReservation,
            policy.timeout,
            self.admit_insert(reservation, policy),
        )
        .await
    }

    async fn update_reservation(
        &self,
        reservation_id: ReservationId,
        change: ReservationChange,
        policy: AdmissionPolicy,
    ) -> Result<Reservation, StoreError> {
        bounded(
            Operation::UpdateReservation,
            policy.timeout,
            self.admit_update(reservation_id, &change, policy),
        )
        .await
    }

    async fn delete_reservation(&self, reservation_id: ReservationId) -> Result<bool, StoreError> {
        Ok(self.shared.rows.lock().remove(&reservation_id).is_some())
    }

    async fn find_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.shared.rows.lock().get(&reservation_id).cloned())
    }

    async fn reservations_by_email(
        &self,
        email: &BuyerEmail,
    ) -> Result<Vec<Reservation>, StoreError> {
        let matching = self
            .shared
            .rows
            .lock()
            .values()
            .filter(|row| row.buyer.email.matches(email))
            .cloned()
            .collect();
        Ok(Self::sorted(matching))
    }

    async fn all_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let all = self.shared.rows.lock().values().cloned().collect();
        Ok(Self::sorted(all))
    }

    async fn committed_quantity(
        &self,
        key: CapacityKey,
        excluding: Option<ReservationId>,
    ) -> Result<u32, StoreError> {
        Ok(sum_quantities(&self.shared.rows.lock(), key, excluding))
    }

    async fn monthly_stats(&self, since: NaiveDate) -> Result<Vec<MonthlyStats>, StoreError> {
        Ok(rollup(self.shared.rows.lock().values(), since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::CreateReservation;
    use crate::types::{
        Buyer, BuyerName, Capacity, Money, PaymentMethod, Quantity, TicketId,
    };

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn policy(capacity: u32) -> AdmissionPolicy {
        AdmissionPolicy::new(
            Capacity::try_new(capacity).unwrap(),
            Duration::from_secs(1),
        )
    }

    fn reservation(date: NaiveDate, quantity: u32) -> Reservation {
        let request = CreateReservation {
            buyer: Buyer::new(
                BuyerName::try_new("Ana Souza").unwrap(),
                BuyerEmail::try_new("Ana@Jurashow.fr").unwrap(),
            ),
            ticket_id: TicketId::try_new(1).unwrap(),
            date,
            quantity: Quantity::try_new(quantity).unwrap(),
            payment_method: PaymentMethod::CreditCard,
        };
        Reservation::new(ReservationId::generate(), &request, Money::from_cents(1_000))
    }

    fn quantity(n: u32) -> Option<Quantity> {
        Some(Quantity::try_new(n).unwrap())
    }

    #[tokio::test]
    async fn insert_rejects_quantity_beyond_capacity_without_writing() {
        // Given: a key holding 2 of 3 seats
        let store = InMemoryReservationStore::new();
        let first = reservation(day(1), 2);
        store.insert_reservation(first.clone(), policy(3)).await.unwrap();

        // When: a reservation for 2 more is admitted
        let result = store.insert_reservation(reservation(day(1), 2), policy(3)).await;

        // Then: it is rejected and the key still holds 2
        assert!(matches!(result, Err(StoreError::CapacityExceeded(_))));
        assert_eq!(store.len(), 1);
        let committed = store
            .committed_quantity(first.capacity_key(), None)
            .await
            .unwrap();
        assert_eq!(committed, 2);
    }

    #[tokio::test]
    async fn insert_with_taken_identity_is_a_collision() {
        let store = InMemoryReservationStore::new();
        let original = reservation(day(1), 1);
        store.insert_reservation(original.clone(), policy(10)).await.unwrap();

        let mut duplicate = reservation(day(2), 4);
        duplicate.reservation_id = original.reservation_id;
        let result = store.insert_reservation(duplicate, policy(10)).await;

        assert_eq!(
            result,
            Err(StoreError::IdentityCollision {
                reservation_id: original.reservation_id
            })
        );
        let stored = store.find_reservation(original.reservation_id).await.unwrap();
        assert_eq!(stored, Some(original));
    }

    #[tokio::test]
    async fn update_excludes_the_reservations_own_quantity() {
        // Given: the only reservation on a key of capacity 5 holds 3
        let store = InMemoryReservationStore::new();
        let held = reservation(day(1), 3);
        store.insert_reservation(held.clone(), policy(5)).await.unwrap();

        // When: it grows to 5
        let change = ReservationChange {
            quantity: quantity(5),
            ..ReservationChange::default()
        };
        let updated = store
            .update_reservation(held.reservation_id, change, policy(5))
            .await
            .unwrap();

        // Then: 0 + 5 <= 5 is admitted and the price follows
        assert_eq!(updated.quantity.count(), 5);
        assert_eq!(updated.total_price, Money::from_cents(5_000));
    }

    #[tokio::test]
    async fn update_moving_to_a_full_day_is_rejected() {
        let store = InMemoryReservationStore::new();
        store
            .insert_reservation(reservation(day(2), 4), policy(5))
            .await
            .unwrap();
        let mover = reservation(day(1), 2);
        store.insert_reservation(mover.clone(), policy(5)).await.unwrap();

        let change = ReservationChange {
            date: Some(day(2)),
            ..ReservationChange::default()
        };
        let result = store
            .update_reservation(mover.reservation_id, change, policy(5))
            .await;

        assert!(matches!(result, Err(StoreError::CapacityExceeded(_))));
        let stored = store.find_reservation(mover.reservation_id).await.unwrap();
        assert_eq!(stored.map(|r| r.date), Some(day(1)));
    }

    #[tokio::test]
    async fn update_of_missing_reservation_is_not_found() {
        let store = InMemoryReservationStore::new();
        let reservation_id = ReservationId::generate();

        let result = store
            .update_reservation(reservation_id, ReservationChange::default(), policy(5))
            .await;

        assert_eq!(result, Err(StoreError::NotFound { reservation_id }));
    }

    #[tokio::test]
    async fn delete_frees_capacity_immediately() {
        let store = InMemoryReservationStore::new();
        let full = reservation(day(1), 2);
        store.insert_reservation(full.clone(), policy(2)).await.unwrap();

        assert!(store.delete_reservation(full.reservation_id).await.unwrap());
        assert!(!store.delete_reservation(full.reservation_id).await.unwrap());

        let again = store.insert_reservation(reservation(day(1), 2), policy(2)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn admission_waiting_on_a_held_key_times_out() {
        let store = InMemoryReservationStore::new();
        let pending = reservation(day(1), 1);
        let _held = store.lock_key(pending.capacity_key()).await;

        let short = AdmissionPolicy::new(Capacity::default(), Duration::from_millis(50));
        let result = store.insert_reservation(pending, short).await;

        assert_eq!(
            result,
            Err(StoreError::Timeout {
                operation: Operation::InsertReservation,
                after: Duration::from_millis(50),
            })
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn a_held_key_does_not_block_other_keys() {
        let store = InMemoryReservationStore::new();
        let blocked = reservation(day(1), 1);
        let _held = store.lock_key(blocked.capacity_key()).await;

        let short = AdmissionPolicy::new(Capacity::default(), Duration::from_millis(50));
        let other_day = store.insert_reservation(reservation(day(2), 1), short).await;

        assert!(other_day.is_ok());
    }

    #[tokio::test]
    async fn key_locks_are_released_once_no_admission_needs_them() {
        // Given: admissions on many distinct keys, one of them rejected
        let store = InMemoryReservationStore::new();
        for offset in 1..=20 {
            store
                .insert_reservation(reservation(day(offset), 1), policy(10))
                .await
                .unwrap();
        }
        let rejected = store.insert_reservation(reservation(day(1), 10), policy(10)).await;
        assert!(matches!(rejected, Err(StoreError::CapacityExceeded(_))));

        // When: a key is held while a second admission waits on it
        let held_key = reservation(day(30), 1);
        let held = store.lock_key(held_key.capacity_key()).await;
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.insert_reservation(held_key, policy(10)).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(store.tracked_keys(), 1);

        // Then: the lock survives the first release and is gone after the last
        drop(held);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(store.tracked_keys(), 0);
        assert_eq!(store.len(), 21);
    }

    #[tokio::test]
    async fn listing_orders_by_date_then_identity_descending() {
        let store = InMemoryReservationStore::new();
        let early = reservation(day(1), 1);
        let late_a = reservation(day(3), 1);
        let late_b = reservation(day(3), 1);
        for r in [&early, &late_a, &late_b] {
            store.insert_reservation(r.clone(), policy(10)).await.unwrap();
        }

        let ids: Vec<ReservationId> = store
            .all_reservations()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.reservation_id)
            .collect();

        let (newer, older) = if late_a.reservation_id > late_b.reservation_id {
            (late_a.reservation_id, late_b.reservation_id)
        } else {
            (late_b.reservation_id, late_a.reservation_id)
        };
        assert_eq!(ids, vec![newer, older, early.reservation_id]);
    }
}
