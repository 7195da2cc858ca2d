//! Booking engine.
//!
//! The engine validates requests against the catalog and the clock, then
//! hands every admission to the store together with the configured
//! [`AdmissionPolicy`](crate::AdmissionPolicy). It never checks capacity on
//! its own: the check belongs to the store's atomic write unit.

use chrono::NaiveDate;
use tracing::{error, info, instrument, warn};

use crate::catalog::{Ticket, TicketCatalog};
use crate::clock::{Clock, SystemClock};
use crate::config::BookingConfig;
use crate::errors::BookingError;
use crate::reservation::{CreateReservation, Reservation, ReservationChange, ReservationPatch};
use crate::stats::{window_start, MonthlyStats};
use crate::store::{Operation, ReservationStore, StoreError};
use crate::types::{BuyerEmail, CapacityKey, Money, ReservationId, TicketId};

/// Orchestrates reservation creation, mutation and cancellation.
#[derive(Debug, Clone)]
pub struct BookingEngine<S, C, K = SystemClock> {
    store: S,
    catalog: C,
    clock: K,
    config: BookingConfig,
}

impl<S, C> BookingEngine<S, C, SystemClock> {
    /// Creates an engine with the default configuration and the system clock.
    pub fn new(store: S, catalog: C) -> Self {
        Self {
            store,
            catalog,
            clock: SystemClock,
            config: BookingConfig::default(),
        }
    }
}

impl<S, C, K> BookingEngine<S, C, K> {
    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: BookingConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the clock.
    pub fn with_clock<K2>(self, clock: K2) -> BookingEngine<S, C, K2> {
        BookingEngine {
            store: self.store,
            catalog: self.catalog,
            clock,
            config: self.config,
        }
    }

    /// The backing store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The ticket catalog.
    pub const fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Active configuration.
    pub const fn config(&self) -> &BookingConfig {
        &self.config
    }
}

impl<S, C, K> BookingEngine<S, C, K>
where
    S: ReservationStore + Sync,
    C: TicketCatalog + Sync,
    K: Clock,
{
    /// Creates a reservation and returns its identity.
    ///
    /// Identity collisions are retried with a fresh identity up to
    /// `max_identity_attempts` times. A capacity rejection is final.
    #[instrument(
        name = "booking.create",
        skip(self, request),
        fields(
            ticket_id = %request.ticket_id,
            date = %request.date,
            quantity = %request.quantity
        )
    )]
    pub async fn create_reservation(
        &self,
        request: CreateReservation,
    ) -> Result<ReservationId, BookingError> {
        let ticket = self.resolve(request.ticket_id).await?;
        self.ensure_not_past(request.date)?;

        let policy = self.config.admission_policy();
        let attempts = self.config.max_identity_attempts.into_inner();

        for attempt in 1..=attempts {
            let reservation = Reservation::new(
                self.store.generate_reservation_id(),
                &request,
                ticket.unit_price,
            );

            match self.store.insert_reservation(reservation, policy).await {
                Ok(stored) => {
                    info!(
                        reservation_id = %stored.reservation_id,
                        total_price = %stored.total_price,
                        "[booking.created] reservation committed"
                    );
                    return Ok(stored.reservation_id);
                }
                Err(StoreError::IdentityCollision { reservation_id }) => {
                    warn!(
                        attempt,
                        reservation_id = %reservation_id,
                        "[booking.identity_collision] generated identity already taken, retrying"
                    );
                }
                Err(store_error) => return Err(report(store_error)),
            }
        }

        error!(
            attempts,
            "[booking.identity_exhausted] no free identity after all attempts"
        );
        Err(BookingError::PersistenceFailure {
            operation: Operation::InsertReservation,
            reason: format!("identity collision persisted after {attempts} attempts"),
        })
    }

    /// Applies a partial update and returns the stored result.
    ///
    /// A date or quantity change is re-admitted against capacity with this
    /// reservation's own contribution excluded. A quantity change reprices
    /// the reservation at the ticket's current catalog price.
    #[instrument(name = "booking.update", skip(self, patch), fields(reservation_id = %reservation_id))]
    pub async fn update_reservation(
        &self,
        reservation_id: ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, BookingError> {
        if patch.is_empty() {
            return Err(BookingError::InvalidInput("no fields to update".to_string()));
        }

        let current = self
            .store
            .find_reservation(reservation_id)
            .await
            .map_err(report)?
            .ok_or(BookingError::ReservationNotFound { reservation_id })?;

        if let Some(date) = patch.date.filter(|date| *date != current.date) {
            self.ensure_not_past(date)?;
        }

        let mut change = ReservationChange::from(patch);
        if change
            .quantity
            .is_some_and(|quantity| quantity != current.quantity)
        {
            change.unit_price = self.current_price(&current).await?;
        }

        let updated = self
            .store
            .update_reservation(reservation_id, change, self.config.admission_policy())
            .await
            .map_err(report)?;

        info!(
            quantity = %updated.quantity,
            date = %updated.date,
            total_price = %updated.total_price,
            "[booking.updated] reservation updated"
        );
        Ok(updated)
    }

    /// Deletes a reservation, freeing its capacity. Returns `false` when it
    /// did not exist.
    #[instrument(name = "booking.cancel", skip(self), fields(reservation_id = %reservation_id))]
    pub async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<bool, BookingError> {
        let deleted = self
            .store
            .delete_reservation(reservation_id)
            .await
            .map_err(report)?;

        if deleted {
            info!("[booking.cancelled] reservation deleted");
        } else {
            info!("[booking.cancel_noop] reservation not found or already cancelled");
        }
        Ok(deleted)
    }

    /// Loads one reservation.
    #[instrument(name = "booking.get", skip(self), fields(reservation_id = %reservation_id))]
    pub async fn get_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Reservation, BookingError> {
        self.store
            .find_reservation(reservation_id)
            .await
            .map_err(report)?
            .ok_or(BookingError::ReservationNotFound { reservation_id })
    }

    /// Reservations made with `email`, ignoring case.
    #[instrument(name = "booking.list_by_email", skip(self, email))]
    pub async fn list_by_buyer_email(
        &self,
        email: &BuyerEmail,
    ) -> Result<Vec<Reservation>, BookingError> {
        self.store.reservations_by_email(email).await.map_err(report)
    }

    /// Every reservation, most recent visit date first.
    #[instrument(name = "booking.list_all", skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Reservation>, BookingError> {
        self.store.all_reservations().await.map_err(report)
    }

    /// Monthly rollups over the last twelve months.
    #[instrument(name = "booking.monthly_stats", skip(self))]
    pub async fn monthly_stats(&self) -> Result<Vec<MonthlyStats>, BookingError> {
        let since = window_start(self.clock.today());
        self.store.monthly_stats(since).await.map_err(report)
    }

    /// Quantity still available for a visit day and ticket.
    ///
    /// Advisory only: a later create may still be rejected. Past days have
    /// no remaining capacity.
    #[instrument(name = "booking.remaining_capacity", skip(self))]
    pub async fn remaining_capacity(
        &self,
        date: NaiveDate,
        ticket_id: TicketId,
    ) -> Result<u32, BookingError> {
        if date < self.clock.today() {
            return Ok(0);
        }
        let committed = self
            .store
            .committed_quantity(CapacityKey::new(date, ticket_id), None)
            .await
            .map_err(report)?;
        Ok(self.config.admission_policy().remaining(committed))
    }

    async fn resolve(&self, ticket_id: TicketId) -> Result<Ticket, BookingError> {
        self.catalog
            .resolve_ticket(ticket_id)
            .await?
            .ok_or(BookingError::TicketNotFound { ticket_id })
    }

    async fn current_price(
        &self,
        current: &Reservation,
    ) -> Result<Option<Money>, BookingError> {
        let ticket = self.catalog.resolve_ticket(current.ticket_id).await?;
        if ticket.is_none() {
            warn!(
                ticket_id = %current.ticket_id,
                "[booking.reprice_fallback] ticket left the catalog, keeping snapshot price"
            );
        }
        Ok(ticket.map(|ticket| ticket.unit_price))
    }

    fn ensure_not_past(&self, date: NaiveDate) -> Result<(), BookingError> {
        let today = self.clock.today();
        if date < today {
            warn!(%date, %today, "[booking.past_date] visit date is in the past");
            return Err(BookingError::PastDate { date, today });
        }
        Ok(())
    }
}

fn report(store_error: StoreError) -> BookingError {
    match &store_error {
        StoreError::CapacityExceeded(rejection) => {
            warn!(
                key = %rejection.key,
                committed = rejection.committed,
                requested = rejection.requested,
                capacity = rejection.capacity,
                "[booking.capacity_exceeded] admission rejected"
            );
        }
        StoreError::NotFound { .. } => {}
        StoreError::Timeout { operation, after } => {
            warn!(
                operation = %operation,
                after_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                "[booking.timeout] admission unit aborted"
            );
        }
        StoreError::IdentityCollision { .. }
        | StoreError::StoreFailure { .. }
        | StoreError::Corrupted { .. } => {
            error!(error = %store_error, "[booking.store_failure] store operation failed");
        }
    }
    store_error.into()
}
