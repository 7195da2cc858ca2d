//! Error types returned by booking operations.
//!
//! [`BookingError`] is the caller-facing taxonomy. Store and catalog failures
//! are converted into it at the engine boundary so backend details never leak
//! to the routing layer.

use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::ledger::CapacityExceeded;
use crate::store::{Operation, StoreError};
use crate::types::{ReservationId, TicketId};

/// Errors returned by [`BookingEngine`](crate::BookingEngine) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    /// Request shape was invalid (missing fields, malformed values).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Quantity outside the accepted range.
    #[error("quantity must be between 1 and 10, got {requested}")]
    InvalidQuantity {
        /// The rejected value as supplied by the caller.
        requested: i64,
    },

    /// The ticket identifier does not resolve in the catalog.
    #[error("ticket {ticket_id} not found")]
    TicketNotFound {
        /// Identifier that failed to resolve.
        ticket_id: TicketId,
    },

    /// The visit date lies before the current day.
    #[error("visit date {date} is before today ({today})")]
    PastDate {
        /// Requested visit date.
        date: NaiveDate,
        /// Current day according to the engine's clock.
        today: NaiveDate,
    },

    /// Admitting the requested quantity would exceed capacity.
    #[error(transparent)]
    CapacityExceeded(#[from] CapacityExceeded),

    /// No reservation with this identifier exists.
    #[error("reservation {reservation_id} not found")]
    ReservationNotFound {
        /// Identifier that was looked up.
        reservation_id: ReservationId,
    },

    /// The backing store failed. The caller may retry.
    #[error("{operation} failed: {reason}")]
    PersistenceFailure {
        /// Step that failed.
        operation: Operation,
        /// Human readable cause.
        reason: String,
    },

    /// An admission unit did not complete within its time bound and was
    /// rolled back. The caller may retry.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Step that timed out.
        operation: Operation,
        /// Bound that was exceeded.
        after: Duration,
    },
}

impl BookingError {
    /// Whether the caller may retry the same request unchanged.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceFailure { .. } | Self::Timeout { .. })
    }

    /// Short machine readable name of the error kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::TicketNotFound { .. } => "ticket_not_found",
            Self::PastDate { .. } => "past_date",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::ReservationNotFound { .. } => "reservation_not_found",
            Self::PersistenceFailure { .. } => "persistence_failure",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::CapacityExceeded(rejection) => Self::CapacityExceeded(rejection),
            StoreError::NotFound { reservation_id } => Self::ReservationNotFound { reservation_id },
            StoreError::Timeout { operation, after } => Self::Timeout { operation, after },
            StoreError::IdentityCollision { .. } => Self::PersistenceFailure {
                operation: Operation::InsertReservation,
                reason: error.to_string(),
            },
            StoreError::StoreFailure { operation } | StoreError::Corrupted { operation, .. } => {
                Self::PersistenceFailure {
                    operation,
                    reason: error.to_string(),
                }
            }
        }
    }
}

impl From<CatalogError> for BookingError {
    fn from(error: CatalogError) -> Self {
        Self::PersistenceFailure {
            operation: Operation::ResolveTicket,
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapacityKey;

    #[test]
    fn only_store_failures_are_retryable() {
        let timeout = BookingError::Timeout {
            operation: Operation::InsertReservation,
            after: Duration::from_millis(100),
        };
        let failure = BookingError::PersistenceFailure {
            operation: Operation::CommitTransaction,
            reason: "connection reset".to_string(),
        };
        let invalid = BookingError::InvalidInput("missing email".to_string());

        assert!(timeout.is_retryable());
        assert!(failure.is_retryable());
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn capacity_rejection_is_not_retryable() {
        let key = CapacityKey::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            TicketId::try_new(1).unwrap(),
        );
        let error = BookingError::from(StoreError::CapacityExceeded(CapacityExceeded {
            key,
            committed: 2,
            requested: 2,
            capacity: 2,
        }));

        assert_eq!(error.kind(), "capacity_exceeded");
        assert!(!error.is_retryable());
    }

    #[test]
    fn identity_collision_surfaces_as_persistence_failure() {
        let reservation_id = ReservationId::generate();
        let error = BookingError::from(StoreError::IdentityCollision { reservation_id });

        assert!(matches!(
            error,
            BookingError::PersistenceFailure {
                operation: Operation::InsertReservation,
                ..
            }
        ));
    }

    #[test]
    fn catalog_outage_surfaces_as_persistence_failure() {
        let error = BookingError::from(CatalogError::Unavailable {
            detail: "timeout".to_string(),
        });
        assert_eq!(error.kind(), "persistence_failure");
        assert!(error.to_string().contains("resolve_ticket"));
    }
}
