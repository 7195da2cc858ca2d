//! `TicketCore` - capacity-bounded reservation engine
//!
//! This library books time-boxed attraction tickets while guaranteeing that
//! the total quantity reserved for a (visit day, ticket type) pair never
//! exceeds its capacity, even under concurrent, uncoordinated callers.
//!
//! The [`BookingEngine`] validates requests and resolves prices through a
//! [`TicketCatalog`]. Every admission decision is delegated to a
//! [`ReservationStore`], which reads the committed quantity and writes the
//! row in one unit serialized per [`CapacityKey`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod reservation;
pub mod stats;
pub mod store;
pub mod types;
mod validation;

pub use catalog::{
    CatalogError, FallbackCatalog, StaticCatalog, Ticket, TicketCatalog, TicketClass, TicketSearch,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AdmissionTimeoutMs, BookingConfig, MaxIdentityAttempts};
pub use engine::BookingEngine;
pub use errors::BookingError;
pub use ledger::{AdmissionPolicy, CapacityExceeded};
pub use reservation::{
    parse_quantity, CreateReservation, Reservation, ReservationChange, ReservationForm,
    ReservationPatch, ReservationPatchForm,
};
pub use stats::MonthlyStats;
pub use store::{InMemoryReservationStore, Operation, ReservationStore, StoreError};
pub use types::{
    Buyer, BuyerEmail, BuyerName, Capacity, CapacityKey, DinosaurTag, Money, MoneyError,
    PaymentMethod, Quantity, ReservationId, TicketId, UnknownPaymentMethod,
};
