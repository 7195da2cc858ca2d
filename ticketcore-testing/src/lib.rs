//! Shared test support for TicketCore reservation stores.
//!
//! [`contract`] holds the behavioral scenarios every
//! [`ReservationStore`](ticketcore::ReservationStore) backend must pass.
//! Backends run them through [`reservation_store_contract_tests!`]:
//!
//! ```ignore
//! ticketcore_testing::contract::reservation_store_contract_tests! {
//!     suite = in_memory,
//!     make_store = ticketcore::InMemoryReservationStore::new,
//! }
//! ```

pub mod contract;
