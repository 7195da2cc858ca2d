#![allow(dead_code)]

use chrono::NaiveDate;
use ticketcore::{
    BookingConfig, BookingEngine, Buyer, BuyerEmail, BuyerName, Capacity, CreateReservation,
    DinosaurTag, FixedClock, InMemoryReservationStore, Money, PaymentMethod, Quantity,
    StaticCatalog, Ticket, TicketClass, TicketId,
};

pub type TestEngine<S = InMemoryReservationStore> = BookingEngine<S, StaticCatalog, FixedClock>;

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("test dates are valid calendar days")
}

/// The day every engine in these tests believes is today.
pub fn today() -> NaiveDate {
    day(2025, 5, 1)
}

pub fn ticket_id(id: i32) -> TicketId {
    TicketId::try_new(id).expect("test ticket ids are positive")
}

pub fn quantity(n: u32) -> Quantity {
    Quantity::try_new(n).expect("test quantities are within 1..=10")
}

/// Single ticket 1 priced at `cents`.
pub fn catalog_priced(cents: u64) -> StaticCatalog {
    StaticCatalog::new(vec![Ticket {
        id: ticket_id(1),
        dinosaur: DinosaurTag::try_new("tyrannosaurus").expect("valid dinosaur tag"),
        class: TicketClass::Adult,
        unit_price: Money::from_cents(cents),
        description: "Test ticket".to_string(),
    }])
}

pub fn buyer(email: &str) -> Buyer {
    Buyer::new(
        BuyerName::try_new("Ana Souza").expect("valid buyer name"),
        BuyerEmail::try_new(email).expect("valid buyer email"),
    )
}

pub fn request(date: NaiveDate, n: u32) -> CreateReservation {
    CreateReservation {
        buyer: buyer("ana@jurashow.fr"),
        ticket_id: ticket_id(1),
        date,
        quantity: quantity(n),
        payment_method: PaymentMethod::CreditCard,
    }
}

pub fn config_with_capacity(capacity: u32) -> BookingConfig {
    BookingConfig::default()
        .with_capacity(Capacity::try_new(capacity).expect("test capacity is positive"))
}

pub fn engine_on<S>(store: S, catalog: StaticCatalog, capacity: u32) -> TestEngine<S> {
    BookingEngine::new(store, catalog)
        .with_config(config_with_capacity(capacity))
        .with_clock(FixedClock(today()))
}

pub fn engine(capacity: u32) -> TestEngine {
    engine_on(
        InMemoryReservationStore::new(),
        catalog_priced(1_000),
        capacity,
    )
}
