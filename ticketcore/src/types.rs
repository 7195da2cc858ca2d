//! Core types for the `TicketCore` reservation engine.
//!
//! This module defines the fundamental values used throughout the library.
//! All types use smart constructors to ensure validity at construction time,
//! following the "parse, don't validate" principle.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use nutype::nutype;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::validation::looks_like_email;

/// Externally visible identity of a reservation.
///
/// Freshly generated identities are UUIDv7 values, so they sort by creation
/// time. Identities parsed from callers are accepted in any UUID version.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    Serialize,
    Deserialize
))]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Generates a new time-ordered identity.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// Parses an identity from its hyphenated or simple string form.
    pub fn parse(input: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(input.trim()).map(Self::new)
    }
}

/// Identifier of a ticket type in the catalog.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct TicketId(i32);

/// Number of tickets in a single reservation.
///
/// A reservation always holds between 1 and 10 tickets.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct Quantity(u32);

impl Quantity {
    /// Largest quantity a single reservation may hold.
    pub const MAX: u32 = 10;

    /// Returns the quantity as a plain count.
    pub fn count(self) -> u32 {
        self.into_inner()
    }
}

/// Maximum total quantity admissible for one (date, ticket) pair.
#[nutype(
    validate(greater_or_equal = 1),
    default = 100,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct Capacity(u32);

/// Name of the person buying the tickets.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 2, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct BuyerName(String);

/// Contact email of the buyer.
///
/// The original casing is preserved for display; lookups compare the
/// [`BuyerEmail::normalized`] form.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 254, predicate = looks_like_email),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct BuyerEmail(String);

impl BuyerEmail {
    /// Lowercased form used for case-insensitive matching.
    pub fn normalized(&self) -> String {
        self.as_ref().to_lowercase()
    }

    /// Returns true when both addresses match ignoring case.
    pub fn matches(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

/// Catalog tag of the attraction a ticket belongs to (e.g. `tyrannosaurus`).
#[nutype(
    sanitize(trim, lowercase),
    validate(not_empty, len_char_max = 50),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct DinosaurTag(String);

/// Buyer identity attached to a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    /// Buyer's display name.
    pub name: BuyerName,
    /// Buyer's contact email.
    pub email: BuyerEmail,
}

impl Buyer {
    /// Creates a buyer from already validated parts.
    pub const fn new(name: BuyerName, email: BuyerEmail) -> Self {
        Self { name, email }
    }
}

/// How the buyer intends to pay at the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Credit card.
    #[serde(rename = "carte_credit")]
    CreditCard,
    /// `PayPal`.
    #[serde(rename = "paypal")]
    Paypal,
    /// Bank transfer.
    #[serde(rename = "virement")]
    BankTransfer,
    /// Cash.
    #[serde(rename = "especes")]
    Cash,
}

impl PaymentMethod {
    /// All accepted payment methods.
    pub const ALL: [Self; 4] = [Self::CreditCard, Self::Paypal, Self::BankTransfer, Self::Cash];

    /// Wire name of the payment method.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreditCard => "carte_credit",
            Self::Paypal => "paypal",
            Self::BankTransfer => "virement",
            Self::Cash => "especes",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a payment method name is not one of the accepted values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown payment method `{0}`")]
pub struct UnknownPaymentMethod(pub String);

impl FromStr for PaymentMethod {
    type Err = UnknownPaymentMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownPaymentMethod(trimmed.to_string()))
    }
}

/// Errors raised when constructing a [`Money`] amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// Amounts are never negative.
    #[error("money amount cannot be negative: {0}")]
    Negative(Decimal),

    /// Amounts carry at most two fraction digits.
    #[error("money amount cannot have more than 2 decimal places: {0}")]
    TooPrecise(Decimal),
}

/// Non-negative monetary amount with cent precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Creates an amount from a whole number of cents.
    pub fn from_cents(cents: u64) -> Self {
        Self(Decimal::from(cents) / Decimal::ONE_HUNDRED).with_cent_scale()
    }

    /// Creates an amount from a decimal value, rejecting negative values and
    /// sub-cent precision.
    pub fn try_from_decimal(amount: Decimal) -> Result<Self, MoneyError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(MoneyError::Negative(amount));
        }
        if amount.normalize().scale() > 2 {
            return Err(MoneyError::TooPrecise(amount));
        }
        Ok(Self(amount).with_cent_scale())
    }

    /// Returns the underlying decimal amount.
    pub const fn amount(self) -> Decimal {
        self.0
    }

    /// Price of `quantity` units at this unit price.
    #[must_use]
    pub fn times(self, quantity: Quantity) -> Self {
        Self(self.0 * Decimal::from(quantity.count())).with_cent_scale()
    }

    /// Sum of two amounts.
    #[must_use]
    pub fn plus(self, other: Self) -> Self {
        Self(self.0 + other.0).with_cent_scale()
    }

    /// Mean of `total` over `count` items, rounded half away from zero to
    /// the cent. Returns zero when `count` is zero.
    pub fn average(total: Self, count: u64) -> Self {
        if count == 0 {
            return Self::ZERO;
        }
        let mean = (total.0 / Decimal::from(count))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Self(mean).with_cent_scale()
    }

    fn with_cent_scale(mut self) -> Self {
        self.0.rescale(2);
        self
    }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_from_decimal(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Key under which capacity is accounted: one visit day and one ticket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapacityKey {
    /// Calendar day of the visit.
    pub date: NaiveDate,
    /// Ticket type being reserved.
    pub ticket_id: TicketId,
}

impl CapacityKey {
    /// Creates a key for a visit day and ticket type.
    pub const fn new(date: NaiveDate, ticket_id: TicketId) -> Self {
        Self { date, ticket_id }
    }
}

impl fmt::Display for CapacityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/ticket-{}", self.date, self.ticket_id)
    }
}
