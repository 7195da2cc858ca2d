//! Reservation records and the requests that create or change them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::BookingError;
use crate::types::{
    Buyer, BuyerEmail, BuyerName, CapacityKey, Money, PaymentMethod, Quantity, ReservationId,
    TicketId,
};

/// A committed reservation.
///
/// `total_price` always equals `quantity * unit_price`. The unit price is the
/// catalog price captured when the reservation was created or last repriced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Externally visible identity.
    pub reservation_id: ReservationId,
    /// Who booked.
    pub buyer: Buyer,
    /// Visit day.
    pub date: NaiveDate,
    /// Ticket type reserved.
    pub ticket_id: TicketId,
    /// Number of tickets.
    pub quantity: Quantity,
    /// Snapshot of the unit price.
    pub unit_price: Money,
    /// Price of the whole reservation.
    pub total_price: Money,
    /// Payment method chosen by the buyer.
    pub payment_method: PaymentMethod,
}

impl Reservation {
    /// Builds a reservation, deriving the total from quantity and unit price.
    pub fn new(
        reservation_id: ReservationId,
        request: &CreateReservation,
        unit_price: Money,
    ) -> Self {
        Self {
            reservation_id,
            buyer: request.buyer.clone(),
            date: request.date,
            ticket_id: request.ticket_id,
            quantity: request.quantity,
            unit_price,
            total_price: unit_price.times(request.quantity),
            payment_method: request.payment_method,
        }
    }

    /// Key this reservation's quantity is accounted under.
    pub const fn capacity_key(&self) -> CapacityKey {
        CapacityKey::new(self.date, self.ticket_id)
    }

    /// Returns a copy with `change` applied.
    ///
    /// The price is recomputed only when the quantity actually changes.
    #[must_use]
    pub fn apply(&self, change: &ReservationChange) -> Self {
        let mut next = self.clone();

        if let Some(name) = &change.buyer_name {
            next.buyer.name = name.clone();
        }
        if let Some(email) = &change.buyer_email {
            next.buyer.email = email.clone();
        }
        if let Some(date) = change.date {
            next.date = date;
        }
        if let Some(payment_method) = change.payment_method {
            next.payment_method = payment_method;
        }
        if let Some(quantity) = change.quantity {
            if quantity != self.quantity {
                next.quantity = quantity;
                next.unit_price = change.unit_price.unwrap_or(self.unit_price);
                next.total_price = next.unit_price.times(quantity);
            }
        }

        next
    }
}

/// Fields a store writes when updating a reservation.
///
/// Produced by the engine from a [`ReservationPatch`] once the new unit price
/// (if any) has been resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationChange {
    /// New buyer name.
    pub buyer_name: Option<BuyerName>,
    /// New buyer email.
    pub buyer_email: Option<BuyerEmail>,
    /// New visit day.
    pub date: Option<NaiveDate>,
    /// New quantity.
    pub quantity: Option<Quantity>,
    /// New payment method.
    pub payment_method: Option<PaymentMethod>,
    /// Unit price to charge if the quantity changes. The stored snapshot is
    /// kept when absent.
    pub unit_price: Option<Money>,
}

impl ReservationChange {
    /// Whether applying this change to `current` moves quantity between
    /// capacity keys or changes the amount held, and so needs an admission
    /// check.
    pub fn competes_for_capacity(&self, current: &Reservation) -> bool {
        self.date.is_some_and(|date| date != current.date)
            || self
                .quantity
                .is_some_and(|quantity| quantity != current.quantity)
    }
}

impl From<ReservationPatch> for ReservationChange {
    fn from(patch: ReservationPatch) -> Self {
        Self {
            buyer_name: patch.buyer_name,
            buyer_email: patch.buyer_email,
            date: patch.date,
            quantity: patch.quantity,
            payment_method: patch.payment_method,
            unit_price: None,
        }
    }
}

/// Validated request to create a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReservation {
    /// Who is booking.
    pub buyer: Buyer,
    /// Ticket type.
    pub ticket_id: TicketId,
    /// Visit day.
    pub date: NaiveDate,
    /// Number of tickets.
    pub quantity: Quantity,
    /// Payment method.
    pub payment_method: PaymentMethod,
}

impl CreateReservation {
    /// Key the request competes for.
    pub const fn capacity_key(&self) -> CapacityKey {
        CapacityKey::new(self.date, self.ticket_id)
    }
}

/// Partial update of a reservation. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationPatch {
    /// Replacement buyer name.
    pub buyer_name: Option<BuyerName>,
    /// Replacement buyer email.
    pub buyer_email: Option<BuyerEmail>,
    /// Replacement visit day.
    pub date: Option<NaiveDate>,
    /// Replacement quantity.
    pub quantity: Option<Quantity>,
    /// Replacement payment method.
    pub payment_method: Option<PaymentMethod>,
}

impl ReservationPatch {
    /// True when no field is set.
    pub const fn is_empty(&self) -> bool {
        self.buyer_name.is_none()
            && self.buyer_email.is_none()
            && self.date.is_none()
            && self.quantity.is_none()
            && self.payment_method.is_none()
    }

    /// Sets the buyer name.
    #[must_use]
    pub fn with_buyer_name(mut self, name: BuyerName) -> Self {
        self.buyer_name = Some(name);
        self
    }

    /// Sets the buyer email.
    #[must_use]
    pub fn with_buyer_email(mut self, email: BuyerEmail) -> Self {
        self.buyer_email = Some(email);
        self
    }

    /// Sets the visit day.
    #[must_use]
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the quantity.
    #[must_use]
    pub fn with_quantity(mut self, quantity: Quantity) -> Self {
        self.quantity = Some(quantity);
        self
    }

    /// Sets the payment method.
    #[must_use]
    pub fn with_payment_method(mut self, payment_method: PaymentMethod) -> Self {
        self.payment_method = Some(payment_method);
        self
    }
}

/// Raw create request as received from the routing layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationForm {
    /// Buyer name.
    pub name: String,
    /// Buyer email.
    pub email: String,
    /// Ticket identifier.
    pub ticket_id: i64,
    /// Number of tickets.
    pub quantity: i64,
    /// Visit day as `YYYY-MM-DD`.
    pub date: String,
    /// Payment method wire name.
    pub payment: String,
}

impl TryFrom<ReservationForm> for CreateReservation {
    type Error = BookingError;

    fn try_from(form: ReservationForm) -> Result<Self, Self::Error> {
        let buyer = Buyer::new(parse_name(&form.name)?, parse_email(&form.email)?);
        Ok(Self {
            buyer,
            ticket_id: parse_ticket_id(form.ticket_id)?,
            date: parse_date(&form.date)?,
            quantity: parse_quantity(form.quantity)?,
            payment_method: parse_payment(&form.payment)?,
        })
    }
}

/// Raw partial update as received from the routing layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationPatchForm {
    /// Buyer name.
    pub name: Option<String>,
    /// Buyer email.
    pub email: Option<String>,
    /// Visit day as `YYYY-MM-DD`.
    pub date: Option<String>,
    /// Number of tickets.
    pub quantity: Option<i64>,
    /// Payment method wire name.
    pub payment: Option<String>,
}

impl TryFrom<ReservationPatchForm> for ReservationPatch {
    type Error = BookingError;

    fn try_from(form: ReservationPatchForm) -> Result<Self, Self::Error> {
        Ok(Self {
            buyer_name: form.name.as_deref().map(parse_name).transpose()?,
            buyer_email: form.email.as_deref().map(parse_email).transpose()?,
            date: form.date.as_deref().map(parse_date).transpose()?,
            quantity: form.quantity.map(parse_quantity).transpose()?,
            payment_method: form.payment.as_deref().map(parse_payment).transpose()?,
        })
    }
}

/// Parses a raw quantity, rejecting values outside `1..=10`.
pub fn parse_quantity(raw: i64) -> Result<Quantity, BookingError> {
    u32::try_from(raw)
        .ok()
        .and_then(|count| Quantity::try_new(count).ok())
        .ok_or(BookingError::InvalidQuantity { requested: raw })
}

fn parse_name(raw: &str) -> Result<BuyerName, BookingError> {
    BuyerName::try_new(raw)
        .map_err(|_| BookingError::InvalidInput("name must be 2 to 100 characters".to_string()))
}

fn parse_email(raw: &str) -> Result<BuyerEmail, BookingError> {
    BuyerEmail::try_new(raw)
        .map_err(|_| BookingError::InvalidInput(format!("invalid email address `{}`", raw.trim())))
}

fn parse_ticket_id(raw: i64) -> Result<TicketId, BookingError> {
    i32::try_from(raw)
        .ok()
        .and_then(|id| TicketId::try_new(id).ok())
        .ok_or_else(|| BookingError::InvalidInput(format!("invalid ticket id {raw}")))
}

fn parse_date(raw: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| BookingError::InvalidInput(format!("invalid date `{}`", raw.trim())))
}

fn parse_payment(raw: &str) -> Result<PaymentMethod, BookingError> {
    raw.parse::<PaymentMethod>()
        .map_err(|error| BookingError::InvalidInput(error.to_string()))
}
