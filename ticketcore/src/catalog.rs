//! Ticket catalog lookup.
//!
//! The booking engine only needs to resolve a ticket identifier to its
//! current unit price. The catalog itself lives outside this crate; this
//! module defines the seam ([`TicketCatalog`]), the built-in ticket list, and
//! an explicit fallback strategy for when the primary catalog is unreachable.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::types::{DinosaurTag, Money, TicketId};

/// Audience a ticket is priced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketClass {
    /// Adult admission.
    Adult,
    /// Child admission.
    Child,
}

impl TicketClass {
    /// Storage name of the class.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adult => "adult",
            Self::Child => "child",
        }
    }

    /// Parses a storage name, accepting the legacy French labels.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "adult" | "adulte" => Some(Self::Adult),
            "child" | "enfant" => Some(Self::Child),
            _ => None,
        }
    }
}

impl fmt::Display for TicketClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ticket type offered for sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Catalog identifier.
    pub id: TicketId,
    /// Attraction the ticket admits to.
    pub dinosaur: DinosaurTag,
    /// Audience the price applies to.
    pub class: TicketClass,
    /// Current price of a single ticket.
    pub unit_price: Money,
    /// Marketing description.
    pub description: String,
}

impl Ticket {
    /// Human readable name, e.g. `Adult Ticket - Tyrannosaurus`.
    pub fn display_name(&self) -> String {
        let class = match self.class {
            TicketClass::Adult => "Adult",
            TicketClass::Child => "Child",
        };
        let mut chars = self.dinosaur.chars();
        let dinosaur = chars.next().map_or_else(String::new, |first| {
            first.to_uppercase().chain(chars).collect()
        });
        format!("{class} Ticket - {dinosaur}")
    }
}

/// Errors surfaced by catalog implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// The catalog backend could not be reached or queried.
    #[error("ticket catalog unavailable: {detail}")]
    Unavailable {
        /// Backend-specific description of the failure.
        detail: String,
    },

    /// A stored catalog row could not be turned into a [`Ticket`].
    #[error("ticket catalog row for ticket {ticket_id} is invalid: {detail}")]
    InvalidRow {
        /// Raw identifier of the offending row.
        ticket_id: i32,
        /// What was wrong with the row.
        detail: String,
    },
}

/// Read-only source of ticket prices and metadata.
pub trait TicketCatalog {
    /// Resolve a ticket identifier. `Ok(None)` means the ticket does not exist.
    fn resolve_ticket(
        &self,
        ticket_id: TicketId,
    ) -> impl Future<Output = Result<Option<Ticket>, CatalogError>> + Send;

    /// List every ticket on sale, ordered by dinosaur then class.
    fn list_tickets(&self) -> impl Future<Output = Result<Vec<Ticket>, CatalogError>> + Send;

    /// List the tickets for one attraction.
    fn tickets_for_dinosaur(
        &self,
        dinosaur: &DinosaurTag,
    ) -> impl Future<Output = Result<Vec<Ticket>, CatalogError>> + Send
    where
        Self: Sync,
    {
        async move {
            let tickets = self.list_tickets().await?;
            Ok(tickets
                .into_iter()
                .filter(|ticket| ticket.dinosaur == *dinosaur)
                .collect())
        }
    }

    /// List the tickets matching `search`. The attraction narrows through
    /// [`tickets_for_dinosaur`](Self::tickets_for_dinosaur), the class is
    /// filtered afterwards.
    fn search_tickets(
        &self,
        search: &TicketSearch,
    ) -> impl Future<Output = Result<Vec<Ticket>, CatalogError>> + Send
    where
        Self: Sync,
    {
        async move {
            let tickets = match &search.dinosaur {
                Some(dinosaur) => self.tickets_for_dinosaur(dinosaur).await?,
                None => self.list_tickets().await?,
            };
            Ok(match search.class {
                Some(class) => tickets
                    .into_iter()
                    .filter(|ticket| ticket.class == class)
                    .collect(),
                None => tickets,
            })
        }
    }
}

/// Optional filters for [`TicketCatalog::search_tickets`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSearch {
    /// Only tickets for this attraction.
    pub dinosaur: Option<DinosaurTag>,
    /// Only tickets priced for this audience.
    pub class: Option<TicketClass>,
}

impl TicketSearch {
    /// Restrict the search to one attraction.
    #[must_use]
    pub fn dinosaur(mut self, dinosaur: DinosaurTag) -> Self {
        self.dinosaur = Some(dinosaur);
        self
    }

    /// Restrict the search to one audience.
    #[must_use]
    pub fn class(mut self, class: TicketClass) -> Self {
        self.class = Some(class);
        self
    }
}

/// Catalog backed by a fixed list of tickets.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tickets: Vec<Ticket>,
}

impl StaticCatalog {
    /// Creates a catalog over the given tickets.
    pub fn new(tickets: Vec<Ticket>) -> Self {
        let mut tickets = tickets;
        tickets.sort_by(|a, b| {
            a.dinosaur
                .as_ref()
                .cmp(b.dinosaur.as_ref())
                .then_with(|| a.class.as_str().cmp(b.class.as_str()))
        });
        Self { tickets }
    }

    /// The six tickets the park sells when no catalog database is configured.
    pub fn builtin() -> Self {
        let entries: [(i32, &str, TicketClass, u64, &str); 6] = [
            (
                1,
                "tyrannosaurus",
                TicketClass::Adult,
                3_000,
                "Meet the king of the dinosaurs in an immersive, terrifying experience!",
            ),
            (
                2,
                "tyrannosaurus",
                TicketClass::Child,
                2_200,
                "A thrilling adventure for brave little explorers!",
            ),
            (
                3,
                "triceratops",
                TicketClass::Adult,
                2_400,
                "Meet the three-horned herbivore giant in its natural habitat!",
            ),
            (
                4,
                "triceratops",
                TicketClass::Child,
                1_700,
                "An educational encounter with the iconic dinosaur!",
            ),
            (
                5,
                "velociraptor",
                TicketClass::Adult,
                2_500,
                "Feel the speed and cunning of the most feared hunter!",
            ),
            (
                6,
                "velociraptor",
                TicketClass::Child,
                1_800,
                "Get to know the agile hunters of the Cretaceous!",
            ),
        ];

        let tickets = entries
            .into_iter()
            .filter_map(|(id, dinosaur, class, cents, description)| {
                Some(Ticket {
                    id: TicketId::try_new(id).ok()?,
                    dinosaur: DinosaurTag::try_new(dinosaur).ok()?,
                    class,
                    unit_price: Money::from_cents(cents),
                    description: description.to_string(),
                })
            })
            .collect();

        Self::new(tickets)
    }

    /// Tickets held by this catalog.
    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }
}

impl TicketCatalog for StaticCatalog {
    async fn resolve_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, CatalogError> {
        Ok(self
            .tickets
            .iter()
            .find(|ticket| ticket.id == ticket_id)
            .cloned())
    }

    async fn list_tickets(&self) -> Result<Vec<Ticket>, CatalogError> {
        Ok(self.tickets.clone())
    }
}

/// Capability fallback between two catalogs.
///
/// The primary catalog is always asked first. A primary error or a primary
/// miss consults the fallback, and an empty primary listing is replaced by
/// the fallback listing.
#[derive(Debug, Clone)]
pub struct FallbackCatalog<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> FallbackCatalog<P, F> {
    /// Combines a primary catalog with a fallback.
    pub const fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P> FallbackCatalog<P, StaticCatalog> {
    /// Falls back to [`StaticCatalog::builtin`].
    pub fn with_builtin(primary: P) -> Self {
        Self::new(primary, StaticCatalog::builtin())
    }
}

impl<P, F> TicketCatalog for FallbackCatalog<P, F>
where
    P: TicketCatalog + Sync,
    F: TicketCatalog + Sync,
{
    #[instrument(name = "catalog.resolve", skip(self), fields(ticket_id = %ticket_id))]
    async fn resolve_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, CatalogError> {
        match self.primary.resolve_ticket(ticket_id).await {
            Ok(Some(ticket)) => Ok(Some(ticket)),
            Ok(None) => {
                warn!("[catalog.fallback] ticket missing from primary catalog");
                self.fallback.resolve_ticket(ticket_id).await
            }
            Err(error) => {
                warn!(
                    error = %error,
                    "[catalog.fallback] primary catalog failed, using fallback"
                );
                self.fallback.resolve_ticket(ticket_id).await
            }
        }
    }

    #[instrument(name = "catalog.list", skip(self))]
    async fn list_tickets(&self) -> Result<Vec<Ticket>, CatalogError> {
        match self.primary.list_tickets().await {
            Ok(tickets) if !tickets.is_empty() => Ok(tickets),
            Ok(_) => {
                warn!("[catalog.fallback] primary catalog is empty, using fallback");
                self.fallback.list_tickets().await
            }
            Err(error) => {
                warn!(
                    error = %error,
                    "[catalog.fallback] primary catalog failed, using fallback"
                );
                self.fallback.list_tickets().await
            }
        }
    }

    #[instrument(name = "catalog.for_dinosaur", skip(self), fields(dinosaur = %dinosaur))]
    async fn tickets_for_dinosaur(
        &self,
        dinosaur: &DinosaurTag,
    ) -> Result<Vec<Ticket>, CatalogError> {
        match self.primary.tickets_for_dinosaur(dinosaur).await {
            Ok(tickets) if !tickets.is_empty() => Ok(tickets),
            Ok(_) => {
                warn!("[catalog.fallback] attraction missing from primary catalog");
                self.fallback.tickets_for_dinosaur(dinosaur).await
            }
            Err(error) => {
                warn!(
                    error = %error,
                    "[catalog.fallback] primary catalog failed, using fallback"
                );
                self.fallback.tickets_for_dinosaur(dinosaur).await
            }
        }
    }
}
