use rust_decimal::Decimal;
use sqlx::{query_as, FromRow, Pool, Postgres};
use ticketcore::{
    CatalogError, DinosaurTag, Money, Ticket, TicketCatalog, TicketClass, TicketId,
};
use tracing::{error, instrument};

use crate::{PostgresConfig, PostgresError};

/// Ticket catalog read from the `tickets` table.
///
/// Database failures surface as [`CatalogError::Unavailable`]; wrap this
/// catalog in [`FallbackCatalog`](ticketcore::FallbackCatalog) to keep
/// selling from the built-in list while the database is down.
#[derive(Debug, Clone)]
pub struct PostgresTicketCatalog {
    pool: Pool<Postgres>,
}

impl PostgresTicketCatalog {
    /// Connect with default pool configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresError> {
        let connection_string = connection_string.into();
        let pool = PostgresConfig::default().connect(&connection_string).await?;
        Ok(Self { pool })
    }

    /// Create a catalog over an existing pool.
    pub const fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct TicketRow {
    id: i32,
    dinosaur: String,
    class: String,
    price: Decimal,
    description: String,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = CatalogError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let invalid = |detail: String| CatalogError::InvalidRow {
            ticket_id: row.id,
            detail,
        };

        let id = TicketId::try_new(row.id).map_err(|error| invalid(error.to_string()))?;
        let dinosaur = DinosaurTag::try_new(row.dinosaur)
            .map_err(|error| invalid(format!("dinosaur: {error}")))?;
        let class = TicketClass::parse(&row.class)
            .ok_or_else(|| invalid(format!("unknown ticket class `{}`", row.class)))?;
        let unit_price = Money::try_from_decimal(row.price)
            .map_err(|error| invalid(format!("price: {error}")))?;

        Ok(Self {
            id,
            dinosaur,
            class,
            unit_price,
            description: row.description,
        })
    }
}

fn unavailable(error: &sqlx::Error) -> CatalogError {
    error!(
        error = %error,
        "[postgres.catalog_error] ticket catalog query failed"
    );
    CatalogError::Unavailable {
        detail: error.to_string(),
    }
}

impl TicketCatalog for PostgresTicketCatalog {
    #[instrument(name = "postgres.resolve_ticket", skip(self), fields(ticket_id = %ticket_id))]
    async fn resolve_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, CatalogError> {
        query_as::<_, TicketRow>(
            "SELECT id, dinosaur, class, price, description FROM tickets WHERE id = $1",
        )
        .bind(ticket_id.into_inner())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| unavailable(&error))?
        .map(Ticket::try_from)
        .transpose()
    }

    #[instrument(name = "postgres.list_tickets", skip(self))]
    async fn list_tickets(&self) -> Result<Vec<Ticket>, CatalogError> {
        // 'adult' < 'child' and 'adulte' < 'enfant' both keep adults first.
        query_as::<_, TicketRow>(
            "SELECT id, dinosaur, class, price, description FROM tickets \
             ORDER BY lower(dinosaur), class",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| unavailable(&error))?
        .into_iter()
        .map(Ticket::try_from)
        .collect()
    }
}
