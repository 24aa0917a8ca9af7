//! `PostgreSQL` [`TicketStore`].
//!
//! Row locks are `SELECT ... FOR UPDATE`; duplicate batch ids surface as
//! unique violations on the primary key. Channel counters, pricing snapshots
//! and customer identities are stored as JSONB.
//!
//! # Example
//!
//! ```no_run
//! use tessera_ticketing::config::PostgresConfig;
//! use tessera_ticketing::store::PostgresStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect(&PostgresConfig::default()).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

use super::{StoreError, StoreTransaction, TicketStore};
use crate::config::PostgresConfig;
use crate::lifecycle::TicketStatus;
use crate::types::{
    ActivationStamp, AdmissionArtifact, BatchId, BatchPricing, BatchStatus, ChannelAllocation,
    ChannelId, CustomerIdentity, CustomerType, DistributionMode, Money, Order, OrderId,
    PartnerId, PriceBreakdown, PricingSnapshot, Product, ProductId, Reservation, ReservationId,
    ReservationStatus, ResellerMetadata, Ticket, TicketAudit, TicketBatch, TicketCode, TokenId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const PRODUCT_COLUMNS: &str = "id, name, base_price, weekend_premium, currency, \
     customer_type_discounts, channels, sold_count";

const RESERVATION_COLUMNS: &str = "id, product_id, channel_id, quantity, status, pricing, \
     created_at, expires_at, activated_at, order_id";

const BATCH_COLUMNS: &str = "id, partner_id, product_id, channel_id, quantity, \
     distribution_mode, status, pricing, reseller, expires_at, created_at";

const TICKET_COLUMNS: &str = "code, product_id, batch_id, partner_id, channel_id, status, \
     customer, customer_type, order_id, charged_price, price_breakdown, payment_reference, \
     wire_value, image_png, token_expires_at, issued_token_id, current_token_id, \
     token_rendered_at, activation_audit, created_at, activated_at, verified_at";

/// `PostgreSQL`-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool from configuration.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] when the database is unreachable.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(|e| db_error(&e, "connect"))?;
        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self::new(pool))
    }

    /// Runs the bundled migrations.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts or replaces a catalog product, counters included.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] or [`StoreError::Serialization`].
    pub async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO products
                (id, name, base_price, weekend_premium, currency,
                 customer_type_discounts, channels, sold_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                base_price = EXCLUDED.base_price,
                weekend_premium = EXCLUDED.weekend_premium,
                currency = EXCLUDED.currency,
                customer_type_discounts = EXCLUDED.customer_type_discounts,
                channels = EXCLUDED.channels,
                sold_count = EXCLUDED.sold_count
            ",
        )
        .bind(*product.id.as_uuid())
        .bind(&product.name)
        .bind(cents(product.base_price)?)
        .bind(product.weekend_premium.map(cents).transpose()?)
        .bind(&product.currency)
        .bind(Json(&product.customer_type_discounts))
        .bind(Json(&product.channels))
        .bind(signed(product.sold_count, "sold_count")?)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&e, "upsert product"))?;
        Ok(())
    }
}

#[async_trait]
impl TicketStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error(&e, "begin"))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&e, "find product"))?
            .as_ref()
            .map(product_from_row)
            .transpose()
    }

    async fn find_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
        sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&e, "find reservation"))?
            .as_ref()
            .map(reservation_from_row)
            .transpose()
    }

    async fn due_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = $1 AND expires_at <= $2 ORDER BY expires_at"
        );
        sqlx::query(&sql)
            .bind(ReservationStatus::Active.as_str())
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(&e, "due reservations"))?
            .iter()
            .map(reservation_from_row)
            .collect()
    }

    async fn due_batches(&self, now: DateTime<Utc>) -> Result<Vec<TicketBatch>, StoreError> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM ticket_batches \
             WHERE status = $1 AND expires_at <= $2 ORDER BY expires_at"
        );
        sqlx::query(&sql)
            .bind(BatchStatus::Active.as_str())
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(&e, "due batches"))?
            .iter()
            .map(batch_from_row)
            .collect()
    }

    async fn find_batch(&self, id: &BatchId) -> Result<Option<TicketBatch>, StoreError> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM ticket_batches WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&e, "find batch"))?
            .as_ref()
            .map(batch_from_row)
            .transpose()
    }

    async fn tickets_in_batch(&self, id: &BatchId) -> Result<Vec<Ticket>, StoreError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE batch_id = $1 ORDER BY code");
        sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(&e, "tickets in batch"))?
            .iter()
            .map(ticket_from_row)
            .collect()
    }

    async fn find_ticket(&self, code: &TicketCode) -> Result<Option<Ticket>, StoreError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE code = $1");
        sqlx::query(&sql)
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&e, "find ticket"))?
            .as_ref()
            .map(ticket_from_row)
            .transpose()
    }

    async fn insert_batch_placeholder(&self, batch: &TicketBatch) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO ticket_batches
                (id, partner_id, product_id, channel_id, quantity, distribution_mode,
                 status, pricing, reseller, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(batch.id.as_str())
        .bind(batch.partner_id.as_str())
        .bind(*batch.product_id.as_uuid())
        .bind(batch.channel_id.as_str())
        .bind(i64::from(batch.quantity))
        .bind(batch.distribution_mode.as_str())
        .bind(batch.status.as_str())
        .bind(Json(&batch.pricing))
        .bind(batch.reseller.as_ref().map(Json))
        .bind(batch.expires_at)
        .bind(batch.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&e, "insert batch"))?;
        Ok(())
    }

    async fn delete_batch(&self, id: &BatchId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM ticket_batches WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(&e, "delete batch"))?;
        Ok(())
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error(&e, "lock product"))?
            .as_ref()
            .map(product_from_row)
            .transpose()
    }

    async fn save_inventory(&mut self, product: &Product) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE products SET channels = $2, sold_count = $3 WHERE id = $1")
            .bind(*product.id.as_uuid())
            .bind(Json(&product.channels))
            .bind(signed(product.sold_count, "sold_count")?)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error(&e, "save inventory"))?;
        expect_one_row(result.rows_affected(), || format!("product {}", product.id))
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO reservations
                (id, product_id, channel_id, quantity, status, pricing,
                 created_at, expires_at, activated_at, order_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(*reservation.id.as_uuid())
        .bind(*reservation.product_id.as_uuid())
        .bind(reservation.channel_id.as_str())
        .bind(i64::from(reservation.quantity))
        .bind(reservation.status.as_str())
        .bind(Json(&reservation.pricing))
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.activated_at)
        .bind(reservation.order_id.map(|id| *id.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e, "insert reservation"))?;
        Ok(())
    }

    async fn lock_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        let sql =
            format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error(&e, "lock reservation"))?
            .as_ref()
            .map(reservation_from_row)
            .transpose()
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE reservations
            SET status = $2, activated_at = $3, order_id = $4
            WHERE id = $1
            ",
        )
        .bind(*reservation.id.as_uuid())
        .bind(reservation.status.as_str())
        .bind(reservation.activated_at)
        .bind(reservation.order_id.map(|id| *id.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e, "update reservation"))?;
        expect_one_row(result.rows_affected(), || format!("reservation {}", reservation.id))
    }

    async fn lock_batch(&mut self, id: &BatchId) -> Result<Option<TicketBatch>, StoreError> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM ticket_batches WHERE id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error(&e, "lock batch"))?
            .as_ref()
            .map(batch_from_row)
            .transpose()
    }

    async fn update_batch_status(
        &mut self,
        id: &BatchId,
        status: BatchStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE ticket_batches SET status = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error(&e, "update batch status"))?;
        expect_one_row(result.rows_affected(), || format!("batch {id}"))
    }

    async fn insert_tickets(&mut self, tickets: &[Ticket]) -> Result<(), StoreError> {
        if tickets.is_empty() {
            return Ok(());
        }
        let prices = tickets
            .iter()
            .map(|t| t.charged_price.map(cents).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("INSERT INTO tickets ({TICKET_COLUMNS}) "));
        builder.push_values(tickets.iter().zip(prices), |mut row, (ticket, price)| {
            row.push_bind(ticket.code.as_str())
                .push_bind(*ticket.product_id.as_uuid())
                .push_bind(ticket.batch_id.as_ref().map(BatchId::as_str))
                .push_bind(ticket.partner_id.as_ref().map(PartnerId::as_str))
                .push_bind(ticket.channel_id.as_str())
                .push_bind(ticket.status.as_str())
                .push_bind(ticket.customer.as_ref().map(Json))
                .push_bind(ticket.customer_type.map(|t| t.as_str()))
                .push_bind(ticket.order_id.map(|id| *id.as_uuid()))
                .push_bind(price)
                .push_bind(ticket.price_breakdown.as_ref().map(Json))
                .push_bind(ticket.payment_reference.as_deref())
                .push_bind(ticket.admission.wire_value.as_str())
                .push_bind(ticket.admission.image_png.as_slice())
                .push_bind(ticket.admission.expires_at)
                .push_bind(*ticket.audit.issued_token_id.as_uuid())
                .push_bind(*ticket.audit.current_token_id.as_uuid())
                .push_bind(ticket.audit.token_rendered_at)
                .push_bind(ticket.audit.activation.as_ref().map(Json))
                .push_bind(ticket.created_at)
                .push_bind(ticket.activated_at)
                .push_bind(ticket.verified_at);
        });
        builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error(&e, "insert tickets"))?;
        Ok(())
    }

    async fn retire_pre_generated(
        &mut self,
        batch: &BatchId,
        status: TicketStatus,
    ) -> Result<u32, StoreError> {
        let result =
            sqlx::query("UPDATE tickets SET status = $3 WHERE batch_id = $1 AND status = $2")
                .bind(batch.as_str())
                .bind(TicketStatus::PreGenerated.as_str())
                .bind(status.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error(&e, "retire tickets"))?;
        u32::try_from(result.rows_affected())
            .map_err(|_| StoreError::Integrity(format!("batch {batch}: too many tickets")))
    }

    async fn lock_ticket(&mut self, code: &TicketCode) -> Result<Option<Ticket>, StoreError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE code = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(code.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error(&e, "lock ticket"))?
            .as_ref()
            .map(ticket_from_row)
            .transpose()
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE tickets SET
                status = $2,
                customer = $3,
                customer_type = $4,
                order_id = $5,
                charged_price = $6,
                price_breakdown = $7,
                payment_reference = $8,
                wire_value = $9,
                image_png = $10,
                token_expires_at = $11,
                current_token_id = $12,
                token_rendered_at = $13,
                activation_audit = $14,
                activated_at = $15,
                verified_at = $16
            WHERE code = $1
            ",
        )
        .bind(ticket.code.as_str())
        .bind(ticket.status.as_str())
        .bind(ticket.customer.as_ref().map(Json))
        .bind(ticket.customer_type.map(|t| t.as_str()))
        .bind(ticket.order_id.map(|id| *id.as_uuid()))
        .bind(ticket.charged_price.map(cents).transpose()?)
        .bind(ticket.price_breakdown.as_ref().map(Json))
        .bind(ticket.payment_reference.as_deref())
        .bind(ticket.admission.wire_value.as_str())
        .bind(ticket.admission.image_png.as_slice())
        .bind(ticket.admission.expires_at)
        .bind(*ticket.audit.current_token_id.as_uuid())
        .bind(ticket.audit.token_rendered_at)
        .bind(ticket.audit.activation.as_ref().map(Json))
        .bind(ticket.activated_at)
        .bind(ticket.verified_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e, "update ticket"))?;
        expect_one_row(result.rows_affected(), || format!("ticket {}", ticket.code))
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO orders
                (id, product_id, quantity, total, currency, channel_id,
                 customer, payment_reference, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(*order.id.as_uuid())
        .bind(*order.product_id.as_uuid())
        .bind(i64::from(order.quantity))
        .bind(cents(order.total)?)
        .bind(&order.currency)
        .bind(order.channel_id.as_str())
        .bind(Json(&order.customer))
        .bind(&order.payment_reference)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e, "insert order"))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| db_error(&e, "commit"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| db_error(&e, "rollback"))
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let Json(customer_type_discounts): Json<BTreeMap<CustomerType, u32>> =
        get(row, "customer_type_discounts")?;
    let Json(channels): Json<HashMap<ChannelId, ChannelAllocation>> = get(row, "channels")?;
    let weekend_premium: Option<i64> = get(row, "weekend_premium")?;
    Ok(Product {
        id: ProductId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        base_price: money(get(row, "base_price")?)?,
        weekend_premium: weekend_premium.map(money).transpose()?,
        customer_type_discounts,
        currency: get(row, "currency")?,
        channels,
        sold_count: unsigned(get(row, "sold_count")?, "sold_count")?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, StoreError> {
    let status: String = get(row, "status")?;
    let Json(pricing): Json<PricingSnapshot> = get(row, "pricing")?;
    let order_id: Option<Uuid> = get(row, "order_id")?;
    Ok(Reservation {
        id: ReservationId::from_uuid(get(row, "id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        channel_id: ChannelId::new(get::<String>(row, "channel_id")?),
        quantity: quantity(get(row, "quantity")?)?,
        status: ReservationStatus::parse(&status).ok_or_else(|| unknown("reservation status", &status))?,
        pricing,
        created_at: get(row, "created_at")?,
        expires_at: get(row, "expires_at")?,
        activated_at: get(row, "activated_at")?,
        order_id: order_id.map(OrderId::from_uuid),
    })
}

fn batch_from_row(row: &PgRow) -> Result<TicketBatch, StoreError> {
    let status: String = get(row, "status")?;
    let mode: String = get(row, "distribution_mode")?;
    let Json(pricing): Json<BatchPricing> = get(row, "pricing")?;
    let reseller: Option<Json<ResellerMetadata>> = get(row, "reseller")?;
    Ok(TicketBatch {
        id: BatchId::new(get::<String>(row, "id")?),
        partner_id: PartnerId::new(get::<String>(row, "partner_id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        channel_id: ChannelId::new(get::<String>(row, "channel_id")?),
        quantity: quantity(get(row, "quantity")?)?,
        distribution_mode: DistributionMode::parse(&mode)
            .ok_or_else(|| unknown("distribution mode", &mode))?,
        status: BatchStatus::parse(&status).ok_or_else(|| unknown("batch status", &status))?,
        pricing,
        reseller: reseller.map(|Json(r)| r),
        expires_at: get(row, "expires_at")?,
        created_at: get(row, "created_at")?,
    })
}

fn ticket_from_row(row: &PgRow) -> Result<Ticket, StoreError> {
    let status: String = get(row, "status")?;
    let customer: Option<Json<CustomerIdentity>> = get(row, "customer")?;
    let customer_type: Option<String> = get(row, "customer_type")?;
    let price_breakdown: Option<Json<PriceBreakdown>> = get(row, "price_breakdown")?;
    let charged_price: Option<i64> = get(row, "charged_price")?;
    let order_id: Option<Uuid> = get(row, "order_id")?;
    let batch_id: Option<String> = get(row, "batch_id")?;
    let partner_id: Option<String> = get(row, "partner_id")?;
    let activation: Option<Json<ActivationStamp>> = get(row, "activation_audit")?;
    Ok(Ticket {
        code: TicketCode::new(get::<String>(row, "code")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        batch_id: batch_id.map(BatchId::new),
        partner_id: partner_id.map(PartnerId::new),
        channel_id: ChannelId::new(get::<String>(row, "channel_id")?),
        status: TicketStatus::parse(&status).ok_or_else(|| unknown("ticket status", &status))?,
        customer: customer.map(|Json(c)| c),
        customer_type: customer_type
            .map(|t| t.parse::<CustomerType>())
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        order_id: order_id.map(OrderId::from_uuid),
        charged_price: charged_price.map(money).transpose()?,
        price_breakdown: price_breakdown.map(|Json(b)| b),
        payment_reference: get(row, "payment_reference")?,
        admission: AdmissionArtifact {
            wire_value: get(row, "wire_value")?,
            image_png: get(row, "image_png")?,
            expires_at: get(row, "token_expires_at")?,
        },
        audit: TicketAudit {
            issued_token_id: TokenId::from_uuid(get(row, "issued_token_id")?),
            current_token_id: TokenId::from_uuid(get(row, "current_token_id")?),
            token_rendered_at: get(row, "token_rendered_at")?,
            activation: activation.map(|Json(a)| a),
        },
        created_at: get(row, "created_at")?,
        activated_at: get(row, "activated_at")?,
        verified_at: get(row, "verified_at")?,
    })
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("column {column}: {e}")))
}

fn db_error(error: &sqlx::Error, context: &str) -> StoreError {
    if let sqlx::Error::Database(db) = error {
        if db.is_unique_violation() {
            return StoreError::Conflict(format!("{context}: {db}"));
        }
    }
    StoreError::Database(format!("{context}: {error}"))
}

fn expect_one_row(affected: u64, what: impl FnOnce() -> String) -> Result<(), StoreError> {
    if affected == 0 {
        return Err(StoreError::NotFound(what()));
    }
    Ok(())
}

fn unknown(kind: &str, value: &str) -> StoreError {
    StoreError::Serialization(format!("unknown {kind}: {value}"))
}

fn cents(amount: Money) -> Result<i64, StoreError> {
    signed(amount.cents(), "amount")
}

fn money(cents: i64) -> Result<Money, StoreError> {
    unsigned(cents, "amount").map(Money::from_cents)
}

fn signed(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!("{field} out of range")))
}

fn unsigned(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Serialization(format!("negative {field}")))
}

fn quantity(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Serialization(format!("quantity {value}")))
}
