use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use common::{BookingId, BusinessId, CouponId, CustomerId, HoldId, InventoryItemId, PaymentId, WaiverId};
use domain::{
    Aggregate, Booking, BookingDraft, BookingEvent, BookingItem, BookingStatus, BusinessPolicy,
    Claim, ClaimSource, Coupon, Customer, DomainEvent, ExpiryReason, Hold, Ignored,
    InventoryItem, ItemQuantity, Money, Payment, PaymentDecision, PaymentEvent, PaymentStatus,
    PriceQuote, TimeWindow, UnitMetadata, Waiver, claim_search_range, ensure_capacity,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{
        AppliedPaymentEvent, BookingEventRecord, BookingStore, LedgerWrite, Materialized,
        NewBooking, PaymentAttempt, ReapReport, ReconcileOutcome, SideEffect, SideEffectKind,
        WaiverUpsert, check_revival_capacity, plan_payment_event,
    },
};

/// PostgreSQL-backed booking store implementation.
#[derive(Clone)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Creates a new PostgreSQL booking store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

const BOOKING_COLUMNS: &str = r#"
    SELECT id, business_id, customer_id, hold_id, starts_at, ends_at, timezone, status,
           subtotal_cents, discount_cents, tax_rate_bps, tax_cents, total_cents, deposit_cents,
           amount_due_cents, currency, coupon_id, expires_at, payment_ref, confirmed_payment_ref,
           created_at, updated_at
    FROM bookings
"#;

const PAYMENT_COLUMNS: &str = r#"
    SELECT id, booking_id, business_id, provider_payment_id, amount_cents, currency, status,
           created_at, updated_at
    FROM payments
"#;

const CUSTOMER_COLUMNS: &str = r#"
    SELECT id, business_id, name, email, phone, address, booking_count, total_spent_cents,
           last_booking_at, created_at
    FROM customers
"#;

const WAIVER_COLUMNS: &str =
    "id, business_id, customer_id, booking_id, document_id, document_url, created_at, updated_at";

fn corrupt(what: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(what.to_string())
}

fn unsigned(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| corrupt(format!("{column} is negative: {value}")))
}

fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| corrupt(format!("unknown timezone {name}")))
}

fn window_from_row(row: &PgRow) -> Result<TimeWindow> {
    TimeWindow::new(row.try_get("starts_at")?, row.try_get("ends_at")?).map_err(corrupt)
}

fn for_update(sql: &str, lock: bool) -> String {
    if lock {
        format!("{sql} FOR UPDATE")
    } else {
        sql.to_string()
    }
}

fn row_to_item(row: PgRow) -> Result<InventoryItem> {
    let capacity: Option<i32> = row.try_get("capacity")?;
    Ok(InventoryItem {
        id: InventoryItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
        business_id: BusinessId::from_uuid(row.try_get::<Uuid, _>("business_id")?),
        name: row.try_get("name")?,
        total_quantity: unsigned(row.try_get("total_quantity")?, "total_quantity")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        metadata: UnitMetadata {
            capacity: capacity.map(|c| unsigned(c, "capacity")).transpose()?,
            dimensions: row.try_get("dimensions")?,
        },
    })
}

fn row_to_policy(row: PgRow) -> Result<BusinessPolicy> {
    let deposit: Option<i16> = row.try_get("deposit_percent")?;
    Ok(BusinessPolicy {
        buffer_before_minutes: unsigned(row.try_get("buffer_before_minutes")?, "buffer_before_minutes")?,
        buffer_after_minutes: unsigned(row.try_get("buffer_after_minutes")?, "buffer_after_minutes")?,
        min_notice_hours: unsigned(row.try_get("min_notice_hours")?, "min_notice_hours")?,
        max_notice_hours: unsigned(row.try_get("max_notice_hours")?, "max_notice_hours")?,
        tax_rate_bps: unsigned(row.try_get("tax_rate_bps")?, "tax_rate_bps")?,
        deposit_percent: deposit
            .map(|d| u8::try_from(d).map_err(|_| corrupt(format!("deposit_percent {d}"))))
            .transpose()?,
    })
}

fn row_to_coupon(row: PgRow) -> Result<Coupon> {
    let max_uses: Option<i32> = row.try_get("max_uses")?;
    Ok(Coupon {
        id: CouponId::from_uuid(row.try_get::<Uuid, _>("id")?),
        business_id: BusinessId::from_uuid(row.try_get::<Uuid, _>("business_id")?),
        code: row.try_get("code")?,
        discount: serde_json::from_value(row.try_get("discount")?)?,
        max_uses: max_uses.map(|m| unsigned(m, "max_uses")).transpose()?,
        times_used: unsigned(row.try_get("times_used")?, "times_used")?,
        expires_at: row.try_get("expires_at")?,
        active: row.try_get("active")?,
    })
}

fn row_to_customer(row: PgRow) -> Result<Customer> {
    let address: Option<serde_json::Value> = row.try_get("address")?;
    Ok(Customer {
        id: CustomerId::from_uuid(row.try_get::<Uuid, _>("id")?),
        business_id: BusinessId::from_uuid(row.try_get::<Uuid, _>("business_id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        address: address.map(serde_json::from_value).transpose()?,
        booking_count: unsigned(row.try_get("booking_count")?, "booking_count")?,
        total_spent: Money::from_cents(row.try_get("total_spent_cents")?),
        last_booking_at: row.try_get("last_booking_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_payment(row: PgRow) -> Result<Payment> {
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
        booking_id: BookingId::from_uuid(row.try_get::<Uuid, _>("booking_id")?),
        business_id: BusinessId::from_uuid(row.try_get::<Uuid, _>("business_id")?),
        provider_payment_id: row.try_get("provider_payment_id")?,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        currency: row.try_get("currency")?,
        status: status.parse::<PaymentStatus>().map_err(corrupt)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_waiver(row: PgRow) -> Result<Waiver> {
    Ok(Waiver {
        id: WaiverId::from_uuid(row.try_get::<Uuid, _>("id")?),
        business_id: BusinessId::from_uuid(row.try_get::<Uuid, _>("business_id")?),
        customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
        booking_id: BookingId::from_uuid(row.try_get::<Uuid, _>("booking_id")?),
        document_id: row.try_get("document_id")?,
        document_url: row.try_get("document_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_side_effect(row: PgRow) -> Result<SideEffect> {
    let kind: String = row.try_get("kind")?;
    Ok(SideEffect {
        booking_id: BookingId::from_uuid(row.try_get::<Uuid, _>("booking_id")?),
        kind: kind.parse::<SideEffectKind>().map_err(corrupt)?,
        attempts: unsigned(row.try_get("attempts")?, "attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn load_hold(conn: &mut PgConnection, hold_id: HoldId, lock: bool) -> Result<Option<Hold>> {
    let sql = for_update(
        "SELECT id, business_id, starts_at, ends_at, timezone, created_at, expires_at FROM holds WHERE id = $1",
        lock,
    );
    let Some(row) = sqlx::query(&sql)
        .bind(hold_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let lines = sqlx::query(
        r#"
        SELECT inventory_item_id, quantity
        FROM hold_lines
        WHERE hold_id = $1
        ORDER BY inventory_item_id
        "#,
    )
    .bind(hold_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|line| -> Result<ItemQuantity> {
        Ok(ItemQuantity::new(
            InventoryItemId::from_uuid(line.try_get::<Uuid, _>("inventory_item_id")?),
            unsigned(line.try_get("quantity")?, "quantity")?,
        ))
    })
    .collect::<Result<Vec<_>>>()?;

    let timezone: String = row.try_get("timezone")?;
    Ok(Some(Hold {
        id: hold_id,
        business_id: BusinessId::from_uuid(row.try_get::<Uuid, _>("business_id")?),
        lines,
        window: window_from_row(&row)?,
        timezone: parse_tz(&timezone)?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    }))
}

async fn load_booking(
    conn: &mut PgConnection,
    booking_id: BookingId,
    lock: bool,
) -> Result<Option<Booking>> {
    let sql = for_update(&format!("{BOOKING_COLUMNS} WHERE id = $1"), lock);
    let Some(row) = sqlx::query(&sql)
        .bind(booking_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let items = sqlx::query(
        r#"
        SELECT inventory_item_id, name, quantity, unit_price_cents, booking_status
        FROM booking_items
        WHERE booking_id = $1
        ORDER BY position
        "#,
    )
    .bind(booking_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|item| -> Result<BookingItem> {
        let status: String = item.try_get("booking_status")?;
        Ok(BookingItem {
            inventory_item_id: InventoryItemId::from_uuid(item.try_get::<Uuid, _>("inventory_item_id")?),
            name: item.try_get("name")?,
            quantity: unsigned(item.try_get("quantity")?, "quantity")?,
            unit_price: Money::from_cents(item.try_get("unit_price_cents")?),
            status: status.parse::<BookingStatus>().map_err(corrupt)?,
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let status: String = row.try_get("status")?;
    let timezone: String = row.try_get("timezone")?;
    let deposit: Option<i64> = row.try_get("deposit_cents")?;
    let coupon_id: Option<Uuid> = row.try_get("coupon_id")?;

    Ok(Some(Booking {
        id: booking_id,
        business_id: BusinessId::from_uuid(row.try_get::<Uuid, _>("business_id")?),
        customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
        hold_id: HoldId::from_uuid(row.try_get::<Uuid, _>("hold_id")?),
        window: window_from_row(&row)?,
        timezone: parse_tz(&timezone)?,
        status: status.parse::<BookingStatus>().map_err(corrupt)?,
        items,
        pricing: PriceQuote {
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            discount: Money::from_cents(row.try_get("discount_cents")?),
            tax_rate_bps: unsigned(row.try_get("tax_rate_bps")?, "tax_rate_bps")?,
            tax: Money::from_cents(row.try_get("tax_cents")?),
            total: Money::from_cents(row.try_get("total_cents")?),
            deposit: deposit.map(Money::from_cents),
            amount_due: Money::from_cents(row.try_get("amount_due_cents")?),
        },
        currency: row.try_get("currency")?,
        coupon_id: coupon_id.map(CouponId::from_uuid),
        expires_at: row.try_get("expires_at")?,
        payment_ref: row.try_get("payment_ref")?,
        confirmed_payment_ref: row.try_get("confirmed_payment_ref")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

/// Serializes capacity changes per (business, item). Callers pass ids in a
/// stable order so two transactions never wait on each other in reverse.
async fn lock_items(
    conn: &mut PgConnection,
    business_id: BusinessId,
    item_ids: impl IntoIterator<Item = InventoryItemId>,
) -> Result<()> {
    let mut ids: Vec<InventoryItemId> = item_ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    for item_id in ids {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{business_id}:{item_id}"))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn query_policy(conn: &mut PgConnection, business_id: BusinessId) -> Result<Option<BusinessPolicy>> {
    sqlx::query(
        r#"
        SELECT buffer_before_minutes, buffer_after_minutes, min_notice_hours, max_notice_hours,
               tax_rate_bps, deposit_percent
        FROM business_policies
        WHERE business_id = $1
        "#,
    )
    .bind(business_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?
    .map(row_to_policy)
    .transpose()
}

async fn query_inventory(conn: &mut PgConnection, business_id: BusinessId) -> Result<Vec<InventoryItem>> {
    sqlx::query(
        r#"
        SELECT id, business_id, name, total_quantity, price_cents, capacity, dimensions
        FROM inventory_items
        WHERE business_id = $1
        ORDER BY name ASC
        "#,
    )
    .bind(business_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(row_to_item)
    .collect()
}

async fn query_claims(
    conn: &mut PgConnection,
    business_id: BusinessId,
    range: &TimeWindow,
    now: DateTime<Utc>,
) -> Result<Vec<Claim>> {
    let rows = sqlx::query(
        r#"
        SELECT 'hold' AS source_kind, h.id AS source_id, l.inventory_item_id, l.quantity,
               h.starts_at, h.ends_at, h.expires_at
        FROM holds h
        JOIN hold_lines l ON l.hold_id = h.id
        WHERE h.business_id = $1
          AND h.starts_at < $3 AND h.ends_at > $2
          AND h.expires_at > $4
        UNION ALL
        SELECT 'booking', b.id, i.inventory_item_id, i.quantity,
               b.starts_at, b.ends_at,
               CASE WHEN b.status = 'CONFIRMED' THEN NULL ELSE b.expires_at END
        FROM bookings b
        JOIN booking_items i ON i.booking_id = b.id
        WHERE b.business_id = $1
          AND b.starts_at < $3 AND b.ends_at > $2
          AND (b.status = 'CONFIRMED'
               OR (b.status IN ('HOLD', 'PENDING') AND b.expires_at > $4))
        "#,
    )
    .bind(business_id.as_uuid())
    .bind(range.start())
    .bind(range.end())
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<Claim> {
            let kind: String = row.try_get("source_kind")?;
            let source_id: Uuid = row.try_get("source_id")?;
            let source = match kind.as_str() {
                "hold" => ClaimSource::Hold(HoldId::from_uuid(source_id)),
                _ => ClaimSource::Booking(BookingId::from_uuid(source_id)),
            };
            Ok(Claim {
                source,
                inventory_item_id: InventoryItemId::from_uuid(row.try_get::<Uuid, _>("inventory_item_id")?),
                quantity: unsigned(row.try_get("quantity")?, "quantity")?,
                window: window_from_row(&row)?,
                expires_at: row.try_get("expires_at")?,
            })
        })
        .collect()
}

async fn find_payment_in(
    conn: &mut PgConnection,
    provider_payment_id: &str,
    lock: bool,
) -> Result<Option<Payment>> {
    let sql = for_update(&format!("{PAYMENT_COLUMNS} WHERE provider_payment_id = $1"), lock);
    sqlx::query(&sql)
        .bind(provider_payment_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(row_to_payment)
        .transpose()
}

async fn insert_payment(conn: &mut PgConnection, payment: &Payment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payments (id, booking_id, business_id, provider_payment_id, amount_cents,
                              currency, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT ON CONSTRAINT unique_provider_payment DO NOTHING
        "#,
    )
    .bind(payment.id.as_uuid())
    .bind(payment.booking_id.as_uuid())
    .bind(payment.business_id.as_uuid())
    .bind(&payment.provider_payment_id)
    .bind(payment.amount.cents())
    .bind(&payment.currency)
    .bind(payment.status.as_str())
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn append_event(
    conn: &mut PgConnection,
    booking_id: BookingId,
    event: &BookingEvent,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO booking_events (booking_id, event_type, payload, occurred_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(booking_id.as_uuid())
    .bind(event.event_type())
    .bind(serde_json::to_value(event)?)
    .bind(event.occurred_at())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_booking(conn: &mut PgConnection, booking: &Booking) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bookings (id, business_id, customer_id, hold_id, starts_at, ends_at, timezone,
                              status, subtotal_cents, discount_cents, tax_rate_bps, tax_cents,
                              total_cents, deposit_cents, amount_due_cents, currency, coupon_id,
                              expires_at, payment_ref, confirmed_payment_ref, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22)
        "#,
    )
    .bind(booking.id.as_uuid())
    .bind(booking.business_id.as_uuid())
    .bind(booking.customer_id.as_uuid())
    .bind(booking.hold_id.as_uuid())
    .bind(booking.window.start())
    .bind(booking.window.end())
    .bind(booking.timezone.name())
    .bind(booking.status.as_str())
    .bind(booking.pricing.subtotal.cents())
    .bind(booking.pricing.discount.cents())
    .bind(booking.pricing.tax_rate_bps as i32)
    .bind(booking.pricing.tax.cents())
    .bind(booking.pricing.total.cents())
    .bind(booking.pricing.deposit.map(|d| d.cents()))
    .bind(booking.pricing.amount_due.cents())
    .bind(&booking.currency)
    .bind(booking.coupon_id.map(|id| id.as_uuid()))
    .bind(booking.expires_at)
    .bind(&booking.payment_ref)
    .bind(&booking.confirmed_payment_ref)
    .bind(booking.created_at)
    .bind(booking.updated_at)
    .execute(&mut *conn)
    .await?;

    for (position, item) in booking.items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO booking_items (booking_id, position, inventory_item_id, name, quantity,
                                       unit_price_cents, booking_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(booking.id.as_uuid())
        .bind(position as i32)
        .bind(item.inventory_item_id.as_uuid())
        .bind(&item.name)
        .bind(item.quantity as i32)
        .bind(item.unit_price.cents())
        .bind(item.status.as_str())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Writes the mutable lifecycle columns and mirrors status to the items.
async fn update_booking(conn: &mut PgConnection, booking: &Booking) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE bookings
        SET status = $2, expires_at = $3, payment_ref = $4, confirmed_payment_ref = $5,
            updated_at = $6
        WHERE id = $1
        "#,
    )
    .bind(booking.id.as_uuid())
    .bind(booking.status.as_str())
    .bind(booking.expires_at)
    .bind(&booking.payment_ref)
    .bind(&booking.confirmed_payment_ref)
    .bind(booking.updated_at)
    .execute(&mut *conn)
    .await?;

    sqlx::query("UPDATE booking_items SET booking_status = $2 WHERE booking_id = $1")
        .bind(booking.id.as_uuid())
        .bind(booking.status.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl BookingStore for PostgresBookingStore {
    async fn put_inventory_item(&self, item: InventoryItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_items (id, business_id, name, total_quantity, price_cents,
                                         capacity, dimensions)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                total_quantity = EXCLUDED.total_quantity,
                price_cents = EXCLUDED.price_cents,
                capacity = EXCLUDED.capacity,
                dimensions = EXCLUDED.dimensions
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.business_id.as_uuid())
        .bind(&item.name)
        .bind(item.total_quantity as i32)
        .bind(item.price.cents())
        .bind(item.metadata.capacity.map(|c| c as i32))
        .bind(&item.metadata.dimensions)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_inventory(&self, business_id: BusinessId) -> Result<Vec<InventoryItem>> {
        let mut conn = self.pool.acquire().await?;
        query_inventory(&mut conn, business_id).await
    }

    async fn put_business_policy(
        &self,
        business_id: BusinessId,
        policy: BusinessPolicy,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO business_policies (business_id, buffer_before_minutes, buffer_after_minutes,
                                           min_notice_hours, max_notice_hours, tax_rate_bps,
                                           deposit_percent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (business_id) DO UPDATE
            SET buffer_before_minutes = EXCLUDED.buffer_before_minutes,
                buffer_after_minutes = EXCLUDED.buffer_after_minutes,
                min_notice_hours = EXCLUDED.min_notice_hours,
                max_notice_hours = EXCLUDED.max_notice_hours,
                tax_rate_bps = EXCLUDED.tax_rate_bps,
                deposit_percent = EXCLUDED.deposit_percent
            "#,
        )
        .bind(business_id.as_uuid())
        .bind(policy.buffer_before_minutes as i32)
        .bind(policy.buffer_after_minutes as i32)
        .bind(policy.min_notice_hours as i32)
        .bind(policy.max_notice_hours as i32)
        .bind(policy.tax_rate_bps as i32)
        .bind(policy.deposit_percent.map(i16::from))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn business_policy(&self, business_id: BusinessId) -> Result<Option<BusinessPolicy>> {
        let mut conn = self.pool.acquire().await?;
        query_policy(&mut conn, business_id).await
    }

    async fn put_coupon(&self, coupon: Coupon) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO coupons (id, business_id, code, discount, max_uses, times_used, expires_at,
                                 active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET code = EXCLUDED.code,
                discount = EXCLUDED.discount,
                max_uses = EXCLUDED.max_uses,
                times_used = EXCLUDED.times_used,
                expires_at = EXCLUDED.expires_at,
                active = EXCLUDED.active
            "#,
        )
        .bind(coupon.id.as_uuid())
        .bind(coupon.business_id.as_uuid())
        .bind(&coupon.code)
        .bind(serde_json::to_value(coupon.discount)?)
        .bind(coupon.max_uses.map(|m| m as i32))
        .bind(coupon.times_used as i32)
        .bind(coupon.expires_at)
        .bind(coupon.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_coupon(&self, business_id: BusinessId, code: &str) -> Result<Option<Coupon>> {
        sqlx::query(
            r#"
            SELECT id, business_id, code, discount, max_uses, times_used, expires_at, active
            FROM coupons
            WHERE business_id = $1 AND lower(code) = lower($2)
            "#,
        )
        .bind(business_id.as_uuid())
        .bind(code.trim())
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_coupon)
        .transpose()
    }

    async fn claims_overlapping(
        &self,
        business_id: BusinessId,
        range: &TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<Claim>> {
        let mut conn = self.pool.acquire().await?;
        query_claims(&mut conn, business_id, range, now).await
    }

    async fn create_hold(&self, hold: Hold, now: DateTime<Utc>) -> Result<Hold> {
        let mut tx = self.pool.begin().await?;

        lock_items(
            &mut tx,
            hold.business_id,
            hold.lines.iter().map(|l| l.inventory_item_id),
        )
        .await?;

        let policy = query_policy(&mut tx, hold.business_id).await?.unwrap_or_default();
        let items = query_inventory(&mut tx, hold.business_id).await?;
        let range = claim_search_range(&hold.window, &policy);
        let claims = query_claims(&mut tx, hold.business_id, &range, now).await?;
        ensure_capacity(&items, &claims, &hold.window, &hold.lines, &policy, now)?;

        sqlx::query(
            r#"
            INSERT INTO holds (id, business_id, starts_at, ends_at, timezone, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(hold.id.as_uuid())
        .bind(hold.business_id.as_uuid())
        .bind(hold.window.start())
        .bind(hold.window.end())
        .bind(hold.timezone.name())
        .bind(hold.created_at)
        .bind(hold.expires_at)
        .execute(&mut *tx)
        .await?;

        for line in &hold.lines {
            sqlx::query(
                "INSERT INTO hold_lines (hold_id, inventory_item_id, quantity) VALUES ($1, $2, $3)",
            )
            .bind(hold.id.as_uuid())
            .bind(line.inventory_item_id.as_uuid())
            .bind(line.quantity as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(hold)
    }

    async fn get_hold(&self, hold_id: HoldId) -> Result<Option<Hold>> {
        let mut conn = self.pool.acquire().await?;
        load_hold(&mut conn, hold_id, false).await
    }

    async fn release_hold(&self, hold_id: HoldId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM holds WHERE id = $1")
            .bind(hold_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn materialize_booking(
        &self,
        new: NewBooking,
        now: DateTime<Utc>,
    ) -> Result<Materialized> {
        let mut tx = self.pool.begin().await?;

        // A concurrent materialization of the same hold waits here, then
        // finds the booking below.
        let hold = load_hold(&mut tx, new.hold_id, true).await?;

        let booking_id = BookingId::for_hold(new.hold_id);
        if let Some(existing) = load_booking(&mut tx, booking_id, false).await? {
            return Ok(Materialized::Existing(existing));
        }

        let hold = hold
            .filter(|h| h.is_live(now))
            .ok_or(StoreError::HoldExpired(new.hold_id))?;
        lock_items(
            &mut tx,
            hold.business_id,
            hold.lines.iter().map(|l| l.inventory_item_id),
        )
        .await?;

        let address = new
            .contact
            .address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let customer_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO customers (id, business_id, name, email, phone, address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT unique_customer_email DO UPDATE
            SET name = EXCLUDED.name,
                phone = COALESCE(EXCLUDED.phone, customers.phone),
                address = COALESCE(EXCLUDED.address, customers.address)
            RETURNING id
            "#,
        )
        .bind(CustomerId::new().as_uuid())
        .bind(hold.business_id.as_uuid())
        .bind(new.contact.name.trim())
        .bind(new.contact.normalized_email())
        .bind(&new.contact.phone)
        .bind(address)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let (booking, event) = Booking::from_hold(
            &hold,
            BookingDraft {
                customer_id: CustomerId::from_uuid(customer_id),
                lines: new.lines,
                quote: new.quote,
                currency: new.currency,
                coupon_id: new.coupon_id,
                expires_at: new.expires_at,
            },
            now,
        );

        insert_booking(&mut tx, &booking).await?;
        append_event(&mut tx, booking.id, &event).await?;

        sqlx::query("DELETE FROM holds WHERE id = $1")
            .bind(hold.id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Materialized::Created(booking))
    }

    async fn mark_payment_initiated(
        &self,
        booking_id: BookingId,
        attempt: PaymentAttempt,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Booking> {
        let mut tx = self.pool.begin().await?;

        let mut booking = load_booking(&mut tx, booking_id, true)
            .await?
            .ok_or(StoreError::BookingNotFound(booking_id))?;

        if booking.status == BookingStatus::Pending
            && booking.payment_ref.as_deref() == Some(attempt.provider_payment_id.as_str())
        {
            return Ok(booking);
        }

        let event = booking.initiate_payment(attempt.provider_payment_id.clone(), expires_at, now)?;
        booking.apply(&event);

        insert_payment(
            &mut tx,
            &Payment {
                id: PaymentId::new(),
                booking_id,
                business_id: booking.business_id,
                provider_payment_id: attempt.provider_payment_id,
                amount: attempt.amount,
                currency: attempt.currency,
                status: PaymentStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        )
        .await?;
        update_booking(&mut tx, &booking).await?;
        append_event(&mut tx, booking_id, &event).await?;

        tx.commit().await?;
        Ok(booking)
    }

    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>> {
        let mut conn = self.pool.acquire().await?;
        load_booking(&mut conn, booking_id, false).await
    }

    async fn booking_events(&self, booking_id: BookingId) -> Result<Vec<BookingEventRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, event_type, payload, occurred_at
            FROM booking_events
            WHERE booking_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(booking_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<BookingEventRecord> {
                Ok(BookingEventRecord {
                    sequence: row.try_get("sequence")?,
                    event_type: row.try_get("event_type")?,
                    event: serde_json::from_value(row.try_get("payload")?)?,
                    recorded_at: row.try_get("occurred_at")?,
                })
            })
            .collect()
    }

    async fn cancel_booking(
        &self,
        booking_id: BookingId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking> {
        let mut tx = self.pool.begin().await?;

        let mut booking = load_booking(&mut tx, booking_id, true)
            .await?
            .ok_or(StoreError::BookingNotFound(booking_id))?;
        let event = booking.cancel(reason, now)?;
        booking.apply(&event);

        update_booking(&mut tx, &booking).await?;
        append_event(&mut tx, booking_id, &event).await?;

        tx.commit().await?;
        Ok(booking)
    }

    async fn payments_for_booking(&self, booking_id: BookingId) -> Result<Vec<Payment>> {
        sqlx::query(&format!("{PAYMENT_COLUMNS} WHERE booking_id = $1 ORDER BY created_at ASC"))
            .bind(booking_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(row_to_payment)
            .collect()
    }

    async fn find_payment(&self, provider_payment_id: &str) -> Result<Option<Payment>> {
        let mut conn = self.pool.acquire().await?;
        find_payment_in(&mut conn, provider_payment_id, false).await
    }

    async fn apply_payment_event(
        &self,
        booking_id: BookingId,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let mut tx = self.pool.begin().await?;

        let booking = load_booking(&mut tx, booking_id, true)
            .await?
            .ok_or(StoreError::BookingNotFound(booking_id))?;

        let recorded = sqlx::query(
            r#"
            INSERT INTO processed_payment_events (event_id, booking_id, processed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(booking_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if recorded.rows_affected() == 0 {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let prior = find_payment_in(&mut tx, &event.payment_ref, true).await?;
        let mut decision = booking.decide_payment(event, prior.as_ref(), now);
        if decision == (PaymentDecision::Confirm { revive: true }) {
            lock_items(
                &mut tx,
                booking.business_id,
                booking.items.iter().map(|i| i.inventory_item_id),
            )
            .await?;
            let policy = query_policy(&mut tx, booking.business_id).await?.unwrap_or_default();
            let items = query_inventory(&mut tx, booking.business_id).await?;
            let range = claim_search_range(&booking.window, &policy);
            let claims = query_claims(&mut tx, booking.business_id, &range, now).await?;
            if check_revival_capacity(&booking, &items, &claims, &policy, now).is_err() {
                decision = PaymentDecision::Record(Ignored::CapacityLost);
            }
        }

        let previous_status = booking.status;
        let Some(plan) = plan_payment_event(booking, event, prior.as_ref(), decision, now)? else {
            tx.commit().await?;
            return Ok(ReconcileOutcome::Duplicate);
        };
        let side_effects = plan.side_effects();

        match &plan.ledger {
            LedgerWrite::Insert(payment) => insert_payment(&mut tx, payment).await?,
            LedgerWrite::Update(status) => {
                sqlx::query(
                    "UPDATE payments SET status = $2, updated_at = $3 WHERE provider_payment_id = $1",
                )
                .bind(&event.payment_ref)
                .bind(status.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            LedgerWrite::Skip => {}
        }

        if !plan.events.is_empty() {
            update_booking(&mut tx, &plan.booking).await?;
            for e in &plan.events {
                append_event(&mut tx, booking_id, e).await?;
            }
        }

        if let Some(amount) = plan.confirmed_amount {
            sqlx::query(
                r#"
                UPDATE customers
                SET booking_count = booking_count + 1,
                    total_spent_cents = total_spent_cents + $2,
                    last_booking_at = $3
                WHERE id = $1
                "#,
            )
            .bind(plan.booking.customer_id.as_uuid())
            .bind(amount.cents())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if let Some(coupon_id) = plan.booking.coupon_id {
                let usage = sqlx::query(
                    r#"
                    UPDATE coupons SET times_used = times_used + 1
                    WHERE id = $1
                    RETURNING times_used, max_uses
                    "#,
                )
                .bind(coupon_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
                if let Some(row) = usage {
                    let times_used: i32 = row.try_get("times_used")?;
                    let max_uses: Option<i32> = row.try_get("max_uses")?;
                    if max_uses.is_some_and(|max| times_used > max) {
                        tracing::warn!(%coupon_id, times_used, "Coupon used past its limit");
                    }
                }
            }

            for kind in &side_effects {
                sqlx::query(
                    r#"
                    INSERT INTO side_effects (booking_id, kind, created_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (booking_id, kind) DO NOTHING
                    "#,
                )
                .bind(booking_id.as_uuid())
                .bind(kind.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        Ok(ReconcileOutcome::Applied(AppliedPaymentEvent {
            booking: plan.booking,
            previous_status,
            transition: plan.transition,
            side_effects,
        }))
    }

    async fn get_customer(&self, customer_id: CustomerId) -> Result<Option<Customer>> {
        sqlx::query(&format!("{CUSTOMER_COLUMNS} WHERE id = $1"))
            .bind(customer_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_customer)
            .transpose()
    }

    async fn find_customer(
        &self,
        business_id: BusinessId,
        email: &str,
    ) -> Result<Option<Customer>> {
        sqlx::query(&format!("{CUSTOMER_COLUMNS} WHERE business_id = $1 AND email = $2"))
            .bind(business_id.as_uuid())
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_customer)
            .transpose()
    }

    async fn upsert_waiver(&self, waiver: WaiverUpsert, now: DateTime<Utc>) -> Result<Waiver> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO waivers (id, business_id, customer_id, booking_id, document_id,
                                 document_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT ON CONSTRAINT unique_waiver_booking DO UPDATE
            SET document_id = EXCLUDED.document_id,
                document_url = EXCLUDED.document_url,
                updated_at = EXCLUDED.updated_at
            RETURNING {WAIVER_COLUMNS}
            "#
        ))
        .bind(WaiverId::new().as_uuid())
        .bind(waiver.business_id.as_uuid())
        .bind(waiver.customer_id.as_uuid())
        .bind(waiver.booking_id.as_uuid())
        .bind(&waiver.document_id)
        .bind(&waiver.document_url)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row_to_waiver(row)
    }

    async fn find_waiver(&self, booking_id: BookingId) -> Result<Option<Waiver>> {
        sqlx::query(&format!("SELECT {WAIVER_COLUMNS} FROM waivers WHERE booking_id = $1"))
            .bind(booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_waiver)
            .transpose()
    }

    async fn pending_side_effects(&self, limit: usize) -> Result<Vec<SideEffect>> {
        sqlx::query(
            r#"
            SELECT booking_id, kind, attempts, last_error, created_at
            FROM side_effects
            WHERE completed_at IS NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(row_to_side_effect)
        .collect()
    }

    async fn complete_side_effect(
        &self,
        booking_id: BookingId,
        kind: SideEffectKind,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE side_effects
            SET attempts = attempts + 1, completed_at = COALESCE(completed_at, $3)
            WHERE booking_id = $1 AND kind = $2
            "#,
        )
        .bind(booking_id.as_uuid())
        .bind(kind.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_side_effect_failure(
        &self,
        booking_id: BookingId,
        kind: SideEffectKind,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE side_effects
            SET attempts = attempts + 1, last_error = $3
            WHERE booking_id = $1 AND kind = $2
            "#,
        )
        .bind(booking_id.as_uuid())
        .bind(kind.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<ReapReport> {
        let mut tx = self.pool.begin().await?;

        let holds_deleted = sqlx::query("DELETE FROM holds WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let lapsed: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM bookings
            WHERE status IN ('HOLD', 'PENDING') AND expires_at <= $1
            ORDER BY expires_at
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut expired_bookings = Vec::with_capacity(lapsed.len());
        for id in &lapsed {
            let booking_id = BookingId::from_uuid(*id);
            let Some(mut booking) = load_booking(&mut tx, booking_id, false).await? else {
                continue;
            };
            let event = booking.expire(ExpiryReason::TimedOut, now)?;
            booking.apply(&event);
            update_booking(&mut tx, &booking).await?;
            append_event(&mut tx, booking_id, &event).await?;
            expired_bookings.push(booking);
        }

        let payments_expired = sqlx::query(
            r#"
            UPDATE payments SET status = 'EXPIRED', updated_at = $2
            WHERE booking_id = ANY($1) AND status = 'PENDING'
            "#,
        )
        .bind(&lapsed)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(ReapReport {
            holds_deleted,
            expired_bookings,
            payments_expired,
        })
    }
}
