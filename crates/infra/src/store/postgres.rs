//! Postgres-backed marketplace store.
//!
//! Row locks are `SELECT ... FOR UPDATE` inside an explicit transaction. Each
//! transaction sets `lock_timeout` so a competing writer waits briefly and then
//! fails with a retryable error instead of blocking.
//!
//! ## Error Mapping
//!
//! | PostgreSQL code | StoreError | Scenario |
//! |-----------------|------------|----------|
//! | `55P03` | `LockTimeout` | Row held by another transaction past `lock_timeout` |
//! | `40001`, `40P01` | `Conflict` | Serialization failure or deadlock |
//! | `23514`, `23503`, `23505` | `Constraint` | Negative counter, unknown category/seller, duplicate name |
//! | pool timeout / IO | `Unavailable` | Backend unreachable |
//! | other | `Database` | Anything else |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use dormswap_core::{CategoryId, Cents, ItemId, UserId};
use dormswap_inventory::{
    InventoryCategory, InventoryItem, NewItem, Seller, StockDelta,
};
use dormswap_payments::CheckoutMetadata;

use super::{CheckoutRecord, CheckoutState, ItemFilter, MarketStore, StoreError, StoreTx};

const ITEM_COLUMNS: &str = "id, category_id, seller_id, description, suggested_price, price, \
     collection_method, is_large, status, pickup_week, dropoff_pod, sold_at, payout_sent, created_at";

const SELLER_COLUMNS: &str = "id, email, full_name, is_seller, has_paid, payment_declined, \
     stripe_customer_id, stripe_payment_method_id, payout_method, payout_handle";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_wait: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_wait: Duration) -> Self {
        Self { pool, lock_wait }
    }

    pub async fn connect(database_url: &str, lock_wait: Duration) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_wait))
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("schema.sql"))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl MarketStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // SET does not take bind parameters; the value is an integer we format ourselves.
        let stmt = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_wait.as_millis());
        sqlx::query(&stmt)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        Ok(Box::new(PostgresTx { tx }))
    }

    async fn item(&self, id: ItemId) -> Result<Option<InventoryItem>, StoreError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("item", e))?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<InventoryItem>, StoreError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items \
             WHERE ($1::text IS NULL OR status = $1) \
               AND ($2::bigint IS NULL OR seller_id = $2) \
               AND ($3::bigint IS NULL OR category_id = $3) \
             ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.seller_id.map(UserId::get))
            .bind(filter.category_id.map(CategoryId::get))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_items", e))?;
        rows.iter().map(item_from_row).collect()
    }

    async fn category(&self, id: CategoryId) -> Result<Option<InventoryCategory>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, count_in_stock FROM inventory_categories WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("category", e))?;
        row.as_ref().map(category_from_row).transpose()
    }

    async fn categories(&self) -> Result<Vec<InventoryCategory>, StoreError> {
        let rows = sqlx::query("SELECT id, name, count_in_stock FROM inventory_categories ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("categories", e))?;
        rows.iter().map(category_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn create_category(&self, name: &str) -> Result<InventoryCategory, StoreError> {
        let row = sqlx::query(
            "INSERT INTO inventory_categories (name) VALUES ($1) RETURNING id, name, count_in_stock",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_category", e))?;
        category_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn delete_category(&self, id: CategoryId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM inventory_categories WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_category", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn seller(&self, id: UserId) -> Result<Option<Seller>, StoreError> {
        let sql = format!("SELECT {SELLER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("seller", e))?;
        row.as_ref().map(seller_from_row).transpose()
    }

    async fn ensure_seller(
        &self,
        id: UserId,
        email: &str,
        full_name: Option<&str>,
    ) -> Result<Seller, StoreError> {
        let sql = format!(
            "INSERT INTO users (id, email, full_name) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET \
               email = EXCLUDED.email, \
               full_name = COALESCE(EXCLUDED.full_name, users.full_name) \
             RETURNING {SELLER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.get())
            .bind(email)
            .bind(full_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_seller", e))?;
        seller_from_row(&row)
    }

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM app_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("setting", e))?;
        row.map(|r| r.try_get::<String, _>("value").map_err(decode_err))
            .transpose()
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO app_settings (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_setting", e))?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(session_id = %record.session_id), err)]
    async fn record_checkout(&self, record: &CheckoutRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO checkout_sessions (session_id, metadata, state, created_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(&record.session_id)
        .bind(Json(&record.metadata))
        .bind(record.state.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_checkout", e))?;
        Ok(())
    }

    async fn checkout(&self, session_id: &str) -> Result<Option<CheckoutRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT session_id, metadata, state, created_at FROM checkout_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("checkout", e))?;
        row.as_ref().map(checkout_from_row).transpose()
    }

    async fn open_checkouts(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<CheckoutRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT session_id, metadata, state, created_at FROM checkout_sessions \
             WHERE state = 'open' AND created_at < $1 ORDER BY created_at",
        )
        .bind(created_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("open_checkouts", e))?;
        rows.iter().map(checkout_from_row).collect()
    }

    async fn set_checkout_state(
        &self,
        session_id: &str,
        state: CheckoutState,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE checkout_sessions SET state = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_checkout_state", e))?;
        Ok(())
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PostgresTx {
    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn lock_item(&mut self, id: ItemId) -> Result<Option<InventoryItem>, StoreError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_item", e))?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn lock_seller(&mut self, id: UserId) -> Result<Option<Seller>, StoreError> {
        let sql = format!("SELECT {SELLER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_seller", e))?;
        row.as_ref().map(seller_from_row).transpose()
    }

    async fn lock_categories(&mut self) -> Result<Vec<InventoryCategory>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, count_in_stock FROM inventory_categories ORDER BY id FOR UPDATE",
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_categories", e))?;
        rows.iter().map(category_from_row).collect()
    }

    async fn available_items(&mut self) -> Result<Vec<InventoryItem>, StoreError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM inventory_items WHERE status = 'available'");
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("available_items", e))?;
        rows.iter().map(item_from_row).collect()
    }

    async fn insert_item(&mut self, new: &NewItem) -> Result<InventoryItem, StoreError> {
        let row = sqlx::query(
            "INSERT INTO inventory_items \
               (category_id, seller_id, description, suggested_price, collection_method, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(new.category_id.get())
        .bind(new.seller_id.map(UserId::get))
        .bind(new.description.trim())
        .bind(new.suggested_price.map(Cents::get))
        .bind(new.collection_method.as_str())
        .bind(new.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;
        let id: i64 = row.try_get("id").map_err(decode_err)?;
        Ok(InventoryItem::submitted(ItemId::new(id), new.clone()))
    }

    async fn update_item(&mut self, item: &InventoryItem) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE inventory_items SET \
               category_id = $2, price = $3, is_large = $4, status = $5, pickup_week = $6, \
               dropoff_pod = $7, sold_at = $8, payout_sent = $9 \
             WHERE id = $1",
        )
        .bind(item.id.get())
        .bind(item.category_id.get())
        .bind(item.price.map(Cents::get))
        .bind(item.is_large)
        .bind(item.status.as_str())
        .bind(item.pickup_week.map(|w| w.as_str()))
        .bind(item.dropoff_pod.map(|p| p.as_str()))
        .bind(item.sold_at)
        .bind(item.payout_sent)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_item", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Misuse(format!("item {} does not exist", item.id)));
        }
        Ok(())
    }

    async fn delete_item(&mut self, id: ItemId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM inventory_items WHERE id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_item", e))?;
        Ok(())
    }

    async fn update_seller(&mut self, seller: &Seller) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users SET \
               full_name = $2, is_seller = $3, has_paid = $4, payment_declined = $5, \
               stripe_customer_id = $6, stripe_payment_method_id = $7, \
               payout_method = $8, payout_handle = $9 \
             WHERE id = $1",
        )
        .bind(seller.id.get())
        .bind(seller.full_name.as_deref())
        .bind(seller.is_seller)
        .bind(seller.has_paid)
        .bind(seller.payment_declined)
        .bind(seller.stripe_customer_id.as_deref())
        .bind(seller.stripe_payment_method_id.as_deref())
        .bind(seller.payout_method.as_deref())
        .bind(seller.payout_handle.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_seller", e))?;
        Ok(())
    }

    async fn delete_seller(&mut self, id: UserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_seller", e))?;
        Ok(())
    }

    async fn adjust_stock(&mut self, delta: StockDelta) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE inventory_categories SET count_in_stock = count_in_stock + $2 WHERE id = $1",
        )
        .bind(delta.category_id.get())
        .bind(delta.delta)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("adjust_stock", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Constraint(format!(
                "unknown category {}",
                delta.category_id
            )));
        }
        Ok(())
    }

    async fn set_stock(&mut self, category_id: CategoryId, count: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE inventory_categories SET count_in_stock = $2 WHERE id = $1")
            .bind(category_id.get())
            .bind(count)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_stock", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn decode_err(err: sqlx::Error) -> StoreError {
    StoreError::Decode(err.to_string())
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    let raw: String = row.try_get(column).map_err(decode_err)?;
    raw.parse()
        .map_err(|e| StoreError::Decode(format!("{column}: {e}")))
}

fn parse_optional_column<T>(row: &PgRow, column: &str) -> Result<Option<T>, StoreError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    let raw: Option<String> = row.try_get(column).map_err(decode_err)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| StoreError::Decode(format!("{column}: {e}")))
    })
    .transpose()
}

fn item_from_row(row: &PgRow) -> Result<InventoryItem, StoreError> {
    Ok(InventoryItem {
        id: ItemId::new(row.try_get("id").map_err(decode_err)?),
        category_id: CategoryId::new(row.try_get("category_id").map_err(decode_err)?),
        seller_id: row
            .try_get::<Option<i64>, _>("seller_id")
            .map_err(decode_err)?
            .map(UserId::new),
        description: row.try_get("description").map_err(decode_err)?,
        suggested_price: row
            .try_get::<Option<i64>, _>("suggested_price")
            .map_err(decode_err)?
            .map(Cents::new),
        price: row
            .try_get::<Option<i64>, _>("price")
            .map_err(decode_err)?
            .map(Cents::new),
        collection_method: parse_column(row, "collection_method")?,
        is_large: row.try_get("is_large").map_err(decode_err)?,
        status: parse_column(row, "status")?,
        pickup_week: parse_optional_column(row, "pickup_week")?,
        dropoff_pod: parse_optional_column(row, "dropoff_pod")?,
        sold_at: row.try_get("sold_at").map_err(decode_err)?,
        payout_sent: row.try_get("payout_sent").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

fn category_from_row(row: &PgRow) -> Result<InventoryCategory, StoreError> {
    Ok(InventoryCategory {
        id: CategoryId::new(row.try_get("id").map_err(decode_err)?),
        name: row.try_get("name").map_err(decode_err)?,
        count_in_stock: row.try_get("count_in_stock").map_err(decode_err)?,
    })
}

fn seller_from_row(row: &PgRow) -> Result<Seller, StoreError> {
    Ok(Seller {
        id: UserId::new(row.try_get("id").map_err(decode_err)?),
        email: row.try_get("email").map_err(decode_err)?,
        full_name: row.try_get("full_name").map_err(decode_err)?,
        is_seller: row.try_get("is_seller").map_err(decode_err)?,
        has_paid: row.try_get("has_paid").map_err(decode_err)?,
        payment_declined: row.try_get("payment_declined").map_err(decode_err)?,
        stripe_customer_id: row.try_get("stripe_customer_id").map_err(decode_err)?,
        stripe_payment_method_id: row.try_get("stripe_payment_method_id").map_err(decode_err)?,
        payout_method: row.try_get("payout_method").map_err(decode_err)?,
        payout_handle: row.try_get("payout_handle").map_err(decode_err)?,
    })
}

fn checkout_from_row(row: &PgRow) -> Result<CheckoutRecord, StoreError> {
    let Json(metadata): Json<CheckoutMetadata> = row.try_get("metadata").map_err(decode_err)?;
    let state: String = row.try_get("state").map_err(decode_err)?;
    Ok(CheckoutRecord {
        session_id: row.try_get("session_id").map_err(decode_err)?,
        metadata,
        state: CheckoutState::parse(&state)
            .ok_or_else(|| StoreError::Decode(format!("unknown checkout state '{state}'")))?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

/// Map SQLx errors to StoreError, classifying by SQLSTATE.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") => StoreError::LockTimeout(msg),
                Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                Some("23514") | Some("23503") | Some("23505") => StoreError::Constraint(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{operation}: {err}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("{operation}: {err}"))
        }
        other => StoreError::Database(format!("{operation}: {other}")),
    }
}
