//! Persistence boundary for the marketplace.
//!
//! Two access paths:
//! - [`MarketStore`] reads are lock-free snapshots (browsing, dashboards).
//! - [`StoreTx`] is an explicit transaction: `begin`, read-with-lock, write,
//!   then `commit` or `rollback`. Every write that can race with another
//!   writer on the same row goes through a transaction holding that row's lock.
//!
//! Dropping a transaction without committing rolls it back and releases its locks.
//!
//! Lock order inside one transaction is always item before seller. No
//! transaction locks two items.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dormswap_core::{CategoryId, ItemId, UserId};
use dormswap_inventory::{InventoryCategory, InventoryItem, ItemStatus, NewItem, Seller, StockDelta};
use dormswap_payments::CheckoutMetadata;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row lock could not be acquired within the configured wait.
    #[error("timed out waiting for a row lock: {0}")]
    LockTimeout(String),

    /// The backend aborted the transaction to resolve a conflict (deadlock, serialization).
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// A constraint rejected the write (e.g. a counter would go negative).
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// The backend is unreachable or the pool is exhausted.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("corrupt row: {0}")]
    Decode(String),

    /// Misuse of the transaction API (e.g. writing a row without locking it).
    #[error("store misuse: {0}")]
    Misuse(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether the caller may retry the whole transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout(_) | StoreError::Conflict(_) | StoreError::Unavailable(_)
        )
    }
}

/// Lifecycle of a checkout session in the local ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    Open,
    Settled,
    Expired,
}

impl CheckoutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Open => "open",
            CheckoutState::Settled => "settled",
            CheckoutState::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(CheckoutState::Open),
            "settled" => Some(CheckoutState::Settled),
            "expired" => Some(CheckoutState::Expired),
            _ => None,
        }
    }
}

/// A checkout session this system created, tracked until it settles or expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRecord {
    pub session_id: String,
    pub metadata: CheckoutMetadata,
    pub state: CheckoutState,
    pub created_at: DateTime<Utc>,
}

/// Filter for lock-free item listings. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub seller_id: Option<UserId>,
    pub category_id: Option<CategoryId>,
}

impl ItemFilter {
    pub fn available() -> Self {
        Self {
            status: Some(ItemStatus::Available),
            ..Self::default()
        }
    }

    pub fn by_seller(seller_id: UserId) -> Self {
        Self {
            seller_id: Some(seller_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &InventoryItem) -> bool {
        self.status.is_none_or(|s| item.status == s)
            && self.seller_id.is_none_or(|s| item.seller_id == Some(s))
            && self.category_id.is_none_or(|c| item.category_id == c)
    }
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Start a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn item(&self, id: ItemId) -> Result<Option<InventoryItem>, StoreError>;

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<InventoryItem>, StoreError>;

    async fn category(&self, id: CategoryId) -> Result<Option<InventoryCategory>, StoreError>;

    async fn categories(&self) -> Result<Vec<InventoryCategory>, StoreError>;

    async fn create_category(&self, name: &str) -> Result<InventoryCategory, StoreError>;

    /// Delete a category. `false` when it does not exist; a `Constraint` error
    /// while any item still references it.
    async fn delete_category(&self, id: CategoryId) -> Result<bool, StoreError>;

    async fn seller(&self, id: UserId) -> Result<Option<Seller>, StoreError>;

    /// Create the user row on first sight, refreshing the contact email otherwise.
    async fn ensure_seller(
        &self,
        id: UserId,
        email: &str,
        full_name: Option<&str>,
    ) -> Result<Seller, StoreError>;

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn record_checkout(&self, record: &CheckoutRecord) -> Result<(), StoreError>;

    async fn checkout(&self, session_id: &str) -> Result<Option<CheckoutRecord>, StoreError>;

    /// Checkouts still `open` that were created before `created_before`.
    async fn open_checkouts(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<CheckoutRecord>, StoreError>;

    async fn set_checkout_state(
        &self,
        session_id: &str,
        state: CheckoutState,
    ) -> Result<(), StoreError>;
}

/// An open transaction.
#[async_trait]
pub trait StoreTx: Send {
    /// Lock an item row for the rest of the transaction and read it.
    async fn lock_item(&mut self, id: ItemId) -> Result<Option<InventoryItem>, StoreError>;

    /// Lock a seller row for the rest of the transaction and read it.
    async fn lock_seller(&mut self, id: UserId) -> Result<Option<Seller>, StoreError>;

    /// Lock every category row (counter maintenance) and read them.
    async fn lock_categories(&mut self) -> Result<Vec<InventoryCategory>, StoreError>;

    /// Items currently `available`, as seen by this transaction.
    async fn available_items(&mut self) -> Result<Vec<InventoryItem>, StoreError>;

    /// Insert a submission; the new row is locked by this transaction.
    async fn insert_item(&mut self, new: &NewItem) -> Result<InventoryItem, StoreError>;

    /// Write back a locked item.
    async fn update_item(&mut self, item: &InventoryItem) -> Result<(), StoreError>;

    /// Delete a locked item.
    async fn delete_item(&mut self, id: ItemId) -> Result<(), StoreError>;

    /// Write back a locked seller.
    async fn update_seller(&mut self, seller: &Seller) -> Result<(), StoreError>;

    /// Delete a locked seller. Fails with `Constraint` at the latest on commit
    /// if any item still references the seller.
    async fn delete_seller(&mut self, id: UserId) -> Result<(), StoreError>;

    /// Add `delta` to a category counter.
    async fn adjust_stock(&mut self, delta: StockDelta) -> Result<(), StoreError>;

    /// Overwrite a category counter (requires [`StoreTx::lock_categories`]).
    async fn set_stock(&mut self, category_id: CategoryId, count: i64) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
