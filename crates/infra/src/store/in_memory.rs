//! In-memory store for local runs and tests.
//!
//! Committed state sits behind one `RwLock`; row locks come from [`RowLocks`].
//! A transaction stages its writes and applies them in one step at commit,
//! after checking the same constraints the Postgres schema enforces
//! (known category, non-negative counters). Counter deltas are applied under
//! the category guard, so a recount never overwrites a concurrent delta.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dormswap_core::{CategoryId, ItemId, UserId};
use dormswap_inventory::{InventoryCategory, InventoryItem, NewItem, Seller, StockDelta};

use super::{
    CheckoutRecord, CheckoutState, ItemFilter, MarketStore, StoreError, StoreTx,
};
use crate::guard::{RowGuard, RowLocks};

#[derive(Debug, Default)]
struct Tables {
    items: BTreeMap<ItemId, InventoryItem>,
    categories: BTreeMap<CategoryId, InventoryCategory>,
    sellers: BTreeMap<UserId, Seller>,
    settings: BTreeMap<String, String>,
    checkouts: BTreeMap<String, CheckoutRecord>,
    next_item: i64,
    next_category: i64,
}

#[derive(Debug)]
struct Inner {
    tables: RwLock<Tables>,
    item_locks: RowLocks<ItemId>,
    seller_locks: RowLocks<UserId>,
    category_locks: RowLocks<()>,
    fail_next_commit: AtomicBool,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        match self.tables.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        match self.tables.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                item_locks: RowLocks::new(lock_wait),
                seller_locks: RowLocks::new(lock_wait),
                category_locks: RowLocks::new(lock_wait),
                fail_next_commit: AtomicBool::new(false),
            }),
        }
    }

    /// Make the next commit fail as if the backend went away mid-transaction.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl MarketStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(InMemoryTx {
            inner: self.inner.clone(),
            item_guards: HashMap::new(),
            seller_guards: HashMap::new(),
            category_guard: None,
            items: BTreeMap::new(),
            inserted: BTreeSet::new(),
            sellers: BTreeMap::new(),
            deleted_sellers: BTreeSet::new(),
            deltas: Vec::new(),
            stock_sets: Vec::new(),
        }))
    }

    async fn item(&self, id: ItemId) -> Result<Option<InventoryItem>, StoreError> {
        Ok(self.inner.read().items.get(&id).cloned())
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<InventoryItem>, StoreError> {
        Ok(self
            .inner
            .read()
            .items
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    async fn category(&self, id: CategoryId) -> Result<Option<InventoryCategory>, StoreError> {
        Ok(self.inner.read().categories.get(&id).cloned())
    }

    async fn categories(&self) -> Result<Vec<InventoryCategory>, StoreError> {
        Ok(self.inner.read().categories.values().cloned().collect())
    }

    async fn create_category(&self, name: &str) -> Result<InventoryCategory, StoreError> {
        let mut tables = self.inner.write();
        if tables.categories.values().any(|c| c.name.eq_ignore_ascii_case(name)) {
            return Err(StoreError::Constraint(format!("category '{name}' already exists")));
        }
        tables.next_category += 1;
        let category = InventoryCategory {
            id: CategoryId::new(tables.next_category),
            name: name.to_string(),
            count_in_stock: 0,
        };
        tables.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn delete_category(&self, id: CategoryId) -> Result<bool, StoreError> {
        let mut tables = self.inner.write();
        let items = tables.items.values().filter(|i| i.category_id == id).count();
        if items > 0 {
            return Err(StoreError::Constraint(format!(
                "category {id} is referenced by {items} item(s)"
            )));
        }
        Ok(tables.categories.remove(&id).is_some())
    }

    async fn seller(&self, id: UserId) -> Result<Option<Seller>, StoreError> {
        Ok(self.inner.read().sellers.get(&id).cloned())
    }

    async fn ensure_seller(
        &self,
        id: UserId,
        email: &str,
        full_name: Option<&str>,
    ) -> Result<Seller, StoreError> {
        let mut tables = self.inner.write();
        let seller = tables
            .sellers
            .entry(id)
            .or_insert_with(|| Seller::new(id, email));
        seller.email = email.to_string();
        if let Some(name) = full_name {
            seller.full_name = Some(name.to_string());
        }
        Ok(seller.clone())
    }

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().settings.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn record_checkout(&self, record: &CheckoutRecord) -> Result<(), StoreError> {
        self.inner
            .write()
            .checkouts
            .entry(record.session_id.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn checkout(&self, session_id: &str) -> Result<Option<CheckoutRecord>, StoreError> {
        Ok(self.inner.read().checkouts.get(session_id).cloned())
    }

    async fn open_checkouts(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<CheckoutRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .checkouts
            .values()
            .filter(|c| c.state == CheckoutState::Open && c.created_at < created_before)
            .cloned()
            .collect())
    }

    async fn set_checkout_state(
        &self,
        session_id: &str,
        state: CheckoutState,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.inner.write().checkouts.get_mut(session_id) {
            record.state = state;
        }
        Ok(())
    }
}

struct InMemoryTx {
    inner: Arc<Inner>,
    item_guards: HashMap<ItemId, RowGuard>,
    seller_guards: HashMap<UserId, RowGuard>,
    category_guard: Option<RowGuard>,
    /// Staged item rows; `None` marks a delete.
    items: BTreeMap<ItemId, Option<InventoryItem>>,
    inserted: BTreeSet<ItemId>,
    sellers: BTreeMap<UserId, Seller>,
    deleted_sellers: BTreeSet<UserId>,
    deltas: Vec<StockDelta>,
    stock_sets: Vec<(CategoryId, i64)>,
}

impl InMemoryTx {
    fn holds_item(&self, id: ItemId) -> bool {
        self.item_guards.contains_key(&id) || self.inserted.contains(&id)
    }

    fn staged_item(&self, id: ItemId) -> Option<InventoryItem> {
        match self.items.get(&id) {
            Some(staged) => staged.clone(),
            None => self.inner.read().items.get(&id).cloned(),
        }
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn lock_item(&mut self, id: ItemId) -> Result<Option<InventoryItem>, StoreError> {
        if !self.holds_item(id) {
            let guard = self.inner.item_locks.acquire(&id).await?;
            if !self.inner.read().items.contains_key(&id) {
                return Ok(None);
            }
            self.item_guards.insert(id, guard);
        }
        Ok(self.staged_item(id))
    }

    async fn lock_seller(&mut self, id: UserId) -> Result<Option<Seller>, StoreError> {
        if self.deleted_sellers.contains(&id) {
            return Ok(None);
        }
        if !self.seller_guards.contains_key(&id) {
            let guard = self.inner.seller_locks.acquire(&id).await?;
            if !self.inner.read().sellers.contains_key(&id) {
                return Ok(None);
            }
            self.seller_guards.insert(id, guard);
        }
        Ok(match self.sellers.get(&id) {
            Some(s) => Some(s.clone()),
            None => self.inner.read().sellers.get(&id).cloned(),
        })
    }

    async fn lock_categories(&mut self) -> Result<Vec<InventoryCategory>, StoreError> {
        if self.category_guard.is_none() {
            self.category_guard = Some(self.inner.category_locks.acquire(&()).await?);
        }
        let mut categories = self.inner.read().categories.clone();
        for (id, count) in &self.stock_sets {
            if let Some(c) = categories.get_mut(id) {
                c.count_in_stock = *count;
            }
        }
        for d in &self.deltas {
            if let Some(c) = categories.get_mut(&d.category_id) {
                c.count_in_stock += d.delta;
            }
        }
        Ok(categories.into_values().collect())
    }

    async fn available_items(&mut self) -> Result<Vec<InventoryItem>, StoreError> {
        let mut items = self.inner.read().items.clone();
        for (id, staged) in &self.items {
            match staged {
                Some(item) => {
                    items.insert(*id, item.clone());
                }
                None => {
                    items.remove(id);
                }
            }
        }
        Ok(items.into_values().filter(|i| i.is_available()).collect())
    }

    async fn insert_item(&mut self, new: &NewItem) -> Result<InventoryItem, StoreError> {
        let id = {
            let mut tables = self.inner.write();
            tables.next_item += 1;
            ItemId::new(tables.next_item)
        };
        let item = InventoryItem::submitted(id, new.clone());
        self.inserted.insert(id);
        self.items.insert(id, Some(item.clone()));
        Ok(item)
    }

    async fn update_item(&mut self, item: &InventoryItem) -> Result<(), StoreError> {
        if !self.holds_item(item.id) {
            return Err(StoreError::Misuse(format!(
                "item {} written without holding its row lock",
                item.id
            )));
        }
        self.items.insert(item.id, Some(item.clone()));
        Ok(())
    }

    async fn delete_item(&mut self, id: ItemId) -> Result<(), StoreError> {
        if !self.holds_item(id) {
            return Err(StoreError::Misuse(format!(
                "item {id} deleted without holding its row lock"
            )));
        }
        self.items.insert(id, None);
        Ok(())
    }

    async fn update_seller(&mut self, seller: &Seller) -> Result<(), StoreError> {
        if !self.seller_guards.contains_key(&seller.id) {
            return Err(StoreError::Misuse(format!(
                "seller {} written without holding its row lock",
                seller.id
            )));
        }
        self.sellers.insert(seller.id, seller.clone());
        Ok(())
    }

    async fn delete_seller(&mut self, id: UserId) -> Result<(), StoreError> {
        if !self.seller_guards.contains_key(&id) {
            return Err(StoreError::Misuse(format!(
                "seller {id} deleted without holding its row lock"
            )));
        }
        self.sellers.remove(&id);
        self.deleted_sellers.insert(id);
        Ok(())
    }

    async fn adjust_stock(&mut self, delta: StockDelta) -> Result<(), StoreError> {
        self.deltas.push(delta);
        Ok(())
    }

    async fn set_stock(&mut self, category_id: CategoryId, count: i64) -> Result<(), StoreError> {
        if self.category_guard.is_none() {
            return Err(StoreError::Misuse(
                "category counters overwritten without locking categories".into(),
            ));
        }
        self.stock_sets.push((category_id, count));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }

        // Counter deltas wait out a recount holding the categories. Taken last,
        // after every row lock this transaction will ever hold.
        let _counters = if !self.deltas.is_empty() && self.category_guard.is_none() {
            Some(self.inner.category_locks.acquire(&()).await?)
        } else {
            None
        };

        let mut tables = self.inner.write();

        let mut counts: BTreeMap<CategoryId, i64> = BTreeMap::new();
        let touched = self
            .stock_sets
            .iter()
            .map(|(id, _)| *id)
            .chain(self.deltas.iter().map(|d| d.category_id));
        for id in touched {
            let current = tables
                .categories
                .get(&id)
                .map(|c| c.count_in_stock)
                .ok_or_else(|| StoreError::Constraint(format!("unknown category {id}")))?;
            counts.entry(id).or_insert(current);
        }
        for (id, count) in &self.stock_sets {
            counts.insert(*id, *count);
        }
        for d in &self.deltas {
            if let Some(c) = counts.get_mut(&d.category_id) {
                *c += d.delta;
            }
        }
        if let Some((id, count)) = counts.iter().find(|(_, c)| **c < 0) {
            return Err(StoreError::Constraint(format!(
                "count_in_stock of category {id} would become {count}"
            )));
        }

        for id in &self.deleted_sellers {
            let still_owned = tables
                .items
                .iter()
                .filter(|(item_id, _)| !self.items.contains_key(item_id))
                .map(|(_, item)| item)
                .chain(self.items.values().flatten())
                .any(|item| item.seller_id == Some(*id));
            if still_owned {
                return Err(StoreError::Constraint(format!(
                    "seller {id} still owns items"
                )));
            }
        }

        for item in self.items.values().flatten() {
            if !tables.categories.contains_key(&item.category_id) {
                return Err(StoreError::Constraint(format!(
                    "item {} references unknown category {}",
                    item.id, item.category_id
                )));
            }
            if let Some(seller) = item.seller_id {
                if !tables.sellers.contains_key(&seller) {
                    return Err(StoreError::Constraint(format!(
                        "item {} references unknown seller {seller}",
                        item.id
                    )));
                }
            }
        }

        for (id, count) in counts {
            if let Some(c) = tables.categories.get_mut(&id) {
                c.count_in_stock = count;
            }
        }
        for (id, staged) in &self.items {
            match staged {
                Some(item) => {
                    tables.items.insert(*id, item.clone());
                }
                None => {
                    tables.items.remove(id);
                }
            }
        }
        for (id, seller) in &self.sellers {
            tables.sellers.insert(*id, seller.clone());
        }
        for id in &self.deleted_sellers {
            tables.sellers.remove(id);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
