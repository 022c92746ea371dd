//! Item lifecycle service.
//!
//! Every item transition goes through [`Lifecycle::try_transition`] (or the
//! shared tail behind it): lock the row, let the aggregate decide, apply the
//! events, write the item together with its counter deltas, commit, and only
//! then hand notifications to the dispatcher. A command the aggregate answers
//! with no events is already satisfied and reports
//! [`TransitionOutcome::AlreadyApplied`] without writing anything.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

use dormswap_core::{Aggregate, CategoryId, Cents, DomainError, Event, ItemId, UserId};
use dormswap_inventory::category::validate_category_name;
use dormswap_inventory::logistics::{awaiting_dropoff, awaiting_pickup};
use dormswap_inventory::{
    ApproveItem, CollectionMethod, ConfirmDropoff, ConfirmPickup, CountDrift, DropoffPod,
    FeeSchedule, InventoryCategory, InventoryItem, ItemCommand, ItemEvent, ItemStatus,
    MarkPayoutSent, NewItem, PayoutMethod, PayoutRates, PayoutSummary, PickupWeek,
    RecategorizeItem, RemoveItem, RepriceItem, ReverseSale, Seller, SettleSale, SwitchToPickup,
    recount, stock_effects,
};

use crate::notify::{Notification, NotificationDispatcher};
use crate::settings::SettingsService;
use crate::store::{ItemFilter, MarketStore, StoreError, StoreTx};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Rejected(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("the pickup period is closed; submissions are not accepted")]
    PickupPeriodClosed,

    #[error("category '{name}' still has {items} item(s)")]
    CategoryInUse { name: String, items: usize },
}

impl LifecycleError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LifecycleError::Store(e) if e.is_retryable())
    }
}

/// A committed change to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub before: InventoryItem,
    /// `None` when the item was removed.
    pub after: Option<InventoryItem>,
    pub events: Vec<ItemEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(Transition),
    /// The command was already satisfied; nothing was written or sent.
    AlreadyApplied(InventoryItem),
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    /// The item as it stands after the outcome (`None` once removed).
    pub fn item(&self) -> Option<&InventoryItem> {
        match self {
            TransitionOutcome::Applied(t) => t.after.as_ref(),
            TransitionOutcome::AlreadyApplied(item) => Some(item),
        }
    }
}

/// Per-item result of a batch (pickup confirmation, pickup upgrade).
#[derive(Debug, Default)]
pub struct BatchReport {
    pub applied: Vec<ItemId>,
    pub already_applied: Vec<ItemId>,
    pub failed: Vec<(ItemId, LifecycleError)>,
}

impl BatchReport {
    pub fn has_retryable_failure(&self) -> bool {
        self.failed.iter().any(|(_, e)| e.is_retryable())
    }
}

/// Everything a seller's dashboard shows about their items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerDashboard {
    pub items: Vec<InventoryItem>,
    pub payouts: PayoutSummary,
    pub awaiting_pickup: Vec<ItemId>,
    pub awaiting_dropoff: Vec<ItemId>,
    pub pending_pickup_fee: Cents,
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn MarketStore>,
    notifier: NotificationDispatcher,
    settings: SettingsService,
    rates: PayoutRates,
    fees: FeeSchedule,
}

impl core::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("rates", &self.rates)
            .field("fees", &self.fees)
            .finish_non_exhaustive()
    }
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn MarketStore>,
        notifier: NotificationDispatcher,
        settings: SettingsService,
        rates: PayoutRates,
        fees: FeeSchedule,
    ) -> Self {
        Self {
            store,
            notifier,
            settings,
            rates,
            fees,
        }
    }

    pub fn store(&self) -> &Arc<dyn MarketStore> {
        &self.store
    }

    pub fn settings(&self) -> &SettingsService {
        &self.settings
    }

    pub fn rates(&self) -> PayoutRates {
        self.rates
    }

    pub fn fees(&self) -> FeeSchedule {
        self.fees
    }

    /// Lock `item_id`, decide `command` against its current state and commit the result.
    #[instrument(skip_all, fields(item_id = %item_id, command = command.name()), err)]
    pub async fn try_transition(
        &self,
        item_id: ItemId,
        command: ItemCommand,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let mut tx = self.store.begin().await?;
        let item = tx
            .lock_item(item_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("item {item_id}")))?;
        self.commit_transition(tx, item, command).await
    }

    async fn commit_transition(
        &self,
        mut tx: Box<dyn StoreTx>,
        item: InventoryItem,
        command: ItemCommand,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let events = match item.handle(&command) {
            Ok(events) => events,
            Err(e) => {
                tx.rollback().await?;
                return Err(e.into());
            }
        };

        if events.is_empty() {
            tx.rollback().await?;
            tracing::info!(
                item_id = %item.id,
                status = %item.status,
                command = command.name(),
                "transition already applied"
            );
            return Ok(TransitionOutcome::AlreadyApplied(item));
        }

        let mut next = item.clone();
        for event in &events {
            next.apply(event);
        }
        next.check_invariants()?;
        let after = (!events.iter().any(ItemEvent::is_removal)).then_some(next);

        for delta in stock_effects(Some(&item), after.as_ref()) {
            tx.adjust_stock(delta).await?;
        }
        match &after {
            Some(updated) => tx.update_item(updated).await?,
            None => tx.delete_item(item.id).await?,
        }
        if let Err(e) = tx.commit().await {
            tracing::error!(item_id = %item.id, error = %e, "transition commit failed");
            return Err(e.into());
        }

        for event in &events {
            tracing::info!(item_id = %item.id, event = event.event_type(), "item transition applied");
        }
        self.announce(after.as_ref().unwrap_or(&item), &events).await;

        Ok(TransitionOutcome::Applied(Transition {
            before: item,
            after,
            events,
        }))
    }

    /// Queue the notifications for committed events. Never fails.
    async fn announce(&self, item: &InventoryItem, events: &[ItemEvent]) {
        let Some(seller_id) = item.seller_id else { return };
        let notifications: Vec<(&str, serde_json::Value)> = events
            .iter()
            .filter_map(|event| match event {
                ItemEvent::Approved(e) => Some((
                    "item_approved",
                    json!({
                        "item_id": item.id,
                        "description": item.description,
                        "price": e.price.to_string(),
                        "collection_method": item.collection_method.as_str(),
                    }),
                )),
                ItemEvent::PickupConfirmed(_) | ItemEvent::DropoffConfirmed(_) => Some((
                    "item_live",
                    json!({
                        "item_id": item.id,
                        "description": item.description,
                        "estimated_payout": self.rates.breakdown(item).map(|b| b.payout.to_string()),
                    }),
                )),
                ItemEvent::Sold(e) => {
                    let rate_bps = self.rates.rate(item.collection_method);
                    Some((
                        "item_sold",
                        json!({
                            "item_id": item.id,
                            "description": item.description,
                            "sale_price": e.price.to_string(),
                            "rate_bps": rate_bps,
                            "payout": e.price.apply_bps(rate_bps).to_string(),
                        }),
                    ))
                }
                _ => None,
            })
            .collect();
        if notifications.is_empty() {
            return;
        }

        let seller = match self.store.seller(seller_id).await {
            Ok(Some(seller)) => seller,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "seller lookup for notification failed");
                return;
            }
        };
        for (template, mut context) in notifications {
            context["name"] = json!(seller.display_name());
            self.notifier
                .notify(Notification::new(seller.email.clone(), template, context));
        }
    }

    /// Create an item in `pending_valuation`.
    ///
    /// Seller submissions are refused while the pickup period is closed; staff
    /// entries (no seller) are not.
    #[instrument(skip(self, new), err)]
    pub async fn submit_item(&self, new: NewItem) -> Result<InventoryItem, LifecycleError> {
        if new.seller_id.is_some() && !self.settings.pickup_period_active().await {
            return Err(LifecycleError::PickupPeriodClosed);
        }
        new.validate()?;
        if self.store.category(new.category_id).await?.is_none() {
            return Err(LifecycleError::NotFound(format!("category {}", new.category_id)));
        }

        let mut tx = self.store.begin().await?;
        let item = tx.insert_item(&new).await?;
        tx.commit().await?;
        tracing::info!(item_id = %item.id, seller_id = ?item.seller_id, "item submitted");
        Ok(item)
    }

    /// Staff approval. The seller's standing is read under lock together with the item.
    pub async fn approve(
        &self,
        item_id: ItemId,
        price: Cents,
        is_large: bool,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let mut tx = self.store.begin().await?;
        let item = tx
            .lock_item(item_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("item {item_id}")))?;
        let seller = match item.seller_id {
            Some(seller_id) => tx.lock_seller(seller_id).await?,
            None => None,
        };
        let command = ItemCommand::Approve(ApproveItem {
            price,
            is_large,
            standing: Seller::standing_of(seller.as_ref()),
            occurred_at: Utc::now(),
        });
        self.commit_transition(tx, item, command).await
    }

    pub async fn reprice(
        &self,
        item_id: ItemId,
        price: Cents,
    ) -> Result<TransitionOutcome, LifecycleError> {
        self.try_transition(
            item_id,
            ItemCommand::Reprice(RepriceItem {
                price,
                occurred_at: Utc::now(),
            }),
        )
        .await
    }

    pub async fn recategorize(
        &self,
        item_id: ItemId,
        category_id: CategoryId,
    ) -> Result<TransitionOutcome, LifecycleError> {
        if self.store.category(category_id).await?.is_none() {
            return Err(LifecycleError::NotFound(format!("category {category_id}")));
        }
        self.try_transition(
            item_id,
            ItemCommand::Recategorize(RecategorizeItem {
                category_id,
                occurred_at: Utc::now(),
            }),
        )
        .await
    }

    /// Free drop-off confirmation, applied synchronously.
    pub async fn confirm_dropoff(
        &self,
        seller_id: UserId,
        item_id: ItemId,
        pod: DropoffPod,
    ) -> Result<TransitionOutcome, LifecycleError> {
        self.try_transition(
            item_id,
            ItemCommand::ConfirmDropoff(ConfirmDropoff {
                seller_id,
                pod,
                occurred_at: Utc::now(),
            }),
        )
        .await
    }

    /// Settle a sale (`available -> sold`). A second settlement is `AlreadyApplied`.
    pub async fn settle_sale(&self, item_id: ItemId) -> Result<TransitionOutcome, LifecycleError> {
        self.try_transition(
            item_id,
            ItemCommand::Settle(SettleSale {
                occurred_at: Utc::now(),
            }),
        )
        .await
    }

    pub async fn reverse_sale(&self, item_id: ItemId) -> Result<TransitionOutcome, LifecycleError> {
        self.try_transition(
            item_id,
            ItemCommand::ReverseSale(ReverseSale {
                occurred_at: Utc::now(),
            }),
        )
        .await
    }

    pub async fn mark_payout_sent(
        &self,
        item_id: ItemId,
    ) -> Result<TransitionOutcome, LifecycleError> {
        self.try_transition(
            item_id,
            ItemCommand::MarkPayoutSent(MarkPayoutSent {
                occurred_at: Utc::now(),
            }),
        )
        .await
    }

    pub async fn remove(&self, item_id: ItemId) -> Result<TransitionOutcome, LifecycleError> {
        self.try_transition(
            item_id,
            ItemCommand::Remove(RemoveItem {
                occurred_at: Utc::now(),
            }),
        )
        .await
    }

    /// Confirm a paid pickup for several items, then mark the seller paid.
    ///
    /// Each item is its own transaction; one failure does not stop the rest.
    #[instrument(skip_all, fields(seller_id = %seller_id, week = %week, count = item_ids.len()))]
    pub async fn confirm_pickup_batch(
        &self,
        seller_id: UserId,
        item_ids: &[ItemId],
        week: PickupWeek,
    ) -> Result<BatchReport, LifecycleError> {
        let mut report = BatchReport::default();
        for &item_id in item_ids {
            let command = ItemCommand::ConfirmPickup(ConfirmPickup {
                seller_id,
                week,
                occurred_at: Utc::now(),
            });
            match self.try_transition(item_id, command).await {
                Ok(TransitionOutcome::Applied(_)) => report.applied.push(item_id),
                Ok(TransitionOutcome::AlreadyApplied(_)) => report.already_applied.push(item_id),
                Err(e) => {
                    tracing::warn!(item_id = %item_id, error = %e, "pickup confirmation skipped item");
                    report.failed.push((item_id, e));
                }
            }
        }
        self.mark_seller_paid(seller_id).await?;
        Ok(report)
    }

    async fn update_seller<F>(&self, seller_id: UserId, change: F) -> Result<bool, LifecycleError>
    where
        F: FnOnce(&mut Seller) -> bool + Send,
    {
        let mut tx = self.store.begin().await?;
        let mut seller = tx
            .lock_seller(seller_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("user {seller_id}")))?;
        if !change(&mut seller) {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.update_seller(&seller).await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn mark_seller_paid(&self, seller_id: UserId) -> Result<bool, LifecycleError> {
        let changed = self.update_seller(seller_id, Seller::mark_paid).await?;
        if changed {
            tracing::info!(seller_id = %seller_id, "seller marked paid");
        }
        Ok(changed)
    }

    pub async fn activate_seller(&self, seller_id: UserId) -> Result<bool, LifecycleError> {
        let changed = self.update_seller(seller_id, Seller::activate).await?;
        if changed {
            tracing::info!(seller_id = %seller_id, "seller activated");
        }
        Ok(changed)
    }

    pub async fn save_payment_method(
        &self,
        seller_id: UserId,
        payment_method: &str,
        customer: Option<&str>,
    ) -> Result<bool, LifecycleError> {
        let changed = self
            .update_seller(seller_id, |s| s.save_payment_method(payment_method, customer))
            .await?;
        if changed {
            tracing::info!(seller_id = %seller_id, "payment method saved");
        }
        Ok(changed)
    }

    /// Move the seller's in-person items that have not reached storage onto the
    /// pickup route, then record the paid service fee.
    ///
    /// Items already switched are not listed again, so a replay applies nothing.
    #[instrument(skip(self), fields(seller_id = %seller_id))]
    pub async fn upgrade_to_pickup(
        &self,
        seller_id: UserId,
    ) -> Result<(BatchReport, bool), LifecycleError> {
        if self.store.seller(seller_id).await?.is_none() {
            return Err(LifecycleError::NotFound(format!("user {seller_id}")));
        }
        let items = self.store.list_items(&ItemFilter::by_seller(seller_id)).await?;

        let mut report = BatchReport::default();
        for item in upgradable(&items) {
            let command = ItemCommand::SwitchToPickup(SwitchToPickup {
                seller_id,
                occurred_at: Utc::now(),
            });
            match self.try_transition(item.id, command).await {
                Ok(TransitionOutcome::Applied(_)) => report.applied.push(item.id),
                Ok(TransitionOutcome::AlreadyApplied(_)) => report.already_applied.push(item.id),
                // Deleted since the listing.
                Err(LifecycleError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(item_id = %item.id, error = %e, "pickup upgrade skipped item");
                    report.failed.push((item.id, e));
                }
            }
        }

        let seller_changed = self.update_seller(seller_id, Seller::mark_upgraded).await?;
        tracing::info!(
            seller_id = %seller_id,
            switched = report.applied.len(),
            seller_changed,
            "pickup upgrade applied"
        );
        Ok((report, seller_changed))
    }

    /// Save where the seller's payouts go.
    pub async fn update_payout(
        &self,
        seller_id: UserId,
        method: PayoutMethod,
        handle: &str,
    ) -> Result<bool, LifecycleError> {
        let handle = method.clean_handle(handle)?;
        let changed = self
            .update_seller(seller_id, |s| s.set_payout(method, &handle))
            .await?;
        if changed {
            tracing::info!(seller_id = %seller_id, method = method.as_str(), "payout details saved");
        }
        Ok(changed)
    }

    /// Delete a seller account and every item it owns.
    ///
    /// Each item leaves through the regular removal transition so live items
    /// release their counter slot. Returns how many items were removed.
    #[instrument(skip(self), fields(seller_id = %seller_id), err)]
    pub async fn remove_seller(
        &self,
        acting: UserId,
        seller_id: UserId,
    ) -> Result<usize, LifecycleError> {
        if acting == seller_id {
            return Err(DomainError::validation("you cannot delete your own account").into());
        }
        if self.store.seller(seller_id).await?.is_none() {
            return Err(LifecycleError::NotFound(format!("user {seller_id}")));
        }

        let mut removed = 0;
        for item in self.store.list_items(&ItemFilter::by_seller(seller_id)).await? {
            match self.remove(item.id).await {
                Ok(_) => removed += 1,
                Err(LifecycleError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let mut tx = self.store.begin().await?;
        if tx.lock_seller(seller_id).await?.is_none() {
            tx.rollback().await?;
            return Err(LifecycleError::NotFound(format!("user {seller_id}")));
        }
        tx.delete_seller(seller_id).await?;
        tx.commit().await?;

        tracing::info!(seller_id = %seller_id, items_removed = removed, "seller removed");
        Ok(removed)
    }

    /// Delete a category that no item references.
    pub async fn delete_category(&self, id: CategoryId) -> Result<(), LifecycleError> {
        let category = self
            .store
            .category(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("category {id}")))?;
        let filter = ItemFilter {
            category_id: Some(id),
            ..ItemFilter::default()
        };
        let items = self.store.list_items(&filter).await?.len();
        if items > 0 {
            return Err(LifecycleError::CategoryInUse {
                name: category.name,
                items,
            });
        }
        if !self.store.delete_category(id).await? {
            return Err(LifecycleError::NotFound(format!("category {id}")));
        }
        tracing::info!(category_id = %id, name = %category.name, "category deleted");
        Ok(())
    }

    pub async fn create_category(&self, name: &str) -> Result<InventoryCategory, LifecycleError> {
        let name = validate_category_name(name)?;
        let category = self.store.create_category(&name).await?;
        tracing::info!(category_id = %category.id, name = %category.name, "category created");
        Ok(category)
    }

    /// Recompute every counter from the items actually available and repair drift.
    #[instrument(skip(self), err)]
    pub async fn recount_categories(&self) -> Result<Vec<CountDrift>, LifecycleError> {
        let mut tx = self.store.begin().await?;
        let categories = tx.lock_categories().await?;
        let items = tx.available_items().await?;
        let drift = recount(&categories, &items);
        for d in &drift {
            tracing::warn!(
                category_id = %d.category_id,
                stored = d.stored,
                actual = d.actual,
                "repairing category counter"
            );
            tx.set_stock(d.category_id, d.actual).await?;
        }
        tx.commit().await?;
        Ok(drift)
    }

    pub async fn seller_dashboard(&self, seller_id: UserId) -> Result<SellerDashboard, LifecycleError> {
        let items = self.store.list_items(&ItemFilter::by_seller(seller_id)).await?;
        let pickup = awaiting_pickup(&items);
        Ok(SellerDashboard {
            payouts: self.rates.summarize(&items),
            pending_pickup_fee: self.fees.pickup_fee(pickup.iter().copied()),
            awaiting_pickup: pickup.iter().map(|i| i.id).collect(),
            awaiting_dropoff: awaiting_dropoff(&items).iter().map(|i| i.id).collect(),
            items,
        })
    }
}

/// In-person items that can still switch to pickup.
fn upgradable(items: &[InventoryItem]) -> Vec<&InventoryItem> {
    items
        .iter()
        .filter(|i| {
            i.collection_method == CollectionMethod::InPerson
                && matches!(i.status, ItemStatus::PendingValuation | ItemStatus::PendingLogistics)
        })
        .collect()
}

/// Whether the seller has anything a pickup upgrade would move.
pub fn has_upgradable_items(items: &[InventoryItem]) -> bool {
    !upgradable(items).is_empty()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    pub const SELLER: UserId = UserId::new(100);

    pub struct Harness {
        pub store: Arc<InMemoryStore>,
        pub notifier: Arc<RecordingNotifier>,
        pub lifecycle: Lifecycle,
        pub category: CategoryId,
    }

    impl Harness {
        pub async fn new() -> Self {
            Self::with_notifier(RecordingNotifier::new()).await
        }

        pub async fn with_notifier(notifier: RecordingNotifier) -> Self {
            let store = Arc::new(InMemoryStore::new(Duration::from_millis(500)));
            let notifier = Arc::new(notifier);
            let settings = SettingsService::new(store.clone(), true);
            let lifecycle = Lifecycle::new(
                store.clone(),
                NotificationDispatcher::new(notifier.clone()),
                settings,
                PayoutRates::default(),
                FeeSchedule::default(),
            );
            let category = lifecycle.create_category("Furniture").await.unwrap().id;
            store
                .ensure_seller(SELLER, "seller@campus.edu", Some("Sam"))
                .await
                .unwrap();
            Self {
                store,
                notifier,
                lifecycle,
                category,
            }
        }

        pub async fn submit(&self, method: CollectionMethod) -> InventoryItem {
            self.lifecycle
                .submit_item(NewItem {
                    category_id: self.category,
                    seller_id: Some(SELLER),
                    description: "Mini fridge".into(),
                    suggested_price: None,
                    collection_method: method,
                    created_at: Utc::now(),
                })
                .await
                .unwrap()
        }

        /// An in-person item taken all the way to `available` at $40.
        pub async fn live_item(&self) -> ItemId {
            let item = self.submit(CollectionMethod::InPerson).await;
            self.lifecycle
                .approve(item.id, Cents::from_dollars(40), false)
                .await
                .unwrap();
            self.lifecycle
                .confirm_dropoff(SELLER, item.id, DropoffPod::GreekRow)
                .await
                .unwrap();
            item.id
        }

        pub async fn count(&self) -> i64 {
            self.store
                .category(self.category)
                .await
                .unwrap()
                .unwrap()
                .count_in_stock
        }

        /// Wait for spawned notification tasks to drain.
        pub async fn settle_notifications(&self) {
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{Harness, SELLER};
    use super::*;

    #[tokio::test]
    async fn approval_reads_seller_standing_under_lock() {
        let h = Harness::new().await;
        let item = h.submit(CollectionMethod::Online).await;

        let err = h
            .lifecycle
            .approve(item.id, Cents::from_dollars(40), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Rejected(DomainError::Ineligible(_))));
        assert_eq!(
            h.store.item(item.id).await.unwrap().unwrap().status,
            ItemStatus::PendingValuation
        );

        h.lifecycle.mark_seller_paid(SELLER).await.unwrap();
        let outcome = h
            .lifecycle
            .approve(item.id, Cents::from_dollars(40), true)
            .await
            .unwrap();
        let approved = outcome.item().unwrap();
        assert_eq!(approved.status, ItemStatus::PendingLogistics);
        assert!(approved.is_large);
    }

    #[tokio::test]
    async fn going_live_and_removal_keep_counter_in_step() {
        let h = Harness::new().await;
        let id = h.live_item().await;
        assert_eq!(h.count().await, 1);

        let outcome = h.lifecycle.remove(id).await.unwrap();
        assert!(outcome.item().is_none());
        assert_eq!(h.count().await, 0);
        assert!(h.store.item(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_settlement_is_already_applied() {
        let h = Harness::new().await;
        let id = h.live_item().await;

        assert!(h.lifecycle.settle_sale(id).await.unwrap().is_applied());
        assert!(!h.lifecycle.settle_sale(id).await.unwrap().is_applied());
        assert_eq!(h.count().await, 0);

        h.settle_notifications().await;
        assert_eq!(h.notifier.sent_with_template("item_sold").len(), 1);
    }

    #[tokio::test]
    async fn reversal_restores_availability_and_counter() {
        let h = Harness::new().await;
        let id = h.live_item().await;
        h.lifecycle.settle_sale(id).await.unwrap();
        h.lifecycle.mark_payout_sent(id).await.unwrap();

        let outcome = h.lifecycle.reverse_sale(id).await.unwrap();
        let item = outcome.item().unwrap();
        assert_eq!(item.status, ItemStatus::Available);
        assert!(item.sold_at.is_none());
        assert!(!item.payout_sent);
        assert_eq!(h.count().await, 1);
    }

    #[tokio::test]
    async fn recategorizing_live_item_moves_counter() {
        let h = Harness::new().await;
        let id = h.live_item().await;
        let lamps = h.lifecycle.create_category("Lamps").await.unwrap();

        h.lifecycle.recategorize(id, lamps.id).await.unwrap();
        assert_eq!(h.count().await, 0);
        assert_eq!(h.store.category(lamps.id).await.unwrap().unwrap().count_in_stock, 1);

        let err = h
            .lifecycle
            .recategorize(id, CategoryId::new(999))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }

    #[tokio::test]
    async fn recount_repairs_drift() {
        let h = Harness::new().await;
        h.live_item().await;

        let mut tx = h.store.begin().await.unwrap();
        tx.lock_categories().await.unwrap();
        tx.set_stock(h.category, 7).await.unwrap();
        tx.commit().await.unwrap();

        let drift = h.lifecycle.recount_categories().await.unwrap();
        assert_eq!(
            drift,
            vec![CountDrift {
                category_id: h.category,
                stored: 7,
                actual: 1
            }]
        );
        assert_eq!(h.count().await, 1);
        assert!(h.lifecycle.recount_categories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_pickup_period_blocks_seller_submissions_only() {
        let h = Harness::new().await;
        h.lifecycle
            .settings()
            .set_pickup_period_active(false)
            .await
            .unwrap();

        let new = NewItem {
            category_id: h.category,
            seller_id: Some(SELLER),
            description: "Lamp".into(),
            suggested_price: None,
            collection_method: CollectionMethod::InPerson,
            created_at: Utc::now(),
        };
        assert!(matches!(
            h.lifecycle.submit_item(new.clone()).await,
            Err(LifecycleError::PickupPeriodClosed)
        ));

        let staff_entry = NewItem {
            seller_id: None,
            ..new
        };
        assert!(h.lifecycle.submit_item(staff_entry).await.is_ok());
    }

    #[tokio::test]
    async fn dashboard_sums_payouts_and_pickup_fee() {
        let h = Harness::new().await;
        h.lifecycle.mark_seller_paid(SELLER).await.unwrap();
        let live = h.live_item().await;
        h.lifecycle.settle_sale(live).await.unwrap();

        let online = h.submit(CollectionMethod::Online).await;
        h.lifecycle
            .approve(online.id, Cents::from_dollars(100), true)
            .await
            .unwrap();

        let dash = h.lifecycle.seller_dashboard(SELLER).await.unwrap();
        assert_eq!(dash.items.len(), 2);
        assert_eq!(dash.awaiting_pickup, vec![online.id]);
        assert_eq!(dash.pending_pickup_fee, Cents::from_dollars(25));
        assert_eq!(dash.payouts.pending, Cents::new(1_320));
        assert_eq!(dash.payouts.estimated, Cents::from_dollars(50));
    }

    #[tokio::test]
    async fn upgrade_moves_pending_in_person_items_to_pickup() {
        let h = Harness::new().await;
        let pending = h.submit(CollectionMethod::InPerson).await;
        let approved = h.submit(CollectionMethod::InPerson).await;
        h.lifecycle
            .approve(approved.id, Cents::from_dollars(20), false)
            .await
            .unwrap();
        let live = h.live_item().await;
        {
            let mut tx = h.store.begin().await.unwrap();
            let mut seller = tx.lock_seller(SELLER).await.unwrap().unwrap();
            seller.payment_declined = true;
            tx.update_seller(&seller).await.unwrap();
            tx.commit().await.unwrap();
        }

        let (report, seller_changed) = h.lifecycle.upgrade_to_pickup(SELLER).await.unwrap();
        assert!(seller_changed);
        assert_eq!(report.applied, vec![pending.id, approved.id]);
        assert!(report.failed.is_empty());

        for id in [pending.id, approved.id] {
            let item = h.store.item(id).await.unwrap().unwrap();
            assert_eq!(item.collection_method, CollectionMethod::Online);
        }
        let live = h.store.item(live).await.unwrap().unwrap();
        assert_eq!(live.collection_method, CollectionMethod::InPerson);
        assert_eq!(h.count().await, 1);

        let seller = h.store.seller(SELLER).await.unwrap().unwrap();
        assert!(seller.has_paid);
        assert!(!seller.payment_declined);

        let (replay, changed) = h.lifecycle.upgrade_to_pickup(SELLER).await.unwrap();
        assert!(!changed);
        assert!(replay.applied.is_empty());
    }

    #[tokio::test]
    async fn payout_details_are_cleaned_and_saved() {
        let h = Harness::new().await;
        assert!(h
            .lifecycle
            .update_payout(SELLER, PayoutMethod::Venmo, "@sam-k")
            .await
            .unwrap());
        let seller = h.store.seller(SELLER).await.unwrap().unwrap();
        assert_eq!(seller.payout_method.as_deref(), Some("Venmo"));
        assert_eq!(seller.payout_handle.as_deref(), Some("sam-k"));
        assert!(seller.is_seller);

        assert!(matches!(
            h.lifecycle.update_payout(SELLER, PayoutMethod::PayPal, "  ").await,
            Err(LifecycleError::Rejected(DomainError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn removing_a_seller_releases_their_live_items() {
        let h = Harness::new().await;
        h.live_item().await;
        h.live_item().await;
        let sold = h.live_item().await;
        h.lifecycle.settle_sale(sold).await.unwrap();
        h.submit(CollectionMethod::Online).await;
        assert_eq!(h.count().await, 2);

        let staff = UserId::new(1);
        assert!(matches!(
            h.lifecycle.remove_seller(SELLER, SELLER).await,
            Err(LifecycleError::Rejected(DomainError::Validation(_)))
        ));

        assert_eq!(h.lifecycle.remove_seller(staff, SELLER).await.unwrap(), 4);
        assert_eq!(h.count().await, 0);
        assert!(h.store.seller(SELLER).await.unwrap().is_none());
        assert!(h
            .store
            .list_items(&ItemFilter::by_seller(SELLER))
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            h.lifecycle.remove_seller(staff, SELLER).await,
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn category_delete_refused_while_items_reference_it() {
        let h = Harness::new().await;
        let item = h.submit(CollectionMethod::InPerson).await;

        match h.lifecycle.delete_category(h.category).await {
            Err(LifecycleError::CategoryInUse { name, items }) => {
                assert_eq!(name, "Furniture");
                assert_eq!(items, 1);
            }
            other => panic!("expected CategoryInUse, got {other:?}"),
        }

        h.lifecycle.remove(item.id).await.unwrap();
        h.lifecycle.delete_category(h.category).await.unwrap();
        assert!(h.store.category(h.category).await.unwrap().is_none());
        assert!(matches!(
            h.lifecycle.delete_category(h.category).await,
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn seller_updates_report_whether_anything_changed() {
        let h = Harness::new().await;
        assert!(h.lifecycle.activate_seller(SELLER).await.unwrap());
        assert!(!h.lifecycle.activate_seller(SELLER).await.unwrap());
        assert!(h.lifecycle.save_payment_method(SELLER, "pm_1", Some("cus_1")).await.unwrap());
        assert!(!h.lifecycle.save_payment_method(SELLER, "pm_1", None).await.unwrap());

        let missing = h.lifecycle.mark_seller_paid(UserId::new(9)).await.unwrap_err();
        assert!(matches!(missing, LifecycleError::NotFound(_)));
    }
}
