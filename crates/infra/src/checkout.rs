//! Checkout session creation.
//!
//! This is the only place checkout metadata is authored. Purchases check the
//! item under its row lock before a session is created; the lock is released
//! as soon as the session exists, since the sale itself is settled later by
//! the reconciler.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use dormswap_core::{Cents, DomainError, ItemId, UserId};
use dormswap_inventory::logistics::awaiting_pickup;
use dormswap_inventory::PickupWeek;
use dormswap_payments::{
    CheckoutMetadata, CheckoutRequest, CreatedSession, LineItem, PaymentProvider, ProviderError,
    SESSION_ID_PLACEHOLDER,
};

use crate::lifecycle::{Lifecycle, has_upgradable_items};
use crate::store::{CheckoutRecord, CheckoutState, ItemFilter, StoreError};

pub const ITEM_SUCCESS_PATH: &str = "/checkout/success";
pub const PICKUP_SUCCESS_PATH: &str = "/seller/confirm-pickup/success";
pub const ACTIVATION_SUCCESS_PATH: &str = "/seller/activate/success";
pub const UPGRADE_SUCCESS_PATH: &str = "/seller/upgrade/success";

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{0} not found")]
    NotFound(String),

    /// The item cannot be bought right now (already sold, not yet live).
    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Rejected(#[from] DomainError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CheckoutError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CheckoutError::Provider(e) => e.is_retryable(),
            CheckoutError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    lifecycle: Lifecycle,
    provider: Arc<dyn PaymentProvider>,
    activation_fee: Cents,
    public_base_url: String,
}

impl core::fmt::Debug for CheckoutService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CheckoutService")
            .field("activation_fee", &self.activation_fee)
            .field("public_base_url", &self.public_base_url)
            .finish_non_exhaustive()
    }
}

impl CheckoutService {
    pub fn new(
        lifecycle: Lifecycle,
        provider: Arc<dyn PaymentProvider>,
        activation_fee: Cents,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            lifecycle,
            provider,
            activation_fee,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.public_base_url)
    }

    fn success_url(&self, path: &str) -> String {
        self.url(&format!("{path}?session_id={SESSION_ID_PLACEHOLDER}"))
    }

    /// Record a created session in the checkout ledger.
    async fn track(&self, created: &CreatedSession, metadata: CheckoutMetadata) {
        let record = CheckoutRecord {
            session_id: created.id.clone(),
            metadata,
            state: CheckoutState::Open,
            created_at: Utc::now(),
        };
        if let Err(e) = self.lifecycle.store().record_checkout(&record).await {
            // The webhook still settles an untracked session; only the sweep misses it.
            tracing::warn!(session_id = %created.id, error = %e, "checkout ledger write failed");
        }
    }

    /// Start a purchase. The item must be `available` with a positive price at lock time.
    #[instrument(skip(self, buyer_email), fields(item_id = %item_id), err)]
    pub async fn begin_purchase(
        &self,
        item_id: ItemId,
        buyer_email: Option<String>,
    ) -> Result<CreatedSession, CheckoutError> {
        let store = self.lifecycle.store();
        let mut tx = store.begin().await?;
        let item = tx
            .lock_item(item_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("item {item_id}")))?;

        if !item.is_available() {
            tx.rollback().await?;
            tracing::info!(item_id = %item_id, status = %item.status, "purchase refused: item not available");
            return Err(CheckoutError::Unavailable(format!(
                "item {item_id} is no longer available"
            )));
        }
        let price = match item.price {
            Some(p) if p.is_positive() => p,
            _ => {
                tx.rollback().await?;
                return Err(DomainError::ineligible("item has no sale price").into());
            }
        };

        let metadata = CheckoutMetadata::ItemPurchase { item_id };
        let request = CheckoutRequest {
            line_items: vec![LineItem {
                name: item.description.clone(),
                unit_amount: price,
                quantity: 1,
            }],
            metadata: metadata.clone(),
            success_url: self.success_url(ITEM_SUCCESS_PATH),
            cancel_url: self.url(&format!("/items/{item_id}")),
            customer_email: buyer_email,
        };
        let created = self.provider.create_checkout_session(request).await?;
        tx.rollback().await?;

        tracing::info!(item_id = %item_id, session_id = %created.id, %price, "purchase checkout created");
        self.track(&created, metadata).await;
        Ok(created)
    }

    /// Start the paid pickup confirmation for a seller's online items.
    ///
    /// `item_ids` narrows the batch; empty means every item awaiting pickup.
    #[instrument(skip(self, item_ids, seller_email), fields(seller_id = %seller_id, week = %week), err)]
    pub async fn begin_pickup_checkout(
        &self,
        seller_id: UserId,
        item_ids: &[ItemId],
        week: PickupWeek,
        seller_email: Option<String>,
    ) -> Result<CreatedSession, CheckoutError> {
        let items = self
            .lifecycle
            .store()
            .list_items(&ItemFilter::by_seller(seller_id))
            .await?;
        let batch: Vec<_> = awaiting_pickup(&items)
            .into_iter()
            .filter(|i| item_ids.is_empty() || item_ids.contains(&i.id))
            .collect();
        if batch.is_empty() {
            return Err(DomainError::ineligible("no approved online items are awaiting pickup").into());
        }

        let fees = self.lifecycle.fees();
        let large = batch.iter().filter(|i| i.is_large).count();
        let mut line_items = vec![LineItem {
            name: format!("Pickup service fee ({})", week.label()),
            unit_amount: fees.service_fee,
            quantity: 1,
        }];
        if large > 0 {
            line_items.push(LineItem {
                name: "Large item surcharge".into(),
                unit_amount: fees.large_item_fee,
                quantity: u32::try_from(large).unwrap_or(u32::MAX),
            });
        }

        let metadata = CheckoutMetadata::ConfirmPickup {
            item_ids: batch.iter().map(|i| i.id).collect(),
            pickup_week: week,
            user_id: seller_id,
        };
        let request = CheckoutRequest {
            line_items,
            metadata: metadata.clone(),
            success_url: self.success_url(PICKUP_SUCCESS_PATH),
            cancel_url: self.url("/seller/dashboard"),
            customer_email: seller_email,
        };
        let total = request.total();
        let created = self.provider.create_checkout_session(request).await?;

        tracing::info!(session_id = %created.id, items = batch.len(), fee = %total, "pickup checkout created");
        self.track(&created, metadata).await;
        Ok(created)
    }

    /// Start seller activation. `None` when the seller is already active.
    #[instrument(skip(self), fields(seller_id = %seller_id), err)]
    pub async fn begin_seller_activation(
        &self,
        seller_id: UserId,
    ) -> Result<Option<CreatedSession>, CheckoutError> {
        let seller = self
            .lifecycle
            .store()
            .seller(seller_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("user {seller_id}")))?;
        if seller.is_seller && seller.has_paid {
            return Ok(None);
        }

        let metadata = CheckoutMetadata::SellerActivation { user_id: seller_id };
        let request = CheckoutRequest {
            line_items: vec![LineItem {
                name: "Seller activation".into(),
                unit_amount: self.activation_fee,
                quantity: 1,
            }],
            metadata: metadata.clone(),
            success_url: self.success_url(ACTIVATION_SUCCESS_PATH),
            cancel_url: self.url("/seller/dashboard"),
            customer_email: Some(seller.email.clone()),
        };
        let created = self.provider.create_checkout_session(request).await?;

        tracing::info!(session_id = %created.id, "seller activation checkout created");
        self.track(&created, metadata).await;
        Ok(Some(created))
    }

    /// Start the paid upgrade that moves the seller's in-person items onto the pickup route.
    #[instrument(skip(self), fields(seller_id = %seller_id), err)]
    pub async fn begin_upgrade(&self, seller_id: UserId) -> Result<CreatedSession, CheckoutError> {
        let store = self.lifecycle.store();
        let seller = store
            .seller(seller_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("user {seller_id}")))?;
        let items = store.list_items(&ItemFilter::by_seller(seller_id)).await?;
        if !has_upgradable_items(&items) {
            return Err(DomainError::ineligible("no in-person items are waiting for drop-off").into());
        }

        let metadata = CheckoutMetadata::Upgrade { user_id: seller_id };
        let request = CheckoutRequest {
            line_items: vec![LineItem {
                name: "Pickup upgrade service fee".into(),
                unit_amount: self.lifecycle.fees().service_fee,
                quantity: 1,
            }],
            metadata: metadata.clone(),
            success_url: self.success_url(UPGRADE_SUCCESS_PATH),
            cancel_url: self.url("/seller/dashboard"),
            customer_email: Some(seller.email.clone()),
        };
        let created = self.provider.create_checkout_session(request).await?;

        tracing::info!(session_id = %created.id, "pickup upgrade checkout created");
        self.track(&created, metadata).await;
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::{Harness, SELLER};
    use crate::store::MarketStore;
    use dormswap_inventory::CollectionMethod;
    use dormswap_payments::InMemoryProvider;

    fn service(h: &Harness, provider: Arc<InMemoryProvider>) -> CheckoutService {
        CheckoutService::new(
            h.lifecycle.clone(),
            provider,
            Cents::from_dollars(15),
            "http://shop.test/",
        )
    }

    #[tokio::test]
    async fn purchase_session_carries_item_metadata_and_is_tracked() {
        let h = Harness::new().await;
        let provider = Arc::new(InMemoryProvider::new());
        let checkout = service(&h, provider.clone());
        let id = h.live_item().await;

        let created = checkout.begin_purchase(id, None).await.unwrap();
        let recorded = provider.session(&created.id).unwrap();
        assert_eq!(recorded.request.metadata, CheckoutMetadata::ItemPurchase { item_id: id });
        assert_eq!(recorded.request.total(), Cents::from_dollars(40));
        assert_eq!(
            recorded.request.success_url,
            "http://shop.test/checkout/success?session_id={CHECKOUT_SESSION_ID}"
        );

        let ledger = h.store.checkout(&created.id).await.unwrap().unwrap();
        assert_eq!(ledger.state, CheckoutState::Open);
    }

    #[tokio::test]
    async fn purchase_of_unavailable_item_is_refused() {
        let h = Harness::new().await;
        let checkout = service(&h, Arc::new(InMemoryProvider::new()));
        let pending = h.submit(CollectionMethod::InPerson).await;

        assert!(matches!(
            checkout.begin_purchase(pending.id, None).await,
            Err(CheckoutError::Unavailable(_))
        ));
        assert!(matches!(
            checkout.begin_purchase(ItemId::new(404), None).await,
            Err(CheckoutError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn pickup_fee_includes_oversize_surcharge() {
        let h = Harness::new().await;
        let provider = Arc::new(InMemoryProvider::new());
        let checkout = service(&h, provider.clone());
        h.lifecycle.mark_seller_paid(SELLER).await.unwrap();
        for large in [true, false, true] {
            let item = h.submit(CollectionMethod::Online).await;
            h.lifecycle
                .approve(item.id, Cents::from_dollars(20), large)
                .await
                .unwrap();
        }

        let created = checkout
            .begin_pickup_checkout(SELLER, &[], PickupWeek::Week1, None)
            .await
            .unwrap();
        let request = provider.session(&created.id).unwrap().request;
        assert_eq!(request.total(), Cents::from_dollars(35));
        match request.metadata {
            CheckoutMetadata::ConfirmPickup { item_ids, pickup_week, user_id } => {
                assert_eq!(item_ids.len(), 3);
                assert_eq!(pickup_week, PickupWeek::Week1);
                assert_eq!(user_id, SELLER);
            }
            other => panic!("unexpected metadata {other:?}"),
        }
    }

    #[tokio::test]
    async fn pickup_checkout_without_items_is_rejected() {
        let h = Harness::new().await;
        let checkout = service(&h, Arc::new(InMemoryProvider::new()));
        assert!(matches!(
            checkout
                .begin_pickup_checkout(SELLER, &[], PickupWeek::Week2, None)
                .await,
            Err(CheckoutError::Rejected(DomainError::Ineligible(_)))
        ));
    }

    #[tokio::test]
    async fn upgrade_charges_service_fee_once_in_person_items_wait() {
        let h = Harness::new().await;
        let provider = Arc::new(InMemoryProvider::new());
        let checkout = service(&h, provider.clone());
        assert!(matches!(
            checkout.begin_upgrade(SELLER).await,
            Err(CheckoutError::Rejected(DomainError::Ineligible(_)))
        ));

        h.submit(CollectionMethod::InPerson).await;
        let created = checkout.begin_upgrade(SELLER).await.unwrap();
        let request = provider.session(&created.id).unwrap().request;
        assert_eq!(request.metadata, CheckoutMetadata::Upgrade { user_id: SELLER });
        assert_eq!(request.total(), h.lifecycle.fees().service_fee);
        assert!(request.success_url.starts_with("http://shop.test/seller/upgrade/success?"));
    }

    #[tokio::test]
    async fn active_seller_needs_no_activation_checkout() {
        let h = Harness::new().await;
        let checkout = service(&h, Arc::new(InMemoryProvider::new()));
        assert!(checkout.begin_seller_activation(SELLER).await.unwrap().is_some());

        h.lifecycle.activate_seller(SELLER).await.unwrap();
        assert!(checkout.begin_seller_activation(SELLER).await.unwrap().is_none());
    }
}
