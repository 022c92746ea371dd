//! Payment reconciliation.
//!
//! Two paths deliver the same authorization: the provider's webhook (push)
//! and the success page re-fetching the session (pull). Both end in
//! [`PaymentReconciler::reconcile`], which maps a paid session to exactly one
//! lifecycle operation. Those operations are idempotent, so delivery order and
//! duplicates do not matter: the first path to take the item lock applies the
//! transition and every later one observes `AlreadyApplied`.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use dormswap_core::{ItemId, UserId};
use dormswap_inventory::PickupWeek;
use dormswap_payments::{
    CheckoutMetadata, CheckoutSession, EventParseError, MetadataError, PaymentProvider,
    ProviderError, ProviderEvent, ProviderEventKind, SetupIntent, SignatureError, WebhookVerifier,
};

use crate::lifecycle::{BatchReport, Lifecycle, LifecycleError, TransitionOutcome};
use crate::store::CheckoutState;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("webhook signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Malformed(#[from] EventParseError),

    #[error("checkout metadata rejected: {0}")]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("checkout session {0} belongs to another account")]
    NotOwner(String),
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Provider(e) => e.is_retryable(),
            ReconcileError::Lifecycle(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// The one operation a verified payment authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    ItemPurchase {
        item_id: ItemId,
    },
    ConfirmPickup {
        seller_id: UserId,
        item_ids: Vec<ItemId>,
        week: PickupWeek,
    },
    SellerActivation {
        seller_id: UserId,
    },
    PickupUpgrade {
        seller_id: UserId,
    },
    PaymentMethodSaved {
        seller_id: UserId,
        payment_method: String,
        customer: Option<String>,
    },
}

impl From<CheckoutMetadata> for Authorization {
    fn from(metadata: CheckoutMetadata) -> Self {
        match metadata {
            CheckoutMetadata::ItemPurchase { item_id } => Authorization::ItemPurchase { item_id },
            CheckoutMetadata::ConfirmPickup {
                item_ids,
                pickup_week,
                user_id,
            } => Authorization::ConfirmPickup {
                seller_id: user_id,
                item_ids,
                week: pickup_week,
            },
            CheckoutMetadata::SellerActivation { user_id } => {
                Authorization::SellerActivation { seller_id: user_id }
            }
            CheckoutMetadata::Upgrade { user_id } => {
                Authorization::PickupUpgrade { seller_id: user_id }
            }
        }
    }
}

impl Authorization {
    fn kind(&self) -> &'static str {
        match self {
            Authorization::ItemPurchase { .. } => "item_purchase",
            Authorization::ConfirmPickup { .. } => "confirm_pickup",
            Authorization::SellerActivation { .. } => "seller_activation",
            Authorization::PickupUpgrade { .. } => "pickup_upgrade",
            Authorization::PaymentMethodSaved { .. } => "payment_method_saved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileReport {
    Applied,
    /// A previous delivery (or the other path) already applied it.
    AlreadyApplied,
    /// Acknowledged without effect (unpaid session, unknown event, vanished item).
    Ignored(String),
    /// Some items of a batch could not be confirmed.
    Partial {
        applied: usize,
        already_applied: usize,
        failed: usize,
        retryable: bool,
    },
}

impl ReconcileReport {
    /// Whether the provider should deliver again.
    pub fn wants_redelivery(&self) -> bool {
        matches!(self, ReconcileReport::Partial { retryable: true, .. })
    }
}

#[derive(Clone)]
pub struct PaymentReconciler {
    lifecycle: Lifecycle,
    provider: Arc<dyn PaymentProvider>,
    verifier: WebhookVerifier,
}

impl core::fmt::Debug for PaymentReconciler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PaymentReconciler")
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

impl PaymentReconciler {
    pub fn new(
        lifecycle: Lifecycle,
        provider: Arc<dyn PaymentProvider>,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            lifecycle,
            provider,
            verifier,
        }
    }

    /// Push path: a raw webhook body with its signature header.
    ///
    /// Nothing in the body is read before the signature checks out.
    #[instrument(skip_all, err)]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileReport, ReconcileError> {
        if let Err(e) = self.verifier.verify(payload, signature, Utc::now()) {
            tracing::warn!(error = %e, "webhook signature verification failed");
            return Err(e.into());
        }

        let event = ProviderEvent::parse(payload)?;
        tracing::info!(event_id = %event.id, event_type = event.event_type(), "webhook received");

        match event.kind {
            ProviderEventKind::CheckoutSessionCompleted(session) => self.reconcile(&session).await,
            ProviderEventKind::SetupIntentSucceeded(intent) => self.setup_intent(intent).await,
            ProviderEventKind::Other(event_type) => {
                tracing::debug!(%event_type, "webhook event not handled");
                Ok(ReconcileReport::Ignored(format!("event type '{event_type}' not handled")))
            }
        }
    }

    /// Pull path: re-fetch the session from the provider and reconcile it.
    #[instrument(skip(self), err)]
    pub async fn reconcile_session(
        &self,
        session_id: &str,
    ) -> Result<(CheckoutSession, ReconcileReport), ReconcileError> {
        let session = self.provider.retrieve_session(session_id).await?;
        let report = self.reconcile(&session).await?;
        Ok((session, report))
    }

    /// Pull path for a seller's own session: nothing is applied unless the
    /// session's metadata names `owner`.
    #[instrument(skip(self), err)]
    pub async fn reconcile_owned_session(
        &self,
        session_id: &str,
        owner: UserId,
    ) -> Result<(CheckoutSession, ReconcileReport), ReconcileError> {
        let session = self.provider.retrieve_session(session_id).await?;
        let metadata = CheckoutMetadata::from_map(&session.metadata)?;
        if metadata.user_id() != Some(owner) {
            tracing::warn!(session_id = %session.id, user_id = %owner, "success page for another account's session");
            return Err(ReconcileError::NotOwner(session.id));
        }
        let report = self.reconcile(&session).await?;
        Ok((session, report))
    }

    /// Apply whatever a checkout session authorizes, if it is paid.
    pub async fn reconcile(
        &self,
        session: &CheckoutSession,
    ) -> Result<ReconcileReport, ReconcileError> {
        if !session.is_settled() {
            tracing::info!(session_id = %session.id, status = ?session.status, "session not paid; nothing to apply");
            return Ok(ReconcileReport::Ignored(format!(
                "session {} is not paid",
                session.id
            )));
        }

        let metadata = CheckoutMetadata::from_map(&session.metadata).inspect_err(|e| {
            tracing::warn!(session_id = %session.id, error = %e, "session metadata rejected");
        })?;
        let report = self.apply(metadata.into()).await?;

        if !report.wants_redelivery() {
            if let Err(e) = self
                .lifecycle
                .store()
                .set_checkout_state(&session.id, CheckoutState::Settled)
                .await
            {
                tracing::warn!(session_id = %session.id, error = %e, "checkout ledger update failed");
            }
        }
        Ok(report)
    }

    async fn setup_intent(&self, intent: SetupIntent) -> Result<ReconcileReport, ReconcileError> {
        let (Some(seller_id), Some(payment_method)) = (intent.user_id(), intent.payment_method.clone())
        else {
            tracing::info!(setup_intent = %intent.id, "setup intent without user or payment method");
            return Ok(ReconcileReport::Ignored(format!(
                "setup intent {} carries no user or payment method",
                intent.id
            )));
        };
        self.apply(Authorization::PaymentMethodSaved {
            seller_id,
            payment_method,
            customer: intent.customer,
        })
        .await
    }

    /// Run the lifecycle operation for one authorization.
    pub async fn apply(&self, auth: Authorization) -> Result<ReconcileReport, ReconcileError> {
        let kind = auth.kind();
        let result = match auth {
            Authorization::ItemPurchase { item_id } => {
                match self.lifecycle.settle_sale(item_id).await {
                    Ok(TransitionOutcome::Applied(_)) => Ok(ReconcileReport::Applied),
                    Ok(TransitionOutcome::AlreadyApplied(_)) => Ok(ReconcileReport::AlreadyApplied),
                    Err(LifecycleError::Rejected(e)) => {
                        tracing::error!(item_id = %item_id, error = %e, "paid purchase could not settle");
                        Ok(ReconcileReport::Ignored(format!("item {item_id}: {e}")))
                    }
                    Err(e) => Err(e),
                }
            }
            Authorization::ConfirmPickup {
                seller_id,
                item_ids,
                week,
            } => self
                .lifecycle
                .confirm_pickup_batch(seller_id, &item_ids, week)
                .await
                .map(|report| batch(&report, false)),
            Authorization::SellerActivation { seller_id } => {
                self.lifecycle.activate_seller(seller_id).await.map(changed)
            }
            Authorization::PickupUpgrade { seller_id } => self
                .lifecycle
                .upgrade_to_pickup(seller_id)
                .await
                .map(|(report, seller_changed)| batch(&report, seller_changed)),
            Authorization::PaymentMethodSaved {
                seller_id,
                payment_method,
                customer,
            } => self
                .lifecycle
                .save_payment_method(seller_id, &payment_method, customer.as_deref())
                .await
                .map(changed),
        };

        match result {
            Ok(report) => {
                tracing::info!(authorization = kind, report = ?report, "payment reconciled");
                Ok(report)
            }
            Err(LifecycleError::NotFound(what)) => {
                tracing::warn!(authorization = kind, %what, "payment references a missing record");
                Ok(ReconcileReport::Ignored(format!("{what} not found")))
            }
            Err(e) => {
                tracing::error!(authorization = kind, error = %e, "payment reconciliation failed");
                Err(e.into())
            }
        }
    }
}

fn batch(report: &BatchReport, seller_changed: bool) -> ReconcileReport {
    if !report.failed.is_empty() {
        return ReconcileReport::Partial {
            applied: report.applied.len(),
            already_applied: report.already_applied.len(),
            failed: report.failed.len(),
            retryable: report.has_retryable_failure(),
        };
    }
    changed(seller_changed || !report.applied.is_empty())
}

fn changed(changed: bool) -> ReconcileReport {
    if changed {
        ReconcileReport::Applied
    } else {
        ReconcileReport::AlreadyApplied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::{Harness, SELLER};
    use crate::checkout::CheckoutService;
    use crate::store::MarketStore;
    use dormswap_core::Cents;
    use dormswap_inventory::{CollectionMethod, ItemStatus};
    use dormswap_payments::{InMemoryProvider, PaymentStatus, SessionStatus};
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn reconciler(h: &Harness, provider: Arc<InMemoryProvider>) -> PaymentReconciler {
        PaymentReconciler::new(h.lifecycle.clone(), provider, WebhookVerifier::new(SECRET, 300))
    }

    fn paid_session(metadata: &CheckoutMetadata) -> CheckoutSession {
        CheckoutSession {
            id: "cs_test_1".into(),
            status: SessionStatus::Complete,
            payment_status: PaymentStatus::Paid,
            metadata: metadata.to_map(),
            customer: None,
            url: None,
        }
    }

    fn signed(body: &serde_json::Value) -> (Vec<u8>, String) {
        let payload = serde_json::to_vec(body).unwrap();
        let header = WebhookVerifier::new(SECRET, 300).sign(&payload, Utc::now().timestamp());
        (payload, header)
    }

    #[tokio::test]
    async fn bad_signature_changes_nothing() {
        let h = Harness::new().await;
        let r = reconciler(&h, Arc::new(InMemoryProvider::new()));
        let id = h.live_item().await;

        let body = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": paid_session(&CheckoutMetadata::ItemPurchase { item_id: id }) },
        });
        let (payload, _) = signed(&body);
        let forged = WebhookVerifier::new("wrong", 300).sign(&payload, Utc::now().timestamp());

        let err = r.handle_webhook(&payload, Some(forged.as_str())).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Signature(SignatureError::Mismatch)));
        assert!(matches!(
            r.handle_webhook(&payload, None).await,
            Err(ReconcileError::Signature(SignatureError::MissingHeader))
        ));
        assert_eq!(h.store.item(id).await.unwrap().unwrap().status, ItemStatus::Available);
    }

    #[tokio::test]
    async fn unpaid_session_is_ignored() {
        let h = Harness::new().await;
        let r = reconciler(&h, Arc::new(InMemoryProvider::new()));
        let id = h.live_item().await;
        let mut session = paid_session(&CheckoutMetadata::ItemPurchase { item_id: id });
        session.payment_status = PaymentStatus::Unpaid;

        assert!(matches!(r.reconcile(&session).await.unwrap(), ReconcileReport::Ignored(_)));
        assert_eq!(h.count().await, 1);
    }

    #[tokio::test]
    async fn malformed_metadata_is_rejected() {
        let h = Harness::new().await;
        let r = reconciler(&h, Arc::new(InMemoryProvider::new()));
        let mut session = paid_session(&CheckoutMetadata::SellerActivation { user_id: SELLER });
        session.metadata.remove("user_id");

        assert!(matches!(
            r.reconcile(&session).await,
            Err(ReconcileError::Metadata(MetadataError::MissingField("user_id")))
        ));
    }

    #[tokio::test]
    async fn missing_item_is_acknowledged() {
        let h = Harness::new().await;
        let r = reconciler(&h, Arc::new(InMemoryProvider::new()));
        let session = paid_session(&CheckoutMetadata::ItemPurchase { item_id: ItemId::new(77) });
        assert!(matches!(r.reconcile(&session).await.unwrap(), ReconcileReport::Ignored(_)));
    }

    #[tokio::test]
    async fn setup_intent_saves_payment_method_and_clears_decline() {
        let h = Harness::new().await;
        let r = reconciler(&h, Arc::new(InMemoryProvider::new()));
        {
            let mut tx = h.store.begin().await.unwrap();
            let mut seller = tx.lock_seller(SELLER).await.unwrap().unwrap();
            seller.payment_declined = true;
            tx.update_seller(&seller).await.unwrap();
            tx.commit().await.unwrap();
        }

        let body = json!({
            "id": "evt_si",
            "type": "setup_intent.succeeded",
            "data": { "object": {
                "id": "seti_1",
                "payment_method": "pm_card",
                "customer": "cus_9",
                "metadata": { "user_id": SELLER.to_string() },
            }},
        });
        let (payload, header) = signed(&body);
        assert_eq!(
            r.handle_webhook(&payload, Some(header.as_str())).await.unwrap(),
            ReconcileReport::Applied
        );
        assert_eq!(
            r.handle_webhook(&payload, Some(header.as_str())).await.unwrap(),
            ReconcileReport::AlreadyApplied
        );

        let seller = h.store.seller(SELLER).await.unwrap().unwrap();
        assert_eq!(seller.stripe_payment_method_id.as_deref(), Some("pm_card"));
        assert_eq!(seller.stripe_customer_id.as_deref(), Some("cus_9"));
        assert!(!seller.payment_declined);
    }

    #[tokio::test]
    async fn seller_activation_marks_seller_enabled() {
        let h = Harness::new().await;
        let r = reconciler(&h, Arc::new(InMemoryProvider::new()));
        let session = paid_session(&CheckoutMetadata::SellerActivation { user_id: SELLER });

        assert_eq!(r.reconcile(&session).await.unwrap(), ReconcileReport::Applied);
        assert_eq!(r.reconcile(&session).await.unwrap(), ReconcileReport::AlreadyApplied);
        let seller = h.store.seller(SELLER).await.unwrap().unwrap();
        assert!(seller.is_seller && seller.has_paid);
    }

    #[tokio::test]
    async fn upgrade_webhook_switches_items_and_replays_cleanly() {
        let h = Harness::new().await;
        let r = reconciler(&h, Arc::new(InMemoryProvider::new()));
        let item = h.submit(CollectionMethod::InPerson).await;

        let body = json!({
            "id": "evt_up",
            "type": "checkout.session.completed",
            "data": { "object": paid_session(&CheckoutMetadata::Upgrade { user_id: SELLER }) },
        });
        let (payload, header) = signed(&body);
        assert_eq!(
            r.handle_webhook(&payload, Some(header.as_str())).await.unwrap(),
            ReconcileReport::Applied
        );
        assert_eq!(
            r.handle_webhook(&payload, Some(header.as_str())).await.unwrap(),
            ReconcileReport::AlreadyApplied
        );

        let item = h.store.item(item.id).await.unwrap().unwrap();
        assert_eq!(item.collection_method, CollectionMethod::Online);
        assert!(h.store.seller(SELLER).await.unwrap().unwrap().has_paid);
    }

    #[tokio::test]
    async fn owned_session_checks_owner_before_applying() {
        let h = Harness::new().await;
        let provider = Arc::new(InMemoryProvider::new());
        let r = reconciler(&h, provider.clone());
        let checkout = CheckoutService::new(
            h.lifecycle.clone(),
            provider.clone(),
            Cents::from_dollars(15),
            "http://shop.test",
        );
        let created = checkout.begin_seller_activation(SELLER).await.unwrap().unwrap();
        provider.complete(&created.id).unwrap();

        let err = r
            .reconcile_owned_session(&created.id, UserId::new(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::NotOwner(_)));
        assert!(!h.store.seller(SELLER).await.unwrap().unwrap().has_paid);

        let (session, report) = r.reconcile_owned_session(&created.id, SELLER).await.unwrap();
        assert!(session.is_settled());
        assert_eq!(report, ReconcileReport::Applied);
    }

    #[tokio::test]
    async fn unknown_event_types_are_acknowledged() {
        let h = Harness::new().await;
        let r = reconciler(&h, Arc::new(InMemoryProvider::new()));
        let (payload, header) = signed(&json!({ "id": "evt_x", "type": "charge.refunded" }));
        assert!(matches!(
            r.handle_webhook(&payload, Some(header.as_str())).await.unwrap(),
            ReconcileReport::Ignored(_)
        ));
    }
}
