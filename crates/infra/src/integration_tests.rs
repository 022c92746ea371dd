//! Integration tests for the purchase, reconciliation and logistics paths.
//!
//! Tests: checkout → provider → webhook / success page → lifecycle → store
//!
//! Verifies:
//! - Concurrent buyers and duplicate deliveries settle an item exactly once
//! - Category counters always match the items actually available
//! - Batch confirmations isolate per-item failures
//! - Failed commits and failed notifications behave as documented

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use dormswap_core::{Cents, ItemId};
    use dormswap_inventory::{CollectionMethod, InventoryItem, ItemStatus, PickupWeek, recount};
    use dormswap_payments::{CreatedSession, InMemoryProvider, WebhookVerifier};

    use crate::checkout::{CheckoutError, CheckoutService};
    use crate::lifecycle::test_support::{Harness, SELLER};
    use crate::lifecycle::LifecycleError;
    use crate::notify::RecordingNotifier;
    use crate::reconciler::{PaymentReconciler, ReconcileReport};
    use crate::store::{ItemFilter, MarketStore};

    const SECRET: &str = "whsec_integration";

    struct World {
        h: Harness,
        provider: Arc<InMemoryProvider>,
        checkout: CheckoutService,
        reconciler: PaymentReconciler,
    }

    impl World {
        async fn new() -> Self {
            Self::with(Harness::new().await)
        }

        fn with(h: Harness) -> Self {
            let provider = Arc::new(InMemoryProvider::new());
            let checkout = CheckoutService::new(
                h.lifecycle.clone(),
                provider.clone(),
                Cents::from_dollars(15),
                "http://shop.test",
            );
            let reconciler = PaymentReconciler::new(
                h.lifecycle.clone(),
                provider.clone(),
                WebhookVerifier::new(SECRET, 300),
            );
            Self {
                h,
                provider,
                checkout,
                reconciler,
            }
        }

        /// Pay for a session at the provider.
        fn pay(&self, session: &CreatedSession) {
            self.provider.complete(&session.id).unwrap();
        }

        /// Deliver the signed `checkout.session.completed` webhook for a session.
        async fn deliver(&self, session_id: &str) -> ReconcileReport {
            let body = self.provider.completed_event(session_id).unwrap();
            let payload = serde_json::to_vec(&body).unwrap();
            let header = WebhookVerifier::new(SECRET, 300).sign(&payload, Utc::now().timestamp());
            self.reconciler
                .handle_webhook(&payload, Some(header.as_str()))
                .await
                .unwrap()
        }

        async fn item(&self, id: ItemId) -> Option<InventoryItem> {
            self.h.store.item(id).await.unwrap()
        }

        async fn assert_counters_consistent(&self) {
            let categories = self.h.store.categories().await.unwrap();
            let items = self.h.store.list_items(&ItemFilter::default()).await.unwrap();
            assert!(recount(&categories, &items).is_empty(), "counter drift: {categories:?}");
            for item in &items {
                item.check_invariants().unwrap();
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buyers_settle_exactly_once() {
        let w = Arc::new(World::new().await);
        let id = w.h.live_item().await;

        let mut sessions = Vec::new();
        for _ in 0..8 {
            let s = w.checkout.begin_purchase(id, None).await.unwrap();
            w.pay(&s);
            sessions.push(s);
        }

        let mut tasks = Vec::new();
        for s in sessions {
            let w = w.clone();
            tasks.push(tokio::spawn(async move { w.deliver(&s.id).await }));
        }
        let mut applied = 0;
        for t in tasks {
            match t.await.unwrap() {
                ReconcileReport::Applied => applied += 1,
                ReconcileReport::AlreadyApplied => {}
                other => panic!("unexpected report {other:?}"),
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(w.item(id).await.unwrap().status, ItemStatus::Sold);
        assert_eq!(w.h.count().await, 0);
        assert!(matches!(
            w.checkout.begin_purchase(id, None).await,
            Err(CheckoutError::Unavailable(_))
        ));

        w.h.settle_notifications().await;
        assert_eq!(w.h.notifier.sent_with_template("item_sold").len(), 1);
        w.assert_counters_consistent().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_purchase_starts_all_see_live_item_until_settled() {
        let w = Arc::new(World::new().await);
        let id = w.h.live_item().await;

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let w = w.clone();
            tasks.push(tokio::spawn(async move { w.checkout.begin_purchase(id, None).await }));
        }
        for t in tasks {
            assert!(t.await.unwrap().is_ok());
        }
        // No reservation: the item stays purchasable until a payment settles.
        assert_eq!(w.item(id).await.unwrap().status, ItemStatus::Available);
        assert_eq!(w.h.count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn webhook_replay_has_no_further_effect() {
        let w = World::new().await;
        let id = w.h.live_item().await;
        let s = w.checkout.begin_purchase(id, None).await.unwrap();
        w.pay(&s);

        assert_eq!(w.deliver(&s.id).await, ReconcileReport::Applied);
        let sold_at = w.item(id).await.unwrap().sold_at;
        assert_eq!(w.deliver(&s.id).await, ReconcileReport::AlreadyApplied);

        assert_eq!(w.item(id).await.unwrap().sold_at, sold_at);
        assert_eq!(w.h.count().await, 0);
        w.h.settle_notifications().await;
        assert_eq!(w.h.notifier.sent_with_template("item_sold").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_page_and_webhook_agree_in_either_order() {
        let mut finals = Vec::new();
        for success_page_first in [true, false] {
            let w = World::new().await;
            let id = w.h.live_item().await;
            let s = w.checkout.begin_purchase(id, None).await.unwrap();
            w.pay(&s);

            let (first, second) = if success_page_first {
                let (_, a) = w.reconciler.reconcile_session(&s.id).await.unwrap();
                (a, w.deliver(&s.id).await)
            } else {
                let a = w.deliver(&s.id).await;
                let (_, b) = w.reconciler.reconcile_session(&s.id).await.unwrap();
                (a, b)
            };
            assert_eq!(first, ReconcileReport::Applied);
            assert_eq!(second, ReconcileReport::AlreadyApplied);
            assert_eq!(w.h.count().await, 0);

            let item = w.item(id).await.unwrap();
            finals.push((item.status, item.price, item.payout_sent, w.h.count().await));
        }
        assert_eq!(finals[0], finals[1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn success_page_racing_webhook_settles_once() {
        let w = Arc::new(World::new().await);
        let id = w.h.live_item().await;
        let s = w.checkout.begin_purchase(id, None).await.unwrap();
        w.pay(&s);

        let push = {
            let w = w.clone();
            let sid = s.id.clone();
            tokio::spawn(async move { w.deliver(&sid).await })
        };
        let pull = {
            let w = w.clone();
            let sid = s.id.clone();
            tokio::spawn(async move { w.reconciler.reconcile_session(&sid).await.unwrap().1 })
        };
        let reports = [push.await.unwrap(), pull.await.unwrap()];

        assert_eq!(reports.iter().filter(|r| **r == ReconcileReport::Applied).count(), 1);
        assert_eq!(w.h.count().await, 0);
        w.assert_counters_consistent().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pickup_batch_survives_item_deleted_mid_flight() {
        let w = World::new().await;
        w.h.lifecycle.mark_seller_paid(SELLER).await.unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let item = w.h.submit(CollectionMethod::Online).await;
            w.h.lifecycle
                .approve(item.id, Cents::from_dollars(30), false)
                .await
                .unwrap();
            ids.push(item.id);
        }

        let s = w
            .checkout
            .begin_pickup_checkout(SELLER, &ids, PickupWeek::Week1, None)
            .await
            .unwrap();
        w.h.lifecycle.remove(ids[1]).await.unwrap();
        w.pay(&s);

        match w.deliver(&s.id).await {
            ReconcileReport::Partial {
                applied,
                failed,
                retryable,
                ..
            } => {
                assert_eq!(applied, 2);
                assert_eq!(failed, 1);
                assert!(!retryable);
            }
            other => panic!("unexpected report {other:?}"),
        }

        assert_eq!(w.item(ids[0]).await.unwrap().status, ItemStatus::Available);
        assert_eq!(w.item(ids[0]).await.unwrap().pickup_week, Some(PickupWeek::Week1));
        assert!(w.item(ids[1]).await.is_none());
        assert_eq!(w.item(ids[2]).await.unwrap().status, ItemStatus::Available);
        assert_eq!(w.h.count().await, 2);

        // A redelivery confirms nothing new and moves no counter.
        assert!(matches!(w.deliver(&s.id).await, ReconcileReport::Partial { applied: 0, already_applied: 2, .. }));
        assert_eq!(w.h.count().await, 2);
        w.assert_counters_consistent().await;
    }

    #[tokio::test]
    async fn online_items_need_a_paid_seller_but_in_person_items_do_not() {
        let w = World::new().await;
        let online = w.h.submit(CollectionMethod::Online).await;
        let in_person = w.h.submit(CollectionMethod::InPerson).await;

        let err = w
            .h
            .lifecycle
            .approve(online.id, Cents::from_dollars(40), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Rejected(_)));
        assert!(w
            .h
            .lifecycle
            .approve(in_person.id, Cents::from_dollars(40), false)
            .await
            .is_ok());

        // Staff-entered online items have no seller to wait for.
        let staff = w
            .h
            .lifecycle
            .submit_item(dormswap_inventory::NewItem {
                category_id: w.h.category,
                seller_id: None,
                description: "Donated bookshelf".into(),
                suggested_price: None,
                collection_method: CollectionMethod::Online,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(w
            .h
            .lifecycle
            .approve(staff.id, Cents::from_dollars(25), false)
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn move_out_scenario_end_to_end() {
        let w = Arc::new(World::new().await);
        w.h.lifecycle.mark_seller_paid(SELLER).await.unwrap();

        // Staff prices the item.
        let item = w.h.submit(CollectionMethod::Online).await;
        let approved = w
            .h
            .lifecycle
            .approve(item.id, Cents::from_dollars(40), false)
            .await
            .unwrap();
        assert_eq!(approved.item().unwrap().status, ItemStatus::PendingLogistics);

        // Seller picks week1 and pays the $15 fee.
        let pickup = w
            .checkout
            .begin_pickup_checkout(SELLER, &[], PickupWeek::Week1, None)
            .await
            .unwrap();
        assert_eq!(
            w.provider.session(&pickup.id).unwrap().request.total(),
            Cents::from_dollars(15)
        );
        w.pay(&pickup);
        assert_eq!(w.deliver(&pickup.id).await, ReconcileReport::Applied);
        assert_eq!(w.item(item.id).await.unwrap().status, ItemStatus::Available);
        assert_eq!(w.h.count().await, 1);

        // Two buyers race; both pay, both webhooks arrive.
        let a = w.checkout.begin_purchase(item.id, None).await.unwrap();
        let b = w.checkout.begin_purchase(item.id, None).await.unwrap();
        w.pay(&a);
        w.pay(&b);
        let (ra, rb) = tokio::join!(w.deliver(&a.id), w.deliver(&b.id));
        assert_eq!(
            [&ra, &rb].iter().filter(|r| ***r == ReconcileReport::Applied).count(),
            1
        );

        assert_eq!(w.item(item.id).await.unwrap().status, ItemStatus::Sold);
        assert_eq!(w.h.count().await, 0);

        w.h.settle_notifications().await;
        let sold = w.h.notifier.sent_with_template("item_sold");
        assert_eq!(sold.len(), 1);
        assert_eq!(sold[0].context["payout"], json!("$20.00"));
        assert_eq!(w.h.notifier.sent_with_template("item_live").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn counters_hold_under_concurrent_mixed_transitions() {
        let w = Arc::new(World::new().await);
        let lamps = w.h.lifecycle.create_category("Lamps").await.unwrap();
        let mut ids = Vec::new();
        for _ in 0..12 {
            ids.push(w.h.live_item().await);
        }

        let mut tasks = Vec::new();
        for (n, id) in ids.iter().copied().enumerate() {
            for round in 0..3 {
                let w = w.clone();
                let lamps = lamps.id;
                tasks.push(tokio::spawn(async move {
                    let l = &w.h.lifecycle;
                    let _ = match (n + round) % 5 {
                        0 => l.settle_sale(id).await,
                        1 => l.reverse_sale(id).await,
                        2 => l.recategorize(id, lamps).await,
                        3 if n % 4 == 0 => l.remove(id).await,
                        _ => l.settle_sale(id).await,
                    };
                }));
            }
        }
        for t in tasks {
            t.await.unwrap();
        }

        w.assert_counters_consistent().await;
        assert!(w.h.lifecycle.recount_categories().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_commit_rolls_back_state_and_counter_together() {
        let w = World::new().await;
        let id = w.h.live_item().await;
        let s = w.checkout.begin_purchase(id, None).await.unwrap();
        w.pay(&s);

        w.h.store.fail_next_commit();
        let body = w.provider.completed_event(&s.id).unwrap();
        let payload = serde_json::to_vec(&body).unwrap();
        let header = WebhookVerifier::new(SECRET, 300).sign(&payload, Utc::now().timestamp());
        let err = w
            .reconciler
            .handle_webhook(&payload, Some(header.as_str()))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(w.item(id).await.unwrap().status, ItemStatus::Available);
        assert_eq!(w.h.count().await, 1);

        // Provider redelivery is the retry.
        assert_eq!(w.deliver(&s.id).await, ReconcileReport::Applied);
        assert_eq!(w.h.count().await, 0);
        w.assert_counters_consistent().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn notification_failure_does_not_undo_transition() {
        let w = World::with(Harness::with_notifier(RecordingNotifier::failing()).await);
        let id = w.h.live_item().await;
        let s = w.checkout.begin_purchase(id, None).await.unwrap();
        w.pay(&s);

        assert_eq!(w.deliver(&s.id).await, ReconcileReport::Applied);
        w.h.settle_notifications().await;
        assert!(w.h.notifier.sent().is_empty());
        assert_eq!(w.item(id).await.unwrap().status, ItemStatus::Sold);
        assert_eq!(w.h.count().await, 0);
    }
}
