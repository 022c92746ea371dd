//! Service wiring: store, payment provider, notifier, and the services built on them.

use std::sync::Arc;

use anyhow::Context;

use dormswap_auth::Principal;
use dormswap_infra::{
    AppConfig, CheckoutService, InMemoryStore, Lifecycle, LifecycleError, LogNotifier,
    MarketStore, NotificationDispatcher, Notifier, PaymentReconciler, PostgresStore,
    ReconciliationSweep, SettingsService,
};
use dormswap_inventory::Seller;
use dormswap_payments::{InMemoryProvider, PaymentProvider, StripeClient, WebhookVerifier};

pub struct AppServices {
    pub store: Arc<dyn MarketStore>,
    pub lifecycle: Lifecycle,
    pub checkout: CheckoutService,
    pub reconciler: PaymentReconciler,
    pub sweep: ReconciliationSweep,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn MarketStore>,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
        config: &AppConfig,
    ) -> Self {
        let settings = SettingsService::new(store.clone(), config.pickup_period_default);
        let lifecycle = Lifecycle::new(
            store.clone(),
            NotificationDispatcher::new(notifier),
            settings,
            config.payout_rates,
            config.fees,
        );
        let checkout = CheckoutService::new(
            lifecycle.clone(),
            provider.clone(),
            config.activation_fee,
            config.public_base_url.clone(),
        );
        let reconciler = PaymentReconciler::new(
            lifecycle.clone(),
            provider,
            WebhookVerifier::new(
                config.webhook_secret.clone().into_bytes(),
                config.webhook_tolerance_secs,
            ),
        );
        let sweep = ReconciliationSweep::new(store.clone(), reconciler.clone(), config.sweep_grace);
        Self {
            store,
            lifecycle,
            checkout,
            reconciler,
            sweep,
        }
    }

    /// The seller row behind a principal, created on first use when the token carries an email.
    pub async fn seller_account(&self, principal: &Principal) -> Result<Seller, LifecycleError> {
        let seller = match principal.email.as_deref() {
            Some(email) => Some(self.store.ensure_seller(principal.user_id, email, None).await?),
            None => self.store.seller(principal.user_id).await?,
        };
        seller.ok_or_else(|| LifecycleError::NotFound(format!("user {}", principal.user_id)))
    }
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Build services from configuration.
///
/// `DATABASE_URL` selects Postgres (schema applied on start); without it the
/// process runs on the in-memory store. Likewise a missing Stripe key selects
/// the in-memory provider.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let store: Arc<dyn MarketStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.lock_wait)
                .await
                .context("connecting to Postgres")?;
            store.migrate().await.context("applying schema")?;
            tracing::info!("using Postgres store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            Arc::new(InMemoryStore::new(config.lock_wait))
        }
    };

    let provider: Arc<dyn PaymentProvider> = match &config.stripe_secret_key {
        Some(key) => Arc::new(
            StripeClient::new(key.clone(), config.stripe_api_base.clone())
                .context("building the Stripe client")?,
        ),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set; using the in-memory payment provider");
            Arc::new(InMemoryProvider::new())
        }
    };

    Ok(AppServices::new(store, provider, Arc::new(LogNotifier), config))
}

