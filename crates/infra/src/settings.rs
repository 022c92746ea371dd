//! Runtime toggles backed by the store.
//!
//! Values are read at the start of each operation that depends on them. An
//! unset or unreadable value falls back to the configured default.

use std::sync::Arc;

use crate::store::{MarketStore, StoreError};

pub const PICKUP_PERIOD_KEY: &str = "pickup_period_active";

#[derive(Clone)]
pub struct SettingsService {
    store: Arc<dyn MarketStore>,
    pickup_default: bool,
}

impl SettingsService {
    pub fn new(store: Arc<dyn MarketStore>, pickup_default: bool) -> Self {
        Self {
            store,
            pickup_default,
        }
    }

    /// Whether sellers may currently submit items.
    pub async fn pickup_period_active(&self) -> bool {
        match self.store.setting(PICKUP_PERIOD_KEY).await {
            Ok(Some(v)) => match v.as_str() {
                "true" => true,
                "false" => false,
                other => {
                    tracing::warn!(value = other, "unreadable pickup period setting; using default");
                    self.pickup_default
                }
            },
            Ok(None) => self.pickup_default,
            Err(e) => {
                tracing::warn!(error = %e, "pickup period setting unavailable; using default");
                self.pickup_default
            }
        }
    }

    pub async fn set_pickup_period_active(&self, active: bool) -> Result<(), StoreError> {
        self.store
            .put_setting(PICKUP_PERIOD_KEY, if active { "true" } else { "false" })
            .await?;
        tracing::info!(active, "pickup period toggled");
        Ok(())
    }
}

impl core::fmt::Debug for SettingsService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SettingsService")
            .field("pickup_default", &self.pickup_default)
            .finish_non_exhaustive()
    }
}
