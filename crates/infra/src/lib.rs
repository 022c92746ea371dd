//! Infrastructure layer: persistence, the lifecycle and payment services, config.

pub mod checkout;
pub mod config;
pub mod guard;
pub mod lifecycle;
pub mod notify;
pub mod reconciler;
pub mod settings;
pub mod store;
pub mod sweep;

#[cfg(test)]
mod integration_tests;

pub use checkout::{CheckoutError, CheckoutService};
pub use config::{AppConfig, ConfigError};
pub use lifecycle::{
    BatchReport, Lifecycle, LifecycleError, SellerDashboard, Transition, TransitionOutcome,
};
pub use notify::{LogNotifier, Notification, NotificationDispatcher, Notifier, NotifyError, RecordingNotifier};
pub use reconciler::{Authorization, PaymentReconciler, ReconcileError, ReconcileReport};
pub use settings::SettingsService;
pub use store::{
    CheckoutRecord, CheckoutState, InMemoryStore, ItemFilter, MarketStore, PostgresStore,
    StoreError, StoreTx,
};
pub use sweep::{ReconciliationSweep, SweepHandle, SweepReport};
