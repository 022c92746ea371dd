//! Payment-provider boundary.
//!
//! Checkout metadata, webhook event parsing and signature verification, and
//! the outbound provider client. Nothing here touches inventory state; the
//! reconciler in the infra crate turns verified events into transitions.

pub mod event;
pub mod fake;
pub mod metadata;
pub mod provider;
pub mod signature;
pub mod stripe;

pub use event::{
    CheckoutSession, EventParseError, PaymentStatus, ProviderEvent, ProviderEventKind,
    SessionStatus, SetupIntent,
};
pub use fake::InMemoryProvider;
pub use metadata::{CheckoutMetadata, MetadataError, MetadataMap};
pub use provider::{
    CheckoutRequest, CreatedSession, LineItem, PaymentProvider, ProviderError,
    SESSION_ID_PLACEHOLDER,
};
pub use signature::{SIGNATURE_HEADER, SignatureError, WebhookVerifier};
pub use stripe::StripeClient;
