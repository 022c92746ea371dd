//! Inventory domain module.
//!
//! This crate contains the business rules of the marketplace: the item
//! lifecycle, the category capacity counter, seller payouts and logistics.
//! It is deterministic domain logic only (no IO, no HTTP, no storage).

pub mod category;
pub mod item;
pub mod logistics;
pub mod payout;
pub mod seller;

pub use category::{CountDrift, InventoryCategory, StockDelta, recount, stock_effects};
pub use item::{
    ApproveItem, CollectionMethod, ConfirmDropoff, ConfirmPickup, InventoryItem, ItemCommand,
    ItemEvent, ItemStatus, MarkPayoutSent, NewItem, RecategorizeItem, RemoveItem, RepriceItem,
    ReverseSale, SettleSale, SwitchToPickup,
};
pub use logistics::{DropoffPod, FeeSchedule, PickupWeek};
pub use payout::{PayoutBreakdown, PayoutRates, PayoutSummary};
pub use seller::{PayoutMethod, Seller, SellerStanding};
