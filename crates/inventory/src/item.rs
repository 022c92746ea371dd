use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dormswap_core::{
    Aggregate, AggregateRoot, CategoryId, Cents, DomainError, DomainResult, Event, ItemId, UserId,
};

use crate::logistics::{DropoffPod, PickupWeek};
use crate::seller::{SellerStanding, ensure_can_leave_valuation};

pub const MAX_PRICE: Cents = Cents::new(1_000_000);
pub const MAX_DESCRIPTION_LEN: usize = 200;

/// Lifecycle state of an inventory item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    PendingValuation,
    PendingLogistics,
    Available,
    Sold,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::PendingValuation => "pending_valuation",
            ItemStatus::PendingLogistics => "pending_logistics",
            ItemStatus::Available => "available",
            ItemStatus::Sold => "sold",
        }
    }
}

impl core::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_valuation" => Ok(ItemStatus::PendingValuation),
            "pending_logistics" => Ok(ItemStatus::PendingLogistics),
            "available" => Ok(ItemStatus::Available),
            "sold" => Ok(ItemStatus::Sold),
            other => Err(DomainError::validation(format!("unknown item status '{other}'"))),
        }
    }
}

/// How the item gets from the seller to the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMethod {
    /// Staff pickup during a pickup week (fee-based).
    Online,
    /// Seller drops the item at a pod (free).
    InPerson,
}

impl CollectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionMethod::Online => "online",
            CollectionMethod::InPerson => "in_person",
        }
    }
}

impl FromStr for CollectionMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(CollectionMethod::Online),
            "in_person" => Ok(CollectionMethod::InPerson),
            other => Err(DomainError::validation(format!(
                "collection method must be one of: online, in_person (got '{other}')"
            ))),
        }
    }
}

/// Aggregate root: InventoryItem.
///
/// Fields are public for persistence and read models; state changes go through
/// [`Aggregate::handle`] and [`Aggregate::apply`] so every transition is checked
/// against the lifecycle rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: ItemId,
    pub category_id: CategoryId,
    pub seller_id: Option<UserId>,
    pub description: String,
    pub suggested_price: Option<Cents>,
    pub price: Option<Cents>,
    pub collection_method: CollectionMethod,
    pub is_large: bool,
    pub status: ItemStatus,
    pub pickup_week: Option<PickupWeek>,
    pub dropoff_pod: Option<DropoffPod>,
    pub sold_at: Option<DateTime<Utc>>,
    pub payout_sent: bool,
    pub created_at: DateTime<Utc>,
}

/// A submission that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub category_id: CategoryId,
    pub seller_id: Option<UserId>,
    pub description: String,
    pub suggested_price: Option<Cents>,
    pub collection_method: CollectionMethod,
    pub created_at: DateTime<Utc>,
}

impl NewItem {
    pub fn validate(&self) -> DomainResult<()> {
        let description = self.description.trim();
        if description.is_empty() {
            return Err(DomainError::validation("description cannot be empty"));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(DomainError::validation(format!(
                "description cannot exceed {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if let Some(price) = self.suggested_price {
            validate_price(price)?;
        }
        Ok(())
    }
}

impl InventoryItem {
    /// Materialize a submission with its assigned id. Always starts in `pending_valuation`.
    pub fn submitted(id: ItemId, new: NewItem) -> Self {
        Self {
            id,
            category_id: new.category_id,
            seller_id: new.seller_id,
            description: new.description.trim().to_string(),
            suggested_price: new.suggested_price,
            price: None,
            collection_method: new.collection_method,
            is_large: false,
            status: ItemStatus::PendingValuation,
            pickup_week: None,
            dropoff_pod: None,
            sold_at: None,
            payout_sent: false,
            created_at: new.created_at,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == ItemStatus::Available
    }

    /// Check the per-item data invariants.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.status != ItemStatus::PendingValuation && self.price.is_none() {
            return Err(DomainError::invariant(format!(
                "item {} left pending_valuation without a price",
                self.id
            )));
        }
        if self.sold_at.is_some() != (self.status == ItemStatus::Sold) {
            return Err(DomainError::invariant(format!(
                "item {}: sold_at must be set iff status is sold",
                self.id
            )));
        }
        if self.payout_sent && self.status != ItemStatus::Sold {
            return Err(DomainError::invariant(format!(
                "item {}: payout_sent on an unsold item",
                self.id
            )));
        }
        Ok(())
    }

    fn ensure_owner(&self, seller_id: UserId) -> DomainResult<()> {
        if self.seller_id != Some(seller_id) {
            return Err(DomainError::Unauthorized);
        }
        Ok(())
    }
}

impl AggregateRoot for InventoryItem {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

pub fn validate_price(price: Cents) -> DomainResult<()> {
    if !price.is_positive() {
        return Err(DomainError::validation("price must be greater than zero"));
    }
    if price > MAX_PRICE {
        return Err(DomainError::validation(format!("price cannot exceed {MAX_PRICE}")));
    }
    Ok(())
}

/// Command: staff sets the price (and oversize flag) of a submitted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveItem {
    pub price: Cents,
    pub is_large: bool,
    /// Seller standing read under the same lock as the item.
    pub standing: SellerStanding,
    pub occurred_at: DateTime<Utc>,
}

/// Command: staff changes the price of an item that already left valuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepriceItem {
    pub price: Cents,
    pub occurred_at: DateTime<Utc>,
}

/// Command: staff moves an item into another category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecategorizeItem {
    pub category_id: CategoryId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: a paid pickup confirmation for one of the seller's online items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPickup {
    pub seller_id: UserId,
    pub week: PickupWeek,
    pub occurred_at: DateTime<Utc>,
}

/// Command: a free drop-off confirmation for one of the seller's in-person items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDropoff {
    pub seller_id: UserId,
    pub pod: DropoffPod,
    pub occurred_at: DateTime<Utc>,
}

/// Command: a confirmed payment (or a staff action) settles the sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleSale {
    pub occurred_at: DateTime<Utc>,
}

/// Command: staff puts a sold item back on sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseSale {
    pub occurred_at: DateTime<Utc>,
}

/// Command: staff records that the seller has been paid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPayoutSent {
    pub occurred_at: DateTime<Utc>,
}

/// Command: a paid upgrade moves one of the seller's in-person items onto the pickup route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchToPickup {
    pub seller_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: staff deletes the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemCommand {
    Approve(ApproveItem),
    Reprice(RepriceItem),
    Recategorize(RecategorizeItem),
    ConfirmPickup(ConfirmPickup),
    ConfirmDropoff(ConfirmDropoff),
    Settle(SettleSale),
    ReverseSale(ReverseSale),
    MarkPayoutSent(MarkPayoutSent),
    SwitchToPickup(SwitchToPickup),
    Remove(RemoveItem),
}

impl ItemCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ItemCommand::Approve(_) => "approve",
            ItemCommand::Reprice(_) => "reprice",
            ItemCommand::Recategorize(_) => "recategorize",
            ItemCommand::ConfirmPickup(_) => "confirm_pickup",
            ItemCommand::ConfirmDropoff(_) => "confirm_dropoff",
            ItemCommand::Settle(_) => "settle",
            ItemCommand::ReverseSale(_) => "reverse_sale",
            ItemCommand::MarkPayoutSent(_) => "mark_payout_sent",
            ItemCommand::SwitchToPickup(_) => "switch_to_pickup",
            ItemCommand::Remove(_) => "remove",
        }
    }
}

/// Event: ItemApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemApproved {
    pub item_id: ItemId,
    pub price: Cents,
    pub is_large: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRepriced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRepriced {
    pub item_id: ItemId,
    pub price: Cents,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRecategorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecategorized {
    pub item_id: ItemId,
    pub from: CategoryId,
    pub to: CategoryId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PickupConfirmed (item goes live).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupConfirmed {
    pub item_id: ItemId,
    pub week: PickupWeek,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DropoffConfirmed (item goes live).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropoffConfirmed {
    pub item_id: ItemId,
    pub pod: DropoffPod,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemSold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSold {
    pub item_id: ItemId,
    pub price: Cents,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleReversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReversed {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PayoutMarkedSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutMarkedSent {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SwitchedToPickup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchedToPickup {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemEvent {
    Approved(ItemApproved),
    Repriced(ItemRepriced),
    Recategorized(ItemRecategorized),
    PickupConfirmed(PickupConfirmed),
    DropoffConfirmed(DropoffConfirmed),
    Sold(ItemSold),
    SaleReversed(SaleReversed),
    PayoutSent(PayoutMarkedSent),
    SwitchedToPickup(SwitchedToPickup),
    Removed(ItemRemoved),
}

impl ItemEvent {
    pub fn is_removal(&self) -> bool {
        matches!(self, ItemEvent::Removed(_))
    }
}

impl Event for ItemEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ItemEvent::Approved(_) => "inventory.item.approved",
            ItemEvent::Repriced(_) => "inventory.item.repriced",
            ItemEvent::Recategorized(_) => "inventory.item.recategorized",
            ItemEvent::PickupConfirmed(_) => "inventory.item.pickup_confirmed",
            ItemEvent::DropoffConfirmed(_) => "inventory.item.dropoff_confirmed",
            ItemEvent::Sold(_) => "inventory.item.sold",
            ItemEvent::SaleReversed(_) => "inventory.item.sale_reversed",
            ItemEvent::PayoutSent(_) => "inventory.item.payout_sent",
            ItemEvent::SwitchedToPickup(_) => "inventory.item.switched_to_pickup",
            ItemEvent::Removed(_) => "inventory.item.removed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ItemEvent::Approved(e) => e.occurred_at,
            ItemEvent::Repriced(e) => e.occurred_at,
            ItemEvent::Recategorized(e) => e.occurred_at,
            ItemEvent::PickupConfirmed(e) => e.occurred_at,
            ItemEvent::DropoffConfirmed(e) => e.occurred_at,
            ItemEvent::Sold(e) => e.occurred_at,
            ItemEvent::SaleReversed(e) => e.occurred_at,
            ItemEvent::PayoutSent(e) => e.occurred_at,
            ItemEvent::SwitchedToPickup(e) => e.occurred_at,
            ItemEvent::Removed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryItem {
    type Command = ItemCommand;
    type Event = ItemEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ItemEvent::Approved(e) => {
                self.price = Some(e.price);
                self.is_large = e.is_large;
                self.status = ItemStatus::PendingLogistics;
            }
            ItemEvent::Repriced(e) => {
                self.price = Some(e.price);
            }
            ItemEvent::Recategorized(e) => {
                self.category_id = e.to;
            }
            ItemEvent::PickupConfirmed(e) => {
                self.pickup_week = Some(e.week);
                self.status = ItemStatus::Available;
            }
            ItemEvent::DropoffConfirmed(e) => {
                self.dropoff_pod = Some(e.pod);
                self.status = ItemStatus::Available;
            }
            ItemEvent::Sold(e) => {
                self.status = ItemStatus::Sold;
                self.sold_at = Some(e.occurred_at);
            }
            ItemEvent::SaleReversed(_) => {
                self.status = ItemStatus::Available;
                self.sold_at = None;
                self.payout_sent = false;
            }
            ItemEvent::PayoutSent(_) => {
                self.payout_sent = true;
            }
            ItemEvent::SwitchedToPickup(_) => {
                self.collection_method = CollectionMethod::Online;
            }
            // The row is deleted by the caller; nothing left to evolve.
            ItemEvent::Removed(_) => {}
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ItemCommand::Approve(cmd) => self.handle_approve(cmd),
            ItemCommand::Reprice(cmd) => self.handle_reprice(cmd),
            ItemCommand::Recategorize(cmd) => self.handle_recategorize(cmd),
            ItemCommand::ConfirmPickup(cmd) => self.handle_confirm_pickup(cmd),
            ItemCommand::ConfirmDropoff(cmd) => self.handle_confirm_dropoff(cmd),
            ItemCommand::Settle(cmd) => self.handle_settle(cmd),
            ItemCommand::ReverseSale(cmd) => self.handle_reverse(cmd),
            ItemCommand::MarkPayoutSent(cmd) => self.handle_payout_sent(cmd),
            ItemCommand::SwitchToPickup(cmd) => self.handle_switch_to_pickup(cmd),
            ItemCommand::Remove(cmd) => Ok(vec![ItemEvent::Removed(ItemRemoved {
                item_id: self.id,
                occurred_at: cmd.occurred_at,
            })]),
        }
    }
}

impl InventoryItem {
    fn handle_approve(&self, cmd: &ApproveItem) -> Result<Vec<ItemEvent>, DomainError> {
        if self.status != ItemStatus::PendingValuation {
            return Err(DomainError::invariant(format!(
                "item is {}, only pending_valuation items can be approved",
                self.status
            )));
        }
        validate_price(cmd.price)?;

        let standing = if self.seller_id.is_none() {
            SellerStanding::NoSeller
        } else {
            cmd.standing
        };
        ensure_can_leave_valuation(self.collection_method, standing)?;

        Ok(vec![ItemEvent::Approved(ItemApproved {
            item_id: self.id,
            price: cmd.price,
            is_large: cmd.is_large,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reprice(&self, cmd: &RepriceItem) -> Result<Vec<ItemEvent>, DomainError> {
        match self.status {
            ItemStatus::PendingValuation => {
                return Err(DomainError::invariant(
                    "item has not been approved; set its price through approval",
                ));
            }
            ItemStatus::Sold => {
                return Err(DomainError::invariant("price of a sold item cannot change"));
            }
            ItemStatus::PendingLogistics | ItemStatus::Available => {}
        }
        validate_price(cmd.price)?;

        if self.price == Some(cmd.price) {
            return Ok(vec![]);
        }
        Ok(vec![ItemEvent::Repriced(ItemRepriced {
            item_id: self.id,
            price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_recategorize(&self, cmd: &RecategorizeItem) -> Result<Vec<ItemEvent>, DomainError> {
        if self.category_id == cmd.category_id {
            return Ok(vec![]);
        }
        Ok(vec![ItemEvent::Recategorized(ItemRecategorized {
            item_id: self.id,
            from: self.category_id,
            to: cmd.category_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_pickup(&self, cmd: &ConfirmPickup) -> Result<Vec<ItemEvent>, DomainError> {
        self.ensure_owner(cmd.seller_id)?;
        if self.collection_method != CollectionMethod::Online {
            return Err(DomainError::invariant(
                "in-person items are confirmed with a drop-off pod, not a pickup week",
            ));
        }
        match self.status {
            ItemStatus::PendingValuation => Err(DomainError::ineligible(
                "item has not been approved yet",
            )),
            ItemStatus::PendingLogistics => Ok(vec![ItemEvent::PickupConfirmed(PickupConfirmed {
                item_id: self.id,
                week: cmd.week,
                occurred_at: cmd.occurred_at,
            })]),
            // Logistics already settled (replayed confirmation).
            ItemStatus::Available | ItemStatus::Sold => Ok(vec![]),
        }
    }

    fn handle_confirm_dropoff(&self, cmd: &ConfirmDropoff) -> Result<Vec<ItemEvent>, DomainError> {
        self.ensure_owner(cmd.seller_id)?;
        if self.collection_method != CollectionMethod::InPerson {
            return Err(DomainError::invariant(
                "online items are confirmed with a paid pickup week, not a drop-off pod",
            ));
        }
        match self.status {
            ItemStatus::PendingValuation => Err(DomainError::ineligible(
                "item has not been approved yet",
            )),
            ItemStatus::PendingLogistics => {
                Ok(vec![ItemEvent::DropoffConfirmed(DropoffConfirmed {
                    item_id: self.id,
                    pod: cmd.pod,
                    occurred_at: cmd.occurred_at,
                })])
            }
            ItemStatus::Available | ItemStatus::Sold => Ok(vec![]),
        }
    }

    fn handle_settle(&self, cmd: &SettleSale) -> Result<Vec<ItemEvent>, DomainError> {
        if self.status != ItemStatus::Available {
            // Already settled by a competing signal, or never purchasable.
            return Ok(vec![]);
        }
        let price = match self.price {
            Some(p) if p.is_positive() => p,
            _ => return Err(DomainError::ineligible("item has no sale price")),
        };
        Ok(vec![ItemEvent::Sold(ItemSold {
            item_id: self.id,
            price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse(&self, cmd: &ReverseSale) -> Result<Vec<ItemEvent>, DomainError> {
        match self.status {
            ItemStatus::Sold => Ok(vec![ItemEvent::SaleReversed(SaleReversed {
                item_id: self.id,
                occurred_at: cmd.occurred_at,
            })]),
            ItemStatus::Available => Ok(vec![]),
            other => Err(DomainError::invariant(format!(
                "item is {other}, only sold items can be put back on sale"
            ))),
        }
    }

    /// Only items that have not reached storage can change route.
    fn handle_switch_to_pickup(&self, cmd: &SwitchToPickup) -> Result<Vec<ItemEvent>, DomainError> {
        self.ensure_owner(cmd.seller_id)?;
        if self.collection_method == CollectionMethod::Online {
            return Ok(vec![]);
        }
        match self.status {
            ItemStatus::PendingValuation | ItemStatus::PendingLogistics => {
                Ok(vec![ItemEvent::SwitchedToPickup(SwitchedToPickup {
                    item_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            other => Err(DomainError::invariant(format!(
                "item is {other}; it was already dropped off"
            ))),
        }
    }

    fn handle_payout_sent(&self, cmd: &MarkPayoutSent) -> Result<Vec<ItemEvent>, DomainError> {
        if self.status != ItemStatus::Sold {
            return Err(DomainError::ineligible("only sold items can be paid out"));
        }
        if self.payout_sent {
            return Ok(vec![]);
        }
        Ok(vec![ItemEvent::PayoutSent(PayoutMarkedSent {
            item_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
