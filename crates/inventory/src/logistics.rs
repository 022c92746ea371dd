//! Logistics choices made by a seller after approval.
//!
//! Online items are collected by staff during a pickup week and require a
//! service fee; in-person items are dropped off at a pod for free.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use dormswap_core::{Cents, DomainError};

use crate::item::{CollectionMethod, InventoryItem, ItemStatus};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupWeek {
    Week1,
    Week2,
}

impl PickupWeek {
    pub const ALL: [PickupWeek; 2] = [PickupWeek::Week1, PickupWeek::Week2];

    pub fn as_str(&self) -> &'static str {
        match self {
            PickupWeek::Week1 => "week1",
            PickupWeek::Week2 => "week2",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PickupWeek::Week1 => "Apr 26 - May 2",
            PickupWeek::Week2 => "May 3 - May 9",
        }
    }
}

impl core::fmt::Display for PickupWeek {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PickupWeek {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "week1" => Ok(PickupWeek::Week1),
            "week2" => Ok(PickupWeek::Week2),
            other => Err(DomainError::validation(format!(
                "pickup week must be one of: week1, week2 (got '{other}')"
            ))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropoffPod {
    GreekRow,
    Apartment,
}

impl DropoffPod {
    pub const ALL: [DropoffPod; 2] = [DropoffPod::GreekRow, DropoffPod::Apartment];

    pub fn as_str(&self) -> &'static str {
        match self {
            DropoffPod::GreekRow => "greek_row",
            DropoffPod::Apartment => "apartment",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DropoffPod::GreekRow => "Greek Row pod",
            DropoffPod::Apartment => "Apartment complex pod",
        }
    }
}

impl core::fmt::Display for DropoffPod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DropoffPod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "greek_row" => Ok(DropoffPod::GreekRow),
            "apartment" => Ok(DropoffPod::Apartment),
            other => Err(DomainError::validation(format!(
                "dropoff pod must be one of: greek_row, apartment (got '{other}')"
            ))),
        }
    }
}

/// Pickup service fee: a flat fee per confirmation plus a surcharge for every
/// oversize item collected in the same pickup.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub service_fee: Cents,
    pub large_item_fee: Cents,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            service_fee: Cents::new(1_500),
            large_item_fee: Cents::new(1_000),
        }
    }
}

impl FeeSchedule {
    /// Fee for confirming pickup of `items`. Zero when there is nothing to collect.
    pub fn pickup_fee<'a, I>(&self, items: I) -> Cents
    where
        I: IntoIterator<Item = &'a InventoryItem>,
    {
        let mut any = false;
        let mut large = 0_i64;
        for item in items {
            any = true;
            if item.is_large {
                large += 1;
            }
        }
        if !any {
            return Cents::ZERO;
        }
        self.large_item_fee
            .checked_mul(large)
            .and_then(|surcharge| self.service_fee.checked_add(surcharge))
            .unwrap_or(Cents::new(i64::MAX))
    }
}

/// Items of a seller that still need a pickup week (approved, online, not yet live).
pub fn awaiting_pickup(items: &[InventoryItem]) -> Vec<&InventoryItem> {
    items
        .iter()
        .filter(|i| {
            i.status == ItemStatus::PendingLogistics && i.collection_method == CollectionMethod::Online
        })
        .collect()
}

/// Items of a seller that still need a drop-off pod.
pub fn awaiting_dropoff(items: &[InventoryItem]) -> Vec<&InventoryItem> {
    items
        .iter()
        .filter(|i| {
            i.status == ItemStatus::PendingLogistics
                && i.collection_method == CollectionMethod::InPerson
        })
        .collect()
}
