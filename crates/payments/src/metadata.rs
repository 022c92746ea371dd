//! Checkout-session metadata.
//!
//! The provider stores metadata as a flat map of strings. This module is the
//! only place that map is authored or read: every session is described by one
//! [`CheckoutMetadata`] variant carrying exactly the fields its transition needs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dormswap_core::{ItemId, UserId};
use dormswap_inventory::PickupWeek;

pub type MetadataMap = BTreeMap<String, String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata has no 'type' field")]
    MissingType,

    #[error("unknown metadata type '{0}'")]
    UnknownType(String),

    #[error("metadata field '{0}' is missing")]
    MissingField(&'static str),

    #[error("metadata field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// What a checkout session authorizes once paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutMetadata {
    ItemPurchase {
        item_id: ItemId,
    },
    ConfirmPickup {
        item_ids: Vec<ItemId>,
        pickup_week: PickupWeek,
        user_id: UserId,
    },
    SellerActivation {
        user_id: UserId,
    },
    /// Service fee that moves a seller's in-person items onto the pickup route.
    Upgrade {
        user_id: UserId,
    },
}

impl CheckoutMetadata {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckoutMetadata::ItemPurchase { .. } => "item_purchase",
            CheckoutMetadata::ConfirmPickup { .. } => "confirm_pickup",
            CheckoutMetadata::SellerActivation { .. } => "seller_activation",
            CheckoutMetadata::Upgrade { .. } => "upgrade",
        }
    }

    /// The account a seller-side session belongs to.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            CheckoutMetadata::ItemPurchase { .. } => None,
            CheckoutMetadata::ConfirmPickup { user_id, .. }
            | CheckoutMetadata::SellerActivation { user_id }
            | CheckoutMetadata::Upgrade { user_id } => Some(*user_id),
        }
    }

    pub fn to_map(&self) -> MetadataMap {
        let mut map = MetadataMap::new();
        map.insert("type".into(), self.kind().into());
        match self {
            CheckoutMetadata::ItemPurchase { item_id } => {
                map.insert("item_id".into(), item_id.to_string());
            }
            CheckoutMetadata::ConfirmPickup {
                item_ids,
                pickup_week,
                user_id,
            } => {
                let csv = item_ids
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                map.insert("item_ids".into(), csv);
                map.insert("pickup_week".into(), pickup_week.as_str().into());
                map.insert("user_id".into(), user_id.to_string());
            }
            CheckoutMetadata::SellerActivation { user_id } | CheckoutMetadata::Upgrade { user_id } => {
                map.insert("user_id".into(), user_id.to_string());
            }
        }
        map
    }

    pub fn from_map(map: &MetadataMap) -> Result<Self, MetadataError> {
        let kind = map.get("type").ok_or(MetadataError::MissingType)?;
        match kind.as_str() {
            "item_purchase" => Ok(CheckoutMetadata::ItemPurchase {
                item_id: parse_field(map, "item_id")?,
            }),
            "confirm_pickup" => {
                let raw = required(map, "item_ids")?;
                let item_ids = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<ItemId>().map_err(|e| MetadataError::InvalidField {
                            field: "item_ids",
                            reason: e.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if item_ids.is_empty() {
                    return Err(MetadataError::MissingField("item_ids"));
                }
                Ok(CheckoutMetadata::ConfirmPickup {
                    item_ids,
                    pickup_week: parse_field(map, "pickup_week")?,
                    user_id: parse_field(map, "user_id")?,
                })
            }
            "seller_activation" => Ok(CheckoutMetadata::SellerActivation {
                user_id: parse_field(map, "user_id")?,
            }),
            "upgrade" => Ok(CheckoutMetadata::Upgrade {
                user_id: parse_field(map, "user_id")?,
            }),
            other => Err(MetadataError::UnknownType(other.to_string())),
        }
    }
}

fn required<'a>(map: &'a MetadataMap, field: &'static str) -> Result<&'a str, MetadataError> {
    map.get(field)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or(MetadataError::MissingField(field))
}

fn parse_field<T>(map: &MetadataMap, field: &'static str) -> Result<T, MetadataError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    required(map, field)?
        .parse()
        .map_err(|e: T::Err| MetadataError::InvalidField {
            field,
            reason: e.to_string(),
        })
}
