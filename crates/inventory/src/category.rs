//! Category capacity counter.
//!
//! `count_in_stock` is a denormalized count of items in the category whose
//! status is `available`. It is never written directly by transitions: every
//! change to an item yields a set of [`StockDelta`]s computed from the item
//! before and after, and the caller applies them in the same transaction as
//! the item write.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dormswap_core::{AggregateRoot, CategoryId, DomainError, DomainResult};

use crate::item::InventoryItem;

pub const MAX_CATEGORY_NAME_LEN: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCategory {
    pub id: CategoryId,
    pub name: String,
    pub count_in_stock: i64,
}

impl AggregateRoot for InventoryCategory {
    type Id = CategoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

pub fn validate_category_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("category name cannot be empty"));
    }
    if name.chars().count() > MAX_CATEGORY_NAME_LEN {
        return Err(DomainError::validation(format!(
            "category name cannot exceed {MAX_CATEGORY_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// A signed change to one category's counter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub category_id: CategoryId,
    pub delta: i64,
}

/// Counter changes implied by an item going from `before` to `after`.
///
/// `None` on either side means the row does not exist (insert or delete).
/// Only items that are `available` count, so:
/// - going live adds one to the item's category
/// - selling or removing a live item subtracts one
/// - recategorizing a live item moves one between categories
pub fn stock_effects(
    before: Option<&InventoryItem>,
    after: Option<&InventoryItem>,
) -> Vec<StockDelta> {
    let counted = |item: Option<&InventoryItem>| {
        item.filter(|i| i.is_available()).map(|i| i.category_id)
    };

    match (counted(before), counted(after)) {
        (None, None) => vec![],
        (Some(from), Some(to)) if from == to => vec![],
        (Some(from), Some(to)) => vec![
            StockDelta { category_id: from, delta: -1 },
            StockDelta { category_id: to, delta: 1 },
        ],
        (Some(from), None) => vec![StockDelta { category_id: from, delta: -1 }],
        (None, Some(to)) => vec![StockDelta { category_id: to, delta: 1 }],
    }
}

/// A category whose stored counter disagrees with its live item count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountDrift {
    pub category_id: CategoryId,
    pub stored: i64,
    pub actual: i64,
}

/// Compare stored counters against the items actually available.
pub fn recount(categories: &[InventoryCategory], items: &[InventoryItem]) -> Vec<CountDrift> {
    let mut live: BTreeMap<CategoryId, i64> = BTreeMap::new();
    for item in items.iter().filter(|i| i.is_available()) {
        *live.entry(item.category_id).or_default() += 1;
    }

    categories
        .iter()
        .filter_map(|c| {
            let actual = live.get(&c.id).copied().unwrap_or(0);
            (actual != c.count_in_stock).then_some(CountDrift {
                category_id: c.id,
                stored: c.count_in_stock,
                actual,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::test_support::item;
    use crate::item::{
        CollectionMethod, ItemCommand, ItemStatus, RecategorizeItem, ReverseSale, SettleSale,
    };
    use crate::logistics::DropoffPod;
    use chrono::Utc;
    use dormswap_core::{Aggregate, UserId};
    use proptest::prelude::*;

    fn cat(id: i64) -> CategoryId {
        CategoryId::new(id)
    }

    #[test]
    fn going_live_increments() {
        let before = item(1, ItemStatus::PendingLogistics, CollectionMethod::InPerson);
        let mut after = before.clone();
        after.status = ItemStatus::Available;

        assert_eq!(
            stock_effects(Some(&before), Some(&after)),
            vec![StockDelta { category_id: cat(1), delta: 1 }]
        );
    }

    #[test]
    fn recategorizing_live_item_moves_count() {
        let before = item(1, ItemStatus::Available, CollectionMethod::Online);
        let mut after = before.clone();
        after.category_id = cat(2);

        assert_eq!(
            stock_effects(Some(&before), Some(&after)),
            vec![
                StockDelta { category_id: cat(1), delta: -1 },
                StockDelta { category_id: cat(2), delta: 1 },
            ]
        );
    }

    #[test]
    fn recategorizing_pending_item_touches_nothing() {
        let before = item(1, ItemStatus::PendingValuation, CollectionMethod::Online);
        let mut after = before.clone();
        after.category_id = cat(2);
        assert!(stock_effects(Some(&before), Some(&after)).is_empty());
    }

    #[test]
    fn deleting_live_item_decrements_and_pending_does_not() {
        let live = item(1, ItemStatus::Available, CollectionMethod::Online);
        let sold = item(2, ItemStatus::Sold, CollectionMethod::Online);
        assert_eq!(
            stock_effects(Some(&live), None),
            vec![StockDelta { category_id: cat(1), delta: -1 }]
        );
        assert!(stock_effects(Some(&sold), None).is_empty());
    }

    #[test]
    fn recount_reports_only_drifted_categories() {
        let categories = vec![
            InventoryCategory { id: cat(1), name: "Furniture".into(), count_in_stock: 2 },
            InventoryCategory { id: cat(2), name: "Lamps".into(), count_in_stock: 0 },
        ];
        let mut lamp = item(3, ItemStatus::Available, CollectionMethod::Online);
        lamp.category_id = cat(2);
        let items = vec![
            item(1, ItemStatus::Available, CollectionMethod::Online),
            item(2, ItemStatus::Available, CollectionMethod::Online),
            lamp,
        ];

        assert_eq!(
            recount(&categories, &items),
            vec![CountDrift { category_id: cat(2), stored: 0, actual: 1 }]
        );
    }

    #[test]
    fn category_name_is_trimmed_and_bounded() {
        assert_eq!(validate_category_name("  Desks ").unwrap(), "Desks");
        assert!(validate_category_name("   ").is_err());
        assert!(validate_category_name(&"x".repeat(81)).is_err());
    }

    #[derive(Debug, Clone)]
    enum Step {
        GoLive(usize),
        Sell(usize),
        Reverse(usize),
        Move(usize, i64),
        Remove(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0usize..6).prop_map(Step::GoLive),
            (0usize..6).prop_map(Step::Sell),
            (0usize..6).prop_map(Step::Reverse),
            ((0usize..6), (1i64..4)).prop_map(|(i, c)| Step::Move(i, c)),
            (0usize..6).prop_map(Step::Remove),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of transitions, each category's counter
        /// equals the number of its items that are available.
        #[test]
        fn counters_track_available_items(steps in prop::collection::vec(step(), 1..40)) {
            let mut items: Vec<Option<InventoryItem>> = (0..6)
                .map(|i| {
                    let method = if i % 2 == 0 { CollectionMethod::InPerson } else { CollectionMethod::Online };
                    Some(item(i as i64 + 1, ItemStatus::PendingLogistics, method))
                })
                .collect();
            let mut categories: Vec<InventoryCategory> = (1..4)
                .map(|id| InventoryCategory { id: cat(id), name: format!("c{id}"), count_in_stock: 0 })
                .collect();

            for s in steps {
                let idx = match &s {
                    Step::GoLive(i) | Step::Sell(i) | Step::Reverse(i) | Step::Move(i, _) | Step::Remove(i) => *i,
                };
                let Some(current) = items[idx].clone() else { continue };
                let now = Utc::now();

                let next = match s {
                    Step::GoLive(_) => {
                        let mut it = current.clone();
                        let cmd = match it.collection_method {
                            CollectionMethod::InPerson => ItemCommand::ConfirmDropoff(crate::item::ConfirmDropoff {
                                seller_id: UserId::new(100),
                                pod: DropoffPod::GreekRow,
                                occurred_at: now,
                            }),
                            CollectionMethod::Online => ItemCommand::ConfirmPickup(crate::item::ConfirmPickup {
                                seller_id: UserId::new(100),
                                week: crate::logistics::PickupWeek::Week1,
                                occurred_at: now,
                            }),
                        };
                        for e in it.handle(&cmd).unwrap() { it.apply(&e); }
                        Some(it)
                    }
                    Step::Sell(_) => {
                        let mut it = current.clone();
                        for e in it.handle(&ItemCommand::Settle(SettleSale { occurred_at: now })).unwrap() {
                            it.apply(&e);
                        }
                        Some(it)
                    }
                    Step::Reverse(_) => {
                        let mut it = current.clone();
                        match it.handle(&ItemCommand::ReverseSale(ReverseSale { occurred_at: now })) {
                            Ok(events) => for e in events { it.apply(&e); },
                            Err(_) => continue,
                        }
                        Some(it)
                    }
                    Step::Move(_, to) => {
                        let mut it = current.clone();
                        let cmd = ItemCommand::Recategorize(RecategorizeItem { category_id: cat(to), occurred_at: now });
                        for e in it.handle(&cmd).unwrap() { it.apply(&e); }
                        Some(it)
                    }
                    Step::Remove(_) => None,
                };

                for d in stock_effects(Some(&current), next.as_ref()) {
                    let c = categories.iter_mut().find(|c| c.id == d.category_id).unwrap();
                    c.count_in_stock += d.delta;
                    prop_assert!(c.count_in_stock >= 0);
                }
                items[idx] = next;
            }

            let live: Vec<InventoryItem> = items.into_iter().flatten().collect();
            prop_assert!(recount(&categories, &live).is_empty());
        }
    }
}
