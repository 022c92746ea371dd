//! Seller payout calculation.
//!
//! Payout is a pure function of the sale price and the collection method. It
//! is computed on demand and never stored, so the dashboard, staff views and
//! notifications always agree.

use serde::{Deserialize, Serialize};

use dormswap_core::Cents;

use crate::item::{CollectionMethod, InventoryItem, ItemStatus};

/// Seller share per collection method, in basis points.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRates {
    pub online_bps: u32,
    pub in_person_bps: u32,
}

impl Default for PayoutRates {
    fn default() -> Self {
        Self {
            online_bps: 5_000,
            in_person_bps: 3_300,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutBreakdown {
    pub sale_price: Cents,
    pub rate_bps: u32,
    pub payout: Cents,
}

impl PayoutRates {
    pub fn rate(&self, method: CollectionMethod) -> u32 {
        match method {
            CollectionMethod::Online => self.online_bps,
            CollectionMethod::InPerson => self.in_person_bps,
        }
    }

    pub fn payout(&self, price: Cents, method: CollectionMethod) -> Cents {
        price.apply_bps(self.rate(method))
    }

    /// Breakdown for an item; `None` while the item has no price.
    pub fn breakdown(&self, item: &InventoryItem) -> Option<PayoutBreakdown> {
        let price = item.price?;
        let rate_bps = self.rate(item.collection_method);
        Some(PayoutBreakdown {
            sale_price: price,
            rate_bps,
            payout: price.apply_bps(rate_bps),
        })
    }

    /// Totals shown on the seller dashboard.
    ///
    /// - `estimated`: priced items not yet sold
    /// - `pending`: sold, payout not sent
    /// - `paid_out`: sold, payout sent
    pub fn summarize<'a, I>(&self, items: I) -> PayoutSummary
    where
        I: IntoIterator<Item = &'a InventoryItem>,
    {
        let mut summary = PayoutSummary::default();
        for item in items {
            let Some(b) = self.breakdown(item) else { continue };
            let bucket = match (item.status, item.payout_sent) {
                (ItemStatus::Sold, true) => &mut summary.paid_out,
                (ItemStatus::Sold, false) => &mut summary.pending,
                _ => &mut summary.estimated,
            };
            *bucket = Cents::new(bucket.get().saturating_add(b.payout.get()));
        }
        summary.total = Cents::new(
            summary
                .estimated
                .get()
                .saturating_add(summary.pending.get())
                .saturating_add(summary.paid_out.get()),
        );
        summary
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSummary {
    pub estimated: Cents,
    pub pending: Cents,
    pub paid_out: Cents,
    pub total: Cents,
}
