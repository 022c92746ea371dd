//! Seller account state relevant to the item lifecycle.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use dormswap_core::{AggregateRoot, DomainError, DomainResult, UserId};

use crate::item::CollectionMethod;

/// The subset of a user account that gates item transitions and payouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub is_seller: bool,
    pub has_paid: bool,
    pub payment_declined: bool,
    pub stripe_customer_id: Option<String>,
    pub stripe_payment_method_id: Option<String>,
    pub payout_method: Option<String>,
    pub payout_handle: Option<String>,
}

impl AggregateRoot for Seller {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Longest payout handle accepted.
pub const MAX_PAYOUT_HANDLE_LEN: usize = 100;

/// Where a seller receives payouts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutMethod {
    Venmo,
    PayPal,
    Zelle,
}

impl PayoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutMethod::Venmo => "Venmo",
            PayoutMethod::PayPal => "PayPal",
            PayoutMethod::Zelle => "Zelle",
        }
    }

    /// Normalize a handle as entered: Venmo handles drop their leading `@`.
    pub fn clean_handle(&self, raw: &str) -> DomainResult<String> {
        let trimmed = raw.trim();
        let handle = match self {
            PayoutMethod::Venmo => trimmed.trim_start_matches('@').trim(),
            PayoutMethod::PayPal | PayoutMethod::Zelle => trimmed,
        };
        if handle.is_empty() {
            return Err(DomainError::validation("payout handle cannot be empty"));
        }
        if handle.chars().count() > MAX_PAYOUT_HANDLE_LEN {
            return Err(DomainError::validation(format!(
                "payout handle cannot exceed {MAX_PAYOUT_HANDLE_LEN} characters"
            )));
        }
        Ok(handle.to_string())
    }
}

impl FromStr for PayoutMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Venmo" | "venmo" => Ok(PayoutMethod::Venmo),
            "PayPal" | "paypal" => Ok(PayoutMethod::PayPal),
            "Zelle" | "zelle" => Ok(PayoutMethod::Zelle),
            other => Err(DomainError::validation(format!(
                "payout method must be one of: Venmo, PayPal, Zelle (got '{other}')"
            ))),
        }
    }
}

/// A seller's payment standing, captured under lock at decision time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerStanding {
    /// Staff-entered item with no seller account.
    NoSeller,
    Paid,
    Unpaid,
    /// The saved card was declined; blocked until a valid one is added.
    Declined,
}

impl Seller {
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            full_name: None,
            is_seller: false,
            has_paid: false,
            payment_declined: false,
            stripe_customer_id: None,
            stripe_payment_method_id: None,
            payout_method: None,
            payout_handle: None,
        }
    }

    pub fn standing(&self) -> SellerStanding {
        if self.payment_declined {
            SellerStanding::Declined
        } else if self.has_paid {
            SellerStanding::Paid
        } else {
            SellerStanding::Unpaid
        }
    }

    pub fn standing_of(seller: Option<&Seller>) -> SellerStanding {
        seller.map_or(SellerStanding::NoSeller, Seller::standing)
    }

    /// Record a paid service fee. Returns `true` if anything changed.
    pub fn mark_paid(&mut self) -> bool {
        let changed = !self.has_paid;
        self.has_paid = true;
        changed
    }

    /// Record a paid activation fee. Returns `true` if anything changed.
    pub fn activate(&mut self) -> bool {
        let changed = !self.has_paid || !self.is_seller;
        self.has_paid = true;
        self.is_seller = true;
        changed
    }

    /// Record a paid pickup upgrade: the service fee is paid and any decline is cleared.
    pub fn mark_upgraded(&mut self) -> bool {
        let changed = !self.has_paid || self.payment_declined;
        self.has_paid = true;
        self.payment_declined = false;
        changed
    }

    /// Set where payouts go. Saving payout details makes the account a seller.
    pub fn set_payout(&mut self, method: PayoutMethod, handle: &str) -> bool {
        let changed = self.payout_method.as_deref() != Some(method.as_str())
            || self.payout_handle.as_deref() != Some(handle)
            || !self.is_seller;
        self.payout_method = Some(method.as_str().to_string());
        self.payout_handle = Some(handle.to_string());
        self.is_seller = true;
        changed
    }

    /// Persist a saved payment method and clear any previous decline.
    /// Returns `true` if anything changed.
    pub fn save_payment_method(&mut self, payment_method: &str, customer: Option<&str>) -> bool {
        let mut changed = false;
        if self.stripe_payment_method_id.as_deref() != Some(payment_method) {
            self.stripe_payment_method_id = Some(payment_method.to_string());
            changed = true;
        }
        if let Some(customer) = customer {
            if self.stripe_customer_id.as_deref() != Some(customer) {
                self.stripe_customer_id = Some(customer.to_string());
                changed = true;
            }
        }
        if self.payment_declined {
            self.payment_declined = false;
            changed = true;
        }
        changed
    }

    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or("there")
    }
}

/// Eligibility of an item to leave `pending_valuation`.
///
/// In-person items are always eligible. Online items need a seller in good
/// standing, or no seller at all (staff-entered).
pub fn ensure_can_leave_valuation(
    method: CollectionMethod,
    standing: SellerStanding,
) -> DomainResult<()> {
    match (method, standing) {
        (CollectionMethod::InPerson, _) => Ok(()),
        (CollectionMethod::Online, SellerStanding::NoSeller | SellerStanding::Paid) => Ok(()),
        (CollectionMethod::Online, SellerStanding::Unpaid) => Err(DomainError::ineligible(
            "seller has not paid; online items cannot be approved yet",
        )),
        (CollectionMethod::Online, SellerStanding::Declined) => Err(DomainError::ineligible(
            "seller payment method was declined; online items cannot be approved yet",
        )),
    }
}
