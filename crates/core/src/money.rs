//! Money as integer cents (single currency).

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// Basis points in one whole (100%).
pub const BPS_SCALE: i64 = 10_000;

/// A non-fractional currency amount in cents.
///
/// All arithmetic is integer so that the same `(price, rate)` pair always
/// produces the same result, no matter where it is computed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(i64);

impl ValueObject for Cents {}

impl Cents {
    pub const ZERO: Cents = Cents(0);

    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn from_dollars(dollars: i64) -> Self {
        Self(dollars * 100)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Cents) -> Option<Cents> {
        self.0.checked_add(other.0).map(Cents)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Cents> {
        self.0.checked_mul(factor).map(Cents)
    }

    /// Apply a rate expressed in basis points, rounding half-up to the cent.
    pub fn apply_bps(self, bps: u32) -> Cents {
        let scaled = i128::from(self.0) * i128::from(bps);
        let half = i128::from(BPS_SCALE / 2);
        let rounded = if scaled >= 0 {
            (scaled + half) / i128::from(BPS_SCALE)
        } else {
            (scaled - half) / i128::from(BPS_SCALE)
        };
        Cents(i64::try_from(rounded).unwrap_or(i64::MAX))
    }
}

impl core::fmt::Display for Cents {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// Parses a dollar amount such as `"40"`, `"40.5"`, `"$40.50"` or `"-$1.50"`.
impl FromStr for Cents {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid amount: {s}"));

        let raw = s.trim();
        let (negative, raw) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let raw = raw.strip_prefix('$').unwrap_or(raw);
        if raw.is_empty() {
            return Err(DomainError::validation("amount cannot be empty"));
        }

        let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
        if frac.len() > 2 {
            return Err(DomainError::validation("amount has more than two decimal places"));
        }
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !digits(whole) || !digits(frac) || (whole.is_empty() && frac.is_empty()) {
            return Err(invalid());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse::<i64>().map_err(|_| invalid())?,
        };

        let magnitude = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .ok_or_else(|| DomainError::validation(format!("amount out of range: {s}")))?;
        Ok(Cents(if negative { -magnitude } else { magnitude }))
    }
}
