//! Exact two-fraction-digit money values.
//!
//! `Amount` is what callers move (always strictly positive); `Balance` is what an
//! account holds (may be negative only when opened that way).

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Number of fractional digits carried by every money value.
pub const SCALE: u32 = 2;

/// Largest accepted amount: twelve significant digits, two of them fractional.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, SCALE);

/// A strictly positive quantity of money with at most two fractional digits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Parse a caller-supplied decimal string (e.g. `"40.00"`).
    ///
    /// Surrounding whitespace is ignored. Anything that is not a plain decimal
    /// literal (exponents, digit separators, `NaN`) is rejected.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let value = parse_plain_decimal(input)?;
        Self::try_from(value)
    }

    /// Build an amount from an integer number of cents.
    pub fn from_cents(cents: i64) -> DomainResult<Self> {
        Self::try_from(Decimal::new(cents, SCALE))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value.scale() > SCALE {
            return Err(DomainError::invalid_amount(format!(
                "{value} has more than {SCALE} decimal places"
            )));
        }
        if value <= Decimal::ZERO {
            return Err(DomainError::invalid_amount(format!(
                "{value} must be greater than zero"
            )));
        }
        if value > MAX_AMOUNT {
            return Err(DomainError::invalid_amount(format!(
                "{value} exceeds the maximum of {MAX_AMOUNT}"
            )));
        }
        normalize(value).map(Self)
    }
}

impl From<Amount> for Decimal {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl FromStr for Amount {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// An account balance with exactly two fractional digits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Balance(Decimal);

impl Balance {
    pub const ZERO: Balance = Balance(Decimal::from_parts(0, 0, 0, false, SCALE));

    /// Parse an opening balance. Zero and negative values are allowed.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let value = parse_plain_decimal(input)?;
        Self::try_from(value)
    }

    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, SCALE))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Whether `amount` can be withdrawn without crossing zero.
    pub fn covers(&self, amount: Amount) -> bool {
        self.0 >= amount.0
    }

    pub fn checked_add(self, amount: Amount) -> DomainResult<Self> {
        self.0
            .checked_add(amount.0)
            .ok_or_else(|| DomainError::invalid_amount(format!("{self} + {amount} overflows")))
            .and_then(normalize)
            .map(Self)
    }

    pub fn checked_sub(self, amount: Amount) -> DomainResult<Self> {
        self.0
            .checked_sub(amount.0)
            .ok_or_else(|| DomainError::invalid_amount(format!("{self} - {amount} overflows")))
            .and_then(normalize)
            .map(Self)
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::ZERO
    }
}

impl TryFrom<Decimal> for Balance {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value.scale() > SCALE {
            return Err(DomainError::invalid_amount(format!(
                "{value} has more than {SCALE} decimal places"
            )));
        }
        normalize(value).map(Self)
    }
}

impl From<Balance> for Decimal {
    fn from(value: Balance) -> Self {
        value.0
    }
}

impl FromStr for Balance {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl core::fmt::Display for Balance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Rescale to exactly `SCALE` places. Values too wide to carry two fractional
/// digits are rejected rather than silently keeping a smaller scale.
fn normalize(mut value: Decimal) -> DomainResult<Decimal> {
    value.rescale(SCALE);
    if value.scale() != SCALE {
        return Err(DomainError::invalid_amount(format!(
            "{value} is too large to hold {SCALE} decimal places"
        )));
    }
    Ok(value)
}

/// Accepts `[+-]digits[.digits]` only.
fn parse_plain_decimal(input: &str) -> DomainResult<Decimal> {
    let trimmed = input.trim();
    let unsigned = trimmed
        .strip_prefix(['+', '-'])
        .unwrap_or(trimmed);

    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };

    let digits_ok = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    let well_formed = digits_ok(whole)
        && fraction.is_none_or(|f| !f.is_empty() && digits_ok(f))
        && !whole.is_empty();

    if !well_formed {
        return Err(DomainError::invalid_amount(format!(
            "'{trimmed}' is not a valid number"
        )));
    }

    Decimal::from_str(trimmed)
        .map_err(|e| DomainError::invalid_amount(format!("'{trimmed}': {e}")))
}
