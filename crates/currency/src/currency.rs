use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use salesprice_core::DomainError;

/// Three-letter currency code (e.g. "USD", "EUR").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CurrencyCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "currency code must be three letters, got '{s}'"
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A currency together with its display/rounding precision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    pub code: CurrencyCode,
    /// Number of decimal places amounts in this currency are rounded to.
    pub digits: u32,
}

impl Currency {
    pub const DEFAULT_DIGITS: u32 = 2;

    pub fn new(code: CurrencyCode, digits: u32) -> Self {
        Self { code, digits }
    }

    /// Currency with the usual two decimal places.
    pub fn with_default_digits(code: CurrencyCode) -> Self {
        Self::new(code, Self::DEFAULT_DIGITS)
    }

    /// Round an amount to this currency's precision (half away from zero).
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.digits, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Smallest representable unit, e.g. 0.01 for two digits.
    pub fn smallest_unit(&self) -> Decimal {
        Decimal::new(1, self.digits)
    }
}
