//! Unit price rounding.
//!
//! Unit prices carry more precision than currency amounts (four decimal
//! places by default), so they are rounded with their own policy rather than
//! with [`Currency::round`](crate::Currency::round).

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds a freshly computed unit price to the configured precision.
pub trait PriceRounding {
    fn round_price(&self, amount: Decimal) -> Decimal;
}

impl<F> PriceRounding for F
where
    F: Fn(Decimal) -> Decimal,
{
    fn round_price(&self, amount: Decimal) -> Decimal {
        self(amount)
    }
}

/// Round-half-up (away from zero) to a fixed number of decimal places.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HalfUpPriceRounding {
    digits: u32,
}

impl HalfUpPriceRounding {
    /// Default unit price precision.
    pub const DEFAULT_DIGITS: u32 = 4;

    pub fn new(digits: u32) -> Self {
        Self { digits }
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }
}

impl Default for HalfUpPriceRounding {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIGITS)
    }
}

impl PriceRounding for HalfUpPriceRounding {
    fn round_price(&self, amount: Decimal) -> Decimal {
        let mut rounded =
            amount.round_dp_with_strategy(self.digits, RoundingStrategy::MidpointAwayFromZero);
        // 9 and 9.0000 must render alike.
        rounded.rescale(self.digits);
        rounded
    }
}
