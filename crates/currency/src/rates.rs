//! Currency conversion.

use std::collections::HashMap;

use rust_decimal::Decimal;
use thiserror::Error;

use salesprice_core::DomainError;

use crate::{Currency, CurrencyCode};

/// Failure to convert an amount between two currencies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("no exchange rate for {0}")]
    MissingRate(CurrencyCode),

    #[error("exchange rate for {0} is zero")]
    ZeroRate(CurrencyCode),

    #[error("amount overflow converting {from} to {to}")]
    Overflow { from: CurrencyCode, to: CurrencyCode },
}

impl From<ConversionError> for DomainError {
    fn from(value: ConversionError) -> Self {
        DomainError::conversion(value.to_string())
    }
}

/// Converts amounts between currencies.
pub trait CurrencyConverter {
    /// Convert `amount` expressed in `from` into `to` (unrounded).
    fn convert(
        &self,
        from: &CurrencyCode,
        amount: Decimal,
        to: &CurrencyCode,
    ) -> Result<Decimal, ConversionError>;

    /// Convert and round to the precision of the target currency.
    fn convert_rounded(
        &self,
        from: &CurrencyCode,
        amount: Decimal,
        to: &Currency,
    ) -> Result<Decimal, ConversionError> {
        if *from == to.code {
            return Ok(amount);
        }
        Ok(to.round(self.convert(from, amount, &to.code)?))
    }
}

impl<C> CurrencyConverter for &C
where
    C: CurrencyConverter + ?Sized,
{
    fn convert(
        &self,
        from: &CurrencyCode,
        amount: Decimal,
        to: &CurrencyCode,
    ) -> Result<Decimal, ConversionError> {
        (**self).convert(from, amount, to)
    }
}

/// In-memory exchange rates, each expressed as units of the currency per one
/// unit of the base currency.
#[derive(Debug, Clone)]
pub struct RateTable {
    base: CurrencyCode,
    rates: HashMap<CurrencyCode, Decimal>,
}

impl RateTable {
    pub fn new(base: CurrencyCode) -> Self {
        Self {
            base,
            rates: HashMap::new(),
        }
    }

    pub fn base(&self) -> &CurrencyCode {
        &self.base
    }

    /// Register (or replace) the rate of `code` against the base currency.
    pub fn with_rate(mut self, code: CurrencyCode, rate: Decimal) -> Self {
        self.set_rate(code, rate);
        self
    }

    pub fn set_rate(&mut self, code: CurrencyCode, rate: Decimal) {
        self.rates.insert(code, rate);
    }

    fn rate(&self, code: &CurrencyCode) -> Result<Decimal, ConversionError> {
        if *code == self.base {
            return Ok(Decimal::ONE);
        }
        let rate = *self
            .rates
            .get(code)
            .ok_or_else(|| ConversionError::MissingRate(code.clone()))?;
        if rate.is_zero() {
            return Err(ConversionError::ZeroRate(code.clone()));
        }
        Ok(rate)
    }
}

impl CurrencyConverter for RateTable {
    fn convert(
        &self,
        from: &CurrencyCode,
        amount: Decimal,
        to: &CurrencyCode,
    ) -> Result<Decimal, ConversionError> {
        if from == to {
            return Ok(amount);
        }
        let from_rate = self.rate(from)?;
        let to_rate = self.rate(to)?;

        let overflow = || ConversionError::Overflow {
            from: from.clone(),
            to: to.clone(),
        };
        let converted = amount
            .checked_mul(to_rate)
            .and_then(|v| v.checked_div(from_rate))
            .ok_or_else(overflow)?;

        tracing::trace!(%from, %to, %amount, %converted, "converted amount");
        Ok(converted)
    }
}
