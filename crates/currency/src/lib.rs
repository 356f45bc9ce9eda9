//! Currencies, rounding and conversion.
//!
//! Collaborators of the sales domain: precision and rounding of amounts and
//! unit prices, plus converting a requested amount into a sale's currency.

pub mod currency;
pub mod price;
pub mod rates;

pub use currency::{Currency, CurrencyCode};
pub use price::{HalfUpPriceRounding, PriceRounding};
pub use rates::{ConversionError, CurrencyConverter, RateTable};
