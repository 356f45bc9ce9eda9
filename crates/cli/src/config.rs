//! Runtime settings, read from flags with environment fallbacks.

use clap::Args;

use salesprice_currency::{CurrencyCode, HalfUpPriceRounding};
use salesprice_observability::LogFormat;

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Decimal places kept on recomputed unit prices
    #[arg(
        long,
        global = true,
        env = "SALESPRICE_PRICE_DIGITS",
        default_value_t = HalfUpPriceRounding::DEFAULT_DIGITS
    )]
    pub price_digits: u32,

    /// Company currency used when a selection spans several sales
    #[arg(
        long,
        global = true,
        env = "SALESPRICE_COMPANY_CURRENCY",
        default_value = "USD"
    )]
    pub company_currency: CurrencyCode,

    /// Log output format (json or pretty)
    #[arg(
        long,
        global = true,
        env = "SALESPRICE_LOG_FORMAT",
        default_value = "pretty"
    )]
    pub log_format: LogFormat,
}

impl Config {
    pub fn rounding(&self) -> HalfUpPriceRounding {
        HalfUpPriceRounding::new(self.price_digits)
    }
}
