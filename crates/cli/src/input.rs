//! JSON documents read by the command line: the sales to work on and an
//! optional exchange-rate table.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use salesprice_core::{AggregateId, TenantId};
use salesprice_currency::{Currency, CurrencyCode, RateTable};
use salesprice_sales::{
    AddLine, CancelOrder, ConfirmOrder, CreateSalesOrder, LineKind, Quote, SalesOrderCommand,
    SalesOrderId, SalesOrderStatus, SalesOrderStore,
};

#[derive(Debug, Clone, Deserialize)]
pub struct SalesDocument {
    /// Overrides the configured company currency when present.
    #[serde(default)]
    pub company_currency: Option<CurrencyCode>,
    pub sales: Vec<SaleInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaleInput {
    #[serde(default)]
    pub number: Option<String>,
    pub currency: CurrencyCode,
    #[serde(default = "default_currency_digits")]
    pub currency_digits: u32,
    #[serde(default = "default_state")]
    pub state: SalesOrderStatus,
    #[serde(default)]
    pub lines: Vec<LineInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineInput {
    #[serde(rename = "type", default = "default_line_kind")]
    pub kind: LineKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
}

fn default_currency_digits() -> u32 {
    Currency::DEFAULT_DIGITS
}

fn default_state() -> SalesOrderStatus {
    SalesOrderStatus::Draft
}

fn default_line_kind() -> LineKind {
    LineKind::Line
}

/// Exchange rates against `base`: one unit of `base` buys `rate` units.
#[derive(Debug, Clone, Deserialize)]
pub struct RatesDocument {
    pub base: CurrencyCode,
    #[serde(default)]
    pub rates: BTreeMap<CurrencyCode, Decimal>,
}

impl RatesDocument {
    pub fn into_table(self) -> RateTable {
        self.rates
            .into_iter()
            .fold(RateTable::new(self.base), |table, (code, rate)| {
                table.with_rate(code, rate)
            })
    }
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Create every sale of `doc` in `store` and walk it to its declared state.
pub fn load_sales<S: SalesOrderStore>(
    store: &S,
    tenant_id: TenantId,
    doc: &SalesDocument,
    occurred_at: DateTime<Utc>,
) -> Result<Vec<SalesOrderId>> {
    let mut ids = Vec::with_capacity(doc.sales.len());

    for (index, sale) in doc.sales.iter().enumerate() {
        let order_id = SalesOrderId::new(AggregateId::new());
        let label = sale
            .number
            .clone()
            .unwrap_or_else(|| format!("#{}", index + 1));

        for command in sale_commands(tenant_id, order_id, sale, occurred_at) {
            store
                .dispatch(tenant_id, order_id, &command)
                .with_context(|| format!("failed to load sale {label}"))?;
        }

        tracing::debug!(%order_id, sale = %label, lines = sale.lines.len(), "loaded sale");
        ids.push(order_id);
    }

    Ok(ids)
}

fn sale_commands(
    tenant_id: TenantId,
    order_id: SalesOrderId,
    sale: &SaleInput,
    occurred_at: DateTime<Utc>,
) -> Vec<SalesOrderCommand> {
    let mut commands = vec![SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
        tenant_id,
        order_id,
        number: sale.number.clone(),
        currency: Currency::new(sale.currency.clone(), sale.currency_digits),
        occurred_at,
    })];

    commands.extend(sale.lines.iter().map(|line| {
        SalesOrderCommand::AddLine(AddLine {
            tenant_id,
            order_id,
            kind: line.kind,
            description: line.description.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            occurred_at,
        })
    }));

    let quote = SalesOrderCommand::Quote(Quote {
        tenant_id,
        order_id,
        occurred_at,
    });
    match sale.state {
        SalesOrderStatus::Draft => {}
        SalesOrderStatus::Quotation => commands.push(quote),
        SalesOrderStatus::Confirmed => {
            commands.push(quote);
            commands.push(SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                tenant_id,
                order_id,
                occurred_at,
            }));
        }
        SalesOrderStatus::Cancelled => commands.push(SalesOrderCommand::CancelOrder(CancelOrder {
            tenant_id,
            order_id,
            occurred_at,
        })),
    }

    commands
}
