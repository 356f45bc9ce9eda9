//! What the command line prints: one entry per sale, in input order.

use anyhow::Result;
use rust_decimal::Decimal;
use serde::Serialize;

use salesprice_core::TenantId;
use salesprice_currency::CurrencyCode;
use salesprice_sales::{OrderLine, SalesOrder, SalesOrderId, SalesOrderStatus, SalesOrderStore};

#[derive(Debug, Clone, Serialize)]
pub struct SaleView {
    pub id: SalesOrderId,
    pub number: Option<String>,
    pub currency: Option<CurrencyCode>,
    pub state: SalesOrderStatus,
    pub untaxed_amount: Decimal,
    pub lines: Vec<OrderLine>,
}

impl From<&SalesOrder> for SaleView {
    fn from(sale: &SalesOrder) -> Self {
        Self {
            id: sale.id_typed(),
            number: sale.number().map(str::to_owned),
            currency: sale.currency().map(|c| c.code.clone()),
            state: sale.status(),
            untaxed_amount: sale.untaxed_amount(),
            lines: sale.lines().to_vec(),
        }
    }
}

pub fn sale_views<S: SalesOrderStore>(
    store: &S,
    tenant_id: TenantId,
    ids: &[SalesOrderId],
) -> Result<Vec<SaleView>> {
    Ok(store
        .load_many(tenant_id, ids)?
        .iter()
        .map(SaleView::from)
        .collect())
}

pub fn print_json(views: &[SaleView]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(views)?);
    Ok(())
}
