use anyhow::{Context, Result, bail};
use chrono::Utc;
use rust_decimal::Decimal;

use salesprice_core::TenantId;
use salesprice_currency::{CurrencyCode, RateTable};
use salesprice_sales::{
    InMemorySalesOrderStore, PriceRecompute, RecomputeMethodKind, RecomputePriceAction,
    RecomputePriceStart, SalesOrderId, SalesOrderStore, SessionContext,
};

use crate::config::Config;
use crate::input::{SalesDocument, load_sales};
use crate::output::{SaleView, sale_views};

/// Values typed into the dialog; unset fields keep their pre-filled default.
#[derive(Debug, Clone, Default)]
pub struct FormInput {
    pub percentage: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub currency: Option<CurrencyCode>,
}

impl FormInput {
    fn fill(&self, form: &mut RecomputePriceStart) {
        if let Some(percentage) = self.percentage {
            form.method = Some(RecomputeMethodKind::Percentage);
            form.percentage = Some(percentage);
        } else if let Some(amount) = self.amount {
            form.method = Some(RecomputeMethodKind::FixedAmount);
            form.amount = Some(amount);
        }
        if let Some(currency) = &self.currency {
            form.currency = Some(currency.clone());
        }
    }
}

/// Load `doc`, recompute the selected sales (all of them when `numbers` is
/// empty) and return every sale as it stands afterwards.
pub fn recompute(
    config: &Config,
    doc: &SalesDocument,
    rates: Option<RateTable>,
    numbers: &[String],
    input: &FormInput,
) -> Result<Vec<SaleView>> {
    let company_currency = doc
        .company_currency
        .clone()
        .unwrap_or_else(|| config.company_currency.clone());
    let rates = rates.unwrap_or_else(|| RateTable::new(company_currency.clone()));

    let store = InMemorySalesOrderStore::new();
    let tenant_id = TenantId::new();
    let now = Utc::now();
    let ids = load_sales(&store, tenant_id, doc, now)?;
    let selected = select(&store, tenant_id, &ids, numbers)?;

    let engine = PriceRecompute::new(rates, config.rounding());
    let action = RecomputePriceAction::new(&store, &engine);
    let session = SessionContext::new(tenant_id, Some(company_currency));

    let mut pending = action
        .open(&session, &selected)
        .context("cannot recompute price of this selection")?;
    input.fill(pending.form_mut());
    let events = action
        .compute(&mut pending, now)
        .context("price recomputation failed")?;

    tracing::info!(
        sales = selected.len(),
        events = events.len(),
        "recomputed sale prices"
    );
    sale_views(&store, tenant_id, &ids)
}

pub fn show(doc: &SalesDocument) -> Result<Vec<SaleView>> {
    let store = InMemorySalesOrderStore::new();
    let tenant_id = TenantId::new();
    let ids = load_sales(&store, tenant_id, doc, Utc::now())?;
    sale_views(&store, tenant_id, &ids)
}

fn select<S: SalesOrderStore>(
    store: &S,
    tenant_id: TenantId,
    ids: &[SalesOrderId],
    numbers: &[String],
) -> Result<Vec<SalesOrderId>> {
    if numbers.is_empty() {
        return Ok(ids.to_vec());
    }

    let sales = store.load_many(tenant_id, ids)?;
    let mut selected: Vec<SalesOrderId> = Vec::with_capacity(numbers.len());
    for number in numbers {
        let Some(sale) = sales.iter().find(|s| s.number() == Some(number.as_str())) else {
            bail!("no sale numbered {number} in input");
        };
        // Repeating `--sale` selects the sale once.
        if !selected.contains(&sale.id_typed()) {
            selected.push(sale.id_typed());
        }
    }
    Ok(selected)
}
