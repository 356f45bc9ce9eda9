//! "Recompute price" action bound to stored sales orders.
//!
//! Loads the selected orders, runs the dialog over them and commits every
//! resulting event in a single batch.

use chrono::{DateTime, Utc};

use salesprice_core::{AggregateRoot, DomainResult, ExpectedVersion};
use salesprice_currency::{CurrencyConverter, PriceRounding};

use crate::order::{SalesOrder, SalesOrderEvent, SalesOrderId};
use crate::recompute::PriceRecompute;
use crate::store::{SalesOrderStore, StreamAppend};
use crate::wizard::{RecomputePriceStart, RecomputePriceWizard, SessionContext};

/// An opened dialog together with the orders it was opened on.
#[derive(Debug, Clone)]
pub struct PendingRecompute {
    session: SessionContext,
    wizard: RecomputePriceWizard,
    sales: Vec<SalesOrder>,
}

impl PendingRecompute {
    pub fn wizard(&self) -> &RecomputePriceWizard {
        &self.wizard
    }

    pub fn form(&self) -> &RecomputePriceStart {
        self.wizard.form()
    }

    pub fn form_mut(&mut self) -> &mut RecomputePriceStart {
        self.wizard.form_mut()
    }

    pub fn sales(&self) -> &[SalesOrder] {
        &self.sales
    }

    pub fn cancel(mut self) {
        self.wizard.cancel();
    }
}

pub struct RecomputePriceAction<'a, S, C, R> {
    store: &'a S,
    engine: &'a PriceRecompute<C, R>,
}

impl<'a, S, C, R> RecomputePriceAction<'a, S, C, R>
where
    S: SalesOrderStore,
    C: CurrencyConverter,
    R: PriceRounding,
{
    pub fn new(store: &'a S, engine: &'a PriceRecompute<C, R>) -> Self {
        Self { store, engine }
    }

    /// Open the dialog on the stored orders `active_ids`.
    pub fn open(
        &self,
        session: &SessionContext,
        active_ids: &[SalesOrderId],
    ) -> DomainResult<PendingRecompute> {
        let sales = self.store.load_many(session.tenant_id, active_ids)?;
        let wizard = RecomputePriceWizard::start(session, &sales)?;
        Ok(PendingRecompute {
            session: session.clone(),
            wizard,
            sales,
        })
    }

    /// Press "Recompute": apply the form and persist every repriced order.
    ///
    /// Nothing is written if any order fails or changed since it was loaded.
    pub fn compute(
        &self,
        pending: &mut PendingRecompute,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Vec<SalesOrderEvent>> {
        let loaded_versions: Vec<(SalesOrderId, u64)> = pending
            .sales
            .iter()
            .map(|s| (s.id_typed(), s.version()))
            .collect();

        let mut working = pending.sales.clone();
        let events = pending
            .wizard
            .compute(self.engine, &mut working, occurred_at)?;

        let batch: Vec<StreamAppend> = loaded_versions
            .into_iter()
            .filter_map(|(order_id, version)| {
                let order_events: Vec<SalesOrderEvent> = events
                    .iter()
                    .filter(|e| e.order_id() == order_id)
                    .cloned()
                    .collect();
                (!order_events.is_empty()).then_some(StreamAppend {
                    order_id,
                    expected_version: ExpectedVersion::Exact(version),
                    events: order_events,
                })
            })
            .collect();

        self.store.commit(pending.session.tenant_id, batch)?;
        pending.sales = working;
        Ok(events)
    }
}
