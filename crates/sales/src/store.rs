//! Sales order persistence.
//!
//! Orders are stored as per-(tenant, order) event streams and rebuilt by
//! replay. A commit covers any number of orders and is all-or-nothing.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use salesprice_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, Event, ExpectedVersion, TenantId,
};

use crate::order::{SalesOrder, SalesOrderCommand, SalesOrderEvent, SalesOrderId};

/// Events to append to one order's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub order_id: SalesOrderId,
    pub expected_version: ExpectedVersion,
    pub events: Vec<SalesOrderEvent>,
}

pub trait SalesOrderStore {
    /// Rebuild one order; `NotFound` when its stream is empty.
    fn load(&self, tenant_id: TenantId, order_id: SalesOrderId) -> DomainResult<SalesOrder>;

    /// Append to several streams atomically.
    ///
    /// Every expected version is checked before anything is written.
    fn commit(&self, tenant_id: TenantId, batch: Vec<StreamAppend>) -> DomainResult<()>;

    fn load_many(
        &self,
        tenant_id: TenantId,
        order_ids: &[SalesOrderId],
    ) -> DomainResult<Vec<SalesOrder>> {
        order_ids
            .iter()
            .map(|id| self.load(tenant_id, *id))
            .collect()
    }

    /// Load (or start) an order, handle one command and commit its events.
    fn dispatch(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        command: &SalesOrderCommand,
    ) -> DomainResult<Vec<SalesOrderEvent>> {
        let order = match self.load(tenant_id, order_id) {
            Ok(order) => order,
            Err(DomainError::NotFound(_)) => SalesOrder::empty(order_id),
            Err(err) => return Err(err),
        };

        let events = order.handle(command)?;
        self.commit(
            tenant_id,
            vec![StreamAppend {
                order_id,
                expected_version: ExpectedVersion::Exact(order.version()),
                events: events.clone(),
            }],
        )?;
        Ok(events)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    order_id: SalesOrderId,
}

/// In-memory event-sourced store. Intended for tests and the CLI.
#[derive(Debug, Default)]
pub struct InMemorySalesOrderStore {
    streams: RwLock<HashMap<StreamKey, Vec<SalesOrderEvent>>>,
}

impl InMemorySalesOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> DomainError {
        DomainError::invalid_state("sales order store lock poisoned")
    }
}

impl SalesOrderStore for InMemorySalesOrderStore {
    fn load(&self, tenant_id: TenantId, order_id: SalesOrderId) -> DomainResult<SalesOrder> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;
        let key = StreamKey {
            tenant_id,
            order_id,
        };

        let stream = streams
            .get(&key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DomainError::not_found(format!("sales order {order_id}")))?;

        let mut order = SalesOrder::empty(order_id);
        for ev in stream {
            order.apply(ev);
        }
        Ok(order)
    }

    fn commit(&self, tenant_id: TenantId, batch: Vec<StreamAppend>) -> DomainResult<()> {
        let mut streams = self.streams.write().map_err(|_| Self::poisoned())?;

        let mut named = HashSet::with_capacity(batch.len());
        for append in &batch {
            if !named.insert(append.order_id) {
                return Err(DomainError::invalid_state(format!(
                    "stream {} appears twice in one commit",
                    append.order_id
                )));
            }

            if let Some(ev) = append
                .events
                .iter()
                .find(|e| e.tenant_id() != tenant_id || e.order_id() != append.order_id)
            {
                return Err(DomainError::invalid_state(format!(
                    "event for order {} does not belong to stream {}",
                    ev.order_id(),
                    append.order_id
                )));
            }

            let key = StreamKey {
                tenant_id,
                order_id: append.order_id,
            };
            let current = streams.get(&key).map(|s| s.len() as u64).unwrap_or(0);
            append.expected_version.check(current)?;
        }

        let mut appended = 0usize;
        for append in batch {
            appended += append.events.len();
            for ev in &append.events {
                tracing::trace!(
                    order_id = %append.order_id,
                    event_type = ev.event_type(),
                    "appending event"
                );
            }
            streams
                .entry(StreamKey {
                    tenant_id,
                    order_id: append.order_id,
                })
                .or_default()
                .extend(append.events);
        }

        tracing::debug!(%tenant_id, events = appended, "committed sales order events");
        Ok(())
    }
}
