use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use salesprice_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Event, TenantId};
use salesprice_currency::Currency;

/// Sales order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesOrderStatus {
    Draft,
    Quotation,
    Confirmed,
    Cancelled,
}

/// What a sale line represents.
///
/// Only [`LineKind::Line`] carries a quantity and unit price; the other kinds
/// annotate the order and never take part in pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Line,
    Subtotal,
    Title,
    Comment,
}

impl LineKind {
    pub fn is_priceable(self) -> bool {
        matches!(self, LineKind::Line)
    }
}

/// Order line: kind, description, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub kind: LineKind,
    pub description: String,
    /// Zero for non-priceable lines.
    pub quantity: Decimal,
    /// Zero for non-priceable lines.
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn is_priceable(&self) -> bool {
        self.kind.is_priceable()
    }

    /// Line subtotal rounded to the order currency; zero for annotations.
    pub fn amount(&self, currency: &Currency) -> Decimal {
        if !self.is_priceable() {
            return Decimal::ZERO;
        }
        currency.round(self.quantity * self.unit_price)
    }
}

/// New unit price for a group of lines.
///
/// Lines that end up with the same price share one write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceWrite {
    pub line_nos: Vec<u32>,
    pub unit_price: Decimal,
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    id: SalesOrderId,
    tenant_id: Option<TenantId>,
    number: Option<String>,
    currency: Option<Currency>,
    status: SalesOrderStatus,
    lines: Vec<OrderLine>,
    version: u64,
    created: bool,
}

impl SalesOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            number: None,
            currency: None,
            status: SalesOrderStatus::Draft,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn number(&self) -> Option<&str> {
        self.number.as_deref()
    }

    pub fn currency(&self) -> Option<&Currency> {
        self.currency.as_ref()
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn priceable_lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.lines.iter().filter(|l| l.is_priceable())
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Sum of the priceable line amounts, each rounded to the order currency.
    pub fn untaxed_amount(&self) -> Decimal {
        let Some(currency) = &self.currency else {
            return Decimal::ZERO;
        };
        self.lines.iter().map(|l| l.amount(currency)).sum()
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(
            self.status,
            SalesOrderStatus::Draft | SalesOrderStatus::Quotation
        )
    }

    /// Whether the "recompute price" action is offered for this order.
    pub fn can_recompute_price(&self) -> bool {
        self.created && self.is_modifiable()
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub number: Option<String>,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub kind: LineKind,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Quote (draft -> quotation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnToDraft (quotation/cancelled -> draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnToDraft {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder (quotation -> confirmed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder (draft/quotation -> cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RepriceLines.
///
/// Overwrites the unit price of the given priceable lines in one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepriceLines {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub writes: Vec<PriceWrite>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    CreateSalesOrder(CreateSalesOrder),
    AddLine(AddLine),
    Quote(Quote),
    ReturnToDraft(ReturnToDraft),
    ConfirmOrder(ConfirmOrder),
    CancelOrder(CancelOrder),
    RepriceLines(RepriceLines),
}

/// Event: SalesOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub number: Option<String>,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub kind: LineKind,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderQuoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderQuoted {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderReturnedToDraft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReturnedToDraft {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LinesRepriced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesRepriced {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub writes: Vec<PriceWrite>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    SalesOrderCreated(SalesOrderCreated),
    LineAdded(LineAdded),
    OrderQuoted(OrderQuoted),
    OrderReturnedToDraft(OrderReturnedToDraft),
    OrderConfirmed(OrderConfirmed),
    OrderCancelled(OrderCancelled),
    LinesRepriced(LinesRepriced),
}

impl SalesOrderEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            SalesOrderEvent::SalesOrderCreated(e) => e.tenant_id,
            SalesOrderEvent::LineAdded(e) => e.tenant_id,
            SalesOrderEvent::OrderQuoted(e) => e.tenant_id,
            SalesOrderEvent::OrderReturnedToDraft(e) => e.tenant_id,
            SalesOrderEvent::OrderConfirmed(e) => e.tenant_id,
            SalesOrderEvent::OrderCancelled(e) => e.tenant_id,
            SalesOrderEvent::LinesRepriced(e) => e.tenant_id,
        }
    }

    pub fn order_id(&self) -> SalesOrderId {
        match self {
            SalesOrderEvent::SalesOrderCreated(e) => e.order_id,
            SalesOrderEvent::LineAdded(e) => e.order_id,
            SalesOrderEvent::OrderQuoted(e) => e.order_id,
            SalesOrderEvent::OrderReturnedToDraft(e) => e.order_id,
            SalesOrderEvent::OrderConfirmed(e) => e.order_id,
            SalesOrderEvent::OrderCancelled(e) => e.order_id,
            SalesOrderEvent::LinesRepriced(e) => e.order_id,
        }
    }
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::SalesOrderCreated(_) => "sales.order.created",
            SalesOrderEvent::LineAdded(_) => "sales.order.line_added",
            SalesOrderEvent::OrderQuoted(_) => "sales.order.quoted",
            SalesOrderEvent::OrderReturnedToDraft(_) => "sales.order.returned_to_draft",
            SalesOrderEvent::OrderConfirmed(_) => "sales.order.confirmed",
            SalesOrderEvent::OrderCancelled(_) => "sales.order.cancelled",
            SalesOrderEvent::LinesRepriced(_) => "sales.order.lines_repriced",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::SalesOrderCreated(e) => e.occurred_at,
            SalesOrderEvent::LineAdded(e) => e.occurred_at,
            SalesOrderEvent::OrderQuoted(e) => e.occurred_at,
            SalesOrderEvent::OrderReturnedToDraft(e) => e.occurred_at,
            SalesOrderEvent::OrderConfirmed(e) => e.occurred_at,
            SalesOrderEvent::OrderCancelled(e) => e.occurred_at,
            SalesOrderEvent::LinesRepriced(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::SalesOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.number = e.number.clone();
                self.currency = Some(e.currency.clone());
                self.status = SalesOrderStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            SalesOrderEvent::LineAdded(e) => {
                self.lines.push(OrderLine {
                    line_no: e.line_no,
                    kind: e.kind,
                    description: e.description.clone(),
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                });
            }
            SalesOrderEvent::OrderQuoted(_) => {
                self.status = SalesOrderStatus::Quotation;
            }
            SalesOrderEvent::OrderReturnedToDraft(_) => {
                self.status = SalesOrderStatus::Draft;
            }
            SalesOrderEvent::OrderConfirmed(_) => {
                self.status = SalesOrderStatus::Confirmed;
            }
            SalesOrderEvent::OrderCancelled(_) => {
                self.status = SalesOrderStatus::Cancelled;
            }
            SalesOrderEvent::LinesRepriced(e) => {
                for write in &e.writes {
                    for line in self
                        .lines
                        .iter_mut()
                        .filter(|l| write.line_nos.contains(&l.line_no))
                    {
                        line.unit_price = write.unit_price;
                    }
                }
            }
        }

        // +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::CreateSalesOrder(cmd) => self.handle_create(cmd),
            SalesOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            SalesOrderCommand::Quote(cmd) => self.handle_quote(cmd),
            SalesOrderCommand::ReturnToDraft(cmd) => self.handle_return_to_draft(cmd),
            SalesOrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            SalesOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            SalesOrderCommand::RepriceLines(cmd) => self.handle_reprice(cmd),
        }
    }
}

impl SalesOrder {
    fn ensure_exists(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("sales order {order_id}")));
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invalid_state("tenant mismatch"));
        }
        if self.id != order_id {
            return Err(DomainError::invalid_state("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sales order already exists"));
        }

        Ok(vec![SalesOrderEvent::SalesOrderCreated(SalesOrderCreated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            number: cmd.number.clone(),
            currency: cmd.currency.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::invalid_state(
                "cannot modify order once it is confirmed or cancelled",
            ));
        }

        let (quantity, unit_price) = if cmd.kind.is_priceable() {
            if cmd.quantity <= Decimal::ZERO {
                return Err(DomainError::validation("quantity must be positive"));
            }
            if cmd.unit_price < Decimal::ZERO {
                return Err(DomainError::validation("unit_price must not be negative"));
            }
            (cmd.quantity, cmd.unit_price)
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };

        let next_line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;

        Ok(vec![SalesOrderEvent::LineAdded(LineAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: next_line_no,
            kind: cmd.kind,
            description: cmd.description.clone(),
            quantity,
            unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_quote(&self, cmd: &Quote) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if self.status != SalesOrderStatus::Draft {
            return Err(DomainError::invalid_state("only draft orders can be quoted"));
        }

        Ok(vec![SalesOrderEvent::OrderQuoted(OrderQuoted {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return_to_draft(
        &self,
        cmd: &ReturnToDraft,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if !matches!(
            self.status,
            SalesOrderStatus::Quotation | SalesOrderStatus::Cancelled
        ) {
            return Err(DomainError::invalid_state(
                "only quoted or cancelled orders can return to draft",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderReturnedToDraft(
            OrderReturnedToDraft {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if self.status != SalesOrderStatus::Quotation {
            return Err(DomainError::invalid_state(
                "only quoted orders can be confirmed",
            ));
        }

        if self.priceable_lines().next().is_none() {
            return Err(DomainError::validation(
                "cannot confirm order without priceable lines",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderConfirmed(OrderConfirmed {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::invalid_state(
                "only draft or quoted orders can be cancelled",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderCancelled(OrderCancelled {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reprice(&self, cmd: &RepriceLines) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if !self.can_recompute_price() {
            return Err(DomainError::invalid_state(
                "prices can only be recomputed on draft or quoted orders",
            ));
        }

        if cmd.writes.is_empty() {
            return Err(DomainError::validation("no line prices to write"));
        }

        let mut seen = Vec::new();
        for write in &cmd.writes {
            if write.line_nos.is_empty() {
                return Err(DomainError::validation("price write without lines"));
            }
            for &line_no in &write.line_nos {
                let line = self
                    .line(line_no)
                    .ok_or_else(|| DomainError::not_found(format!("line {line_no}")))?;
                if !line.is_priceable() {
                    return Err(DomainError::validation(format!(
                        "line {line_no} is not priceable"
                    )));
                }
                if write.unit_price < Decimal::ZERO {
                    return Err(DomainError::validation(format!(
                        "line {line_no} would get a negative unit_price"
                    )));
                }
                if seen.contains(&line_no) {
                    return Err(DomainError::validation(format!(
                        "line {line_no} written twice"
                    )));
                }
                seen.push(line_no);
            }
        }

        Ok(vec![SalesOrderEvent::LinesRepriced(LinesRepriced {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            writes: cmd.writes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
