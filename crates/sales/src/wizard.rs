//! Two-step "recompute price" dialog.
//!
//! `Start` collects the method and its parameter, `Compute` applies it to
//! every originally selected sale, `End` is terminal. Cancelling from
//! `Start` ends the flow without side effects.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use salesprice_core::{DomainError, DomainResult, TenantId};
use salesprice_currency::{CurrencyCode, CurrencyConverter, PriceRounding};

use crate::order::{SalesOrder, SalesOrderEvent, SalesOrderId};
use crate::recompute::{PriceRecompute, RecomputeMethod};

/// Who is acting, made explicit instead of read from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub tenant_id: TenantId,
    /// Currency of the acting user's company, when a company is selected.
    pub company_currency: Option<CurrencyCode>,
}

impl SessionContext {
    pub fn new(tenant_id: TenantId, company_currency: Option<CurrencyCode>) -> Self {
        Self {
            tenant_id,
            company_currency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeMethodKind {
    #[default]
    Percentage,
    FixedAmount,
}

/// Fields of the start form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartField {
    Method,
    Percentage,
    Amount,
    Currency,
}

/// Start form of the dialog.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecomputePriceStart {
    pub method: Option<RecomputeMethodKind>,
    pub percentage: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub currency: Option<CurrencyCode>,
}

impl RecomputePriceStart {
    /// Pre-filled form for a selection of sales.
    ///
    /// A single selected sale pre-fills its currency and current untaxed
    /// amount; otherwise the company currency is used and the amount is left
    /// empty.
    pub fn defaults(session: &SessionContext, sales: &[SalesOrder]) -> Self {
        let mut form = Self {
            method: Some(RecomputeMethodKind::default()),
            currency: session.company_currency.clone(),
            ..Self::default()
        };

        if let [sale] = sales {
            if let Some(currency) = sale.currency() {
                form.currency = Some(currency.code.clone());
            }
            form.amount = Some(sale.untaxed_amount());
        }

        form
    }

    pub fn is_visible(&self, field: StartField) -> bool {
        match field {
            StartField::Method => true,
            StartField::Percentage => self.method == Some(RecomputeMethodKind::Percentage),
            StartField::Amount | StartField::Currency => {
                self.method == Some(RecomputeMethodKind::FixedAmount)
            }
        }
    }

    pub fn is_required(&self, field: StartField) -> bool {
        match field {
            StartField::Method => true,
            _ => self.is_visible(field),
        }
    }

    /// Turn the form into a request, ignoring fields of the other method.
    pub fn validate(&self) -> DomainResult<RecomputeMethod> {
        let method = self
            .method
            .ok_or_else(|| DomainError::validation("recompute method is required"))?;

        match method {
            RecomputeMethodKind::Percentage => {
                let percentage = self
                    .percentage
                    .ok_or_else(|| DomainError::validation("percentage is required"))?;
                Ok(RecomputeMethod::Percentage { percentage })
            }
            RecomputeMethodKind::FixedAmount => {
                let amount = self
                    .amount
                    .ok_or_else(|| DomainError::validation("amount is required"))?;
                let currency = self
                    .currency
                    .clone()
                    .ok_or_else(|| DomainError::validation("currency is required"))?;
                Ok(RecomputeMethod::FixedAmount { amount, currency })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardState {
    Start,
    Compute,
    End,
}

/// One invocation of the dialog over a fixed selection of sales.
#[derive(Debug, Clone)]
pub struct RecomputePriceWizard {
    state: WizardState,
    active_ids: Vec<SalesOrderId>,
    form: RecomputePriceStart,
}

impl RecomputePriceWizard {
    /// Open the dialog on `sales`.
    ///
    /// Refused when nothing is selected, when a sale is selected twice or
    /// when any selected sale is past quotation.
    pub fn start(session: &SessionContext, sales: &[SalesOrder]) -> DomainResult<Self> {
        if sales.is_empty() {
            return Err(DomainError::validation("no sales order selected"));
        }
        for (idx, sale) in sales.iter().enumerate() {
            if sales[..idx].iter().any(|s| s.id_typed() == sale.id_typed()) {
                return Err(DomainError::validation(format!(
                    "sales order {} selected twice",
                    sale.id_typed()
                )));
            }
        }
        if let Some(sale) = sales.iter().find(|s| !s.can_recompute_price()) {
            return Err(DomainError::invalid_state(format!(
                "cannot recompute price of sales order {} in state {:?}",
                sale.id_typed(),
                sale.status()
            )));
        }

        tracing::info!(selected = sales.len(), "recompute price dialog opened");

        Ok(Self {
            state: WizardState::Start,
            active_ids: sales.iter().map(|s| s.id_typed()).collect(),
            form: RecomputePriceStart::defaults(session, sales),
        })
    }

    pub fn state(&self) -> WizardState {
        self.state
    }

    pub fn active_ids(&self) -> &[SalesOrderId] {
        &self.active_ids
    }

    pub fn form(&self) -> &RecomputePriceStart {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut RecomputePriceStart {
        &mut self.form
    }

    /// "Cancel" button.
    pub fn cancel(&mut self) {
        if self.state == WizardState::Start {
            tracing::info!("recompute price dialog cancelled");
        }
        self.state = WizardState::End;
    }

    /// "Recompute" button.
    ///
    /// `sales` must hold every originally selected sale. On error the dialog
    /// goes back to `Start` so the form can be corrected and resubmitted.
    pub fn compute<C, R>(
        &mut self,
        engine: &PriceRecompute<C, R>,
        sales: &mut [SalesOrder],
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Vec<SalesOrderEvent>>
    where
        C: CurrencyConverter,
        R: PriceRounding,
    {
        if self.state != WizardState::Start {
            return Err(DomainError::invalid_state(format!(
                "recompute dialog is in state {:?}, expected Start",
                self.state
            )));
        }

        let method = self.form.validate()?;
        self.ensure_selection(sales)?;

        self.state = WizardState::Compute;
        match engine.recompute(sales, &method, occurred_at) {
            Ok(events) => {
                self.state = WizardState::End;
                tracing::info!(?method, events = events.len(), "recompute price dialog done");
                Ok(events)
            }
            Err(err) => {
                self.state = WizardState::Start;
                Err(err)
            }
        }
    }

    fn ensure_selection(&self, sales: &[SalesOrder]) -> DomainResult<()> {
        if sales.len() != self.active_ids.len() {
            return Err(DomainError::invalid_state(
                "sales passed to compute differ from the selection",
            ));
        }
        for id in &self.active_ids {
            if !sales.iter().any(|s| s.id_typed() == *id) {
                return Err(DomainError::not_found(format!("sales order {id}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{
        AddLine, ConfirmOrder, CreateSalesOrder, LineKind, Quote, SalesOrderCommand,
    };
    use rust_decimal_macros::dec;
    use salesprice_core::{AggregateId, execute};
    use salesprice_currency::{Currency, HalfUpPriceRounding, RateTable};

    fn code(s: &str) -> CurrencyCode {
        s.parse().unwrap()
    }

    fn engine() -> PriceRecompute<RateTable, HalfUpPriceRounding> {
        PriceRecompute::new(RateTable::new(code("USD")), HalfUpPriceRounding::default())
    }

    fn session(tenant_id: TenantId) -> SessionContext {
        SessionContext::new(tenant_id, Some(code("USD")))
    }

    fn sale(tenant_id: TenantId, currency: &str, prices: &[Decimal]) -> SalesOrder {
        let order_id = SalesOrderId::new(AggregateId::new());
        let mut order = SalesOrder::empty(order_id);
        execute(
            &mut order,
            &SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                tenant_id,
                order_id,
                number: None,
                currency: Currency::with_default_digits(code(currency)),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        for price in prices {
            execute(
                &mut order,
                &SalesOrderCommand::AddLine(AddLine {
                    tenant_id,
                    order_id,
                    kind: LineKind::Line,
                    description: "item".to_string(),
                    quantity: dec!(1),
                    unit_price: *price,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        }
        order
    }

    #[test]
    fn single_sale_prefills_amount_and_currency() {
        let tenant_id = TenantId::new();
        let sales = vec![sale(tenant_id, "EUR", &[dec!(10), dec!(100)])];
        let wizard = RecomputePriceWizard::start(&session(tenant_id), &sales).unwrap();

        let form = wizard.form();
        assert_eq!(form.method, Some(RecomputeMethodKind::Percentage));
        assert_eq!(form.amount, Some(dec!(110.00)));
        assert_eq!(form.currency, Some(code("EUR")));
        assert_eq!(wizard.state(), WizardState::Start);
    }

    #[test]
    fn several_sales_default_to_company_currency() {
        let tenant_id = TenantId::new();
        let sales = vec![
            sale(tenant_id, "EUR", &[dec!(10)]),
            sale(tenant_id, "EUR", &[dec!(20)]),
        ];
        let wizard = RecomputePriceWizard::start(&session(tenant_id), &sales).unwrap();

        assert_eq!(wizard.form().amount, None);
        assert_eq!(wizard.form().currency, Some(code("USD")));
        assert_eq!(wizard.active_ids().len(), 2);
    }

    #[test]
    fn field_visibility_follows_method() {
        let mut form = RecomputePriceStart {
            method: Some(RecomputeMethodKind::Percentage),
            ..Default::default()
        };
        assert!(form.is_required(StartField::Percentage));
        assert!(!form.is_visible(StartField::Amount));
        assert!(!form.is_required(StartField::Currency));

        form.method = Some(RecomputeMethodKind::FixedAmount);
        assert!(!form.is_visible(StartField::Percentage));
        assert!(form.is_required(StartField::Amount));
        assert!(form.is_required(StartField::Currency));
        assert!(form.is_required(StartField::Method));
    }

    #[test]
    fn validation_requires_method_parameters() {
        let mut form = RecomputePriceStart::default();
        assert!(matches!(form.validate(), Err(DomainError::Validation(_))));

        form.method = Some(RecomputeMethodKind::Percentage);
        match form.validate() {
            Err(DomainError::Validation(msg)) if msg.contains("percentage") => {}
            other => panic!("unexpected: {other:?}"),
        }

        form.method = Some(RecomputeMethodKind::FixedAmount);
        form.amount = Some(dec!(10));
        match form.validate() {
            Err(DomainError::Validation(msg)) if msg.contains("currency") => {}
            other => panic!("unexpected: {other:?}"),
        }

        // Values of the other method are ignored.
        form.percentage = Some(dec!(0.5));
        form.currency = Some(code("USD"));
        assert_eq!(
            form.validate().unwrap(),
            RecomputeMethod::FixedAmount {
                amount: dec!(10),
                currency: code("USD"),
            }
        );
    }

    #[test]
    fn compute_applies_to_whole_selection_and_ends() {
        let tenant_id = TenantId::new();
        let mut sales = vec![
            sale(tenant_id, "USD", &[dec!(10)]),
            sale(tenant_id, "USD", &[dec!(40)]),
        ];
        let mut wizard = RecomputePriceWizard::start(&session(tenant_id), &sales).unwrap();
        wizard.form_mut().percentage = Some(dec!(-0.5));

        let events = wizard.compute(&engine(), &mut sales, Utc::now()).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(wizard.state(), WizardState::End);
        assert_eq!(sales[0].lines()[0].unit_price, dec!(5));
        assert_eq!(sales[1].lines()[0].unit_price, dec!(20));

        // End is terminal.
        assert!(matches!(
            wizard.compute(&engine(), &mut sales, Utc::now()),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn cancel_has_no_side_effects() {
        let tenant_id = TenantId::new();
        let mut sales = vec![sale(tenant_id, "USD", &[dec!(10)])];
        let before = sales.clone();
        let mut wizard = RecomputePriceWizard::start(&session(tenant_id), &sales).unwrap();
        wizard.form_mut().percentage = Some(dec!(0.2));
        wizard.cancel();

        assert_eq!(wizard.state(), WizardState::End);
        assert!(wizard.compute(&engine(), &mut sales, Utc::now()).is_err());
        assert_eq!(sales, before);
    }

    #[test]
    fn validation_error_keeps_dialog_open() {
        let tenant_id = TenantId::new();
        let mut sales = vec![sale(tenant_id, "USD", &[dec!(10)])];
        let mut wizard = RecomputePriceWizard::start(&session(tenant_id), &sales).unwrap();

        assert!(matches!(
            wizard.compute(&engine(), &mut sales, Utc::now()),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(wizard.state(), WizardState::Start);

        wizard.form_mut().percentage = Some(dec!(0.1));
        wizard.compute(&engine(), &mut sales, Utc::now()).unwrap();
        assert_eq!(sales[0].lines()[0].unit_price, dec!(11));
    }

    #[test]
    fn engine_error_returns_to_start() {
        let tenant_id = TenantId::new();
        let mut sales = vec![sale(tenant_id, "USD", &[dec!(0)])];
        let mut wizard = RecomputePriceWizard::start(&session(tenant_id), &sales).unwrap();
        let form = wizard.form_mut();
        form.method = Some(RecomputeMethodKind::FixedAmount);
        form.amount = Some(dec!(50));

        assert!(matches!(
            wizard.compute(&engine(), &mut sales, Utc::now()),
            Err(DomainError::InvalidState(_))
        ));
        assert_eq!(wizard.state(), WizardState::Start);
    }

    #[test]
    fn compute_requires_original_selection() {
        let tenant_id = TenantId::new();
        let selected = vec![sale(tenant_id, "USD", &[dec!(10)])];
        let mut wizard = RecomputePriceWizard::start(&session(tenant_id), &selected).unwrap();
        wizard.form_mut().percentage = Some(dec!(0.1));

        let mut other = vec![sale(tenant_id, "USD", &[dec!(10)])];
        assert!(matches!(
            wizard.compute(&engine(), &mut other, Utc::now()),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn repeated_sale_is_rejected() {
        let tenant_id = TenantId::new();
        let once = sale(tenant_id, "USD", &[dec!(10)]);
        let sales = vec![once.clone(), once];

        let err = RecomputePriceWizard::start(&session(tenant_id), &sales).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("selected twice")));
    }

    #[test]
    fn confirmed_sales_cannot_open_dialog() {
        let tenant_id = TenantId::new();
        let mut confirmed = sale(tenant_id, "USD", &[dec!(10)]);
        let order_id = confirmed.id_typed();
        execute(
            &mut confirmed,
            &SalesOrderCommand::Quote(Quote {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        execute(
            &mut confirmed,
            &SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let sales = vec![sale(tenant_id, "USD", &[dec!(5)]), confirmed];
        assert!(matches!(
            RecomputePriceWizard::start(&session(tenant_id), &sales),
            Err(DomainError::InvalidState(_))
        ));
        assert!(matches!(
            RecomputePriceWizard::start(&session(tenant_id), &[]),
            Err(DomainError::Validation(_))
        ));
    }
}
