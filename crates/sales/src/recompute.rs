//! Price recompute engine.
//!
//! Uniformly rescales the unit prices of a batch of sales, either by a
//! percentage or so that each sale's untaxed amount reaches a target total.
//! Annotation lines (comments, subtotals, titles) are never touched.
//!
//! The engine decides every sale first and only then applies the resulting
//! events, so a failure on any sale leaves the whole batch unchanged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use salesprice_core::{Aggregate, DomainError, DomainResult};
use salesprice_currency::{CurrencyCode, CurrencyConverter, PriceRounding};

use crate::order::{PriceWrite, RepriceLines, SalesOrder, SalesOrderCommand, SalesOrderEvent};

/// How new unit prices are derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RecomputeMethod {
    /// Signed fraction: `-0.10` lowers every price by 10%.
    Percentage { percentage: Decimal },
    /// Target untaxed amount per sale, expressed in `currency`.
    FixedAmount {
        amount: Decimal,
        currency: CurrencyCode,
    },
}

/// Stateless recompute service over a currency converter and a price
/// rounding policy.
#[derive(Debug, Clone)]
pub struct PriceRecompute<C, R> {
    converter: C,
    rounding: R,
}

impl<C, R> PriceRecompute<C, R>
where
    C: CurrencyConverter,
    R: PriceRounding,
{
    pub fn new(converter: C, rounding: R) -> Self {
        Self {
            converter,
            rounding,
        }
    }

    /// Dispatch on the requested method.
    pub fn recompute(
        &self,
        sales: &mut [SalesOrder],
        method: &RecomputeMethod,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Vec<SalesOrderEvent>> {
        match method {
            RecomputeMethod::Percentage { percentage } => {
                self.recompute_by_percentage(sales, *percentage, occurred_at)
            }
            RecomputeMethod::FixedAmount { amount, currency } => {
                self.recompute_by_fixed_amount(sales, *amount, currency, occurred_at)
            }
        }
    }

    /// Multiply every priceable unit price by `1 + percentage`.
    pub fn recompute_by_percentage(
        &self,
        sales: &mut [SalesOrder],
        percentage: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Vec<SalesOrderEvent>> {
        let method = RecomputeMethod::Percentage { percentage };
        self.apply_batch(sales, &method, occurred_at)
    }

    /// Rescale each sale so its untaxed amount becomes `amount`, converted
    /// from `currency` into the sale's own currency.
    pub fn recompute_by_fixed_amount(
        &self,
        sales: &mut [SalesOrder],
        amount: Decimal,
        currency: &CurrencyCode,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Vec<SalesOrderEvent>> {
        let method = RecomputeMethod::FixedAmount {
            amount,
            currency: currency.clone(),
        };
        self.apply_batch(sales, &method, occurred_at)
    }

    /// Factor applied to every priceable unit price of `sale`.
    pub fn factor(&self, sale: &SalesOrder, method: &RecomputeMethod) -> DomainResult<Decimal> {
        match method {
            RecomputeMethod::Percentage { percentage } => Ok(Decimal::ONE + percentage),
            RecomputeMethod::FixedAmount { amount, currency } => {
                self.fixed_amount_factor(sale, *amount, currency)
            }
        }
    }

    /// Factor turning `sale`'s current untaxed amount into `amount`.
    pub fn fixed_amount_factor(
        &self,
        sale: &SalesOrder,
        amount: Decimal,
        currency: &CurrencyCode,
    ) -> DomainResult<Decimal> {
        let sale_currency = sale
            .currency()
            .ok_or_else(|| DomainError::not_found(format!("sales order {}", sale.id_typed())))?;

        let currency_amount = self
            .converter
            .convert_rounded(currency, amount, sale_currency)?;
        if currency_amount.is_zero() {
            return Ok(Decimal::ZERO);
        }

        let base = sale.untaxed_amount();
        if base.is_zero() {
            return Err(DomainError::invalid_state(
                "cannot recompute from zero base amount",
            ));
        }

        currency_amount
            .checked_div(base)
            .ok_or_else(|| DomainError::validation("recompute factor out of range"))
    }

    /// New prices of `sale`'s priceable lines, grouped by identical value.
    ///
    /// Empty when the sale has no priceable line.
    pub fn price_writes(&self, sale: &SalesOrder, factor: Decimal) -> DomainResult<Vec<PriceWrite>> {
        let mut writes: Vec<PriceWrite> = Vec::new();
        let mut by_price: HashMap<Decimal, usize> = HashMap::new();

        for line in sale.priceable_lines() {
            let scaled = line.unit_price.checked_mul(factor).ok_or_else(|| {
                DomainError::validation(format!("unit price overflow on line {}", line.line_no))
            })?;
            let unit_price = self.rounding.round_price(scaled);

            match by_price.get(&unit_price) {
                Some(&idx) => writes[idx].line_nos.push(line.line_no),
                None => {
                    by_price.insert(unit_price, writes.len());
                    writes.push(PriceWrite {
                        line_nos: vec![line.line_no],
                        unit_price,
                    });
                }
            }
        }

        Ok(writes)
    }

    /// Decide one `RepriceLines` command per sale that has priceable lines.
    pub fn plan(
        &self,
        sales: &[SalesOrder],
        method: &RecomputeMethod,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Vec<Option<SalesOrderCommand>>> {
        sales
            .iter()
            .map(|sale| {
                let factor = self.factor(sale, method)?;
                self.reprice_command(sale, factor, occurred_at)
            })
            .collect()
    }

    fn reprice_command(
        &self,
        sale: &SalesOrder,
        factor: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Option<SalesOrderCommand>> {
        let tenant_id = sale
            .tenant_id()
            .ok_or_else(|| DomainError::not_found(format!("sales order {}", sale.id_typed())))?;

        let writes = self.price_writes(sale, factor)?;
        if writes.is_empty() {
            tracing::debug!(order_id = %sale.id_typed(), "no priceable lines, skipping");
            return Ok(None);
        }

        tracing::debug!(
            order_id = %sale.id_typed(),
            %factor,
            writes = writes.len(),
            "recomputed line prices"
        );

        Ok(Some(SalesOrderCommand::RepriceLines(RepriceLines {
            tenant_id,
            order_id: sale.id_typed(),
            writes,
            occurred_at,
        })))
    }

    fn apply_batch(
        &self,
        sales: &mut [SalesOrder],
        method: &RecomputeMethod,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Vec<SalesOrderEvent>> {
        // Decide everything before touching any sale.
        let mut decided = Vec::with_capacity(sales.len());
        for (idx, sale) in sales.iter().enumerate() {
            let decide = || -> DomainResult<Option<Vec<SalesOrderEvent>>> {
                let factor = self.factor(sale, method)?;
                match self.reprice_command(sale, factor, occurred_at)? {
                    Some(command) => sale.handle(&command).map(Some),
                    None => Ok(None),
                }
            };
            match decide() {
                Ok(Some(events)) => decided.push((idx, events)),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        order_id = %sale.id_typed(),
                        kind = err.kind(),
                        %err,
                        "recompute rejected, batch left unchanged"
                    );
                    return Err(err);
                }
            }
        }

        let mut emitted = Vec::new();
        for (idx, events) in decided {
            for ev in &events {
                sales[idx].apply(ev);
            }
            emitted.extend(events);
        }

        tracing::info!(
            ?method,
            sales = sales.len(),
            repriced = emitted.len(),
            "price recompute applied"
        );
        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{
        AddLine, CreateSalesOrder, LineKind, Quote, SalesOrderId, SalesOrderStatus,
    };
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use salesprice_core::{AggregateId, AggregateRoot, TenantId, execute};
    use salesprice_currency::{Currency, HalfUpPriceRounding, RateTable};

    fn code(s: &str) -> CurrencyCode {
        s.parse().unwrap()
    }

    fn engine() -> PriceRecompute<RateTable, HalfUpPriceRounding> {
        let rates = RateTable::new(code("USD")).with_rate(code("EUR"), dec!(0.5));
        PriceRecompute::new(rates, HalfUpPriceRounding::default())
    }

    fn sale_with(currency: &str, lines: &[(LineKind, Decimal, Decimal)]) -> SalesOrder {
        let tenant_id = TenantId::new();
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
        for (kind, quantity, unit_price) in lines {
            execute(
                &mut order,
                &SalesOrderCommand::AddLine(AddLine {
                    tenant_id,
                    order_id,
                    kind: *kind,
                    description: String::new(),
                    quantity: *quantity,
                    unit_price: *unit_price,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        }
        order
    }

    fn goods_service_comment() -> SalesOrder {
        sale_with(
            "USD",
            &[
                (LineKind::Line, dec!(1), dec!(10)),
                (LineKind::Line, dec!(1), dec!(100)),
                (LineKind::Comment, dec!(0), dec!(0)),
            ],
        )
    }

    fn prices(sale: &SalesOrder) -> Vec<Decimal> {
        sale.lines().iter().map(|l| l.unit_price).collect()
    }

    #[test]
    fn percentage_discount_scales_priceable_lines() {
        let mut sales = vec![goods_service_comment()];
        assert_eq!(sales[0].untaxed_amount(), dec!(110.00));

        let events = engine()
            .recompute_by_percentage(&mut sales, dec!(-0.10), Utc::now())
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(prices(&sales[0]), vec![dec!(9), dec!(90), dec!(0)]);
        assert_eq!(sales[0].lines()[0].unit_price.to_string(), "9.0000");
        assert_eq!(sales[0].untaxed_amount(), dec!(99.00));
    }

    #[test]
    fn fixed_amount_hits_target() {
        let mut sales = vec![goods_service_comment()];
        engine()
            .recompute_by_fixed_amount(&mut sales, dec!(60.00), &code("USD"), Utc::now())
            .unwrap();

        assert_eq!(prices(&sales[0]), vec![dec!(5.4545), dec!(54.5455), dec!(0)]);
        assert_eq!(sales[0].untaxed_amount(), dec!(60.00));
    }

    #[test]
    fn fixed_amount_zero_clears_prices() {
        let mut sales = vec![goods_service_comment()];
        engine()
            .recompute_by_fixed_amount(&mut sales, Decimal::ZERO, &code("USD"), Utc::now())
            .unwrap();

        assert!(sales[0].priceable_lines().all(|l| l.unit_price.is_zero()));
        assert_eq!(sales[0].untaxed_amount(), Decimal::ZERO);
    }

    #[test]
    fn fixed_amount_converts_into_sale_currency() {
        // 100 USD at 0.5 EUR/USD = 50 EUR target for a 25 EUR sale.
        let mut sales = vec![sale_with("EUR", &[(LineKind::Line, dec!(1), dec!(25))])];
        engine()
            .recompute_by_fixed_amount(&mut sales, dec!(100), &code("USD"), Utc::now())
            .unwrap();

        assert_eq!(prices(&sales[0]), vec![dec!(50)]);
    }

    #[test]
    fn missing_rate_is_a_conversion_error() {
        let mut sales = vec![sale_with("GBP", &[(LineKind::Line, dec!(1), dec!(25))])];
        let err = engine()
            .recompute_by_fixed_amount(&mut sales, dec!(100), &code("USD"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Conversion(_)));
        assert_eq!(prices(&sales[0]), vec![dec!(25)]);
    }

    #[test]
    fn zero_base_amount_is_rejected() {
        let mut sales = vec![sale_with("USD", &[(LineKind::Line, dec!(1), dec!(0))])];
        let err = engine()
            .recompute_by_fixed_amount(&mut sales, dec!(10), &code("USD"), Utc::now())
            .unwrap_err();
        match err {
            DomainError::InvalidState(msg) if msg.contains("zero base amount") => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sales_without_priceable_lines_are_skipped() {
        let mut sales = vec![sale_with("USD", &[(LineKind::Comment, dec!(0), dec!(0))])];
        let version = sales[0].version();

        let events = engine()
            .recompute_by_percentage(&mut sales, dec!(0.5), Utc::now())
            .unwrap();

        assert!(events.is_empty());
        assert_eq!(sales[0].version(), version);
    }

    #[test]
    fn identical_prices_share_one_write() {
        let sale = sale_with(
            "USD",
            &[
                (LineKind::Line, dec!(1), dec!(10)),
                (LineKind::Subtotal, dec!(0), dec!(0)),
                (LineKind::Line, dec!(3), dec!(10)),
                (LineKind::Line, dec!(1), dec!(20)),
            ],
        );
        let writes = engine().price_writes(&sale, dec!(1.1)).unwrap();
        assert_eq!(
            writes,
            vec![
                PriceWrite {
                    line_nos: vec![1, 3],
                    unit_price: dec!(11.0000),
                },
                PriceWrite {
                    line_nos: vec![4],
                    unit_price: dec!(22.0000),
                },
            ]
        );
    }

    #[test]
    fn failure_on_one_sale_leaves_batch_untouched() {
        let good = goods_service_comment();
        let zero_base = sale_with("USD", &[(LineKind::Line, dec!(1), dec!(0))]);
        let mut sales = vec![good.clone(), zero_base.clone()];

        assert!(engine()
            .recompute_by_fixed_amount(&mut sales, dec!(50), &code("USD"), Utc::now())
            .is_err());
        assert_eq!(sales[0], good);
        assert_eq!(sales[1], zero_base);
    }

    #[test]
    fn confirmed_sale_is_rejected_by_engine() {
        let mut sale = goods_service_comment();
        let tenant_id = sale.tenant_id().unwrap();
        let order_id = sale.id_typed();
        execute(
            &mut sale,
            &SalesOrderCommand::Quote(Quote {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        execute(
            &mut sale,
            &SalesOrderCommand::ConfirmOrder(crate::order::ConfirmOrder {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(sale.status(), SalesOrderStatus::Confirmed);

        let mut sales = vec![sale];
        let err = engine()
            .recompute_by_percentage(&mut sales, dec!(0.1), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn dispatch_matches_direct_calls() {
        let method = RecomputeMethod::Percentage {
            percentage: dec!(0.05),
        };
        let mut via_dispatch = vec![goods_service_comment()];
        let mut direct = via_dispatch.clone();

        engine()
            .recompute(&mut via_dispatch, &method, Utc::now())
            .unwrap();
        engine()
            .recompute_by_percentage(&mut direct, dec!(0.05), Utc::now())
            .unwrap();

        assert_eq!(prices(&via_dispatch[0]), prices(&direct[0]));
    }

    #[test]
    fn plan_does_not_mutate_sales() {
        let sales = vec![
            goods_service_comment(),
            sale_with("USD", &[(LineKind::Title, dec!(0), dec!(0))]),
        ];
        let before = sales.clone();
        let planned = engine()
            .plan(
                &sales,
                &RecomputeMethod::Percentage {
                    percentage: dec!(0.1),
                },
                Utc::now(),
            )
            .unwrap();

        assert_eq!(sales, before);
        assert!(planned[0].is_some());
        assert!(planned[1].is_none());
    }

    #[test]
    fn method_serializes_with_tag() {
        let method = RecomputeMethod::FixedAmount {
            amount: dec!(110.00),
            currency: code("EUR"),
        };
        let json = serde_json::to_value(&method).unwrap();
        assert_eq!(json["method"], "fixed_amount");
        assert_eq!(json["currency"], "EUR");
    }

    fn line_strategy() -> impl Strategy<Value = (LineKind, Decimal, Decimal)> {
        prop_oneof![
            3 => (1i64..5, 1i64..1_000_000).prop_map(|(q, cents)| {
                (LineKind::Line, Decimal::from(q), Decimal::new(cents, 2))
            }),
            1 => Just((LineKind::Comment, Decimal::ZERO, Decimal::ZERO)),
            1 => Just((LineKind::Subtotal, Decimal::ZERO, Decimal::ZERO)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: applying p then its inverse restores prices up to rounding drift.
        #[test]
        fn percentage_then_inverse_restores_prices(
            lines in prop::collection::vec(line_strategy(), 1..8),
            basis_points in 1i64..10_000,
        ) {
            let p = Decimal::new(basis_points, 4);
            let inverse = Decimal::ONE / (Decimal::ONE + p) - Decimal::ONE;
            let original = sale_with("USD", &lines);
            let mut sales = vec![original.clone()];

            let engine = engine();
            engine.recompute_by_percentage(&mut sales, p, Utc::now()).unwrap();
            engine.recompute_by_percentage(&mut sales, inverse, Utc::now()).unwrap();

            for (before, after) in original.lines().iter().zip(sales[0].lines()) {
                prop_assert!((before.unit_price - after.unit_price).abs() <= dec!(0.0002));
            }
        }

        /// Property: annotation lines are never modified.
        #[test]
        fn annotation_lines_are_untouched(
            lines in prop::collection::vec(line_strategy(), 1..8),
            basis_points in -5_000i64..5_000,
        ) {
            let original = sale_with("USD", &lines);
            let mut sales = vec![original.clone()];
            engine()
                .recompute_by_percentage(&mut sales, Decimal::new(basis_points, 4), Utc::now())
                .unwrap();

            for (before, after) in original.lines().iter().zip(sales[0].lines()) {
                if !before.is_priceable() {
                    prop_assert_eq!(before, after);
                }
            }
        }

        /// Property: a fixed amount in the sale currency is reached within one
        /// smallest currency unit per line.
        #[test]
        fn fixed_amount_within_rounding_tolerance(
            lines in prop::collection::vec(line_strategy(), 1..8),
            target_cents in 1i64..10_000_000,
        ) {
            let sale = sale_with("USD", &lines);
            prop_assume!(!sale.untaxed_amount().is_zero());
            let target = Decimal::new(target_cents, 2);
            let mut sales = vec![sale];

            engine()
                .recompute_by_fixed_amount(&mut sales, target, &code("USD"), Utc::now())
                .unwrap();

            let unit = sales[0].currency().unwrap().smallest_unit();
            let tolerance = Decimal::from(sales[0].lines().len() as u64) * unit;
            prop_assert!((sales[0].untaxed_amount() - target).abs() <= tolerance);
        }

        /// Property: one sale's base amount does not influence another's factor.
        #[test]
        fn batch_sales_are_independent(
            first in prop::collection::vec(line_strategy(), 1..6),
            second in prop::collection::vec(line_strategy(), 1..6),
            target_cents in 1i64..1_000_000,
        ) {
            let a = sale_with("USD", &first);
            let b = sale_with("USD", &second);
            prop_assume!(!a.untaxed_amount().is_zero() && !b.untaxed_amount().is_zero());
            let target = Decimal::new(target_cents, 2);
            let engine = engine();

            let mut batch = vec![a.clone(), b.clone()];
            engine.recompute_by_fixed_amount(&mut batch, target, &code("USD"), Utc::now()).unwrap();

            let mut alone = vec![a];
            engine.recompute_by_fixed_amount(&mut alone, target, &code("USD"), Utc::now()).unwrap();
            let mut alone_b = vec![b];
            engine.recompute_by_fixed_amount(&mut alone_b, target, &code("USD"), Utc::now()).unwrap();

            prop_assert_eq!(prices(&batch[0]), prices(&alone[0]));
            prop_assert_eq!(prices(&batch[1]), prices(&alone_b[0]));
        }
    }
}
