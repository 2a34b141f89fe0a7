//! Property-based tests for the pricing engine invariants.
//!
//! These use proptest to exercise the evaluator and tax calculator across
//! wide input ranges, catching edge cases the worked-example unit tests
//! would miss.

use chrono::Utc;
use pricing_engine::catalog::CollectionIndex;
use pricing_engine::entities::discount::{
    CustomerSelection, DiscountKind, DiscountMethod, DiscountValueType, ProductScope,
};
use pricing_engine::entities::{DiscountModel, TaxRateModel};
use pricing_engine::services::pricing::cart::{CartLine, CartSnapshot};
use pricing_engine::services::pricing::evaluator::evaluate;
use pricing_engine::services::pricing::tax::compute_tax;
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

fn discount(
    kind: DiscountKind,
    value_type: DiscountValueType,
    value: Decimal,
    buy_quantity: Option<i32>,
    get_quantity: Option<i32>,
) -> DiscountModel {
    let now = Utc::now();
    DiscountModel {
        id: Uuid::new_v4(),
        code: "PROP".to_string(),
        name: "Property test".to_string(),
        method: DiscountMethod::Code,
        kind,
        value_type,
        value,
        buy_quantity,
        get_quantity,
        product_scope: ProductScope::All,
        product_ids: serde_json::json!([]),
        collection_ids: serde_json::json!([]),
        customer_selection: CustomerSelection::All,
        customer_group_ids: serde_json::json!([]),
        customer_ids: serde_json::json!([]),
        min_subtotal: None,
        min_quantity: None,
        priority: 0,
        usage_limit: None,
        usage_limit_per_customer: None,
        starts_at: None,
        ends_at: None,
        is_active: true,
        combines_with_product_discounts: true,
        combines_with_order_discounts: true,
        combines_with_shipping_discounts: true,
        created_at: now,
        updated_at: now,
    }
}

fn tax_rate(percent: Decimal, compound: bool, priority: i32) -> TaxRateModel {
    let now = Utc::now();
    TaxRateModel {
        id: Uuid::new_v4(),
        zone_id: Uuid::new_v4(),
        name: format!("rate-{}", priority),
        rate: percent,
        compound,
        shipping_taxable: false,
        priority,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn money_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn lines_strategy() -> impl Strategy<Value = Vec<CartLine>> {
    proptest::collection::vec((money_strategy(), 1i32..20), 1..6).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(unit_price, quantity)| CartLine {
                product_id: Uuid::new_v4(),
                variant_id: None,
                unit_price,
                quantity,
            })
            .collect()
    })
}

fn kind_and_value_strategy() -> impl Strategy<Value = (DiscountKind, DiscountValueType, Decimal)> {
    let kind = prop_oneof![Just(DiscountKind::Order), Just(DiscountKind::Product)];
    let value_type = prop_oneof![
        Just(DiscountValueType::Percentage),
        Just(DiscountValueType::FixedAmount),
    ];
    // Percentages above 100 and fixed amounts above any plausible subtotal
    // are deliberately in range; the cap invariant must absorb them.
    (kind, value_type, (0i64..30_000).prop_map(|v| Decimal::new(v, 1)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn evaluation_is_idempotent(
        lines in lines_strategy(),
        (kind, value_type, value) in kind_and_value_strategy(),
    ) {
        let d = discount(kind, value_type, value, None, None);
        let cart = CartSnapshot::new(lines, "EUR");
        let first = evaluate(&d, &cart, None, &CollectionIndex::default());
        let second = evaluate(&d, &cart, None, &CollectionIndex::default());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn discount_amounts_never_exceed_the_subtotal(
        lines in lines_strategy(),
        (kind, value_type, value) in kind_and_value_strategy(),
    ) {
        let d = discount(kind, value_type, value, None, None);
        let cart = CartSnapshot::new(lines, "EUR");
        let result = evaluate(&d, &cart, None, &CollectionIndex::default());
        if result.ok {
            let combined = result.order_discount_amount + result.product_discount_amount;
            prop_assert!(combined <= cart.subtotal(),
                "discount {} exceeds subtotal {}", combined, cart.subtotal());
            prop_assert!(result.order_discount_amount >= Decimal::ZERO);
            prop_assert!(result.product_discount_amount >= Decimal::ZERO);
        }
    }

    #[test]
    fn gifts_never_exceed_the_purchased_quantity(
        unit_price in money_strategy(),
        quantity in 1i32..60,
        buy in 1i32..6,
        get in 1i32..6,
    ) {
        let d = discount(
            DiscountKind::BuyXGetY,
            DiscountValueType::Percentage,
            Decimal::ZERO,
            Some(buy),
            Some(get),
        );
        let cart = CartSnapshot::new(
            vec![CartLine {
                product_id: Uuid::new_v4(),
                variant_id: None,
                unit_price,
                quantity,
            }],
            "EUR",
        );
        let result = evaluate(&d, &cart, None, &CollectionIndex::default());

        let group_size = buy + get;
        let expected_gifts = (quantity / group_size) * get;
        prop_assert!(expected_gifts <= quantity);
        if result.ok {
            prop_assert_eq!(result.line_adjustments.len(), 1);
            prop_assert!(result.line_adjustments[0].is_gift);
            // The gift amount is the gift units at the authoritative price.
            let expected = (unit_price * Decimal::from(expected_gifts)).round_dp(2);
            prop_assert_eq!(result.product_discount_amount, expected);
            prop_assert!(result.product_discount_amount <= cart.subtotal());
        } else {
            prop_assert_eq!(expected_gifts, 0);
        }
    }

    #[test]
    fn tax_is_monotone_in_the_base(
        base_cents in 0i64..1_000_000,
        increase_cents in 0i64..1_000_000,
        rates in proptest::collection::vec(
            ((0i64..3_000).prop_map(|r| Decimal::new(r, 2)), any::<bool>()),
            1..4,
        ),
    ) {
        let rates: Vec<TaxRateModel> = rates
            .into_iter()
            .enumerate()
            .map(|(position, (percent, compound))| tax_rate(percent, compound, position as i32))
            .collect();

        let smaller = Decimal::new(base_cents, 2);
        let larger = Decimal::new(base_cents + increase_cents, 2);
        let (tax_smaller, _) = compute_tax(&rates, smaller, Decimal::ZERO);
        let (tax_larger, _) = compute_tax(&rates, larger, Decimal::ZERO);
        prop_assert!(tax_larger >= tax_smaller,
            "tax decreased from {} to {} when base grew", tax_smaller, tax_larger);
    }
}
