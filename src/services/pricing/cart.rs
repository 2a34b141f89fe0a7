use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Rounds a money amount to 2 decimal places, midpoint away from zero.
/// Every per-rate and per-discount contribution is rounded independently
/// before summing.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// One cart line as handed to the engine. Unit price is advisory at cart
/// time; the order validator replaces it with the catalog price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl CartLine {
    pub fn line_subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Priced snapshot of a cart at evaluation time. Transient and engine-local;
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
    pub currency: String,
}

impl CartSnapshot {
    pub fn new(lines: Vec<CartLine>, currency: impl Into<String>) -> Self {
        Self {
            lines,
            currency: currency.into(),
        }
    }

    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_subtotal).sum()
    }

    /// Deduplicated product ids present in the cart.
    pub fn product_ids(&self) -> HashSet<Uuid> {
        self.lines.iter().map(|line| line.product_id).collect()
    }

    pub fn total_quantity(&self) -> i32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}

/// The evaluating customer: id plus resolved group memberships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerContext {
    pub id: Uuid,
    pub group_ids: HashSet<Uuid>,
}

/// Per-line record of how much discount landed on that line, and whether
/// the reduction represents free gift units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineAdjustment {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub discount_amount: Decimal,
    pub is_gift: bool,
}

/// Outcome of evaluating one discount against one cart snapshot.
///
/// Inapplicability is a normal, representable outcome (`ok = false` with a
/// reason), never an error. The three amounts are tracked independently —
/// downstream consumers apply them to different cost components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub ok: bool,
    pub message: Option<String>,
    pub order_discount_amount: Decimal,
    pub product_discount_amount: Decimal,
    pub shipping_discount_amount: Decimal,
    pub free_shipping: bool,
    pub line_adjustments: Vec<LineAdjustment>,
}

impl EvaluationResult {
    pub fn inapplicable(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            ..Self::empty()
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            ok: true,
            message: None,
            order_discount_amount: Decimal::ZERO,
            product_discount_amount: Decimal::ZERO,
            shipping_discount_amount: Decimal::ZERO,
            free_shipping: false,
            line_adjustments: Vec::new(),
        }
    }

    pub fn total_discount(&self) -> Decimal {
        self.order_discount_amount + self.product_discount_amount + self.shipping_discount_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> CartSnapshot {
        let shirt = Uuid::new_v4();
        let mug = Uuid::new_v4();
        CartSnapshot::new(
            vec![
                CartLine {
                    product_id: shirt,
                    variant_id: None,
                    unit_price: dec!(25.00),
                    quantity: 2,
                },
                CartLine {
                    product_id: mug,
                    variant_id: None,
                    unit_price: dec!(9.50),
                    quantity: 3,
                },
                CartLine {
                    product_id: shirt,
                    variant_id: Some(Uuid::new_v4()),
                    unit_price: dec!(27.00),
                    quantity: 1,
                },
            ],
            "EUR",
        )
    }

    #[test]
    fn subtotal_sums_line_subtotals() {
        assert_eq!(snapshot().subtotal(), dec!(105.50));
    }

    #[test]
    fn product_ids_are_deduplicated() {
        assert_eq!(snapshot().product_ids().len(), 2);
    }

    #[test]
    fn total_quantity_spans_all_lines() {
        assert_eq!(snapshot().total_quantity(), 6);
    }

    #[test]
    fn money_rounds_half_away_from_zero() {
        assert_eq!(round_money(dec!(10.47375)), dec!(10.47));
        assert_eq!(round_money(dec!(2.005)), dec!(2.01));
        assert_eq!(round_money(dec!(2.004)), dec!(2.00));
    }
}
