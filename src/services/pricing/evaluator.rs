//! Single-discount evaluation: a pure, deterministic pipeline from
//! discount definition + cart snapshot to an [`EvaluationResult`].
//!
//! The pipeline is strictly ordered and short-circuits on the first
//! failing step: customer eligibility, product scope resolution, scope
//! matching, order conditions, then the per-kind amount calculation.

use crate::{
    catalog::CollectionIndex,
    entities::discount::{
        CustomerSelection, DiscountKind, DiscountValueType, Model as DiscountModel, ProductScope,
    },
    services::pricing::cart::{
        round_money, CartSnapshot, CustomerContext, EvaluationResult, LineAdjustment,
    },
};
use rust_decimal::Decimal;
use std::collections::HashSet;
use uuid::Uuid;

/// Evaluates one discount against a cart snapshot.
///
/// `collections` must cover every product in the cart; the caller
/// prefetches it so this function does no I/O.
pub fn evaluate(
    discount: &DiscountModel,
    cart: &CartSnapshot,
    customer: Option<&CustomerContext>,
    collections: &CollectionIndex,
) -> EvaluationResult {
    if let Some(failure) = check_customer_eligibility(discount, customer) {
        return failure;
    }

    let eligible = match resolve_scope(discount, cart, collections) {
        Ok(eligible) => eligible,
        Err(failure) => return failure,
    };

    if let Some(failure) = check_order_conditions(discount, cart) {
        return failure;
    }

    match discount.kind {
        DiscountKind::Order => evaluate_order(discount, cart.subtotal()),
        DiscountKind::Shipping => evaluate_shipping(discount),
        DiscountKind::Product => evaluate_product(discount, cart, &eligible),
        DiscountKind::BuyXGetY => evaluate_buy_x_get_y(discount, cart, &eligible),
    }
}

fn check_customer_eligibility(
    discount: &DiscountModel,
    customer: Option<&CustomerContext>,
) -> Option<EvaluationResult> {
    match discount.customer_selection {
        CustomerSelection::All => None,
        CustomerSelection::Groups => {
            let allowed = discount.customer_group_id_set();
            match customer {
                Some(customer) if !customer.group_ids.is_disjoint(&allowed) => None,
                Some(_) => Some(EvaluationResult::inapplicable(
                    "This discount does not apply to your account",
                )),
                None => Some(EvaluationResult::inapplicable(
                    "This discount is reserved to certain customers",
                )),
            }
        }
        CustomerSelection::Customers => {
            let allowed = discount.customer_id_set();
            match customer {
                Some(customer) if allowed.contains(&customer.id) => None,
                _ => Some(EvaluationResult::inapplicable(
                    "This discount is reserved to certain customers",
                )),
            }
        }
    }
}

/// Computes the eligible product id set, failing when a restricted scope
/// matches nothing in the cart.
fn resolve_scope(
    discount: &DiscountModel,
    cart: &CartSnapshot,
    collections: &CollectionIndex,
) -> Result<HashSet<Uuid>, EvaluationResult> {
    let cart_products = cart.product_ids();
    match discount.product_scope {
        ProductScope::All => Ok(cart_products),
        ProductScope::Products => {
            let configured = discount.product_id_set();
            let matched: HashSet<Uuid> = cart_products
                .intersection(&configured)
                .copied()
                .collect();
            if matched.is_empty() {
                Err(EvaluationResult::inapplicable(
                    "This discount only applies to specific products",
                ))
            } else {
                Ok(matched)
            }
        }
        ProductScope::Collections => {
            let wanted = discount.collection_id_set();
            let matched: HashSet<Uuid> = cart_products
                .into_iter()
                .filter(|product_id| collections.product_in_any(*product_id, &wanted))
                .collect();
            if matched.is_empty() {
                Err(EvaluationResult::inapplicable(
                    "This discount only applies to specific collections",
                ))
            } else {
                Ok(matched)
            }
        }
    }
}

fn check_order_conditions(
    discount: &DiscountModel,
    cart: &CartSnapshot,
) -> Option<EvaluationResult> {
    if let Some(min_subtotal) = discount.min_subtotal {
        if cart.subtotal() < min_subtotal {
            return Some(EvaluationResult::inapplicable(format!(
                "A minimum subtotal of {} is required for this discount",
                min_subtotal
            )));
        }
    }
    if let Some(min_quantity) = discount.min_quantity {
        if cart.total_quantity() < min_quantity {
            return Some(EvaluationResult::inapplicable(format!(
                "A minimum of {} items is required for this discount",
                min_quantity
            )));
        }
    }
    None
}

fn evaluate_order(discount: &DiscountModel, subtotal: Decimal) -> EvaluationResult {
    let amount = match discount.value_type {
        DiscountValueType::Percentage => {
            round_money(subtotal * discount.value / Decimal::ONE_HUNDRED)
        }
        DiscountValueType::FixedAmount => round_money(subtotal.min(discount.value)),
        DiscountValueType::FreeShipping => {
            return EvaluationResult::inapplicable(
                "Free shipping cannot be granted by an order discount",
            );
        }
    };
    let amount = amount.min(subtotal);
    if amount <= Decimal::ZERO {
        return EvaluationResult::inapplicable("This discount does not reduce the order total");
    }
    EvaluationResult {
        order_discount_amount: amount,
        ..EvaluationResult::empty()
    }
}

fn evaluate_shipping(discount: &DiscountModel) -> EvaluationResult {
    match discount.value_type {
        DiscountValueType::FreeShipping => EvaluationResult {
            free_shipping: true,
            ..EvaluationResult::empty()
        },
        // Fixed or percentage shipping reductions are not supported.
        _ => EvaluationResult::inapplicable(
            "Only free shipping is supported for shipping discounts",
        ),
    }
}

fn evaluate_product(
    discount: &DiscountModel,
    cart: &CartSnapshot,
    eligible: &HashSet<Uuid>,
) -> EvaluationResult {
    let mut total = Decimal::ZERO;
    let mut adjustments = Vec::new();

    for line in &cart.lines {
        if !eligible.contains(&line.product_id) {
            continue;
        }
        let line_subtotal = line.line_subtotal();
        let amount = match discount.value_type {
            DiscountValueType::Percentage => {
                round_money(line_subtotal * discount.value / Decimal::ONE_HUNDRED)
            }
            DiscountValueType::FixedAmount => round_money(line_subtotal.min(discount.value)),
            DiscountValueType::FreeShipping => {
                return EvaluationResult::inapplicable(
                    "Free shipping cannot be granted by a product discount",
                );
            }
        };
        // A line never yields more than its own subtotal, so the cart-level
        // cap below holds even for percentages above 100.
        let amount = amount.min(line_subtotal);
        if amount <= Decimal::ZERO {
            continue;
        }
        total += amount;
        adjustments.push(LineAdjustment {
            product_id: line.product_id,
            variant_id: line.variant_id,
            discount_amount: amount,
            is_gift: false,
        });
    }

    let total = total.min(cart.subtotal());
    if total <= Decimal::ZERO {
        return EvaluationResult::inapplicable(
            "This discount does not apply to any item in your cart",
        );
    }
    EvaluationResult {
        product_discount_amount: total,
        line_adjustments: adjustments,
        ..EvaluationResult::empty()
    }
}

fn evaluate_buy_x_get_y(
    discount: &DiscountModel,
    cart: &CartSnapshot,
    eligible: &HashSet<Uuid>,
) -> EvaluationResult {
    let (buy, get) = match (discount.buy_quantity, discount.get_quantity) {
        (Some(buy), Some(get)) if buy > 0 && get > 0 => (buy, get),
        _ => {
            return EvaluationResult::inapplicable(
                "This offer is not configured correctly",
            );
        }
    };
    let group_size = buy + get;

    let mut total = Decimal::ZERO;
    let mut adjustments = Vec::new();
    for line in &cart.lines {
        if !eligible.contains(&line.product_id) {
            continue;
        }
        let groups = line.quantity / group_size;
        let gift_quantity = groups * get;
        if gift_quantity <= 0 {
            continue;
        }
        let amount = round_money(line.unit_price * Decimal::from(gift_quantity));
        if amount <= Decimal::ZERO {
            continue;
        }
        total += amount;
        adjustments.push(LineAdjustment {
            product_id: line.product_id,
            variant_id: line.variant_id,
            discount_amount: amount,
            is_gift: true,
        });
    }

    if total <= Decimal::ZERO {
        return EvaluationResult::inapplicable(format!(
            "Add at least {} eligible items to benefit from this offer",
            group_size
        ));
    }
    EvaluationResult {
        product_discount_amount: total,
        line_adjustments: adjustments,
        ..EvaluationResult::empty()
    }
}
