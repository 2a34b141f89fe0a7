//! Cart-time discount application: a single manual code, or the full set
//! of automatic discounts. Advisory only — the order validator recomputes
//! everything server-side at submission time.

use crate::{
    catalog::CatalogReader,
    config::AppConfig,
    entities::{
        discount::{self, DiscountCategory, DiscountMethod},
        Discount, DiscountModel,
    },
    errors::ServiceError,
    services::pricing::{
        cart::{CartSnapshot, CustomerContext, EvaluationResult, LineAdjustment},
        evaluator, usage,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// One successfully applied automatic discount.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPromotion {
    pub discount_id: Uuid,
    pub code: String,
    pub result: EvaluationResult,
}

/// Discount amounts accumulated per cost component.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiscountTotals {
    pub order: Decimal,
    pub product: Decimal,
    pub shipping: Decimal,
    pub free_shipping: bool,
}

impl DiscountTotals {
    pub fn total(&self) -> Decimal {
        self.order + self.product + self.shipping
    }
}

/// Result of applying all eligible automatic discounts to a cart.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomaticApplication {
    pub promotions: Vec<AppliedPromotion>,
    /// Line adjustments keyed by discount code, so every euro of discount
    /// can be attributed to its source.
    pub line_adjustments_by_code: HashMap<String, Vec<LineAdjustment>>,
    pub totals: DiscountTotals,
}

/// Returns the first already-applied category the candidate refuses to
/// stack with, checked in a fixed product, order, shipping order.
pub fn check_combinability(
    candidate: &DiscountModel,
    existing: &HashSet<DiscountCategory>,
) -> Option<DiscountCategory> {
    [
        DiscountCategory::Product,
        DiscountCategory::Order,
        DiscountCategory::Shipping,
    ]
    .into_iter()
    .find(|category| existing.contains(category) && !candidate.combines_with(*category))
}

/// Folds successful evaluations into component totals and per-code line
/// adjustments. Amounts accumulate additively across promotions.
pub fn accumulate(promotions: &[AppliedPromotion]) -> AutomaticApplication {
    let mut totals = DiscountTotals::default();
    let mut line_adjustments_by_code: HashMap<String, Vec<LineAdjustment>> = HashMap::new();

    for promotion in promotions {
        let result = &promotion.result;
        totals.order += result.order_discount_amount;
        totals.product += result.product_discount_amount;
        totals.shipping += result.shipping_discount_amount;
        totals.free_shipping |= result.free_shipping;
        if !result.line_adjustments.is_empty() {
            line_adjustments_by_code
                .entry(promotion.code.clone())
                .or_default()
                .extend(result.line_adjustments.iter().cloned());
        }
    }

    AutomaticApplication {
        promotions: promotions.to_vec(),
        line_adjustments_by_code,
        totals,
    }
}

/// Cart pricing front door. Loads discount reference data, prefetches the
/// catalog lookups, and delegates the math to the evaluator.
#[derive(Clone)]
pub struct CartPricingService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn CatalogReader>,
    config: Arc<AppConfig>,
}

impl CartPricingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn CatalogReader>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            catalog,
            config,
        }
    }

    /// Applies one manual code to the cart.
    ///
    /// `existing_applied` is the set of discount categories the caller has
    /// already applied to this cart; combinability is enforced against it
    /// before evaluation and independently of it. Conflicts surface as
    /// [`ServiceError::DiscountConflict`]; an unknown, expired, or simply
    /// non-matching code is an ordinary inapplicable result.
    #[instrument(skip(self, cart))]
    pub async fn apply_code(
        &self,
        code: &str,
        cart: &CartSnapshot,
        customer_id: Option<Uuid>,
        existing_applied: &HashSet<DiscountCategory>,
    ) -> Result<EvaluationResult, ServiceError> {
        let normalized = code.trim().to_uppercase();

        let found = Discount::find()
            .filter(discount::Column::Code.eq(&normalized))
            .filter(discount::Column::Method.eq(DiscountMethod::Code))
            .filter(discount::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;

        let Some(candidate) = found else {
            return Ok(EvaluationResult::inapplicable(
                "This discount code is not valid",
            ));
        };
        if !candidate.is_within_window(Utc::now()) {
            return Ok(EvaluationResult::inapplicable(
                "This discount code is not currently active",
            ));
        }
        if usage::is_exhausted(&*self.db, &candidate, customer_id).await? {
            return Ok(EvaluationResult::inapplicable(
                "This discount code is no longer available",
            ));
        }

        if let Some(conflict) = check_combinability(&candidate, existing_applied) {
            return Err(ServiceError::DiscountConflict(format!(
                "This code cannot be cumulated with the {} discount already applied",
                conflict
            )));
        }

        let customer = self.customer_context(customer_id).await?;
        let collections = self
            .catalog
            .collection_index(&cart.product_ids().into_iter().collect::<Vec<_>>())
            .await?;
        Ok(evaluator::evaluate(
            &candidate,
            cart,
            customer.as_ref(),
            &collections,
        ))
    }

    /// Applies every eligible automatic discount to the cart.
    ///
    /// Discounts are evaluated in priority order against the same,
    /// unmodified snapshot; inapplicable ones are skipped silently.
    /// Amounts stack additively unless the deployment disables
    /// `automatic_discounts_stack`, in which case only the first
    /// (highest-priority) success applies.
    #[instrument(skip(self, cart))]
    pub async fn apply_automatic(
        &self,
        cart: &CartSnapshot,
        customer_id: Option<Uuid>,
    ) -> Result<AutomaticApplication, ServiceError> {
        let now = Utc::now();
        let candidates: Vec<DiscountModel> = Discount::find()
            .filter(discount::Column::Method.eq(DiscountMethod::Automatic))
            .filter(discount::Column::IsActive.eq(true))
            .order_by_desc(discount::Column::Priority)
            .all(&*self.db)
            .await?
            .into_iter()
            .filter(|candidate| candidate.is_within_window(now))
            .collect();

        let customer = self.customer_context(customer_id).await?;
        let collections = self
            .catalog
            .collection_index(&cart.product_ids().into_iter().collect::<Vec<_>>())
            .await?;

        let mut applied = Vec::new();
        for candidate in candidates {
            let result = evaluator::evaluate(&candidate, cart, customer.as_ref(), &collections);
            if !result.ok {
                debug!(
                    code = %candidate.code,
                    reason = result.message.as_deref().unwrap_or(""),
                    "Automatic discount skipped"
                );
                continue;
            }
            applied.push(AppliedPromotion {
                discount_id: candidate.id,
                code: candidate.code,
                result,
            });
            if !self.config.pricing.automatic_discounts_stack {
                break;
            }
        }

        Ok(accumulate(&applied))
    }

    async fn customer_context(
        &self,
        customer_id: Option<Uuid>,
    ) -> Result<Option<CustomerContext>, ServiceError> {
        match customer_id {
            Some(id) => {
                let group_ids = self.catalog.customer_group_ids(id).await?;
                Ok(Some(CustomerContext { id, group_ids }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::discount::{
        CustomerSelection, DiscountKind, DiscountValueType, ProductScope,
    };
    use rust_decimal_macros::dec;

    fn discount(kind: DiscountKind) -> DiscountModel {
        let now = Utc::now();
        DiscountModel {
            id: Uuid::new_v4(),
            code: "AUTO".to_string(),
            name: "Automatic".to_string(),
            method: DiscountMethod::Automatic,
            kind,
            value_type: DiscountValueType::Percentage,
            value: dec!(10),
            buy_quantity: None,
            get_quantity: None,
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

    fn promotion(code: &str, result: EvaluationResult) -> AppliedPromotion {
        AppliedPromotion {
            discount_id: Uuid::new_v4(),
            code: code.to_string(),
            result,
        }
    }

    #[test]
    fn code_refusing_order_discounts_conflicts_when_one_is_applied() {
        let mut candidate = discount(DiscountKind::Product);
        candidate.combines_with_order_discounts = false;
        let existing: HashSet<DiscountCategory> = [DiscountCategory::Order].into_iter().collect();
        assert_eq!(
            check_combinability(&candidate, &existing),
            Some(DiscountCategory::Order)
        );
    }

    #[test]
    fn fully_combinable_code_passes() {
        let candidate = discount(DiscountKind::Product);
        let existing: HashSet<DiscountCategory> = [
            DiscountCategory::Order,
            DiscountCategory::Product,
            DiscountCategory::Shipping,
        ]
        .into_iter()
        .collect();
        assert_eq!(check_combinability(&candidate, &existing), None);
    }

    #[test]
    fn combinability_ignores_categories_not_yet_applied() {
        let mut candidate = discount(DiscountKind::Order);
        candidate.combines_with_product_discounts = false;
        candidate.combines_with_shipping_discounts = false;
        assert_eq!(check_combinability(&candidate, &HashSet::new()), None);
    }

    #[test]
    fn accumulate_sums_each_component_independently() {
        let order_result = EvaluationResult {
            order_discount_amount: dec!(5.00),
            ..EvaluationResult::empty()
        };
        let product_result = EvaluationResult {
            product_discount_amount: dec!(3.50),
            line_adjustments: vec![LineAdjustment {
                product_id: Uuid::new_v4(),
                variant_id: None,
                discount_amount: dec!(3.50),
                is_gift: false,
            }],
            ..EvaluationResult::empty()
        };
        let shipping_result = EvaluationResult {
            free_shipping: true,
            ..EvaluationResult::empty()
        };

        let application = accumulate(&[
            promotion("ORDER5", order_result),
            promotion("BUNDLE", product_result),
            promotion("SHIPFREE", shipping_result),
        ]);

        assert_eq!(application.totals.order, dec!(5.00));
        assert_eq!(application.totals.product, dec!(3.50));
        assert_eq!(application.totals.total(), dec!(8.50));
        assert!(application.totals.free_shipping);
        assert_eq!(application.line_adjustments_by_code.len(), 1);
        assert_eq!(application.line_adjustments_by_code["BUNDLE"].len(), 1);
    }

    #[test]
    fn accumulate_of_nothing_is_zero() {
        let application = accumulate(&[]);
        assert_eq!(application.totals.total(), Decimal::ZERO);
        assert!(!application.totals.free_shipping);
        assert!(application.promotions.is_empty());
    }
}
