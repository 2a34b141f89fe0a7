//! Server-side re-validation of a submitted order. Nothing computed at
//! cart time is trusted here: prices, stock, and discounts are all
//! re-derived from authoritative data, and any disagreement with the
//! client-submitted figures beyond the configured tolerance aborts the
//! submission instead of being silently corrected.

use crate::{
    catalog::CatalogReader,
    config::AppConfig,
    entities::{
        discount::{self, DiscountMethod},
        Discount,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{
        cart::{CartLine, CartSnapshot, CustomerContext, LineAdjustment},
        evaluator, usage,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// One client-submitted order line. The unit price is only used to detect
/// tampering; totals are recomputed from the catalog price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// Client-submitted order, as handed over by the checkout flow.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmittedOrder {
    pub customer_id: Option<Uuid>,
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: String,
    #[validate(length(min = 1, message = "An order needs at least one line"))]
    pub lines: Vec<SubmittedLine>,
    /// Manual codes the shopper entered, in application order.
    pub discount_codes: Vec<String>,
    pub submitted_subtotal: Decimal,
    pub submitted_discount_total: Decimal,
}

/// One order line re-priced from the authoritative catalog record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Outcome of a successful validation: the figures an order may be
/// persisted with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedOrder {
    pub items: Vec<VerifiedItem>,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    /// Applied discounts, deduplicated, in application order.
    pub discount_ids: Vec<Uuid>,
    pub line_adjustments: Vec<LineAdjustment>,
}

/// `true` when the two amounts agree within the absolute tolerance.
pub fn within_tolerance(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    (a - b).abs() <= tolerance
}

/// Checks one submitted line against its authoritative price and stock.
/// Returns the re-priced item, or the rejection reason.
fn verify_line(
    line: &SubmittedLine,
    authoritative_price: Decimal,
    available: Option<i32>,
    tolerance: Decimal,
) -> Result<VerifiedItem, String> {
    if line.quantity <= 0 {
        return Err(format!(
            "non-positive quantity {} for product {}",
            line.quantity, line.product_id
        ));
    }
    if !within_tolerance(line.unit_price, authoritative_price, tolerance) {
        return Err(format!(
            "submitted unit price {} disagrees with the catalog price for product {}",
            line.unit_price, line.product_id
        ));
    }
    if let Some(available) = available {
        if line.quantity > available {
            return Err(format!(
                "requested quantity {} exceeds available stock {} for product {}",
                line.quantity, available, line.product_id
            ));
        }
    }
    Ok(VerifiedItem {
        product_id: line.product_id,
        variant_id: line.variant_id,
        quantity: line.quantity,
        unit_price: authoritative_price,
        line_total: authoritative_price * Decimal::from(line.quantity),
    })
}

/// The anti-tampering gate between cart and persisted order.
#[derive(Clone)]
pub struct OrderValidationService {
    catalog: Arc<dyn CatalogReader>,
    config: Arc<AppConfig>,
    event_sender: EventSender,
}

impl OrderValidationService {
    pub fn new(
        catalog: Arc<dyn CatalogReader>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            catalog,
            config,
            event_sender,
        }
    }

    /// Re-derives prices, stock, and discounts for a submitted order and
    /// compares the result against the client's figures.
    ///
    /// Runs on the caller's transaction: usage-counter rows consumed here
    /// stay locked until that transaction commits, so two checkouts racing
    /// for a discount's last slot serialize and only one passes. With
    /// `consume_usage` false (draft orders) limits are neither checked
    /// nor consumed.
    #[instrument(skip(self, txn, submitted), fields(lines = submitted.lines.len()))]
    pub async fn validate_and_recalculate(
        &self,
        txn: &DatabaseTransaction,
        submitted: &SubmittedOrder,
        consume_usage: bool,
    ) -> Result<VerifiedOrder, ServiceError> {
        submitted.validate()?;
        let tolerance = self.config.pricing.price_tolerance;

        // Step 1: authoritative re-pricing. Submitted prices are not
        // trusted past this point.
        let items = self.resolve_items(&submitted.lines, submitted.customer_id).await?;

        // Step 2: subtotal from verified lines only.
        let subtotal: Decimal = items.iter().map(|item| item.line_total).sum();

        // Step 3: server-side discount re-run against the verified cart.
        let verified_cart = CartSnapshot::new(
            items
                .iter()
                .map(|item| CartLine {
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                })
                .collect(),
            submitted.currency.clone(),
        );
        let customer = self.customer_context(submitted.customer_id).await?;
        let collections = self
            .catalog
            .collection_index(&verified_cart.product_ids().into_iter().collect::<Vec<_>>())
            .await?;

        let now = Utc::now();
        let mut discount_total = Decimal::ZERO;
        let mut discount_ids: Vec<Uuid> = Vec::new();
        let mut line_adjustments: Vec<LineAdjustment> = Vec::new();

        let automatic = Discount::find()
            .filter(discount::Column::Method.eq(DiscountMethod::Automatic))
            .filter(discount::Column::IsActive.eq(true))
            .order_by_desc(discount::Column::Priority)
            .all(txn)
            .await?;
        for candidate in automatic
            .into_iter()
            .filter(|candidate| candidate.is_within_window(now))
        {
            let result =
                evaluator::evaluate(&candidate, &verified_cart, customer.as_ref(), &collections);
            if !result.ok {
                continue;
            }
            if consume_usage
                && !usage::try_consume(txn, &candidate, submitted.customer_id).await?
            {
                debug!(code = %candidate.code, "Automatic discount exhausted, skipped");
                continue;
            }
            discount_total += result.total_discount();
            if !discount_ids.contains(&candidate.id) {
                discount_ids.push(candidate.id);
            }
            line_adjustments.extend(result.line_adjustments);
            if !self.config.pricing.automatic_discounts_stack {
                break;
            }
        }

        // Every submitted manual code must resolve and apply; a code that
        // does not is a tampering signal at this stage, not a soft miss.
        for code in &submitted.discount_codes {
            let normalized = code.trim().to_uppercase();
            let found = Discount::find()
                .filter(discount::Column::Code.eq(&normalized))
                .filter(discount::Column::Method.eq(DiscountMethod::Code))
                .filter(discount::Column::IsActive.eq(true))
                .one(txn)
                .await?;
            let Some(candidate) = found else {
                return Err(self
                    .reject(
                        submitted.customer_id,
                        format!("unknown or inactive discount code {}", normalized),
                    )
                    .await);
            };
            if !candidate.is_within_window(now) {
                return Err(self
                    .reject(
                        submitted.customer_id,
                        format!("discount code {} is outside its validity window", normalized),
                    )
                    .await);
            }
            let result =
                evaluator::evaluate(&candidate, &verified_cart, customer.as_ref(), &collections);
            if !result.ok {
                return Err(self
                    .reject(
                        submitted.customer_id,
                        format!(
                            "discount code {} does not apply: {}",
                            normalized,
                            result.message.as_deref().unwrap_or("not applicable")
                        ),
                    )
                    .await);
            }
            if consume_usage
                && !usage::try_consume(txn, &candidate, submitted.customer_id).await?
            {
                return Err(self
                    .reject(
                        submitted.customer_id,
                        format!("usage limit exhausted for discount code {}", normalized),
                    )
                    .await);
            }
            discount_total += result.total_discount();
            if !discount_ids.contains(&candidate.id) {
                discount_ids.push(candidate.id);
            }
            line_adjustments.extend(result.line_adjustments);
        }

        // Step 4: the submitted figures must agree with the verified ones.
        if !within_tolerance(subtotal, submitted.submitted_subtotal, tolerance) {
            return Err(self
                .reject(
                    submitted.customer_id,
                    format!(
                        "submitted subtotal {} disagrees with the verified subtotal",
                        submitted.submitted_subtotal
                    ),
                )
                .await);
        }
        if !within_tolerance(discount_total, submitted.submitted_discount_total, tolerance) {
            return Err(self
                .reject(
                    submitted.customer_id,
                    format!(
                        "submitted discount total {} disagrees with the verified total",
                        submitted.submitted_discount_total
                    ),
                )
                .await);
        }

        Ok(VerifiedOrder {
            items,
            subtotal,
            discount_total,
            discount_ids,
            line_adjustments,
        })
    }

    /// Re-prices every submitted line from the catalog.
    async fn resolve_items(
        &self,
        lines: &[SubmittedLine],
        customer_id: Option<Uuid>,
    ) -> Result<Vec<VerifiedItem>, ServiceError> {
        let tolerance = self.config.pricing.price_tolerance;
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let authoritative = match line.variant_id {
                Some(variant_id) => match self.catalog.variant(variant_id).await? {
                    Some(variant) if variant.product_id != line.product_id => {
                        return Err(self
                            .reject(
                                customer_id,
                                format!(
                                    "variant {} does not belong to product {}",
                                    variant_id, line.product_id
                                ),
                            )
                            .await);
                    }
                    Some(variant) => Some((variant.price, variant.available)),
                    None => None,
                },
                None => self
                    .catalog
                    .product(line.product_id)
                    .await?
                    .map(|product| (product.price, product.available)),
            };
            let Some((price, available)) = authoritative else {
                return Err(self
                    .reject(
                        customer_id,
                        format!("unknown product {} in submitted order", line.product_id),
                    )
                    .await);
            };
            match verify_line(line, price, available, tolerance) {
                Ok(item) => items.push(item),
                Err(reason) => return Err(self.reject(customer_id, reason).await),
            }
        }
        Ok(items)
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

    /// Logs the reason, publishes the audit event, and produces the
    /// terminal error. The reason stays server-side.
    async fn reject(&self, customer_id: Option<Uuid>, reason: String) -> ServiceError {
        warn!(reason = %reason, "Order price verification failed");
        self.event_sender
            .send_or_log(Event::PriceVerificationFailed {
                customer_id,
                reason: reason.clone(),
            })
            .await;
        ServiceError::PriceVerification(reason)
    }
}
