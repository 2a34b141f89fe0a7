//! Order persistence: validates a submission through the pricing gate and
//! writes the order and its lines inside one transaction.

use crate::{
    db::DbPool,
    entities::{
        order::{self, OrderStatus},
        order_item, Order, OrderModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        pricing::{
            cart::LineAdjustment,
            validation::{OrderValidationService, SubmittedOrder, VerifiedOrder},
        },
        sequence,
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const ORDER_SEQUENCE: &str = "orders";

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Option<Uuid>,
    pub status: OrderStatus,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub applied_discount_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

/// Service for creating and confirming orders against verified pricing.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    validation: OrderValidationService,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        validation: OrderValidationService,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            validation,
            event_sender,
        }
    }

    /// Validates and persists a submitted order.
    ///
    /// With `confirm` the order commits as `Confirmed` and every applied
    /// discount consumes a usage slot; otherwise it commits as a draft and
    /// usage is left untouched until confirmation. Validation, number
    /// allocation, usage increments, and the insert share one transaction.
    #[instrument(skip(self, submitted), fields(lines = submitted.lines.len()))]
    pub async fn create_order(
        &self,
        submitted: SubmittedOrder,
        confirm: bool,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let verified = self
            .validation
            .validate_and_recalculate(&txn, &submitted, confirm)
            .await?;

        let sequence_number = sequence::next(&txn, ORDER_SEQUENCE).await?;
        let order_number = format!("ORD-{:06}", sequence_number);
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let status = if confirm {
            OrderStatus::Confirmed
        } else {
            OrderStatus::Draft
        };
        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            customer_id: Set(submitted.customer_id),
            status: Set(status),
            currency: Set(submitted.currency.clone()),
            subtotal: Set(verified.subtotal),
            discount_total: Set(verified.discount_total),
            shipping_total: Set(Decimal::ZERO),
            tax_total: Set(Decimal::ZERO),
            total: Set(verified.subtotal - verified.discount_total),
            applied_discount_ids: Set(serde_json::json!(verified.discount_ids)),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        let order_model = order_model.insert(&txn).await?;

        persist_items(&txn, order_id, &verified, now).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;
        if confirm {
            self.publish_confirmation(&verified, order_id, submitted.customer_id)
                .await;
        }

        info!(order_id = %order_id, status = ?order_model.status, "Order created");
        Ok(model_to_response(order_model))
    }

    /// Promotes a draft to a confirmed order. The submission is
    /// re-validated in full, this time consuming usage slots, and the
    /// order's lines and totals are rewritten from the fresh verification.
    #[instrument(skip(self, submitted), fields(order_id = %order_id))]
    pub async fn confirm_order(
        &self,
        order_id: Uuid,
        submitted: SubmittedOrder,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let existing = Order::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if existing.status != OrderStatus::Draft {
            return Err(ServiceError::InvalidOperation(
                "Only draft orders can be confirmed".to_string(),
            ));
        }

        let verified = self
            .validation
            .validate_and_recalculate(&txn, &submitted, true)
            .await?;

        let now = Utc::now();
        let version = existing.version;
        let mut active: order::ActiveModel = existing.into();
        active.status = Set(OrderStatus::Confirmed);
        active.subtotal = Set(verified.subtotal);
        active.discount_total = Set(verified.discount_total);
        active.total = Set(verified.subtotal - verified.discount_total);
        active.applied_discount_ids = Set(serde_json::json!(verified.discount_ids));
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        // Rewrite the lines from the fresh verification.
        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        persist_items(&txn, order_id, &verified, now).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderConfirmed(order_id))
            .await;
        self.publish_confirmation(&verified, order_id, submitted.customer_id)
            .await;

        info!(order_id = %order_id, "Draft order confirmed");
        Ok(model_to_response(updated))
    }

    async fn publish_confirmation(
        &self,
        verified: &VerifiedOrder,
        order_id: Uuid,
        customer_id: Option<Uuid>,
    ) {
        for discount_id in &verified.discount_ids {
            self.event_sender
                .send_or_log(Event::DiscountRedeemed {
                    discount_id: *discount_id,
                    order_id,
                    customer_id,
                })
                .await;
        }
    }
}

/// Inserts the verified lines, folding per-line discount adjustments onto
/// the matching items.
async fn persist_items(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    verified: &VerifiedOrder,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    for item in &verified.items {
        let (discount_amount, is_gift) =
            line_discount(&verified.line_adjustments, item.product_id, item.variant_id);
        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(item.product_id),
            variant_id: Set(item.variant_id),
            quantity: Set(item.quantity),
            unit_price: Set(item.unit_price),
            line_total: Set(item.line_total),
            discount_amount: Set(discount_amount),
            is_gift: Set(is_gift),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;
    }
    Ok(())
}

/// Sums every adjustment targeting the line; the line counts as carrying a
/// gift when any contributing adjustment does.
fn line_discount(
    adjustments: &[LineAdjustment],
    product_id: Uuid,
    variant_id: Option<Uuid>,
) -> (Decimal, bool) {
    adjustments
        .iter()
        .filter(|adj| adj.product_id == product_id && adj.variant_id == variant_id)
        .fold((Decimal::ZERO, false), |(amount, is_gift), adj| {
            (amount + adj.discount_amount, is_gift || adj.is_gift)
        })
}

fn model_to_response(model: OrderModel) -> OrderResponse {
    let applied_discount_ids =
        serde_json::from_value(model.applied_discount_ids.clone()).unwrap_or_default();
    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        customer_id: model.customer_id,
        status: model.status,
        currency: model.currency,
        subtotal: model.subtotal,
        discount_total: model.discount_total,
        total: model.total,
        applied_discount_ids,
        created_at: model.created_at,
        updated_at: model.updated_at,
        version: model.version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_discounts_accumulate_per_line() {
        let shirt = Uuid::new_v4();
        let mug = Uuid::new_v4();
        let adjustments = vec![
            LineAdjustment {
                product_id: shirt,
                variant_id: None,
                discount_amount: dec!(4.00),
                is_gift: false,
            },
            LineAdjustment {
                product_id: shirt,
                variant_id: None,
                discount_amount: dec!(15.00),
                is_gift: true,
            },
            LineAdjustment {
                product_id: mug,
                variant_id: None,
                discount_amount: dec!(1.00),
                is_gift: false,
            },
        ];

        let (amount, is_gift) = line_discount(&adjustments, shirt, None);
        assert_eq!(amount, dec!(19.00));
        assert!(is_gift);

        let (amount, is_gift) = line_discount(&adjustments, mug, None);
        assert_eq!(amount, dec!(1.00));
        assert!(!is_gift);

        let (amount, _) = line_discount(&adjustments, Uuid::new_v4(), None);
        assert_eq!(amount, Decimal::ZERO);
    }

    #[test]
    fn response_decodes_applied_discount_ids() {
        let discount_id = Uuid::new_v4();
        let now = Utc::now();
        let model = OrderModel {
            id: Uuid::new_v4(),
            order_number: "ORD-000042".to_string(),
            customer_id: None,
            status: OrderStatus::Confirmed,
            currency: "EUR".to_string(),
            subtotal: dec!(100.00),
            discount_total: dec!(10.00),
            shipping_total: Decimal::ZERO,
            tax_total: Decimal::ZERO,
            total: dec!(90.00),
            applied_discount_ids: serde_json::json!([discount_id]),
            created_at: now,
            updated_at: Some(now),
            version: 1,
        };
        let response = model_to_response(model);
        assert_eq!(response.applied_discount_ids, vec![discount_id]);
        assert_eq!(response.total, dec!(90.00));
    }
}
