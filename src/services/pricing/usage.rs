//! Usage-limit enforcement. `try_consume` is the single place the locking
//! discipline lives: lock the counter rows, read, compare against the
//! limits, increment — all on the caller's transaction, so the locks hold
//! until that transaction commits or rolls back.

use crate::{
    entities::{discount_usage, DiscountModel, DiscountUsage, DiscountUsageModel},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect, Set};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Consumes one usage slot for the discount, if any remain.
///
/// Returns `false` when the global limit or the per-customer limit is
/// already exhausted; in that case nothing is written. Two concurrent
/// checkouts racing for the last slot serialize on the row lock, so at
/// most one sees a free slot.
pub async fn try_consume<C: ConnectionTrait>(
    conn: &C,
    discount: &DiscountModel,
    customer_id: Option<Uuid>,
) -> Result<bool, ServiceError> {
    // Global row first, per-customer row second: a fixed lock order so two
    // transactions over the same pair never deadlock.
    let global = locked_row(conn, discount.id, None).await?;
    if let Some(limit) = discount.usage_limit {
        if global.as_ref().map_or(0, |row| row.usage_count) >= limit {
            return Ok(false);
        }
    }

    let per_customer = match customer_id {
        Some(_) => locked_row(conn, discount.id, customer_id).await?,
        None => None,
    };
    if let (Some(limit), Some(_)) = (discount.usage_limit_per_customer, customer_id) {
        if per_customer.as_ref().map_or(0, |row| row.usage_count) >= limit {
            return Ok(false);
        }
    }

    bump(conn, discount.id, None, global).await?;
    if customer_id.is_some() {
        bump(conn, discount.id, customer_id, per_customer).await?;
    }
    Ok(true)
}

/// Read-only exhaustion check, no locks taken. Cart-time advisory only;
/// the validator re-checks under a row lock at submission time.
pub async fn is_exhausted<C: ConnectionTrait>(
    conn: &C,
    discount: &DiscountModel,
    customer_id: Option<Uuid>,
) -> Result<bool, ServiceError> {
    if let Some(limit) = discount.usage_limit {
        let row = DiscountUsage::find()
            .filter(discount_usage::Column::DiscountId.eq(discount.id))
            .filter(discount_usage::Column::CustomerId.is_null())
            .one(conn)
            .await?;
        if row.map_or(0, |row| row.usage_count) >= limit {
            return Ok(true);
        }
    }
    if let (Some(limit), Some(customer_id)) = (discount.usage_limit_per_customer, customer_id) {
        let row = DiscountUsage::find()
            .filter(discount_usage::Column::DiscountId.eq(discount.id))
            .filter(discount_usage::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?;
        if row.map_or(0, |row| row.usage_count) >= limit {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Reads one counter row under `FOR UPDATE`.
async fn locked_row<C: ConnectionTrait>(
    conn: &C,
    discount_id: Uuid,
    customer_id: Option<Uuid>,
) -> Result<Option<DiscountUsageModel>, ServiceError> {
    let query = DiscountUsage::find()
        .filter(discount_usage::Column::DiscountId.eq(discount_id));
    let query = match customer_id {
        Some(customer_id) => query.filter(discount_usage::Column::CustomerId.eq(customer_id)),
        None => query.filter(discount_usage::Column::CustomerId.is_null()),
    };
    Ok(query.lock_exclusive().one(conn).await?)
}

async fn bump<C: ConnectionTrait>(
    conn: &C,
    discount_id: Uuid,
    customer_id: Option<Uuid>,
    row: Option<DiscountUsageModel>,
) -> Result<(), ServiceError> {
    match row {
        Some(row) => {
            let count = row.usage_count;
            let mut active: discount_usage::ActiveModel = row.into();
            active.usage_count = Set(count + 1);
            active.updated_at = Set(Utc::now());
            active.update(conn).await?;
        }
        None => {
            // First consumption for this pair. Concurrent first insertions
            // race on the unique (discount_id, customer_id) index; the
            // loser surfaces a database error and the checkout retries.
            discount_usage::ActiveModel {
                id: Set(Uuid::new_v4()),
                discount_id: Set(discount_id),
                customer_id: Set(customer_id),
                usage_count: Set(1),
                updated_at: Set(Utc::now()),
            }
            .insert(conn)
            .await?;
        }
    }
    Ok(())
}

/// In-memory ledger with the same consume semantics, serialized on one
/// async mutex. Backs the concurrency tests and offline tooling; the SQL
/// path above carries the identical contract via row locks.
#[derive(Debug, Clone, Default)]
pub struct MemoryUsageLedger {
    counters: Arc<Mutex<HashMap<(Uuid, Option<Uuid>), i32>>>,
}

impl MemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn try_consume(&self, discount: &DiscountModel, customer_id: Option<Uuid>) -> bool {
        let mut counters = self.counters.lock().await;
        if let Some(limit) = discount.usage_limit {
            if counters.get(&(discount.id, None)).copied().unwrap_or(0) >= limit {
                return false;
            }
        }
        if let (Some(limit), Some(customer_id)) = (discount.usage_limit_per_customer, customer_id)
        {
            if counters
                .get(&(discount.id, Some(customer_id)))
                .copied()
                .unwrap_or(0)
                >= limit
            {
                return false;
            }
        }
        *counters.entry((discount.id, None)).or_insert(0) += 1;
        if let Some(customer_id) = customer_id {
            *counters.entry((discount.id, Some(customer_id))).or_insert(0) += 1;
        }
        true
    }

    pub async fn usage_count(&self, discount_id: Uuid, customer_id: Option<Uuid>) -> i32 {
        let counters = self.counters.lock().await;
        counters
            .get(&(discount_id, customer_id))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::discount::{
        CustomerSelection, DiscountKind, DiscountMethod, DiscountValueType, ProductScope,
    };
    use rust_decimal_macros::dec;

    fn limited_discount(usage_limit: Option<i32>, per_customer: Option<i32>) -> DiscountModel {
        let now = Utc::now();
        DiscountModel {
            id: Uuid::new_v4(),
            code: "LAST1".to_string(),
            name: "Limited".to_string(),
            method: DiscountMethod::Code,
            kind: DiscountKind::Order,
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
            usage_limit,
            usage_limit_per_customer: per_customer,
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

    #[tokio::test]
    async fn concurrent_checkouts_share_a_single_slot() {
        let ledger = MemoryUsageLedger::new();
        let discount = limited_discount(Some(1), None);

        let first = {
            let ledger = ledger.clone();
            let discount = discount.clone();
            tokio::spawn(async move { ledger.try_consume(&discount, None).await })
        };
        let second = {
            let ledger = ledger.clone();
            let discount = discount.clone();
            tokio::spawn(async move { ledger.try_consume(&discount, None).await })
        };

        let (first, second) = (first.await.unwrap(), second.await.unwrap());
        assert!(first ^ second, "exactly one checkout must win the slot");
        assert_eq!(ledger.usage_count(discount.id, None).await, 1);
    }

    #[tokio::test]
    async fn per_customer_limit_binds_one_customer_only() {
        let ledger = MemoryUsageLedger::new();
        let discount = limited_discount(None, Some(1));
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        assert!(ledger.try_consume(&discount, Some(alice)).await);
        assert!(!ledger.try_consume(&discount, Some(alice)).await);
        assert!(ledger.try_consume(&discount, Some(bob)).await);
        assert_eq!(ledger.usage_count(discount.id, None).await, 2);
    }

    #[tokio::test]
    async fn unlimited_discounts_always_consume() {
        let ledger = MemoryUsageLedger::new();
        let discount = limited_discount(None, None);
        for _ in 0..5 {
            assert!(ledger.try_consume(&discount, None).await);
        }
        assert_eq!(ledger.usage_count(discount.id, None).await, 5);
    }

    #[tokio::test]
    async fn exhausted_global_limit_rejects_everyone() {
        let ledger = MemoryUsageLedger::new();
        let discount = limited_discount(Some(2), None);
        assert!(ledger.try_consume(&discount, Some(Uuid::new_v4())).await);
        assert!(ledger.try_consume(&discount, Some(Uuid::new_v4())).await);
        assert!(!ledger.try_consume(&discount, Some(Uuid::new_v4())).await);
    }
}
