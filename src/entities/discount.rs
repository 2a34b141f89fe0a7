use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::Display;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum DiscountMethod {
    #[sea_orm(string_value = "Code")]
    Code,
    #[sea_orm(string_value = "Automatic")]
    Automatic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum DiscountKind {
    #[sea_orm(string_value = "Order")]
    Order,
    #[sea_orm(string_value = "Shipping")]
    Shipping,
    #[sea_orm(string_value = "Product")]
    Product,
    #[sea_orm(string_value = "BuyXGetY")]
    BuyXGetY,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum DiscountValueType {
    #[sea_orm(string_value = "Percentage")]
    Percentage,
    #[sea_orm(string_value = "FixedAmount")]
    FixedAmount,
    #[sea_orm(string_value = "FreeShipping")]
    FreeShipping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ProductScope {
    #[sea_orm(string_value = "All")]
    All,
    #[sea_orm(string_value = "Products")]
    Products,
    #[sea_orm(string_value = "Collections")]
    Collections,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum CustomerSelection {
    #[sea_orm(string_value = "All")]
    All,
    #[sea_orm(string_value = "Groups")]
    Groups,
    #[sea_orm(string_value = "Customers")]
    Customers,
}

/// The three combinability categories a discount falls into.
///
/// `BuyXGetY` discounts count as product-category: their reductions are
/// line-level gift adjustments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum DiscountCategory {
    Product,
    Order,
    Shipping,
}

/// Discount definition. Reference data owned by the admin domain; the
/// pricing engine only reads it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Normalized (uppercase) redemption code. Present for automatic
    /// discounts too, as the attribution key for line adjustments.
    pub code: String,
    pub name: String,
    pub method: DiscountMethod,
    pub kind: DiscountKind,
    pub value_type: DiscountValueType,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub value: Decimal,
    pub buy_quantity: Option<i32>,
    pub get_quantity: Option<i32>,
    pub product_scope: ProductScope,
    #[sea_orm(column_type = "Json")]
    pub product_ids: Json,
    #[sea_orm(column_type = "Json")]
    pub collection_ids: Json,
    pub customer_selection: CustomerSelection,
    #[sea_orm(column_type = "Json")]
    pub customer_group_ids: Json,
    #[sea_orm(column_type = "Json")]
    pub customer_ids: Json,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub min_subtotal: Option<Decimal>,
    pub min_quantity: Option<i32>,
    pub priority: i32,
    pub usage_limit: Option<i32>,
    pub usage_limit_per_customer: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub combines_with_product_discounts: bool,
    pub combines_with_order_discounts: bool,
    pub combines_with_shipping_discounts: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::discount_usage::Entity")]
    Usage,
}

impl Related<super::discount_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

fn id_set(value: &Json) -> HashSet<Uuid> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

impl Model {
    pub fn product_id_set(&self) -> HashSet<Uuid> {
        id_set(&self.product_ids)
    }

    pub fn collection_id_set(&self) -> HashSet<Uuid> {
        id_set(&self.collection_ids)
    }

    pub fn customer_group_id_set(&self) -> HashSet<Uuid> {
        id_set(&self.customer_group_ids)
    }

    pub fn customer_id_set(&self) -> HashSet<Uuid> {
        id_set(&self.customer_ids)
    }

    /// Whether `now` falls inside the activity window. Open bounds pass.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        if let Some(starts_at) = self.starts_at {
            if now < starts_at {
                return false;
            }
        }
        if let Some(ends_at) = self.ends_at {
            if now > ends_at {
                return false;
            }
        }
        true
    }

    pub fn category(&self) -> DiscountCategory {
        match self.kind {
            DiscountKind::Order => DiscountCategory::Order,
            DiscountKind::Shipping => DiscountCategory::Shipping,
            DiscountKind::Product | DiscountKind::BuyXGetY => DiscountCategory::Product,
        }
    }

    /// Whether this discount may stack with an already-applied discount of
    /// the given category.
    pub fn combines_with(&self, category: DiscountCategory) -> bool {
        match category {
            DiscountCategory::Product => self.combines_with_product_discounts,
            DiscountCategory::Order => self.combines_with_order_discounts,
            DiscountCategory::Shipping => self.combines_with_shipping_discounts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn discount() -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            code: "SPRING10".to_string(),
            name: "Spring sale".to_string(),
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

    #[test]
    fn open_window_always_matches() {
        assert!(discount().is_within_window(Utc::now()));
    }

    #[test]
    fn window_bounds_cut_both_ways() {
        let now = Utc::now();
        let d = Model {
            starts_at: Some(now - Duration::days(1)),
            ends_at: Some(now + Duration::days(1)),
            ..discount()
        };
        assert!(d.is_within_window(now));
        assert!(!d.is_within_window(now - Duration::days(2)));
        assert!(!d.is_within_window(now + Duration::days(2)));
    }

    #[test]
    fn id_sets_parse_from_json_columns() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let d = Model {
            product_ids: serde_json::json!([a, b]),
            ..discount()
        };
        let set = d.product_id_set();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a) && set.contains(&b));
    }

    #[test]
    fn buy_x_get_y_counts_as_product_category() {
        let d = Model {
            kind: DiscountKind::BuyXGetY,
            ..discount()
        };
        assert_eq!(d.category(), DiscountCategory::Product);
    }
}
