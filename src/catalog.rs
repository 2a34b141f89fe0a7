use crate::{
    entities::{
        collection_member, customer_group_member, CollectionMember, CustomerGroupMember,
        Product, ProductVariant,
    },
    errors::ServiceError,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Authoritative price-and-stock view of a product.
/// `available` is `None` when inventory is not tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: Uuid,
    pub price: Decimal,
    pub available: Option<i32>,
}

/// Authoritative price-and-stock view of a product variant.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub price: Decimal,
    pub available: Option<i32>,
}

/// Prefetched collection membership for the products of one cart, so
/// discount evaluation stays synchronous and pure.
#[derive(Debug, Clone, Default)]
pub struct CollectionIndex {
    by_product: HashMap<Uuid, HashSet<Uuid>>,
}

impl CollectionIndex {
    pub fn insert(&mut self, product_id: Uuid, collection_id: Uuid) {
        self.by_product
            .entry(product_id)
            .or_default()
            .insert(collection_id);
    }

    /// Whether the product belongs to at least one of the wanted collections.
    pub fn product_in_any(&self, product_id: Uuid, wanted: &HashSet<Uuid>) -> bool {
        self.by_product
            .get(&product_id)
            .is_some_and(|memberships| !memberships.is_disjoint(wanted))
    }
}

impl FromIterator<(Uuid, Uuid)> for CollectionIndex {
    fn from_iter<I: IntoIterator<Item = (Uuid, Uuid)>>(iter: I) -> Self {
        let mut index = Self::default();
        for (product_id, collection_id) in iter {
            index.insert(product_id, collection_id);
        }
        index
    }
}

/// Catalog lookups the pricing engine depends on: authoritative prices and
/// stock, collection membership, and customer group membership. The web
/// layer injects the SQL-backed implementation; tests inject fixtures.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn product(&self, id: Uuid) -> Result<Option<ProductRecord>, ServiceError>;

    async fn variant(&self, id: Uuid) -> Result<Option<VariantRecord>, ServiceError>;

    /// Collection membership for the given products, one round trip.
    async fn collection_index(
        &self,
        product_ids: &[Uuid],
    ) -> Result<CollectionIndex, ServiceError>;

    async fn customer_group_ids(
        &self,
        customer_id: Uuid,
    ) -> Result<HashSet<Uuid>, ServiceError>;
}

/// sea-orm-backed catalog.
#[derive(Clone)]
pub struct SqlCatalog {
    db: Arc<DatabaseConnection>,
}

impl SqlCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogReader for SqlCatalog {
    async fn product(&self, id: Uuid) -> Result<Option<ProductRecord>, ServiceError> {
        let product = Product::find_by_id(id).one(&*self.db).await?;
        Ok(product.filter(|p| p.is_active).map(|p| ProductRecord {
            id: p.id,
            price: p.price,
            available: p.inventory_tracking.then_some(p.stock_quantity),
        }))
    }

    async fn variant(&self, id: Uuid) -> Result<Option<VariantRecord>, ServiceError> {
        let variant = ProductVariant::find_by_id(id).one(&*self.db).await?;
        Ok(variant.map(|v| VariantRecord {
            id: v.id,
            product_id: v.product_id,
            price: v.price,
            available: v.inventory_tracking.then_some(v.stock_quantity),
        }))
    }

    async fn collection_index(
        &self,
        product_ids: &[Uuid],
    ) -> Result<CollectionIndex, ServiceError> {
        if product_ids.is_empty() {
            return Ok(CollectionIndex::default());
        }
        let rows = CollectionMember::find()
            .filter(collection_member::Column::ProductId.is_in(product_ids.to_vec()))
            .all(&*self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.product_id, row.collection_id))
            .collect())
    }

    async fn customer_group_ids(
        &self,
        customer_id: Uuid,
    ) -> Result<HashSet<Uuid>, ServiceError> {
        let rows = CustomerGroupMember::find()
            .filter(customer_group_member::Column::CustomerId.eq(customer_id))
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(|row| row.group_id).collect())
    }
}
