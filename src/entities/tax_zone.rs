use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Geographic tax zone. `countries` is a JSON set of ISO country codes;
/// `states` optionally narrows the zone to a set of state/province codes.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tax_zones")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    /// Owning shop; NULL means the zone applies to every shop.
    pub shop_id: Option<Uuid>,
    #[sea_orm(column_type = "Json")]
    pub countries: Json,
    #[sea_orm(column_type = "Json", nullable)]
    pub states: Option<Json>,
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tax_rate::Entity")]
    Rates,
}

impl Related<super::tax_rate::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rates.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

fn code_set(value: &Json) -> HashSet<String> {
    serde_json::from_value::<Vec<String>>(value.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|code| code.trim().to_uppercase())
        .collect()
}

impl Model {
    pub fn country_set(&self) -> HashSet<String> {
        code_set(&self.countries)
    }

    /// State restriction, if any. An absent or empty set means the zone
    /// covers the whole country.
    pub fn state_set(&self) -> Option<HashSet<String>> {
        self.states.as_ref().map(code_set).filter(|set| !set.is_empty())
    }
}
