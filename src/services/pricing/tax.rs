//! Zone-based tax calculation with ordered, optionally compounding rates.
//!
//! One active zone wins per address (highest priority, ties broken by
//! lowest id). Rates apply in priority order; compound rates see the base
//! plus the tax already accumulated, and every contribution is rounded to
//! 2 decimals on its own before summing.

use crate::{
    entities::{tax_rate, tax_zone, TaxRate, TaxRateModel, TaxZone, TaxZoneModel},
    errors::ServiceError,
    services::pricing::cart::round_money,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Destination address, reduced to what zone matching needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxAddress {
    /// ISO country code, e.g. "CA".
    pub country: String,
    /// State or province code, e.g. "QC".
    pub state: Option<String>,
}

impl tax_zone::Model {
    /// Whether the zone covers the address.
    pub fn matches(&self, address: &TaxAddress) -> bool {
        if !self
            .country_set()
            .contains(&address.country.trim().to_uppercase())
        {
            return false;
        }
        match self.state_set() {
            Some(states) => address
                .state
                .as_ref()
                .is_some_and(|state| states.contains(&state.trim().to_uppercase())),
            None => true,
        }
    }
}

/// The zone a result was computed under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxZoneRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxBreakdownEntry {
    pub name: String,
    pub rate: Decimal,
    pub amount: Decimal,
    pub compound: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxResult {
    pub tax_total: Decimal,
    /// Effective percentage over the taxable base.
    pub tax_rate: Decimal,
    /// `None` when no zone matched; the result is then zero tax.
    pub tax_zone: Option<TaxZoneRef>,
    pub breakdown: Vec<TaxBreakdownEntry>,
    /// Net price, only set by [`TaxService::calculate_included_tax`].
    pub price_excluding_tax: Option<Decimal>,
}

impl TaxResult {
    fn zero() -> Self {
        Self {
            tax_total: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
            tax_zone: None,
            breakdown: Vec::new(),
            price_excluding_tax: None,
        }
    }
}

/// Picks the winning zone for an address: active, matching, highest
/// priority; ties break on the lowest zone id so selection never depends
/// on load order.
pub fn select_zone<'a>(
    zones: &'a [TaxZoneModel],
    address: &TaxAddress,
) -> Option<&'a TaxZoneModel> {
    zones
        .iter()
        .filter(|zone| zone.is_active && zone.matches(address))
        .max_by_key(|zone| (zone.priority, Reverse(zone.id)))
}

/// Runs the rate stack over a taxable base. Non-compound rates apply to
/// the original base; compound rates apply to the base plus all tax
/// accumulated so far. Shipping joins the taxable amount only for rates
/// with `shipping_taxable`. Each contribution is rounded independently.
pub fn compute_tax(
    rates: &[TaxRateModel],
    base: Decimal,
    shipping: Decimal,
) -> (Decimal, Vec<TaxBreakdownEntry>) {
    let mut ordered: Vec<&TaxRateModel> = rates.iter().filter(|rate| rate.is_active).collect();
    ordered.sort_by_key(|rate| (rate.priority, rate.id));

    let mut accumulated = Decimal::ZERO;
    let mut breakdown = Vec::with_capacity(ordered.len());
    for rate in ordered {
        let mut taxable = base;
        if rate.compound {
            taxable += accumulated;
        }
        if rate.shipping_taxable {
            taxable += shipping;
        }
        let amount = round_money(taxable * rate.rate / Decimal::ONE_HUNDRED);
        accumulated += amount;
        breakdown.push(TaxBreakdownEntry {
            name: rate.name.clone(),
            rate: rate.rate,
            amount,
            compound: rate.compound,
        });
    }
    (accumulated, breakdown)
}

/// Combined effective percentage of a rate stack, derived by running it
/// over a base of 100 with no shipping.
pub fn effective_rate(rates: &[TaxRateModel]) -> Decimal {
    compute_tax(rates, Decimal::ONE_HUNDRED, Decimal::ZERO).0
}

#[derive(Clone)]
pub struct TaxService {
    db: Arc<DatabaseConnection>,
}

impl TaxService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Computes the tax owed on a taxable base shipped to an address.
    /// No matching zone means zero tax, not an error.
    #[instrument(skip(self))]
    pub async fn calculate(
        &self,
        base: Decimal,
        address: &TaxAddress,
        shipping: Decimal,
        shop_id: Option<Uuid>,
    ) -> Result<TaxResult, ServiceError> {
        let (zone, rates) = match self.load_zone(address, shop_id).await? {
            Some(loaded) => loaded,
            None => return Ok(TaxResult::zero()),
        };

        let (tax_total, breakdown) = compute_tax(&rates, base, shipping);
        let tax_rate = if base > Decimal::ZERO {
            (tax_total / base * Decimal::ONE_HUNDRED).round_dp(4)
        } else {
            effective_rate(&rates).round_dp(4)
        };

        Ok(TaxResult {
            tax_total,
            tax_rate,
            tax_zone: Some(TaxZoneRef {
                id: zone.id,
                name: zone.name,
            }),
            breakdown,
            price_excluding_tax: None,
        })
    }

    /// Inverse calculation: given a gross (tax-inclusive) price, derives
    /// the effective rate for the address and backs the net price out.
    #[instrument(skip(self))]
    pub async fn calculate_included_tax(
        &self,
        gross: Decimal,
        address: &TaxAddress,
        shop_id: Option<Uuid>,
    ) -> Result<TaxResult, ServiceError> {
        let (zone, rates) = match self.load_zone(address, shop_id).await? {
            Some(loaded) => loaded,
            None => {
                return Ok(TaxResult {
                    price_excluding_tax: Some(gross),
                    ..TaxResult::zero()
                });
            }
        };

        let rate = effective_rate(&rates);
        let net = round_money(gross / (Decimal::ONE + rate / Decimal::ONE_HUNDRED));
        let tax_total = gross - net;

        Ok(TaxResult {
            tax_total,
            tax_rate: rate.round_dp(4),
            tax_zone: Some(TaxZoneRef {
                id: zone.id,
                name: zone.name,
            }),
            breakdown: Vec::new(),
            price_excluding_tax: Some(net),
        })
    }

    async fn load_zone(
        &self,
        address: &TaxAddress,
        shop_id: Option<Uuid>,
    ) -> Result<Option<(TaxZoneModel, Vec<TaxRateModel>)>, ServiceError> {
        let mut query = TaxZone::find().filter(tax_zone::Column::IsActive.eq(true));
        if let Some(shop_id) = shop_id {
            query = query.filter(
                Condition::any()
                    .add(tax_zone::Column::ShopId.eq(shop_id))
                    .add(tax_zone::Column::ShopId.is_null()),
            );
        }
        let zones = query.all(&*self.db).await?;

        let Some(zone) = select_zone(&zones, address).cloned() else {
            return Ok(None);
        };
        let rates = TaxRate::find()
            .filter(tax_rate::Column::ZoneId.eq(zone.id))
            .filter(tax_rate::Column::IsActive.eq(true))
            .order_by_asc(tax_rate::Column::Priority)
            .all(&*self.db)
            .await?;
        Ok(Some((zone, rates)))
    }
}
