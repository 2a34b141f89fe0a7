//! Pricing integrity engine.
//!
//! The computational core of an e-commerce checkout: discount
//! eligibility and amount calculation, cart-time orchestration of manual
//! codes and automatic promotions, server-side re-validation of submitted
//! orders against authoritative prices and stock, concurrency-safe
//! usage-limit enforcement, and compound tax calculation. The surrounding
//! web layer owns routing, sessions, and payment capture; it talks to this
//! crate through the service types re-exported from [`services`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod catalog;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod services;

use crate::catalog::{CatalogReader, SqlCatalog};
use crate::services::orders::OrderService;
use crate::services::pricing::{CartPricingService, OrderValidationService, TaxService};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub use errors::ServiceError;

/// The wired-up engine: every service sharing one connection pool, one
/// configuration, and one event channel.
#[derive(Clone)]
pub struct EngineState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: events::EventSender,
    pub cart_pricing: CartPricingService,
    pub order_validation: OrderValidationService,
    pub orders: OrderService,
    pub tax: TaxService,
}

impl EngineState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let config = Arc::new(config);
        let catalog: Arc<dyn CatalogReader> = Arc::new(SqlCatalog::new(db.clone()));
        let order_validation =
            OrderValidationService::new(catalog.clone(), config.clone(), event_sender.clone());
        let cart_pricing = CartPricingService::new(db.clone(), catalog, config.clone());
        let orders = OrderService::new(db.clone(), order_validation.clone(), event_sender.clone());
        let tax = TaxService::new(db.clone());

        Self {
            db,
            config,
            event_sender,
            cart_pricing,
            order_validation,
            orders,
            tax,
        }
    }
}
