use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use tracing::info;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_CURRENCY: &str = "USD";
const CONFIG_DIR: &str = "config";

/// Engine policy knobs.
#[derive(Clone, Debug, Deserialize)]
pub struct PricingConfig {
    /// Absolute tolerance when comparing client-submitted money amounts
    /// against server-derived ones. Disagreements beyond this abort the
    /// submission.
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: Decimal,

    /// Policy: automatic discounts stack additively with each other. When
    /// disabled, only the highest-priority applicable automatic discount
    /// is applied. Combinability flags gate manual codes only, never
    /// automatic-vs-automatic.
    #[serde(default = "default_true")]
    pub automatic_discounts_stack: bool,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            price_tolerance: default_price_tolerance(),
            automatic_discounts_stack: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Database connection URL
    #[serde(default)]
    pub database_url: String,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Default currency for orders that do not specify one
    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub pricing: PricingConfig,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            environment: default_environment(),
            log_level: default_log_level(),
            currency: default_currency(),
            pricing: PricingConfig::default(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
        }
    }
}

fn default_price_tolerance() -> Decimal {
    // one cent
    Decimal::new(1, 2)
}

fn default_true() -> bool {
    true
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

/// Loads configuration from layered files plus `PRICING__`-prefixed
/// environment variables, e.g. `PRICING__PRICING__AUTOMATIC_DISCOUNTS_STACK=false`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let config = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("PRICING").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    info!(environment = %app_config.environment, "Configuration loaded");
    Ok(app_config)
}
