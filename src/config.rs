use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "usd";
const DEFAULT_PAYMENT_PROVIDER: &str = "stripe";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Payment processor backing the checkout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentProvider {
    Stripe,
    /// In-process intents for local development; never talks to a processor
    Simulated,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Platform key expected in the `apikey` header of function calls
    #[serde(default)]
    pub function_api_key: Option<String>,

    /// Payment provider identifier ("stripe" or "simulated")
    #[serde(default = "default_payment_provider")]
    #[validate(custom = "validate_payment_provider")]
    pub payment_provider: String,

    /// Processor secret key used for server-side intent creation
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Processor API base URL
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    /// HTTP timeout for processor calls (seconds)
    #[serde(default = "default_payment_timeout_secs")]
    pub payment_timeout_secs: u64,

    /// Webhook secret for verifying payment gateway callbacks
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub payment_webhook_tolerance_secs: u64,

    /// ISO currency code sent to the processor (lowercase)
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Flat surcharge for the `normal` shipping tier
    #[serde(default = "default_shipping_rate_normal")]
    pub shipping_rate_normal: Decimal,

    /// Flat surcharge for the `express` shipping tier
    #[serde(default = "default_shipping_rate_express")]
    pub shipping_rate_express: Decimal,

    /// Lifetime hint handed to clients with a fresh checkout (seconds)
    #[serde(default = "default_checkout_expiry_secs")]
    pub checkout_expiry_secs: u64,

    /// Cancel the payment intent when the order cannot be persisted
    #[serde(default)]
    pub cancel_orphaned_intents: bool,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything except the
    /// database and environment
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            function_api_key: None,
            payment_provider: default_payment_provider(),
            stripe_secret_key: None,
            stripe_api_base: default_stripe_api_base(),
            payment_timeout_secs: default_payment_timeout_secs(),
            payment_webhook_secret: None,
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            currency: default_currency(),
            shipping_rate_normal: default_shipping_rate_normal(),
            shipping_rate_express: default_shipping_rate_express(),
            checkout_expiry_secs: default_checkout_expiry_secs(),
            cancel_orphaned_intents: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn payment_provider(&self) -> PaymentProvider {
        if self.payment_provider.eq_ignore_ascii_case("simulated") {
            PaymentProvider::Simulated
        } else {
            PaymentProvider::Stripe
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if self.payment_provider() == PaymentProvider::Stripe
            && self
                .stripe_secret_key
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            let mut err = ValidationError::new("stripe_secret_key_required");
            err.message = Some(
                "APP__STRIPE_SECRET_KEY is required when payment_provider is \"stripe\"".into(),
            );
            errors.add("stripe_secret_key", err);
        }

        if self.shipping_rate_normal < Decimal::ZERO || self.shipping_rate_express < Decimal::ZERO
        {
            let mut err = ValidationError::new("shipping_rate_negative");
            err.message = Some("Shipping rates cannot be negative".into());
            errors.add("shipping_rate_normal", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_payment_provider() -> String {
    DEFAULT_PAYMENT_PROVIDER.to_string()
}

fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}

fn default_payment_timeout_secs() -> u64 {
    15
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_shipping_rate_normal() -> Decimal {
    dec!(15.00)
}

fn default_shipping_rate_express() -> Decimal {
    dec!(25.00)
}

fn default_checkout_expiry_secs() -> u64 {
    24 * 3600
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn validate_payment_provider(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "stripe" | "simulated" => Ok(()),
        _ => {
            let mut err = ValidationError::new("payment_provider");
            err.message = Some("Must be one of: stripe, simulated".into());
            Err(err)
        }
    }
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration from `./config`
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (`{dir}/default.toml`)
/// 3. Environment-specific config (`{dir}/{env}.toml`)
/// 4. Environment variables (`APP__*`)
pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .add_source(
            File::with_name(&config_dir.join("default").to_string_lossy()).required(false),
        )
        .add_source(File::with_name(&config_dir.join(&run_env).to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
