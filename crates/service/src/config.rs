//! Service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `BOXRENT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `BOXRENT_BASE_URL` - Public URL used for GoPay return and notification callbacks
//! - `GOPAY_GOID` - Merchant account id
//! - `GOPAY_CLIENT_ID` - OAuth2 client id
//! - `GOPAY_CLIENT_SECRET` - OAuth2 client secret
//!
//! ## Optional
//! - `BOXRENT_HOST` - Bind address (default: 127.0.0.1)
//! - `BOXRENT_PORT` - Listen port (default: 3002)
//! - `GOPAY_GATEWAY_URL` - API root (default: GoPay sandbox)
//! - `GOPAY_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `GOPAY_CURRENCY` - Payment currency (default: CZK)
//! - `GOPAY_LANGUAGE` - Payment page language (default: CS)
//! - `ORDER_EXPIRATION_MINUTES` - How long a reservation holds a unit (default: 60)
//! - `RECURRING_RETRY_DAYS` - Delay before retrying a failed charge (default: 3)
//! - `RECURRING_TRANSIENT_FAILURES` - `count` or `skip` (default: count)
//! - `SELF_BILLING_NUMBER_FORMAT` - `year` or `plain` (default: year)
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use boxrent_core::CurrencyCode;
use boxrent_core::domain::InvoiceNumberFormat;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::services::recurring::TransientFailurePolicy;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_GATEWAY_URL: &str = "https://gw.sandbox.gopay.com/api/";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "insert",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Application configuration shared by the server and the batch CLI.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// GoPay API configuration
    pub gopay: GoPayConfig,
    /// Business rule settings
    pub rental: RentalSettings,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// GoPay REST API configuration.
///
/// Implements `Debug` manually to redact the client secret.
#[derive(Clone)]
pub struct GoPayConfig {
    /// Merchant account (eshop) id
    pub goid: i64,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: SecretString,
    /// API root, ending with `/api/`
    pub gateway_url: Url,
    /// Bound on every gateway request
    pub timeout: Duration,
    pub currency: CurrencyCode,
    /// Payment page language (e.g. CS, EN)
    pub language: String,
}

impl std::fmt::Debug for GoPayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoPayConfig")
            .field("goid", &self.goid)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("gateway_url", &self.gateway_url.as_str())
            .field("timeout", &self.timeout)
            .field("currency", &self.currency)
            .field("language", &self.language)
            .finish()
    }
}

/// Business rules that vary per deployment.
#[derive(Debug, Clone)]
pub struct RentalSettings {
    /// Public URL of this service
    pub base_url: Url,
    /// How long a reserved order holds its unit before it expires
    pub order_ttl: chrono::Duration,
    /// Delay between a failed recurring charge and its retry
    pub retry_after: chrono::Duration,
    /// Whether transient gateway failures count as a strike
    pub transient_failures: TransientFailurePolicy,
    pub invoice_format: InvoiceNumberFormat,
    pub currency: CurrencyCode,
}

impl RentalSettings {
    /// Settings with default business rules for `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            order_ttl: chrono::Duration::minutes(60),
            retry_after: chrono::Duration::days(3),
            transient_failures: TransientFailurePolicy::default(),
            invoice_format: InvoiceNumberFormat::default(),
            currency: CurrencyCode::default(),
        }
    }

    /// Where GoPay sends the customer after paying for `order_id`.
    #[must_use]
    pub fn return_url(&self, order_id: boxrent_core::OrderId) -> String {
        self.join(&format!("orders/{order_id}/payment-return"))
    }

    /// Where GoPay posts payment state changes.
    #[must_use]
    pub fn notification_url(&self) -> String {
        self.join("webhooks/gopay")
    }

    fn join(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{path}")
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("BOXRENT_DATABASE_URL")?;
        let host = parse_env("BOXRENT_HOST", "127.0.0.1")?;
        let port = parse_env("BOXRENT_PORT", "3002")?;
        let gopay = GoPayConfig::from_env()?;
        let rental = RentalSettings::from_env(gopay.currency)?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);

        Ok(Self {
            database_url,
            host,
            port,
            gopay,
            rental,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl GoPayConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let client_secret = get_required_env("GOPAY_CLIENT_SECRET")?;
        // Sandbox secrets are short; warn instead of refusing to start
        if let Err(e) = validate_secret_strength(&client_secret, "GOPAY_CLIENT_SECRET") {
            tracing::warn!("GOPAY_CLIENT_SECRET validation warning: {e}");
        }

        let gateway_url = get_env_or_default("GOPAY_GATEWAY_URL", DEFAULT_GATEWAY_URL);
        let gateway_url = Url::parse(&ensure_trailing_slash(&gateway_url)).map_err(|e| {
            ConfigError::InvalidEnvVar("GOPAY_GATEWAY_URL".to_string(), e.to_string())
        })?;

        Ok(Self {
            goid: parse_required_env("GOPAY_GOID")?,
            client_id: get_required_env("GOPAY_CLIENT_ID")?,
            client_secret: SecretString::from(client_secret),
            gateway_url,
            timeout: Duration::from_secs(parse_env("GOPAY_TIMEOUT_SECS", "30")?),
            currency: parse_env("GOPAY_CURRENCY", "CZK")?,
            language: get_env_or_default("GOPAY_LANGUAGE", "CS").to_uppercase(),
        })
    }
}

impl RentalSettings {
    fn from_env(currency: CurrencyCode) -> Result<Self, ConfigError> {
        let base_url = get_required_env("BOXRENT_BASE_URL")?;
        let base_url = Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidEnvVar("BOXRENT_BASE_URL".to_string(), e.to_string()))?;

        let ttl_minutes: i64 = parse_env("ORDER_EXPIRATION_MINUTES", "60")?;
        let retry_days: i64 = parse_env("RECURRING_RETRY_DAYS", "3")?;
        if ttl_minutes <= 0 {
            return Err(ConfigError::InvalidEnvVar(
                "ORDER_EXPIRATION_MINUTES".to_string(),
                "must be positive".to_string(),
            ));
        }
        if retry_days < 0 {
            return Err(ConfigError::InvalidEnvVar(
                "RECURRING_RETRY_DAYS".to_string(),
                "must not be negative".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            order_ttl: chrono::Duration::minutes(ttl_minutes),
            retry_after: chrono::Duration::days(retry_days),
            transient_failures: parse_env("RECURRING_TRANSIENT_FAILURES", "count")?,
            invoice_format: parse_env("SELF_BILLING_NUMBER_FORMAT", "year")?,
            currency,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, &get_env_or_default(key, default))
}

/// Parse a required environment variable.
fn parse_required_env<T>(key: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, &get_required_env(key)?)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gopay() -> GoPayConfig {
        GoPayConfig {
            goid: 8_123_456_789,
            client_id: "1061399163".to_string(),
            client_secret: SecretString::from("stDTmVXF"),
            gateway_url: Url::parse(DEFAULT_GATEWAY_URL).unwrap(),
            timeout: Duration::from_secs(30),
            currency: CurrencyCode::CZK,
            language: "CS".to_string(),
        }
    }

    #[test]
    fn test_shannon_entropy() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
        assert!(shannon_entropy("aB3$xY9!mK2@nL5#") > 3.3);
    }

    #[test]
    fn test_validate_secret_strength() {
        assert!(matches!(
            validate_secret_strength("your-client-secret", "TEST_VAR"),
            Err(ConfigError::InsecureSecret(_, _))
        ));
        assert!(validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR").is_err());
        assert!(validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR").is_ok());
    }

    #[test]
    fn test_gopay_debug_redacts_secret() {
        let debug = format!("{:?}", gopay());
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("stDTmVXF"));
    }

    #[test]
    fn test_parse_value_reports_variable() {
        let err = parse_value::<u16>("BOXRENT_PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("BOXRENT_PORT"));

        let format: InvoiceNumberFormat = parse_value("SELF_BILLING_NUMBER_FORMAT", "plain").unwrap();
        assert_eq!(format, InvoiceNumberFormat::Plain);
    }

    #[test]
    fn test_callback_urls() {
        let settings = RentalSettings::new(Url::parse("https://boxrent.cz/").unwrap());
        assert_eq!(
            settings.notification_url(),
            "https://boxrent.cz/webhooks/gopay"
        );
        assert_eq!(
            settings.return_url(boxrent_core::OrderId::new(12)),
            "https://boxrent.cz/orders/12/payment-return"
        );
    }

    #[test]
    fn test_gateway_url_slash() {
        assert_eq!(
            ensure_trailing_slash("https://gate.gopay.cz/api"),
            "https://gate.gopay.cz/api/"
        );
    }

    #[test]
    fn test_socket_addr() {
        let config = AppConfig {
            database_url: SecretString::from("postgres://localhost/boxrent"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3002,
            gopay: gopay(),
            rental: RentalSettings::new(Url::parse("http://localhost:3002").unwrap()),
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.1,
        };
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3002");
    }
}
