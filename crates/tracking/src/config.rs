//! Tracking configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `FORNO_PLATFORM_URL` - Base URL of the backend platform
//!   (e.g., <https://fornodoro.example-platform.co>)
//! - `FORNO_PLATFORM_ANON_KEY` - Publishable anonymous API key; row-level
//!   security on the platform scopes what it can read
//!
//! ## Optional
//! - `FORNO_ORDERS_TABLE` - Orders table name (default: orders)
//! - `FORNO_IDENTITY_FILE` - Path of the device identity token file
//!   (default: .forno/client-id)
//! - `FORNO_SUBSCRIBE_TIMEOUT_SECS` - Seconds to wait for the realtime
//!   subscription to be confirmed before giving up (default: 10)

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const DEFAULT_ORDERS_TABLE: &str = "orders";
const DEFAULT_IDENTITY_FILE: &str = ".forno/client-id";
const DEFAULT_SUBSCRIBE_TIMEOUT_SECS: u64 = 10;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

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
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
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

/// Order-tracking client configuration.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// Base URL of the backend platform.
    pub platform_url: Url,
    /// Anonymous API key sent with every request.
    pub anon_key: SecretString,
    /// Orders table name on the platform.
    pub orders_table: String,
    /// Where the durable device identity token lives.
    pub identity_file: PathBuf,
    /// How long to wait for the realtime subscription to be confirmed.
    pub subscribe_timeout: Duration,
}

impl TrackingConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API key fails validation (placeholder detection, entropy
    /// check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let platform_url = get_required_env("FORNO_PLATFORM_URL")?
            .parse::<Url>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("FORNO_PLATFORM_URL".to_string(), e.to_string())
            })?;
        let anon_key = get_validated_secret("FORNO_PLATFORM_ANON_KEY")?;
        let orders_table = get_env_or_default("FORNO_ORDERS_TABLE", DEFAULT_ORDERS_TABLE);
        let identity_file =
            PathBuf::from(get_env_or_default("FORNO_IDENTITY_FILE", DEFAULT_IDENTITY_FILE));
        let subscribe_timeout_secs = match std::env::var("FORNO_SUBSCRIBE_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidEnvVar("FORNO_SUBSCRIBE_TIMEOUT_SECS".to_string(), e.to_string())
            })?,
            Err(_) => DEFAULT_SUBSCRIBE_TIMEOUT_SECS,
        };

        Ok(Self {
            platform_url,
            anon_key,
            orders_table,
            identity_file,
            subscribe_timeout: Duration::from_secs(subscribe_timeout_secs),
        })
    }

    /// REST endpoint for the orders table.
    #[must_use]
    pub fn orders_endpoint(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.platform_url.as_str().trim_end_matches('/'),
            self.orders_table
        )
    }

    /// Streaming change-notification endpoint.
    #[must_use]
    pub fn realtime_endpoint(&self) -> String {
        format!(
            "{}/realtime/v1/stream",
            self.platform_url.as_str().trim_end_matches('/')
        )
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
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
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Real platform keys are signed tokens with high entropy
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the key issued by the platform dashboard."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config_with_url(url: &str) -> TrackingConfig {
        TrackingConfig {
            platform_url: url.parse().unwrap(),
            anon_key: SecretString::from("k".repeat(32)),
            orders_table: "orders".to_string(),
            identity_file: PathBuf::from(".forno/client-id"),
            subscribe_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_single_char() {
        // All same character = 0 entropy
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_high() {
        let entropy = shannon_entropy("aB3$xY9!mK2@nL5#");
        assert!(entropy > 3.3);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-anon-key-here", "TEST_VAR");
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InsecureSecret(_, _)
        ));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_orders_endpoint_trims_trailing_slash() {
        let config = config_with_url("https://forno.example.co/");
        assert_eq!(
            config.orders_endpoint(),
            "https://forno.example.co/rest/v1/orders"
        );
    }

    #[test]
    fn test_realtime_endpoint() {
        let config = config_with_url("https://forno.example.co");
        assert_eq!(
            config.realtime_endpoint(),
            "https://forno.example.co/realtime/v1/stream"
        );
    }
}
