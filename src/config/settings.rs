//! Application settings and configuration
//!
//! Settings are read from environment variables (a `.env` file is loaded
//! first when present) and fall back to development defaults.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Where table rows live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local mock tables (lost on restart)
    #[default]
    Memory,
    /// Real DynamoDB tables (or DynamoDB Local via DYNAMODB_ENDPOINT_URL)
    #[value(alias = "dynamo")]
    Dynamodb,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Dynamodb => write!(f, "dynamodb"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mock" => Ok(StoreBackend::Memory),
            "dynamodb" | "dynamo" => Ok(StoreBackend::Dynamodb),
            _ => anyhow::bail!("Invalid store backend: {}. Expected: memory or dynamodb", s),
        }
    }
}

/// Rate limiting for the AI-backed endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_window: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 20,
            window_seconds: 60,
        }
    }
}

/// Bedrock model identifiers and call limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NovaConfig {
    /// Model used for writing/speaking band scoring
    pub micro_model_id: String,
    /// Model used for Maya conversation turns
    pub sonic_model_id: String,
    /// Upper bound for a single model call, retries included
    pub timeout_seconds: u64,
    pub max_tokens: i32,
}

impl Default for NovaConfig {
    fn default() -> Self {
        Self {
            micro_model_id: "amazon.nova-micro-v1:0".to_string(),
            sonic_model_id: "amazon.nova-sonic-v1:0".to_string(),
            timeout_seconds: 30,
            max_tokens: 1024,
        }
    }
}

/// Stripe checkout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeConfig {
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub api_base: String,
    pub currency: String,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            api_base: "https://api.stripe.com".to_string(),
            currency: "usd".to_string(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // Server settings
    pub host: String,
    pub port: u16,
    /// Absolute base URL used in Stripe success/cancel redirects
    pub public_base_url: String,
    pub cookie_secure: bool,

    // AWS settings
    pub aws_region: String,
    pub dynamodb_endpoint_url: Option<String>,
    pub bedrock_endpoint_url: Option<String>,

    // Storage
    pub store_backend: StoreBackend,
    pub users_table: String,
    pub sessions_table: String,
    pub assessments_table: String,
    /// Age after which any mock row is swept; 0 turns the age rule off
    pub mock_row_max_age_seconds: u64,
    pub session_ttl_seconds: u64,
    pub bcrypt_cost: u32,

    pub rate_limit: RateLimitConfig,
    pub nova: NovaConfig,
    pub stripe: StripeConfig,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let settings = Self {
            app_name: env_or_default("APP_NAME", &defaults.app_name),
            app_version: defaults.app_version,
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),

            host: env_or_default("HOST", "0.0.0.0"),
            port: env_or_default("PORT", "5000")
                .parse()
                .context("Invalid PORT value")?,
            public_base_url: env_or_default("PUBLIC_BASE_URL", &defaults.public_base_url),
            cookie_secure: env_parse("COOKIE_SECURE", false),

            aws_region: env_or_default("AWS_REGION", "us-east-1"),
            dynamodb_endpoint_url: env::var("DYNAMODB_ENDPOINT_URL").ok(),
            bedrock_endpoint_url: env::var("BEDROCK_ENDPOINT_URL").ok(),

            store_backend: env_or_default("STORE_BACKEND", "memory")
                .parse()
                .context("Invalid STORE_BACKEND value")?,
            users_table: env_or_default("USERS_TABLE", &defaults.users_table),
            sessions_table: env_or_default("SESSIONS_TABLE", &defaults.sessions_table),
            assessments_table: env_or_default("ASSESSMENTS_TABLE", &defaults.assessments_table),
            mock_row_max_age_seconds: env_parse("MOCK_ROW_MAX_AGE_SECONDS", 3600),
            session_ttl_seconds: env_parse("SESSION_TTL_SECONDS", 3600),
            bcrypt_cost: env_parse("BCRYPT_COST", bcrypt::DEFAULT_COST),

            rate_limit: RateLimitConfig {
                enabled: env_parse("RATE_LIMIT_ENABLED", true),
                requests_per_window: env_parse("RATE_LIMIT_REQUESTS_PER_WINDOW", 20),
                window_seconds: env_parse("RATE_LIMIT_WINDOW_SECONDS", 60),
            },

            nova: NovaConfig {
                micro_model_id: env_or_default("NOVA_MICRO_MODEL_ID", &defaults.nova.micro_model_id),
                sonic_model_id: env_or_default("NOVA_SONIC_MODEL_ID", &defaults.nova.sonic_model_id),
                timeout_seconds: env_parse("AI_TIMEOUT_SECONDS", 30),
                max_tokens: env_parse("AI_MAX_TOKENS", 1024),
            },

            stripe: StripeConfig {
                secret_key: env::var("STRIPE_SECRET_KEY").ok().filter(|k| !k.is_empty()),
                api_base: env_or_default("STRIPE_API_BASE", &defaults.stripe.api_base),
                currency: env_or_default("STRIPE_CURRENCY", "usd"),
            },
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.session_ttl_seconds == 0 {
            anyhow::bail!("SESSION_TTL_SECONDS must be > 0");
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            anyhow::bail!("BCRYPT_COST must be between 4 and 31");
        }

        if self.rate_limit.enabled {
            if self.rate_limit.requests_per_window == 0 {
                anyhow::bail!("Rate limit requests_per_window must be > 0");
            }
            if self.rate_limit.window_seconds == 0 {
                anyhow::bail!("Rate limit window_seconds must be > 0");
            }
        }

        if self.nova.timeout_seconds == 0 {
            anyhow::bail!("AI_TIMEOUT_SECONDS must be > 0");
        }

        if self.environment == Environment::Production {
            if self.store_backend == StoreBackend::Memory {
                tracing::warn!("Running in production on the in-memory store; data is lost on restart!");
            }
            if !self.cookie_secure {
                tracing::warn!("Running in production with non-secure session cookies!");
            }
        }

        Ok(())
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether checkout can be offered at all
    pub fn payments_enabled(&self) -> bool {
        self.stripe.secret_key.is_some()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "ielts-genai-prep".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 5000,
            public_base_url: "http://localhost:5000".to_string(),
            cookie_secure: false,
            aws_region: "us-east-1".to_string(),
            dynamodb_endpoint_url: None,
            bedrock_endpoint_url: None,
            store_backend: StoreBackend::Memory,
            users_table: "ielts-genai-prep-users".to_string(),
            sessions_table: "ielts-genai-prep-sessions".to_string(),
            assessments_table: "ielts-genai-prep-assessments".to_string(),
            mock_row_max_age_seconds: 3600,
            session_ttl_seconds: 3600,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            rate_limit: RateLimitConfig::default(),
            nova: NovaConfig::default(),
            stripe: StripeConfig::default(),
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, keeping the default when unset or malformed
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.app_name, "ielts-genai-prep");
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.store_backend, StoreBackend::Memory);
        assert_eq!(settings.session_ttl_seconds, 3600);
        assert_eq!(settings.mock_row_max_age_seconds, 3600);
        assert!(!settings.payments_enabled());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("development".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!("DynamoDB".parse::<StoreBackend>().unwrap(), StoreBackend::Dynamodb);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_session_ttl() {
        let settings = Settings {
            session_ttl_seconds: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_server_addr() {
        let settings = Settings::default();
        assert_eq!(settings.server_addr(), "0.0.0.0:5000");
    }
}
