//! Configuration management module
//!
//! Loads and validates application configuration from environment
//! variables and .env files, and builds the AWS SDK clients.

pub mod aws;
pub mod settings;

pub use aws::{create_bedrock_client, create_dynamodb_client, AwsConfigBuilder};
pub use settings::{Environment, NovaConfig, RateLimitConfig, Settings, StoreBackend, StripeConfig};
