//! AWS SDK configuration
//!
//! Builds the Bedrock Runtime and DynamoDB clients, honouring custom
//! endpoints for DynamoDB Local and mocked Bedrock endpoints.

use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region, SdkConfig};
use aws_sdk_bedrockruntime::Client as BedrockRuntimeClient;
use aws_sdk_dynamodb::Client as DynamoDbSdkClient;

use crate::config::Settings;

/// AWS configuration builder
pub struct AwsConfigBuilder<'a> {
    settings: &'a Settings,
}

impl<'a> AwsConfigBuilder<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Base SDK configuration: region from settings, default credential chain
    pub async fn build_sdk_config(&self) -> SdkConfig {
        let region_provider =
            RegionProviderChain::first_try(Region::new(self.settings.aws_region.clone()))
                .or_default_provider();

        aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await
    }

    /// DynamoDB client, pointed at `DYNAMODB_ENDPOINT_URL` when set
    pub async fn build_dynamodb_client(&self) -> DynamoDbSdkClient {
        let sdk_config = self.build_sdk_config().await;

        match &self.settings.dynamodb_endpoint_url {
            Some(endpoint_url) => {
                tracing::info!(endpoint = %endpoint_url, "Using custom DynamoDB endpoint");
                let config = aws_sdk_dynamodb::config::Builder::from(&sdk_config)
                    .endpoint_url(endpoint_url)
                    .build();
                DynamoDbSdkClient::from_conf(config)
            }
            None => DynamoDbSdkClient::new(&sdk_config),
        }
    }

    /// Bedrock Runtime client, pointed at `BEDROCK_ENDPOINT_URL` when set
    pub async fn build_bedrock_client(&self) -> BedrockRuntimeClient {
        let sdk_config = self.build_sdk_config().await;

        match &self.settings.bedrock_endpoint_url {
            Some(endpoint_url) => {
                tracing::info!(endpoint = %endpoint_url, "Using custom Bedrock endpoint");
                let config = aws_sdk_bedrockruntime::config::Builder::from(&sdk_config)
                    .endpoint_url(endpoint_url)
                    .build();
                BedrockRuntimeClient::from_conf(config)
            }
            None => BedrockRuntimeClient::new(&sdk_config),
        }
    }
}

/// Create a DynamoDB client from settings
pub async fn create_dynamodb_client(settings: &Settings) -> DynamoDbSdkClient {
    AwsConfigBuilder::new(settings).build_dynamodb_client().await
}

/// Create a Bedrock Runtime client from settings
pub async fn create_bedrock_client(settings: &Settings) -> BedrockRuntimeClient {
    AwsConfigBuilder::new(settings).build_bedrock_client().await
}
