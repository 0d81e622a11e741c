//! Create the DynamoDB tables used with `STORE_BACKEND=dynamodb`
//!
//! Usage:
//!   cargo run --bin setup_tables
//!
//! For local development with DynamoDB Local:
//!   DYNAMODB_ENDPOINT_URL=http://localhost:8001 cargo run --bin setup_tables

use anyhow::{bail, Result};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType,
    TableStatus, TimeToLiveSpecification,
};
use clap::Parser;
use std::time::Duration;

use ielts_genai_prep::config::{create_dynamodb_client, Settings};
use ielts_genai_prep::db::table::{key_attribute_for, TTL_ATTR};

/// Create the users, sessions and assessments tables
#[derive(Parser, Debug)]
#[command(name = "setup_tables")]
#[command(about = "Create the IELTS GenAI Prep DynamoDB tables and enable TTL")]
struct Args {
    /// DynamoDB endpoint URL (overrides DYNAMODB_ENDPOINT_URL)
    #[arg(long)]
    endpoint_url: Option<String>,

    /// Seconds to wait for each new table to become active
    #[arg(long, default_value_t = 60)]
    wait_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load()?;
    if args.endpoint_url.is_some() {
        settings.dynamodb_endpoint_url = args.endpoint_url;
    }
    if let Some(ref url) = settings.dynamodb_endpoint_url {
        println!("Using DynamoDB endpoint: {}", url);
    }

    let client = create_dynamodb_client(&settings).await;
    let tables = [
        settings.users_table.clone(),
        settings.sessions_table.clone(),
        settings.assessments_table.clone(),
    ];

    println!("\nSetting up DynamoDB tables...\n");

    let mut failures = 0;
    for table_name in &tables {
        let key = key_attribute_for(table_name);
        match setup_table(&client, table_name, key, Duration::from_secs(args.wait_seconds)).await {
            Ok(true) => println!("Created table {} (key: {}, TTL on {})", table_name, key, TTL_ATTR),
            Ok(false) => println!("Table already exists: {}", table_name),
            Err(e) => {
                failures += 1;
                eprintln!("Failed to set up table {}: {:#}", table_name, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} table(s) could not be set up", failures);
    }

    println!("\nTable setup complete.\n");
    Ok(())
}

/// Create `table_name` keyed on `key`, wait for it, then enable TTL.
/// Returns `false` when the table already existed.
async fn setup_table(
    client: &aws_sdk_dynamodb::Client,
    table_name: &str,
    key: &str,
    wait: Duration,
) -> Result<bool> {
    let existing = client.list_tables().send().await?;
    if existing.table_names().iter().any(|name| name == table_name) {
        return Ok(false);
    }

    client
        .create_table()
        .table_name(table_name)
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(key)
                .attribute_type(ScalarAttributeType::S)
                .build()?,
        )
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(key)
                .key_type(KeyType::Hash)
                .build()?,
        )
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await?;

    wait_until_active(client, table_name, wait).await?;

    client
        .update_time_to_live()
        .table_name(table_name)
        .time_to_live_specification(
            TimeToLiveSpecification::builder()
                .attribute_name(TTL_ATTR)
                .enabled(true)
                .build()?,
        )
        .send()
        .await?;

    Ok(true)
}

async fn wait_until_active(client: &aws_sdk_dynamodb::Client, table_name: &str, wait: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + wait;

    loop {
        let description = client.describe_table().table_name(table_name).send().await?;
        let status = description.table().and_then(|t| t.table_status());
        if status == Some(&TableStatus::Active) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("table {} not active after {:?} (status: {:?})", table_name, wait, status);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
