//! IELTS GenAI Prep
//!
//! Practice-assessment server: AI-scored IELTS writing and speaking over a
//! mock (or real) DynamoDB store, with Stripe checkout.

use anyhow::Result;
use clap::Parser;
use ielts_genai_prep::{
    config::{Environment, Settings, StoreBackend},
    server::App,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// IELTS GenAI Prep server
#[derive(Parser, Debug)]
#[command(name = "ielts-genai-prep")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides HOST env var)
    #[arg(long)]
    host: Option<String>,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long)]
    log_level: Option<String>,

    /// Environment: development, staging, production (overrides ENVIRONMENT env var)
    #[arg(short, long)]
    env: Option<Environment>,

    /// Table backend: memory or dynamodb (overrides STORE_BACKEND env var)
    #[arg(short, long)]
    backend: Option<StoreBackend>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Settings first, so the log level is known before tracing starts
    let mut settings = Settings::load()?;

    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(env) = args.env {
        settings.environment = env;
    }
    if let Some(backend) = args.backend {
        settings.store_backend = backend;
    }

    init_tracing(&settings.log_level);

    tracing::info!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        environment = %settings.environment,
        backend = %settings.store_backend,
        host = %settings.host,
        port = %settings.port,
        "Starting application"
    );

    let app = App::new(settings).await?;
    app.run().await?;

    tracing::info!("Application shutdown complete");

    Ok(())
}

/// JSON logs to stdout; `RUST_LOG` wins over the configured level
fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().json().with_filter(filter))
        .init();
}
