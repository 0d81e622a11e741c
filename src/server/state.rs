//! Application state container
//!
//! Shared resources handed to every handler through axum's state
//! extraction. Cloning is cheap: everything sits behind an `Arc`.

use std::sync::Arc;
use std::time::Instant;

use crate::cache::MockCache;
use crate::config::{create_bedrock_client, Settings};
use crate::db::{clock::system_clock, DataStore, SharedClock};
use crate::middleware::RateLimitState;
use crate::monitoring::CloudWatch;
use crate::services::{
    AccountService, BedrockService, MayaService, ModelClient, NovaService, PaymentGateway,
    SessionStore, StripeGateway,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: DataStore,
    pub cache: Arc<MockCache>,
    pub metrics: Arc<CloudWatch>,
    pub sessions: Arc<SessionStore>,
    pub accounts: Arc<AccountService>,
    pub nova: Arc<NovaService>,
    pub maya: Arc<MayaService>,
    pub payments: Arc<dyn PaymentGateway>,
    pub rate_limits: RateLimitState,
    /// Application start time (for uptime)
    pub start_time: Instant,
}

impl AppState {
    /// Wire up the configured backends
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        tracing::debug!(
            region = %settings.aws_region,
            backend = %settings.store_backend,
            dynamodb_endpoint = ?settings.dynamodb_endpoint_url,
            bedrock_endpoint = ?settings.bedrock_endpoint_url,
            "Initializing application state"
        );

        let store = DataStore::from_settings(&settings).await;

        let bedrock_client = create_bedrock_client(&settings).await;
        let model: Arc<dyn ModelClient> =
            Arc::new(BedrockService::new(bedrock_client, settings.nova.max_tokens));

        if !settings.payments_enabled() {
            tracing::warn!("STRIPE_SECRET_KEY not set; checkout is disabled");
        }
        let payments: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(
            &settings.stripe,
            &settings.public_base_url,
            settings.nova.timeout_seconds,
        ));

        let state = Self::from_parts(settings, store, model, payments, system_clock())?;
        tracing::info!("Application state initialized successfully");
        Ok(state)
    }

    /// Assemble state from already-built parts
    pub fn from_parts(
        settings: Settings,
        store: DataStore,
        model: Arc<dyn ModelClient>,
        payments: Arc<dyn PaymentGateway>,
        clock: SharedClock,
    ) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);
        let cache = Arc::new(MockCache::with_clock(clock.clone()));
        let metrics = Arc::new(CloudWatch::new(&settings.app_name)?);

        let sessions = Arc::new(SessionStore::new(
            store.sessions.clone(),
            clock,
            settings.session_ttl_seconds,
        ));
        let accounts = Arc::new(AccountService::new(
            store.clone(),
            cache.clone(),
            settings.bcrypt_cost,
        ));
        let nova = Arc::new(NovaService::new(model, settings.nova.clone(), metrics.clone()));
        let maya = Arc::new(MayaService::new(cache.clone(), nova.clone()));
        let rate_limits = RateLimitState::new(settings.clone());

        Ok(Self {
            settings,
            store,
            cache,
            metrics,
            sessions,
            accounts,
            nova,
            maya,
            payments,
            rate_limits,
            start_time: Instant::now(),
        })
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Reachability of the backing stores
    pub async fn check_health(&self) -> HealthStatus {
        HealthStatus {
            tables: self.store.health_check().await,
            cache: self.cache.ping(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub tables: bool,
    pub cache: bool,
}

impl HealthStatus {
    pub fn all_healthy(&self) -> bool {
        self.tables && self.cache
    }
}
