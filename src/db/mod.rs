//! Database module
//!
//! Table abstraction with an in-memory mock backend and a DynamoDB backend,
//! plus the `DataStore` that groups the application's tables.

pub mod attributes;
pub mod clock;
pub mod dynamodb;
pub mod mock_table;
pub mod table;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use dynamodb::DynamoTable;
pub use mock_table::MockTable;
pub use table::{Item, Table, TableError};

use std::sync::Arc;

use crate::config::{create_dynamodb_client, Settings, StoreBackend};
use table::max_age_from_seconds;

/// The application's tables
#[derive(Clone)]
pub struct DataStore {
    pub users: Arc<dyn Table>,
    pub sessions: Arc<dyn Table>,
    pub assessments: Arc<dyn Table>,
}

impl DataStore {
    /// Build the configured backend
    pub async fn from_settings(settings: &Settings) -> Self {
        match settings.store_backend {
            StoreBackend::Memory => {
                tracing::info!("Using in-memory mock tables");
                Self::in_memory(settings, clock::system_clock())
            }
            StoreBackend::Dynamodb => {
                tracing::info!(region = %settings.aws_region, "Using DynamoDB tables");
                let client = create_dynamodb_client(settings).await;
                Self::dynamodb(settings, client)
            }
        }
    }

    pub fn in_memory(settings: &Settings, clock: SharedClock) -> Self {
        let max_age = max_age_from_seconds(settings.mock_row_max_age_seconds);
        let table = |name: &str| -> Arc<dyn Table> {
            Arc::new(MockTable::with_clock(name, clock.clone()).with_max_age(max_age))
        };

        Self {
            users: table(&settings.users_table),
            sessions: table(&settings.sessions_table),
            assessments: table(&settings.assessments_table),
        }
    }

    /// Persistent tables; rows expire only through their `ttl`
    pub fn dynamodb(settings: &Settings, client: aws_sdk_dynamodb::Client) -> Self {
        let table = |name: &str| -> Arc<dyn Table> {
            Arc::new(DynamoTable::new(client.clone(), name))
        };

        Self {
            users: table(&settings.users_table),
            sessions: table(&settings.sessions_table),
            assessments: table(&settings.assessments_table),
        }
    }

    /// True when every table answers
    pub async fn health_check(&self) -> bool {
        self.users.health_check().await
            && self.sessions.health_check().await
            && self.assessments.health_check().await
    }
}
