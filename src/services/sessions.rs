//! Login sessions
//!
//! A session row carries `session_id`, `user_email`, `created_at` and
//! `expires_at`. Expiry is checked against the wall clock whenever a session
//! is read; an expired session is deleted at that point.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::table::TTL_ATTR;
use crate::db::{Item, SharedClock, Table, TableError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_email: String,
    pub created_at: f64,
    pub expires_at: f64,
}

impl Session {
    fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            session_id: item.get("session_id")?.as_str()?.to_string(),
            user_email: item.get("user_email")?.as_str()?.to_string(),
            created_at: item.get("created_at")?.as_f64()?,
            expires_at: item.get("expires_at")?.as_f64()?,
        })
    }

    fn to_item(&self) -> Item {
        let value = json!({
            "session_id": self.session_id,
            "user_email": self.user_email,
            "created_at": self.created_at,
            "expires_at": self.expires_at,
            TTL_ATTR: self.expires_at.ceil() as i64,
        });
        match value {
            Value::Object(map) => map,
            _ => Item::new(),
        }
    }

    pub fn remaining_seconds(&self, now: f64) -> u64 {
        (self.expires_at - now).max(0.0) as u64
    }
}

pub struct SessionStore {
    table: Arc<dyn Table>,
    clock: SharedClock,
    ttl_seconds: u64,
}

impl SessionStore {
    pub fn new(table: Arc<dyn Table>, clock: SharedClock, ttl_seconds: u64) -> Self {
        Self {
            table,
            clock,
            ttl_seconds,
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Seconds until `session` expires
    pub fn remaining_seconds(&self, session: &Session) -> u64 {
        session.remaining_seconds(self.clock.now())
    }

    /// Open a session for `user_email`
    pub async fn create(&self, user_email: &str) -> Result<Session, TableError> {
        let now = self.clock.now();
        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_email: user_email.to_string(),
            created_at: now,
            expires_at: now + self.ttl_seconds as f64,
        };

        if !self.table.put_item(session.to_item()).await? {
            return Err(TableError::Decode("session row has no session_id".to_string()));
        }

        tracing::debug!(session_id = %session.session_id, "Session created");
        Ok(session)
    }

    /// Live session by id; expired sessions are removed
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, TableError> {
        let Some(item) = self.table.get_item(session_id).await? else {
            return Ok(None);
        };

        let Some(session) = Session::from_item(&item) else {
            tracing::warn!(session_id, "Dropping malformed session row");
            self.table.delete_item(session_id).await?;
            return Ok(None);
        };

        if session.expires_at <= self.clock.now() {
            tracing::debug!(session_id, "Session expired");
            self.table.delete_item(session_id).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    pub async fn destroy(&self, session_id: &str) -> Result<bool, TableError> {
        self.table.delete_item(session_id).await
    }

    /// Remove every session of a user (account deletion)
    pub async fn destroy_all_for(&self, user_email: &str) -> Result<usize, TableError> {
        let mut removed = 0;
        for item in self.table.scan(None).await? {
            if item.get("user_email").and_then(Value::as_str) == Some(user_email) {
                if let Some(id) = item.get("session_id").and_then(Value::as_str) {
                    if self.table.delete_item(id).await? {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}
