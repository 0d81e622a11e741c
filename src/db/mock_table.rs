//! In-memory stand-in for a DynamoDB table
//!
//! Rows live in a process-local map and are swept lazily: every `put_item`,
//! `get_item` and `scan` first drops rows whose `ttl` has passed or that are
//! older than the table's maximum age. Nothing survives a restart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::db::clock::{system_clock, SharedClock};
use crate::db::table::{
    derive_key, is_expired, key_attribute_for, stamp, Item, Table, TableError,
    CREATED_AT_ATTR, DEFAULT_MAX_ROW_AGE_SECONDS,
};

/// Mock DynamoDB table
#[derive(Debug)]
pub struct MockTable {
    name: String,
    key_attribute: &'static str,
    rows: Mutex<HashMap<String, Item>>,
    clock: SharedClock,
    max_age_seconds: Option<f64>,
}

impl MockTable {
    /// Create a table using the system clock and the one-hour row age
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, system_clock())
    }

    pub fn with_clock(name: impl Into<String>, clock: SharedClock) -> Self {
        let name = name.into();
        Self {
            key_attribute: key_attribute_for(&name),
            name,
            rows: Mutex::new(HashMap::new()),
            clock,
            max_age_seconds: Some(DEFAULT_MAX_ROW_AGE_SECONDS as f64),
        }
    }

    /// Override the maximum row age; `None` keeps rows until their `ttl`
    pub fn with_max_age(mut self, max_age_seconds: Option<f64>) -> Self {
        self.max_age_seconds = max_age_seconds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stamp and store a row, then sweep. `false` if the row has no key.
    pub fn put_item(&self, mut item: Item) -> bool {
        let Some(key) = derive_key(self.key_attribute, &item) else {
            tracing::warn!(table = %self.name, key_attribute = self.key_attribute, "Rejected item without a key");
            return false;
        };

        let now = self.clock.now();
        stamp(&mut item, &self.name, now);

        let mut rows = self.lock();
        rows.insert(key, item);
        self.sweep(&mut rows, now);
        true
    }

    /// Like `put_item`, but leaves an existing live row alone and returns `false`
    pub fn insert_item(&self, mut item: Item) -> bool {
        let Some(key) = derive_key(self.key_attribute, &item) else {
            tracing::warn!(table = %self.name, key_attribute = self.key_attribute, "Rejected item without a key");
            return false;
        };

        let now = self.clock.now();
        let mut rows = self.lock();
        self.sweep(&mut rows, now);
        if rows.contains_key(&key) {
            return false;
        }

        stamp(&mut item, &self.name, now);
        rows.insert(key, item);
        self.sweep(&mut rows, now);
        true
    }

    /// Sweep, then look the row up
    pub fn get_item(&self, key: &str) -> Option<Item> {
        let now = self.clock.now();
        let mut rows = self.lock();
        self.sweep(&mut rows, now);
        rows.get(key).cloned()
    }

    pub fn delete_item(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Shallow merge of `updates` into an existing row.
    ///
    /// The key attribute and `_created_at` are left untouched so an update
    /// neither re-keys a row nor extends its life.
    pub fn update_item(&self, key: &str, updates: Item) -> bool {
        let mut rows = self.lock();
        let Some(row) = rows.get_mut(key) else {
            return false;
        };

        for (attr, value) in updates {
            if attr == self.key_attribute || attr == CREATED_AT_ATTR {
                continue;
            }
            row.insert(attr, value);
        }
        true
    }

    /// Every live row. `_filter_expression` is ignored.
    pub fn scan(&self, _filter_expression: Option<&str>) -> Vec<Item> {
        let now = self.clock.now();
        let mut rows = self.lock();
        self.sweep(&mut rows, now);
        rows.values().cloned().collect()
    }

    /// Stored rows, expired ones included until the next sweep
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(&self, rows: &mut HashMap<String, Item>, now: f64) {
        let before = rows.len();
        rows.retain(|_, row| !is_expired(row, now, self.max_age_seconds));
        let removed = before - rows.len();
        if removed > 0 {
            tracing::debug!(table = %self.name, removed, "Swept expired rows");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Item>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Table for MockTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_attribute(&self) -> &'static str {
        self.key_attribute
    }

    async fn put_item(&self, item: Item) -> Result<bool, TableError> {
        Ok(MockTable::put_item(self, item))
    }

    async fn insert_item(&self, item: Item) -> Result<bool, TableError> {
        Ok(MockTable::insert_item(self, item))
    }

    async fn get_item(&self, key: &str) -> Result<Option<Item>, TableError> {
        Ok(MockTable::get_item(self, key))
    }

    async fn delete_item(&self, key: &str) -> Result<bool, TableError> {
        Ok(MockTable::delete_item(self, key))
    }

    async fn update_item(&self, key: &str, updates: Item) -> Result<bool, TableError> {
        Ok(MockTable::update_item(self, key, updates))
    }

    async fn scan(&self, filter_expression: Option<&str>) -> Result<Vec<Item>, TableError> {
        Ok(MockTable::scan(self, filter_expression))
    }
}
