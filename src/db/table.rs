//! Table abstraction shared by the mock and DynamoDB backends
//!
//! Rows are JSON objects. Every table has exactly one key attribute, picked
//! from the table name, and every write is stamped with `_created_at` and
//! `_table`. A row counts as expired once its `ttl` (epoch seconds) has
//! passed or, on tables with a maximum row age, once it is older than that.

use async_trait::async_trait;
use serde_json::{Map, Value};

/// A single table row
pub type Item = Map<String, Value>;

/// Attribute stamped with the write time (epoch seconds)
pub const CREATED_AT_ATTR: &str = "_created_at";

/// Attribute stamped with the owning table's name
pub const TABLE_ATTR: &str = "_table";

/// Optional per-row expiry (epoch seconds)
pub const TTL_ATTR: &str = "ttl";

/// Default maximum row age, in seconds
pub const DEFAULT_MAX_ROW_AGE_SECONDS: u64 = 3600;

/// Errors raised by table backends
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),

    #[error("Failed to decode item: {0}")]
    Decode(String),
}

/// Key-value table with lazy expiry
#[async_trait]
pub trait Table: Send + Sync {
    /// Table name
    fn name(&self) -> &str;

    /// Attribute the row key is read from
    fn key_attribute(&self) -> &'static str;

    /// Store a row. Returns `false` when no key can be derived from it.
    async fn put_item(&self, item: Item) -> Result<bool, TableError>;

    /// Store a row only when no live row holds its key. Returns `false`
    /// when the key is taken or cannot be derived.
    async fn insert_item(&self, item: Item) -> Result<bool, TableError>;

    /// Fetch a live row by key
    async fn get_item(&self, key: &str) -> Result<Option<Item>, TableError>;

    /// Remove a row. Returns whether a row was present.
    async fn delete_item(&self, key: &str) -> Result<bool, TableError>;

    /// Merge attributes into an existing row. Returns `false` when absent.
    async fn update_item(&self, key: &str, updates: Item) -> Result<bool, TableError>;

    /// All live rows. The filter expression is accepted for call-site
    /// compatibility and never applied.
    async fn scan(&self, filter_expression: Option<&str>) -> Result<Vec<Item>, TableError>;

    /// Whether the backing store is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

/// Key attribute for a table, chosen by name
pub fn key_attribute_for(table_name: &str) -> &'static str {
    let name = table_name.to_ascii_lowercase();
    if name.contains("users") {
        "email"
    } else if name.contains("sessions") {
        "session_id"
    } else {
        "user_id"
    }
}

/// Read the row key out of an item.
///
/// Strings must be non-empty; numbers are accepted as their decimal text.
/// Anything else has no key.
pub fn derive_key(key_attribute: &str, item: &Item) -> Option<String> {
    match item.get(key_attribute)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Add the implicit `_created_at` and `_table` attributes
pub fn stamp(item: &mut Item, table_name: &str, now: f64) {
    item.insert(CREATED_AT_ATTR.to_string(), Value::from(now));
    item.insert(TABLE_ATTR.to_string(), Value::from(table_name));
}

/// Expiry predicate shared by all backends
pub fn is_expired(item: &Item, now: f64, max_age_seconds: Option<f64>) -> bool {
    if let Some(ttl) = item.get(TTL_ATTR).and_then(Value::as_f64) {
        if ttl < now {
            return true;
        }
    }

    match (max_age_seconds, item.get(CREATED_AT_ATTR).and_then(Value::as_f64)) {
        (Some(max_age), Some(created_at)) => now - created_at > max_age,
        _ => false,
    }
}

/// Maximum age in seconds from a configured value; zero disables the rule
pub fn max_age_from_seconds(seconds: u64) -> Option<f64> {
    (seconds > 0).then_some(seconds as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_key_attribute_by_table_name() {
        assert_eq!(key_attribute_for("ielts-genai-prep-users"), "email");
        assert_eq!(key_attribute_for("ielts-genai-prep-sessions"), "session_id");
        assert_eq!(key_attribute_for("ielts-genai-prep-assessments"), "user_id");
        assert_eq!(key_attribute_for("Prod-Users"), "email");
    }

    #[test]
    fn test_derive_key() {
        assert_eq!(
            derive_key("email", &item(json!({"email": "a@b.com"}))),
            Some("a@b.com".to_string())
        );
        assert_eq!(derive_key("user_id", &item(json!({"user_id": 42}))), Some("42".to_string()));
        assert_eq!(derive_key("user_id", &item(json!({"user_id": 1.5}))), Some("1.5".to_string()));
        assert_eq!(derive_key("user_id", &item(json!({"user_id": -3}))), Some("-3".to_string()));
        assert_eq!(derive_key("email", &item(json!({"email": ""}))), None);
        assert_eq!(derive_key("email", &item(json!({"user_id": "x"}))), None);
        assert_eq!(derive_key("email", &item(json!({"email": null}))), None);
    }

    #[test]
    fn test_ttl_expiry() {
        let row = item(json!({"ttl": 100.0}));
        assert!(!is_expired(&row, 99.0, None));
        assert!(!is_expired(&row, 100.0, None));
        assert!(is_expired(&row, 100.5, None));
    }

    #[test]
    fn test_age_expiry() {
        let row = item(json!({"_created_at": 1000.0}));
        assert!(!is_expired(&row, 4600.0, Some(3600.0)));
        assert!(is_expired(&row, 4600.1, Some(3600.0)));
        assert!(!is_expired(&row, 1_000_000.0, None));
    }

    #[test]
    fn test_non_numeric_ttl_is_ignored() {
        let row = item(json!({"ttl": "soon", "_created_at": 10.0}));
        assert!(!is_expired(&row, 20.0, Some(3600.0)));
    }
}
