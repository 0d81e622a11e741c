//! DynamoDB-backed table
//!
//! Same contract as the mock table: key derived from the table name and rows
//! stamped on write. Only the `ttl` half of the expiry predicate applies
//! here, filtered on read since DynamoDB's own TTL deletion can lag by hours.
//! The maximum row age is a property of the in-memory store and is never
//! applied to persistent rows.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoDbSdkClient;
use std::collections::HashMap;

use crate::db::attributes::{from_attribute_map, to_attribute, to_attribute_map};
use crate::db::clock::{system_clock, SharedClock};
use crate::db::table::{
    derive_key, is_expired, key_attribute_for, stamp, Item, Table, TableError, CREATED_AT_ATTR,
    TTL_ATTR,
};

/// A single DynamoDB table
#[derive(Clone)]
pub struct DynamoTable {
    client: DynamoDbSdkClient,
    name: String,
    key_attribute: &'static str,
    clock: SharedClock,
}

impl DynamoTable {
    pub fn new(client: DynamoDbSdkClient, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            client,
            key_attribute: key_attribute_for(&name),
            name,
            clock: system_clock(),
        }
    }

    fn key(&self, key: &str) -> (String, AttributeValue) {
        (self.key_attribute.to_string(), AttributeValue::S(key.to_string()))
    }

    fn live(&self, item: &HashMap<String, AttributeValue>) -> Option<Item> {
        live_item(item, self.clock.now())
    }

    /// Stamped item with a numeric key rewritten as its decimal string
    fn prepare(&self, mut item: Item) -> Option<Item> {
        let key = derive_key(self.key_attribute, &item)?;
        stamp(&mut item, &self.name, self.clock.now());
        item.insert(self.key_attribute.to_string(), key.into());
        Some(item)
    }
}

/// Decode a stored item, hiding it once its `ttl` has passed
fn live_item(item: &HashMap<String, AttributeValue>, now: f64) -> Option<Item> {
    let item = from_attribute_map(item);
    (!is_expired(&item, now, None)).then_some(item)
}

#[async_trait]
impl Table for DynamoTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_attribute(&self) -> &'static str {
        self.key_attribute
    }

    async fn put_item(&self, item: Item) -> Result<bool, TableError> {
        let Some(item) = self.prepare(item) else {
            tracing::warn!(table = %self.name, key_attribute = self.key_attribute, "Rejected item without a key");
            return Ok(false);
        };

        self.client
            .put_item()
            .table_name(&self.name)
            .set_item(Some(to_attribute_map(&item)))
            .send()
            .await
            .map_err(|e| TableError::DynamoDb(e.to_string()))?;

        Ok(true)
    }

    async fn insert_item(&self, item: Item) -> Result<bool, TableError> {
        let Some(item) = self.prepare(item) else {
            tracing::warn!(table = %self.name, key_attribute = self.key_attribute, "Rejected item without a key");
            return Ok(false);
        };

        // A row past its ttl may still be stored; it does not hold the key.
        let result = self
            .client
            .put_item()
            .table_name(&self.name)
            .set_item(Some(to_attribute_map(&item)))
            .condition_expression("attribute_not_exists(#pk) OR #ttl < :now")
            .expression_attribute_names("#pk", self.key_attribute)
            .expression_attribute_names("#ttl", TTL_ATTR)
            .expression_attribute_values(":now", AttributeValue::N(self.clock.now().to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(err) => Err(TableError::DynamoDb(err.to_string())),
        }
    }

    async fn get_item(&self, key: &str) -> Result<Option<Item>, TableError> {
        let (attr, value) = self.key(key);
        let result = self
            .client
            .get_item()
            .table_name(&self.name)
            .key(attr, value)
            .send()
            .await
            .map_err(|e| TableError::DynamoDb(e.to_string()))?;

        Ok(result.item.as_ref().and_then(|item| self.live(item)))
    }

    async fn delete_item(&self, key: &str) -> Result<bool, TableError> {
        let (attr, value) = self.key(key);
        let result = self
            .client
            .delete_item()
            .table_name(&self.name)
            .key(attr, value)
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| TableError::DynamoDb(e.to_string()))?;

        Ok(result.attributes.is_some())
    }

    async fn update_item(&self, key: &str, updates: Item) -> Result<bool, TableError> {
        let updates: Vec<(String, serde_json::Value)> = updates
            .into_iter()
            .filter(|(attr, _)| attr != self.key_attribute && attr != CREATED_AT_ATTR)
            .collect();

        if updates.is_empty() {
            return Ok(self.get_item(key).await?.is_some());
        }

        let (attr, value) = self.key(key);
        let mut request = self
            .client
            .update_item()
            .table_name(&self.name)
            .key(attr, value)
            .condition_expression("attribute_exists(#pk)")
            .expression_attribute_names("#pk", self.key_attribute);

        let mut assignments = Vec::with_capacity(updates.len());
        for (i, (name, value)) in updates.iter().enumerate() {
            assignments.push(format!("#a{i} = :v{i}"));
            request = request
                .expression_attribute_names(format!("#a{i}"), name)
                .expression_attribute_values(format!(":v{i}"), to_attribute(value));
        }

        let result = request
            .update_expression(format!("SET {}", assignments.join(", ")))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(err) => Err(TableError::DynamoDb(err.to_string())),
        }
    }

    async fn scan(&self, _filter_expression: Option<&str>) -> Result<Vec<Item>, TableError> {
        let mut rows = Vec::new();
        let mut start_key = None;

        loop {
            let page = self
                .client
                .scan()
                .table_name(&self.name)
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| TableError::DynamoDb(e.to_string()))?;

            rows.extend(
                page.items
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|item| self.live(item)),
            );

            match page.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(rows)
    }

    async fn health_check(&self) -> bool {
        match self.client.describe_table().table_name(&self.name).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(table = %self.name, error = %e, "DynamoDB health check failed");
                false
            }
        }
    }
}
