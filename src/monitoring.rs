//! CloudWatch stand-in
//!
//! Metric data points land in a prometheus registry (one counter family,
//! labelled by metric name and dimension) and are served from `/metrics`.
//! Log events are kept in a bounded in-memory buffer and mirrored to tracing.

use chrono::{DateTime, Utc};
use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Log events retained in memory
pub const MAX_LOG_EVENTS: usize = 1000;

pub const METRIC_ASSESSMENT_COMPLETED: &str = "AssessmentCompleted";
pub const METRIC_AI_FALLBACK: &str = "AiFallback";
pub const METRIC_LOGIN: &str = "Login";
pub const METRIC_PURCHASE: &str = "PurchaseCompleted";

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub log_group: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub struct CloudWatch {
    registry: Registry,
    metrics: CounterVec,
    log_events: Mutex<VecDeque<LogEvent>>,
}

impl CloudWatch {
    pub fn new(namespace: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let metrics = CounterVec::new(
            Opts::new("metric_total", "Metric data points by name and dimension")
                .namespace(sanitize_namespace(namespace)),
            &["metric", "dimension"],
        )?;
        registry.register(Box::new(metrics.clone()))?;

        Ok(Self {
            registry,
            metrics,
            log_events: Mutex::new(VecDeque::with_capacity(MAX_LOG_EVENTS)),
        })
    }

    /// PutMetricData for a single data point
    pub fn put_metric(&self, name: &str, dimension: &str, value: f64) {
        if value < 0.0 || !value.is_finite() {
            tracing::warn!(metric = name, value, "Dropped invalid metric value");
            return;
        }
        self.metrics.with_label_values(&[name, dimension]).inc_by(value);
    }

    /// Running total for a metric/dimension pair
    pub fn metric_value(&self, name: &str, dimension: &str) -> f64 {
        self.metrics.with_label_values(&[name, dimension]).get()
    }

    /// PutLogEvents for a single message
    pub fn put_log_event(&self, log_group: &str, message: impl Into<String>) {
        let event = LogEvent {
            log_group: log_group.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        };

        tracing::info!(log_group = %event.log_group, message = %event.message, "CloudWatch log event");

        let mut events = self.log_events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == MAX_LOG_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Most recent events for a group, oldest first
    pub fn recent_log_events(&self, log_group: &str, limit: usize) -> Vec<LogEvent> {
        let events = self.log_events.lock().unwrap_or_else(PoisonError::into_inner);
        let matching: Vec<&LogEvent> = events.iter().filter(|e| e.log_group == log_group).collect();
        matching[matching.len().saturating_sub(limit)..]
            .iter()
            .map(|e| (*e).clone())
            .collect()
    }

    /// Prometheus text exposition of all metrics
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn sanitize_namespace(namespace: &str) -> String {
    let cleaned: String = namespace
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{cleaned}")
    } else {
        cleaned
    }
}
