//! Stripe checkout
//!
//! Purchases go through hosted Stripe Checkout. There is no webhook: once
//! Stripe redirects back to `/purchase/verify`, the session is retrieved and
//! its `payment_status` decides whether attempts are credited.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::StripeConfig;
use crate::services::assessment::AssessmentType;
use crate::utils::{retry_with_backoff, RetryConfig};

/// Attempts granted by one purchase
pub const ATTEMPTS_PER_PURCHASE: u32 = 4;

/// Price of one purchase, in cents
pub const PRICE_CENTS: u32 = 3649;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub assessment_type: AssessmentType,
    pub name: String,
    pub attempts: u32,
    pub amount_cents: u32,
}

/// The product sold for an assessment type
pub fn product_for(assessment_type: AssessmentType) -> Product {
    Product {
        assessment_type,
        name: format!("IELTS {} Assessment", assessment_type.title()),
        attempts: ATTEMPTS_PER_PURCHASE,
        amount_cents: PRICE_CENTS,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

/// What a retrieved checkout session says about the purchase
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutStatus {
    pub session_id: String,
    pub paid: bool,
    pub user_email: Option<String>,
    pub assessment_type: Option<AssessmentType>,
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Payments are not configured")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Stripe error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse Stripe response: {0}")]
    ParseError(String),

    #[error("Invalid checkout session id")]
    InvalidSessionId,
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::HttpError(e) => e.is_timeout() || e.is_connect(),
            PaymentError::ApiError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Whether `id` has the shape of a Checkout Session id (`cs_` + word characters)
pub fn is_checkout_session_id(id: &str) -> bool {
    id.strip_prefix("cs_").is_some_and(|rest| {
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// Hosted checkout provider
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(&self, user_email: &str, product: &Product) -> Result<CheckoutSession, PaymentError>;

    async fn retrieve_checkout(&self, session_id: &str) -> Result<CheckoutStatus, PaymentError>;
}

/// Stripe error envelope
#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// The parts of a Checkout Session object we read
#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl StripeCheckoutSession {
    fn into_status(self) -> CheckoutStatus {
        let user_email = self
            .metadata
            .get("user_email")
            .cloned()
            .or(self.customer_email);
        let assessment_type = self
            .metadata
            .get("assessment_type")
            .and_then(|t| t.parse().ok());

        CheckoutStatus {
            session_id: self.id,
            paid: self.payment_status.as_deref() == Some("paid"),
            user_email,
            assessment_type,
        }
    }
}

pub struct StripeGateway {
    client: Client,
    secret_key: Option<String>,
    api_base: String,
    currency: String,
    public_base_url: String,
    retry: RetryConfig,
}

impl StripeGateway {
    pub fn new(config: &StripeConfig, public_base_url: &str, timeout_seconds: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .unwrap_or_default();

        Self {
            client,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            currency: config.currency.clone(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::stripe(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn secret_key(&self) -> Result<&str, PaymentError> {
        self.secret_key.as_deref().ok_or(PaymentError::NotConfigured)
    }

    fn checkout_form(&self, user_email: &str, product: &Product) -> Vec<(String, String)> {
        let fields = [
            ("mode", "payment".to_string()),
            (
                "success_url",
                format!(
                    "{}/purchase/verify?session_id={{CHECKOUT_SESSION_ID}}",
                    self.public_base_url
                ),
            ),
            ("cancel_url", format!("{}/dashboard", self.public_base_url)),
            ("customer_email", user_email.to_string()),
            ("client_reference_id", user_email.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", self.currency.clone()),
            (
                "line_items[0][price_data][unit_amount]",
                product.amount_cents.to_string(),
            ),
            ("line_items[0][price_data][product_data][name]", product.name.clone()),
            ("metadata[user_email]", user_email.to_string()),
            (
                "metadata[assessment_type]",
                product.assessment_type.as_str().to_string(),
            ),
            ("metadata[attempts]", product.attempts.to_string()),
        ];

        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// `{api_base}/v1/checkout/sessions/{id}` with the id as one encoded segment
    fn session_url(&self, session_id: &str) -> Result<reqwest::Url, PaymentError> {
        let mut url = reqwest::Url::parse(&format!("{}/v1/checkout/sessions", self.api_base))
            .map_err(|e| PaymentError::ParseError(format!("invalid Stripe API base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| PaymentError::ParseError("Stripe API base cannot hold a path".to_string()))?
            .push(session_id);
        Ok(url)
    }

    async fn read_session(response: reqwest::Response) -> Result<StripeCheckoutSession, PaymentError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(body);
            return Err(PaymentError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Stripe checkout session");
            PaymentError::ParseError(e.to_string())
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout(&self, user_email: &str, product: &Product) -> Result<CheckoutSession, PaymentError> {
        let secret_key = self.secret_key()?;
        let url = format!("{}/v1/checkout/sessions", self.api_base);
        let form = self.checkout_form(user_email, product);
        let idempotency_key = uuid::Uuid::new_v4().to_string();

        tracing::debug!(assessment_type = %product.assessment_type, "Creating Stripe checkout session");

        let outcome = retry_with_backoff(&self.retry, PaymentError::is_retryable, || async {
            let response = self
                .client
                .post(&url)
                .bearer_auth(secret_key)
                .header("Idempotency-Key", &idempotency_key)
                .form(&form)
                .send()
                .await?;
            Self::read_session(response).await
        })
        .await;

        let session = outcome.result?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::ParseError("checkout session has no url".to_string()))?;

        tracing::info!(session_id = %session.id, attempts = outcome.attempts, "Stripe checkout session created");

        Ok(CheckoutSession {
            session_id: session.id,
            url,
        })
    }

    async fn retrieve_checkout(&self, session_id: &str) -> Result<CheckoutStatus, PaymentError> {
        let secret_key = self.secret_key()?;
        if !is_checkout_session_id(session_id) {
            return Err(PaymentError::InvalidSessionId);
        }
        let url = self.session_url(session_id)?;

        let outcome = retry_with_backoff(&self.retry, PaymentError::is_retryable, || async {
            let response = self.client.get(url.clone()).bearer_auth(secret_key).send().await?;
            Self::read_session(response).await
        })
        .await;

        Ok(outcome.result?.into_status())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(secret_key: Option<&str>) -> StripeGateway {
        let config = StripeConfig {
            secret_key: secret_key.map(str::to_string),
            ..StripeConfig::default()
        };
        StripeGateway::new(&config, "https://prep.example.com/", 5)
    }

    #[test]
    fn test_product_for_type() {
        let product = product_for(AssessmentType::GeneralSpeaking);
        assert_eq!(product.attempts, 4);
        assert_eq!(product.amount_cents, 3649);
        assert_eq!(product.name, "IELTS General Training Speaking Assessment");
    }

    #[test]
    fn test_checkout_form_fields() {
        let form: HashMap<String, String> = gateway(Some("sk_test"))
            .checkout_form("a@example.com", &product_for(AssessmentType::AcademicWriting))
            .into_iter()
            .collect();

        assert_eq!(form["mode"], "payment");
        assert_eq!(
            form["success_url"],
            "https://prep.example.com/purchase/verify?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(form["cancel_url"], "https://prep.example.com/dashboard");
        assert_eq!(form["line_items[0][price_data][unit_amount]"], "3649");
        assert_eq!(form["line_items[0][price_data][currency]"], "usd");
        assert_eq!(form["metadata[assessment_type]"], "academic-writing");
        assert_eq!(form["metadata[user_email]"], "a@example.com");
    }

    #[test]
    fn test_session_status_parsing() {
        let session: StripeCheckoutSession = serde_json::from_str(
            r#"{
                "id": "cs_test_123",
                "object": "checkout.session",
                "payment_status": "paid",
                "customer_email": "other@example.com",
                "metadata": {"user_email": "a@example.com", "assessment_type": "general-writing"}
            }"#,
        )
        .unwrap();

        let status = session.into_status();
        assert!(status.paid);
        assert_eq!(status.user_email.as_deref(), Some("a@example.com"));
        assert_eq!(status.assessment_type, Some(AssessmentType::GeneralWriting));
    }

    #[test]
    fn test_unpaid_session_status() {
        let session: StripeCheckoutSession =
            serde_json::from_str(r#"{"id": "cs_1", "payment_status": "unpaid", "metadata": {}}"#).unwrap();
        let status = session.into_status();
        assert!(!status.paid);
        assert!(status.assessment_type.is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let result = gateway(None)
            .create_checkout("a@example.com", &product_for(AssessmentType::AcademicWriting))
            .await;
        assert!(matches!(result, Err(PaymentError::NotConfigured)));
    }

    #[test]
    fn test_checkout_session_id_shape() {
        assert!(is_checkout_session_id("cs_test_a1B2c3"));
        assert!(is_checkout_session_id("cs_live_123"));
        assert!(!is_checkout_session_id("cs_"));
        assert!(!is_checkout_session_id("cus_123"));
        assert!(!is_checkout_session_id("../../v1/customers/cus_123"));
        assert!(!is_checkout_session_id("cs_1/../../customers"));
        assert!(!is_checkout_session_id("cs_1?expand=customer"));
        assert!(!is_checkout_session_id("cs_1#x"));
    }

    #[test]
    fn test_session_url_keeps_id_in_one_segment() {
        let gateway = gateway(Some("sk_test"));
        assert_eq!(
            gateway.session_url("cs_test_1").unwrap().as_str(),
            "https://api.stripe.com/v1/checkout/sessions/cs_test_1"
        );

        let url = gateway.session_url("../../v1/customers/cus_123").unwrap();
        assert!(url.path().starts_with("/v1/checkout/sessions/"));
        assert_eq!(url.path_segments().unwrap().count(), 4);
    }

    #[tokio::test]
    async fn test_malformed_session_id_is_rejected_before_sending() {
        let result = gateway(Some("sk_test")).retrieve_checkout("../customers/cus_1").await;
        assert!(matches!(result, Err(PaymentError::InvalidSessionId)));
    }

    #[test]
    fn test_retryable_statuses() {
        let api = |status| PaymentError::ApiError {
            status,
            message: String::new(),
        };
        assert!(api(429).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!PaymentError::NotConfigured.is_retryable());
    }
}
