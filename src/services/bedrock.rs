//! Bedrock service for Nova model inference
//!
//! Thin wrapper over the Bedrock Runtime Converse API. Only text turns are
//! exchanged; Maya's speaking turns arrive here already transcribed.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::{
    operation::converse::{ConverseError, ConverseOutput},
    types::{
        ContentBlock, ConversationRole, InferenceConfiguration, Message as BedrockMessage,
        SystemContentBlock,
    },
    Client as BedrockRuntimeClient,
};
use aws_smithy_runtime_api::client::result::SdkError;

use crate::services::nova::{ChatTurn, ModelClient, Speaker};

/// Opening user message when the examiner speaks first; Converse requires
/// conversations to start on the user side.
const CONVERSATION_OPENER: &str = "Hello, I'm ready to begin the speaking test.";

/// Service for interacting with AWS Bedrock
#[derive(Clone)]
pub struct BedrockService {
    client: BedrockRuntimeClient,
    max_tokens: i32,
}

impl BedrockService {
    pub fn new(client: BedrockRuntimeClient, max_tokens: i32) -> Self {
        Self { client, max_tokens }
    }

    /// Call the Converse API
    pub async fn converse(&self, request: ConverseRequest) -> Result<ConverseOutput, BedrockError> {
        tracing::debug!(
            model_id = %request.model_id,
            message_count = request.messages.len(),
            "Calling Bedrock Converse API"
        );

        let mut converse_request = self
            .client
            .converse()
            .model_id(&request.model_id)
            .set_messages(Some(request.messages));

        if let Some(system) = request.system {
            converse_request = converse_request.set_system(Some(system));
        }

        if let Some(inference_config) = request.inference_config {
            converse_request = converse_request.inference_config(inference_config);
        }

        let result = converse_request
            .send()
            .await
            .map_err(BedrockError::from_converse_error)?;

        tracing::debug!(stop_reason = ?result.stop_reason(), "Bedrock Converse API call completed");

        Ok(result)
    }
}

#[async_trait]
impl ModelClient for BedrockService {
    async fn complete(
        &self,
        model_id: &str,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<String, BedrockError> {
        let request = ConverseRequest::new(model_id)
            .with_messages(to_bedrock_messages(turns)?)
            .with_system(vec![SystemContentBlock::Text(system.to_string())])
            .with_inference_config(
                InferenceConfiguration::builder()
                    .max_tokens(self.max_tokens)
                    .temperature(0.3_f32)
                    .build(),
            );

        let output = self.converse(request).await?;

        let text = output
            .output()
            .and_then(|o| o.as_message().ok())
            .map(|message| {
                message
                    .content()
                    .iter()
                    .filter_map(|block| block.as_text().ok())
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(BedrockError::Deserialization("Model returned no text".to_string()));
        }

        Ok(text)
    }
}

/// Map turns onto Converse messages: examiner turns are the assistant,
/// candidate turns the user. Consecutive turns from the same side are merged.
fn to_bedrock_messages(turns: &[ChatTurn]) -> Result<Vec<BedrockMessage>, BedrockError> {
    let mut grouped: Vec<(ConversationRole, String)> = Vec::new();

    if turns.first().map(|t| t.speaker) == Some(Speaker::Examiner) {
        grouped.push((ConversationRole::User, CONVERSATION_OPENER.to_string()));
    }

    for turn in turns {
        let role = match turn.speaker {
            Speaker::Examiner => ConversationRole::Assistant,
            Speaker::Candidate => ConversationRole::User,
        };
        match grouped.last_mut() {
            Some((last_role, text)) if *last_role == role => {
                text.push('\n');
                text.push_str(&turn.text);
            }
            _ => grouped.push((role, turn.text.clone())),
        }
    }

    grouped
        .into_iter()
        .map(|(role, text)| {
            BedrockMessage::builder()
                .role(role)
                .content(ContentBlock::Text(text))
                .build()
                .map_err(|e| BedrockError::Serialization(e.to_string()))
        })
        .collect()
}

/// Request for Bedrock Converse API
#[derive(Debug, Clone)]
pub struct ConverseRequest {
    pub model_id: String,
    pub messages: Vec<BedrockMessage>,
    pub system: Option<Vec<SystemContentBlock>>,
    pub inference_config: Option<InferenceConfiguration>,
}

impl ConverseRequest {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            messages: Vec::new(),
            system: None,
            inference_config: None,
        }
    }

    pub fn with_messages(mut self, messages: Vec<BedrockMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_system(mut self, system: Vec<SystemContentBlock>) -> Self {
        self.system = Some(system);
        self
    }

    pub fn with_inference_config(mut self, config: InferenceConfiguration) -> Self {
        self.inference_config = Some(config);
        self
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during Bedrock API calls
#[derive(Debug, thiserror::Error)]
pub enum BedrockError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl BedrockError {
    /// Create BedrockError from Converse API error
    pub fn from_converse_error<R>(err: SdkError<ConverseError, R>) -> Self
    where
        R: std::fmt::Debug,
    {
        match &err {
            SdkError::ServiceError(service_err) => match service_err.err() {
                ConverseError::ThrottlingException(e) => {
                    BedrockError::Throttled(e.message().unwrap_or("Rate limited").to_string())
                }
                ConverseError::ValidationException(e) => BedrockError::ValidationError(
                    e.message().unwrap_or("Validation failed").to_string(),
                ),
                ConverseError::ModelNotReadyException(e) => BedrockError::ServiceUnavailable(
                    e.message().unwrap_or("Model not ready").to_string(),
                ),
                ConverseError::ModelTimeoutException(e) => BedrockError::ServiceUnavailable(
                    e.message().unwrap_or("Model timeout").to_string(),
                ),
                ConverseError::InternalServerException(e) => BedrockError::InternalError(
                    e.message().unwrap_or("Internal server error").to_string(),
                ),
                ConverseError::AccessDeniedException(e) => {
                    BedrockError::AccessDenied(e.message().unwrap_or("Access denied").to_string())
                }
                ConverseError::ResourceNotFoundException(e) => BedrockError::ModelNotFound(
                    e.message().unwrap_or("Resource not found").to_string(),
                ),
                other => BedrockError::Unknown(format!("{:?}", other)),
            },
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                BedrockError::ServiceUnavailable(format!("{:?}", err))
            }
            _ => BedrockError::Unknown(format!("{:?}", err)),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BedrockError::Throttled(_)
                | BedrockError::ServiceUnavailable(_)
                | BedrockError::InternalError(_)
        )
    }
}
