//! API error types

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::db::TableError;
use crate::services::{AccountError, AssessmentError, PaymentError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests: {message}")]
    TooManyRequests {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Upstream error: {0}")]
    BadGateway(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn rate_limited(retry_after_secs: Option<u64>) -> Self {
        ApiError::TooManyRequests {
            message: "Rate limit exceeded".to_string(),
            retry_after_secs,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_after = None;

        let (status, error_type, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "authentication_error", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "permission_error", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found_error", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict_error", msg),
            ApiError::TooManyRequests {
                message,
                retry_after_secs,
            } => {
                retry_after = retry_after_secs;
                (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error", message)
            }
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request_error", msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "overloaded_error", msg),
            ApiError::BadGateway(msg) => {
                tracing::error!(error = %msg, "Upstream call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "api_error",
                    "An upstream service failed; please try again".to_string(),
                )
            }
            ApiError::DatabaseError(msg) => {
                tracing::error!(error = %msg, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "api_error",
                    "Internal server error".to_string(),
                )
            }
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "api_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            type_: "error".to_string(),
            error: ErrorDetail {
                type_: error_type.to_string(),
                message,
            },
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<TableError> for ApiError {
    fn from(err: TableError) -> Self {
        ApiError::DatabaseError(err.to_string())
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<AssessmentError> for ApiError {
    fn from(err: AssessmentError) -> Self {
        match err {
            AssessmentError::ConversationNotFound => ApiError::NotFound(err.to_string()),
            AssessmentError::State(_) => ApiError::Internal(err.into()),
            AssessmentError::UnknownType(_)
            | AssessmentError::WrongSkill(..)
            | AssessmentError::EssayTooShort { .. }
            | AssessmentError::ConversationComplete
            | AssessmentError::ConversationTooShort { .. } => ApiError::InvalidRequest(err.to_string()),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::EmailTaken => ApiError::Conflict(err.to_string()),
            AccountError::InvalidCredentials => ApiError::Unauthorized(err.to_string()),
            AccountError::Locked { retry_after_secs } => ApiError::TooManyRequests {
                message: err.to_string(),
                retry_after_secs: Some(retry_after_secs),
            },
            AccountError::UserNotFound => ApiError::NotFound(err.to_string()),
            AccountError::NoAttempts(_) => ApiError::Forbidden(err.to_string()),
            AccountError::Table(e) => e.into(),
            AccountError::Cache(e) => e.into(),
            AccountError::Hashing(_) | AccountError::Corrupt(_) => ApiError::Internal(err.into()),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotConfigured => ApiError::ServiceUnavailable(err.to_string()),
            PaymentError::InvalidSessionId => ApiError::InvalidRequest(err.to_string()),
            other => ApiError::BadGateway(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let reason = errs
                    .iter()
                    .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
                    .next()
                    .unwrap_or_else(|| "is invalid".to_string());
                format!("{} {}", field, reason)
            })
            .collect();
        fields.sort();
        ApiError::InvalidRequest(fields.join("; "))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    #[serde(rename = "type")]
    type_: String,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    type_: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::AssessmentType;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let response = ApiError::InvalidRequest("bad essay".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["message"], "bad essay");
    }

    #[tokio::test]
    async fn test_internal_details_hidden() {
        let response = ApiError::DatabaseError("table ielts-users missing".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Internal server error");
    }

    #[test]
    fn test_lockout_sets_retry_after() {
        let response = ApiError::from(AccountError::Locked { retry_after_secs: 120 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "120");
    }

    #[test]
    fn test_status_mapping() {
        let status = |err: ApiError| err.into_response().status();
        assert_eq!(
            status(AccountError::NoAttempts(AssessmentType::AcademicWriting).into()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status(AccountError::EmailTaken.into()), StatusCode::CONFLICT);
        assert_eq!(status(PaymentError::NotConfigured.into()), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(AssessmentError::ConversationNotFound.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(AssessmentError::EssayTooShort { words: 3, minimum: 50 }.into()),
            StatusCode::BAD_REQUEST
        );
    }
}
