//! Registration, login and logout

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ApiError;
use crate::middleware::{clear_session_cookie, session_cookie, CurrentUser};
use crate::monitoring::METRIC_LOGIN;
use crate::server::AppState;
use crate::services::{NewUser, UserProfile};

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,

    #[validate(length(min = 8, max = 128, message = "must be 8 to 128 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "must be 1 to 100 characters"))]
    pub full_name: String,

    #[serde(default)]
    pub gdpr_consent: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,

    #[validate(length(min = 1, message = "is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session_id: String,
    pub expires_at: f64,
    pub user: UserProfile,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    body.validate()?;
    if !body.gdpr_consent {
        return Err(ApiError::InvalidRequest(
            "gdpr_consent must be accepted to create an account".to_string(),
        ));
    }

    let profile = state
        .accounts
        .register(NewUser {
            email: body.email,
            password: body.password,
            full_name: body.full_name,
            gdpr_consent: body.gdpr_consent,
        })
        .await?;

    state
        .metrics
        .put_log_event("auth", format!("registered {}", crate::utils::mask_email(&profile.email)));

    Ok((StatusCode::CREATED, Json(profile)))
}

/// Check the password, open a session and set the session cookie
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()?;

    let outcome = state.accounts.authenticate(&body.email, &body.password).await;
    let email = match outcome {
        Ok(email) => email,
        Err(e) => {
            state.metrics.put_metric(METRIC_LOGIN, "failure", 1.0);
            return Err(e.into());
        }
    };

    let session = state.sessions.create(&email).await?;
    let user = state.accounts.profile(&email).await?;
    state.metrics.put_metric(METRIC_LOGIN, "success", 1.0);

    let cookie = session_cookie(
        &session.session_id,
        state.sessions.ttl_seconds(),
        state.settings.cookie_secure,
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            session_id: session.session_id,
            expires_at: session.expires_at,
            user,
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.destroy(&user.session_id).await?;

    Ok((
        [(header::SET_COOKIE, clear_session_cookie(state.settings.cookie_secure))],
        Json(serde_json::json!({ "success": true })),
    ))
}
