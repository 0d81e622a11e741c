//! Signed-in user's profile and GDPR endpoints

use axum::{extract::State, http::header, response::IntoResponse, Extension, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::{clear_session_cookie, CurrentUser};
use crate::server::AppState;
use crate::services::{AssessmentResult, UserProfile};

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserProfile,
    pub results: Vec<AssessmentResult>,
    pub session_expires_in: u64,
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<MeResponse>, ApiError> {
    let profile = state.accounts.profile(&user.email).await?;
    let results = state.accounts.results(&user.email).await?;

    let session_expires_in = state
        .sessions
        .get(&user.session_id)
        .await?
        .map(|s| state.sessions.remaining_seconds(&s))
        .unwrap_or(0);

    Ok(Json(MeResponse {
        user: profile,
        results,
        session_expires_in,
    }))
}

/// Everything stored about the caller (GDPR access request)
pub async fn my_data(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let export: Value = state.accounts.export_data(&user.email).await?;
    state.metrics.put_log_event(
        "gdpr",
        format!("data export for {}", crate::utils::mask_email(&user.email)),
    );

    Ok((
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"my-data.json\"",
        )],
        Json(export),
    ))
}

/// Erase the caller's account, results and sessions (GDPR erasure request)
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.accounts.delete_account(&user.email).await?;
    let sessions = state.sessions.destroy_all_for(&user.email).await?;

    state.metrics.put_log_event(
        "gdpr",
        format!(
            "account deleted for {} ({} sessions closed)",
            crate::utils::mask_email(&user.email),
            sessions
        ),
    );

    Ok((
        [(header::SET_COOKIE, clear_session_cookie(state.settings.cookie_secure))],
        Json(json!({ "success": true, "deleted": user.email })),
    ))
}
