//! Maya conversation endpoint
//!
//! Without a `conversation_id` the call opens a conversation and returns
//! Maya's greeting; with one it records the candidate's `message` and
//! returns Maya's next line.

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use validator::Validate;

use crate::api::assessments::{ensure_attempt, parse_type};
use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::server::AppState;
use crate::services::{MayaTurn, Skill};

#[derive(Debug, Deserialize, Validate)]
pub struct ConversationRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub assessment_type: Option<String>,

    #[serde(default)]
    #[validate(length(max = 4000, message = "must be at most 4000 characters"))]
    pub message: Option<String>,
}

pub async fn conversation(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<ConversationRequest>,
) -> Result<Json<MayaTurn>, ApiError> {
    body.validate()?;

    let Some(conversation_id) = body.conversation_id.filter(|id| !id.is_empty()) else {
        let raw_type = body.assessment_type.ok_or_else(|| {
            ApiError::InvalidRequest("assessment_type is required to start a conversation".to_string())
        })?;
        let assessment_type = parse_type(&raw_type, Skill::Speaking)?;
        ensure_attempt(&state, &user.email, assessment_type).await?;

        return Ok(Json(state.maya.start(&user.email, assessment_type)?));
    };

    let message = body
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("message is required".to_string()))?;

    let turn = state
        .maya
        .respond(&conversation_id, &user.email, &message)
        .await?;
    Ok(Json(turn))
}
