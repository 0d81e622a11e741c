//! Writing and speaking scoring endpoints
//!
//! Both endpoints need a remaining attempt of the requested type. The
//! attempt is consumed once a result exists, fallback results included;
//! requests rejected before scoring keep their attempt.

use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::monitoring::METRIC_ASSESSMENT_COMPLETED;
use crate::server::AppState;
use crate::services::assessment::{MIN_SPEAKING_TURNS, Skill};
use crate::services::{AssessmentError, AssessmentResult, AssessmentType, ResultSource};

#[derive(Debug, Deserialize, Validate)]
pub struct WritingRequest {
    pub assessment_type: String,

    #[serde(default)]
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub task_prompt: Option<String>,

    #[validate(length(max = 20000, message = "must be at most 20000 characters"))]
    pub essay: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SpeakingRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct AssessmentResponse {
    pub result: AssessmentResult,
    pub attempts_remaining: u32,
}

/// Parse an assessment type and check it is of the expected skill
pub(crate) fn parse_type(raw: &str, skill: Skill) -> Result<AssessmentType, ApiError> {
    let assessment_type: AssessmentType = raw.parse()?;
    if assessment_type.skill() != skill {
        let expected = match skill {
            Skill::Writing => "writing",
            Skill::Speaking => "speaking",
        };
        return Err(AssessmentError::WrongSkill(assessment_type, expected).into());
    }
    Ok(assessment_type)
}

pub(crate) async fn ensure_attempt(
    state: &AppState,
    email: &str,
    assessment_type: AssessmentType,
) -> Result<(), ApiError> {
    if state.accounts.has_attempt(email, assessment_type).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "No {} attempts remaining; purchase a package to continue",
            assessment_type
        )))
    }
}

/// Charge the attempt and store the result
async fn finish(state: &AppState, email: &str, result: AssessmentResult) -> Result<AssessmentResponse, ApiError> {
    let attempts_remaining = state
        .accounts
        .consume_attempt(email, result.assessment_type)
        .await?;
    state.accounts.record_result(email, &result).await?;

    if result.source == ResultSource::Model {
        state
            .metrics
            .put_metric(METRIC_ASSESSMENT_COMPLETED, result.assessment_type.as_str(), 1.0);
    }
    tracing::info!(
        assessment_type = %result.assessment_type,
        source = ?result.source,
        overall_band = ?result.overall_band,
        attempts_remaining,
        "Assessment recorded"
    );

    Ok(AssessmentResponse {
        result,
        attempts_remaining,
    })
}

/// Score a Task 2 essay with Nova Micro
pub async fn writing(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<WritingRequest>,
) -> Result<Json<AssessmentResponse>, ApiError> {
    body.validate()?;
    let assessment_type = parse_type(&body.assessment_type, Skill::Writing)?;
    ensure_attempt(&state, &user.email, assessment_type).await?;

    let task_prompt = body
        .task_prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| assessment_type.sample_prompt());

    let result = state
        .nova
        .assess_writing(assessment_type, task_prompt, &body.essay)
        .await?;

    Ok(Json(finish(&state, &user.email, result).await?))
}

/// Score a Maya conversation
pub async fn speaking(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<SpeakingRequest>,
) -> Result<Json<AssessmentResponse>, ApiError> {
    body.validate()?;
    let conversation = state.maya.transcript(&body.conversation_id, &user.email)?;

    let answered = conversation.candidate_turns();
    if answered < MIN_SPEAKING_TURNS {
        return Err(AssessmentError::ConversationTooShort {
            turns: answered,
            minimum: MIN_SPEAKING_TURNS,
        }
        .into());
    }

    ensure_attempt(&state, &user.email, conversation.assessment_type).await?;

    // Only one request can score a conversation; a concurrent one sees 404.
    let conversation = state.maya.claim(&conversation.id, &user.email)?;
    let scored = match state
        .nova
        .assess_speaking(conversation.assessment_type, &conversation.turns)
        .await
    {
        Ok(result) => finish(&state, &user.email, result).await,
        Err(e) => Err(e.into()),
    };

    match scored {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            if let Err(restore_err) = state.maya.restore(&conversation) {
                tracing::warn!(conversation_id = %conversation.id, error = %restore_err, "Failed to restore conversation");
            }
            Err(e)
        }
    }
}
