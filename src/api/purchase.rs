//! Checkout and webhook-less purchase verification

use axum::{
    extract::{Query, State},
    response::Redirect,
    Extension, Json,
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::monitoring::METRIC_PURCHASE;
use crate::server::AppState;
use crate::services::{is_checkout_session_id, product_for, AssessmentType, CheckoutSession};

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub assessment_type: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub session_id: Option<String>,
}

pub async fn checkout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutSession>, ApiError> {
    if !state.settings.payments_enabled() {
        return Err(ApiError::ServiceUnavailable(
            "Payments are not available right now".to_string(),
        ));
    }

    let assessment_type: AssessmentType = body.assessment_type.parse()?;
    let product = product_for(assessment_type);
    let session = state.payments.create_checkout(&user.email, &product).await?;

    Ok(Json(session))
}

/// Landing point of Stripe's success redirect
pub async fn verify(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<VerifyQuery>,
) -> Result<Redirect, ApiError> {
    let session_id = query
        .session_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("session_id is required".to_string()))?;
    if !is_checkout_session_id(&session_id) {
        return Err(ApiError::InvalidRequest("session_id is not a checkout session id".to_string()));
    }

    let status = state.payments.retrieve_checkout(&session_id).await?;
    if !status.paid {
        return Err(ApiError::InvalidRequest("Payment has not been completed".to_string()));
    }

    let paid_by = status.user_email.as_deref().map(crate::services::accounts::normalize_email);
    if paid_by.as_deref() != Some(user.email.as_str()) {
        tracing::warn!(session_id = %session_id, "Checkout session belongs to another user");
        return Err(ApiError::Forbidden(
            "This checkout session belongs to another account".to_string(),
        ));
    }

    let assessment_type = status.assessment_type.ok_or_else(|| {
        ApiError::BadGateway(format!("checkout session {} has no assessment_type", session_id))
    })?;
    let product = product_for(assessment_type);

    let credited = state
        .accounts
        .credit_purchase(&user.email, &session_id, assessment_type, product.attempts)
        .await?;

    if credited {
        state
            .metrics
            .put_metric(METRIC_PURCHASE, assessment_type.as_str(), 1.0);
        state.metrics.put_log_event(
            "payments",
            format!("{} credited for {}", session_id, assessment_type),
        );
        Ok(Redirect::to("/dashboard?purchase=success"))
    } else {
        tracing::info!(session_id = %session_id, "Checkout session already credited");
        Ok(Redirect::to("/dashboard?purchase=already_credited"))
    }
}
