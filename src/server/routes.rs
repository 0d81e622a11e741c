//! Application routing
//!
//! This module defines all HTTP routes for the application.

use axum::{
    http::{header, HeaderName},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{account, assessments, auth, health, maya, pages, purchase};
use crate::middleware::{
    log_request, rate_limit, require_page_session, require_session, REQUEST_ID_HEADER,
    TRACE_ID_HEADER,
};
use crate::server::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .route("/liveness", get(health::liveness))
        .route("/metrics", get(health::metrics))
        .route("/", get(pages::landing))
        .route("/login", get(pages::login_page))
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login));

    let account_routes = Router::new()
        .route("/api/logout", post(auth::logout))
        .route("/api/me", get(account::me))
        .route("/api/purchase/checkout", post(purchase::checkout))
        .route("/purchase/verify", get(purchase::verify))
        .route("/gdpr/my-data", get(account::my_data))
        .route("/gdpr/delete-account", post(account::delete_account))
        .layer(middleware::from_fn_with_state(state.clone(), require_session));

    // Layer order: last added = outermost = runs first, so the session
    // check runs before the per-user rate limit
    let ai_routes = Router::new()
        .route("/api/nova-micro/writing", post(assessments::writing))
        .route("/api/maya/conversation", post(maya::conversation))
        .route("/api/maya/assessment", post(assessments::speaking))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn_with_state(state.clone(), require_session));

    let page_routes = Router::new()
        .route("/dashboard", get(pages::dashboard))
        .route("/assessment/:assessment_type", get(pages::assessment_page))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_page_session,
        ));

    Router::new()
        .merge(public_routes)
        .merge(account_routes)
        .merge(ai_routes)
        .merge(page_routes)
        .layer(create_cors_layer())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(TRACE_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static("x-ratelimit-limit"),
            header::RETRY_AFTER,
        ])
}
