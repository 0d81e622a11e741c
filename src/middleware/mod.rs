//! Middleware module
//!
//! HTTP middleware for session authentication, rate limiting and request logging.

pub mod auth;
pub mod logging;
pub mod rate_limit;

pub use auth::{
    clear_session_cookie, require_page_session, require_session, session_cookie, session_token,
    CurrentUser, SESSION_COOKIE,
};
pub use logging::{log_request, TraceId, REQUEST_ID_HEADER, TRACE_ID_HEADER};
pub use rate_limit::{rate_limit, RateLimitState};
