//! Session authentication middleware
//!
//! The session id travels in the `session_id` cookie or as
//! `Authorization: Bearer <id>`. A live session puts a [`CurrentUser`] into
//! the request extensions. API routes answer 401 without one; page routes
//! redirect to `/login`.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::error::ApiError;
use crate::server::AppState;

pub const SESSION_COOKIE: &str = "session_id";

/// The signed-in user, injected by [`require_session`]
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub email: String,
    pub session_id: String,
}

/// Session id from the cookie, falling back to a bearer token
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    })
}

/// `Set-Cookie` value for a new session
pub fn session_cookie(session_id: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, session_id, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes the session cookie
pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", 0, secure)
}

async fn resolve_user(state: &AppState, headers: &HeaderMap) -> Result<Option<CurrentUser>, ApiError> {
    let Some(token) = session_token(headers) else {
        return Ok(None);
    };

    Ok(state.sessions.get(&token).await?.map(|session| CurrentUser {
        email: session.user_email,
        session_id: session.session_id,
    }))
}

/// Reject API requests without a live session
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(user) = resolve_user(&state, request.headers()).await? else {
        tracing::debug!(path = %request.uri().path(), "Request without a live session");
        return Err(ApiError::Unauthorized(
            "Sign in to continue; your session is missing or has expired".to_string(),
        ));
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Send page requests without a live session to the login page
pub async fn require_page_session(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match resolve_user(&state, request.headers()).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Ok(None) => Redirect::to("/login").into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_token_from_cookie() {
        let map = headers(&[(header::COOKIE, "theme=dark; session_id=abc-123; lang=en")]);
        assert_eq!(session_token(&map).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_token_from_bearer() {
        let map = headers(&[(header::AUTHORIZATION, "Bearer xyz")]);
        assert_eq!(session_token(&map).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_cookie_wins_over_bearer() {
        let map = headers(&[
            (header::COOKIE, "session_id=from-cookie"),
            (header::AUTHORIZATION, "Bearer from-header"),
        ]);
        assert_eq!(session_token(&map).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_empty_token_ignored() {
        let map = headers(&[(header::COOKIE, "session_id=")]);
        assert_eq!(session_token(&map), None);
        assert_eq!(session_token(&HeaderMap::new()), None);
        assert_eq!(session_token(&headers(&[(header::AUTHORIZATION, "Bearer  ")])), None);
    }

    #[test]
    fn test_cleared_cookie_falls_back_to_bearer() {
        let map = headers(&[
            (header::COOKIE, "session_id=; theme=dark"),
            (header::AUTHORIZATION, "Bearer from-header"),
        ]);
        assert_eq!(session_token(&map).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_cookie_attributes() {
        assert_eq!(
            session_cookie("abc", 3600, true),
            "session_id=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=3600; Secure"
        );
        assert!(clear_session_cookie(false).contains("Max-Age=0"));
    }
}
