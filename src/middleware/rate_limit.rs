//! Rate limiting middleware
//!
//! Token bucket per signed-in user: each email gets its own limiter that
//! allows a burst of `requests_per_window` and refills over `window_seconds`.
//! Limiters live in a moka cache and are dropped after ten idle minutes.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use moka::future::Cache;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::error::ApiError;
use crate::middleware::auth::CurrentUser;
use crate::server::AppState;

type UserRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitState {
    settings: Arc<Settings>,
    limiters: Cache<String, Arc<UserRateLimiter>>,
}

impl RateLimitState {
    pub fn new(settings: Arc<Settings>) -> Self {
        let limiters = Cache::builder()
            .max_capacity(10_000)
            .time_to_idle(Duration::from_secs(600))
            .build();

        Self { settings, limiters }
    }

    pub async fn limiter_for(&self, email: &str) -> Arc<UserRateLimiter> {
        let config = &self.settings.rate_limit;
        self.limiters
            .get_with(email.to_string(), async {
                Arc::new(RateLimiter::direct(quota(
                    config.requests_per_window,
                    config.window_seconds,
                )))
            })
            .await
    }
}

/// Burst of `requests` refilled evenly over `window_seconds`
fn quota(requests: u32, window_seconds: u64) -> Quota {
    let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_secs(window_seconds.max(1)) / burst.get();
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

/// Throttle AI endpoints per user; must run after `require_session`
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let settings = &state.settings.rate_limit;
    if !settings.enabled {
        return Ok(next.run(request).await);
    }

    let Some(user) = request.extensions().get::<CurrentUser>().cloned() else {
        tracing::warn!("Rate limit middleware ran without a signed-in user");
        return Ok(next.run(request).await);
    };

    let limiter = state.rate_limits.limiter_for(&user.email).await;
    if let Err(not_until) = limiter.check() {
        let retry_after = not_until
            .wait_time_from(DefaultClock::default().now())
            .as_secs()
            .max(1);
        tracing::warn!(
            user = %crate::utils::mask_email(&user.email),
            retry_after_seconds = retry_after,
            "Rate limit exceeded"
        );
        return Err(ApiError::rate_limited(Some(retry_after)));
    }

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        "x-ratelimit-limit",
        HeaderValue::from(settings.requests_per_window),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(requests: u32, window: u64) -> RateLimitState {
        let mut settings = Settings::default();
        settings.rate_limit.requests_per_window = requests;
        settings.rate_limit.window_seconds = window;
        RateLimitState::new(Arc::new(settings))
    }

    #[tokio::test]
    async fn test_limiter_is_cached_per_user() {
        let state = state(5, 60);
        let a1 = state.limiter_for("a@example.com").await;
        let a2 = state.limiter_for("a@example.com").await;
        let b = state.limiter_for("b@example.com").await;

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[tokio::test]
    async fn test_burst_then_limited() {
        let state = state(3, 60);
        let limiter = state.limiter_for("a@example.com").await;

        for i in 0..3 {
            assert!(limiter.check().is_ok(), "request {} should pass", i);
        }
        assert!(limiter.check().is_err());

        let other = state.limiter_for("b@example.com").await;
        assert!(other.check().is_ok());
    }

    #[test]
    fn test_zero_values_still_build_a_quota() {
        let limiter = RateLimiter::direct(quota(0, 0));
        assert!(limiter.check().is_ok());
    }
}
