//! Per-client-IP rate limiting for the intake API, layered in front of the
//! auth middleware so unauthenticated floods are dropped before they reach it.

use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};

pub const REQUESTS_PER_MINUTE: u32 = 60;
pub const TASK_SUBMISSIONS_PER_MINUTE: u32 = 10;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[derive(Clone)]
pub struct RateLimiters {
    general: Arc<KeyedLimiter>,
    task_submission: Arc<KeyedLimiter>,
}

impl RateLimiters {
    pub fn new() -> Self {
        let general_quota = Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap());
        let task_quota = Quota::per_minute(NonZeroU32::new(TASK_SUBMISSIONS_PER_MINUTE).unwrap());

        Self {
            general: Arc::new(RateLimiter::keyed(general_quota)),
            task_submission: Arc::new(RateLimiter::keyed(task_quota)),
        }
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::extract::State(limiters): axum::extract::State<Arc<RateLimiters>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let client = extract_client_ip(&request).unwrap_or_else(|| addr.ip().to_string());
    let is_task_submission =
        request.uri().path() == "/tasks" && request.method() == axum::http::Method::POST;

    let limiter = if is_task_submission {
        &limiters.task_submission
    } else {
        &limiters.general
    };

    if limiter.check_key(&client).is_err() {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

/// Honors `x-forwarded-for`/`x-real-ip` for requests behind a reverse proxy,
/// taking the leftmost address in a forwarding chain.
pub fn extract_client_ip(request: &Request) -> Option<String> {
    if let Some(header) = request.headers().get("x-forwarded-for") {
        if let Ok(value) = header.to_str() {
            if let Some(first) = value.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }

    request
        .headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}
