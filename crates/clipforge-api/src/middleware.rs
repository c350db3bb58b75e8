//! API middleware: request ids, request logging, CORS, rate limiting.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;

/// Per-client rate limiter.
pub type ClientRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Maximum number of clients tracked before old limiters are evicted.
const MAX_RATE_LIMITER_ENTRIES: usize = 10_000;

/// Client-keyed rate limiter cache.
pub struct RateLimiterCache {
    limiters: RwLock<HashMap<String, (Arc<ClientRateLimiter>, Instant)>>,
    quota: Quota,
}

impl RateLimiterCache {
    pub fn new(requests_per_second: u32) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::new(10).unwrap()),
        );
        Self {
            limiters: RwLock::new(HashMap::new()),
            quota,
        }
    }

    /// Get or create a limiter for a client key.
    pub async fn get_limiter(&self, key: &str) -> Arc<ClientRateLimiter> {
        {
            let limiters = self.limiters.read().await;
            if let Some((limiter, _)) = limiters.get(key) {
                return Arc::clone(limiter);
            }
        }

        let mut limiters = self.limiters.write().await;
        if limiters.len() >= MAX_RATE_LIMITER_ENTRIES {
            // Evict the oldest half rather than tracking ages precisely.
            let mut entries: Vec<_> = limiters
                .iter()
                .map(|(k, (_, created))| (k.clone(), *created))
                .collect();
            entries.sort_by_key(|(_, created)| *created);
            for (key, _) in entries.into_iter().take(MAX_RATE_LIMITER_ENTRIES / 2) {
                limiters.remove(&key);
            }
        }

        let limiter = Arc::new(RateLimiter::direct(self.quota));
        limiters.insert(key.to_string(), (Arc::clone(&limiter), Instant::now()));
        limiter
    }
}

/// Identify the client for rate limiting: forwarded address when present,
/// otherwise the verified principal, otherwise a shared bucket.
fn client_key(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            request
                .headers()
                .get(crate::auth::PRINCIPAL_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Rate limit middleware over the API routes.
pub async fn rate_limit_middleware(
    State(cache): State<Arc<RateLimiterCache>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(&request);
    let limiter = cache.get_limiter(&key).await;

    if limiter.check().is_err() {
        return ApiError::RateLimited.into_response();
    }

    next.run(request).await
}

/// Attach a request id to every request and response.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&id) {
        request.headers_mut().insert("x-request-id", value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-request-id", value);
        return response;
    }

    next.run(request).await
}

/// Structured request logging.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request"
    );

    response
}

/// Build the CORS layer from configured origins.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
