use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::Extension,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use shared_models::error::AppError;

// Expired windows are swept opportunistically; the cap bounds memory if a
// flood of distinct callers arrives between sweeps.
const MAX_TRACKED_CALLERS: usize = 10_000;

struct CallerWindow {
    window_start: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by caller identity.
///
/// Held in application state and injected where needed; entries carry an
/// explicit TTL (the window length) and are evicted on access.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    store: Mutex<HashMap<String, CallerWindow>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `caller` and report whether it is allowed.
    pub fn check(&self, caller: &str) -> bool {
        let now = Instant::now();
        let mut store = self.store.lock().unwrap();

        if store.len() >= MAX_TRACKED_CALLERS {
            store.retain(|_, w| now.duration_since(w.window_start) < self.window);
            if store.len() >= MAX_TRACKED_CALLERS {
                warn!("Rate limiter store saturated, rejecting request");
                return false;
            }
        }

        let entry = store.entry(caller.to_string()).or_insert(CallerWindow {
            window_start: now,
            count: 0,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }

        entry.count += 1;

        if entry.count > self.max_requests {
            debug!("Rate limit exceeded for caller");
            false
        } else {
            true
        }
    }

    pub fn tracked_callers(&self) -> usize {
        self.store.lock().unwrap().len()
    }
}

/// Throttle by bearer credential (or "anonymous" for unauthenticated
/// probes) before any store round trip happens.
pub async fn rate_limit_middleware(
    Extension(limiter): Extension<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let caller = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    if !limiter.check(&caller) {
        return Err(AppError::RateLimited("Too many requests".to_string()));
    }

    Ok(next.run(request).await)
}
