use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

/// Endpoint groups with independent limits. Booking creation is the
/// strictest tier since each request may write several rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Public,
    Booking,
    Admin,
}

#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Tier {
    fn config(self) -> TierConfig {
        match self {
            Tier::Public => TierConfig {
                max_requests: 60,
                window: Duration::from_secs(60),
            },
            Tier::Booking => TierConfig {
                max_requests: 5,
                window: Duration::from_secs(300),
            },
            Tier::Admin => TierConfig {
                max_requests: 120,
                window: Duration::from_secs(60),
            },
        }
    }
}

/// In-memory per-IP sliding-window limiter, one timestamp map per tier.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    hits: Arc<DashMap<(Tier, IpAddr), Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Ok(())` if allowed, `Err(retry_after_secs)` if limited.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        let config = tier.config();
        let now = Instant::now();
        let window_start = now - config.window;

        let mut timestamps = self.hits.entry((tier, ip)).or_default();
        timestamps.retain(|t| *t > window_start);

        if timestamps.len() >= config.max_requests as usize {
            // Time until the oldest request leaves the window
            let oldest = timestamps[0];
            let retry_after = (oldest + config.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        timestamps.push(now);
        Ok(())
    }

    /// Drop entries idle for over twice their window. Run periodically from
    /// a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.hits.retain(|(tier, _), timestamps| {
            let cutoff = tier.config().window * 2;
            timestamps.retain(|t| now.duration_since(*t) < cutoff);
            !timestamps.is_empty()
        });
    }
}

/// Client IP from X-Forwarded-For (reverse proxy) or the socket address.
fn client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]))
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Too many requests. Try again in {} seconds",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

async fn enforce(
    limiter: RateLimiter,
    tier: Tier,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = client_ip(&req);
    limiter.check(tier, ip).map_err(too_many_requests)?;
    Ok(next.run(req).await)
}

// ── Middleware functions (one per tier) ──

pub async fn rate_limit_public(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Public, req, next).await
}

pub async fn rate_limit_booking(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Booking, req, next).await
}

pub async fn rate_limit_admin(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Admin, req, next).await
}

// ── Tests ──
