mod availability;
mod db;
mod engine;
mod handlers;
mod models;
mod rate_limit;
mod render;
mod schedule;
mod store;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use engine::BookingEngine;
use rate_limit::{rate_limit_admin, rate_limit_booking, rate_limit_public, RateLimiter};
use store::Store;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: Store,
    pub engine: BookingEngine,
    pub admin_token: String,
    pub started_at: Instant,
}

/// Completed-appointment sweep interval (seconds).
const COMPLETION_SWEEP_SECS: u64 = 3600;
/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:salonbook.db?mode=rwc".into());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let admin_token = std::env::var("ADMIN_TOKEN").unwrap_or_default();
    let cors_origin = std::env::var("CORS_ORIGIN").unwrap_or_default();

    // ── Tracing ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if admin_token.is_empty() {
        tracing::warn!("ADMIN_TOKEN not set — admin API is disabled");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let store = Store::new(pool);
    let state = Arc::new(AppState {
        engine: BookingEngine::new(store.clone()),
        store,
        admin_token,
        started_at: Instant::now(),
    });

    // ── Background task: mark past-dated active appointments completed ──
    let sweep_store = state.store.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(COMPLETION_SWEEP_SECS));
        loop {
            interval.tick().await;
            let today = chrono::Local::now().format("%Y-%m-%d").to_string();
            match sweep_store.complete_past(&today).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Marked {} past appointments completed", n),
                Err(e) => tracing::error!("completion sweep failed: {}", e),
            }
        }
    });

    // ── Rate limiter + periodic cleanup ──
    let rate_limiter = RateLimiter::new();
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist CORS_ORIGIN when configured, otherwise allow any ──
    let cors = if !cors_origin.is_empty() {
        let origins: Vec<axum::http::HeaderValue> = cors_origin
            .split(',')
            .filter_map(|o| o.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // ── Router (4 groups with per-group rate limits) ──

    // 1. No-limit: health checks
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    // 2. Public: read-only endpoints (60 req/min)
    let public_routes = Router::new()
        .route("/api/services", get(handlers::booking::list_services))
        .route("/api/schedule", get(handlers::booking::get_schedule))
        .route(
            "/api/availability",
            get(handlers::booking::check_availability),
        )
        .route("/api/bookings", get(handlers::booking::my_bookings))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_public));

    // 3. Booking mutations: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::booking::create_booking))
        .route(
            "/api/bookings/{id}/reschedule",
            post(handlers::booking::reschedule_booking),
        )
        .route(
            "/api/bookings/{id}",
            delete(handlers::booking::cancel_booking),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_booking));

    // 4. Admin: rule layers + catalog + audit listings (120 req/min)
    let admin_routes = Router::new()
        .route("/api/admin/settings", get(handlers::admin::get_settings))
        .route("/api/admin/settings", put(handlers::admin::put_settings))
        .route(
            "/api/admin/services/{id}/rules",
            get(handlers::admin::get_service_rules),
        )
        .route(
            "/api/admin/services/{id}/rules",
            put(handlers::admin::put_service_rules),
        )
        .route(
            "/api/admin/services",
            get(handlers::admin::list_all_services),
        )
        .route("/api/admin/services", post(handlers::admin::create_service))
        .route("/api/admin/bookings", get(handlers::admin::list_bookings))
        .route(
            "/api/admin/bookings/{id}/cancel",
            post(handlers::admin::cancel_booking),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_admin));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Salonbook server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
