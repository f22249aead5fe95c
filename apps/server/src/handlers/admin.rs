use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::{models::*, AppState};

use super::booking::engine_error;

/// Require the static admin bearer token. An empty configured token
/// disables the whole admin surface.
fn require_admin(
    headers: &axum::http::HeaderMap,
    state: &AppState,
) -> Result<(), (StatusCode, Json<ApiResponse<()>>)> {
    if state.admin_token.is_empty() {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Admin API is disabled")),
        ));
    }
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error("Missing Authorization header")),
            )
        })?;
    if token != state.admin_token {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Invalid admin token")),
        ));
    }
    Ok(())
}

fn storage_error(e: crate::store::StoreError) -> (StatusCode, Json<ApiResponse<()>>) {
    tracing::error!("storage fault: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error("storage unavailable, please retry")),
    )
}

/// GET /api/admin/settings — the global rule layer.
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ApiResponse<GlobalSettings>>, (StatusCode, Json<ApiResponse<()>>)> {
    require_admin(&headers, &state)?;
    let settings = state.store.global_settings().await.map_err(storage_error)?;
    Ok(Json(ApiResponse::success(settings)))
}

/// PUT /api/admin/settings — replace the global rule layer. Takes effect on
/// the next availability check; schedules are never cached.
pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<GlobalSettings>,
) -> Result<Json<ApiResponse<GlobalSettings>>, (StatusCode, Json<ApiResponse<()>>)> {
    require_admin(&headers, &state)?;
    state
        .store
        .save_global_settings(&body)
        .await
        .map_err(storage_error)?;
    tracing::info!("global settings updated");
    Ok(Json(ApiResponse::success(body)))
}

/// GET /api/admin/services/:id/rules — the per-service override layer.
pub async fn get_service_rules(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Option<ServiceRules>>>, (StatusCode, Json<ApiResponse<()>>)> {
    require_admin(&headers, &state)?;
    let rules = state.store.service_rules(id).await.map_err(storage_error)?;
    Ok(Json(ApiResponse::success(rules)))
}

/// PUT /api/admin/services/:id/rules — replace a service's override layer.
pub async fn put_service_rules(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<ServiceRules>,
) -> Result<Json<ApiResponse<ServiceRules>>, (StatusCode, Json<ApiResponse<()>>)> {
    require_admin(&headers, &state)?;
    state
        .store
        .save_service_rules(id, &body)
        .await
        .map_err(storage_error)?;
    tracing::info!(service_id = id, "service rules updated");
    Ok(Json(ApiResponse::success(body)))
}

/// GET /api/admin/services — full catalog including inactive.
pub async fn list_all_services(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ApiResponse<Vec<Service>>>, (StatusCode, Json<ApiResponse<()>>)> {
    require_admin(&headers, &state)?;
    let services = state.store.all_services().await.map_err(storage_error)?;
    Ok(Json(ApiResponse::success(services)))
}

/// POST /api/admin/services — create a catalog entry.
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, (StatusCode, Json<ApiResponse<()>>)> {
    require_admin(&headers, &state)?;
    let service = state
        .store
        .create_service(&body.name, body.sort_order.unwrap_or(0))
        .await
        .map_err(storage_error)?;
    Ok(Json(ApiResponse::success(service)))
}

/// GET /api/admin/bookings?date=D | ?from=A&to=B — day or range listing,
/// cancelled and completed rows included for audit.
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<ApiResponse<Vec<Appointment>>>, (StatusCode, Json<ApiResponse<()>>)> {
    require_admin(&headers, &state)?;
    let bookings = match (&query.date, &query.from, &query.to) {
        (Some(date), _, _) => state.store.appointments_between(date, date).await,
        (None, Some(from), Some(to)) => state.store.appointments_between(from, to).await,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error("Provide date or from+to")),
            ))
        }
    }
    .map_err(storage_error)?;
    Ok(Json(ApiResponse::success(bookings)))
}

/// POST /api/admin/bookings/:id/cancel — admin-side cancellation, same
/// idempotent status-only transition as the client path.
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<BookingOutcome>>, (StatusCode, Json<ApiResponse<()>>)> {
    require_admin(&headers, &state)?;
    let outcome = state.engine.cancel(id).await.map_err(engine_error)?;
    Ok(Json(ApiResponse::success(outcome)))
}
