use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{engine::EngineError, models::*, AppState};

/// Map engine faults onto HTTP codes. Business rejections never reach this:
/// they come back inside a `BookingOutcome` with `success: false` (200 for
/// dry-run checks, 409 for booking mutations), per the result-not-exception
/// contract.
pub fn engine_error(e: EngineError) -> (StatusCode, Json<ApiResponse<()>>) {
    match e {
        EngineError::Validation(msg) => (StatusCode::BAD_REQUEST, Json(ApiResponse::error(msg))),
        EngineError::Store(err) => {
            tracing::error!("storage fault: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("storage unavailable, please retry")),
            )
        }
    }
}

/// GET /api/services — active catalog.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Service>>>, (StatusCode, Json<ApiResponse<()>>)> {
    let services = state.store.active_services().await.map_err(|e| {
        tracing::error!("list_services: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("storage unavailable, please retry")),
        )
    })?;
    Ok(Json(ApiResponse::success(services)))
}

/// GET /api/schedule?date=YYYY-MM-DD&service_id=N — resolved effective
/// schedule for one (date, service).
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<ApiResponse<EffectiveSchedule>>, (StatusCode, Json<ApiResponse<()>>)> {
    let schedule = state
        .engine
        .effective_schedule(&query.date, query.service_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(ApiResponse::success(schedule)))
}

/// GET /api/availability?date&time&service_id — dry-run slot check.
pub async fn check_availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<ApiResponse<AvailabilityOutcome>>, (StatusCode, Json<ApiResponse<()>>)> {
    let outcome = state
        .engine
        .availability(&query.date, &query.time, query.service_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(ApiResponse::success(outcome)))
}

fn outcome_status(outcome: &BookingOutcome) -> StatusCode {
    if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    }
}

/// POST /api/bookings — book a single appointment or a recurring series.
/// A rejected (or partially booked) request is a 409 with the outcome,
/// including its suggested alternatives, in the body.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BookRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BookingOutcome>>), (StatusCode, Json<ApiResponse<()>>)> {
    let outcome = state.engine.book(&body).await.map_err(engine_error)?;
    Ok((outcome_status(&outcome), Json(ApiResponse::success(outcome))))
}

/// POST /api/bookings/:id/reschedule — move an appointment to a new slot.
/// 409 on rejection, same as booking.
pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<RescheduleRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BookingOutcome>>), (StatusCode, Json<ApiResponse<()>>)> {
    let outcome = state
        .engine
        .reschedule(id, &body)
        .await
        .map_err(engine_error)?;
    Ok((outcome_status(&outcome), Json(ApiResponse::success(outcome))))
}

/// DELETE /api/bookings/:id — cancel (status-only, idempotent).
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<BookingOutcome>>, (StatusCode, Json<ApiResponse<()>>)> {
    let outcome = state.engine.cancel(id).await.map_err(engine_error)?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// GET /api/bookings?customer_id=X — the customer's active appointments.
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MyBookingsQuery>,
) -> Result<Json<ApiResponse<Vec<Appointment>>>, (StatusCode, Json<ApiResponse<()>>)> {
    let bookings = state
        .store
        .active_for_customer(&query.customer_id)
        .await
        .map_err(|e| {
            tracing::error!("my_bookings: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("storage unavailable, please retry")),
            )
        })?;
    Ok(Json(ApiResponse::success(bookings)))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::engine::BookingEngine;
    use crate::store::Store;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Instant;

    async fn test_state() -> (Arc<AppState>, i64) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let store = Store::new(pool);
        let service = store.create_service("Haircut", 0).await.unwrap();
        store
            .save_global_settings(&GlobalSettings {
                number_of_staff: Some(1),
                working_hours: vec!["09:00".into(), "10:00".into()],
                service_duration_minutes: Some(60),
                ..Default::default()
            })
            .await
            .unwrap();
        let state = Arc::new(AppState {
            engine: BookingEngine::new(store.clone()),
            store,
            admin_token: String::new(),
            started_at: Instant::now(),
        });
        (state, service.id)
    }

    fn book_body(service_id: i64, customer: &str, time: &str) -> BookRequest {
        BookRequest {
            customer_id: customer.into(),
            service_id,
            date: "2026-09-01".into(),
            time: time.into(),
            branch_id: None,
            recurrence_type: RecurrenceType::None,
            recurrence_count: 1,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_create_booking_rejection_maps_to_conflict() {
        let (state, service) = test_state().await;

        let (status, _) = create_booking(
            State(state.clone()),
            Json(book_body(service, "cust-1", "09:00")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::OK);

        let (status, Json(body)) = create_booking(
            State(state),
            Json(book_body(service, "cust-2", "09:00")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CONFLICT);
        // The envelope still carries the outcome with its reason
        let outcome = body.data.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some("fully booked"));
    }

    #[tokio::test]
    async fn test_reschedule_rejection_maps_to_conflict() {
        let (state, service) = test_state().await;
        create_booking(
            State(state.clone()),
            Json(book_body(service, "cust-1", "09:00")),
        )
        .await
        .unwrap();
        let (_, Json(second)) = create_booking(
            State(state.clone()),
            Json(book_body(service, "cust-2", "10:00")),
        )
        .await
        .unwrap();
        let id = second.data.unwrap().appointment.unwrap().id;

        let (status, _) = reschedule_booking(
            State(state.clone()),
            Path(id),
            Json(RescheduleRequest {
                new_date: "2026-09-01".into(),
                new_time: "09:00".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = reschedule_booking(
            State(state),
            Path(id),
            Json(RescheduleRequest {
                new_date: "2026-09-02".into(),
                new_time: "09:00".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::OK);
    }
}
