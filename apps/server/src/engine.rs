use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Days, Months, NaiveDate};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::availability::{self, BusyInterval, REASON_FULLY_BOOKED};
use crate::models::{
    Appointment, AppointmentDetails, AppointmentStatus, AvailabilityOutcome, BookRequest,
    BookingOutcome, EffectiveSchedule, GlobalSettings, NewAppointment, RecurrenceType,
    RescheduleRequest, Service, ServiceRules, SuggestedSlot,
};
use crate::render;
use crate::schedule;
use crate::store::{Store, StoreError};

/// How many alternative slots a rejection carries at most.
pub const MAX_SUGGESTIONS: usize = 3;
/// How many days past the requested one the suggestion scan covers.
const SUGGESTION_LOOKAHEAD_DAYS: u64 = 7;

pub const REASON_INVALID_RECURRENCE: &str = "invalid recurrence unit";

/// Upper bound on occurrences a single request may expand to (one year of
/// weekly visits). Anything above is a validation fault, not a rejection.
pub const MAX_RECURRENCE_COUNT: i64 = 52;

/// Faults, as opposed to business rejections: rejections come back inside a
/// successful `BookingOutcome`, these abort the operation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed literal or unknown id, caught before any availability work.
    #[error("{0}")]
    Validation(String),
    /// Persistence unreachable or timed out; callers may retry.
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn validation(msg: impl Into<String>) -> EngineError {
    EngineError::Validation(msg.into())
}

fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| validation(format!("malformed date literal '{raw}', expected YYYY-MM-DD")))
}

fn parse_time(raw: &str) -> Result<(), EngineError> {
    availability::time_to_minutes(raw)
        .map(|_| ())
        .ok_or_else(|| validation(format!("malformed time literal '{raw}', expected HH:MM")))
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Step one occurrence forward. Monthly stepping clamps to the end of
/// shorter months (Jan 31 → Feb 28).
fn step_date(date: NaiveDate, unit: RecurrenceType) -> Option<NaiveDate> {
    match unit {
        RecurrenceType::None => None,
        RecurrenceType::Daily => date.checked_add_days(Days::new(1)),
        RecurrenceType::Weekly => date.checked_add_days(Days::new(7)),
        RecurrenceType::Monthly => date.checked_add_months(Months::new(1)),
    }
}

/// The rule layers loaded once per operation and handed around read-only.
/// Schedules are always derived from this snapshot, never cached beyond it.
struct RuleContext {
    global: GlobalSettings,
    service_rules: HashMap<i64, ServiceRules>,
}

impl RuleContext {
    fn resolve(&self, date: NaiveDate, service_id: i64) -> EffectiveSchedule {
        schedule::resolve(date, &self.global, self.service_rules.get(&service_id))
    }

    fn confirmation_template(&self) -> &str {
        self.global
            .confirmation_template
            .as_deref()
            .unwrap_or(render::DEFAULT_CONFIRMATION_TEMPLATE)
    }

    fn cancellation_template(&self) -> &str {
        self.global
            .cancellation_template
            .as_deref()
            .unwrap_or(render::DEFAULT_CANCELLATION_TEMPLATE)
    }
}

/// The stateful booking core: executes book / reschedule / cancel against
/// the store, guarding every check-then-write window with a per-date lock.
/// Capacity counts every active appointment on the date whatever its
/// service, so the lock is date-scoped too: two concurrent bookers can
/// never both take the last unit of capacity, even through different
/// services.
#[derive(Clone)]
pub struct BookingEngine {
    store: Store,
    slot_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl BookingEngine {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            slot_locks: Arc::new(DashMap::new()),
        }
    }

    fn slot_lock(&self, date: &str) -> Arc<Mutex<()>> {
        self.slot_locks
            .entry(date.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn rule_context(&self) -> Result<RuleContext, EngineError> {
        Ok(RuleContext {
            global: self.store.global_settings().await?,
            service_rules: self.store.all_service_rules().await?,
        })
    }

    /// Active appointments on `date`, each reduced to a busy interval using
    /// its own service's resolved duration for that day.
    async fn busy_intervals(
        &self,
        date: NaiveDate,
        ctx: &RuleContext,
        exclude: Option<i64>,
    ) -> Result<Vec<BusyInterval>, EngineError> {
        let appointments = self.store.active_on_date(&date_key(date)).await?;
        Ok(appointments
            .into_iter()
            .filter(|a| Some(a.id) != exclude)
            .map(|a| BusyInterval {
                duration_minutes: ctx.resolve(date, a.service_id).service_duration_minutes,
                time: a.time,
            })
            .collect())
    }

    fn details(&self, service: &Service, appointment: &Appointment) -> AppointmentDetails {
        AppointmentDetails {
            id: appointment.id,
            service: service.name.clone(),
            date: appointment.date.clone(),
            time: appointment.time.clone(),
            branch: appointment.branch_id.clone(),
            status: appointment.status,
        }
    }

    /// Up to [`MAX_SUGGESTIONS`] open slots starting with the requested
    /// day's remaining hours, then scanning subsequent days.
    async fn suggest(
        &self,
        from: NaiveDate,
        after_time: &str,
        service_id: i64,
        ctx: &RuleContext,
    ) -> Result<Vec<SuggestedSlot>, EngineError> {
        let mut suggested = Vec::new();
        for offset in 0..=SUGGESTION_LOOKAHEAD_DAYS {
            let Some(day) = from.checked_add_days(Days::new(offset)) else {
                break;
            };
            let day_schedule = ctx.resolve(day, service_id);
            if day_schedule.is_day_off {
                continue;
            }
            let busy = self.busy_intervals(day, ctx, None).await?;
            let after = (offset == 0).then_some(after_time);
            let date = date_key(day);
            for time in availability::open_slots(
                &day_schedule,
                &busy,
                after,
                MAX_SUGGESTIONS - suggested.len(),
            ) {
                suggested.push(SuggestedSlot {
                    date: date.clone(),
                    time,
                    branch: None,
                });
            }
            if suggested.len() >= MAX_SUGGESTIONS {
                break;
            }
        }
        Ok(suggested)
    }

    // ── Operations ──

    /// Book a single appointment or expand a recurring series.
    ///
    /// Occurrences are checked and persisted strictly sequentially; the
    /// first unavailable occurrence stops the loop, everything persisted
    /// before it stays booked, and the outcome reports the partial count.
    pub async fn book(&self, req: &BookRequest) -> Result<BookingOutcome, EngineError> {
        let start_date = parse_date(&req.date)?;
        parse_time(&req.time)?;
        if req.customer_id.trim().is_empty() {
            return Err(validation("customer_id must not be empty"));
        }
        if req.recurrence_count < 1 {
            return Err(validation("recurrence_count must be at least 1"));
        }
        if req.recurrence_count > MAX_RECURRENCE_COUNT {
            return Err(validation(format!(
                "recurrence_count must be at most {MAX_RECURRENCE_COUNT}"
            )));
        }
        let service = self
            .store
            .service(req.service_id)
            .await?
            .ok_or_else(|| validation(format!("unknown service id {}", req.service_id)))?;

        if req.recurrence_count > 1 && req.recurrence_type == RecurrenceType::None {
            return Ok(BookingOutcome {
                success: false,
                message: format!("Could not book: {REASON_INVALID_RECURRENCE}"),
                appointment: None,
                reason: Some(REASON_INVALID_RECURRENCE.into()),
                suggested_slots: Vec::new(),
                booked_occurrences: 0,
            });
        }

        let ctx = self.rule_context().await?;
        let total = req.recurrence_count as usize;
        let mut booked: Vec<AppointmentDetails> = Vec::new();
        let mut current = start_date;
        let mut failure: Option<(&'static str, NaiveDate)> = None;

        for occurrence in 0..total {
            if occurrence > 0 {
                match step_date(current, req.recurrence_type) {
                    Some(next) => current = next,
                    None => {
                        failure = Some((REASON_INVALID_RECURRENCE, current));
                        break;
                    }
                }
            }
            let date = date_key(current);
            let lock = self.slot_lock(&date);
            let rejected = {
                let _guard = lock.lock().await;
                let day_schedule = ctx.resolve(current, req.service_id);
                let busy = self.busy_intervals(current, &ctx, None).await?;
                let check = availability::check(&req.time, &day_schedule, &busy);
                if check.is_available {
                    let appointment = self
                        .store
                        .insert_appointment(&NewAppointment {
                            customer_id: req.customer_id.clone(),
                            service_id: req.service_id,
                            date,
                            time: req.time.clone(),
                            branch_id: req.branch_id.clone(),
                            staff_id: None,
                            recurrence_type: req.recurrence_type,
                            recurrence_count: req.recurrence_count,
                            notes: req.notes.clone(),
                        })
                        .await?;
                    booked.push(self.details(&service, &appointment));
                    None
                } else {
                    Some(check.reason.unwrap_or(REASON_FULLY_BOOKED))
                }
            };
            if let Some(reason) = rejected {
                failure = Some((reason, current));
                break;
            }
        }

        let first = booked.first().cloned();
        match failure {
            // No failure means every occurrence booked, so `first` is set.
            None => Ok(BookingOutcome {
                success: true,
                message: first
                    .as_ref()
                    .map(|d| render::render(ctx.confirmation_template(), d))
                    .unwrap_or_default(),
                appointment: first,
                reason: None,
                suggested_slots: Vec::new(),
                booked_occurrences: booked.len(),
            }),
            Some((reason, failed_date)) => {
                let suggested = self
                    .suggest(failed_date, &req.time, req.service_id, &ctx)
                    .await?;
                tracing::debug!(
                    date = %date_key(failed_date),
                    time = %req.time,
                    reason,
                    booked = booked.len(),
                    "booking rejected"
                );
                let message = if booked.is_empty() {
                    format!("Could not book: {reason}")
                } else {
                    format!(
                        "Booked {} of {} occurrences; occurrence on {} was not available: {}",
                        booked.len(),
                        total,
                        date_key(failed_date),
                        reason
                    )
                };
                Ok(BookingOutcome {
                    success: false,
                    message,
                    appointment: first,
                    reason: Some(reason.into()),
                    suggested_slots: suggested,
                    booked_occurrences: booked.len(),
                })
            }
        }
    }

    /// Move an existing appointment to a new slot. The appointment's own
    /// occupancy is excluded from the concurrency count, so rescheduling to
    /// its current slot never self-rejects. On rejection the record stays
    /// untouched.
    pub async fn reschedule(
        &self,
        id: i64,
        req: &RescheduleRequest,
    ) -> Result<BookingOutcome, EngineError> {
        let new_date = parse_date(&req.new_date)?;
        parse_time(&req.new_time)?;
        let appointment = self
            .store
            .appointment(id)
            .await?
            .ok_or_else(|| validation(format!("unknown appointment id {id}")))?;

        if !appointment.status.is_active() {
            let reason = match appointment.status {
                AppointmentStatus::Cancelled => "appointment is cancelled",
                _ => "appointment is completed",
            };
            return Ok(BookingOutcome {
                success: false,
                message: format!("Could not reschedule: {reason}"),
                appointment: None,
                reason: Some(reason.into()),
                suggested_slots: Vec::new(),
                booked_occurrences: 0,
            });
        }

        let service = self
            .store
            .service(appointment.service_id)
            .await?
            .ok_or_else(|| {
                validation(format!("unknown service id {}", appointment.service_id))
            })?;

        let ctx = self.rule_context().await?;
        let date = date_key(new_date);
        let lock = self.slot_lock(&date);
        let rejected = {
            let _guard = lock.lock().await;
            let day_schedule = ctx.resolve(new_date, appointment.service_id);
            let busy = self.busy_intervals(new_date, &ctx, Some(id)).await?;
            let check = availability::check(&req.new_time, &day_schedule, &busy);
            if check.is_available {
                self.store
                    .apply_reschedule(id, &date, &req.new_time)
                    .await?;
                None
            } else {
                Some(check.reason.unwrap_or(REASON_FULLY_BOOKED))
            }
        };

        match rejected {
            None => {
                let updated = self
                    .store
                    .appointment(id)
                    .await?
                    .ok_or_else(|| validation(format!("unknown appointment id {id}")))?;
                let details = self.details(&service, &updated);
                Ok(BookingOutcome {
                    success: true,
                    message: format!(
                        "Appointment rescheduled to {} at {}",
                        req.new_date, req.new_time
                    ),
                    appointment: Some(details),
                    reason: None,
                    suggested_slots: Vec::new(),
                    booked_occurrences: 1,
                })
            }
            Some(reason) => {
                let suggested = self
                    .suggest(new_date, &req.new_time, appointment.service_id, &ctx)
                    .await?;
                tracing::debug!(appointment = id, date = %date, time = %req.new_time, reason, "reschedule rejected");
                Ok(BookingOutcome {
                    success: false,
                    message: format!("Could not reschedule: {reason}"),
                    appointment: Some(self.details(&service, &appointment)),
                    reason: Some(reason.into()),
                    suggested_slots: suggested,
                    booked_occurrences: 0,
                })
            }
        }
    }

    /// Cancel an appointment. Idempotent: cancelling an already-cancelled
    /// record is a no-op success. The record is never deleted, so it keeps
    /// its place in audit history while leaving capacity counts.
    pub async fn cancel(&self, id: i64) -> Result<BookingOutcome, EngineError> {
        let appointment = self
            .store
            .appointment(id)
            .await?
            .ok_or_else(|| validation(format!("unknown appointment id {id}")))?;

        let service_name = self
            .store
            .service(appointment.service_id)
            .await?
            .map(|s| s.name)
            .unwrap_or_else(|| format!("service #{}", appointment.service_id));

        if appointment.status == AppointmentStatus::Cancelled {
            return Ok(BookingOutcome {
                success: true,
                message: "Appointment is already cancelled".into(),
                appointment: Some(AppointmentDetails {
                    id: appointment.id,
                    service: service_name,
                    date: appointment.date,
                    time: appointment.time,
                    branch: appointment.branch_id,
                    status: AppointmentStatus::Cancelled,
                }),
                reason: None,
                suggested_slots: Vec::new(),
                booked_occurrences: 0,
            });
        }

        self.store.mark_cancelled(id).await?;

        let ctx = self.rule_context().await?;
        let details = AppointmentDetails {
            id: appointment.id,
            service: service_name,
            date: appointment.date,
            time: appointment.time,
            branch: appointment.branch_id,
            status: AppointmentStatus::Cancelled,
        };
        Ok(BookingOutcome {
            success: true,
            message: render::render(ctx.cancellation_template(), &details),
            appointment: Some(details),
            reason: None,
            suggested_slots: Vec::new(),
            booked_occurrences: 0,
        })
    }

    /// Dry-run capacity check for one slot, with alternatives on rejection.
    pub async fn availability(
        &self,
        date: &str,
        time: &str,
        service_id: i64,
    ) -> Result<AvailabilityOutcome, EngineError> {
        let day = parse_date(date)?;
        parse_time(time)?;
        self.store
            .service(service_id)
            .await?
            .ok_or_else(|| validation(format!("unknown service id {service_id}")))?;

        let ctx = self.rule_context().await?;
        let day_schedule = ctx.resolve(day, service_id);
        let busy = self.busy_intervals(day, &ctx, None).await?;
        let check = availability::check(time, &day_schedule, &busy);

        let suggested = if check.is_available {
            Vec::new()
        } else {
            self.suggest(day, time, service_id, &ctx).await?
        };
        Ok(AvailabilityOutcome {
            is_available: check.is_available,
            reason: check.reason.map(String::from),
            suggested_slots: suggested,
        })
    }

    /// Resolve the effective schedule for one (date, service).
    pub async fn effective_schedule(
        &self,
        date: &str,
        service_id: i64,
    ) -> Result<EffectiveSchedule, EngineError> {
        let day = parse_date(date)?;
        self.store
            .service(service_id)
            .await?
            .ok_or_else(|| validation(format!("unknown service id {service_id}")))?;
        let ctx = self.rule_context().await?;
        Ok(ctx.resolve(day, service_id))
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;

    fn settings(hours: &[&str], staff: i64, duration: i64) -> GlobalSettings {
        GlobalSettings {
            number_of_staff: Some(staff),
            working_hours: hours.iter().map(|h| h.to_string()).collect(),
            service_duration_minutes: Some(duration),
            ..Default::default()
        }
    }

    async fn engine_with(settings: GlobalSettings) -> (BookingEngine, i64) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let store = Store::new(pool);
        let service = store.create_service("Haircut", 0).await.unwrap();
        store.save_global_settings(&settings).await.unwrap();
        (BookingEngine::new(store), service.id)
    }

    fn book_req(service_id: i64, date: &str, time: &str) -> BookRequest {
        BookRequest {
            customer_id: "cust-1".into(),
            service_id,
            date: date.into(),
            time: time.into(),
            branch_id: None,
            recurrence_type: RecurrenceType::None,
            recurrence_count: 1,
            notes: None,
        }
    }

    // ── book ──

    #[tokio::test]
    async fn test_book_single_success() {
        let (engine, service) =
            engine_with(settings(&["09:00", "10:00"], 1, 60)).await;
        let outcome = engine
            .book(&book_req(service, "2026-09-01", "09:00"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.booked_occurrences, 1);
        let appt = outcome.appointment.unwrap();
        assert_eq!(appt.status, AppointmentStatus::Booked);
        assert_eq!(
            outcome.message,
            "Your Haircut appointment is confirmed for 01/09/2026 at 09:00."
        );
    }

    #[tokio::test]
    async fn test_book_same_slot_twice_fully_booked() {
        let (engine, service) =
            engine_with(settings(&["09:00", "10:00"], 1, 60)).await;
        let req = book_req(service, "2026-09-01", "09:00");
        assert!(engine.book(&req).await.unwrap().success);

        let second = engine.book(&req).await.unwrap();
        assert!(!second.success);
        assert_eq!(second.reason.as_deref(), Some("fully booked"));
        assert_eq!(second.booked_occurrences, 0);
        // The free 10:00 slot comes back as a suggestion
        assert!(second
            .suggested_slots
            .iter()
            .any(|s| s.date == "2026-09-01" && s.time == "10:00"));
    }

    #[tokio::test]
    async fn test_book_back_to_back_both_succeed() {
        let (engine, service) =
            engine_with(settings(&["09:00", "10:00"], 1, 60)).await;
        assert!(engine
            .book(&book_req(service, "2026-09-01", "09:00"))
            .await
            .unwrap()
            .success);
        assert!(engine
            .book(&book_req(service, "2026-09-01", "10:00"))
            .await
            .unwrap()
            .success);
    }

    #[tokio::test]
    async fn test_book_weekly_off_day_rejected() {
        let mut s = settings(&["09:00"], 1, 60);
        s.weekly_off_days = vec![0]; // Sundays
        let (engine, service) = engine_with(s).await;
        // 2026-09-06 is a Sunday
        let outcome = engine
            .book(&book_req(service, "2026-09-06", "09:00"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some("day off"));
    }

    #[tokio::test]
    async fn test_book_outside_hours_rejected() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let outcome = engine
            .book(&book_req(service, "2026-09-01", "13:00"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some("outside working hours"));
    }

    #[tokio::test]
    async fn test_book_malformed_date_is_validation_fault() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let err = engine
            .book(&book_req(service, "soonish", "09:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_book_unknown_service_is_validation_fault() {
        let (engine, _) = engine_with(settings(&["09:00"], 1, 60)).await;
        let err = engine
            .book(&book_req(999, "2026-09-01", "09:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    // ── recurrence ──

    #[tokio::test]
    async fn test_recurring_daily_books_every_occurrence() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let mut req = book_req(service, "2026-09-01", "09:00");
        req.recurrence_type = RecurrenceType::Daily;
        req.recurrence_count = 3;

        let outcome = engine.book(&req).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.booked_occurrences, 3);
    }

    #[tokio::test]
    async fn test_recurring_partial_failure_keeps_prefix() {
        let mut s = settings(&["09:00"], 1, 60);
        // Second weekly occurrence lands on a one-time closure
        s.one_time_off_dates = vec!["2026-09-08".into()];
        let (engine, service) = engine_with(s).await;
        let mut req = book_req(service, "2026-09-01", "09:00");
        req.recurrence_type = RecurrenceType::Weekly;
        req.recurrence_count = 3;

        let outcome = engine.book(&req).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.booked_occurrences, 1);
        assert_eq!(outcome.reason.as_deref(), Some("day off"));

        // Exactly the prefix is persisted; nothing rolled back, the third
        // occurrence was never attempted.
        let first = engine.store.active_on_date("2026-09-01").await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(engine
            .store
            .active_on_date("2026-09-08")
            .await
            .unwrap()
            .is_empty());
        assert!(engine
            .store
            .active_on_date("2026-09-15")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_recurring_without_unit_rejected() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let mut req = book_req(service, "2026-09-01", "09:00");
        req.recurrence_count = 2;

        let outcome = engine.book(&req).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some(REASON_INVALID_RECURRENCE));
        assert!(engine
            .store
            .active_on_date("2026-09-01")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_recurrence_count_above_cap_is_validation_fault() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let mut req = book_req(service, "2026-09-01", "09:00");
        req.recurrence_type = RecurrenceType::Weekly;
        req.recurrence_count = MAX_RECURRENCE_COUNT + 1;

        let err = engine.book(&req).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(engine
            .store
            .active_on_date("2026-09-01")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_monthly_step_clamps_to_month_end() {
        let (engine, service) = engine_with(settings(&["09:00"], 2, 60)).await;
        let mut req = book_req(service, "2026-01-31", "09:00");
        req.recurrence_type = RecurrenceType::Monthly;
        req.recurrence_count = 2;

        let outcome = engine.book(&req).await.unwrap();
        assert!(outcome.success);
        assert_eq!(
            engine.store.active_on_date("2026-02-28").await.unwrap().len(),
            1
        );
    }

    // ── reschedule ──

    #[tokio::test]
    async fn test_reschedule_to_own_slot_never_self_rejects() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let booked = engine
            .book(&book_req(service, "2026-09-01", "09:00"))
            .await
            .unwrap();
        let id = booked.appointment.unwrap().id;

        let outcome = engine
            .reschedule(
                id,
                &RescheduleRequest {
                    new_date: "2026-09-01".into(),
                    new_time: "09:00".into(),
                },
            )
            .await
            .unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_reschedule_to_occupied_slot_leaves_record_untouched() {
        let (engine, service) =
            engine_with(settings(&["09:00", "10:00"], 1, 60)).await;
        engine
            .book(&book_req(service, "2026-09-01", "09:00"))
            .await
            .unwrap();
        let mut req = book_req(service, "2026-09-01", "10:00");
        req.customer_id = "cust-2".into();
        let second = engine.book(&req).await.unwrap();
        let id = second.appointment.unwrap().id;

        let outcome = engine
            .reschedule(
                id,
                &RescheduleRequest {
                    new_date: "2026-09-01".into(),
                    new_time: "09:00".into(),
                },
            )
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some("fully booked"));

        let untouched = engine.store.appointment(id).await.unwrap().unwrap();
        assert_eq!(untouched.time, "10:00");
        assert_eq!(untouched.reschedule_count, 0);
    }

    #[tokio::test]
    async fn test_reschedule_moves_capacity_to_new_date() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let booked = engine
            .book(&book_req(service, "2026-09-01", "09:00"))
            .await
            .unwrap();
        let id = booked.appointment.unwrap().id;

        let outcome = engine
            .reschedule(
                id,
                &RescheduleRequest {
                    new_date: "2026-09-02".into(),
                    new_time: "09:00".into(),
                },
            )
            .await
            .unwrap();
        assert!(outcome.success);

        // The old slot is free again
        let mut req = book_req(service, "2026-09-01", "09:00");
        req.customer_id = "cust-2".into();
        assert!(engine.book(&req).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_reschedule_cancelled_appointment_rejected() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let booked = engine
            .book(&book_req(service, "2026-09-01", "09:00"))
            .await
            .unwrap();
        let id = booked.appointment.unwrap().id;
        engine.cancel(id).await.unwrap();

        let outcome = engine
            .reschedule(
                id,
                &RescheduleRequest {
                    new_date: "2026-09-02".into(),
                    new_time: "09:00".into(),
                },
            )
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some("appointment is cancelled"));
    }

    #[tokio::test]
    async fn test_reschedule_unknown_id_is_validation_fault() {
        let (engine, _) = engine_with(settings(&["09:00"], 1, 60)).await;
        let err = engine
            .reschedule(
                42,
                &RescheduleRequest {
                    new_date: "2026-09-01".into(),
                    new_time: "09:00".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    // ── cancel ──

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let booked = engine
            .book(&book_req(service, "2026-09-01", "09:00"))
            .await
            .unwrap();
        let id = booked.appointment.unwrap().id;

        let first = engine.cancel(id).await.unwrap();
        assert!(first.success);
        assert_eq!(
            first.message,
            "Your Haircut appointment on 01/09/2026 at 09:00 has been cancelled."
        );

        let second = engine.cancel(id).await.unwrap();
        assert!(second.success);
        assert_eq!(
            second.appointment.unwrap().status,
            AppointmentStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cancel_frees_capacity() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let booked = engine
            .book(&book_req(service, "2026-09-01", "09:00"))
            .await
            .unwrap();
        engine.cancel(booked.appointment.unwrap().id).await.unwrap();

        let mut req = book_req(service, "2026-09-01", "09:00");
        req.customer_id = "cust-2".into();
        assert!(engine.book(&req).await.unwrap().success);
    }

    // ── concurrency ──

    #[tokio::test]
    async fn test_concurrent_bookers_cannot_both_take_last_slot() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        let req_a = book_req(service, "2026-09-01", "09:00");
        let mut req_b = req_a.clone();
        req_b.customer_id = "cust-2".into();

        let engine_a = engine.clone();
        let engine_b = engine.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { engine_a.book(&req_a).await.unwrap() }),
            tokio::spawn(async move { engine_b.book(&req_b).await.unwrap() }),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.success != b.success, "exactly one booker must win");
        let loser = if a.success { b } else { a };
        assert_eq!(loser.reason.as_deref(), Some("fully booked"));
        assert_eq!(
            engine.store.active_on_date("2026-09-01").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_cross_service_bookers_respect_capacity() {
        let (engine, service_a) = engine_with(settings(&["09:00"], 1, 60)).await;
        let service_b = engine.store.create_service("Manicure", 1).await.unwrap().id;
        let req_a = book_req(service_a, "2026-09-01", "09:00");
        let mut req_b = book_req(service_b, "2026-09-01", "09:00");
        req_b.customer_id = "cust-2".into();

        let engine_a = engine.clone();
        let engine_b = engine.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { engine_a.book(&req_a).await.unwrap() }),
            tokio::spawn(async move { engine_b.book(&req_b).await.unwrap() }),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        // Capacity is date-scoped, so different services still contend for
        // the same staff
        assert!(a.success != b.success, "exactly one booker must win");
        let loser = if a.success { b } else { a };
        assert_eq!(loser.reason.as_deref(), Some("fully booked"));
        assert_eq!(
            engine.store.active_on_date("2026-09-01").await.unwrap().len(),
            1
        );
    }

    // ── availability / schedule ──

    #[tokio::test]
    async fn test_availability_suggests_next_days_when_day_full() {
        let (engine, service) = engine_with(settings(&["09:00"], 1, 60)).await;
        engine
            .book(&book_req(service, "2026-09-01", "09:00"))
            .await
            .unwrap();

        let outcome = engine
            .availability("2026-09-01", "09:00", service)
            .await
            .unwrap();
        assert!(!outcome.is_available);
        assert_eq!(outcome.reason.as_deref(), Some("fully booked"));
        assert!(outcome
            .suggested_slots
            .iter()
            .any(|s| s.date == "2026-09-02" && s.time == "09:00"));
    }

    #[tokio::test]
    async fn test_effective_schedule_endpoint_resolution() {
        let mut s = settings(&["09:00", "10:00"], 2, 60);
        s.weekly_off_days = vec![0];
        let (engine, service) = engine_with(s).await;

        let schedule = engine
            .effective_schedule("2026-09-01", service)
            .await
            .unwrap();
        assert!(!schedule.is_day_off);
        assert_eq!(schedule.number_of_staff, 2);

        let sunday = engine
            .effective_schedule("2026-09-06", service)
            .await
            .unwrap();
        assert!(sunday.is_day_off);
    }
}
