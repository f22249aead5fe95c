use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub sort_order: i64,
}

/// Appointment lifecycle. `cancelled` is terminal; cancelled rows are never
/// deleted so they stay visible to audit queries while dropping out of
/// capacity counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    PendingConfirmation,
    Rescheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Statuses that count against slot capacity.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Booked
                | AppointmentStatus::PendingConfirmation
                | AppointmentStatus::Rescheduled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RecurrenceType {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

/// One persisted appointment. `date` and `time` are literal business-local
/// strings (`YYYY-MM-DD`, `HH:MM`); no timezone conversion anywhere.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Appointment {
    pub id: i64,
    pub customer_id: String,
    pub service_id: i64,
    pub date: String,
    pub time: String,
    pub branch_id: Option<String>,
    pub staff_id: Option<String>,
    pub status: AppointmentStatus,
    pub recurrence_type: RecurrenceType,
    pub recurrence_count: i64,
    pub notes: Option<String>,
    pub created_at: String,
    pub cancelled_at: Option<String>,
    pub rescheduled_at: Option<String>,
    pub reschedule_count: i64,
}

/// Column values for a new appointment row.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub customer_id: String,
    pub service_id: i64,
    pub date: String,
    pub time: String,
    pub branch_id: Option<String>,
    pub staff_id: Option<String>,
    pub recurrence_type: RecurrenceType,
    pub recurrence_count: i64,
    pub notes: Option<String>,
}

// ── Rule layers ──

/// Override for one specific calendar date. Highest-precedence layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DayRule {
    pub is_off: bool,
    pub working_hours: Option<Vec<String>>,
    pub number_of_staff: Option<i64>,
    pub service_duration_minutes: Option<i64>,
}

/// Business-wide scheduling rules. Weekday numbering is Sunday = 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub number_of_staff: Option<i64>,
    pub working_hours: Vec<String>,
    pub service_duration_minutes: Option<i64>,
    pub weekly_off_days: Vec<u32>,
    pub one_time_off_dates: Vec<String>,
    pub specific_day_rules: HashMap<String, DayRule>,
    pub confirmation_template: Option<String>,
    pub cancellation_template: Option<String>,
}

/// Per-service overrides. Any field left `None` inherits from
/// `GlobalSettings`, field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRules {
    pub working_hours: Option<Vec<String>>,
    pub number_of_staff: Option<i64>,
    pub service_duration_minutes: Option<i64>,
    pub weekly_off_days: Option<Vec<u32>>,
    pub one_time_off_dates: Option<Vec<String>>,
    pub specific_day_rules: HashMap<String, DayRule>,
}

/// The fully resolved rules for one (date, service). Derived on every check,
/// never persisted, so rule edits apply to future checks immediately.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveSchedule {
    pub working_hours: Vec<String>,
    pub number_of_staff: i64,
    pub service_duration_minutes: i64,
    pub is_day_off: bool,
}

// ── API request/response types ──

fn default_recurrence_count() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookRequest {
    pub customer_id: String,
    pub service_id: i64,
    pub date: String,
    pub time: String,
    pub branch_id: Option<String>,
    #[serde(default)]
    pub recurrence_type: RecurrenceType,
    #[serde(default = "default_recurrence_count")]
    pub recurrence_count: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    pub new_date: String,
    pub new_time: String,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: String,
    pub time: String,
    pub service_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub date: String,
    pub service_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct MyBookingsQuery {
    pub customer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BookingsQuery {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub sort_order: Option<i64>,
}

/// A bookable (date, time) pair offered as an alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestedSlot {
    pub date: String,
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Booking details fed to the confirmation renderer and returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentDetails {
    pub id: i64,
    pub service: String,
    pub date: String,
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub status: AppointmentStatus,
}

/// Result of a book/reschedule/cancel operation. Business rejections land
/// here with `success: false`; they are never surfaced as errors.
#[derive(Debug, Serialize)]
pub struct BookingOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment: Option<AppointmentDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggested_slots: Vec<SuggestedSlot>,
    pub booked_occurrences: usize,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityOutcome {
    pub is_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggested_slots: Vec<SuggestedSlot>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
