use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::time::timeout;

use crate::models::{
    Appointment, AppointmentStatus, GlobalSettings, NewAppointment, Service, ServiceRules,
};

/// Upper bound on any single persistence call. Exceeding it is an
/// infrastructure fault, never a business rejection.
const STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// SQL fragment listing the statuses that count against capacity.
const ACTIVE_STATUSES: &str = "('booked', 'pending_confirmation', 'rescheduled')";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("corrupt stored document: {0}")]
    Data(#[from] serde_json::Error),
    #[error("database operation timed out")]
    Timeout,
}

async fn bounded<T, F>(fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(STORE_TIMEOUT, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout),
    }
}

fn now_stamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Typed access to the appointment collection and the rule-layer documents.
/// Every call is bounded by [`STORE_TIMEOUT`].
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ping(&self) -> bool {
        bounded(sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .is_ok()
    }

    // ── Appointments ──

    pub async fn insert_appointment(
        &self,
        new: &NewAppointment,
    ) -> Result<Appointment, StoreError> {
        let id = bounded(
            sqlx::query(
                "INSERT INTO appointments (customer_id, service_id, date, time, branch_id,
                 staff_id, status, recurrence_type, recurrence_count, notes, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&new.customer_id)
            .bind(new.service_id)
            .bind(&new.date)
            .bind(&new.time)
            .bind(&new.branch_id)
            .bind(&new.staff_id)
            .bind(AppointmentStatus::Booked)
            .bind(new.recurrence_type)
            .bind(new.recurrence_count)
            .bind(&new.notes)
            .bind(now_stamp())
            .execute(&self.pool),
        )
        .await?
        .last_insert_rowid();

        let appointment = bounded(
            sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = ?")
                .bind(id)
                .fetch_one(&self.pool),
        )
        .await?;

        Ok(appointment)
    }

    pub async fn appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        bounded(
            sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    /// Non-cancelled, non-completed appointments starting on `date`.
    pub async fn active_on_date(&self, date: &str) -> Result<Vec<Appointment>, StoreError> {
        let sql = format!(
            "SELECT * FROM appointments WHERE date = ? AND status IN {ACTIVE_STATUSES}
             ORDER BY time ASC"
        );
        bounded(
            sqlx::query_as::<_, Appointment>(&sql)
                .bind(date)
                .fetch_all(&self.pool),
        )
        .await
    }

    /// A customer's non-cancelled, non-completed appointments.
    pub async fn active_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        let sql = format!(
            "SELECT * FROM appointments WHERE customer_id = ? AND status IN {ACTIVE_STATUSES}
             ORDER BY date ASC, time ASC"
        );
        bounded(
            sqlx::query_as::<_, Appointment>(&sql)
                .bind(customer_id)
                .fetch_all(&self.pool),
        )
        .await
    }

    pub async fn appointments_between(
        &self,
        from: &str,
        to: &str,
    ) -> Result<Vec<Appointment>, StoreError> {
        bounded(
            sqlx::query_as::<_, Appointment>(
                "SELECT * FROM appointments WHERE date BETWEEN ? AND ?
                 ORDER BY date ASC, time ASC",
            )
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool),
        )
        .await
    }

    /// Status-only transition; the row survives for audit history.
    pub async fn mark_cancelled(&self, id: i64) -> Result<(), StoreError> {
        bounded(
            sqlx::query(
                "UPDATE appointments SET status = 'cancelled', cancelled_at = ? WHERE id = ?",
            )
            .bind(now_stamp())
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Move the same row to a new slot; the record re-enters `booked`.
    pub async fn apply_reschedule(
        &self,
        id: i64,
        new_date: &str,
        new_time: &str,
    ) -> Result<(), StoreError> {
        bounded(
            sqlx::query(
                "UPDATE appointments SET date = ?, time = ?, status = 'booked',
                 rescheduled_at = ?, reschedule_count = reschedule_count + 1 WHERE id = ?",
            )
            .bind(new_date)
            .bind(new_time)
            .bind(now_stamp())
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Sweep past-dated active appointments into `completed`.
    pub async fn complete_past(&self, today: &str) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE appointments SET status = 'completed'
             WHERE date < ? AND status IN {ACTIVE_STATUSES}"
        );
        let result = bounded(sqlx::query(&sql).bind(today).execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    // ── Services catalog ──

    pub async fn service(&self, id: i64) -> Result<Option<Service>, StoreError> {
        bounded(
            sqlx::query_as::<_, Service>(
                "SELECT id, name, is_active, sort_order FROM services WHERE id = ? AND is_active = 1",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    pub async fn active_services(&self) -> Result<Vec<Service>, StoreError> {
        bounded(
            sqlx::query_as::<_, Service>(
                "SELECT id, name, is_active, sort_order FROM services
                 WHERE is_active = 1 ORDER BY sort_order ASC",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    pub async fn all_services(&self) -> Result<Vec<Service>, StoreError> {
        bounded(
            sqlx::query_as::<_, Service>(
                "SELECT id, name, is_active, sort_order FROM services ORDER BY sort_order ASC",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    pub async fn create_service(
        &self,
        name: &str,
        sort_order: i64,
    ) -> Result<Service, StoreError> {
        let id = bounded(
            sqlx::query("INSERT INTO services (name, sort_order) VALUES (?, ?)")
                .bind(name)
                .bind(sort_order)
                .execute(&self.pool),
        )
        .await?
        .last_insert_rowid();

        let service = bounded(
            sqlx::query_as::<_, Service>(
                "SELECT id, name, is_active, sort_order FROM services WHERE id = ?",
            )
            .bind(id)
            .fetch_one(&self.pool),
        )
        .await?;
        Ok(service)
    }

    // ── Rule layers (read path is read-only for the engine) ──

    pub async fn global_settings(&self) -> Result<GlobalSettings, StoreError> {
        let row: Option<String> = bounded(
            sqlx::query_scalar("SELECT data FROM global_settings WHERE id = 1")
                .fetch_optional(&self.pool),
        )
        .await?;

        match row {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(GlobalSettings::default()),
        }
    }

    pub async fn save_global_settings(
        &self,
        settings: &GlobalSettings,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(settings)?;
        bounded(
            sqlx::query(
                "INSERT INTO global_settings (id, data) VALUES (1, ?)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            )
            .bind(json)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn service_rules(
        &self,
        service_id: i64,
    ) -> Result<Option<ServiceRules>, StoreError> {
        let row: Option<String> = bounded(
            sqlx::query_scalar("SELECT data FROM service_rules WHERE service_id = ?")
                .bind(service_id)
                .fetch_optional(&self.pool),
        )
        .await?;

        row.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    /// All service rule documents at once, so capacity math can resolve each
    /// existing appointment's duration without a query per row.
    pub async fn all_service_rules(&self) -> Result<HashMap<i64, ServiceRules>, StoreError> {
        let rows: Vec<(i64, String)> = bounded(
            sqlx::query_as("SELECT service_id, data FROM service_rules").fetch_all(&self.pool),
        )
        .await?;

        let mut rules = HashMap::with_capacity(rows.len());
        for (service_id, json) in rows {
            rules.insert(service_id, serde_json::from_str(&json)?);
        }
        Ok(rules)
    }

    pub async fn save_service_rules(
        &self,
        service_id: i64,
        rules: &ServiceRules,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(rules)?;
        bounded(
            sqlx::query(
                "INSERT INTO service_rules (service_id, data) VALUES (?, ?)
                 ON CONFLICT(service_id) DO UPDATE SET data = excluded.data",
            )
            .bind(service_id)
            .bind(json)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

// ── Tests ──
