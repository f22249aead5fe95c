use chrono::{Datelike, NaiveDate};

use crate::models::{DayRule, EffectiveSchedule, GlobalSettings, ServiceRules};

/// Documented minimum staff count used when no layer sets one.
pub const MIN_STAFF: i64 = 1;
/// Documented minimum service duration in minutes.
pub const MIN_DURATION_MINUTES: i64 = 5;

/// Merge the three rule layers into the effective schedule for one
/// (date, service). Pure; called fresh on every availability check.
///
/// Precedence: specific-day rule, then weekly/one-time closures, then
/// per-field fallback ServiceRules → GlobalSettings → minimums.
pub fn resolve(
    date: NaiveDate,
    global: &GlobalSettings,
    service: Option<&ServiceRules>,
) -> EffectiveSchedule {
    let date_key = date.format("%Y-%m-%d").to_string();

    // Layer 1: specific-day rule (service-level map shadows the global one).
    let day_rule = service
        .and_then(|s| s.specific_day_rules.get(&date_key))
        .or_else(|| global.specific_day_rules.get(&date_key));

    if let Some(rule) = day_rule {
        return resolve_with_day_rule(rule, global, service);
    }

    // Layer 2: weekly closures and one-time closures. A service may override
    // either set; absence inherits the global set.
    let weekday = date.weekday().num_days_from_sunday();
    let weekly_off = service
        .and_then(|s| s.weekly_off_days.as_deref())
        .unwrap_or(&global.weekly_off_days);
    let one_time_off = service
        .and_then(|s| s.one_time_off_dates.as_deref())
        .unwrap_or(&global.one_time_off_dates);

    let is_day_off =
        weekly_off.contains(&weekday) || one_time_off.iter().any(|d| *d == date_key);

    // Layer 3: per-field fallback.
    EffectiveSchedule {
        working_hours: resolve_hours(None, global, service),
        number_of_staff: resolve_staff(None, global, service),
        service_duration_minutes: resolve_duration(None, global, service),
        is_day_off,
    }
}

/// A specific-day rule wins outright: its `is_off` flag decides the closure
/// and its present fields shadow the service/global fallback chain.
fn resolve_with_day_rule(
    rule: &DayRule,
    global: &GlobalSettings,
    service: Option<&ServiceRules>,
) -> EffectiveSchedule {
    EffectiveSchedule {
        working_hours: resolve_hours(rule.working_hours.as_deref(), global, service),
        number_of_staff: resolve_staff(rule.number_of_staff, global, service),
        service_duration_minutes: resolve_duration(
            rule.service_duration_minutes,
            global,
            service,
        ),
        is_day_off: rule.is_off,
    }
}

fn resolve_hours(
    day: Option<&[String]>,
    global: &GlobalSettings,
    service: Option<&ServiceRules>,
) -> Vec<String> {
    day.map(<[String]>::to_vec)
        .or_else(|| service.and_then(|s| s.working_hours.clone()))
        .unwrap_or_else(|| global.working_hours.clone())
}

fn resolve_staff(
    day: Option<i64>,
    global: &GlobalSettings,
    service: Option<&ServiceRules>,
) -> i64 {
    day.or_else(|| service.and_then(|s| s.number_of_staff))
        .or(global.number_of_staff)
        .unwrap_or(MIN_STAFF)
        .max(0)
}

fn resolve_duration(
    day: Option<i64>,
    global: &GlobalSettings,
    service: Option<&ServiceRules>,
) -> i64 {
    day.or_else(|| service.and_then(|s| s.service_duration_minutes))
        .or(global.service_duration_minutes)
        .unwrap_or(MIN_DURATION_MINUTES)
        .max(MIN_DURATION_MINUTES)
}

// ── Tests ──
