use crate::models::EffectiveSchedule;

// ── Rejection reasons (fixed, user-displayable strings) ──

pub const REASON_DAY_OFF: &str = "day off";
pub const REASON_OUTSIDE_HOURS: &str = "outside working hours";
pub const REASON_FULLY_BOOKED: &str = "fully booked";

/// An existing active appointment reduced to what capacity math needs:
/// its start time and its own resolved duration (which may differ from the
/// requested service's duration).
#[derive(Debug, Clone)]
pub struct BusyInterval {
    pub time: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCheck {
    pub is_available: bool,
    pub reason: Option<&'static str>,
}

impl SlotCheck {
    fn available() -> Self {
        Self {
            is_available: true,
            reason: None,
        }
    }

    fn rejected(reason: &'static str) -> Self {
        Self {
            is_available: false,
            reason: Some(reason),
        }
    }
}

/// Parse a literal "HH:MM" into minutes since midnight.
pub fn time_to_minutes(time: &str) -> Option<i64> {
    let (h, m) = time.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let hour: i64 = h.parse().ok()?;
    let min: i64 = m.parse().ok()?;
    if hour > 23 || min > 59 {
        return None;
    }
    Some(hour * 60 + min)
}

/// Decide whether `time` has remaining capacity on a day described by
/// `schedule`, against the already-booked `busy` intervals of that date.
///
/// Overlap is strict half-open `[start, start + duration)` comparison, so
/// back-to-back appointments never conflict. Pure; no I/O.
pub fn check(time: &str, schedule: &EffectiveSchedule, busy: &[BusyInterval]) -> SlotCheck {
    if schedule.is_day_off {
        return SlotCheck::rejected(REASON_DAY_OFF);
    }

    if !schedule.working_hours.iter().any(|h| h == time) {
        return SlotCheck::rejected(REASON_OUTSIDE_HOURS);
    }

    let Some(requested_start) = time_to_minutes(time) else {
        return SlotCheck::rejected(REASON_OUTSIDE_HOURS);
    };
    let requested_end = requested_start + schedule.service_duration_minutes;

    let concurrent = busy
        .iter()
        .filter(|b| {
            let Some(existing_start) = time_to_minutes(&b.time) else {
                return false;
            };
            let existing_end = existing_start + b.duration_minutes;
            requested_start < existing_end && existing_start < requested_end
        })
        .count() as i64;

    if concurrent >= schedule.number_of_staff {
        return SlotCheck::rejected(REASON_FULLY_BOOKED);
    }

    SlotCheck::available()
}

/// Working-hour slots on this day that pass the full check, in schedule
/// order. `after` restricts to slots strictly later than the given time
/// (used when suggesting alternatives for a rejected slot on the same day).
pub fn open_slots(
    schedule: &EffectiveSchedule,
    busy: &[BusyInterval],
    after: Option<&str>,
    limit: usize,
) -> Vec<String> {
    if schedule.is_day_off || limit == 0 {
        return Vec::new();
    }

    let after_minutes = after.and_then(time_to_minutes);

    let mut open = Vec::new();
    for hour in &schedule.working_hours {
        if let (Some(cutoff), Some(slot)) = (after_minutes, time_to_minutes(hour)) {
            if slot <= cutoff {
                continue;
            }
        }
        if check(hour, schedule, busy).is_available {
            open.push(hour.clone());
            if open.len() == limit {
                break;
            }
        }
    }
    open
}

// ── Tests ──
