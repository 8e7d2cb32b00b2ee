//! Next-fire computation for recurring and one-shot triggers.
//!
//! Everything here is pure: the caller supplies `now` (in whatever time zone
//! represents the device's local calendar) and gets back an absolute epoch
//! time. Snooze is the same computation applied to a one-shot spec built by
//! [`snooze_spec`].

use crate::error::{Result, WakeError};
use crate::scheduler::trigger::{TimeOfDay, TriggerSpec, WeekdaySet};
use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Default snooze duration in minutes.
pub const SNOOZE_MINUTES_DEFAULT: u32 = 5;

/// Number of days scanned ahead for weekday-restricted triggers.
///
/// Seven extra days so a trigger active only on today's weekday, whose time
/// has already passed, lands on the same weekday next week.
const WEEKDAY_SCAN_DAYS: u64 = 7;

/// Offset used when no qualifying day is found.
const FALLBACK_DELAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Longest local-time gap (DST transition) we step across, in minutes.
const MAX_GAP_MINUTES: i64 = 180;

/// Output of [`compute_next_fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDecision {
    /// Absolute fire time, epoch milliseconds.
    pub next_fire_epoch_millis: i64,
    /// `true` when the fire time falls on a later calendar day than `now`.
    pub is_tomorrow_or_later: bool,
    /// `true` when no qualifying day was found and `now + 24h` was used.
    ///
    /// Callers should log this as an anomaly.
    pub fallback: bool,
}

/// Compute when `spec` should next fire, strictly after `now`.
///
/// A candidate equal to `now` counts as already passed.
pub fn compute_next_fire<Tz: TimeZone>(spec: &TriggerSpec, now: &DateTime<Tz>) -> ScheduleDecision {
    let tz = now.timezone();
    let today = now.date_naive();
    let time = spec.time_of_day.to_naive();

    if spec.active_weekdays.is_empty() {
        for offset in 0..=1 {
            let Some(candidate) = fire_on(&tz, today, offset, time) else {
                continue;
            };
            if candidate > *now {
                return decision(&candidate, offset > 0);
            }
        }
        return fallback(now);
    }

    for offset in 0..=WEEKDAY_SCAN_DAYS {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if !spec.active_weekdays.contains(chrono::Datelike::weekday(&date)) {
            continue;
        }
        let Some(candidate) = fire_on(&tz, today, offset, time) else {
            continue;
        };
        if offset > 0 || candidate > *now {
            return decision(&candidate, offset > 0);
        }
    }

    fallback(now)
}

/// [`compute_next_fire`] against the system's local calendar.
pub fn compute_next_fire_local(spec: &TriggerSpec) -> ScheduleDecision {
    compute_next_fire(spec, &chrono::Local::now())
}

/// Build the one-shot spec a snooze resolves to: `now + minutes`, truncated
/// to the minute, with no weekday restriction.
///
/// # Errors
///
/// Returns [`WakeError::Schedule`] if `minutes` is zero or a full day or more,
/// or if `identity` is blank.
pub fn snooze_spec<Tz: TimeZone>(
    identity: impl Into<String>,
    now: &DateTime<Tz>,
    minutes: u32,
) -> Result<TriggerSpec> {
    if minutes == 0 || minutes >= 24 * 60 {
        return Err(WakeError::Schedule(format!(
            "snooze of {minutes} minutes out of range (1-1439)"
        )));
    }
    let at = now.naive_local() + chrono::Duration::minutes(i64::from(minutes));
    // hour() and minute() are always within u8 range.
    let time = TimeOfDay::new(at.hour() as u8, at.minute() as u8)?;
    TriggerSpec::new(identity, time, WeekdaySet::EMPTY)
}

/// Resolve `today + offset` at `time` in `tz`.
///
/// Ambiguous local times (DST fall-back) take the earlier instant; times that
/// fall in a gap (DST spring-forward) move to the first valid minute after it.
fn fire_on<Tz: TimeZone>(
    tz: &Tz,
    today: NaiveDate,
    offset: u64,
    time: NaiveTime,
) -> Option<DateTime<Tz>> {
    let local = today.checked_add_days(Days::new(offset))?.and_time(time);
    for shift in 0..=MAX_GAP_MINUTES {
        let shifted = local + chrono::Duration::minutes(shift);
        match tz.from_local_datetime(&shifted) {
            LocalResult::Single(t) => return Some(t),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest),
            LocalResult::None => continue,
        }
    }
    None
}

fn decision<Tz: TimeZone>(fire_at: &DateTime<Tz>, later_day: bool) -> ScheduleDecision {
    ScheduleDecision {
        next_fire_epoch_millis: fire_at.timestamp_millis(),
        is_tomorrow_or_later: later_day,
        fallback: false,
    }
}

fn fallback<Tz: TimeZone>(now: &DateTime<Tz>) -> ScheduleDecision {
    ScheduleDecision {
        next_fire_epoch_millis: now.timestamp_millis().saturating_add(FALLBACK_DELAY_MS),
        is_tomorrow_or_later: true,
        fallback: true,
    }
}
