//! Trigger definitions: time of day, active weekdays, and the immutable
//! [`TriggerSpec`] consumed by the scheduler.
//!
//! Weekday indices follow the 0–6 convention with **0 = Sunday** through
//! 6 = Saturday.

use crate::error::{Result, WakeError};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Local wall-clock time at which a trigger fires (minute granularity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Create a validated time of day.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Schedule`] if `hour > 23` or `minute > 59`.
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 {
            return Err(WakeError::Schedule(format!(
                "hour {hour} out of range (0-23)"
            )));
        }
        if minute > 59 {
            return Err(WakeError::Schedule(format!(
                "minute {minute} out of range (0-59)"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Hour of day (0-23).
    pub fn hour(&self) -> u8 {
        self.hour
    }

    /// Minute of hour (0-59).
    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub(crate) fn to_naive(self) -> chrono::NaiveTime {
        // Fields are range-checked at construction.
        chrono::NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(chrono::NaiveTime::MIN)
    }
}

impl FromStr for TimeOfDay {
    type Err = WakeError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (h, m) = trimmed.split_once(':').ok_or_else(|| {
            WakeError::Schedule(format!("malformed time '{trimmed}', expected HH:MM"))
        })?;

        let valid_part = |part: &str, max_len: usize| {
            !part.is_empty() && part.len() <= max_len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if !valid_part(h, 2) || m.len() != 2 || !valid_part(m, 2) {
            return Err(WakeError::Schedule(format!(
                "malformed time '{trimmed}', expected HH:MM"
            )));
        }

        let hour = h
            .parse::<u8>()
            .map_err(|e| WakeError::Schedule(format!("bad hour in '{trimmed}': {e}")))?;
        let minute = m
            .parse::<u8>()
            .map_err(|e| WakeError::Schedule(format!("bad minute in '{trimmed}': {e}")))?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = WakeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Set of active weekdays. Empty means "every day" (or one-shot).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Build a set from 0–6 indices (0 = Sunday). Duplicates are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Schedule`] for any index above 6.
    pub fn from_indices(indices: &[u8]) -> Result<Self> {
        let mut bits = 0u8;
        for &idx in indices {
            if idx > 6 {
                return Err(WakeError::Schedule(format!(
                    "weekday {idx} out of range (0=Sunday .. 6=Saturday)"
                )));
            }
            bits |= 1 << idx;
        }
        Ok(Self(bits))
    }

    /// Build a set from chrono weekdays.
    pub fn from_weekdays(days: &[Weekday]) -> Self {
        Self(
            days.iter()
                .fold(0u8, |acc, d| acc | (1 << d.num_days_from_sunday())),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_sunday()) != 0
    }

    /// Active indices in ascending order.
    pub fn indices(&self) -> Vec<u8> {
        (0..7).filter(|i| self.0 & (1 << i) != 0).collect()
    }
}

impl TryFrom<Vec<u8>> for WeekdaySet {
    type Error = WakeError;

    fn try_from(value: Vec<u8>) -> Result<Self> {
        Self::from_indices(&value)
    }
}

impl From<WeekdaySet> for Vec<u8> {
    fn from(value: WeekdaySet) -> Self {
        value.indices()
    }
}

/// Immutable description of a recurring or one-shot wake event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Opaque trigger identity, reused as the audio session id.
    pub identity: String,
    /// Local time of day to fire at.
    pub time_of_day: TimeOfDay,
    /// Active weekdays; empty = every day / one-shot.
    #[serde(default)]
    pub active_weekdays: WeekdaySet,
}

impl TriggerSpec {
    /// Create a trigger spec.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Schedule`] if `identity` is blank.
    pub fn new(
        identity: impl Into<String>,
        time_of_day: TimeOfDay,
        active_weekdays: WeekdaySet,
    ) -> Result<Self> {
        let identity = identity.into();
        if identity.trim().is_empty() {
            return Err(WakeError::Schedule(
                "trigger identity must not be empty".to_owned(),
            ));
        }
        Ok(Self {
            identity,
            time_of_day,
            active_weekdays,
        })
    }

    /// Parse `"HH:MM"` plus 0–6 weekday indices into a spec.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Schedule`] for malformed time, out-of-range
    /// weekdays, or a blank identity.
    pub fn parse(identity: impl Into<String>, time: &str, weekdays: &[u8]) -> Result<Self> {
        Self::new(identity, time.parse()?, WeekdaySet::from_indices(weekdays)?)
    }
}
