//! Wake-time scheduling.
//!
//! Pure next-fire computation over local calendar time, a snooze helper, an
//! in-process runner that fires armed triggers, and a dedupe ledger for
//! delivered fires.

pub mod ledger;
pub mod next_fire;
pub mod runner;
pub mod trigger;

pub use ledger::{FireLedger, fire_key};
pub use next_fire::{
    SNOOZE_MINUTES_DEFAULT, ScheduleDecision, compute_next_fire, compute_next_fire_local,
    snooze_spec,
};
pub use runner::{ArmedTrigger, RunnerCommand, RunnerHandle, TriggerFired, TriggerRunner};
pub use trigger::{TimeOfDay, TriggerSpec, WeekdaySet};
