//! Wakecue: scheduled spoken wake prompts with exclusive audio playback.
//!
//! # Architecture
//!
//! - **Scheduler**: computes the next local-time fire for each trigger,
//!   across weekday filters and DST transitions, and fires armed triggers
//! - **Arbiter**: admits at most one spoken-audio session at a time, with a
//!   start cooldown, expiry, and idempotent stop
//! - **Dispatch**: routes fired triggers, repeats, snoozes and dismissals
//!   to the arbiter
//! - **TTS / audio**: remote synthesis and `cpal` playback behind the
//!   arbiter's backend trait

pub mod arbiter;
pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod scheduler;
pub mod tts;

pub use arbiter::{AudioArbiter, AudioSessionRequest, Phase, SessionDecision, SessionSource};
pub use config::WakeConfig;
pub use dispatch::{DispatchOutcome, Reminder, WakeDispatcher};
pub use error::{Result, WakeError};
pub use scheduler::{ScheduleDecision, TriggerSpec, compute_next_fire};

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}
