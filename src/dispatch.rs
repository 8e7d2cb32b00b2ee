//! Wake dispatcher: the glue between trigger sources and the core.
//!
//! Fired triggers, repeat taps, routine steps, snoozes and dismissals all
//! arrive here from independent contexts. The dispatcher maps each one onto
//! an arbiter call (and, for snooze, a scheduler call); it never produces
//! sound itself.

use crate::arbiter::{AudioArbiter, AudioSessionRequest, SessionDecision, SessionSource, SpeechPayload};
use crate::error::{Result, WakeError};
use crate::scheduler::ledger::{FireLedger, fire_key};
use crate::scheduler::next_fire::{ScheduleDecision, compute_next_fire, snooze_spec};
use crate::scheduler::runner::{RunnerHandle, TriggerFired};
use crate::scheduler::trigger::TriggerSpec;
use chrono::{DateTime, TimeZone};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// A trigger plus what to say when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub spec: TriggerSpec,
    pub payload: SpeechPayload,
    pub voice_profile: String,
}

impl Reminder {
    pub fn identity(&self) -> &str {
        &self.spec.identity
    }

    fn request(&self, source: SessionSource) -> AudioSessionRequest {
        AudioSessionRequest::new(
            self.spec.identity.clone(),
            source,
            self.payload.clone(),
            self.voice_profile.clone(),
        )
    }
}

/// What happened to a dispatched wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The arbiter accepted (or was already playing) the session.
    Accepted,
    /// The arbiter dropped the request.
    Rejected(SessionDecision),
    /// This exact fire was already delivered.
    Duplicate,
    /// No reminder is registered under that identity.
    Unknown,
}

impl From<SessionDecision> for DispatchOutcome {
    fn from(decision: SessionDecision) -> Self {
        if decision.is_accepted() {
            Self::Accepted
        } else {
            Self::Rejected(decision)
        }
    }
}

/// Routes wake events to the arbiter.
pub struct WakeDispatcher {
    arbiter: AudioArbiter,
    reminders: RwLock<HashMap<String, Reminder>>,
    ledger: Option<Mutex<FireLedger>>,
    runner: Option<RunnerHandle>,
    snooze_minutes: u32,
}

impl WakeDispatcher {
    pub fn new(arbiter: AudioArbiter, snooze_minutes: u32) -> Self {
        Self {
            arbiter,
            reminders: RwLock::new(HashMap::new()),
            ledger: None,
            runner: None,
            snooze_minutes,
        }
    }

    /// Drop duplicate deliveries of the same planned fire.
    pub fn with_fire_ledger(mut self, ledger: FireLedger) -> Self {
        self.ledger = Some(Mutex::new(ledger));
        self
    }

    /// Keep an in-process runner armed with registered reminders and snoozes.
    pub fn with_runner(mut self, runner: RunnerHandle) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn arbiter(&self) -> &AudioArbiter {
        &self.arbiter
    }

    /// Register (or replace) a reminder and arm it on the runner, if any.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Channel`] if the runner has stopped.
    pub fn register(&self, reminder: Reminder) -> Result<()> {
        let spec = reminder.spec.clone();
        self.reminders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.identity.clone(), reminder);
        if let Some(runner) = &self.runner {
            runner.arm(spec)?;
        }
        Ok(())
    }

    /// Remove a reminder, silence it if playing, and disarm it.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Channel`] if the runner has stopped.
    pub fn unregister(&self, identity: &str) -> Result<bool> {
        let removed = self
            .reminders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
            .is_some();
        self.arbiter.stop_session(identity, SessionSource::Scheduled);
        if let Some(runner) = &self.runner {
            runner.disarm(identity)?;
        }
        Ok(removed)
    }

    pub fn reminder(&self, identity: &str) -> Option<Reminder> {
        self.reminders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// A scheduled trigger (or snooze) fired.
    pub fn on_fired(&self, fired: &TriggerFired) -> DispatchOutcome {
        let Some(reminder) = self.reminder(&fired.identity) else {
            warn!(trigger = %fired.identity, "fired trigger has no registered reminder");
            return DispatchOutcome::Unknown;
        };

        if let Some(ledger) = &self.ledger {
            let key = fire_key(&fired.identity, fired.planned_epoch_millis);
            let recorded = ledger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record_once(&key);
            match recorded {
                Ok(true) => {}
                Ok(false) => {
                    info!(trigger = %fired.identity, key, "duplicate wake dropped");
                    return DispatchOutcome::Duplicate;
                }
                Err(e) => warn!(trigger = %fired.identity, "fire ledger unavailable, continuing: {e}"),
            }
        }

        self.request(reminder.request(SessionSource::Scheduled))
    }

    /// The user asked to hear the prompt again.
    pub fn on_repeat(&self, identity: &str) -> DispatchOutcome {
        let Some(reminder) = self.reminder(identity) else {
            return DispatchOutcome::Unknown;
        };
        self.request(reminder.request(SessionSource::Repeat))
    }

    /// One step of a routine or voice-command sequence wants to speak.
    pub fn on_routine_step(
        &self,
        step_id: impl Into<String>,
        payload: SpeechPayload,
        voice_profile: impl Into<String>,
    ) -> DispatchOutcome {
        self.request(AudioSessionRequest::new(
            step_id,
            SessionSource::RoutineStep,
            payload,
            voice_profile,
        ))
    }

    /// The user dismissed the prompt.
    pub fn on_dismiss(&self, identity: &str) {
        self.arbiter.stop_session(identity, SessionSource::Scheduled);
    }

    /// The app came to the foreground: silence everything.
    pub fn on_foreground(&self) {
        self.arbiter.force_stop_all(SessionSource::ForceStop);
    }

    /// Snooze against the local calendar.
    ///
    /// # Errors
    ///
    /// See [`on_snooze_at`](Self::on_snooze_at).
    pub fn on_snooze(&self, identity: &str) -> Result<ScheduleDecision> {
        self.on_snooze_at(identity, &chrono::Local::now())
    }

    /// Silence `identity` and compute when its snooze fires.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Schedule`] for an unknown identity or a bad snooze
    /// length, and [`WakeError::Channel`] if the runner has stopped.
    pub fn on_snooze_at<Tz: TimeZone>(
        &self,
        identity: &str,
        now: &DateTime<Tz>,
    ) -> Result<ScheduleDecision> {
        if self.reminder(identity).is_none() {
            return Err(WakeError::Schedule(format!(
                "cannot snooze unknown reminder '{identity}'"
            )));
        }

        self.arbiter.stop_session(identity, SessionSource::Scheduled);
        let decision = match &self.runner {
            Some(runner) => runner.snooze_at(identity, self.snooze_minutes, now)?,
            None => compute_next_fire(&snooze_spec(identity, now, self.snooze_minutes)?, now),
        };
        info!(
            trigger = identity,
            minutes = self.snooze_minutes,
            next = decision.next_fire_epoch_millis,
            "snoozed"
        );
        Ok(decision)
    }

    fn request(&self, req: AudioSessionRequest) -> DispatchOutcome {
        let session_id = req.session_id.clone();
        let source = req.source;
        let outcome = DispatchOutcome::from(self.arbiter.request_session_at(req, crate::now_epoch_millis()));
        debug!(session_id = %session_id, source = %source, ?outcome, "dispatched");
        outcome
    }
}
