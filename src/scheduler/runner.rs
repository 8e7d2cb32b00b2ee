//! In-process wake timer.
//!
//! [`TriggerRunner`] holds the armed triggers, sleeps until the earliest
//! computed fire time, and emits a [`TriggerFired`] for each trigger that
//! came due. Recurring triggers are re-derived through the scheduler after
//! every fire; snoozes fire once and are dropped.
//!
//! Control happens through a [`RunnerHandle`] so trigger sources on other
//! tasks can arm, snooze and disarm while the loop is running.

use crate::error::{Result, WakeError};
use crate::scheduler::next_fire::{ScheduleDecision, compute_next_fire, snooze_spec};
use crate::scheduler::trigger::TriggerSpec;
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on a single sleep, so clock changes are picked up.
const RECHECK_INTERVAL_MS: i64 = 60_000;

/// Suffix distinguishing a pending snooze from its recurring trigger.
const SNOOZE_KEY_SUFFIX: &str = "#snooze";

/// A trigger that came due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFired {
    /// Identity of the trigger (shared by a trigger and its snooze).
    pub identity: String,
    /// Fire time the scheduler planned, epoch milliseconds.
    pub planned_epoch_millis: i64,
    /// `true` when this fire came from a snooze.
    pub snoozed: bool,
}

/// Diagnostic view of one armed trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmedTrigger {
    pub key: String,
    pub identity: String,
    pub next_fire_epoch_millis: i64,
    pub snoozed: bool,
}

/// Commands accepted by a running [`TriggerRunner`].
#[derive(Debug)]
pub enum RunnerCommand {
    /// Arm (or re-arm) a recurring trigger.
    Arm(TriggerSpec),
    /// Arm a one-shot snooze. `decision` is the fire time already computed
    /// for `spec`, so the runner and the caller agree on it.
    Snooze {
        spec: TriggerSpec,
        decision: ScheduleDecision,
    },
    /// Remove a trigger and any pending snooze for it.
    Disarm(String),
    /// Report the armed triggers.
    Snapshot(oneshot::Sender<Vec<ArmedTrigger>>),
}

/// Cloneable control handle for a [`TriggerRunner`].
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    tx: mpsc::UnboundedSender<RunnerCommand>,
}

impl RunnerHandle {
    pub fn arm(&self, spec: TriggerSpec) -> Result<()> {
        self.send(RunnerCommand::Arm(spec))
    }

    /// Arm a snooze for `identity`, `minutes` after `now`, and return its fire time.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Schedule`] for an out-of-range snooze length and
    /// [`WakeError::Channel`] if the runner has stopped.
    pub fn snooze_at<Tz: TimeZone>(
        &self,
        identity: &str,
        minutes: u32,
        now: &DateTime<Tz>,
    ) -> Result<ScheduleDecision> {
        let spec = snooze_spec(identity, now, minutes)?;
        let decision = compute_next_fire(&spec, now);
        self.send(RunnerCommand::Snooze { spec, decision })?;
        Ok(decision)
    }

    pub fn disarm(&self, identity: impl Into<String>) -> Result<()> {
        self.send(RunnerCommand::Disarm(identity.into()))
    }

    /// Ask the running loop for its armed triggers.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Channel`] if the runner has stopped.
    pub async fn snapshot(&self) -> Result<Vec<ArmedTrigger>> {
        let (tx, rx) = oneshot::channel();
        self.send(RunnerCommand::Snapshot(tx))?;
        rx.await
            .map_err(|_| WakeError::Channel("trigger runner dropped snapshot request".to_owned()))
    }

    fn send(&self, cmd: RunnerCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| WakeError::Channel("trigger runner is not running".to_owned()))
    }
}

#[derive(Debug, Clone)]
struct Armed {
    spec: TriggerSpec,
    snoozed: bool,
    next: ScheduleDecision,
}

enum Wake {
    Command(Option<RunnerCommand>),
    Timer,
}

/// Background loop that turns armed triggers into [`TriggerFired`] events.
pub struct TriggerRunner {
    armed: HashMap<String, Armed>,
    fired_tx: mpsc::UnboundedSender<TriggerFired>,
    command_rx: mpsc::UnboundedReceiver<RunnerCommand>,
}

impl TriggerRunner {
    /// Create a runner emitting fires on `fired_tx`, plus its control handle.
    pub fn new(fired_tx: mpsc::UnboundedSender<TriggerFired>) -> (Self, RunnerHandle) {
        let (tx, command_rx) = mpsc::unbounded_channel();
        let runner = Self {
            armed: HashMap::new(),
            fired_tx,
            command_rx,
        };
        (runner, RunnerHandle { tx })
    }

    /// Arm a recurring trigger relative to `now`.
    pub fn arm_at<Tz: TimeZone>(&mut self, spec: TriggerSpec, now: &DateTime<Tz>) -> ScheduleDecision {
        let next = compute_next_fire(&spec, now);
        log_decision(&spec.identity, &next);
        let key = spec.identity.clone();
        self.armed.insert(
            key,
            Armed {
                spec,
                snoozed: false,
                next,
            },
        );
        next
    }

    /// Arm a one-shot snooze for `identity`, replacing any pending snooze.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Schedule`] for an out-of-range snooze length.
    pub fn snooze_at<Tz: TimeZone>(
        &mut self,
        identity: &str,
        minutes: u32,
        now: &DateTime<Tz>,
    ) -> Result<ScheduleDecision> {
        let spec = snooze_spec(identity, now, minutes)?;
        let next = compute_next_fire(&spec, now);
        self.arm_snooze(spec, next);
        Ok(next)
    }

    /// Arm a one-shot snooze whose fire time was computed by the caller.
    pub fn arm_snooze(&mut self, spec: TriggerSpec, next: ScheduleDecision) {
        log_decision(&spec.identity, &next);
        self.armed.insert(
            snooze_key(&spec.identity),
            Armed {
                spec,
                snoozed: true,
                next,
            },
        );
    }

    /// Remove a trigger and its pending snooze. Returns `true` if anything was armed.
    pub fn disarm(&mut self, identity: &str) -> bool {
        let recurring = self.armed.remove(identity).is_some();
        let snoozed = self.armed.remove(&snooze_key(identity)).is_some();
        recurring || snoozed
    }

    /// Armed triggers ordered by next fire time.
    pub fn armed(&self) -> Vec<ArmedTrigger> {
        let mut out: Vec<ArmedTrigger> = self
            .armed
            .iter()
            .map(|(key, a)| ArmedTrigger {
                key: key.clone(),
                identity: a.spec.identity.clone(),
                next_fire_epoch_millis: a.next.next_fire_epoch_millis,
                snoozed: a.snoozed,
            })
            .collect();
        out.sort_by(|a, b| {
            a.next_fire_epoch_millis
                .cmp(&b.next_fire_epoch_millis)
                .then_with(|| a.key.cmp(&b.key))
        });
        out
    }

    /// Earliest pending fire time, if any trigger is armed.
    pub fn next_deadline_ms(&self) -> Option<i64> {
        self.armed.values().map(|a| a.next.next_fire_epoch_millis).min()
    }

    /// Collect every trigger due at `now`, re-arming recurring ones.
    ///
    /// A trigger that is overdue by several periods fires once.
    pub fn collect_due<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> Vec<TriggerFired> {
        let now_ms = now.timestamp_millis();
        let mut due_keys: Vec<String> = self
            .armed
            .iter()
            .filter(|(_, a)| a.next.next_fire_epoch_millis <= now_ms)
            .map(|(key, _)| key.clone())
            .collect();
        due_keys.sort();

        let mut fired = Vec::with_capacity(due_keys.len());
        for key in due_keys {
            let Some(armed) = self.armed.get_mut(&key) else {
                continue;
            };
            fired.push(TriggerFired {
                identity: armed.spec.identity.clone(),
                planned_epoch_millis: armed.next.next_fire_epoch_millis,
                snoozed: armed.snoozed,
            });

            if armed.snoozed {
                self.armed.remove(&key);
            } else {
                armed.next = compute_next_fire(&armed.spec, now);
                log_decision(&armed.spec.identity, &armed.next);
            }
        }
        fired
    }

    fn apply<Tz: TimeZone>(&mut self, cmd: RunnerCommand, now: &DateTime<Tz>) {
        match cmd {
            RunnerCommand::Arm(spec) => {
                self.arm_at(spec, now);
            }
            RunnerCommand::Snooze { spec, decision } => self.arm_snooze(spec, decision),
            RunnerCommand::Disarm(identity) => {
                if !self.disarm(&identity) {
                    debug!(trigger = %identity, "disarm for unknown trigger");
                }
            }
            RunnerCommand::Snapshot(reply) => {
                let _ = reply.send(self.armed());
            }
        }
    }

    /// Start the runner loop on the current tokio runtime.
    ///
    /// The loop ends when `cancel` fires or the fired-event receiver is dropped.
    pub fn run(mut self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("trigger runner started with {} triggers", self.armed.len());
            let mut commands_open = true;

            loop {
                let now_ms = chrono::Local::now().timestamp_millis();
                let wait_ms = self
                    .next_deadline_ms()
                    .map_or(RECHECK_INTERVAL_MS, |deadline| {
                        deadline.saturating_sub(now_ms).clamp(0, RECHECK_INTERVAL_MS)
                    });
                // clamp() keeps wait_ms non-negative.
                let wait = Duration::from_millis(wait_ms as u64);

                let wake = tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("trigger runner cancelled");
                        break;
                    }
                    cmd = self.command_rx.recv(), if commands_open => Wake::Command(cmd),
                    _ = tokio::time::sleep(wait) => Wake::Timer,
                };

                let now = chrono::Local::now();
                match wake {
                    Wake::Command(Some(cmd)) => self.apply(cmd, &now),
                    Wake::Command(None) => {
                        debug!("all runner handles dropped; continuing with armed triggers");
                        commands_open = false;
                    }
                    Wake::Timer => {}
                }

                for fired in self.collect_due(&now) {
                    info!(
                        trigger = %fired.identity,
                        planned = fired.planned_epoch_millis,
                        snoozed = fired.snoozed,
                        "trigger fired"
                    );
                    if self.fired_tx.send(fired).is_err() {
                        warn!("trigger fired channel closed, stopping runner");
                        return;
                    }
                }
            }
        })
    }
}

fn snooze_key(identity: &str) -> String {
    format!("{identity}{SNOOZE_KEY_SUFFIX}")
}

fn log_decision(identity: &str, decision: &ScheduleDecision) {
    if decision.fallback {
        warn!(
            trigger = identity,
            next = decision.next_fire_epoch_millis,
            "no qualifying day found; fell back to now + 24h"
        );
    } else {
        debug!(
            trigger = identity,
            next = decision.next_fire_epoch_millis,
            later_day = decision.is_tomorrow_or_later,
            "trigger armed"
        );
    }
}
