//! Process-wide exclusive audio arbiter.
//!
//! At most one spoken-audio session exists at any time. Every read and write
//! of the arbiter state goes through one mutex; backend start/stop runs
//! outside it so fast-path rejections never queue behind a slow backend.
//!
//! ```text
//! IDLE --accept--> STARTING --backend started--> PLAYING
//!   ^                 |                             |
//!   +---- start failed / cancelled ------+----------+-- stop | expiry | completion
//! ```
//!
//! Each accepted session gets a generation number. Deferred work (the start
//! task, the completion callback, the expiry timer) acts only while its
//! generation is still the active one, so a stale timer can never end a
//! later session.
//!
//! Repeat requests: a request carrying the id of the session that is already
//! starting or playing is a no-op success ([`SessionDecision::AlreadyActive`]).
//! Playback is not restarted and the cooldown clock is left alone. A session
//! stopped while still starting no longer counts: a repeat of its id is busy
//! until the start resolves.

use crate::arbiter::backend::{
    PlaybackCompletion, PlaybackHandle, PlaybackOutcome, PlaybackRequest, SpeechBackend,
};
use crate::arbiter::session::{
    ArbiterEvent, AudioSessionRequest, Phase, RejectReason, SessionDecision, SessionSource,
};
use crate::config::ArbiterConfig;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ActiveSession {
    generation: u64,
    session_id: String,
    source: SessionSource,
    /// Cancelled by stop/force-stop; observed by the session's supervisor.
    cancel: CancellationToken,
    /// Present only while PLAYING. Whoever takes it out releases it.
    handle: Option<PlaybackHandle>,
}

struct ArbiterState {
    phase: Phase,
    active: Option<ActiveSession>,
    last_start_ms: Option<u64>,
    next_generation: u64,
}

struct Inner {
    state: Mutex<ArbiterState>,
    backend: Arc<dyn SpeechBackend>,
    config: ArbiterConfig,
    runtime: tokio::runtime::Handle,
    events: broadcast::Sender<ArbiterEvent>,
}

/// Gatekeeper guaranteeing a single active spoken-audio session.
///
/// Cheap to clone; all clones share one lock domain and one backend.
#[derive(Clone)]
pub struct AudioArbiter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AudioArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("AudioArbiter")
            .field("phase", &state.phase)
            .field(
                "session_id",
                &state.active.as_ref().map(|a| a.session_id.as_str()),
            )
            .finish()
    }
}

impl AudioArbiter {
    /// Create an arbiter that owns `backend` and spawns its session tasks on
    /// `runtime`.
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        config: ArbiterConfig,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ArbiterState {
                    phase: Phase::Idle,
                    active: None,
                    last_start_ms: None,
                    next_generation: 1,
                }),
                backend,
                config,
                runtime,
                events,
            }),
        }
    }

    /// Subscribe to phase transitions and rejections.
    pub fn subscribe(&self) -> broadcast::Receiver<ArbiterEvent> {
        self.inner.events.subscribe()
    }

    /// Try to begin a session at the current wall-clock time.
    ///
    /// Returns `false` when the request was dropped (busy or cooldown).
    pub fn request_session(&self, req: AudioSessionRequest) -> bool {
        self.request_session_at(req, crate::now_epoch_millis())
            .is_accepted()
    }

    /// Try to begin a session, with `now_ms` as the current epoch time.
    pub fn request_session_at(&self, req: AudioSessionRequest, now_ms: u64) -> SessionDecision {
        let (generation, cancel) = {
            let mut state = self.inner.lock();

            if let Some(active) = &state.active {
                // A session stopped while starting is winding down, not active.
                if active.session_id == req.session_id && !active.cancel.is_cancelled() {
                    debug!(
                        session_id = %req.session_id,
                        source = %req.source,
                        phase = %state.phase,
                        "session already active; ignoring repeat request"
                    );
                    return SessionDecision::AlreadyActive;
                }
                debug!(
                    session_id = %req.session_id,
                    source = %req.source,
                    active = %active.session_id,
                    "session rejected: busy"
                );
                self.inner.emit(ArbiterEvent::Rejected {
                    session_id: req.session_id,
                    source: req.source,
                    reason: RejectReason::Busy,
                });
                return SessionDecision::Busy;
            }

            if let Some(last) = state.last_start_ms {
                let elapsed = now_ms.checked_sub(last);
                if elapsed.is_some_and(|e| e < self.inner.config.cooldown_ms) {
                    debug!(
                        session_id = %req.session_id,
                        source = %req.source,
                        elapsed_ms = elapsed.unwrap_or_default(),
                        "session rejected: cooldown"
                    );
                    self.inner.emit(ArbiterEvent::Rejected {
                        session_id: req.session_id,
                        source: req.source,
                        reason: RejectReason::Cooldown,
                    });
                    return SessionDecision::Cooldown;
                }
            }

            let generation = state.next_generation;
            state.next_generation += 1;
            let cancel = CancellationToken::new();
            state.phase = Phase::Starting;
            state.last_start_ms = Some(now_ms);
            state.active = Some(ActiveSession {
                generation,
                session_id: req.session_id.clone(),
                source: req.source,
                cancel: cancel.clone(),
                handle: None,
            });
            self.inner.emit_phase(&state);
            (generation, cancel)
        };

        info!(
            session_id = %req.session_id,
            source = %req.source,
            generation,
            "session accepted"
        );

        let inner = Arc::clone(&self.inner);
        self.inner
            .runtime
            .spawn(async move { inner.supervise(generation, req, cancel).await });

        SessionDecision::Accepted
    }

    /// Stop `session_id`. Ignored unless it is the active session or
    /// `source` is [`SessionSource::ForceStop`]. Idempotent.
    pub fn stop_session(&self, session_id: &str, source: SessionSource) {
        let handle = {
            let mut state = self.inner.lock();
            let Some(active) = &state.active else {
                debug!(session_id, source = %source, "stop ignored: no active session");
                return;
            };
            if active.session_id != session_id && source != SessionSource::ForceStop {
                debug!(
                    session_id,
                    source = %source,
                    active = %active.session_id,
                    "stop ignored: session id does not match"
                );
                return;
            }
            self.inner.teardown_locked(&mut state, "stopped")
        };
        self.inner.dispose(handle);
    }

    /// Tear down whatever session is active, regardless of id.
    pub fn force_stop_all(&self, source: SessionSource) {
        let handle = {
            let mut state = self.inner.lock();
            if state.active.is_none() {
                debug!(source = %source, "force stop: nothing active");
                return;
            }
            info!(source = %source, "force stopping active session");
            self.inner.teardown_locked(&mut state, "force stopped")
        };
        self.inner.dispose(handle);
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().phase == Phase::Playing
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.inner
            .lock()
            .active
            .as_ref()
            .map(|a| a.session_id.clone())
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ArbiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ArbiterEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_phase(&self, state: &ArbiterState) {
        self.emit(ArbiterEvent::PhaseChanged {
            phase: state.phase,
            session_id: state.active.as_ref().map(|a| a.session_id.clone()),
            source: state.active.as_ref().map(|a| a.source),
        });
    }

    /// End the active session under the lock.
    ///
    /// A PLAYING session goes straight to IDLE and its handle is returned for
    /// disposal outside the lock. A STARTING session is only marked
    /// cancelled; its supervisor reverts it once the start resolves.
    fn teardown_locked(&self, state: &mut ArbiterState, reason: &str) -> Option<PlaybackHandle> {
        match state.phase {
            Phase::Idle => None,
            Phase::Starting => {
                if let Some(active) = &state.active {
                    debug!(
                        session_id = %active.session_id,
                        "{reason} while starting; teardown deferred until start resolves"
                    );
                    active.cancel.cancel();
                }
                None
            }
            Phase::Playing => {
                let active = state.active.take()?;
                state.phase = Phase::Idle;
                active.cancel.cancel();
                info!(session_id = %active.session_id, "session {reason}");
                self.emit_phase(state);
                active.handle
            }
        }
    }

    /// Stop and release a handle taken out of the state.
    fn dispose(&self, handle: Option<PlaybackHandle>) {
        if let Some(handle) = handle {
            self.backend.stop(&handle);
            self.backend.release(handle);
        }
    }

    /// Drive one accepted session from STARTING to IDLE.
    async fn supervise(
        self: Arc<Self>,
        generation: u64,
        req: AudioSessionRequest,
        cancel: CancellationToken,
    ) {
        let (completion, done) = PlaybackCompletion::channel();
        let request = PlaybackRequest {
            session_id: req.session_id.clone(),
            payload: req.payload,
            voice_profile: req.voice_profile,
        };

        let start_timeout = Duration::from_secs(self.config.start_timeout_secs);
        let started =
            tokio::time::timeout(start_timeout, self.backend.start(request, completion)).await;

        let handle = match started {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!(session_id = %req.session_id, "backend failed to start: {e}");
                self.revert_starting(generation);
                return;
            }
            Err(_) => {
                warn!(
                    session_id = %req.session_id,
                    timeout_secs = self.config.start_timeout_secs,
                    "backend start timed out"
                );
                self.revert_starting(generation);
                return;
            }
        };

        if let Some(handle) = self.promote(generation, handle) {
            self.dispose(Some(handle));
            return;
        }

        let expiry = tokio::time::sleep(Duration::from_secs(self.config.session_expiry_secs));
        let reason = tokio::select! {
            _ = cancel.cancelled() => {
                // The stopper already took and released the handle.
                return;
            }
            outcome = done => match outcome {
                Ok(PlaybackOutcome::Finished) => "finished",
                Ok(PlaybackOutcome::Failed(e)) => {
                    warn!(session_id = %req.session_id, "playback failed: {e}");
                    "failed"
                }
                Err(_) => "completion dropped",
            },
            _ = expiry => "expired",
        };

        let handle = {
            let mut state = self.lock();
            let current = state
                .active
                .as_ref()
                .is_some_and(|a| a.generation == generation);
            if current {
                let handle = state.active.take().and_then(|a| a.handle);
                state.phase = Phase::Idle;
                info!(session_id = %req.session_id, "session {reason}");
                self.emit_phase(&state);
                handle
            } else {
                None
            }
        };
        self.dispose(handle);
    }

    /// STARTING -> PLAYING for `generation`.
    ///
    /// Hands the handle back when the session was cancelled (reverting to
    /// IDLE) or is no longer current; the caller disposes of it.
    fn promote(&self, generation: u64, handle: PlaybackHandle) -> Option<PlaybackHandle> {
        let mut state = self.lock();
        let current = state
            .active
            .as_ref()
            .is_some_and(|a| a.generation == generation);
        if !current || state.phase != Phase::Starting {
            return Some(handle);
        }

        let cancelled = state
            .active
            .as_ref()
            .is_some_and(|a| a.cancel.is_cancelled());
        if cancelled {
            state.active = None;
            state.phase = Phase::Idle;
            info!(generation, "session cancelled during start");
            self.emit_phase(&state);
            return Some(handle);
        }

        if let Some(active) = state.active.as_mut() {
            active.handle = Some(handle);
            info!(session_id = %active.session_id, "session playing");
        }
        state.phase = Phase::Playing;
        self.emit_phase(&state);
        None
    }

    /// STARTING -> IDLE after a failed or timed-out start.
    fn revert_starting(&self, generation: u64) {
        let mut state = self.lock();
        let current = state
            .active
            .as_ref()
            .is_some_and(|a| a.generation == generation);
        if current && state.phase == Phase::Starting {
            state.active = None;
            state.phase = Phase::Idle;
            self.emit_phase(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::arbiter::scripted::ScriptedBackend;

    const COOLDOWN_MS: u64 = 3_000;

    fn config() -> ArbiterConfig {
        ArbiterConfig {
            cooldown_ms: COOLDOWN_MS,
            session_expiry_secs: 120,
            start_timeout_secs: 5,
            event_capacity: 64,
        }
    }

    fn arbiter(backend: &Arc<ScriptedBackend>, config: ArbiterConfig) -> AudioArbiter {
        AudioArbiter::new(backend.clone(), config, tokio::runtime::Handle::current())
    }

    fn req(id: &str) -> AudioSessionRequest {
        AudioSessionRequest::text(id, SessionSource::Scheduled, "good morning")
    }

    async fn wait_for_phase(arb: &AudioArbiter, phase: Phase) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while arb.phase() != phase {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("arbiter never reached {phase}"));
    }

    #[tokio::test]
    async fn accepted_session_reaches_playing() {
        let backend = Arc::new(ScriptedBackend::new());
        let arb = arbiter(&backend, config());

        assert_eq!(arb.request_session_at(req("x"), 10_000), SessionDecision::Accepted);
        assert_eq!(arb.current_session_id().as_deref(), Some("x"));
        wait_for_phase(&arb, Phase::Playing).await;
        assert!(arb.is_playing());
        assert_eq!(backend.started(), 1);
        assert_eq!(backend.live_handles(), 1);
    }

    #[tokio::test]
    async fn busy_then_accepted_after_force_stop() {
        let backend = Arc::new(ScriptedBackend::new());
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;

        assert_eq!(arb.request_session_at(req("y"), 11_000), SessionDecision::Busy);

        arb.force_stop_all(SessionSource::ForceStop);
        assert_eq!(arb.phase(), Phase::Idle);
        assert_eq!(backend.live_handles(), 0);
        assert_eq!(backend.stopped(), 1);

        assert_eq!(
            arb.request_session_at(req("y"), 10_000 + COOLDOWN_MS),
            SessionDecision::Accepted
        );
        wait_for_phase(&arb, Phase::Playing).await;
        assert_eq!(arb.current_session_id().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn cooldown_rejects_rapid_restart() {
        let backend = Arc::new(ScriptedBackend::new());
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;
        arb.stop_session("x", SessionSource::Scheduled);
        assert_eq!(arb.phase(), Phase::Idle);

        assert_eq!(arb.request_session_at(req("y"), 12_999), SessionDecision::Cooldown);
        assert_eq!(arb.phase(), Phase::Idle);
        assert_eq!(arb.request_session_at(req("y"), 13_000), SessionDecision::Accepted);
    }

    #[tokio::test]
    async fn same_session_repeat_is_noop_success() {
        let backend = Arc::new(ScriptedBackend::new());
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;

        let repeat = AudioSessionRequest::text("x", SessionSource::Repeat, "again");
        assert_eq!(arb.request_session_at(repeat, 10_500), SessionDecision::AlreadyActive);
        assert_eq!(backend.started(), 1);
        assert!(arb.is_playing());
    }

    #[tokio::test]
    async fn non_matching_stop_is_ignored() {
        let backend = Arc::new(ScriptedBackend::new());
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;

        arb.stop_session("other", SessionSource::Scheduled);
        arb.stop_session("other", SessionSource::Repeat);
        assert_eq!(arb.phase(), Phase::Playing);
        assert_eq!(arb.current_session_id().as_deref(), Some("x"));

        arb.stop_session("other", SessionSource::ForceStop);
        assert_eq!(arb.phase(), Phase::Idle);
        assert_eq!(arb.current_session_id(), None);

        // Idempotent.
        arb.stop_session("x", SessionSource::Scheduled);
        assert_eq!(backend.released(), 1);
    }

    #[tokio::test]
    async fn start_failure_reverts_to_idle() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_next_start("no network");
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        wait_for_phase(&arb, Phase::Idle).await;
        assert_eq!(arb.current_session_id(), None);
        assert_eq!(backend.live_handles(), 0);

        assert!(arb.request_session_at(req("y"), 10_000 + COOLDOWN_MS).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;
    }

    #[tokio::test]
    async fn completion_and_playback_error_end_session() {
        let backend = Arc::new(ScriptedBackend::new());
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;
        assert!(backend.complete("x", PlaybackOutcome::Finished));
        wait_for_phase(&arb, Phase::Idle).await;
        assert_eq!(backend.released(), 1);

        assert!(arb.request_session_at(req("y"), 20_000).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;
        assert!(backend.complete("y", PlaybackOutcome::Failed("decode error".into())));
        wait_for_phase(&arb, Phase::Idle).await;
        assert_eq!(backend.released(), 2);
        assert_eq!(backend.live_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_bounds_session_length() {
        let backend = Arc::new(ScriptedBackend::new());
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;

        tokio::time::sleep(Duration::from_secs(121)).await;
        wait_for_phase(&arb, Phase::Idle).await;
        assert_eq!(backend.stopped(), 1);
        assert_eq!(backend.live_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_expiry_never_touches_later_session() {
        let backend = Arc::new(ScriptedBackend::new());
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;
        backend.complete("x", PlaybackOutcome::Finished);
        wait_for_phase(&arb, Phase::Idle).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(arb.request_session_at(req("y"), 100_000).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;

        // Past the first session's expiry but well inside the second's.
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(arb.is_playing());
        assert_eq!(arb.current_session_id().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn stop_while_starting_takes_effect_after_start() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_start_delay(Duration::from_millis(100));
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        assert_eq!(arb.phase(), Phase::Starting);
        arb.stop_session("x", SessionSource::Scheduled);
        assert_eq!(arb.phase(), Phase::Starting);
        assert_eq!(arb.request_session_at(req("y"), 20_000), SessionDecision::Busy);

        wait_for_phase(&arb, Phase::Idle).await;
        assert_eq!(backend.started(), 1);
        assert_eq!(backend.live_handles(), 0);
        assert_eq!(backend.released(), 1);
    }

    #[tokio::test]
    async fn repeat_of_session_stopped_while_starting_is_busy() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_start_delay(Duration::from_millis(100));
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        arb.stop_session("x", SessionSource::Scheduled);

        let repeat = AudioSessionRequest::text("x", SessionSource::Repeat, "again");
        assert_eq!(arb.request_session_at(repeat, 10_500), SessionDecision::Busy);

        wait_for_phase(&arb, Phase::Idle).await;
        assert_eq!(backend.live_handles(), 0);
        assert!(
            arb.request_session_at(req("x"), 10_000 + COOLDOWN_MS)
                .is_accepted()
        );
        wait_for_phase(&arb, Phase::Playing).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_timeout_reverts_to_idle() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_start_delay(Duration::from_secs(60));
        let arb = arbiter(&backend, config());

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        tokio::time::sleep(Duration::from_secs(6)).await;
        wait_for_phase(&arb, Phase::Idle).await;
        assert_eq!(backend.live_handles(), 0);
    }

    #[tokio::test]
    async fn events_follow_the_state_machine() {
        let backend = Arc::new(ScriptedBackend::new());
        let arb = arbiter(&backend, config());
        let mut events = arb.subscribe();

        assert!(arb.request_session_at(req("x"), 10_000).is_accepted());
        wait_for_phase(&arb, Phase::Playing).await;
        arb.request_session_at(req("y"), 10_001);
        arb.stop_session("x", SessionSource::Scheduled);

        let mut seen = Vec::new();
        while let Ok(ev) = events.try_recv() {
            seen.push(ev);
        }
        let phases: Vec<Phase> = seen
            .iter()
            .filter_map(|e| match e {
                ArbiterEvent::PhaseChanged { phase, .. } => Some(*phase),
                ArbiterEvent::Rejected { .. } => None,
            })
            .collect();
        assert_eq!(phases, vec![Phase::Starting, Phase::Playing, Phase::Idle]);
        assert!(seen.iter().any(|e| matches!(
            e,
            ArbiterEvent::Rejected { reason: RejectReason::Busy, session_id, .. } if session_id == "y"
        )));
    }
}
