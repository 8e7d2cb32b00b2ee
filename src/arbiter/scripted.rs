//! Scripted speech backend.
//!
//! Produces no sound. Logs what it would say and keeps counters so hosts can
//! run headless (`audio.dry_run`) and tests can drive completions by hand.

use crate::arbiter::backend::{
    PlaybackCompletion, PlaybackHandle, PlaybackOutcome, PlaybackRequest, SpeechBackend,
};
use crate::arbiter::session::SpeechPayload;
use crate::error::{Result, WakeError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::info;

#[derive(Default)]
struct Script {
    start_delay: Duration,
    /// Auto-complete playback after this long; `None` waits for [`ScriptedBackend::complete`].
    play_for: Option<Duration>,
    fail_next_start: Option<String>,
    started: usize,
    stopped: usize,
    released: usize,
    live: HashMap<u64, String>,
    pending: HashMap<String, PlaybackCompletion>,
    spoken: Vec<PlaybackRequest>,
}

/// Backend that pretends to speak.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose playbacks finish on their own after `duration`.
    pub fn with_playback_duration(duration: Duration) -> Self {
        let backend = Self::default();
        backend.lock().play_for = Some(duration);
        backend
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.lock().start_delay = delay;
    }

    /// Make the next `start` fail with `message`.
    pub fn fail_next_start(&self, message: impl Into<String>) {
        self.lock().fail_next_start = Some(message.into());
    }

    /// Fire the completion for `session_id`. Returns `false` if none is pending.
    pub fn complete(&self, session_id: &str, outcome: PlaybackOutcome) -> bool {
        let completion = self.lock().pending.remove(session_id);
        match completion {
            Some(c) => {
                c.complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Number of successful starts.
    pub fn started(&self) -> usize {
        self.lock().started
    }

    pub fn stopped(&self) -> usize {
        self.lock().stopped
    }

    pub fn released(&self) -> usize {
        self.lock().released
    }

    /// Handles started but not yet released.
    pub fn live_handles(&self) -> usize {
        self.lock().live.len()
    }

    /// Requests that reached playback, in order.
    pub fn spoken(&self) -> Vec<PlaybackRequest> {
        self.lock().spoken.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SpeechBackend for ScriptedBackend {
    async fn start(
        &self,
        request: PlaybackRequest,
        completion: PlaybackCompletion,
    ) -> Result<PlaybackHandle> {
        let delay = self.lock().start_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.lock();
        if let Some(message) = script.fail_next_start.take() {
            return Err(WakeError::Arbiter(message));
        }

        let handle = PlaybackHandle::allocate();
        match &request.payload {
            SpeechPayload::Text(text) => {
                info!(session_id = %request.session_id, voice = %request.voice_profile, "would say: {text}");
            }
            SpeechPayload::File(path) => {
                info!(session_id = %request.session_id, "would play {}", path.display());
            }
        }
        script.started += 1;
        script.live.insert(handle.id(), request.session_id.clone());

        match script.play_for {
            Some(duration) => {
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    completion.complete(PlaybackOutcome::Finished);
                });
            }
            None => {
                script.pending.insert(request.session_id.clone(), completion);
            }
        }
        script.spoken.push(request);
        Ok(handle)
    }

    fn stop(&self, handle: &PlaybackHandle) {
        let mut script = self.lock();
        if let Some(session_id) = script.live.get(&handle.id()).cloned() {
            script.stopped += 1;
            script.pending.remove(&session_id);
        }
    }

    fn release(&self, handle: PlaybackHandle) {
        let mut script = self.lock();
        if script.live.remove(&handle.id()).is_some() {
            script.released += 1;
        }
    }
}
