//! Speech backend contract.
//!
//! The arbiter is the only caller. A backend turns a [`PlaybackRequest`] into
//! a running playback identified by a [`PlaybackHandle`], reports the end of
//! playback once through the [`PlaybackCompletion`] it was given, and accepts
//! `stop` / `release` for the handle afterwards.

use crate::arbiter::session::SpeechPayload;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a backend needs to start one playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub session_id: String,
    pub payload: SpeechPayload,
    pub voice_profile: String,
}

/// Opaque token for one running playback.
///
/// Not `Clone`: exactly one owner releases it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PlaybackHandle {
    id: u64,
}

impl PlaybackHandle {
    /// Allocate a fresh, process-unique handle.
    pub fn allocate() -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// How playback ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Played to the end.
    Finished,
    /// Playback-time failure (decode error, device lost, ...).
    Failed(String),
}

/// One-shot notifier a backend fires when playback ends on its own.
#[derive(Debug)]
pub struct PlaybackCompletion {
    tx: oneshot::Sender<PlaybackOutcome>,
}

impl PlaybackCompletion {
    /// Create a notifier and the receiving side the arbiter waits on.
    pub fn channel() -> (Self, oneshot::Receiver<PlaybackOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Report the outcome. Silently ignored if the session already ended.
    pub fn complete(self, outcome: PlaybackOutcome) {
        let _ = self.tx.send(outcome);
    }
}

/// Capability that produces spoken audio.
#[async_trait]
pub trait SpeechBackend: Send + Sync + 'static {
    /// Begin playback. Returns once audio is actually being produced.
    ///
    /// `completion` must be fired (or dropped) when playback ends on its own.
    async fn start(
        &self,
        request: PlaybackRequest,
        completion: PlaybackCompletion,
    ) -> Result<PlaybackHandle>;

    /// Stop producing sound for `handle`. Must not block.
    fn stop(&self, handle: &PlaybackHandle);

    /// Free every resource tied to `handle`.
    fn release(&self, handle: PlaybackHandle);
}
