//! Speaker-backed [`SpeechBackend`].
//!
//! Text payloads go through the remote synthesizer, file payloads are read
//! from disk. The clip then plays on a blocking thread that owns the cpal
//! stream; the handle's stop flag ends it early.

use crate::arbiter::backend::{
    PlaybackCompletion, PlaybackHandle, PlaybackOutcome, PlaybackRequest, SpeechBackend,
};
use crate::arbiter::session::SpeechPayload;
use crate::audio::playback::{CpalPlayback, PlayEnd};
use crate::config::AudioConfig;
use crate::error::{Result, WakeError};
use crate::tts::{AudioClip, RemoteSynthesizer};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Plays prompts on the local output device.
pub struct SpeakerBackend {
    synthesizer: Option<RemoteSynthesizer>,
    audio: AudioConfig,
    stop_flags: Mutex<HashMap<u64, Arc<AtomicBool>>>,
}

impl SpeakerBackend {
    /// `synthesizer` may be `None` for hosts that only play recorded files.
    pub fn new(synthesizer: Option<RemoteSynthesizer>, audio: AudioConfig) -> Self {
        Self {
            synthesizer,
            audio,
            stop_flags: Mutex::new(HashMap::new()),
        }
    }

    fn flags(&self) -> MutexGuard<'_, HashMap<u64, Arc<AtomicBool>>> {
        self.stop_flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load_clip(&self, request: &PlaybackRequest) -> Result<AudioClip> {
        let clip = match &request.payload {
            SpeechPayload::Text(text) => {
                let synthesizer = self.synthesizer.as_ref().ok_or_else(|| {
                    WakeError::Tts("text prompt but no synthesizer configured".to_owned())
                })?;
                synthesizer.synthesize(text, &request.voice_profile).await?
            }
            SpeechPayload::File(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || AudioClip::from_wav_file(&path))
                    .await
                    .map_err(|e| WakeError::Tts(format!("clip loader panicked: {e}")))??
            }
        };

        if clip.is_empty() {
            return Err(WakeError::Tts("prompt decoded to no audio".to_owned()));
        }
        Ok(clip)
    }
}

#[async_trait]
impl SpeechBackend for SpeakerBackend {
    async fn start(
        &self,
        request: PlaybackRequest,
        completion: PlaybackCompletion,
    ) -> Result<PlaybackHandle> {
        let clip = self.load_clip(&request).await?;
        debug!(
            session_id = %request.session_id,
            duration_ms = clip.duration().as_millis() as u64,
            "prompt ready"
        );

        let handle = PlaybackHandle::allocate();
        let stop = Arc::new(AtomicBool::new(false));
        self.flags().insert(handle.id(), Arc::clone(&stop));
        // Raises and forgets the flag if this future is dropped before commit.
        let pending = PendingStart {
            flags: &self.stop_flags,
            id: handle.id(),
            stop: Arc::clone(&stop),
            committed: false,
        };

        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let audio = self.audio.clone();
        let session_id = request.session_id.clone();

        tokio::task::spawn_blocking(move || {
            let mut ready = Some(ready_tx);
            if stop.load(Ordering::Acquire) {
                debug!(session_id = %session_id, "start abandoned before playback");
                return;
            }
            let result = CpalPlayback::new(&audio)
                .and_then(|playback| playback.play(&clip, &stop, || signal_ready(&mut ready, &stop)));

            match (ready.take(), result) {
                // Failed before the stream went live: report through start().
                (Some(tx), Err(e)) => {
                    let _ = tx.send(Err(e));
                }
                (Some(tx), Ok(_)) => {
                    let _ = tx.send(Err(WakeError::Audio(
                        "playback ended without starting".to_owned(),
                    )));
                }
                (None, Ok(PlayEnd::Completed)) => completion.complete(PlaybackOutcome::Finished),
                (None, Ok(PlayEnd::Stopped)) => {
                    debug!(session_id = %session_id, "playback stopped");
                }
                (None, Err(e)) => {
                    warn!(session_id = %session_id, "playback failed: {e}");
                    completion.complete(PlaybackOutcome::Failed(e.to_string()));
                }
            }
        });

        ready_rx
            .await
            .map_err(|_| WakeError::Audio("playback thread exited before starting".to_owned()))??;

        pending.commit();
        info!(session_id = %request.session_id, handle = handle.id(), "playback started");
        Ok(handle)
    }

    fn stop(&self, handle: &PlaybackHandle) {
        if let Some(flag) = self.flags().get(&handle.id()) {
            flag.store(true, Ordering::Release);
        }
    }

    fn release(&self, handle: PlaybackHandle) {
        if let Some(flag) = self.flags().remove(&handle.id()) {
            // A released handle must never keep sounding.
            flag.store(true, Ordering::Release);
        }
    }
}

/// Stop flag of a `start` still in flight.
///
/// Dropping it uncommitted raises the flag and forgets it.
struct PendingStart<'a> {
    flags: &'a Mutex<HashMap<u64, Arc<AtomicBool>>>,
    id: u64,
    stop: Arc<AtomicBool>,
    committed: bool,
}

impl PendingStart<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.stop.store(true, Ordering::Release);
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Tell `start` the stream is live. If `start` is gone, stop the stream.
fn signal_ready(ready: &mut Option<oneshot::Sender<Result<()>>>, stop: &AtomicBool) {
    if let Some(tx) = ready.take() {
        if tx.send(Ok(())).is_err() {
            warn!("start abandoned while opening the stream; stopping playback");
            stop.store(true, Ordering::Release);
        }
    }
}
