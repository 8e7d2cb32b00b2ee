//! Remote speech synthesis over HTTP.
//!
//! The synthesis service is opaque: it receives `{"text", "voice"}` as JSON
//! and answers with a WAV body.

use crate::config::TtsConfig;
use crate::error::{Result, WakeError};
use crate::tts::clip::AudioClip;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Longest response-body excerpt kept in error messages.
const ERROR_BODY_EXCERPT: usize = 200;

/// HTTP client for the remote TTS endpoint.
#[derive(Debug, Clone)]
pub struct RemoteSynthesizer {
    endpoint: String,
    default_voice: String,
    client: reqwest::Client,
}

impl RemoteSynthesizer {
    /// Build a synthesizer from config.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Config`] for an empty endpoint or if the HTTP
    /// client cannot be built.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(WakeError::Config("tts.endpoint must not be empty".to_owned()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| WakeError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            default_voice: config.default_voice.clone(),
            client,
        })
    }

    /// Synthesize `text` with `voice` (empty = configured default voice).
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Tts`] on transport failure, a non-2xx status, or
    /// an undecodable body.
    pub async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioClip> {
        let text = text.trim();
        if text.is_empty() {
            return Err(WakeError::Tts("nothing to synthesize".to_owned()));
        }
        let voice = if voice.trim().is_empty() {
            self.default_voice.as_str()
        } else {
            voice
        };

        debug!(endpoint = %self.endpoint, voice, chars = text.len(), "requesting synthesis");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "text": text, "voice": voice }))
            .send()
            .await
            .map_err(|e| WakeError::Tts(format!("synthesis request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
            return Err(WakeError::Tts(format!(
                "synthesis returned {status}: {excerpt}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| WakeError::Tts(format!("cannot read synthesis body: {e}")))?;
        let clip = AudioClip::from_wav_bytes(&bytes)?;
        debug!(
            samples = clip.samples.len(),
            sample_rate = clip.sample_rate,
            "synthesis complete"
        );
        Ok(clip)
    }
}
