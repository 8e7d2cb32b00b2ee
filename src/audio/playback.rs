//! Audio playback to system speakers via cpal.
//!
//! The stream always runs at the device's default output config. Clips are
//! resampled to its rate and each mono sample is written to every channel.

use crate::config::AudioConfig;
use crate::error::{Result, WakeError};
use crate::tts::AudioClip;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

/// Poll interval while waiting for playback to finish or be stopped.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a blocking playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayEnd {
    /// Every sample was played.
    Completed,
    /// The stop flag was raised.
    Stopped,
}

/// Audio playback to system speakers via cpal.
pub struct CpalPlayback {
    device: cpal::Device,
    stream_config: StreamConfig,
    gain: f32,
}

impl CpalPlayback {
    /// Open the configured output device (or the system default).
    ///
    /// # Errors
    ///
    /// Returns an error if no matching output device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| WakeError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| WakeError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| WakeError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        let default_config = device
            .default_output_config()
            .map_err(|e| WakeError::Audio(format!("no default output config: {e}")))?;
        let stream_config = StreamConfig {
            channels: default_config.channels().max(1),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(
            "native output config: {}Hz, {} channels",
            stream_config.sample_rate, stream_config.channels
        );

        Ok(Self {
            device,
            stream_config,
            gain: config.output_gain,
        })
    }

    /// Play `clip`, blocking until it finishes or `stop` is raised.
    ///
    /// `on_started` runs once the output stream is live.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be built or started, or if the
    /// device reports a stream error mid-playback.
    pub fn play(
        &self,
        clip: &AudioClip,
        stop: &AtomicBool,
        on_started: impl FnOnce(),
    ) -> Result<PlayEnd> {
        let native_rate = self.stream_config.sample_rate;
        let channels = usize::from(self.stream_config.channels);
        if clip.sample_rate != native_rate {
            debug!("resampling prompt from {}Hz to {native_rate}Hz", clip.sample_rate);
        }

        let gain = self.gain;
        let buffer = Arc::new(Mutex::new(PlaybackBuffer::new(
            resample_linear(&clip.samples, clip.sample_rate, native_rate)
                .into_iter()
                .map(|s| (s * gain).clamp(-1.0, 1.0))
                .collect(),
        )));
        let stream_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let buffer_clone = Arc::clone(&buffer);
        let error_clone = Arc::clone(&stream_error);

        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    if let Ok(mut buf) = buffer_clone.lock() {
                        buf.fill_frames(data, channels);
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                    if let Ok(mut slot) = error_clone.lock() {
                        slot.get_or_insert_with(|| err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| WakeError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| WakeError::Audio(format!("failed to start output stream: {e}")))?;
        on_started();

        let end = loop {
            std::thread::sleep(POLL_INTERVAL);
            if stop.load(Ordering::Acquire) {
                break PlayEnd::Stopped;
            }
            if let Some(err) = stream_error
                .lock()
                .map_err(|e| WakeError::Audio(format!("stream error slot poisoned: {e}")))?
                .take()
            {
                return Err(WakeError::Audio(format!("playback interrupted: {err}")));
            }
            let buf = buffer
                .lock()
                .map_err(|e| WakeError::Audio(format!("playback buffer lock poisoned: {e}")))?;
            if buf.finished {
                break PlayEnd::Completed;
            }
        };

        drop(stream);
        Ok(end)
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| WakeError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

impl PlaybackBuffer {
    fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            position: 0,
            finished: false,
        }
    }

    /// Write the next mono samples into interleaved `data`, one per frame,
    /// copied to all `channels`. Pads with silence once exhausted.
    fn fill_frames(&mut self, data: &mut [f32], channels: usize) {
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = match self.samples.get(self.position) {
                Some(&s) => {
                    self.position += 1;
                    s
                }
                None => {
                    self.finished = true;
                    0.0
                }
            };
            frame.fill(sample);
        }
    }
}

/// Linear-interpolation resample of mono samples.
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == 0 || to_rate == 0 || from_rate == to_rate {
        return samples.to_vec();
    }

    let step = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / step).round() as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let lo = (pos.floor() as usize).min(last);
            let hi = (lo + 1).min(last);
            let frac = (pos - lo as f64) as f32;
            samples[lo] + (samples[hi] - samples[lo]) * frac
        })
        .collect()
}
