//! Configuration types for the wakecue core.

use crate::arbiter::session::SpeechPayload;
use crate::dispatch::Reminder;
use crate::error::{Result, WakeError};
use crate::scheduler::next_fire::SNOOZE_MINUTES_DEFAULT;
use crate::scheduler::trigger::TriggerSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Exclusive audio arbitration settings.
    pub arbiter: ArbiterConfig,
    /// Trigger scheduling settings.
    pub scheduler: SchedulerConfig,
    /// Remote speech synthesis settings.
    pub tts: TtsConfig,
    /// Audio output settings.
    pub audio: AudioConfig,
    /// Configured reminders.
    pub reminders: Vec<ReminderConfig>,
}

/// Arbiter timing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Minimum spacing between accepted session starts, in milliseconds.
    pub cooldown_ms: u64,
    /// A playing session is force-stopped after this many seconds.
    pub session_expiry_secs: u64,
    /// Backend start attempts are abandoned after this many seconds.
    pub start_timeout_secs: u64,
    /// Capacity of the arbiter event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 3_000,
            session_expiry_secs: 120,
            start_timeout_secs: 15,
            event_capacity: 32,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Snooze length in minutes.
    pub snooze_minutes: u32,
    /// JSONL file used to drop duplicate wake deliveries (None = no dedupe).
    pub fire_ledger_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            snooze_minutes: SNOOZE_MINUTES_DEFAULT,
            fire_ledger_path: None,
        }
    }
}

/// Remote text-to-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Synthesis endpoint. Receives `{"text", "voice"}` and returns WAV.
    pub endpoint: String,
    /// Request timeout in seconds. Must stay below `arbiter.start_timeout_secs`.
    pub timeout_secs: u64,
    /// Voice used when a request carries no voice profile.
    pub default_voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8880/v1/speech".to_owned(),
            timeout_secs: 10,
            default_voice: "default".to_owned(),
        }
    }
}

/// Audio output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Linear gain applied to every sample.
    pub output_gain: f32,
    /// Log prompts instead of playing them.
    pub dry_run: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            output_gain: 1.0,
            dry_run: false,
        }
    }
}

/// One reminder as written in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub id: String,
    /// `"HH:MM"` local time.
    pub time: String,
    /// Active weekdays, 0 = Sunday .. 6 = Saturday. Empty = every day.
    pub weekdays: Vec<u8>,
    /// Text to synthesize. Mutually exclusive with `file`.
    pub text: Option<String>,
    /// Pre-recorded WAV prompt. Mutually exclusive with `text`.
    pub file: Option<PathBuf>,
    pub voice_profile: Option<String>,
}

impl ReminderConfig {
    /// Validate into a [`Reminder`].
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Schedule`] for a bad time or weekday and
    /// [`WakeError::Config`] when neither or both of `text` / `file` are set.
    pub fn to_reminder(&self) -> Result<Reminder> {
        let spec = TriggerSpec::parse(self.id.clone(), &self.time, &self.weekdays)
            .map_err(|e| WakeError::Schedule(format!("reminder '{}': {e}", self.id)))?;

        let payload = match (&self.text, &self.file) {
            (Some(text), None) => SpeechPayload::Text(text.clone()),
            (None, Some(file)) => SpeechPayload::File(file.clone()),
            (Some(_), Some(_)) => {
                return Err(WakeError::Config(format!(
                    "reminder '{}' sets both text and file",
                    self.id
                )));
            }
            (None, None) => {
                return Err(WakeError::Config(format!(
                    "reminder '{}' needs text or file",
                    self.id
                )));
            }
        };

        Ok(Reminder {
            spec,
            payload,
            voice_profile: self.voice_profile.clone().unwrap_or_default(),
        })
    }
}

impl WakeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| WakeError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| WakeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross-section consistency.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Config`] when `tts.timeout_secs` is not below
    /// `arbiter.start_timeout_secs`.
    pub fn validate(&self) -> Result<()> {
        if self.tts.timeout_secs >= self.arbiter.start_timeout_secs {
            return Err(WakeError::Config(format!(
                "tts.timeout_secs ({}) must be below arbiter.start_timeout_secs ({})",
                self.tts.timeout_secs, self.arbiter.start_timeout_secs
            )));
        }
        Ok(())
    }

    /// Validate every configured reminder.
    ///
    /// # Errors
    ///
    /// Returns the first invalid reminder's error.
    pub fn reminders(&self) -> Result<Vec<Reminder>> {
        self.reminders.iter().map(ReminderConfig::to_reminder).collect()
    }

    /// Returns the default config file path: `~/.config/wakecue/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("wakecue").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("wakecue")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/wakecue-config/config.toml")
        }
    }
}
