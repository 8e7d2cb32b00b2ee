//! Session request and state types shared by the arbiter and its observers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which subsystem is asking for audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    /// A scheduled alarm fired.
    Scheduled,
    /// The user tapped "repeat" on a prompt.
    Repeat,
    /// One step of a morning routine or voice-command sequence.
    RoutineStep,
    /// Global reset; may stop any session.
    ForceStop,
}

impl fmt::Display for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Repeat => "repeat",
            Self::RoutineStep => "routine_step",
            Self::ForceStop => "force_stop",
        };
        f.write_str(s)
    }
}

/// What to speak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SpeechPayload {
    /// Literal text for remote synthesis.
    Text(String),
    /// Pre-recorded WAV file.
    File(PathBuf),
}

/// One playback attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSessionRequest {
    /// Caller-supplied id, usually the trigger identity.
    pub session_id: String,
    pub source: SessionSource,
    pub payload: SpeechPayload,
    /// Free-form personalisation string (e.g. the user's name).
    #[serde(default)]
    pub voice_profile: String,
}

impl AudioSessionRequest {
    pub fn new(
        session_id: impl Into<String>,
        source: SessionSource,
        payload: SpeechPayload,
        voice_profile: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            source,
            payload,
            voice_profile: voice_profile.into(),
        }
    }

    /// Text request with an empty voice profile.
    pub fn text(session_id: impl Into<String>, source: SessionSource, text: impl Into<String>) -> Self {
        Self::new(session_id, source, SpeechPayload::Text(text.into()), "")
    }
}

/// Arbiter lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    /// Accepted; backend start in progress.
    Starting,
    Playing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Playing => "playing",
        };
        f.write_str(s)
    }
}

/// Outcome of a session request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionDecision {
    /// New session accepted and starting.
    Accepted,
    /// Same session id already starting or playing; nothing changed.
    AlreadyActive,
    /// A different session is starting or playing.
    Busy,
    /// Too soon after the previous accepted start.
    Cooldown,
}

impl SessionDecision {
    /// `true` for [`Accepted`](Self::Accepted) and [`AlreadyActive`](Self::AlreadyActive).
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted | Self::AlreadyActive)
    }
}

/// Reason a request was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Busy,
    Cooldown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("busy"),
            Self::Cooldown => f.write_str("cooldown"),
        }
    }
}

/// Events published to the presentation layer. Read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterEvent {
    PhaseChanged {
        phase: Phase,
        session_id: Option<String>,
        source: Option<SessionSource>,
    },
    Rejected {
        session_id: String,
        source: SessionSource,
        reason: RejectReason,
    },
}
