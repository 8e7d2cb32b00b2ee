//! Exclusive spoken-audio arbitration.
//!
//! Every producer of spoken audio (scheduled wakes, repeat taps, routine
//! steps) asks the [`AudioArbiter`] for a session; at most one plays at a time.

pub mod backend;
pub mod exclusive;
pub mod scripted;
pub mod session;

pub use backend::{
    PlaybackCompletion, PlaybackHandle, PlaybackOutcome, PlaybackRequest, SpeechBackend,
};
pub use exclusive::AudioArbiter;
pub use session::{
    ArbiterEvent, AudioSessionRequest, Phase, RejectReason, SessionDecision, SessionSource,
    SpeechPayload,
};
