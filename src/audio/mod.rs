//! Speaker output via cpal, and the speech backend built on it.

pub mod playback;
pub mod speaker;

pub use playback::{CpalPlayback, PlayEnd};
pub use speaker::SpeakerBackend;
