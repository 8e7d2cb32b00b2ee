//! Speech audio sources: remote synthesis and pre-recorded WAV prompts.
//!
//! Both resolve to an [`AudioClip`] of mono f32 samples that the speaker
//! backend hands to the output device.

pub mod clip;
pub mod remote;

pub use clip::AudioClip;
pub use remote::RemoteSynthesizer;
