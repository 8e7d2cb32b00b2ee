//! Decoded mono audio clips.

use crate::error::{Result, WakeError};
use std::io::Read;
use std::path::Path;

/// Mono f32 samples in [-1, 1] at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Decode a WAV byte buffer (e.g. a synthesis response body).
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Tts`] if the bytes are not a readable WAV.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let reader = hound::WavReader::new(std::io::Cursor::new(bytes))
            .map_err(|e| WakeError::Tts(format!("cannot decode WAV response: {e}")))?;
        decode(reader)
    }

    /// Decode a pre-recorded WAV file.
    ///
    /// # Errors
    ///
    /// Returns [`WakeError::Tts`] if the file is missing or not a readable WAV.
    pub fn from_wav_file(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| WakeError::Tts(format!("cannot open WAV {}: {e}", path.display())))?;
        decode(reader)
    }

    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn decode<R: Read>(mut reader: hound::WavReader<R>) -> Result<AudioClip> {
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(WakeError::Tts("WAV declares zero channels".to_owned()));
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map_err(|e| WakeError::Tts(format!("WAV read error: {e}")))
                        .map(|v| v as f32 / max)
                })
                .collect::<Result<Vec<f32>>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| WakeError::Tts(format!("WAV read error: {e}"))))
            .collect::<Result<Vec<f32>>>()?,
    };

    let samples = if spec.channels > 1 {
        let ch = usize::from(spec.channels);
        samples
            .chunks(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    } else {
        samples
    };

    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Encode samples as 16-bit PCM WAV bytes.
#[cfg(test)]
pub(crate) fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for s in samples {
            writer
                .write_sample((s * f32::from(i16::MAX)) as i16)
                .expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}
