//! Leading and trailing silence removal.

use crate::analysis::spectrogram::frame_rms;
use crate::audio::loader::AudioData;
use crate::error::{JukeboxError, Result};

/// Silence detection configuration
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    /// Frames quieter than this many dB below the loudest frame count as silence.
    pub top_db: f32,
    pub frame_length: usize,
    pub hop_length: usize,
}

impl Default for SilenceDetector {
    fn default() -> Self {
        Self {
            top_db: 60.0,
            frame_length: 2048,
            hop_length: 512,
        }
    }
}

/// A trimmed buffer and where it started in the source.
#[derive(Debug, Clone)]
pub struct Trimmed {
    pub audio: AudioData,
    /// Frame offset of `audio` within the untrimmed buffer.
    pub start_index_origin: usize,
}

impl SilenceDetector {
    pub fn new(top_db: f32) -> Self {
        Self { top_db, ..Self::default() }
    }

    /// Frame range `[start, end)` of the non-silent part of `audio`.
    pub fn non_silent_range(&self, audio: &AudioData) -> Option<(usize, usize)> {
        let mono = audio.to_mono();
        let rms = frame_rms(&mono, self.frame_length, self.hop_length);
        let peak = rms.iter().cloned().fold(0.0f32, f32::max);
        if peak <= 0.0 {
            return None;
        }

        let ref_power = (peak * peak).max(1e-10);
        let loud = |r: &f32| {
            let db = 10.0 * ((r * r).max(1e-10) / ref_power).log10();
            db > -self.top_db
        };

        let first = rms.iter().position(loud)?;
        let last = rms.iter().rposition(loud)?;

        let total = mono.len();
        let start = (first * self.hop_length).min(total);
        let end = ((last + 1) * self.hop_length).min(total);
        if start >= end {
            return None;
        }
        Some((start, end))
    }

    pub fn trim(&self, audio: &AudioData) -> Result<Trimmed> {
        let (start, end) = self.non_silent_range(audio).ok_or_else(|| {
            JukeboxError::InsufficientAudio("input contains only silence".to_string())
        })?;
        log::debug!(
            "Trimmed silence: kept frames {}..{} of {}",
            start,
            end,
            audio.frames()
        );
        Ok(Trimmed {
            audio: audio.sub_range(start, end),
            start_index_origin: start,
        })
    }
}
