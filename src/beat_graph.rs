//! Final beat sequence: segments, successor pointers and jump candidates.

use serde::{Deserialize, Serialize};

use crate::error::{JukeboxError, Result};

/// Fewest beats a playable graph may have.
pub const MIN_BEATS: usize = 3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    pub id: usize,
    /// Seconds from the start of the trimmed buffer.
    pub start: f64,
    pub duration: f64,
    /// Half-open sample-frame range into the trimmed buffer.
    pub start_index: usize,
    pub stop_index: usize,
    pub amplitude: f32,
    pub cluster: usize,
    pub segment: usize,
    /// Position inside the segment.
    #[serde(rename = "is")]
    pub intra_segment_position: usize,
    pub quartile: usize,
    pub next: usize,
    pub jump_candidates: Vec<usize>,
}

/// Timing and loudness of one beat interval, independent of clustering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeatSpan {
    pub start_index: usize,
    pub amplitude: f32,
}

/// Build the playable beat list from every detected interval.
///
/// `spans` and `labels` cover all intervals; the first `start_beat` of them
/// are dropped before ids are assigned.
pub fn assemble(
    spans: &[BeatSpan],
    labels: &[usize],
    total_samples: usize,
    sample_rate: u32,
    start_beat: usize,
) -> Result<Vec<Beat>> {
    if spans.len() != labels.len() {
        return Err(JukeboxError::Config(format!(
            "{} beat intervals but {} cluster labels",
            spans.len(),
            labels.len()
        )));
    }
    let kept = spans.len().saturating_sub(start_beat);
    if kept < MIN_BEATS {
        return Err(JukeboxError::InsufficientAudio(format!(
            "{} beats remain after skipping {}, need at least {}",
            kept, start_beat, MIN_BEATS
        )));
    }
    if sample_rate == 0 {
        return Err(JukeboxError::Config("sample rate must be positive".into()));
    }

    let sr = sample_rate as f64;
    let spans = &spans[start_beat..];
    let labels = &labels[start_beat..];

    let mut beats: Vec<Beat> = spans
        .iter()
        .zip(labels)
        .enumerate()
        .map(|(id, (span, &cluster))| {
            let stop_index = spans
                .get(id + 1)
                .map_or(total_samples, |next| next.start_index)
                .max(span.start_index);
            Beat {
                id,
                start: span.start_index as f64 / sr,
                duration: (stop_index - span.start_index) as f64 / sr,
                start_index: span.start_index,
                stop_index,
                amplitude: span.amplitude,
                cluster,
                segment: 0,
                intra_segment_position: 0,
                quartile: 0,
                next: 0,
                jump_candidates: Vec::new(),
            }
        })
        .collect();

    link(&mut beats);
    Ok(beats)
}

/// Apply new cluster labels and rebuild everything that depends on them.
pub fn relabel(beats: &mut [Beat], labels: &[usize]) -> Result<()> {
    if beats.len() != labels.len() {
        return Err(JukeboxError::Config(format!(
            "{} beats but {} cluster labels",
            beats.len(),
            labels.len()
        )));
    }
    for (beat, &label) in beats.iter_mut().zip(labels) {
        beat.cluster = label;
    }
    link(beats);
    Ok(())
}

pub fn segment_count(beats: &[Beat]) -> usize {
    beats.iter().map(|b| b.segment + 1).max().unwrap_or(0)
}

/// Segments, positions, successors, quartiles and jump candidates from `cluster`.
fn link(beats: &mut [Beat]) {
    let n = beats.len();
    if n == 0 {
        return;
    }
    let quarter = n as f64 / 4.0;

    let mut segment = 0;
    let mut position = 0;
    for i in 0..n {
        if i > 0 {
            if beats[i].cluster != beats[i - 1].cluster {
                segment += 1;
                position = 0;
            } else {
                position += 1;
            }
        }
        let beat = &mut beats[i];
        beat.id = i;
        beat.segment = segment;
        beat.intra_segment_position = position;
        beat.quartile = (i as f64 / quarter) as usize;
        beat.next = if i + 1 < n { i + 1 } else { 0 };
    }

    let candidates: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            if i + 1 == n {
                return Vec::new();
            }
            let target = &beats[i + 1];
            beats[..i]
                .iter()
                .filter(|x| {
                    x.cluster == target.cluster
                        && x.intra_segment_position == target.intra_segment_position
                        && x.segment != beats[i].segment
                        && x.id != target.id
                })
                .map(|x| x.id)
                .collect()
        })
        .collect();

    for (beat, jumps) in beats.iter_mut().zip(candidates) {
        beat.jump_candidates = jumps;
    }
}
