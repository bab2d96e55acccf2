use ndarray::Array2;
use std::f32::consts::PI;

use crate::analysis::cqt::CQTProcessor;
use crate::analysis::spectrogram::frame_rms;
use crate::beat_tracker::mel::MelProcessor;
use crate::beat_tracker::post_processor::MinimalPostProcessor;
use crate::beat_tracker::{BeatProcessor, BeatTrackConfig};
use crate::error::{JukeboxError, Result};

const HOP_LENGTH: usize = 512;
const N_FFT: usize = 2048;
const N_MELS: usize = 128;
const N_MFCC: usize = 20;
const CQT_FMIN: f32 = 32.703;
const CQT_BINS_PER_OCTAVE: usize = 36;
const CQT_OCTAVES: usize = 7;

/// Per-beat features. Row `i` describes the interval `boundaries[i]..boundaries[i + 1]`.
#[derive(Debug, Clone)]
pub struct BeatFeatures {
    pub tempo: f32,
    /// Frame indices; `len() == n_beats() + 1`.
    pub boundaries: Vec<usize>,
    /// Constant-Q log-magnitude (dB), median over each beat. `(beats, 252)`
    pub chroma: Array2<f64>,
    /// Mean MFCC per beat. `(beats, 20)`
    pub mfcc: Array2<f64>,
    pub n_frames: usize,
}

impl BeatFeatures {
    pub fn n_beats(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }
}

#[derive(Clone, Copy)]
enum Aggregate {
    Mean,
    Median,
}

pub struct FeatureExtractor {
    dct_matrix: Array2<f32>,
    cqt: CQTProcessor,
    mel: MelProcessor,
    beats: BeatProcessor,
    post: MinimalPostProcessor,
}

impl FeatureExtractor {
    pub fn new(sample_rate: f32) -> Self {
        // 7 octaves at 36 bins each from C1
        let cqt = CQTProcessor::with_hop(
            sample_rate,
            CQT_FMIN,
            CQT_BINS_PER_OCTAVE * CQT_OCTAVES,
            CQT_BINS_PER_OCTAVE,
            HOP_LENGTH,
        );
        let beats = BeatProcessor::new(BeatTrackConfig {
            hop_length: HOP_LENGTH,
            n_fft: N_FFT,
            ..BeatTrackConfig::new(sample_rate)
        });

        Self {
            dct_matrix: compute_dct_matrix(N_MELS, N_MFCC),
            cqt,
            mel: MelProcessor::new(sample_rate, N_FFT, HOP_LENGTH, N_MELS),
            beats,
            post: MinimalPostProcessor::new(),
        }
    }

    pub fn hop_length(&self) -> usize {
        HOP_LENGTH
    }

    /// Beat-synchronous chroma and MFCC plus the beat grid.
    ///
    /// The CQT and the beat tracker are independent; they run as a fork/join
    /// pair when more than one core is available.
    pub fn extract(&self, audio: &[f32]) -> Result<BeatFeatures> {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let (cqt, (mel_db, tempo, beat_frames)) = if cores > 1 {
            rayon::join(|| self.cqt.process(audio), || self.track_beats(audio))
        } else {
            (self.cqt.process(audio), self.track_beats(audio))
        };

        let n_frames = mel_db.nrows();
        let boundaries = self.post.boundaries(&beat_frames, n_frames);
        let n_beats = boundaries.len().saturating_sub(1);
        if n_beats < 3 {
            return Err(JukeboxError::InsufficientAudio(format!(
                "found {} beat intervals, need at least 3",
                n_beats
            )));
        }

        let cqt_db = amplitude_to_db(&cqt, 80.0);
        let chroma = sync_rows(&cqt_db, &boundaries, Aggregate::Median);

        let mfcc_frames = mel_db.dot(&self.dct_matrix.t());
        let mfcc = sync_rows(&mfcc_frames, &boundaries, Aggregate::Mean);

        log::info!(
            "Features: {} frames, {} beats, tempo {:.1} BPM",
            n_frames,
            n_beats,
            tempo
        );

        Ok(BeatFeatures {
            tempo,
            boundaries,
            chroma,
            mfcc,
            n_frames,
        })
    }

    /// Mean frame RMS over each beat interval.
    pub fn beat_amplitudes(&self, audio: &[f32], boundaries: &[usize]) -> Vec<f32> {
        let rms = frame_rms(audio, N_FFT, HOP_LENGTH);
        let frames = Array2::from_shape_vec((rms.len(), 1), rms)
            .unwrap_or_else(|_| Array2::zeros((0, 1)));
        sync_rows(&frames, boundaries, Aggregate::Mean)
            .column(0)
            .iter()
            .map(|&x| x as f32)
            .collect()
    }

    fn track_beats(&self, audio: &[f32]) -> (Array2<f32>, f32, Vec<usize>) {
        let mel_db = self.mel.process_db(audio);
        let (tempo, beats) = self.beats.process(&mel_db);
        (mel_db, tempo, beats)
    }
}

/// `20·log10(|x| / max|x|)` floored `top_db` below zero.
fn amplitude_to_db(magnitude: &Array2<f32>, top_db: f32) -> Array2<f32> {
    let amin = 1e-5f32;
    let peak = magnitude.iter().cloned().fold(0.0f32, f32::max).max(amin);
    let ref_db = 20.0 * peak.log10();
    magnitude.mapv(|x| (20.0 * x.max(amin).log10() - ref_db).max(-top_db))
}

/// Aggregate frame rows over each `[boundaries[i], boundaries[i + 1])`.
fn sync_rows(frames: &Array2<f32>, boundaries: &[usize], agg: Aggregate) -> Array2<f64> {
    let (n_time, n_dims) = frames.dim();
    let n_beats = boundaries.len().saturating_sub(1);
    let mut synced = Array2::<f64>::zeros((n_beats, n_dims));
    let mut values: Vec<f64> = Vec::new();

    for i in 0..n_beats {
        let start = boundaries[i].min(n_time);
        let end = boundaries[i + 1].min(n_time);
        if start >= end {
            // Boundary past the last frame: reuse the final frame.
            if n_time > 0 {
                let t = start.min(n_time - 1);
                for k in 0..n_dims {
                    synced[[i, k]] = frames[[t, k]] as f64;
                }
            }
            continue;
        }

        for k in 0..n_dims {
            synced[[i, k]] = match agg {
                Aggregate::Mean => {
                    let sum: f64 = (start..end).map(|t| frames[[t, k]] as f64).sum();
                    sum / (end - start) as f64
                }
                Aggregate::Median => {
                    values.clear();
                    values.extend((start..end).map(|t| frames[[t, k]] as f64));
                    crate::analysis::median_f64(&mut values)
                }
            };
        }
    }
    synced
}

fn compute_dct_matrix(n: usize, k: usize) -> Array2<f32> {
    let mut matrix = Array2::<f32>::zeros((k, n));
    let scale = (2.0 / n as f32).sqrt(); // Orthogonal normalization

    // Type-II DCT
    for i in 0..k {
        for j in 0..n {
            let v = (PI / n as f32 * (j as f32 + 0.5) * i as f32).cos();
            let s = if i == 0 { (1.0 / 2.0f32).sqrt() } else { 1.0 };
            matrix[[i, j]] = scale * s * v;
        }
    }
    matrix
}
