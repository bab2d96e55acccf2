//! Onset envelope, global tempo and dynamic-programming beat placement.

use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::analysis::median_f64;

/// Beat tracking parameters.
#[derive(Debug, Clone)]
pub struct BeatTrackConfig {
    pub sample_rate: f32,
    pub hop_length: usize,
    /// STFT size the mel frames came from; sets the onset centring shift.
    pub n_fft: usize,
    /// Centre of the tempo prior.
    pub start_bpm: f32,
    /// Width of the tempo prior in octaves.
    pub std_bpm: f32,
    /// Autocorrelation window in seconds.
    pub ac_size: f32,
    pub max_tempo: f32,
    /// How strongly beat spacing is held to the global tempo.
    pub tightness: f32,
}

impl BeatTrackConfig {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    fn frame_rate(&self) -> f32 {
        self.sample_rate / self.hop_length as f32
    }
}

impl Default for BeatTrackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050.0,
            hop_length: 512,
            n_fft: 2048,
            start_bpm: 120.0,
            std_bpm: 1.0,
            ac_size: 8.0,
            max_tempo: 320.0,
            tightness: 100.0,
        }
    }
}

pub struct BeatProcessor {
    config: BeatTrackConfig,
}

impl BeatProcessor {
    pub fn new(config: BeatTrackConfig) -> Self {
        Self { config }
    }

    /// Tempo (BPM) and beat frame indices from a dB mel spectrogram `(frames, bands)`.
    pub fn process(&self, mel_db: &Array2<f32>) -> (f32, Vec<usize>) {
        let onset = self.onset_envelope(mel_db);
        self.track(&onset)
    }

    /// Median over bands of the positive first difference, shifted to frame centres.
    pub fn onset_envelope(&self, mel_db: &Array2<f32>) -> Vec<f32> {
        let n_frames = mel_db.nrows();
        let shift = 1 + self.config.n_fft / (2 * self.config.hop_length);
        let mut env = vec![0.0f32; n_frames];
        let mut diffs = Vec::with_capacity(mel_db.ncols());

        for t in shift..n_frames {
            // flux[j] compares frame j + 1 with frame j; env[t] = flux[t - shift]
            let j = t - shift;
            if j + 1 >= n_frames {
                break;
            }
            diffs.clear();
            diffs.extend(
                mel_db
                    .row(j + 1)
                    .iter()
                    .zip(mel_db.row(j).iter())
                    .map(|(&a, &b)| ((a - b).max(0.0)) as f64),
            );
            env[t] = median_f64(&mut diffs) as f32;
        }
        env
    }

    /// `(tempo, beat frames)`. Silent envelopes yield no beats.
    pub fn track(&self, onset: &[f32]) -> (f32, Vec<usize>) {
        if onset.iter().all(|&x| x == 0.0) {
            return (0.0, Vec::new());
        }
        let tempo = self.estimate_tempo(onset);
        let beats = self.place_beats(onset, tempo);
        log::debug!("Beat tracker: {:.1} BPM, {} beats", tempo, beats.len());
        (tempo, beats)
    }

    /// Mean local autocorrelation weighted by a log-normal prior around `start_bpm`.
    pub fn estimate_tempo(&self, onset: &[f32]) -> f32 {
        let cfg = &self.config;
        let win = ((cfg.ac_size * cfg.frame_rate()).round() as usize).max(2);
        let tempogram = mean_tempogram(onset, win);

        let mut best_lag = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for (lag, &strength) in tempogram.iter().enumerate().skip(1) {
            let bpm = 60.0 * cfg.frame_rate() / lag as f32;
            if bpm > cfg.max_tempo {
                continue;
            }
            let octaves = (bpm.log2() - cfg.start_bpm.log2()) / cfg.std_bpm;
            let log_prior = -0.5 * octaves * octaves;
            let score = (1.0 + 1e6 * strength).ln() + log_prior;
            if score > best_score {
                best_score = score;
                best_lag = lag;
            }
        }

        if best_lag == 0 {
            return cfg.start_bpm;
        }
        60.0 * cfg.frame_rate() / best_lag as f32
    }

    fn place_beats(&self, onset: &[f32], bpm: f32) -> Vec<usize> {
        let n = onset.len();
        if n == 0 || !(bpm > 0.0) {
            return Vec::new();
        }
        let period = (60.0 * self.config.frame_rate() / bpm).round().max(1.0) as isize;

        let std = sample_std(onset);
        if !(std > 0.0) {
            return Vec::new();
        }
        let normalized: Vec<f32> = onset.iter().map(|&x| x / std).collect();
        let local = local_score(&normalized, period);

        let (backlink, cumscore) = self.dynamic_program(&local, period);
        let Some(tail) = last_beat(&cumscore) else {
            return Vec::new();
        };

        let mut beats = vec![tail];
        let mut cursor = tail;
        while backlink[cursor] >= 0 {
            cursor = backlink[cursor] as usize;
            beats.push(cursor);
        }
        beats.reverse();
        beats
    }

    fn dynamic_program(&self, local: &[f32], period: isize) -> (Vec<isize>, Vec<f32>) {
        let n = local.len();
        let offsets: Vec<isize> = (-2 * period..=-((period as f32 / 2.0).round() as isize)).collect();
        let txwt: Vec<f32> = offsets
            .iter()
            .map(|&w| {
                let r = (-w as f32 / period as f32).ln();
                -self.config.tightness * r * r
            })
            .collect();

        let score_floor = 0.01 * local.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut backlink = vec![-1isize; n];
        let mut cumscore = vec![0.0f32; n];
        let mut first_beat = true;

        for i in 0..n {
            let mut best = f32::NEG_INFINITY;
            let mut best_prev = -1isize;
            for (&w, &tx) in offsets.iter().zip(&txwt) {
                let prev = i as isize + w;
                let candidate = if prev >= 0 { tx + cumscore[prev as usize] } else { tx };
                if candidate > best {
                    best = candidate;
                    best_prev = prev;
                }
            }
            cumscore[i] = local[i] + best;

            if first_beat && local[i] < score_floor {
                backlink[i] = -1;
            } else {
                backlink[i] = best_prev;
                first_beat = false;
            }
        }
        (backlink, cumscore)
    }
}

/// Gaussian-smoothed onset strength around each candidate beat.
fn local_score(onset: &[f32], period: isize) -> Vec<f32> {
    let window: Vec<f32> = (-period..=period)
        .map(|k| {
            let x = k as f32 * 32.0 / period as f32;
            (-0.5 * x * x).exp()
        })
        .collect();
    let half = period;
    let n = onset.len() as isize;
    (0..n)
        .map(|i| {
            window
                .iter()
                .enumerate()
                .map(|(k, &w)| {
                    let idx = i + half - k as isize;
                    if idx >= 0 && idx < n {
                        onset[idx as usize] * w
                    } else {
                        0.0
                    }
                })
                .sum()
        })
        .collect()
}

/// Final beat: the last local maximum of the cumulative score above half its median peak.
///
/// Only interior frames can be peaks; a score still rising into the last
/// frame says nothing about a beat there.
fn last_beat(cumscore: &[f32]) -> Option<usize> {
    let n = cumscore.len();
    if n == 0 {
        return None;
    }
    let is_max: Vec<bool> = (0..n)
        .map(|i| i > 0 && i + 1 < n && cumscore[i] > cumscore[i - 1] && cumscore[i] >= cumscore[i + 1])
        .collect();

    let mut peaks: Vec<f64> = cumscore
        .iter()
        .zip(&is_max)
        .filter(|(_, &m)| m)
        .map(|(&c, _)| c as f64)
        .collect();
    if peaks.is_empty() {
        return Some(n - 1);
    }
    let med = median_f64(&mut peaks) as f32;

    (0..n)
        .rev()
        .find(|&i| if is_max[i] { 2.0 * cumscore[i] } else { 0.0 } > med)
}

fn sample_std(x: &[f32]) -> f32 {
    if x.len() < 2 {
        return 0.0;
    }
    let mean = x.iter().sum::<f32>() / x.len() as f32;
    let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / (x.len() - 1) as f32;
    var.sqrt()
}

/// Time-averaged, per-frame max-normalised autocorrelation of Hann-windowed onset excerpts.
fn mean_tempogram(onset: &[f32], win: usize) -> Vec<f32> {
    let n = onset.len();
    let fft_len = (2 * win).next_power_of_two();
    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);
    let window = crate::analysis::spectrogram::hann_window(win);

    let mut acc = vec![0.0f32; win];
    let mut buf = vec![Complex::new(0.0f32, 0.0); fft_len];
    let half = win as isize / 2;

    for t in 0..n {
        buf.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        for (k, &w) in window.iter().enumerate() {
            let idx = t as isize - half + k as isize;
            if idx >= 0 && (idx as usize) < n {
                buf[k] = Complex::new(onset[idx as usize] * w, 0.0);
            }
        }
        forward.process(&mut buf);
        buf.iter_mut().for_each(|c| *c = Complex::new(c.norm_sqr(), 0.0));
        inverse.process(&mut buf);

        let peak = buf[..win].iter().map(|c| c.re.abs()).fold(0.0f32, f32::max);
        if peak > 0.0 {
            for (slot, c) in acc.iter_mut().zip(&buf[..win]) {
                *slot += c.re / peak;
            }
        }
    }

    if n > 0 {
        acc.iter_mut().for_each(|x| *x /= n as f32);
    }
    acc
}
