use ndarray::{s, Array2};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::analysis::spectrogram::{centered_frame, centered_frame_count, hann_window};

const DECIMATION_TAPS: usize = 63;
const DECIMATION_CUTOFF: f32 = 0.225;
const KERNEL_SPARSITY: f32 = 0.01;

/// Constant-Q magnitude spectrogram.
///
/// Kernels are built once for the top octave. Lower octaves reuse them on a
/// signal decimated by two per octave, so every octave shares one FFT size and
/// the hop stays aligned with the full-rate frame grid.
pub struct CQTProcessor {
    n_bins: usize,
    bins_per_octave: usize,
    n_octaves: usize,
    hop_length: usize,
    fft: Arc<dyn Fft<f32>>,
    /// Per top-octave bin: sparse `(fft bin, conj(kernel) / fft_len)` pairs.
    kernels: Vec<Vec<(usize, Complex<f32>)>>,
    lowpass: Vec<f32>,
}

impl CQTProcessor {
    pub fn new(sample_rate: f32, fmin: f32, n_bins: usize, bins_per_octave: usize) -> Self {
        Self::with_hop(sample_rate, fmin, n_bins, bins_per_octave, 512)
    }

    pub fn with_hop(
        sample_rate: f32,
        fmin: f32,
        n_bins: usize,
        bins_per_octave: usize,
        hop_length: usize,
    ) -> Self {
        let n_octaves = n_bins.div_ceil(bins_per_octave).max(1);
        let q = 1.0 / (2.0f32.powf(1.0 / bins_per_octave as f32) - 1.0);
        let fmin_top = fmin * 2.0f32.powi(n_octaves as i32 - 1);

        let longest = (q * sample_rate / fmin_top).ceil() as usize;
        let fft_len = longest.max(2).next_power_of_two();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_len);

        let kernels = (0..bins_per_octave)
            .map(|b| {
                let freq = fmin_top * 2.0f32.powf(b as f32 / bins_per_octave as f32);
                build_kernel(freq, q, sample_rate, fft_len, &fft)
            })
            .collect();

        log::debug!(
            "CQT: {} bins, {} octaves, Q={:.2}, fft_len={}",
            n_bins,
            n_octaves,
            q,
            fft_len
        );

        Self {
            n_bins,
            bins_per_octave,
            n_octaves,
            hop_length,
            fft,
            kernels,
            lowpass: lowpass_filter(DECIMATION_TAPS, DECIMATION_CUTOFF),
        }
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Magnitudes, shape `(frames, n_bins)`, lowest bin first.
    pub fn process(&self, audio: &[f32]) -> Array2<f32> {
        let n_frames = centered_frame_count(audio.len(), self.hop_length);

        // levels[j] is the signal decimated j times.
        let mut levels: Vec<Vec<f32>> = Vec::with_capacity(self.n_octaves);
        levels.push(audio.to_vec());
        for j in 1..self.n_octaves {
            let next = decimate(&levels[j - 1], &self.lowpass);
            levels.push(next);
        }

        let blocks: Vec<(usize, Array2<f32>)> = levels
            .par_iter()
            .enumerate()
            .map(|(level, signal)| {
                let octave = self.n_octaves - 1 - level;
                (octave, self.octave_block(signal, level, n_frames))
            })
            .collect();

        let mut spectrogram = Array2::<f32>::zeros((n_frames, self.n_bins));
        for (octave, block) in blocks {
            let lo = octave * self.bins_per_octave;
            let hi = (lo + self.bins_per_octave).min(self.n_bins);
            if lo >= hi {
                continue;
            }
            spectrogram
                .slice_mut(s![.., lo..hi])
                .assign(&block.slice(s![.., 0..hi - lo]));
        }
        spectrogram
    }

    fn octave_block(&self, signal: &[f32], level: usize, n_frames: usize) -> Array2<f32> {
        let fft_len = self.fft.len();
        let mut block = Array2::<f32>::zeros((n_frames, self.bins_per_octave));
        let mut frame = vec![0.0f32; fft_len];
        let mut buf = vec![Complex::new(0.0f32, 0.0); fft_len];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];

        for t in 0..n_frames {
            let center = (t * self.hop_length) >> level;
            centered_frame(signal, center, &mut frame);
            for (slot, &x) in buf.iter_mut().zip(&frame) {
                *slot = Complex::new(x, 0.0);
            }
            self.fft.process_with_scratch(&mut buf, &mut scratch);

            for (b, kernel) in self.kernels.iter().enumerate() {
                let acc: Complex<f32> = kernel.iter().map(|&(k, w)| buf[k] * w).sum();
                block[[t, b]] = acc.norm();
            }
        }
        block
    }
}

fn build_kernel(
    freq: f32,
    q: f32,
    sample_rate: f32,
    fft_len: usize,
    fft: &Arc<dyn Fft<f32>>,
) -> Vec<(usize, Complex<f32>)> {
    if freq >= sample_rate / 2.0 {
        return Vec::new();
    }
    let len = ((q * sample_rate / freq).ceil() as usize).clamp(1, fft_len);
    let window = hann_window(len);
    let norm: f32 = window.iter().sum::<f32>().max(f32::EPSILON);
    let start = (fft_len - len) / 2;
    let omega = 2.0 * std::f32::consts::PI * freq / sample_rate;

    let mut buf = vec![Complex::new(0.0f32, 0.0); fft_len];
    for (n, &w) in window.iter().enumerate() {
        let phase = omega * (n as f32 - len as f32 / 2.0);
        buf[start + n] = Complex::from_polar(w / norm, phase);
    }
    fft.process(&mut buf);

    let peak = buf.iter().map(|c| c.norm()).fold(0.0f32, f32::max);
    let scale = 1.0 / fft_len as f32;
    buf.iter()
        .enumerate()
        .filter(|(_, c)| c.norm() >= KERNEL_SPARSITY * peak)
        .map(|(k, c)| (k, c.conj() * scale))
        .collect()
}

/// Hann-windowed sinc low-pass with unit DC gain. `cutoff` is in cycles per sample.
fn lowpass_filter(taps: usize, cutoff: f32) -> Vec<f32> {
    let mid = (taps - 1) as f32 / 2.0;
    let mut h: Vec<f32> = (0..taps)
        .map(|n| {
            let x = n as f32 - mid;
            let sinc = if x == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * std::f32::consts::PI * cutoff * x).sin() / (std::f32::consts::PI * x)
            };
            let w = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / (taps - 1) as f32).cos();
            sinc * w
        })
        .collect();
    let sum: f32 = h.iter().sum();
    if sum != 0.0 {
        h.iter_mut().for_each(|x| *x /= sum);
    }
    h
}

/// Low-pass then keep every second sample.
fn decimate(signal: &[f32], filter: &[f32]) -> Vec<f32> {
    let half = (filter.len() / 2) as isize;
    let out_len = signal.len().div_ceil(2);
    (0..out_len)
        .map(|m| {
            let center = (2 * m) as isize;
            filter
                .iter()
                .enumerate()
                .map(|(i, &h)| {
                    let idx = center + half - i as isize;
                    if idx >= 0 && (idx as usize) < signal.len() {
                        h * signal[idx as usize]
                    } else {
                        0.0
                    }
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect()
    }

    fn peak_bin(spec: &Array2<f32>, frame: usize) -> usize {
        spec.row(frame)
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (k, &v)| if v > acc.1 { (k, v) } else { acc })
            .0
    }

    #[test]
    fn shape_matches_frame_grid() {
        let cqt = CQTProcessor::new(22050.0, 32.703, 252, 36);
        let spec = cqt.process(&vec![0.0; 22050]);
        assert_eq!(spec.dim(), (1 + 22050 / 512, 252));
    }

    #[test]
    fn top_octave_tone_peaks_at_its_bin() {
        // A7 = 3520 Hz is 6 octaves and 9 semitones above C1 -> bin 6*36 + 9*3 = 243.
        let sr = 22050.0;
        let cqt = CQTProcessor::new(sr, 32.703, 252, 36);
        let spec = cqt.process(&sine(3520.0, sr, 22050));
        let bin = peak_bin(&spec, 20);
        assert!((bin as i64 - 243).abs() <= 1, "peak at {}", bin);
    }

    #[test]
    fn low_octave_tone_peaks_at_its_bin() {
        // A2 = 110 Hz is 1 octave and 9 semitones above C1 -> bin 36 + 27 = 63.
        let sr = 22050.0;
        let cqt = CQTProcessor::new(sr, 32.703, 252, 36);
        let spec = cqt.process(&sine(110.0, sr, 3 * 22050));
        let bin = peak_bin(&spec, 60);
        assert!((bin as i64 - 63).abs() <= 1, "peak at {}", bin);
    }

    #[test]
    fn decimation_preserves_dc() {
        let filter = lowpass_filter(DECIMATION_TAPS, DECIMATION_CUTOFF);
        let out = decimate(&vec![1.0; 1000], &filter);
        assert_eq!(out.len(), 500);
        assert!((out[250] - 1.0).abs() < 1e-4);
    }
}
