use ndarray::Array2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Periodic Hann window.
pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / len as f32).cos()))
        .collect()
}

/// Number of centred frames for a signal of `len` samples.
pub fn centered_frame_count(len: usize, hop_length: usize) -> usize {
    1 + len / hop_length
}

/// Copy the frame centred on `center` into `out`, zero-padding outside the signal.
pub(crate) fn centered_frame(signal: &[f32], center: usize, out: &mut [f32]) {
    let half = out.len() / 2;
    let start = center as isize - half as isize;
    for (i, slot) in out.iter_mut().enumerate() {
        let idx = start + i as isize;
        *slot = if idx >= 0 && (idx as usize) < signal.len() {
            signal[idx as usize]
        } else {
            0.0
        };
    }
}

/// Short-time power spectrum with centred Hann-windowed frames.
pub struct PowerSpectrogram {
    pub n_fft: usize,
    pub hop_length: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl PowerSpectrogram {
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);
        Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            fft,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// |STFT|², shape `(frames, n_fft / 2 + 1)`.
    pub fn process(&self, audio: &[f32]) -> Array2<f32> {
        let n_frames = centered_frame_count(audio.len(), self.hop_length);
        let n_bins = self.n_bins();
        let mut spec = Array2::<f32>::zeros((n_frames, n_bins));

        let mut frame = vec![0.0f32; self.n_fft];
        let mut buf = vec![Complex::new(0.0f32, 0.0); self.n_fft];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];

        for t in 0..n_frames {
            centered_frame(audio, t * self.hop_length, &mut frame);
            for (slot, (&s, &w)) in buf.iter_mut().zip(frame.iter().zip(&self.window)) {
                *slot = Complex::new(s * w, 0.0);
            }
            self.fft.process_with_scratch(&mut buf, &mut scratch);
            for (k, c) in buf.iter().take(n_bins).enumerate() {
                spec[[t, k]] = c.norm_sqr();
            }
        }
        spec
    }
}

/// Root-mean-square energy of centred frames.
pub fn frame_rms(audio: &[f32], frame_length: usize, hop_length: usize) -> Vec<f32> {
    let n_frames = centered_frame_count(audio.len(), hop_length);
    let mut frame = vec![0.0f32; frame_length];
    (0..n_frames)
        .map(|t| {
            centered_frame(audio, t * hop_length, &mut frame);
            let energy: f32 = frame.iter().map(|x| x * x).sum();
            (energy / frame_length as f32).sqrt()
        })
        .collect()
}

/// `10·log10(S / ref)` with an `amin` floor, clipped to `top_db` below the peak.
pub fn power_to_db(spec: &Array2<f32>, reference: f32, amin: f32, top_db: Option<f32>) -> Array2<f32> {
    let ref_db = 10.0 * reference.max(amin).log10();
    let mut db = spec.mapv(|x| 10.0 * x.max(amin).log10() - ref_db);
    if let Some(top) = top_db {
        let peak = db.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let floor = peak - top;
        db.mapv_inplace(|x| x.max(floor));
    }
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_energy_lands_in_expected_bin() {
        let sr = 22050.0;
        let freq = 1000.0;
        let audio: Vec<f32> = (0..8192)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect();
        let spec = PowerSpectrogram::new(2048, 512).process(&audio);
        assert_eq!(spec.nrows(), 1 + 8192 / 512);

        let row = spec.row(8);
        let (peak_bin, _) = row
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |acc, (k, &v)| if v > acc.1 { (k, v) } else { acc });
        let expected = (freq * 2048.0 / sr).round() as usize;
        assert!((peak_bin as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn rms_of_constant_signal() {
        let rms = frame_rms(&vec![0.5; 10000], 2048, 512);
        // Fully-interior frames see only the constant.
        assert!((rms[10] - 0.5).abs() < 1e-5);
        // The first frame is half zero padding.
        assert!(rms[0] < rms[10]);
    }

    #[test]
    fn power_to_db_clips_to_top_db() {
        let spec = Array2::from_shape_vec((1, 3), vec![1.0, 1e-3, 1e-12]).unwrap();
        let db = power_to_db(&spec, 1.0, 1e-10, Some(80.0));
        assert!((db[[0, 0]] - 0.0).abs() < 1e-4);
        assert!((db[[0, 1]] + 30.0).abs() < 1e-3);
        assert!((db[[0, 2]] + 80.0).abs() < 1e-3);
    }
}
