use ndarray::Array2;

use crate::analysis::spectrogram::{power_to_db, PowerSpectrogram};

fn hz_to_mel(hz: f64) -> f64 {
    // Slaney scale: linear below 1 kHz, logarithmic above.
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        f_sp * mel
    }
}

/// Slaney-normalised triangular filters, shape `(n_mels, n_fft / 2 + 1)`.
pub fn mel_filterbank(sample_rate: f32, n_fft: usize, n_mels: usize) -> Array2<f32> {
    let n_bins = n_fft / 2 + 1;
    let fmax = sample_rate as f64 / 2.0;

    let mel_max = hz_to_mel(fmax);
    let mel_f: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let mut weights = Array2::<f32>::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let lower_width = (mel_f[m + 1] - mel_f[m]).max(f64::EPSILON);
        let upper_width = (mel_f[m + 2] - mel_f[m + 1]).max(f64::EPSILON);
        let enorm = 2.0 / (mel_f[m + 2] - mel_f[m]).max(f64::EPSILON);
        for (k, &f) in fft_freqs.iter().enumerate() {
            let lower = (f - mel_f[m]) / lower_width;
            let upper = (mel_f[m + 2] - f) / upper_width;
            let w = lower.min(upper).max(0.0);
            weights[[m, k]] = (w * enorm) as f32;
        }
    }
    weights
}

/// Mel power spectrogram: 2048-point STFT through a 128-band filterbank.
pub struct MelProcessor {
    stft: PowerSpectrogram,
    filterbank: Array2<f32>,
}

impl MelProcessor {
    pub fn new(sample_rate: f32, n_fft: usize, hop_length: usize, n_mels: usize) -> Self {
        Self {
            stft: PowerSpectrogram::new(n_fft, hop_length),
            filterbank: mel_filterbank(sample_rate, n_fft, n_mels),
        }
    }

    pub fn n_fft(&self) -> usize {
        self.stft.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.stft.hop_length
    }

    pub fn n_mels(&self) -> usize {
        self.filterbank.nrows()
    }

    /// Linear mel power, shape `(frames, n_mels)`.
    pub fn process(&self, samples: &[f32]) -> Array2<f32> {
        let power = self.stft.process(samples);
        power.dot(&self.filterbank.t())
    }

    /// Mel power in dB relative to 1.0, floored 80 dB below the peak.
    pub fn process_db(&self, samples: &[f32]) -> Array2<f32> {
        power_to_db(&self.process(samples), 1.0, 1e-10, Some(80.0))
    }
}
