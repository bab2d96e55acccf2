use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::error::{JukeboxError, Result};

/// Decoded PCM: interleaved `f32` samples at the source rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    pub signal: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioData {
    pub fn new(signal: Vec<f32>, sample_rate: u32, channels: u32) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(JukeboxError::Decode(format!(
                "invalid stream layout: {} Hz, {} channels",
                sample_rate, channels
            )));
        }
        if signal.len() % channels as usize != 0 {
            return Err(JukeboxError::Decode(format!(
                "{} samples do not divide into {} channels",
                signal.len(),
                channels
            )));
        }
        Ok(Self { signal, sample_rate, channels })
    }

    /// Sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.signal.len() / self.channels as usize
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Channel average.
    pub fn to_mono(&self) -> Vec<f32> {
        let ch = self.channels as usize;
        if ch == 1 {
            return self.signal.clone();
        }
        self.signal
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    }

    /// Interleaved samples for frames `[start, end)`, clamped to the buffer.
    pub fn frame_slice(&self, start: usize, end: usize) -> &[f32] {
        let ch = self.channels as usize;
        let end = end.min(self.frames());
        let start = start.min(end);
        &self.signal[start * ch..end * ch]
    }

    /// Owned copy of frames `[start, end)`.
    pub fn sub_range(&self, start: usize, end: usize) -> AudioData {
        AudioData {
            signal: self.frame_slice(start, end).to_vec(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

/// Mono mixdown of `audio` at `target_sr`, the signal every feature is computed from.
pub fn analysis_signal(audio: &AudioData, target_sr: u32) -> Result<Vec<f32>> {
    let mono = audio.to_mono();
    if audio.sample_rate == target_sr {
        return Ok(mono);
    }
    resample(mono, audio.sample_rate, target_sr)
}

/// Input frames fed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Band-limited sinc resampling of a mono signal.
///
/// The tail still inside the filter is flushed with silence, so the output
/// holds exactly `ceil(len * target_sr / source_sr)` samples.
pub fn resample(samples: Vec<f32>, source_sr: u32, target_sr: u32) -> Result<Vec<f32>> {
    if samples.is_empty() || source_sr == target_sr {
        return Ok(samples);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_sr as f64 / source_sr as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| JukeboxError::Decode(format!("resampler setup failed: {}", e)))?;

    let expected = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output: Vec<f32> = Vec::with_capacity(expected + resampler.output_frames_max());

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let next = resampler.input_frames_next();
        let chunk = [&samples[pos..pos + next]];
        let waves_out = resampler.process(&chunk[..], None).map_err(resample_error)?;
        output.extend_from_slice(&waves_out[0]);
        pos += next;
    }
    if pos < samples.len() {
        let chunk = [&samples[pos..]];
        let waves_out = resampler
            .process_partial(Some(&chunk[..]), None)
            .map_err(resample_error)?;
        output.extend_from_slice(&waves_out[0]);
    }
    while output.len() < expected {
        let waves_out = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(resample_error)?;
        if waves_out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&waves_out[0]);
    }

    output.truncate(expected);

    log::debug!(
        "Resampled {} -> {} Hz ({} -> {} samples)",
        source_sr,
        target_sr,
        samples.len(),
        output.len()
    );
    Ok(output)
}

fn resample_error(e: rubato::ResampleError) -> JukeboxError {
    JukeboxError::Decode(format!("resampling failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_mixdown_averages_channels() {
        let audio = AudioData::new(vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 8000, 2).unwrap();
        assert_eq!(audio.frames(), 3);
        assert_eq!(audio.to_mono(), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn frame_slice_is_interleaved_and_clamped() {
        let audio = AudioData::new((0..8).map(|x| x as f32).collect(), 8000, 2).unwrap();
        assert_eq!(audio.frame_slice(1, 3), &[2.0, 3.0, 4.0, 5.0]);
        assert_eq!(audio.frame_slice(3, 10), &[6.0, 7.0]);
        assert!(audio.frame_slice(5, 2).is_empty());
    }

    #[test]
    fn ragged_buffers_are_rejected() {
        assert!(matches!(
            AudioData::new(vec![0.0; 5], 44100, 2),
            Err(JukeboxError::Decode(_))
        ));
    }

    #[test]
    fn same_rate_analysis_signal_is_plain_mixdown() {
        let audio = AudioData::new(vec![0.2; 400], 22050, 2).unwrap();
        let mono = analysis_signal(&audio, 22050).unwrap();
        assert_eq!(mono.len(), 200);
        assert!(mono.iter().all(|&x| (x - 0.2).abs() < 1e-6));
    }

    #[test]
    fn downsampling_roughly_halves_length() {
        let input: Vec<f32> = (0..44100).map(|i| (i as f32 * 0.01).sin()).collect();
        let out = resample(input, 44100, 22050).unwrap();
        assert!((out.len() as i64 - 22050).abs() < 64, "got {}", out.len());
    }

    #[test]
    fn resampled_signal_keeps_its_tail_and_timing() {
        // Odd length so the last chunk is partial.
        let mut input = vec![0.0f32; 30001];
        input[12000] = 1.0;
        input[29990] = 1.0;
        let out = resample(input, 44100, 22050).unwrap();
        assert_eq!(out.len(), 15001);

        let peak_near = |centre: usize| {
            (centre - 8..(centre + 8).min(out.len()))
                .max_by(|&a, &b| out[a].abs().total_cmp(&out[b].abs()))
                .unwrap()
        };
        assert!(peak_near(6000).abs_diff(6000) <= 1);
        let tail = peak_near(14995);
        assert!(tail.abs_diff(14995) <= 1, "tail impulse at {}", tail);
        assert!(out[tail].abs() > 0.1, "tail impulse lost: {}", out[tail]);
    }

    #[test]
    fn upsampling_doubles_length() {
        let input: Vec<f32> = (0..10000).map(|i| (i as f32 * 0.02).sin()).collect();
        let out = resample(input, 22050, 44100).unwrap();
        assert_eq!(out.len(), 20000);
    }
}
