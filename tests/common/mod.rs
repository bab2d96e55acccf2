#![allow(dead_code)]

use std::f32::consts::PI;

use loopatron::{AudioData, ClusterConfig, JukeboxConfig, KMeansFidelity};

pub const SR: u32 = 22050;
pub const BPM: f32 = 120.0;

/// One tone per section with a decaying click on every beat.
pub fn click_track(section_freqs: &[f32], seconds_per_section: f32, sr: u32) -> Vec<f32> {
    let section_len = (seconds_per_section * sr as f32) as usize;
    let beat_len = (60.0 / BPM * sr as f32) as usize;
    let mut signal = Vec::with_capacity(section_len * section_freqs.len());
    for &freq in section_freqs {
        for i in 0..section_len {
            let n = signal.len();
            let t = n as f32 / sr as f32;
            let since_beat = (n % beat_len) as f32 / sr as f32;
            let click = 0.6 * (-since_beat * 60.0).exp() * (2.0 * PI * 2000.0 * t).sin();
            let tone = 0.3 * (2.0 * PI * freq * i as f32 / sr as f32).sin();
            signal.push(tone + click);
        }
    }
    signal
}

/// A-B-A-C-A-B, 4 seconds per section.
pub fn sectioned_audio() -> AudioData {
    let signal = click_track(&[440.0, 554.0, 440.0, 349.0, 440.0, 554.0], 4.0, SR);
    AudioData::new(signal, SR, 1).unwrap()
}

/// Same material as stereo at 44.1 kHz with half a second of leading silence.
pub fn stereo_audio() -> AudioData {
    let mono = click_track(&[440.0, 554.0, 440.0, 349.0], 4.0, 44100);
    let mut signal = vec![0.0f32; 2 * 22050];
    for s in mono {
        signal.push(s);
        signal.push(s * 0.8);
    }
    AudioData::new(signal, 44100, 2).unwrap()
}

/// Defaults with cheaper k-means so the suite stays quick.
pub fn fast_config() -> JukeboxConfig {
    JukeboxConfig {
        clustering: ClusterConfig {
            max_clusters: 12,
            search: KMeansFidelity::new(3, 50),
            refine: KMeansFidelity::new(5, 100),
            ..ClusterConfig::default()
        },
        ..JukeboxConfig::default()
    }
}
