use std::f32::consts::PI;
use std::sync::Arc;

use anyhow::{bail, Result};
use loopatron::{AudioData, InfiniteJukebox, JukeboxConfig};

const SR: u32 = 22050;
const BPM: f32 = 120.0;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!(">>> Starting Segmentation Verification (Synthetic)");

    // Structure: A (10s) - B (10s) - A (10s) - C (10s), clicks at 120 BPM.
    println!("  Generating Audio...");
    let mut signal = Vec::new();
    for freq in [440.0, 554.0, 440.0, 349.0] {
        signal.extend(generate_section(freq, 10.0));
    }
    let audio = AudioData::new(signal, SR, 1)?;

    let jukebox = InfiniteJukebox::new(JukeboxConfig::default()).with_progress(Arc::new(
        |fraction: f32, message: &str| println!("  [{:>3.0}%] {}", fraction * 100.0, message),
    ));
    let track = jukebox.analyze(audio)?;
    print!("{}", track.summary(true));

    let beats = &track.beats;
    let n = beats.len();
    for (i, b) in beats.iter().enumerate() {
        let expected_next = if i + 1 == n { 0 } else { i + 1 };
        if b.next != expected_next {
            bail!("beat {} points at {} instead of {}", i, b.next, expected_next);
        }
        for &x in &b.jump_candidates {
            let t = &beats[b.next];
            let x = &beats[x];
            if x.id >= b.id || x.cluster != t.cluster || x.segment == b.segment {
                bail!("beat {} lists an invalid jump to {}", i, x.id);
            }
        }
    }

    // Beats 5 seconds into the two A sections should share a cluster.
    let beat_at = |seconds: f64| beats.iter().rposition(|b| b.start <= seconds);
    match (beat_at(5.0), beat_at(25.0)) {
        (Some(a1), Some(a2)) if beats[a1].cluster == beats[a2].cluster => {
            println!("  A sections share cluster {}", beats[a1].cluster);
        }
        (Some(a1), Some(a2)) => {
            println!(
                "  WARNING: A sections landed in clusters {} and {}",
                beats[a1].cluster, beats[a2].cluster
            );
        }
        _ => bail!("no beats found in the A sections"),
    }

    let jumps: usize = beats.iter().map(|b| b.jump_candidates.len()).sum();
    println!(">>> Done: {} beats, {} jump edges", n, jumps);
    Ok(())
}

/// Sustained tone with a decaying click on every beat.
fn generate_section(freq: f32, seconds: f32) -> Vec<f32> {
    let len = (seconds * SR as f32) as usize;
    let beat_len = (60.0 / BPM * SR as f32) as usize;
    (0..len)
        .map(|i| {
            let t = i as f32 / SR as f32;
            let tone = 0.3 * (2.0 * PI * freq * t).sin();
            let since_beat = (i % beat_len) as f32 / SR as f32;
            let click = 0.6 * (-since_beat * 60.0).exp() * (2.0 * PI * 2000.0 * t).sin();
            tone + click
        })
        .collect()
}
