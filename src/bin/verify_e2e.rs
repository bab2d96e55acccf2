//! Analyse one audio file end to end and print the result.
//!
//! Usage: `verify_e2e <audio file> [config.json] [recluster k]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use loopatron::{InfiniteJukebox, JukeboxConfig};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let audio_path = PathBuf::from(
        args.next()
            .ok_or_else(|| anyhow!("usage: verify_e2e <audio file> [config.json] [recluster k]"))?,
    );
    let config = match args.next() {
        Some(path) => JukeboxConfig::from_json_file(&path)
            .with_context(|| format!("reading config {}", path))?,
        None => JukeboxConfig::default(),
    };
    let recluster: Option<usize> = args
        .next()
        .map(|k| k.parse().context("recluster k must be an integer"))
        .transpose()?;

    println!("Stage 1: Analysing {} in the background...", audio_path.display());
    let jukebox = InfiniteJukebox::new(config).with_progress(Arc::new(|fraction: f32, message: &str| {
        println!("  [{:>3.0}%] {}", fraction * 100.0, message)
    }));
    let mut handle = jukebox.spawn_file(audio_path.clone());

    let mut track = loop {
        if let Some(result) = handle.try_wait() {
            break result.with_context(|| format!("analysing {}", audio_path.display()))?;
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    println!("Stage 2: Result");
    print!("{}", track.summary(true));

    if let Some(k) = recluster {
        println!("Stage 3: Reclustering to k={}...", k);
        track.recluster(k)?;
        print!("{}", track.summary(false));
    }

    let first = track
        .beats
        .first()
        .ok_or_else(|| anyhow!("analysis produced no beats"))?;
    println!(
        "First beat starts at source sample {} and spans {} samples",
        track.absolute_start_index(first),
        track.beat_samples(first).len()
    );
    Ok(())
}
