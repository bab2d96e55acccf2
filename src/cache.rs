//! # Beat Cache
//!
//! Persists an analysed track so it can be reopened without re-running the
//! feature pipeline. Two JSON files live in the cache directory per track:
//!
//! - `<key>.json`: amplitude, trim, cluster count and per-beat
//!   `(startIndex, cluster, amplitude)` records.
//! - `<key>.evecs.json`: the smoothed spectral embedding, only needed to
//!   recluster a cached track at a different cluster count.
//!
//! The key is the audio file's stem.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::analysis::embedding::SpectralEmbedding;
use crate::beat_graph::MIN_BEATS;
use crate::error::{JukeboxError, Result};

pub const CACHE_FORMAT_VERSION: u32 = 1;

const BEATS_EXTENSION: &str = "json";
const EMBEDDING_EXTENSION: &str = "evecs.json";

/// What [`BeatCache::remove`] deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOptions {
    /// Both the beat record and the embedding.
    Discard,
    /// Only the embedding; the beat record stays usable.
    KeepCache,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedBeat {
    pub start_index: usize,
    pub cluster: usize,
    pub amplitude: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub version: u32,
    pub avg_amplitude: f32,
    /// Leading beat intervals that were dropped before `beats`.
    pub start_beat: usize,
    pub clusters: usize,
    pub tempo: f32,
    pub start_index_origin: usize,
    /// Sample frames in the trimmed buffer.
    pub total_samples: usize,
    pub sample_rate: u32,
    pub beats: Vec<CachedBeat>,
}

impl CacheRecord {
    /// Adjust the record to a newly requested start beat.
    ///
    /// Only later start beats can be served: the intervals before the cached
    /// start beat were never stored.
    pub fn retarget(mut self, start_beat: usize) -> Result<Self> {
        if start_beat < self.start_beat {
            return Err(JukeboxError::CacheMismatch(format!(
                "cache starts at beat {}, cannot serve start beat {}",
                self.start_beat, start_beat
            )));
        }
        let drop = start_beat - self.start_beat;
        let remaining = self.beats.len().saturating_sub(drop);
        if remaining < MIN_BEATS {
            return Err(JukeboxError::CacheMismatch(format!(
                "start beat {} leaves {} cached beats",
                start_beat, remaining
            )));
        }
        self.beats.drain(..drop);
        self.start_beat = start_beat;
        Ok(self)
    }

    /// Reject a record made from a different rendition of the audio.
    pub fn check_source(&self, start_index_origin: usize, total_samples: usize, sample_rate: u32) -> Result<()> {
        if self.start_index_origin != start_index_origin
            || self.total_samples != total_samples
            || self.sample_rate != sample_rate
        {
            return Err(JukeboxError::CacheMismatch(format!(
                "cached audio was {} samples at {} Hz from offset {}, found {} samples at {} Hz from offset {}",
                self.total_samples,
                self.sample_rate,
                self.start_index_origin,
                total_samples,
                sample_rate,
                start_index_origin
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredEmbedding {
    rows: usize,
    cols: usize,
    evecs: Vec<f64>,
}

pub struct BeatCache {
    dir: PathBuf,
}

impl BeatCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn beats_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, BEATS_EXTENSION))
    }

    pub fn embedding_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, EMBEDDING_EXTENSION))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.beats_path(key).is_file()
    }

    pub fn save(&self, key: &str, record: &CacheRecord, embedding: Option<&SpectralEmbedding>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let mut writer = BufWriter::new(File::create(self.beats_path(key))?);
        serde_json::to_writer(&mut writer, record)?;
        writer.flush()?;

        if let Some(embedding) = embedding {
            let evecs = embedding.evecs();
            let stored = StoredEmbedding {
                rows: evecs.nrows(),
                cols: evecs.ncols(),
                evecs: evecs.iter().cloned().collect(),
            };
            let mut writer = BufWriter::new(File::create(self.embedding_path(key))?);
            serde_json::to_writer(&mut writer, &stored)?;
            writer.flush()?;
        }

        log::info!("Cached {} beats for '{}' in {}", record.beats.len(), key, self.dir.display());
        Ok(())
    }

    pub fn load(&self, key: &str) -> Result<CacheRecord> {
        let file = File::open(self.beats_path(key))?;
        let record: CacheRecord = serde_json::from_reader(BufReader::new(file))?;
        if record.version != CACHE_FORMAT_VERSION {
            return Err(JukeboxError::CacheMismatch(format!(
                "cache format {} is not {}",
                record.version, CACHE_FORMAT_VERSION
            )));
        }
        Ok(record)
    }

    /// `Ok(None)` when no embedding was stored for `key`.
    pub fn load_embedding(&self, key: &str) -> Result<Option<SpectralEmbedding>> {
        let path = self.embedding_path(key);
        if !path.is_file() {
            return Ok(None);
        }
        let file = File::open(path)?;
        let stored: StoredEmbedding = serde_json::from_reader(BufReader::new(file))?;
        let evecs = Array2::from_shape_vec((stored.rows, stored.cols), stored.evecs).map_err(|e| {
            JukeboxError::CacheMismatch(format!("stored embedding has the wrong shape: {}", e))
        })?;
        Ok(Some(SpectralEmbedding::from_evecs(evecs)))
    }

    pub fn remove(&self, key: &str, option: CacheOptions) -> Result<()> {
        if option == CacheOptions::Discard {
            remove_if_present(&self.beats_path(key))?;
        }
        remove_if_present(&self.embedding_path(key))
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            log::debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Cache key for an audio file: its stem.
pub fn cache_key_for<P: AsRef<Path>>(path: P) -> Option<String> {
    path.as_ref()
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(start_beat: usize, n: usize) -> CacheRecord {
        CacheRecord {
            version: CACHE_FORMAT_VERSION,
            avg_amplitude: 0.25,
            start_beat,
            clusters: 3,
            tempo: 120.0,
            start_index_origin: 512,
            total_samples: n * 100 + 50,
            sample_rate: 44100,
            beats: (0..n)
                .map(|i| CachedBeat {
                    start_index: i * 100,
                    cluster: i % 3,
                    amplitude: 0.25,
                })
                .collect(),
        }
    }

    #[test]
    fn record_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BeatCache::new(dir.path());
        let original = record(1, 10);
        cache.save("song", &original, None).unwrap();
        assert!(cache.contains("song"));
        assert_eq!(cache.load("song").unwrap(), original);
        assert!(cache.load_embedding("song").unwrap().is_none());
    }

    #[test]
    fn embedding_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BeatCache::new(dir.path());
        let evecs = Array2::from_shape_fn((5, 5), |(i, j)| (i * 5 + j) as f64 * 0.25 - 1.0);
        let embedding = SpectralEmbedding::from_evecs(evecs.clone());
        cache.save("song", &record(1, 5), Some(&embedding)).unwrap();

        let restored = cache.load_embedding("song").unwrap().unwrap();
        assert_eq!(restored.evecs(), &evecs);
        assert_eq!(restored.features(3), embedding.features(3));
    }

    #[test]
    fn retarget_drops_leading_beats() {
        let r = record(1, 10).retarget(4).unwrap();
        assert_eq!(r.start_beat, 4);
        assert_eq!(r.beats.len(), 7);
        assert_eq!(r.beats[0].start_index, 300);
    }

    #[test]
    fn retarget_rejects_earlier_or_exhausted_trim() {
        assert!(matches!(
            record(2, 10).retarget(1),
            Err(JukeboxError::CacheMismatch(_))
        ));
        assert!(matches!(
            record(1, 10).retarget(9),
            Err(JukeboxError::CacheMismatch(_))
        ));
        assert!(record(1, 10).retarget(1).is_ok());
    }

    #[test]
    fn source_check_detects_different_audio() {
        let r = record(1, 4);
        assert!(r.check_source(512, 450, 44100).is_ok());
        assert!(matches!(
            r.check_source(0, 450, 44100),
            Err(JukeboxError::CacheMismatch(_))
        ));
    }

    #[test]
    fn wrong_version_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BeatCache::new(dir.path());
        let mut r = record(1, 4);
        r.version = 99;
        cache.save("old", &r, None).unwrap();
        assert!(matches!(cache.load("old"), Err(JukeboxError::CacheMismatch(_))));
    }

    #[test]
    fn remove_honours_option() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BeatCache::new(dir.path());
        let embedding = SpectralEmbedding::from_evecs(Array2::eye(4));
        cache.save("a", &record(1, 4), Some(&embedding)).unwrap();

        cache.remove("a", CacheOptions::KeepCache).unwrap();
        assert!(cache.contains("a"));
        assert!(!cache.embedding_path("a").exists());

        cache.remove("a", CacheOptions::Discard).unwrap();
        assert!(!cache.contains("a"));
        // Removing again is not an error.
        cache.remove("a", CacheOptions::Discard).unwrap();
    }

    #[test]
    fn key_is_file_stem() {
        assert_eq!(cache_key_for("/music/Song Title.mp3").as_deref(), Some("Song Title"));
        assert_eq!(cache_key_for("/"), None);
    }
}
