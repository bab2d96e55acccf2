//! # Configuration
//!
//! Every knob the pipeline reads lives in [`JukeboxConfig`]. All fields carry
//! defaults, so a JSON file only needs the keys it wants to override:
//!
//! ```json
//! { "clusters": 0, "maxClusters": 48, "strategy": "silhouette", "cacheDir": "/tmp/jukebox" }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{JukeboxError, Result};

/// How the cluster count is chosen when the caller asks for auto-selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Fitness = k × silhouette × segment ratio, scanned from the top down.
    Silhouette,
    /// Largest k whose mean per-cluster segment count reaches the target ratio.
    Heuristic,
}

/// k-means restart count and iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KMeansFidelity {
    pub n_runs: usize,
    pub max_iterations: u64,
}

impl KMeansFidelity {
    pub const fn new(n_runs: usize, max_iterations: u64) -> Self {
        Self { n_runs, max_iterations }
    }
}

/// Settings the cluster selector needs. Kept separate so a finished `Track`
/// can recluster without holding the whole configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Upper bound of the silhouette search.
    pub max_clusters: usize,
    pub strategy: StrategyKind,
    /// Fitness multiplier applied when some segment is a single beat.
    pub orphan_penalty: f64,
    /// Segment ratio the heuristic search aims for.
    pub target_segment_ratio: f64,
    /// Fidelity used while scanning candidates.
    pub search: KMeansFidelity,
    /// Fidelity used for explicit requests and the final heuristic run.
    pub refine: KMeansFidelity,
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_clusters: 48,
            strategy: StrategyKind::Silhouette,
            orphan_penalty: 0.8,
            target_segment_ratio: 4.0,
            search: KMeansFidelity::new(20, 300),
            refine: KMeansFidelity::new(100, 1000),
            seed: 0,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JukeboxConfig {
    /// Requested cluster count. 0 asks the selector to choose.
    pub clusters: usize,
    /// Number of leading beat intervals discarded before assembly.
    pub start_beat: usize,
    #[serde(flatten)]
    pub clustering: ClusterConfig,
    /// Mono rate the feature extractor works at.
    pub analysis_sample_rate: u32,
    /// Frames quieter than this many dB below the loudest frame are trimmed.
    pub trim_top_db: f32,
    pub use_cache: bool,
    /// Fail instead of re-analysing when the cache cannot be used.
    pub cache_only: bool,
    /// Also persist the spectral embedding so cached tracks can recluster.
    pub cache_embedding: bool,
    pub cache_dir: PathBuf,
}

impl Default for JukeboxConfig {
    fn default() -> Self {
        Self {
            clusters: 0,
            start_beat: 1,
            clustering: ClusterConfig::default(),
            analysis_sample_rate: 22050,
            trim_top_db: 60.0,
            use_cache: false,
            cache_only: false,
            cache_embedding: true,
            cache_dir: default_cache_dir(),
        }
    }
}

impl JukeboxConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: JukeboxConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is missing or unusable.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::from_json_file(path) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Failed to load {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis_sample_rate < 8000 {
            return Err(JukeboxError::Config(format!(
                "analysisSampleRate {} is below 8000 Hz",
                self.analysis_sample_rate
            )));
        }
        let c = &self.clustering;
        if c.search.n_runs == 0 || c.refine.n_runs == 0 {
            return Err(JukeboxError::Config("k-means nRuns must be at least 1".into()));
        }
        if !(c.orphan_penalty.is_finite() && c.orphan_penalty >= 0.0) {
            return Err(JukeboxError::Config("orphanPenalty must be a non-negative number".into()));
        }
        if !(c.target_segment_ratio.is_finite() && c.target_segment_ratio > 0.0) {
            return Err(JukeboxError::Config("targetSegmentRatio must be positive".into()));
        }
        Ok(())
    }
}

fn default_cache_dir() -> PathBuf {
    ProjectDirs::from("", "", "loopatron")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("cache"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = JukeboxConfig::default();
        assert_eq!(config.clusters, 0);
        assert_eq!(config.start_beat, 1);
        assert_eq!(config.clustering.max_clusters, 48);
        assert_eq!(config.clustering.strategy, StrategyKind::Silhouette);
        assert!((config.clustering.orphan_penalty - 0.8).abs() < 1e-12);
        assert!((config.clustering.target_segment_ratio - 4.0).abs() < 1e-12);
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let json = r#"{"clusters": 12, "maxClusters": 20, "strategy": "heuristic"}"#;
        let config: JukeboxConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.clusters, 12);
        assert_eq!(config.clustering.max_clusters, 20);
        assert_eq!(config.clustering.strategy, StrategyKind::Heuristic);
        assert_eq!(config.start_beat, 1);
        assert_eq!(config.analysis_sample_rate, 22050);
    }

    #[test]
    fn nested_fidelity_parses() {
        let json = r#"{"search": {"nRuns": 3, "maxIterations": 50}}"#;
        let config: JukeboxConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.clustering.search, KMeansFidelity::new(3, 50));
        assert_eq!(config.clustering.refine, KMeansFidelity::new(100, 1000));
    }

    #[test]
    fn load_or_default_survives_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let config = JukeboxConfig::load_or_default(file.path());
        assert_eq!(config, JukeboxConfig::default());
    }

    #[test]
    fn validate_rejects_zero_runs() {
        let mut config = JukeboxConfig::default();
        config.clustering.search.n_runs = 0;
        assert!(matches!(config.validate(), Err(JukeboxError::Config(_))));
    }
}
