//! Beat-level structural analysis for infinite-jukebox playback.
//!
//! Given a decoded track, [`InfiniteJukebox`] finds the beats, groups them
//! into clusters of musically interchangeable beats and returns a [`Track`]
//! whose [`Beat`]s each list the earlier beats playback may jump to.

pub mod analysis;
pub mod audio;
pub mod audio_backend;
pub mod beat_graph;
pub mod beat_tracker;
pub mod cache;
pub mod config;
pub mod error;
pub mod progress;
pub mod workflow;

pub use analysis::embedding::SpectralEmbedding;
pub use analysis::structure::{ClusterSelection, ClusterStrategy, StructureAnalyzer};
pub use audio::AudioData;
pub use beat_graph::Beat;
pub use cache::{BeatCache, CacheOptions, CacheRecord};
pub use config::{ClusterConfig, JukeboxConfig, KMeansFidelity, StrategyKind};
pub use error::{JukeboxError, Result};
pub use progress::{Progress, ProgressCallback};
pub use workflow::{AnalysisHandle, InfiniteJukebox, Track, TrackMetadata};
