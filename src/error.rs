//! Error taxonomy for the analysis pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JukeboxError {
    /// The input buffer could not be produced from the source file.
    #[error("failed to decode audio: {0}")]
    Decode(String),

    /// Silence-only input, or fewer than three beats detected.
    #[error("insufficient audio: {0}")]
    InsufficientAudio(String),

    /// Every candidate cluster count produced an unusable feature slice.
    #[error("no candidate cluster count produced a usable feature matrix")]
    ClusteringInfeasible,

    /// The cached record cannot satisfy the requested trim or cluster count.
    #[error("cache mismatch: {0}")]
    CacheMismatch(String),

    #[error("no spectral embedding is retained for this track; reclustering requires a full analysis")]
    EmbeddingUnavailable,

    #[error("background analysis ended without reporting a result")]
    Interrupted,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, JukeboxError>;
