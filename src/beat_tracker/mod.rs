//! # Beat Tracking
//!
//! DSP beat tracker: mel spectrogram, onset envelope, tempo estimate and
//! dynamic-programming beat placement, followed by boundary clean-up.

pub mod mel;
pub mod post_processor;
pub mod tracker;

pub use tracker::{BeatProcessor, BeatTrackConfig};
