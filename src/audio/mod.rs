//! # Audio Handling Module
//!
//! Buffers, mixdown and resampling for analysis.
//!
//! ## Sub-modules
//! *   `loader`: `AudioData` plus mono mixdown and Rubato resampling.
//! *   `silence`: leading/trailing silence trimming.

pub mod loader;
pub mod silence;

pub use loader::AudioData;
