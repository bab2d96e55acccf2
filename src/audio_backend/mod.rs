//! File decoding via Symphonia.

pub mod decoder;

pub use decoder::decode_audio_file;
