use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::AudioData;
use crate::error::{JukeboxError, Result};

fn decode_err<E: std::fmt::Display>(path: &Path, e: E) -> JukeboxError {
    JukeboxError::Decode(format!("{}: {}", path.display(), e))
}

/// Decode the default track of an audio file into interleaved `f32` PCM.
pub fn decode_audio_file<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path = path.as_ref();
    let src = std::fs::File::open(path).map_err(|e| decode_err(path, e))?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_err(path, e))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| decode_err(path, "no default track"))?;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(path, e))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u32)
        .unwrap_or(0);

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(Error::IoError(ref e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                continue;
            }
            Err(e) => return Err(decode_err(path, e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u32;
                let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(sample_buf.samples());
            }
            // Corrupt packets are skipped.
            Err(Error::IoError(_)) | Err(Error::DecodeError(_)) => continue,
            Err(e) => return Err(decode_err(path, e)),
        }
    }

    if samples.is_empty() {
        return Err(decode_err(path, "stream contains no audio samples"));
    }

    log::info!(
        "Decoded {} ({} Hz, {} ch, {:.1}s)",
        path.display(),
        sample_rate,
        channels,
        samples.len() as f64 / channels.max(1) as f64 / sample_rate.max(1) as f64
    );
    AudioData::new(samples, sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_decode_error() {
        let err = decode_audio_file("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, JukeboxError::Decode(_)));
    }

    #[test]
    fn non_audio_bytes_are_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.mp3");
        std::fs::write(&path, b"this is not an mp3 stream at all").unwrap();
        assert!(matches!(decode_audio_file(&path), Err(JukeboxError::Decode(_))));
    }
}
