//! # Workflow
//!
//! [`InfiniteJukebox`] drives the whole pipeline:
//!
//! 1.  Trim silence, mix down and resample to the analysis rate.
//! 2.  Beat grid + beat-synchronous chroma/MFCC.
//! 3.  Affinity graph and spectral embedding.
//! 4.  Cluster selection.
//! 5.  Beat amplitudes and beat graph assembly.
//!
//! Runs either on the caller's thread ([`InfiniteJukebox::analyze`]) or on a
//! background thread ([`InfiniteJukebox::spawn`]) that signals completion
//! exactly once through an [`AnalysisHandle`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, TryRecvError};

use crate::analysis::embedding::SpectralEmbedding;
use crate::analysis::features::FeatureExtractor;
use crate::analysis::similarity::SimilarityGraphBuilder;
use crate::analysis::structure::StructureAnalyzer;
use crate::audio::loader::analysis_signal;
use crate::audio::silence::SilenceDetector;
use crate::audio::AudioData;
use crate::audio_backend::decode_audio_file;
use crate::beat_graph::{self, Beat, BeatSpan};
use crate::cache::{cache_key_for, BeatCache, CacheRecord, CachedBeat, CACHE_FORMAT_VERSION};
use crate::config::{ClusterConfig, JukeboxConfig};
use crate::error::{JukeboxError, Result};
use crate::progress::{Progress, ProgressCallback};

/// Track-level facts shown alongside the beat list.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub sample_rate: u32,
    pub channels: u32,
    /// Sample frames in the trimmed buffer.
    pub total_samples: usize,
    /// Seconds, after trimming.
    pub duration: f64,
    pub tempo: f32,
    pub clusters: usize,
    pub segments: usize,
    pub avg_amplitude: f32,
    /// Frame offset of the trimmed buffer inside the source.
    pub start_index_origin: usize,
    pub start_beat: usize,
}

/// An analysed track: the trimmed audio and its playable beat graph.
#[derive(Debug, Clone)]
pub struct Track {
    pub metadata: TrackMetadata,
    pub beats: Vec<Beat>,
    /// Wall-clock analysis time; `None` when restored from the cache.
    pub elapsed: Option<Duration>,
    pub diagnostics: Vec<String>,
    audio: Arc<AudioData>,
    embedding: Option<Arc<SpectralEmbedding>>,
    settings: ClusterConfig,
}

impl Track {
    pub fn audio(&self) -> &AudioData {
        &self.audio
    }

    pub fn embedding(&self) -> Option<&SpectralEmbedding> {
        self.embedding.as_deref()
    }

    /// Interleaved samples of `beat`, borrowed from the track buffer.
    pub fn beat_samples(&self, beat: &Beat) -> &[f32] {
        self.audio.frame_slice(beat.start_index, beat.stop_index)
    }

    /// Frame offset of `beat` in the untrimmed source.
    pub fn absolute_start_index(&self, beat: &Beat) -> usize {
        self.metadata.start_index_origin + beat.start_index
    }

    /// Re-cluster the retained embedding at `clusters` (0 = auto-select).
    ///
    /// Timing, amplitudes and sample ranges stay as they are. Asking for the
    /// cluster count already in effect changes nothing.
    pub fn recluster(&mut self, clusters: usize) -> Result<()> {
        if clusters != 0 && clusters == self.metadata.clusters {
            log::debug!("Recluster to k={} is a no-op", clusters);
            return Ok(());
        }
        let embedding = self
            .embedding
            .as_ref()
            .ok_or(JukeboxError::EmbeddingUnavailable)?;

        let expected = self.beats.len() + self.metadata.start_beat;
        if embedding.n_beats() != expected {
            return Err(JukeboxError::CacheMismatch(format!(
                "embedding covers {} beats, track has {}",
                embedding.n_beats(),
                expected
            )));
        }

        let selection = StructureAnalyzer::new(self.settings.clone()).compute_clusters(
            embedding,
            clusters,
            &Progress::silent(),
        )?;
        beat_graph::relabel(&mut self.beats, &selection.labels[self.metadata.start_beat..])?;

        self.metadata.clusters = selection.clusters;
        self.metadata.segments = beat_graph::segment_count(&self.beats);
        self.diagnostics = selection.diagnostics;
        log::info!(
            "Reclustered to {} clusters, {} segments",
            self.metadata.clusters,
            self.metadata.segments
        );
        Ok(())
    }

    /// What the cache needs to rebuild this track without re-analysis.
    pub fn cache_record(&self) -> CacheRecord {
        CacheRecord {
            version: CACHE_FORMAT_VERSION,
            avg_amplitude: self.metadata.avg_amplitude,
            start_beat: self.metadata.start_beat,
            clusters: self.metadata.clusters,
            tempo: self.metadata.tempo,
            start_index_origin: self.metadata.start_index_origin,
            total_samples: self.metadata.total_samples,
            sample_rate: self.metadata.sample_rate,
            beats: self
                .beats
                .iter()
                .map(|b| CachedBeat {
                    start_index: b.start_index,
                    cluster: b.cluster,
                    amplitude: b.amplitude,
                })
                .collect(),
        }
    }

    /// Human-readable overview: one line per fact, then a segment map
    /// alternating `#` and `-`, and in verbose mode a cluster map and the
    /// selector's diagnostics.
    pub fn summary(&self, verbose: bool) -> String {
        let m = &self.metadata;
        let mut out = String::new();
        out.push_str(&format!("duration:    {:.2}s\n", m.duration));
        out.push_str(&format!("beats:       {}\n", self.beats.len()));
        out.push_str(&format!("tempo:       {:.1} BPM\n", m.tempo));
        out.push_str(&format!("clusters:    {}\n", m.clusters));
        out.push_str(&format!("segments:    {}\n", m.segments));
        out.push_str(&format!("sample rate: {} Hz\n", m.sample_rate));
        if let Some(elapsed) = self.elapsed {
            out.push_str(&format!("analysis:    {:.2}s\n", elapsed.as_secs_f64()));
        }

        let segment_map: String = self
            .beats
            .iter()
            .map(|b| if b.segment % 2 == 0 { '#' } else { '-' })
            .collect();
        out.push_str(&format!("segments:    {}\n", segment_map));

        if verbose {
            let cluster_map: String = self.beats.iter().map(|b| cluster_glyph(b.cluster)).collect();
            out.push_str(&format!("clusters:    {}\n", cluster_map));
            for line in &self.diagnostics {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

fn cluster_glyph(cluster: usize) -> char {
    const GLYPHS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    GLYPHS.get(cluster).map_or('?', |&g| g as char)
}

/// Pipeline entry point. Cheap to clone; each run gets its own progress state.
#[derive(Clone)]
pub struct InfiniteJukebox {
    config: JukeboxConfig,
    progress: Option<ProgressCallback>,
}

impl InfiniteJukebox {
    pub fn new(config: JukeboxConfig) -> Self {
        Self { config, progress: None }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &JukeboxConfig {
        &self.config
    }

    /// Full analysis of a decoded buffer.
    pub fn analyze(&self, audio: AudioData) -> Result<Track> {
        self.config.validate()?;
        let started = Instant::now();
        let progress = Progress::new(self.progress.clone());
        let config = &self.config;

        progress.report(0.1, "loading file and trimming silence...");
        let trimmed = SilenceDetector::new(config.trim_top_db).trim(&audio)?;
        drop(audio);
        let audio = Arc::new(trimmed.audio);
        let signal = analysis_signal(&audio, config.analysis_sample_rate)?;

        progress.report(0.2, "extracting beats and harmonic features...");
        let extractor = FeatureExtractor::new(config.analysis_sample_rate as f32);
        let features = extractor.extract(&signal)?;
        let playable = features.n_beats().saturating_sub(config.start_beat);
        if playable < beat_graph::MIN_BEATS {
            return Err(JukeboxError::InsufficientAudio(format!(
                "{} beat intervals leave {} beats after skipping {}, need at least {}",
                features.n_beats(),
                playable,
                config.start_beat,
                beat_graph::MIN_BEATS
            )));
        }
        log::debug!("Features done after {:.2}s", started.elapsed().as_secs_f64());

        progress.report(0.4, "building the beat similarity graph...");
        let affinity = SimilarityGraphBuilder::new().build(&features.chroma, &features.mfcc)?;
        let embedding = Arc::new(SpectralEmbedding::compute(&affinity.matrix)?);
        log::debug!("Embedding done after {:.2}s", started.elapsed().as_secs_f64());

        let selection = StructureAnalyzer::new(config.clustering.clone()).compute_clusters(
            &embedding,
            config.clusters,
            &progress,
        )?;

        progress.report(0.6, "computing beat amplitudes...");
        let amplitudes = extractor.beat_amplitudes(&signal, &features.boundaries);
        let avg_amplitude = if amplitudes.is_empty() {
            0.0
        } else {
            amplitudes.iter().sum::<f32>() / amplitudes.len() as f32
        };

        let total_samples = audio.frames();
        let frame_to_sample = extractor.hop_length() as f64 * audio.sample_rate as f64
            / config.analysis_sample_rate as f64;
        let spans: Vec<BeatSpan> = features
            .boundaries
            .iter()
            .take(features.n_beats())
            .zip(amplitudes.iter())
            .map(|(&frame, &amplitude)| BeatSpan {
                start_index: ((frame as f64 * frame_to_sample).round() as usize).min(total_samples),
                amplitude,
            })
            .collect();

        progress.report(0.8, "computing final beat array and finding loops...");
        let beats = beat_graph::assemble(
            &spans,
            &selection.labels,
            total_samples,
            audio.sample_rate,
            config.start_beat,
        )?;

        let metadata = TrackMetadata {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            total_samples,
            duration: audio.duration(),
            tempo: features.tempo,
            clusters: selection.clusters,
            segments: beat_graph::segment_count(&beats),
            avg_amplitude,
            start_index_origin: trimmed.start_index_origin,
            start_beat: config.start_beat,
        };

        let elapsed = started.elapsed();
        log::info!(
            "Analysed {:.1}s of audio in {:.2}s: {} beats, {} clusters, {} segments",
            metadata.duration,
            elapsed.as_secs_f64(),
            beats.len(),
            metadata.clusters,
            metadata.segments
        );
        progress.report(1.0, "ready!");

        Ok(Track {
            metadata,
            beats,
            elapsed: Some(elapsed),
            diagnostics: selection.diagnostics,
            audio,
            embedding: Some(embedding),
            settings: config.clustering.clone(),
        })
    }

    /// Decode `path`, then analyse it, through the cache when enabled.
    pub fn analyze_file<P: AsRef<Path>>(&self, path: P) -> Result<Track> {
        let path = path.as_ref();
        log::info!("Analysing {}", path.display());
        let audio = decode_audio_file(path)?;
        match cache_key_for(path) {
            Some(key) if self.config.use_cache => self.load_or_analyze(audio, &key),
            _ => self.analyze(audio),
        }
    }

    /// Rebuild the track from the cache under `key`, or analyse it afresh and
    /// store the result. Cache problems only surface in cache-only mode.
    pub fn load_or_analyze(&self, audio: AudioData, key: &str) -> Result<Track> {
        let cache = BeatCache::new(&self.config.cache_dir);
        let progress = Progress::new(self.progress.clone());

        match self.load_cached(&cache, &audio, key, &progress) {
            Ok(track) => return Ok(track),
            Err(e) if self.config.cache_only => return Err(e),
            Err(e) => log::warn!("Cache for '{}' not usable ({}); analysing", key, e),
        }

        let track = self.analyze(audio)?;
        let embedding = track.embedding().filter(|_| self.config.cache_embedding);
        if let Err(e) = cache.save(key, &track.cache_record(), embedding) {
            log::warn!("Failed to cache '{}' in {}: {}", key, cache.dir().display(), e);
        }
        Ok(track)
    }

    fn load_cached(
        &self,
        cache: &BeatCache,
        audio: &AudioData,
        key: &str,
        progress: &Progress,
    ) -> Result<Track> {
        let record = cache.load(key)?.retarget(self.config.start_beat)?;

        progress.report(0.1, "loading file and trimming silence...");
        let trimmed = SilenceDetector::new(self.config.trim_top_db).trim(audio)?;
        let total_samples = trimmed.audio.frames();
        record.check_source(trimmed.start_index_origin, total_samples, trimmed.audio.sample_rate)?;

        progress.report(0.8, "loading from cache...");
        let expected = record.beats.len() + record.start_beat;
        let embedding = match cache.load_embedding(key) {
            Ok(Some(e)) if e.n_beats() == expected => Some(Arc::new(e)),
            Ok(Some(e)) => {
                log::warn!("Cached embedding has {} beats, expected {}; ignoring it", e.n_beats(), expected);
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Failed to read cached embedding for '{}': {}", key, e);
                None
            }
        };

        let spans: Vec<BeatSpan> = record
            .beats
            .iter()
            .map(|b| BeatSpan {
                start_index: b.start_index,
                amplitude: b.amplitude,
            })
            .collect();
        let labels: Vec<usize> = record.beats.iter().map(|b| b.cluster).collect();
        let audio = Arc::new(trimmed.audio);
        let beats = beat_graph::assemble(&spans, &labels, total_samples, audio.sample_rate, 0)?;

        let mut track = Track {
            metadata: TrackMetadata {
                sample_rate: audio.sample_rate,
                channels: audio.channels,
                total_samples,
                duration: audio.duration(),
                tempo: record.tempo,
                clusters: record.clusters,
                segments: beat_graph::segment_count(&beats),
                avg_amplitude: record.avg_amplitude,
                start_index_origin: trimmed.start_index_origin,
                start_beat: record.start_beat,
            },
            beats,
            elapsed: None,
            diagnostics: vec![format!("loaded from cache '{}'", key)],
            audio,
            embedding,
            settings: self.config.clustering.clone(),
        };

        let requested = self.config.clusters;
        if requested != 0 && requested != record.clusters {
            track.recluster(requested).map_err(|e| match e {
                JukeboxError::EmbeddingUnavailable => JukeboxError::CacheMismatch(format!(
                    "cached with {} clusters, {} requested and no embedding stored",
                    record.clusters, requested
                )),
                other => other,
            })?;
        }

        log::info!("Restored '{}' from cache: {} beats", key, track.beats.len());
        progress.report(1.0, "ready!");
        Ok(track)
    }

    /// Run [`analyze`](Self::analyze) on a background thread.
    pub fn spawn(&self, audio: AudioData) -> AnalysisHandle {
        let jukebox = self.clone();
        AnalysisHandle::start(move || jukebox.analyze(audio))
    }

    /// Run [`analyze_file`](Self::analyze_file) on a background thread.
    pub fn spawn_file(&self, path: PathBuf) -> AnalysisHandle {
        let jukebox = self.clone();
        AnalysisHandle::start(move || jukebox.analyze_file(path))
    }
}

/// Completion signal of a background analysis. Exactly one result is sent.
pub struct AnalysisHandle {
    receiver: Receiver<Result<Track>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AnalysisHandle {
    fn start<F>(job: F) -> Self
    where
        F: FnOnce() -> Result<Track> + Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        let worker_sender = sender.clone();
        let spawned = thread::Builder::new()
            .name("loopatron-analysis".into())
            .spawn(move || {
                let _ = worker_sender.send(job());
            });

        let thread = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to start analysis thread: {}", e);
                let _ = sender.send(Err(JukeboxError::Io(e)));
                None
            }
        };
        Self { receiver, thread }
    }

    /// Block until the analysis finishes.
    pub fn wait(mut self) -> Result<Track> {
        let result = self.receiver.recv().unwrap_or(Err(JukeboxError::Interrupted));
        self.join();
        result
    }

    /// `None` while the analysis is still running. Once a result has been
    /// taken, later calls report [`JukeboxError::Interrupted`].
    pub fn try_wait(&mut self) -> Option<Result<Track>> {
        match self.receiver.try_recv() {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(JukeboxError::Interrupted)),
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Analysis thread panicked");
            }
        }
    }
}
