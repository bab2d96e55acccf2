mod common;

use loopatron::{BeatCache, CacheOptions, InfiniteJukebox, JukeboxConfig, JukeboxError};

use common::{fast_config, sectioned_audio};

fn cached_config(dir: &std::path::Path) -> JukeboxConfig {
    JukeboxConfig {
        use_cache: true,
        cache_dir: dir.to_path_buf(),
        ..fast_config()
    }
}

#[test]
fn reload_reproduces_cluster_assignment() {
    let dir = tempfile::tempdir().unwrap();
    let jukebox = InfiniteJukebox::new(cached_config(dir.path()));

    let analysed = jukebox.load_or_analyze(sectioned_audio(), "song").unwrap();
    assert!(analysed.elapsed.is_some());
    let cache = BeatCache::new(dir.path());
    assert!(cache.contains("song"));
    assert!(cache.embedding_path("song").exists());

    let restored = jukebox.load_or_analyze(sectioned_audio(), "song").unwrap();
    assert!(restored.elapsed.is_none());
    assert_eq!(restored.metadata.clusters, analysed.metadata.clusters);
    assert_eq!(restored.metadata.segments, analysed.metadata.segments);
    assert_eq!(restored.metadata.start_index_origin, analysed.metadata.start_index_origin);
    assert_eq!(restored.beats.len(), analysed.beats.len());
    for (a, b) in analysed.beats.iter().zip(&restored.beats) {
        assert_eq!(a.start_index, b.start_index);
        assert_eq!(a.stop_index, b.stop_index);
        assert_eq!(a.cluster, b.cluster);
        assert_eq!(a.segment, b.segment);
        assert_eq!(a.jump_candidates, b.jump_candidates);
        assert!((a.amplitude - b.amplitude).abs() < 1e-6);
    }
}

#[test]
fn different_cluster_count_reclusters_cached_embedding() {
    let dir = tempfile::tempdir().unwrap();
    let first = InfiniteJukebox::new(cached_config(dir.path()))
        .load_or_analyze(sectioned_audio(), "song")
        .unwrap();

    let k = if first.metadata.clusters == 4 { 6 } else { 4 };
    let config = JukeboxConfig {
        clusters: k,
        cache_only: true,
        ..cached_config(dir.path())
    };
    let restored = InfiniteJukebox::new(config)
        .load_or_analyze(sectioned_audio(), "song")
        .unwrap();
    assert!(restored.elapsed.is_none());
    assert!(restored.metadata.clusters >= k);
    for (a, b) in first.beats.iter().zip(&restored.beats) {
        assert_eq!(a.start_index, b.start_index);
    }
}

#[test]
fn missing_embedding_cannot_serve_new_cluster_count() {
    let dir = tempfile::tempdir().unwrap();
    let first = InfiniteJukebox::new(cached_config(dir.path()))
        .load_or_analyze(sectioned_audio(), "song")
        .unwrap();
    BeatCache::new(dir.path())
        .remove("song", CacheOptions::KeepCache)
        .unwrap();

    let k = first.metadata.clusters + 2;
    let strict = JukeboxConfig {
        clusters: k,
        cache_only: true,
        ..cached_config(dir.path())
    };
    let err = InfiniteJukebox::new(strict.clone())
        .load_or_analyze(sectioned_audio(), "song")
        .unwrap_err();
    assert!(matches!(err, JukeboxError::CacheMismatch(_)));

    // Without cache-only the jukebox falls back to a fresh analysis.
    let relaxed = JukeboxConfig {
        cache_only: false,
        ..strict
    };
    let track = InfiniteJukebox::new(relaxed)
        .load_or_analyze(sectioned_audio(), "song")
        .unwrap();
    assert!(track.elapsed.is_some());
    assert!(track.metadata.clusters >= k);
}

#[test]
fn later_start_beat_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let first = InfiniteJukebox::new(cached_config(dir.path()))
        .load_or_analyze(sectioned_audio(), "song")
        .unwrap();

    let config = JukeboxConfig {
        start_beat: 3,
        cache_only: true,
        ..cached_config(dir.path())
    };
    let shifted = InfiniteJukebox::new(config)
        .load_or_analyze(sectioned_audio(), "song")
        .unwrap();
    assert_eq!(shifted.beats.len(), first.beats.len() - 2);
    assert_eq!(shifted.beats[0].start_index, first.beats[2].start_index);
    assert_eq!(shifted.beats[0].id, 0);
    assert_eq!(shifted.beats[0].segment, 0);

    // An earlier start beat than the cached one is a mismatch.
    let config = JukeboxConfig {
        start_beat: 0,
        cache_only: true,
        ..cached_config(dir.path())
    };
    let err = InfiniteJukebox::new(config)
        .load_or_analyze(sectioned_audio(), "song")
        .unwrap_err();
    assert!(matches!(err, JukeboxError::CacheMismatch(_)));
}

#[test]
fn cache_only_without_cache_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = JukeboxConfig {
        cache_only: true,
        ..cached_config(dir.path())
    };
    let err = InfiniteJukebox::new(config)
        .load_or_analyze(sectioned_audio(), "absent")
        .unwrap_err();
    assert!(matches!(err, JukeboxError::Io(_)));
}

#[test]
fn embedding_is_not_written_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = JukeboxConfig {
        cache_embedding: false,
        ..cached_config(dir.path())
    };
    InfiniteJukebox::new(config)
        .load_or_analyze(sectioned_audio(), "song")
        .unwrap();
    let cache = BeatCache::new(dir.path());
    assert!(cache.contains("song"));
    assert!(!cache.embedding_path("song").exists());
}
