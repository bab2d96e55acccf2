//! Progress reporting shared by every pipeline stage.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Receives `(fraction, message)` pairs. Called from whichever thread runs the analysis.
pub type ProgressCallback = Arc<dyn Fn(f32, &str) + Send + Sync>;

/// Wraps an optional callback and keeps reported fractions non-decreasing.
pub struct Progress {
    callback: Option<ProgressCallback>,
    last: AtomicU32,
}

impl Progress {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last: AtomicU32::new(0f32.to_bits()),
        }
    }

    pub fn silent() -> Self {
        Self::new(None)
    }

    pub fn report(&self, fraction: f32, message: &str) {
        let clamped = fraction.clamp(0.0, 1.0);
        let prev = self.last.fetch_max_f32(clamped);
        let value = clamped.max(prev);
        log::debug!("[{:>5.1}%] {}", value * 100.0, message);
        if let Some(cb) = &self.callback {
            cb(value, message);
        }
    }

    pub fn last(&self) -> f32 {
        f32::from_bits(self.last.load(Ordering::Acquire))
    }
}

trait FetchMaxF32 {
    fn fetch_max_f32(&self, value: f32) -> f32;
}

impl FetchMaxF32 for AtomicU32 {
    /// Non-negative f32 bit patterns order the same way as the floats they encode.
    fn fetch_max_f32(&self, value: f32) -> f32 {
        f32::from_bits(self.fetch_max(value.to_bits(), Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn fractions_never_go_backwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = Progress::new(Some(Arc::new(move |f: f32, _: &str| {
            sink.lock().unwrap().push(f);
        })));

        progress.report(0.2, "features");
        progress.report(0.1, "late message");
        progress.report(0.6, "amplitudes");
        progress.report(1.0, "done");

        let values = seen.lock().unwrap().clone();
        assert_eq!(values, vec![0.2, 0.2, 0.6, 1.0]);
        assert_eq!(progress.last(), 1.0);
    }

    #[test]
    fn silent_progress_tracks_last_value() {
        let progress = Progress::silent();
        progress.report(0.4, "graph");
        assert_eq!(progress.last(), 0.4);
    }
}
