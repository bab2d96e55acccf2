/// Turns raw beat frames into the interval boundaries features are aggregated over.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinimalPostProcessor;

impl MinimalPostProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Clip to `[0, n_frames]`, add both ends, sort and drop duplicates.
    ///
    /// Consecutive boundaries delimit one beat interval, so the region before
    /// the first detected beat becomes an interval of its own. A closing
    /// interval shorter than half the median interval is merged into the beat
    /// before it.
    pub fn boundaries(&self, beat_frames: &[usize], n_frames: usize) -> Vec<usize> {
        let mut frames: Vec<usize> = Vec::with_capacity(beat_frames.len() + 2);
        frames.push(0);
        frames.extend(beat_frames.iter().map(|&b| b.min(n_frames)));
        frames.push(n_frames);
        frames.sort_unstable();
        frames.dedup();

        if frames.len() >= 4 {
            let mut lengths: Vec<usize> = frames.windows(2).map(|w| w[1] - w[0]).collect();
            let last = lengths[lengths.len() - 1];
            lengths.sort_unstable();
            let median = lengths[lengths.len() / 2];
            if 2 * last < median {
                let tail = frames.len() - 2;
                log::debug!("Merging a {}-frame closing interval into the previous beat", last);
                frames.remove(tail);
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_include_ends_once() {
        let post = MinimalPostProcessor::new();
        assert_eq!(post.boundaries(&[0, 10, 20, 20, 35], 40), vec![0, 10, 20, 35, 40]);
        assert_eq!(post.boundaries(&[5, 50], 40), vec![0, 5, 40]);
        assert_eq!(post.boundaries(&[], 40), vec![0, 40]);
    }

    #[test]
    fn short_closing_interval_joins_the_last_beat() {
        let post = MinimalPostProcessor::new();
        assert_eq!(post.boundaries(&[10, 20, 30], 31), vec![0, 10, 20, 31]);
        assert_eq!(post.boundaries(&[22, 44, 66, 88], 90), vec![0, 22, 44, 66, 90]);
        // Half the median is still a beat.
        assert_eq!(post.boundaries(&[10, 20, 30], 35), vec![0, 10, 20, 30, 35]);
        // Too few intervals to judge.
        assert_eq!(post.boundaries(&[10], 11), vec![0, 10, 11]);
    }
}
