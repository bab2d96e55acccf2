//! # Analysis
//!
//! Feature extraction and the structural pipeline built on it:
//!
//! 1.  `features`: beat grid plus beat-synchronous CQT chroma and MFCC.
//! 2.  `similarity`: recurrence + path affinity between beats.
//! 3.  `embedding`: normalized Laplacian eigenvectors.
//! 4.  `structure`: cluster-count selection and k-means labelling.

pub mod cqt;
pub mod embedding;
pub mod features;
pub mod similarity;
pub mod spectrogram;
pub mod structure;

/// Median of `values` (mean of the middle pair for even lengths). Reorders the slice.
pub(crate) fn median_f64(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Scipy-style `reflect` boundary: `d c b a | a b c d | d c b a`.
pub(crate) fn reflect_index(idx: isize, len: usize) -> usize {
    let len = len as isize;
    if len == 1 {
        return 0;
    }
    let period = 2 * len;
    let mut i = idx.rem_euclid(period);
    if i >= len {
        i = period - 1 - i;
    }
    i as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median_f64(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median_f64(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median_f64(&mut []), 0.0);
    }

    #[test]
    fn reflect_mirrors_edges() {
        let idx: Vec<usize> = (-3..7).map(|i| reflect_index(i, 4)).collect();
        assert_eq!(idx, vec![2, 1, 0, 0, 1, 2, 3, 3, 2, 1]);
    }
}
