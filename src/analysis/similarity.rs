//! Beat-to-beat affinity.
//!
//! Two graphs are blended: a recurrence graph linking beats with similar
//! constant-Q content anywhere in the track, and a path graph linking each
//! beat to its immediate neighbours weighted by timbral (MFCC) continuity.

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;

use crate::analysis::{median_f64, reflect_index};
use crate::error::{JukeboxError, Result};

/// Beats closer than this are never linked by the recurrence graph.
pub const RECURRENCE_WIDTH: usize = 3;
/// Length of the time-lag median filter along the time axis.
pub const LAG_FILTER_SIZE: usize = 7;

/// Symmetric, non-negative beat graph with a zero diagonal.
#[derive(Debug, Clone)]
pub struct BeatAffinity {
    pub matrix: Array2<f64>,
    /// Weight given to the recurrence graph.
    pub mu: f64,
}

pub struct SimilarityGraphBuilder {
    width: usize,
    lag_filter: usize,
}

impl Default for SimilarityGraphBuilder {
    fn default() -> Self {
        Self {
            width: RECURRENCE_WIDTH,
            lag_filter: LAG_FILTER_SIZE,
        }
    }
}

impl SimilarityGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `chroma` and `mfcc` are `(beats, dims)`.
    pub fn build(&self, chroma: &Array2<f64>, mfcc: &Array2<f64>) -> Result<BeatAffinity> {
        let rec = recurrence_affinity(chroma, self.width)?;
        let rec = timelag_median_filter(&rec, self.lag_filter);
        let rec = symmetrize(rec);
        let path = path_affinity(mfcc);
        let (matrix, mu) = balance(&rec, &path);
        log::debug!("Affinity: {} beats, mu = {:.3}", matrix.nrows(), mu);
        Ok(BeatAffinity { matrix, mu })
    }
}

fn pairwise_distances(features: &Array2<f64>) -> Result<Array2<f64>> {
    let n = features.nrows();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let a = features.row(i);
            (0..n)
                .map(|j| {
                    let b = features.row(j);
                    a.iter()
                        .zip(b.iter())
                        .map(|(x, y)| (x - y) * (x - y))
                        .sum::<f64>()
                        .sqrt()
                })
                .collect()
        })
        .collect();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n, n), flat)
        .map_err(|e| JukeboxError::Config(format!("distance matrix for {} beats: {}", n, e)))
}

/// Mutual k-nearest-neighbour graph with `exp(-d / bandwidth)` weights.
///
/// `k = 2·ceil(sqrt(n − 2·width + 1))`; the bandwidth is the median over beats
/// of the largest retained neighbour distance.
pub fn recurrence_affinity(features: &Array2<f64>, width: usize) -> Result<Array2<f64>> {
    let n = features.nrows();
    let mut rec = Array2::<f64>::zeros((n, n));
    if n == 0 {
        return Ok(rec);
    }
    let dist = pairwise_distances(features)?;

    let span = (n as f64 - 2.0 * width as f64 + 1.0).max(1.0);
    let k = 2 * span.sqrt().ceil() as usize;

    let mut neighbours = Array2::<bool>::from_elem((n, n), false);
    let mut candidates: Vec<usize> = Vec::with_capacity(n);
    for i in 0..n {
        candidates.clear();
        candidates.extend((0..n).filter(|&j| i.abs_diff(j) >= width));
        candidates.sort_by(|&a, &b| dist[[i, a]].total_cmp(&dist[[i, b]]));
        for &j in candidates.iter().take(k) {
            neighbours[[i, j]] = true;
        }
    }

    let mut row_max: Vec<f64> = Vec::new();
    for i in 0..n {
        let mut best: Option<f64> = None;
        for j in 0..n {
            if neighbours[[i, j]] && neighbours[[j, i]] {
                best = Some(best.map_or(dist[[i, j]], |b: f64| b.max(dist[[i, j]])));
            }
        }
        if let Some(b) = best {
            row_max.push(b);
        }
    }
    if row_max.is_empty() {
        return Ok(rec);
    }
    let bandwidth = median_f64(&mut row_max);
    let bandwidth = if bandwidth > 0.0 { bandwidth } else { 1.0 };

    for i in 0..n {
        for j in 0..n {
            if neighbours[[i, j]] && neighbours[[j, i]] {
                rec[[i, j]] = (-dist[[i, j]] / bandwidth).exp();
            }
        }
    }
    Ok(rec)
}

/// Median filter along time in the lag domain, which smooths along diagonals.
///
/// The lag representation is padded to `2n` lags so no wrap-around occurs.
pub fn timelag_median_filter(rec: &Array2<f64>, size: usize) -> Array2<f64> {
    let n = rec.nrows();
    let mut out = Array2::<f64>::zeros((n, n));
    if n == 0 || size <= 1 {
        return rec.clone();
    }
    let period = 2 * n;
    let half = (size / 2) as isize;

    // lag[l, c] = rec[(l + c) mod 2n, c], zero for the padding rows.
    let lag_value = |l: usize, c: usize| -> f64 {
        let r = (l + c) % period;
        if r < n {
            rec[[r, c]]
        } else {
            0.0
        }
    };

    let mut window: Vec<f64> = Vec::with_capacity(size);
    for j in 0..n {
        for i in 0..n {
            let l = (j + period - i) % period;
            window.clear();
            for d in -half..=half {
                let c = reflect_index(i as isize + d, n);
                window.push(lag_value(l, c));
            }
            out[[j, i]] = median_f64(&mut window);
        }
    }
    out
}

fn symmetrize(rec: Array2<f64>) -> Array2<f64> {
    let mut sym = (&rec + &rec.t()) * 0.5;
    sym.diag_mut().fill(0.0);
    sym
}

/// First off-diagonal: `exp(-d_i / σ)` with `d_i` the squared MFCC step
/// between beats `i` and `i + 1` and σ the median step.
pub fn path_affinity(mfcc: &Array2<f64>) -> Array2<f64> {
    let n = mfcc.nrows();
    let mut path = Array2::<f64>::zeros((n, n));
    if n < 2 {
        return path;
    }
    let steps: Vec<f64> = (0..n - 1)
        .map(|i| {
            mfcc.row(i + 1)
                .iter()
                .zip(mfcc.row(i).iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum()
        })
        .collect();
    let mut sorted = steps.clone();
    let sigma = median_f64(&mut sorted);
    let sigma = if sigma > 0.0 { sigma } else { 1.0 };

    for (i, d) in steps.iter().enumerate() {
        let w = (-d / sigma).exp();
        path[[i, i + 1]] = w;
        path[[i + 1, i]] = w;
    }
    path
}

/// `A = μ·R + (1 − μ)·P` with μ chosen to balance the two graphs' degrees.
pub fn balance(rec: &Array2<f64>, path: &Array2<f64>) -> (Array2<f64>, f64) {
    let deg_path: Array1<f64> = path.sum_axis(Axis(1));
    let deg_rec: Array1<f64> = rec.sum_axis(Axis(1));
    let total = &deg_path + &deg_rec;
    let denom = total.dot(&total);
    let mu = if denom > 0.0 {
        deg_path.dot(&total) / denom
    } else {
        0.5
    };
    let matrix = rec * mu + path * (1.0 - mu);
    (matrix, mu)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Beats cycling through `pattern` section labels, `len` beats per section.
    fn sectioned_features(pattern: &[usize], len: usize, dims: usize) -> Array2<f64> {
        let n = pattern.len() * len;
        Array2::from_shape_fn((n, dims), |(i, d)| {
            let section = pattern[i / len];
            let base = if d % 4 == section % 4 { 10.0 } else { 0.0 };
            base + 0.01 * ((i * 7 + d * 3) % 5) as f64
        })
    }

    fn assert_valid_graph(a: &Array2<f64>) {
        let n = a.nrows();
        for i in 0..n {
            assert_eq!(a[[i, i]], 0.0);
            for j in 0..n {
                assert!(a[[i, j]] >= 0.0);
                assert!((a[[i, j]] - a[[j, i]]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn recurrence_skips_near_diagonal() {
        let feats = sectioned_features(&[0, 1, 0, 1], 8, 8);
        let rec = recurrence_affinity(&feats, RECURRENCE_WIDTH).unwrap();
        for i in 0..rec.nrows() {
            for j in 0..rec.ncols() {
                if i.abs_diff(j) < RECURRENCE_WIDTH {
                    assert_eq!(rec[[i, j]], 0.0);
                }
                assert_eq!(rec[[i, j]], rec[[j, i]]);
            }
        }
        // Beat 0 (section A) should link into the repeat of A, not into B.
        let a_links: f64 = (16..24).map(|j| rec[[0, j]]).sum();
        let b_links: f64 = (8..16).map(|j| rec[[0, j]]).sum();
        assert!(a_links > b_links);
    }

    #[test]
    fn distances_are_euclidean_and_empty_input_is_ok() {
        let feats = Array2::from_shape_vec((3, 2), vec![0.0, 0.0, 3.0, 4.0, 6.0, 8.0]).unwrap();
        let dist = pairwise_distances(&feats).unwrap();
        assert_eq!(dist.dim(), (3, 3));
        assert_eq!(dist[[0, 1]], 5.0);
        assert_eq!(dist[[2, 0]], 10.0);
        assert_eq!(dist[[1, 1]], 0.0);

        let rec = recurrence_affinity(&Array2::zeros((0, 4)), RECURRENCE_WIDTH).unwrap();
        assert_eq!(rec.dim(), (0, 0));
    }

    #[test]
    fn path_links_only_neighbours() {
        let mfcc = Array2::from_shape_fn((6, 3), |(i, d)| (i + d) as f64);
        let path = path_affinity(&mfcc);
        for i in 0..6usize {
            for j in 0..6 {
                if i.abs_diff(j) == 1 {
                    // Equal steps: every weight is exp(-1).
                    assert!((path[[i, j]] - (-1.0f64).exp()).abs() < 1e-12);
                } else {
                    assert_eq!(path[[i, j]], 0.0);
                }
            }
        }
    }

    #[test]
    fn lag_filter_keeps_clean_diagonals() {
        // A full off-diagonal stripe survives a 7-wide median along it.
        let n = 20;
        let mut rec = Array2::<f64>::zeros((n, n));
        for i in 0..n - 5 {
            rec[[i, i + 5]] = 1.0;
            rec[[i + 5, i]] = 1.0;
        }
        rec[[2, 15]] = 1.0;
        let filtered = timelag_median_filter(&rec, LAG_FILTER_SIZE);
        assert_eq!(filtered[[8, 13]], 1.0);
        assert_eq!(filtered[[13, 8]], 1.0);
        // Isolated speck is removed.
        assert_eq!(filtered[[2, 15]], 0.0);
    }

    #[test]
    fn built_graph_is_symmetric_nonnegative_zero_diagonal() {
        let chroma = sectioned_features(&[0, 1, 2, 0, 1, 3], 6, 12);
        let mfcc = sectioned_features(&[0, 1, 2, 0, 1, 3], 6, 5);
        let affinity = SimilarityGraphBuilder::new().build(&chroma, &mfcc).unwrap();
        assert_valid_graph(&affinity.matrix);
        assert!(affinity.mu > 0.0 && affinity.mu < 1.0);
    }

    #[test]
    fn balance_of_empty_graphs_is_even() {
        let zero = Array2::<f64>::zeros((4, 4));
        let (a, mu) = balance(&zero, &zero);
        assert_eq!(mu, 0.5);
        assert!(a.iter().all(|&x| x == 0.0));
    }
}
