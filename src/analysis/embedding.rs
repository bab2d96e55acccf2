//! Spectral embedding of the beat graph.

use ndarray::{s, Array1, Array2, Axis};

use crate::analysis::{median_f64, reflect_index};
use crate::error::{JukeboxError, Result};

/// Rows of the eigenvector matrix are median-filtered over this many beats.
pub const EVEC_SMOOTHING: usize = 9;

const JACOBI_MAX_SWEEPS: usize = 100;

/// Smoothed Laplacian eigenvectors (one row per beat, ascending eigenvalue
/// order) and their cumulative row norms.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralEmbedding {
    evecs: Array2<f64>,
    cnorm: Array2<f64>,
}

impl SpectralEmbedding {
    pub fn compute(affinity: &Array2<f64>) -> Result<Self> {
        let n = affinity.nrows();
        if n == 0 || affinity.ncols() != n {
            return Err(JukeboxError::InsufficientAudio(format!(
                "cannot embed a {:?} affinity matrix",
                affinity.dim()
            )));
        }
        let laplacian = normalized_laplacian(affinity);
        let (eigenvalues, evecs) = symmetric_eigen(&laplacian);
        let evecs = median_filter_rows(&evecs, EVEC_SMOOTHING);
        log::debug!(
            "Embedding: {} beats, smallest eigenvalues {:?}",
            n,
            &eigenvalues[..eigenvalues.len().min(4)]
        );
        Ok(Self::from_evecs(evecs))
    }

    /// Rebuild from stored (already smoothed) eigenvectors.
    pub fn from_evecs(evecs: Array2<f64>) -> Self {
        let cnorm = cumulative_norms(&evecs);
        Self { evecs, cnorm }
    }

    /// Explicit construction, e.g. to supply a custom normaliser.
    pub fn from_parts(evecs: Array2<f64>, cnorm: Array2<f64>) -> Result<Self> {
        if evecs.dim() != cnorm.dim() {
            return Err(JukeboxError::Config(format!(
                "eigenvector shape {:?} does not match norm shape {:?}",
                evecs.dim(),
                cnorm.dim()
            )));
        }
        Ok(Self { evecs, cnorm })
    }

    pub fn n_beats(&self) -> usize {
        self.evecs.nrows()
    }

    pub fn evecs(&self) -> &Array2<f64> {
        &self.evecs
    }

    /// `evecs[:, :k] / cnorm[:, k-1]`, or `None` when any entry is not finite.
    pub fn features(&self, k: usize) -> Option<Array2<f64>> {
        if k == 0 || k > self.evecs.ncols() {
            return None;
        }
        let norm = self.cnorm.column(k - 1);
        let mut x = self.evecs.slice(s![.., ..k]).to_owned();
        for (mut row, &d) in x.axis_iter_mut(Axis(0)).zip(norm.iter()) {
            row.mapv_inplace(|v| v / d);
        }
        if x.iter().all(|v| v.is_finite()) {
            Some(x)
        } else {
            None
        }
    }
}

/// `I − D^{-1/2} A D^{-1/2}`; isolated beats get a zero diagonal.
pub fn normalized_laplacian(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let degree: Array1<f64> = a.sum_axis(Axis(1));
    let d_inv_sqrt = degree.mapv(|d| if d > 0.0 { 1.0 / d.sqrt() } else { 0.0 });

    let mut lap = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            let val = a[[i, j]] * d_inv_sqrt[i] * d_inv_sqrt[j];
            lap[[i, j]] = if i == j {
                if degree[i] > 0.0 { 1.0 - val } else { 0.0 }
            } else {
                -val
            };
        }
    }
    lap
}

/// Cyclic Jacobi eigen-decomposition of a real symmetric matrix.
/// Returns eigenvalues ascending and the matching eigenvectors as columns.
pub fn symmetric_eigen(m: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = m.nrows();
    let mut a: Vec<f64> = m.iter().cloned().collect();
    let mut v = vec![0.0f64; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }

    let scale: f64 = a.iter().map(|x| x * x).sum::<f64>().max(f64::MIN_POSITIVE);
    for _sweep in 0..JACOBI_MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[p * n + q] * a[p * n + q];
            }
        }
        if off <= 1e-24 * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                // A ← A·J
                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                // A ← Jᵀ·A
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[k * n + p];
                    let vkq = v[k * n + q];
                    v[k * n + p] = c * vkp - s * vkq;
                    v[k * n + q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[i * n + i].total_cmp(&a[j * n + j]));

    let values: Vec<f64> = order.iter().map(|&i| a[i * n + i]).collect();
    let vectors = Array2::from_shape_fn((n, n), |(row, col)| v[row * n + order[col]]);
    (values, vectors)
}

/// Median over `size` consecutive rows, per column, with reflected edges.
pub fn median_filter_rows(x: &Array2<f64>, size: usize) -> Array2<f64> {
    let (n, d) = x.dim();
    if size <= 1 || n == 0 {
        return x.clone();
    }
    let half = (size / 2) as isize;
    let mut out = Array2::<f64>::zeros((n, d));
    let mut window = Vec::with_capacity(size);
    for col in 0..d {
        for row in 0..n {
            window.clear();
            for off in -half..=half {
                window.push(x[[reflect_index(row as isize + off, n), col]]);
            }
            out[[row, col]] = median_f64(&mut window);
        }
    }
    out
}

/// `sqrt(cumsum(E², axis=1))`.
pub fn cumulative_norms(evecs: &Array2<f64>) -> Array2<f64> {
    let mut out = evecs.mapv(|x| x * x);
    for mut row in out.axis_iter_mut(Axis(0)) {
        let mut acc = 0.0;
        for v in row.iter_mut() {
            acc += *v;
            *v = acc.sqrt();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jacobi_recovers_known_spectrum() {
        let m = Array2::from_shape_vec((3, 3), vec![2.0, 1.0, 0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 5.0])
            .unwrap();
        let (vals, vecs) = symmetric_eigen(&m);
        assert!((vals[0] - 1.0).abs() < 1e-10);
        assert!((vals[1] - 3.0).abs() < 1e-10);
        assert!((vals[2] - 5.0).abs() < 1e-10);

        for k in 0..3 {
            let v = vecs.column(k);
            let mv = m.dot(&v);
            for i in 0..3 {
                assert!((mv[i] - vals[k] * v[i]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn laplacian_of_two_components_has_two_zero_eigenvalues() {
        let mut a = Array2::<f64>::zeros((6, 6));
        for &(i, j) in &[(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5)] {
            a[[i, j]] = 1.0;
            a[[j, i]] = 1.0;
        }
        let (vals, _) = symmetric_eigen(&normalized_laplacian(&a));
        assert!(vals[0].abs() < 1e-10);
        assert!(vals[1].abs() < 1e-10);
        assert!(vals[2] > 0.5);
    }

    #[test]
    fn isolated_beat_has_zero_laplacian_row() {
        let mut a = Array2::<f64>::zeros((3, 3));
        a[[0, 1]] = 1.0;
        a[[1, 0]] = 1.0;
        let lap = normalized_laplacian(&a);
        assert!(lap.row(2).iter().all(|&x| x == 0.0));
        assert_eq!(lap[[0, 0]], 1.0);
    }

    #[test]
    fn cumulative_norms_accumulate_along_rows() {
        let e = Array2::from_shape_vec((1, 3), vec![3.0, 4.0, 0.0]).unwrap();
        let c = cumulative_norms(&e);
        assert_eq!(c.row(0).to_vec(), vec![3.0, 5.0, 5.0]);
    }

    #[test]
    fn features_reject_non_finite_slices() {
        let evecs = Array2::from_shape_vec((2, 2), vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let embedding = SpectralEmbedding::from_evecs(evecs);
        // Row 0 has a zero norm in column 0.
        assert!(embedding.features(1).is_none());
        let x = embedding.features(2).unwrap();
        assert_eq!(x.row(0).to_vec(), vec![0.0, 1.0]);
        assert!(embedding.features(0).is_none());
        assert!(embedding.features(3).is_none());
    }

    #[test]
    fn median_filter_removes_single_row_spike() {
        let mut x = Array2::<f64>::zeros((12, 1));
        x[[6, 0]] = 100.0;
        let y = median_filter_rows(&x, EVEC_SMOOTHING);
        assert!(y.iter().all(|&v| v == 0.0));
    }
}
