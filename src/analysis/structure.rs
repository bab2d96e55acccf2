//! # Structural Analysis Module
//!
//! Chooses how many beat clusters a track has and labels every beat.
//!
//! ## Strategies
//! *   **Silhouette** (default): scan k from `max_clusters` down to 3 and keep
//!     the best `k × silhouette × segments/clusters`, scaled down when some
//!     segment is a single beat.
//! *   **Heuristic**: scan even k in `[4, 64)` and take the largest k whose
//!     mean per-cluster segment count reaches the target ratio.
//!
//! An explicit cluster count bypasses both and clusters directly, moving up
//! to the next k while the requested slice of the embedding is not finite.

use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::analysis::embedding::SpectralEmbedding;
use crate::config::{ClusterConfig, KMeansFidelity, StrategyKind};
use crate::error::{JukeboxError, Result};
use crate::progress::Progress;

const PROGRESS_START: f32 = 0.5;
const PROGRESS_SPAN: f32 = 0.09;

/// Cluster count, one label per beat, and a log of what was tried.
#[derive(Debug, Clone)]
pub struct ClusterSelection {
    pub clusters: usize,
    pub labels: Vec<usize>,
    pub diagnostics: Vec<String>,
}

/// A way of picking the cluster count when none is requested.
pub trait ClusterStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, embedding: &SpectralEmbedding, progress: &Progress) -> Result<ClusterSelection>;
}

pub struct SilhouetteStrategy {
    pub max_clusters: usize,
    pub orphan_penalty: f64,
    pub fidelity: KMeansFidelity,
    pub seed: u64,
}

impl ClusterStrategy for SilhouetteStrategy {
    fn name(&self) -> &'static str {
        "silhouette"
    }

    fn select(&self, embedding: &SpectralEmbedding, progress: &Progress) -> Result<ClusterSelection> {
        let n = embedding.n_beats();
        let upper = self.max_clusters.min(n.saturating_sub(1));
        if upper < 3 {
            return Err(JukeboxError::ClusteringInfeasible);
        }

        let candidates: Vec<usize> = (3..=upper).rev().collect();
        let mut diagnostics = Vec::new();
        let mut best: Option<(f64, usize, Vec<usize>)> = None;

        for (step, &k) in candidates.iter().enumerate() {
            report_candidate(progress, step, candidates.len(), k);

            let Some(x) = embedding.features(k) else {
                log::debug!("k={}: feature slice is not finite, skipping", k);
                diagnostics.push(format!("k={:<3} skipped (non-finite features)", k));
                continue;
            };
            let Some(labels) = kmeans_labels(&x, k, self.fidelity, self.seed) else {
                diagnostics.push(format!("k={:<3} skipped (k-means failed)", k));
                continue;
            };
            if distinct_labels(&labels) < 2 {
                diagnostics.push(format!("k={:<3} skipped (single cluster)", k));
                continue;
            }

            let clusters = labels.iter().max().map_or(0, |m| m + 1);
            let silhouette = silhouette_score(&x, &labels);
            let (segments, min_segment) = segment_stats(&labels);
            let ratio = segments as f64 / clusters as f64;

            let mut fitness = k as f64 * silhouette * ratio;
            if min_segment == 1 {
                fitness *= self.orphan_penalty;
            }

            log::debug!(
                "k={}, sil={:.4}, segments={}, ratio={:.3}, min_seg={}, fitness={:.4}",
                k,
                silhouette,
                segments,
                ratio,
                min_segment,
                fitness
            );
            diagnostics.push(format!(
                "k={:<3} sil={:.4} segments={:<4} ratio={:.3} min_seg={:<3} fitness={:.4}",
                k, silhouette, segments, ratio, min_segment, fitness
            ));

            // Scanning downwards, so ties keep the larger k.
            let replace = match &best {
                None => true,
                Some((score, _, _)) => fitness > *score,
            };
            if replace {
                best = Some((fitness, k, labels));
            }
        }

        let (fitness, k, labels) = best.ok_or(JukeboxError::ClusteringInfeasible)?;
        log::info!("Silhouette search selected k={} (fitness {:.4})", k, fitness);
        diagnostics.push(format!("selected k={} (fitness {:.4})", k, fitness));
        Ok(ClusterSelection { clusters: k, labels, diagnostics })
    }
}

pub struct HeuristicStrategy {
    pub target_segment_ratio: f64,
    pub search: KMeansFidelity,
    pub refine: KMeansFidelity,
    pub seed: u64,
}

impl HeuristicStrategy {
    pub const MIN_K: usize = 4;
    pub const MAX_K: usize = 64;
}

impl ClusterStrategy for HeuristicStrategy {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn select(&self, embedding: &SpectralEmbedding, progress: &Progress) -> Result<ClusterSelection> {
        let n = embedding.n_beats();
        let candidates: Vec<usize> = (Self::MIN_K..Self::MAX_K)
            .step_by(2)
            .filter(|&k| k < n)
            .collect();

        let mut diagnostics = Vec::new();
        let mut ratios: Vec<(usize, f64, Vec<usize>)> = Vec::new();

        for (step, &k) in candidates.iter().enumerate() {
            report_candidate(progress, step, candidates.len(), k);

            let Some(x) = embedding.features(k) else {
                diagnostics.push(format!("k={:<3} skipped (non-finite features)", k));
                continue;
            };
            let Some(labels) = kmeans_labels(&x, k, self.search, self.seed) else {
                diagnostics.push(format!("k={:<3} skipped (k-means failed)", k));
                continue;
            };
            // Every segment belongs to exactly one cluster, so the mean
            // per-cluster segment count is segments / k.
            let (segments, _) = segment_stats(&labels);
            let ratio = segments as f64 / k as f64;
            log::debug!("k={}, segments={}, seg_ratio={:.3}", k, segments, ratio);
            diagnostics.push(format!("k={:<3} segments={:<4} seg_ratio={:.3}", k, segments, ratio));
            ratios.push((k, ratio, labels));
        }

        if ratios.is_empty() {
            return Err(JukeboxError::ClusteringInfeasible);
        }
        let max_ratio = ratios
            .iter()
            .map(|(_, r, _)| *r)
            .fold(f64::NEG_INFINITY, f64::max);
        let target = self.target_segment_ratio.min(max_ratio);

        let (k, _, search_labels) = ratios
            .into_iter()
            .filter(|(_, r, _)| *r >= target)
            .max_by_key(|(k, _, _)| *k)
            .ok_or(JukeboxError::ClusteringInfeasible)?;

        let labels = embedding
            .features(k)
            .and_then(|x| kmeans_labels(&x, k, self.refine, self.seed))
            .unwrap_or(search_labels);

        log::info!("Heuristic search selected k={} (target ratio {:.3})", k, target);
        diagnostics.push(format!("selected k={} (target ratio {:.3})", k, target));
        Ok(ClusterSelection { clusters: k, labels, diagnostics })
    }
}

pub struct StructureAnalyzer {
    config: ClusterConfig,
}

impl StructureAnalyzer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn strategy(&self) -> Box<dyn ClusterStrategy> {
        let c = &self.config;
        match c.strategy {
            StrategyKind::Silhouette => Box::new(SilhouetteStrategy {
                max_clusters: c.max_clusters,
                orphan_penalty: c.orphan_penalty,
                fidelity: c.search,
                seed: c.seed,
            }),
            StrategyKind::Heuristic => Box::new(HeuristicStrategy {
                target_segment_ratio: c.target_segment_ratio,
                search: c.search,
                refine: c.refine,
                seed: c.seed,
            }),
        }
    }

    /// Label every beat. `requested == 0` delegates to the configured strategy.
    pub fn compute_clusters(
        &self,
        embedding: &SpectralEmbedding,
        requested: usize,
        progress: &Progress,
    ) -> Result<ClusterSelection> {
        progress.report(PROGRESS_START, "clustering beats...");
        if requested == 0 {
            let strategy = self.strategy();
            log::debug!("Auto-selecting cluster count with {} strategy", strategy.name());
            return strategy.select(embedding, progress);
        }
        self.explicit(embedding, requested)
    }

    fn explicit(&self, embedding: &SpectralEmbedding, requested: usize) -> Result<ClusterSelection> {
        let n = embedding.n_beats();
        let mut diagnostics = Vec::new();
        let mut k = requested;
        while k <= n {
            if let Some(x) = embedding.features(k) {
                let labels = kmeans_labels(&x, k, self.config.refine, self.config.seed)
                    .ok_or(JukeboxError::ClusteringInfeasible)?;
                if k != requested {
                    log::info!("Requested k={} was not usable, clustered with k={}", requested, k);
                }
                diagnostics.push(format!("explicit k={} (requested {})", k, requested));
                return Ok(ClusterSelection { clusters: k, labels, diagnostics });
            }
            log::debug!("k={}: feature slice is not finite, trying k={}", k, k + 1);
            diagnostics.push(format!("k={:<3} skipped (non-finite features)", k));
            k += 1;
        }
        Err(JukeboxError::ClusteringInfeasible)
    }
}

fn report_candidate(progress: &Progress, step: usize, total: usize, k: usize) {
    let fraction = PROGRESS_START + PROGRESS_SPAN * step as f32 / total.max(1) as f32;
    progress.report(fraction, &format!("Testing a cluster value of {}...", k));
}

/// Seeded k-means++ labels, or `None` if the fit fails.
pub fn kmeans_labels(x: &Array2<f64>, k: usize, fidelity: KMeansFidelity, seed: u64) -> Option<Vec<usize>> {
    if k == 0 || x.nrows() < k {
        return None;
    }
    let rng = StdRng::seed_from_u64(seed);
    let dataset = DatasetBase::from(x.clone());
    match KMeans::params_with_rng(k, rng)
        .n_runs(fidelity.n_runs)
        .max_n_iterations(fidelity.max_iterations)
        .tolerance(1e-4)
        .fit(&dataset)
    {
        Ok(model) => Some(model.predict(x).to_vec()),
        Err(e) => {
            log::debug!("k-means with k={} failed: {}", k, e);
            None
        }
    }
}

fn distinct_labels(labels: &[usize]) -> usize {
    let mut seen: Vec<usize> = labels.to_vec();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

/// `(segment count, shortest segment length)` where a segment is a maximal
/// run of equal labels. The final run counts.
pub fn segment_stats(labels: &[usize]) -> (usize, usize) {
    if labels.is_empty() {
        return (0, 0);
    }
    let mut segment_count = 0;
    let mut current_len = 0;
    let mut min_len = usize::MAX;
    let mut prev = None;

    for &label in labels {
        if Some(label) != prev {
            if current_len > 0 {
                min_len = min_len.min(current_len);
            }
            segment_count += 1;
            current_len = 1;
            prev = Some(label);
        } else {
            current_len += 1;
        }
    }
    min_len = min_len.min(current_len);
    (segment_count, min_len)
}

/// Mean Euclidean silhouette. Points alone in their cluster score 0.
pub fn silhouette_score(points: &Array2<f64>, labels: &[usize]) -> f64 {
    let n = points.nrows();
    if n < 2 || labels.len() != n {
        return 0.0;
    }
    let n_labels = labels.iter().max().map_or(0, |m| m + 1);
    let mut counts = vec![0usize; n_labels];
    for &l in labels {
        counts[l] += 1;
    }
    if counts.iter().filter(|&&c| c > 0).count() < 2 {
        return 0.0;
    }

    let total: f64 = (0..n)
        .into_par_iter()
        .map(|i| {
            let own = labels[i];
            if counts[own] <= 1 {
                return 0.0;
            }
            let p = points.row(i);
            let mut sums = vec![0.0f64; n_labels];
            for j in 0..n {
                if i == j {
                    continue;
                }
                let dist = p
                    .iter()
                    .zip(points.row(j).iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                sums[labels[j]] += dist;
            }

            let a = sums[own] / (counts[own] - 1) as f64;
            let b = (0..n_labels)
                .filter(|&c| c != own && counts[c] > 0)
                .map(|c| sums[c] / counts[c] as f64)
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if !b.is_finite() || denom <= 0.0 {
                0.0
            } else {
                (b - a) / denom
            }
        })
        .sum();

    total / n as f64
}
