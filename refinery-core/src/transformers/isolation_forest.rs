//! Seeded isolation forest over a dense numeric matrix.
//!
//! Trees are grown on random subsamples of `max_samples` rows with random
//! feature/threshold splits up to depth `ceil(log2(psi))`. A row's anomaly
//! score is `2^(-E[h(x)] / c(psi))`, where `h` is the path length and `c` the
//! average unsuccessful-search length of a binary search tree.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn grow(data: &[Vec<f64>], rows: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        Self {
            root: Self::grow_node(data, rows, 0, height_limit, rng),
        }
    }

    fn grow_node(
        data: &[Vec<f64>],
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Node {
        if depth >= height_limit || rows.len() <= 1 {
            return Node::Leaf { size: rows.len() };
        }

        let n_features = data[rows[0]].len();
        let candidates: Vec<(usize, f64, f64)> = (0..n_features)
            .filter_map(|f| {
                let (lo, hi) = rows
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                        (lo.min(data[r][f]), hi.max(data[r][f]))
                    });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            return Node::Leaf { size: rows.len() };
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[r][feature] < threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(Self::grow_node(data, left, depth + 1, height_limit, rng)),
            right: Box::new(Self::grow_node(data, right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *threshold {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    };
                    depth += 1.0;
                }
            }
        }
    }
}

/// An ensemble of isolation trees fitted to one matrix.
#[derive(Debug)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    psi: usize,
}

impl IsolationForest {
    /// Fit on `data` (rows of equal width). `data` must hold at least two rows.
    pub fn fit(data: &[Vec<f64>], n_estimators: usize, max_samples: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let psi = max_samples.min(data.len()).max(1);
        let height_limit = (psi as f64).log2().ceil().max(1.0) as usize;
        let trees = (0..n_estimators.max(1))
            .map(|_| {
                let rows = sample(&mut rng, data.len(), psi).into_vec();
                IsolationTree::grow(data, rows, height_limit, &mut rng)
            })
            .collect();
        Self { trees, psi }
    }

    /// Anomaly score in (0, 1] per row; higher is more anomalous.
    pub fn score_samples(&self, data: &[Vec<f64>]) -> Vec<f64> {
        let c = average_path_length(self.psi);
        data.iter()
            .map(|row| {
                let mean_path = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>()
                    / self.trees.len() as f64;
                if c > 0.0 {
                    2f64.powf(-mean_path / c)
                } else {
                    0.5
                }
            })
            .collect()
    }

    /// Flag rows whose normality (negated score) falls below the
    /// `contamination` percentile of all normalities.
    pub fn predict_outliers(&self, data: &[Vec<f64>], contamination: f64) -> Vec<(bool, f64)> {
        let scores = self.score_samples(data);
        let normality: Vec<f64> = scores.iter().map(|s| -s).collect();
        let offset = crate::statistics::percentile(
            &crate::statistics::sorted(&normality),
            contamination * 100.0,
        );
        scores
            .into_iter()
            .zip(normality)
            .map(|(s, n)| (n < offset, s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut data: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![10.0 + (i % 7) as f64 * 0.3, 5.0 + (i % 5) as f64 * 0.2])
            .collect();
        data.push(vec![95.0, -40.0]);
        data
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!(c256 > 9.0 && c256 < 11.0, "c(256)={c256}");
    }

    #[test]
    fn test_outlier_scores_highest() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 100, 256, 42);
        let scores = forest.score_samples(&data);
        let outlier = scores[data.len() - 1];
        assert!(scores[..data.len() - 1].iter().all(|s| *s < outlier));
        assert!(scores.iter().all(|s| *s > 0.0 && *s <= 1.0));
    }

    #[test]
    fn test_predictions_respect_contamination() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 50, 256, 7);
        let flags = forest.predict_outliers(&data, 0.05);
        assert!(flags[data.len() - 1].0);
        let flagged = flags.iter().filter(|(f, _)| *f).count();
        assert!(flagged <= (0.05 * data.len() as f64).ceil() as usize);
    }

    #[test]
    fn test_same_seed_same_scores() {
        let data = cluster_with_outlier();
        let a = IsolationForest::fit(&data, 20, 32, 1).score_samples(&data);
        let b = IsolationForest::fit(&data, 20, 32, 1).score_samples(&data);
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_matrix_flags_nothing() {
        let data = vec![vec![1.0, 1.0]; 10];
        let forest = IsolationForest::fit(&data, 10, 256, 42);
        assert!(forest.predict_outliers(&data, 0.1).iter().all(|(f, _)| !f));
    }
}
