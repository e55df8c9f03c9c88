//! Anti-correlation weight transfer.
//!
//! Given relative prices split into an older window `W1` and a newer window
//! `W2`, weight moves from instruments that outperformed in `W2` towards
//! instruments whose `W2` moves are positively correlated with the
//! outperformer's `W1` moves. The engine is a pure function of its inputs.

use crate::error::AllocationError;
use tracing::debug;

/// Tolerance for the incoming weight vector summing to one.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Stateless anticor step over a fixed window length.
#[derive(Debug, Clone, Copy)]
pub struct AnticorEngine {
    window_size: usize,
}

impl AnticorEngine {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Relative-price rows needed before a step is possible.
    pub fn required_rows(&self) -> usize {
        2 * self.window_size
    }

    /// Produce the next weight vector.
    ///
    /// `relative` holds rows of relative prices, oldest first; the last
    /// `2 * window_size` rows are used. `w_prev` must be non-negative and
    /// sum to one.
    pub fn step(&self, relative: &[Vec<f64>], w_prev: &[f64]) -> Result<Vec<f64>, AllocationError> {
        let w = self.window_size;
        if w < 2 {
            return Err(AllocationError::DegenerateInput(format!(
                "window_size {} is below 2",
                w
            )));
        }
        if relative.len() < 2 * w {
            return Err(AllocationError::NotReady {
                seen: relative.len(),
                required: 2 * w,
            });
        }

        let n = w_prev.len();
        if n == 0 {
            return Err(AllocationError::DegenerateInput(
                "empty weight vector".to_string(),
            ));
        }
        if let Some(row) = relative.iter().find(|row| row.len() != n) {
            return Err(AllocationError::DimensionMismatch {
                expected: n,
                actual: row.len(),
            });
        }
        if relative.iter().flatten().any(|x| !x.is_finite()) {
            return Err(AllocationError::DegenerateInput(
                "relative prices contain non-finite values".to_string(),
            ));
        }
        validate_weights(w_prev)?;

        let recent = &relative[relative.len() - 2 * w..];
        let (w1, w2) = recent.split_at(w);

        let m = cross_correlation(w1, w2);
        let mu2 = column_means(w2);
        let claims = claim_matrix(&m, &mu2);

        let mut w_new = w_prev.to_vec();
        let mut moved = 0.0;

        for (i, row) in claims.iter().enumerate() {
            let total: f64 = row.iter().sum();
            if total <= 0.0 {
                continue;
            }
            for (j, &claim) in row.iter().enumerate() {
                if claim <= 0.0 {
                    continue;
                }
                let transfer = w_prev[i] * claim / total;
                w_new[i] -= transfer;
                w_new[j] += transfer;
                moved += transfer;
            }
        }

        let w_new = normalize(w_new);
        debug!(moved, weights = ?w_new, "Anticor step");
        Ok(w_new)
    }
}

/// Pearson correlation between column `i` of `w1` and column `j` of `w2`.
///
/// Zero-variance columns produce a correlation of 0.
pub fn cross_correlation(w1: &[Vec<f64>], w2: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = w1.first().map(|row| row.len()).unwrap_or(0);
    let mu1 = column_means(w1);
    let mu2 = column_means(w2);
    let sd1 = column_std_devs(w1, &mu1);
    let sd2 = column_std_devs(w2, &mu2);
    let len = w1.len().min(w2.len());

    let mut m = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            if sd1[i] == 0.0 || sd2[j] == 0.0 {
                continue;
            }
            let cov: f64 = (0..len)
                .map(|t| (w1[t][i] - mu1[i]) * (w2[t][j] - mu2[j]))
                .sum::<f64>()
                / len as f64;
            m[i][j] = (cov / (sd1[i] * sd2[j])).clamp(-1.0, 1.0);
        }
    }
    m
}

/// Claim of instrument `i` on instrument `j`.
///
/// Non-zero only when `i` strictly outperformed `j` in the recent window and
/// their cross-window correlation is positive. Negative self-correlations of
/// either side add to the claim.
pub fn claim_matrix(m: &[Vec<f64>], mu2: &[f64]) -> Vec<Vec<f64>> {
    let n = mu2.len();
    let mut claims = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..n {
            if i == j || mu2[i] <= mu2[j] || m[i][j] <= 0.0 {
                continue;
            }
            let mut claim = m[i][j];
            if m[i][i] < 0.0 {
                claim += m[i][i].abs();
            }
            if m[j][j] < 0.0 {
                claim += m[j][j].abs();
            }
            claims[i][j] = claim;
        }
    }
    claims
}

/// Mean of each column.
pub fn column_means(window: &[Vec<f64>]) -> Vec<f64> {
    let n = window.first().map(|row| row.len()).unwrap_or(0);
    if window.is_empty() {
        return vec![0.0; n];
    }
    let len = window.len() as f64;
    (0..n)
        .map(|col| window.iter().map(|row| row[col]).sum::<f64>() / len)
        .collect()
}

fn column_std_devs(window: &[Vec<f64>], means: &[f64]) -> Vec<f64> {
    let len = window.len() as f64;
    means
        .iter()
        .enumerate()
        .map(|(col, mean)| {
            let variance = window
                .iter()
                .map(|row| (row[col] - mean).powi(2))
                .sum::<f64>()
                / len;
            let sd = variance.sqrt();
            // Rounding noise on a flat column must not read as variance.
            if sd < 1e-12 {
                0.0
            } else {
                sd
            }
        })
        .collect()
}

fn validate_weights(weights: &[f64]) -> Result<(), AllocationError> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(AllocationError::DegenerateInput(
            "weights must be finite and non-negative".to_string(),
        ));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(AllocationError::DegenerateInput(format!(
            "weights sum to {} instead of 1",
            sum
        )));
    }
    Ok(())
}

/// Clip negatives to zero and rescale to sum to one.
fn normalize(mut weights: Vec<f64>) -> Vec<f64> {
    for w in weights.iter_mut() {
        if *w < 0.0 {
            *w = 0.0;
        }
    }
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 {
        for w in weights.iter_mut() {
            *w /= sum;
        }
    } else {
        let uniform = 1.0 / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w = uniform);
    }
    weights
}

/// Equal weight across `n` instruments.
pub fn uniform_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random relative prices around 1.0.
    fn lcg_matrix(seed: u64, rows: usize, cols: usize) -> Vec<Vec<f64>> {
        let mut state = seed;
        (0..rows)
            .map(|_| {
                (0..cols)
                    .map(|_| {
                        state = state
                            .wrapping_mul(6364136223846793005)
                            .wrapping_add(1442695040888963407);
                        let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
                        0.95 + unit * 0.1
                    })
                    .collect()
            })
            .collect()
    }

    fn assert_valid_weights(weights: &[f64]) {
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "weights sum to {}", sum);
        assert!(weights.iter().all(|w| *w >= 0.0), "negative weight in {:?}", weights);
    }

    #[test]
    fn test_flat_windows_leave_weights_unchanged() {
        let engine = AnticorEngine::new(2);
        let relative = vec![vec![1.0; 3]; 4];
        let prior = uniform_weights(3);

        let m = cross_correlation(&relative[..2], &relative[2..]);
        let claims = claim_matrix(&m, &column_means(&relative[2..]));
        assert!(claims.iter().flatten().all(|c| *c == 0.0));

        let w_new = engine.step(&relative, &prior).unwrap();
        for (new, old) in w_new.iter().zip(prior.iter()) {
            assert!((new - old).abs() < 1e-12);
        }
    }

    #[test]
    fn test_claim_flows_from_winner_to_correlated_loser() {
        let engine = AnticorEngine::new(3);
        // Columns: A, B. W1 = first three rows, W2 = last three.
        let relative = vec![
            vec![1.00, 1.00],
            vec![1.10, 1.00],
            vec![1.20, 1.00],
            vec![1.05, 0.99],
            vec![1.05, 1.00],
            vec![1.06, 1.01],
        ];
        let m = cross_correlation(&relative[..3], &relative[3..]);
        let mu2 = column_means(&relative[3..]);
        assert!(m[0][1] > 0.0);
        assert!(mu2[0] > mu2[1]);

        let prior = vec![0.5, 0.5];
        let w_new = engine.step(&relative, &prior).unwrap();

        assert!(w_new[0] < prior[0]);
        assert!(w_new[1] > prior[1]);
        assert_valid_weights(&w_new);
    }

    #[test]
    fn test_equal_recent_means_transfer_nothing() {
        let m = vec![vec![0.5, 0.8], vec![0.8, 0.5]];
        let claims = claim_matrix(&m, &[1.02, 1.02]);
        assert!(claims.iter().flatten().all(|c| *c == 0.0));
    }

    #[test]
    fn test_negative_self_correlation_adds_to_claim() {
        let m = vec![vec![-0.3, 0.4], vec![0.1, -0.2]];
        let claims = claim_matrix(&m, &[1.05, 1.00]);

        assert!((claims[0][1] - (0.4 + 0.3 + 0.2)).abs() < 1e-12);
        assert_eq!(claims[1][0], 0.0);
    }

    #[test]
    fn test_zero_variance_correlation_is_zero() {
        let w1 = vec![vec![1.0, 1.0], vec![1.0, 1.2]];
        let w2 = vec![vec![1.1, 1.0], vec![0.9, 1.0]];
        let m = cross_correlation(&w1, &w2);

        assert_eq!(m[0][0], 0.0);
        assert_eq!(m[0][1], 0.0);
        assert_eq!(m[1][1], 0.0);
        assert!((m[1][0] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weights_stay_on_simplex() {
        let engine = AnticorEngine::new(4);
        for seed in 1..40u64 {
            let relative = lcg_matrix(seed, 10, 5);
            let mut weights = uniform_weights(5);
            for _ in 0..5 {
                weights = engine.step(&relative, &weights).unwrap();
                assert_valid_weights(&weights);
            }
        }
    }

    #[test]
    fn test_step_is_deterministic() {
        let engine = AnticorEngine::new(3);
        let relative = lcg_matrix(7, 6, 4);
        let prior = vec![0.1, 0.2, 0.3, 0.4];

        let a = engine.step(&relative, &prior).unwrap();
        let b = engine.step(&relative, &prior).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_uses_most_recent_rows() {
        let engine = AnticorEngine::new(2);
        let tail = lcg_matrix(11, 4, 3);
        let mut longer = lcg_matrix(99, 3, 3);
        longer.extend(tail.iter().cloned());
        let prior = uniform_weights(3);

        assert_eq!(
            engine.step(&tail, &prior).unwrap(),
            engine.step(&longer, &prior).unwrap()
        );
    }

    #[test]
    fn test_rejects_degenerate_input() {
        let prior = uniform_weights(2);
        let relative = vec![vec![1.0, 1.0]; 4];

        assert!(matches!(
            AnticorEngine::new(1).step(&relative, &prior),
            Err(AllocationError::DegenerateInput(_))
        ));
        assert_eq!(
            AnticorEngine::new(3).step(&relative, &prior),
            Err(AllocationError::NotReady { seen: 4, required: 6 })
        );
        assert_eq!(
            AnticorEngine::new(2).step(&relative, &uniform_weights(3)),
            Err(AllocationError::DimensionMismatch { expected: 3, actual: 2 })
        );
        assert!(matches!(
            AnticorEngine::new(2).step(&relative, &[0.9, 0.9]),
            Err(AllocationError::DegenerateInput(_))
        ));
    }
}
