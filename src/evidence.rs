//! Running evidence, prior-volume and information accumulation.
//!
//! One removed point at volume `X_i` contributes the trapezoidal weight
//! `w_i = (X_{i-1} - X_{i+1}) / 2`. The accumulator therefore draws the
//! shrinkage for step `i+1` eagerly and caches it, so every removal can be
//! weighted without lagging the evidence used by the termination check.

use rand::RngCore;
use rand_distr::{Beta, Distribution};

use crate::math::{logaddexp, logsubexp};

/// How the enclosed prior volume shrinks per removed point.
pub trait ShrinkageEstimator: Send + Sync {
    /// `ln t` for one removal from a pool of `n_live` points, `t in (0, 1)`.
    fn log_shrink(&self, n_live: u64, rng: &mut dyn RngCore) -> f64;
}

/// Expected log-shrinkage `-1/N` of the minimum of N uniform volumes.
pub struct DeterministicShrinkage;

impl ShrinkageEstimator for DeterministicShrinkage {
    fn log_shrink(&self, n_live: u64, _rng: &mut dyn RngCore) -> f64 {
        -1.0 / n_live as f64
    }
}

/// Draws `t ~ Beta(N, 1)`, the order statistic of the largest of N uniform
/// variables. Used to estimate sampling-induced evidence variance across
/// repeated runs.
pub struct StochasticShrinkage;

impl ShrinkageEstimator for StochasticShrinkage {
    fn log_shrink(&self, n_live: u64, rng: &mut dyn RngCore) -> f64 {
        let beta = Beta::new(n_live as f64, 1.0).expect("Beta(N, 1) is always valid");
        let log_t = beta.sample(rng).ln();
        if log_t < 0.0 {
            log_t
        } else {
            // t rounded to exactly 1; fall back to the expected shrinkage so
            // log_X stays strictly decreasing.
            -1.0 / n_live as f64
        }
    }
}

/// Volume and weight assigned to one removed point.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Removal {
    pub log_x: f64,
    pub log_w: f64,
}

/// Tracks `log X`, `log Z` and the information `H` across removals.
pub(crate) struct EvidenceAccumulator {
    estimator: Box<dyn ShrinkageEstimator>,
    /// `log X_{i-1}`, the volume before the next removal.
    log_x: f64,
    /// Cached `ln t` for the step after the current one.
    pending_log_t: Option<f64>,
    log_z: f64,
    h: f64,
}

impl EvidenceAccumulator {
    pub fn new(estimator: Box<dyn ShrinkageEstimator>) -> Self {
        Self {
            estimator,
            log_x: 0.0,
            pending_log_t: None,
            log_z: f64::NEG_INFINITY,
            h: 0.0,
        }
    }

    /// Record the removal of a point with likelihood `log_l` from a pool of
    /// `n_now` points, where the following removal will see `n_next` points
    /// (`0` once the pool is exhausted).
    pub fn remove(
        &mut self,
        log_l: f64,
        n_now: u64,
        n_next: u64,
        rng: &mut dyn RngCore,
    ) -> Removal {
        let log_t = self
            .pending_log_t
            .take()
            .unwrap_or_else(|| self.estimator.log_shrink(n_now, rng));
        let log_x_i = self.log_x + log_t;

        let log_t_next = if n_next == 0 {
            f64::NEG_INFINITY
        } else {
            self.estimator.log_shrink(n_next, rng)
        };
        let log_x_next = log_x_i + log_t_next;
        self.pending_log_t = Some(log_t_next);

        let log_w = logsubexp(self.log_x, log_x_next) - std::f64::consts::LN_2;

        let log_wt = log_w + log_l;
        let log_z_new = logaddexp(self.log_z, log_wt);
        if log_z_new > f64::NEG_INFINITY {
            let prior_term = if self.log_z == f64::NEG_INFINITY {
                0.0
            } else {
                (self.log_z - log_z_new).exp() * (self.h + self.log_z)
            };
            self.h = (log_wt - log_z_new).exp() * log_l + prior_term - log_z_new;
        }
        self.log_z = log_z_new;
        self.log_x = log_x_i;

        Removal {
            log_x: log_x_i,
            log_w,
        }
    }

    pub fn log_z(&self) -> f64 {
        self.log_z
    }

    pub fn log_x(&self) -> f64 {
        self.log_x
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    /// Upper estimate of the log-evidence still enclosed by the live pool.
    pub fn remaining(&self, log_l_max_live: f64) -> f64 {
        log_l_max_live + self.log_x
    }

    /// Analytic evidence error `sqrt(H / N)`.
    pub fn log_z_err(&self, num_live_points: u64) -> f64 {
        (self.h.max(0.0) / num_live_points as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn deterministic_shrinkage_is_expected_value() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(DeterministicShrinkage.log_shrink(100, &mut rng), -0.01);
    }

    #[test]
    fn stochastic_shrinkage_is_negative_and_near_expectation() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let n = 50u64;
        let draws: Vec<f64> = (0..4000)
            .map(|_| StochasticShrinkage.log_shrink(n, &mut rng))
            .collect();
        assert!(draws.iter().all(|&t| t < 0.0));
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        // E[ln t] = -1/N, sd of the mean ~ 1/(N sqrt(draws))
        assert_abs_diff_eq!(mean, -1.0 / n as f64, epsilon = 0.002);
    }

    #[test]
    fn volume_decreases_strictly() {
        let mut acc = EvidenceAccumulator::new(Box::new(DeterministicShrinkage));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut last = 0.0;
        for i in 0..50 {
            let removal = acc.remove(-(i as f64), 10, 10, &mut rng);
            assert!(removal.log_x < last);
            last = removal.log_x;
        }
        assert_abs_diff_eq!(acc.log_x(), -5.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_likelihood_gives_likelihood_as_evidence() {
        // If L is constant, Z = L exactly, independent of shrinkage details.
        let mut acc = EvidenceAccumulator::new(Box::new(DeterministicShrinkage));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let log_l = -3.0;
        let n = 100;
        for _ in 0..(n * 60) {
            acc.remove(log_l, n as u64, n as u64, &mut rng);
        }
        // The trapezoid rule half-weights the first panel, so the total
        // weight is short by ~1/(2N).
        assert_abs_diff_eq!(acc.log_z(), log_l, epsilon = 0.01);
        assert_abs_diff_eq!(acc.h(), 0.0, epsilon = 0.01);
    }

    #[test]
    fn remaining_tracks_current_volume() {
        let mut acc = EvidenceAccumulator::new(Box::new(DeterministicShrinkage));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        acc.remove(0.0, 10, 10, &mut rng);
        assert_abs_diff_eq!(acc.remaining(2.5), 2.5 - 0.1, epsilon = 1e-12);
    }
}
