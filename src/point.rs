//! Live and dead points and the fixed-size live population.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::likelihood::{LikelihoodEvaluator, LogLikelihood};
use crate::sampler::SampleError;

/// How many uniform draws each slot may burn before initialization gives up.
/// Running out signals a prior/likelihood mismatch too improbable to seed from.
pub(crate) const INIT_RETRIES_PER_POINT: u64 = 1000;

/// ChaCha stream ids below this belong to the sequential loop.
pub(crate) const INIT_STREAM_BASE: u64 = 1 << 32;

/// A population member: unit-cube position, transformed parameters and a
/// finite log-likelihood.
#[derive(Debug, Clone)]
pub struct LivePoint {
    pub u: Vec<f64>,
    pub x: Vec<f64>,
    pub log_l: f64,
}

/// A removed live point, permanently recorded with its volume and weight.
#[derive(Debug, Clone)]
pub(crate) struct DeadPoint {
    pub point: LivePoint,
    pub log_x: f64,
    pub log_w: f64,
    pub n_live: u64,
    /// Likelihood evaluations spent by the proposal that refilled the slot.
    pub proposal_evals: u64,
}

/// Exactly N live points, ordered queries by log-likelihood.
#[derive(Debug)]
pub struct LivePointPool {
    points: Vec<LivePoint>,
}

impl LivePointPool {
    /// Draw `num_points` prior samples with finite likelihood, in parallel.
    ///
    /// Each slot owns its own ChaCha stream so the result does not depend on
    /// rayon's scheduling.
    pub(crate) fn initialize<L: LogLikelihood>(
        evaluator: &LikelihoodEvaluator<'_, L>,
        num_points: usize,
        seed: u64,
    ) -> Result<Self, SampleError> {
        let ndims = evaluator.ndims();
        let points = (0..num_points)
            .into_par_iter()
            .map(|idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(INIT_STREAM_BASE + idx as u64);
                for _ in 0..INIT_RETRIES_PER_POINT {
                    let u: Vec<f64> = (0..ndims).map(|_| rng.random()).collect();
                    let (x, log_l) = evaluator.evaluate(&u);
                    if log_l.is_finite() {
                        return Ok(LivePoint { u, x, log_l });
                    }
                }
                Err(SampleError::Initialization {
                    requested: num_points,
                    retries: INIT_RETRIES_PER_POINT,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[LivePoint] {
        &self.points
    }

    /// Index of the minimum-likelihood point. Ties resolve to the lowest
    /// index, which is deterministic for a fixed seed stream but not
    /// guaranteed stable across implementations.
    pub fn min_index(&self) -> usize {
        self.points
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.log_l.total_cmp(&b.1.log_l).then(a.0.cmp(&b.0)))
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    /// Indices of the k smallest points by log-likelihood, ascending.
    pub fn min_points(&self, k: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.points.len()).collect();
        indices.sort_by(|&a, &b| {
            self.points[a]
                .log_l
                .total_cmp(&self.points[b].log_l)
                .then(a.cmp(&b))
        });
        indices.truncate(k);
        indices
    }

    /// Swap in a replacement, returning the removed point. Pool size is
    /// invariant across the call.
    pub(crate) fn replace(&mut self, index: usize, point: LivePoint) -> LivePoint {
        std::mem::replace(&mut self.points[index], point)
    }

    /// Permanently remove a point; only used while draining the pool into
    /// the tail of the integral after termination.
    pub(crate) fn take(&mut self, index: usize) -> LivePoint {
        self.points.swap_remove(index)
    }

    pub(crate) fn max_log_l(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.log_l)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}
