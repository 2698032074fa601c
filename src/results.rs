//! The immutable output of a run, consumed by plotting and analysis code.

use std::collections::HashMap;

use itertools::izip;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::evidence::EvidenceAccumulator;
use crate::math::logsumexp;
use crate::point::DeadPoint;
use crate::prior::{Layout, ParamView};
use crate::termination::TerminationReason;

/// A user-declared posterior expectation over the transformed parameters,
/// e.g. a mean or a flattened covariance.
pub type Reducer = Box<dyn Fn(&ParamView<'_>) -> Vec<f64> + Send + Sync>;

/// Per-sample values for one named variable, stacked row-major.
#[derive(Debug, Clone)]
pub struct SampleArray {
    values: Vec<f64>,
    dim: usize,
}

impl SampleArray {
    pub(crate) fn new(values: Vec<f64>, dim: usize) -> Self {
        debug_assert!(dim > 0 && values.len() % dim == 0);
        Self { values, dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_samples(&self) -> usize {
        self.values.len() / self.dim
    }

    pub fn row(&self, sample: usize) -> &[f64] {
        &self.values[sample * self.dim..(sample + 1) * self.dim]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Snapshot of a finished run.
///
/// Consumers read these fields; nothing here is recomputed or mutated after
/// assembly.
#[derive(Debug)]
pub struct Results {
    /// Log evidence estimate.
    pub log_z: f64,
    /// Analytic evidence error `sqrt(H / N)`.
    pub log_z_err: f64,
    /// Information (KL divergence of the posterior from the prior).
    pub h: f64,
    /// Effective sample size of the weighted posterior samples.
    pub ess: f64,
    /// Accepted replacements per likelihood evaluation over the whole run.
    pub efficiency: f64,
    pub num_samples: usize,
    pub num_likelihood_evaluations: u64,
    pub termination_reason: TerminationReason,
    /// Log enclosed prior volume per sample, strictly decreasing.
    pub log_x: Vec<f64>,
    pub log_l_samples: Vec<f64>,
    /// Live-pool size at the time each sample was removed.
    pub n_per_sample: Vec<u64>,
    /// Normalized log posterior weight per sample; `sum(exp(log_p)) == 1`.
    pub log_p: Vec<f64>,
    /// Reciprocal likelihood evaluations of the proposal behind each sample.
    pub sampler_efficiency: Vec<f64>,
    /// Stacked per-variable samples; empty when `collect_samples` is off.
    pub samples: HashMap<String, SampleArray>,
    /// Posterior-weighted expectations of the declared reducers.
    pub marginalised: HashMap<String, Vec<f64>>,
}

impl Results {
    /// Resample the weighted posterior into `size` equally weighted draws
    /// (multinomial, deterministic in `seed`).
    pub fn resample(&self, seed: u64, size: usize) -> HashMap<String, SampleArray> {
        if self.samples.is_empty() || self.log_p.is_empty() {
            return HashMap::new();
        }
        let mut cumulative = Vec::with_capacity(self.log_p.len());
        let mut total = 0.0;
        for &log_p in &self.log_p {
            total += log_p.exp();
            cumulative.push(total);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let indices: Vec<usize> = (0..size)
            .map(|_| {
                let u: f64 = rng.random::<f64>() * total;
                cumulative.partition_point(|&c| c <= u).min(self.log_p.len() - 1)
            })
            .collect();
        self.samples
            .iter()
            .map(|(name, array)| {
                let values = indices
                    .iter()
                    .flat_map(|&idx| array.row(idx).iter().copied())
                    .collect();
                (name.clone(), SampleArray::new(values, array.dim()))
            })
            .collect()
    }
}

/// Folds the dead-point history into the final `Results`.
pub(crate) struct ResultsAssembler<'a> {
    pub layout: &'a Layout,
    pub reducers: &'a [(String, Reducer)],
    pub collect_samples: bool,
    pub num_live_points: u64,
}

impl ResultsAssembler<'_> {
    pub fn assemble(
        &self,
        dead: &[DeadPoint],
        accumulator: &EvidenceAccumulator,
        num_evals: u64,
        accepted: u64,
        reason: TerminationReason,
    ) -> Results {
        let log_z = accumulator.log_z();
        let num_samples = dead.len();

        let log_x: Vec<f64> = dead.iter().map(|d| d.log_x).collect();
        let log_l_samples: Vec<f64> = dead.iter().map(|d| d.point.log_l).collect();
        let n_per_sample: Vec<u64> = dead.iter().map(|d| d.n_live).collect();
        let log_p: Vec<f64> = dead
            .iter()
            .map(|d| d.log_w + d.point.log_l - log_z)
            .collect();
        let sampler_efficiency: Vec<f64> = dead
            .iter()
            .map(|d| 1.0 / d.proposal_evals.max(1) as f64)
            .collect();

        let double_log_p: Vec<f64> = log_p.iter().map(|&v| 2.0 * v).collect();
        let ess = (-logsumexp(&double_log_p)).exp();

        let samples = if self.collect_samples {
            self.layout
                .entries()
                .iter()
                .map(|entry| {
                    let values: Vec<f64> = dead
                        .iter()
                        .flat_map(|d| {
                            d.point.x[entry.offset..entry.offset + entry.len]
                                .iter()
                                .copied()
                        })
                        .collect();
                    (entry.name.clone(), SampleArray::new(values, entry.len))
                })
                .collect()
        } else {
            HashMap::new()
        };

        let marginalised = self
            .reducers
            .iter()
            .map(|(name, reducer)| {
                let mut expectation: Vec<f64> = Vec::new();
                for (d, &log_p_i) in izip!(dead, &log_p) {
                    let weight = log_p_i.exp();
                    let view = ParamView::new(&d.point.x, self.layout);
                    let contribution = reducer(&view);
                    if expectation.is_empty() {
                        expectation = vec![0.0; contribution.len()];
                    }
                    for (acc, value) in expectation.iter_mut().zip(&contribution) {
                        *acc += weight * value;
                    }
                }
                (name.clone(), expectation)
            })
            .collect();

        Results {
            log_z,
            log_z_err: accumulator.log_z_err(self.num_live_points),
            h: accumulator.h(),
            ess,
            efficiency: if num_evals > 0 {
                accepted as f64 / num_evals as f64
            } else {
                0.0
            },
            num_samples,
            num_likelihood_evaluations: num_evals,
            termination_reason: reason,
            log_x,
            log_l_samples,
            n_per_sample,
            log_p,
            sampler_efficiency,
            samples,
            marginalised,
        }
    }
}
