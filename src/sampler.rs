//! The nested-sampling engine: configuration, the sequential run loop and
//! its failure modes.

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::evidence::{
    DeterministicShrinkage, EvidenceAccumulator, ShrinkageEstimator, StochasticShrinkage,
};
use crate::likelihood::{LikelihoodEvaluator, LogLikelihood};
use crate::point::{DeadPoint, LivePointPool};
use crate::prior::{ParamView, PriorChain};
use crate::results::{Reducer, Results, ResultsAssembler};
use crate::slice::{SliceOptions, SliceSampler};
use crate::termination::{TerminationPolicy, TerminationReason};

#[derive(Error, Debug)]
pub enum SampleError {
    /// The prior barely overlaps the likelihood support; seeding the pool
    /// failed.
    #[error(
        "could not find {requested} starting points with finite log-likelihood \
         within {retries} prior draws per point"
    )]
    Initialization { requested: usize, retries: u64 },
    /// The slice shrink loop hit its cap, which signals a likelihood plateau
    /// or an over-constrained region. Fatal; no fallback is attempted.
    #[error("slice proposal found no point above log L = {threshold} within {max_steps} shrink steps")]
    ProposalExhausted { threshold: f64, max_steps: u32 },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Configuration for one run.
#[derive(Debug, Clone, Copy)]
pub struct NestedSamplerSettings {
    pub seed: u64,
    /// Size N of the live population, fixed for the run's lifetime.
    pub num_live_points: usize,
    /// Budget of likelihood evaluations.
    pub max_samples: u64,
    /// Store per-variable sample arrays on the Results.
    pub collect_samples: bool,
    /// Stop once the evidence still enclosed by the live pool drops below
    /// this fraction of the accumulated evidence.
    pub termination_frac: f64,
    /// Replace the deterministic `-1/N` volume shrinkage with draws from
    /// the order-statistic distribution.
    pub stochastic_uncertainty: bool,
    pub sampler_options: SliceOptions,
}

impl Default for NestedSamplerSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            num_live_points: 100,
            max_samples: 100_000,
            collect_samples: true,
            termination_frac: 0.01,
            stochastic_uncertainty: false,
            sampler_options: SliceOptions::default(),
        }
    }
}

/// Periodic snapshot handed to a progress callback.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Progress {
    pub iteration: u64,
    pub log_z: f64,
    pub log_x: f64,
    /// `exp(remaining - log_z)`, the quantity compared to `termination_frac`.
    pub remaining_frac: f64,
    pub num_likelihood_evaluations: u64,
}

/// Nested sampler over a user likelihood and a prior chain.
///
/// Construct once, then `run` with different settings; every run draws its
/// randomness from the settings seed alone.
pub struct NestedSampler<L: LogLikelihood> {
    log_likelihood: L,
    prior_chain: PriorChain,
    reducers: Vec<(String, Reducer)>,
}

impl<L: LogLikelihood> NestedSampler<L> {
    pub fn new(log_likelihood: L, prior_chain: PriorChain) -> Self {
        Self {
            log_likelihood,
            prior_chain,
            reducers: Vec::new(),
        }
    }

    /// Declare a posterior expectation to be computed during assembly and
    /// stored under `name` in `Results::marginalised`.
    pub fn with_reducer(
        mut self,
        name: impl Into<String>,
        reducer: impl Fn(&ParamView<'_>) -> Vec<f64> + Send + Sync + 'static,
    ) -> Self {
        self.reducers.push((name.into(), Box::new(reducer)));
        self
    }

    pub fn run(&self, settings: &NestedSamplerSettings) -> Result<Results> {
        self.run_with_progress(settings, |_| {})
    }

    /// Like `run`, invoking `progress` every `num_live_points` iterations.
    pub fn run_with_progress(
        &self,
        settings: &NestedSamplerSettings,
        mut progress: impl FnMut(&Progress),
    ) -> Result<Results> {
        validate(settings).context("Refusing to start nested sampling")?;

        let mut phase = RunPhase::Initializing;
        loop {
            phase = match phase {
                RunPhase::Initializing => match ActiveRun::initialize(self, *settings) {
                    Ok(run) => RunPhase::Sampling(Box::new(run)),
                    Err(err) => RunPhase::Failed(err),
                },
                RunPhase::Sampling(mut run) => match run.step() {
                    Ok(outcome) => {
                        if run.iteration % run.settings.num_live_points as u64 == 0 {
                            progress(&run.progress());
                        }
                        match outcome {
                            None => RunPhase::Sampling(run),
                            Some(reason) => RunPhase::Terminated(run, reason),
                        }
                    }
                    Err(err) => RunPhase::Failed(err),
                },
                RunPhase::Terminated(run, reason) => {
                    return Ok(run.finalize(&self.reducers, reason));
                }
                RunPhase::Failed(err) => {
                    return Err(err).context("Nested sampling run failed");
                }
            };
        }
    }
}

fn validate(settings: &NestedSamplerSettings) -> Result<(), SampleError> {
    if settings.num_live_points == 0 {
        return Err(SampleError::InvalidSettings(
            "num_live_points must be positive".into(),
        ));
    }
    if !(settings.termination_frac > 0.0 && settings.termination_frac <= 1.0) {
        return Err(SampleError::InvalidSettings(
            "termination_frac must lie in (0, 1]".into(),
        ));
    }
    if settings.max_samples == 0 {
        return Err(SampleError::InvalidSettings(
            "max_samples must be positive".into(),
        ));
    }
    if settings.sampler_options.num_slices == 0 {
        return Err(SampleError::InvalidSettings(
            "num_slices must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Explicit run state machine.
enum RunPhase<'a, L: LogLikelihood> {
    Initializing,
    Sampling(Box<ActiveRun<'a, L>>),
    Terminated(Box<ActiveRun<'a, L>>, TerminationReason),
    Failed(SampleError),
}

/// A run in flight: the only owner of the live pool and the evidence state.
struct ActiveRun<'a, L: LogLikelihood> {
    evaluator: LikelihoodEvaluator<'a, L>,
    pool: LivePointPool,
    accumulator: EvidenceAccumulator,
    policy: TerminationPolicy,
    slice: SliceSampler,
    rng: ChaCha8Rng,
    dead: Vec<DeadPoint>,
    settings: NestedSamplerSettings,
    iteration: u64,
}

impl<'a, L: LogLikelihood> ActiveRun<'a, L> {
    fn initialize(
        sampler: &'a NestedSampler<L>,
        settings: NestedSamplerSettings,
    ) -> Result<Self, SampleError> {
        let evaluator = LikelihoodEvaluator::new(&sampler.log_likelihood, &sampler.prior_chain);
        let pool = LivePointPool::initialize(&evaluator, settings.num_live_points, settings.seed)?;

        // Stream 0 drives every sequential stochastic decision; the
        // initialization streams live far above it.
        let rng = ChaCha8Rng::seed_from_u64(settings.seed);

        let estimator: Box<dyn ShrinkageEstimator> = if settings.stochastic_uncertainty {
            Box::new(StochasticShrinkage)
        } else {
            Box::new(DeterministicShrinkage)
        };

        Ok(Self {
            evaluator,
            pool,
            accumulator: EvidenceAccumulator::new(estimator),
            policy: TerminationPolicy::new(settings.termination_frac, settings.max_samples),
            slice: SliceSampler::new(settings.sampler_options),
            rng,
            dead: Vec::new(),
            settings,
            iteration: 0,
        })
    }

    /// One iteration: shrink, remove the worst point, replace it above the
    /// threshold, then consult the termination policy.
    fn step(&mut self) -> Result<Option<TerminationReason>, SampleError> {
        let n = self.pool.len() as u64;
        let worst = self.pool.min_index();
        let log_l_star = self.pool.points()[worst].log_l;

        let removal = self.accumulator.remove(log_l_star, n, n, &mut self.rng);
        let (replacement, proposal_evals) =
            self.slice
                .propose(&self.pool, worst, &self.evaluator, log_l_star, &mut self.rng)?;
        let removed = self.pool.replace(worst, replacement);
        self.dead.push(DeadPoint {
            point: removed,
            log_x: removal.log_x,
            log_w: removal.log_w,
            n_live: n,
            proposal_evals,
        });
        self.iteration += 1;

        Ok(self.policy.check(
            self.accumulator.log_z(),
            self.accumulator.remaining(self.pool.max_log_l()),
            self.evaluator.num_evaluations(),
        ))
    }

    fn progress(&self) -> Progress {
        let remaining = self.accumulator.remaining(self.pool.max_log_l());
        Progress {
            iteration: self.iteration,
            log_z: self.accumulator.log_z(),
            log_x: self.accumulator.log_x(),
            remaining_frac: (remaining - self.accumulator.log_z()).exp(),
            num_likelihood_evaluations: self.evaluator.num_evaluations(),
        }
    }

    /// Drain the final live pool into the tail of the integral and assemble
    /// the immutable results.
    fn finalize(mut self, reducers: &[(String, Reducer)], reason: TerminationReason) -> Results {
        while !self.pool.is_empty() {
            let n_now = self.pool.len() as u64;
            let worst = self.pool.min_index();
            let log_l = self.pool.points()[worst].log_l;
            let removal = self
                .accumulator
                .remove(log_l, n_now, n_now - 1, &mut self.rng);
            let point = self.pool.take(worst);
            self.dead.push(DeadPoint {
                point,
                log_x: removal.log_x,
                log_w: removal.log_w,
                n_live: n_now,
                // No proposal was run for live-pool leftovers.
                proposal_evals: 1,
            });
        }

        let assembler = ResultsAssembler {
            layout: self.evaluator.layout(),
            reducers,
            collect_samples: self.settings.collect_samples,
            num_live_points: self.settings.num_live_points as u64,
        };
        assembler.assemble(
            &self.dead,
            &self.accumulator,
            self.evaluator.num_evaluations(),
            self.iteration,
            reason,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::PriorVariable;

    fn flat_sampler() -> NestedSampler<impl LogLikelihood> {
        let chain = PriorChain::builder()
            .push(PriorVariable::uniform("x", vec![0.0], vec![1.0]))
            .unwrap()
            .build();
        NestedSampler::new(|params: &ParamView<'_>| -params.get("x").unwrap()[0], chain)
    }

    #[test]
    fn rejects_zero_live_points() {
        let settings = NestedSamplerSettings {
            num_live_points: 0,
            ..Default::default()
        };
        let err = flat_sampler().run(&settings).unwrap_err();
        let err = err.downcast::<SampleError>().unwrap();
        assert!(matches!(err, SampleError::InvalidSettings(_)));
    }

    #[test]
    fn rejects_out_of_range_termination_frac() {
        for frac in [0.0, -0.5, 1.5] {
            let settings = NestedSamplerSettings {
                termination_frac: frac,
                ..Default::default()
            };
            let err = flat_sampler().run(&settings).unwrap_err();
            let err = err.downcast::<SampleError>().unwrap();
            assert!(matches!(err, SampleError::InvalidSettings(_)));
        }
    }

    #[test]
    fn max_samples_bounds_the_run() {
        let settings = NestedSamplerSettings {
            num_live_points: 20,
            max_samples: 200,
            termination_frac: 1e-12,
            ..Default::default()
        };
        let results = flat_sampler().run(&settings).unwrap();
        assert_eq!(
            results.termination_reason,
            TerminationReason::MaxSamplesReached
        );
        assert!(results.num_likelihood_evaluations >= 200);
    }

    #[test]
    fn progress_callback_fires() {
        let settings = NestedSamplerSettings {
            num_live_points: 10,
            ..Default::default()
        };
        let mut count = 0;
        flat_sampler()
            .run_with_progress(&settings, |p| {
                count += 1;
                assert!(p.num_likelihood_evaluations > 0);
            })
            .unwrap();
        assert!(count > 0);
    }
}
