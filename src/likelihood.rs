//! The seam between the engine and a user-supplied log-likelihood.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::prior::{Layout, ParamView, PriorChain};

/// User log-likelihood over transformed parameters.
///
/// Implemented for any `Fn(&ParamView) -> f64` closure. Non-finite return
/// values are treated by the engine as rejected points, never as errors.
pub trait LogLikelihood: Send + Sync {
    fn logp(&self, params: &ParamView<'_>) -> f64;
}

impl<F> LogLikelihood for F
where
    F: Fn(&ParamView<'_>) -> f64 + Send + Sync,
{
    fn logp(&self, params: &ParamView<'_>) -> f64 {
        self(params)
    }
}

/// Borrows the prior chain and the user likelihood for one run, counting
/// every evaluation.
///
/// The counter is atomic so that rayon batches can share one evaluator; a
/// fresh evaluator per run keeps repeated runs bit-identical.
pub(crate) struct LikelihoodEvaluator<'a, L> {
    chain: &'a PriorChain,
    logp: &'a L,
    evals: AtomicU64,
}

impl<'a, L: LogLikelihood> LikelihoodEvaluator<'a, L> {
    pub fn new(logp: &'a L, chain: &'a PriorChain) -> Self {
        Self {
            chain,
            logp,
            evals: AtomicU64::new(0),
        }
    }

    pub fn ndims(&self) -> usize {
        self.chain.ndims()
    }

    pub fn layout(&self) -> &'a Layout {
        self.chain.layout()
    }

    /// Transform a unit-cube vector and evaluate the likelihood on it.
    ///
    /// Any non-finite log-likelihood collapses to `-inf`.
    pub fn evaluate(&self, u: &[f64]) -> (Vec<f64>, f64) {
        let x = self.chain.transform(u);
        self.evals.fetch_add(1, Ordering::Relaxed);
        let log_l = self.logp.logp(&ParamView::new(&x, self.chain.layout()));
        let log_l = if log_l.is_finite() {
            log_l
        } else {
            f64::NEG_INFINITY
        };
        (x, log_l)
    }

    pub fn num_evaluations(&self) -> u64 {
        self.evals.load(Ordering::Relaxed)
    }
}
