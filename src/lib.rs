//! Nested sampling: Bayesian evidence estimation and weighted posterior
//! samples from a log-likelihood and a chain of named priors.
//!
//! ```
//! use nested_rs::{NestedSampler, NestedSamplerSettings, ParamView, PriorChain, PriorVariable};
//!
//! # fn main() -> anyhow::Result<()> {
//! let prior = PriorChain::builder()
//!     .push(PriorVariable::uniform("x", vec![-10.0], vec![10.0]))?
//!     .build();
//!
//! let sampler = NestedSampler::new(
//!     |params: &ParamView<'_>| {
//!         let x = params.get("x").unwrap()[0];
//!         -0.5 * x * x - 0.5 * (2.0 * std::f64::consts::PI).ln()
//!     },
//!     prior,
//! );
//!
//! let settings = NestedSamplerSettings {
//!     seed: 42,
//!     num_live_points: 50,
//!     ..Default::default()
//! };
//! let results = sampler.run(&settings)?;
//! // Evidence of a unit Gaussian over Uniform(-10, 10) is 1/20.
//! assert!((results.log_z - (1.0f64 / 20.0).ln()).abs() < 1.0);
//! # Ok(())
//! # }
//! ```

pub(crate) mod evidence;
pub(crate) mod likelihood;
pub(crate) mod math;
pub(crate) mod point;
pub(crate) mod prior;
pub(crate) mod results;
pub(crate) mod sampler;
pub(crate) mod slice;
pub(crate) mod termination;

pub use evidence::{DeterministicShrinkage, ShrinkageEstimator, StochasticShrinkage};
pub use likelihood::LogLikelihood;
pub use math::{cumulative_logsumexp, logsumexp, ndtri};
pub use point::{LivePoint, LivePointPool};
pub use prior::{
    Layout, ParamView, PriorChain, PriorChainBuilder, PriorError, PriorTransform, PriorVariable,
};
pub use results::{Reducer, Results, SampleArray};
pub use sampler::{NestedSampler, NestedSamplerSettings, Progress, SampleError};
pub use slice::{ClusteredPairDirection, DirectionStrategy, RandomPairDirection, SliceOptions};
pub use termination::TerminationReason;
