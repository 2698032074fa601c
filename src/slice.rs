//! Constrained replacement proposals via slice sampling in unit-cube space.
//!
//! Given the likelihood threshold left behind by a removed live point, the
//! sampler walks a current position through `num_slices` one-dimensional
//! slice-sampling rounds. Directions come from the live pool itself (the
//! difference of two members), so the proposal scale tracks the pool's
//! current spread as the constrained region shrinks.

use rand::{Rng, RngCore};

use crate::likelihood::{LikelihoodEvaluator, LogLikelihood};
use crate::point::{LivePoint, LivePointPool};
use crate::sampler::SampleError;

/// Cap on shrink-and-retry attempts per slice round. Exceeding it means the
/// likelihood is flat (or the region over-constrained) around the threshold.
pub(crate) const MAX_SHRINK_STEPS: u32 = 100;

/// Cap on bracket doublings per end during step-out.
const MAX_EXPAND_STEPS: u32 = 100;

const MAX_DIRECTION_RETRIES: u32 = 32;

/// Options for the slice proposal mechanism.
#[derive(Debug, Clone, Copy)]
pub struct SliceOptions {
    /// Cluster-restriction depth for direction choice. Zero draws direction
    /// pairs from the whole pool; depth d restricts them to roughly
    /// `N / 2^d` neighbors of the current position, which keeps proposals
    /// from collapsing onto a single mode of a multimodal posterior.
    pub depth: u32,
    /// Number of slice-sampling rounds per proposal.
    pub num_slices: u32,
}

impl Default for SliceOptions {
    fn default() -> Self {
        Self {
            depth: 0,
            num_slices: 5,
        }
    }
}

/// Chooses the direction for one slice-sampling round.
pub trait DirectionStrategy: Send + Sync {
    /// A direction vector in unit-cube space, scaled like the pool spread.
    fn direction(&self, pool: &LivePointPool, from: &[f64], rng: &mut dyn RngCore) -> Vec<f64>;
}

fn pair_difference(
    pool: &LivePointPool,
    candidates: &[usize],
    rng: &mut dyn RngCore,
) -> Option<Vec<f64>> {
    if candidates.len() < 2 {
        return None;
    }
    for _ in 0..MAX_DIRECTION_RETRIES {
        let a = candidates[rng.random_range(0..candidates.len())];
        let b = candidates[rng.random_range(0..candidates.len())];
        if a == b {
            continue;
        }
        let ua = &pool.points()[a].u;
        let ub = &pool.points()[b].u;
        let dir: Vec<f64> = ua.iter().zip(ub).map(|(&x, &y)| x - y).collect();
        let norm2: f64 = dir.iter().map(|d| d * d).sum();
        if norm2 > 1e-24 {
            return Some(dir);
        }
    }
    None
}

fn isotropic_fallback(ndims: usize, rng: &mut dyn RngCore) -> Vec<f64> {
    use rand_distr::{Distribution, StandardNormal};
    let mut dir: Vec<f64> = (0..ndims).map(|_| StandardNormal.sample(rng)).collect();
    let norm: f64 = dir.iter().map(|d| d * d).sum::<f64>().sqrt();
    if norm > 0.0 {
        dir.iter_mut().for_each(|d| *d /= norm);
    }
    dir
}

/// Direction between two distinct points drawn from the whole pool.
pub struct RandomPairDirection;

impl DirectionStrategy for RandomPairDirection {
    fn direction(&self, pool: &LivePointPool, from: &[f64], rng: &mut dyn RngCore) -> Vec<f64> {
        let all: Vec<usize> = (0..pool.len()).collect();
        pair_difference(pool, &all, rng).unwrap_or_else(|| isotropic_fallback(from.len(), rng))
    }
}

/// Direction between two distinct points among the nearest neighbors of the
/// current position, with the neighborhood halving per unit of depth.
pub struct ClusteredPairDirection {
    pub depth: u32,
}

impl DirectionStrategy for ClusteredPairDirection {
    fn direction(&self, pool: &LivePointPool, from: &[f64], rng: &mut dyn RngCore) -> Vec<f64> {
        let keep = (pool.len() >> self.depth.min(32)).max(2);
        let mut indices: Vec<usize> = (0..pool.len()).collect();
        let dist2 = |idx: usize| -> f64 {
            pool.points()[idx]
                .u
                .iter()
                .zip(from)
                .map(|(&a, &b)| (a - b) * (a - b))
                .sum()
        };
        indices.sort_by(|&a, &b| dist2(a).total_cmp(&dist2(b)).then(a.cmp(&b)));
        indices.truncate(keep);
        pair_difference(pool, &indices, rng).unwrap_or_else(|| isotropic_fallback(from.len(), rng))
    }
}

fn in_unit_cube(point: &[f64]) -> bool {
    point.iter().all(|&v| (0.0..=1.0).contains(&v))
}

/// Produces replacement points strictly above a likelihood threshold.
pub(crate) struct SliceSampler {
    num_slices: u32,
    strategy: Box<dyn DirectionStrategy>,
}

impl SliceSampler {
    pub fn new(options: SliceOptions) -> Self {
        let strategy: Box<dyn DirectionStrategy> = if options.depth == 0 {
            Box::new(RandomPairDirection)
        } else {
            Box::new(ClusteredPairDirection {
                depth: options.depth,
            })
        };
        Self {
            num_slices: options.num_slices,
            strategy,
        }
    }

    #[cfg(test)]
    pub fn with_strategy(num_slices: u32, strategy: Box<dyn DirectionStrategy>) -> Self {
        Self {
            num_slices,
            strategy,
        }
    }

    /// Propose a point with `log_l > log_l_star`, seeded from a pool member
    /// other than `exclude` (the slot being replaced).
    ///
    /// Returns the point and the number of likelihood evaluations spent.
    pub fn propose<L: LogLikelihood, R: Rng>(
        &self,
        pool: &LivePointPool,
        exclude: usize,
        evaluator: &LikelihoodEvaluator<'_, L>,
        log_l_star: f64,
        rng: &mut R,
    ) -> Result<(LivePoint, u64), SampleError> {
        let n = pool.len();
        let seed_index = if n > 1 {
            let idx = rng.random_range(0..n - 1);
            if idx >= exclude {
                idx + 1
            } else {
                idx
            }
        } else {
            0
        };
        let start = &pool.points()[seed_index];
        let mut current = LivePoint {
            u: start.u.clone(),
            x: start.x.clone(),
            log_l: start.log_l,
        };
        let mut evals = 0u64;

        for _ in 0..self.num_slices {
            let dir = self.strategy.direction(pool, &current.u, rng);
            current = self.slice_along(&current, &dir, log_l_star, evaluator, rng, &mut evals)?;
        }
        Ok((current, evals))
    }

    /// One round of slice sampling along `dir` starting from `current`.
    fn slice_along<L: LogLikelihood, R: Rng>(
        &self,
        current: &LivePoint,
        dir: &[f64],
        log_l_star: f64,
        evaluator: &LikelihoodEvaluator<'_, L>,
        rng: &mut R,
        evals: &mut u64,
    ) -> Result<LivePoint, SampleError> {
        let at = |t: f64| -> Vec<f64> {
            current.u.iter().zip(dir).map(|(&u, &d)| u + t * d).collect()
        };
        let end_ok = |t: f64, evals: &mut u64| -> bool {
            let point = at(t);
            if !in_unit_cube(&point) {
                return false;
            }
            *evals += 1;
            let (_, log_l) = evaluator.evaluate(&point);
            log_l > log_l_star
        };

        // Randomly positioned initial bracket of one direction-length.
        let r: f64 = rng.random();
        let mut left = -r;
        let mut right = 1.0 - r;

        // Step out until both ends leave the cube or fall below threshold.
        for _ in 0..MAX_EXPAND_STEPS {
            if !end_ok(left, evals) {
                break;
            }
            left -= 1.0;
        }
        for _ in 0..MAX_EXPAND_STEPS {
            if !end_ok(right, evals) {
                break;
            }
            right += 1.0;
        }

        // Shrink toward rejected draws until one lands in the slice.
        for _ in 0..MAX_SHRINK_STEPS {
            let t = left + (right - left) * rng.random::<f64>();
            let point = at(t);
            if in_unit_cube(&point) {
                *evals += 1;
                let (x, log_l) = evaluator.evaluate(&point);
                if log_l > log_l_star {
                    return Ok(LivePoint { u: point, x, log_l });
                }
            }
            if t < 0.0 {
                left = t;
            } else {
                right = t;
            }
        }
        Err(SampleError::ProposalExhausted {
            threshold: log_l_star,
            max_steps: MAX_SHRINK_STEPS,
        })
    }
}
