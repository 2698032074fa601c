//! Prior specification as an ordered chain of named unit-cube transforms.
//!
//! Every variable maps a contiguous slice of the unit hypercube to its
//! parameter values through the inverse CDF of its distribution, so the
//! sampler can do all volume accounting in `[0, 1]^D` and only leave the
//! cube when a likelihood has to be evaluated.

use std::collections::HashSet;

use itertools::izip;
use thiserror::Error;

use crate::math::ndtri;

#[derive(Error, Debug)]
pub enum PriorError {
    #[error("prior variable {0:?} was already pushed onto the chain")]
    DuplicateName(String),
}

/// A bijective-per-coordinate map from the unit cube to parameter space.
pub trait PriorTransform: Send + Sync {
    /// Number of unit-cube coordinates this transform consumes.
    fn ndims(&self) -> usize;

    /// Fill `out` (length `ndims`) from the cube slice `u` (length `ndims`).
    fn transform(&self, u: &[f64], out: &mut [f64]);
}

struct Uniform {
    low: Vec<f64>,
    high: Vec<f64>,
}

impl PriorTransform for Uniform {
    fn ndims(&self) -> usize {
        self.low.len()
    }

    fn transform(&self, u: &[f64], out: &mut [f64]) {
        for (out, &u, &low, &high) in izip!(out.iter_mut(), u, &self.low, &self.high) {
            *out = low + u * (high - low);
        }
    }
}

struct Normal {
    mu: Vec<f64>,
    sigma: Vec<f64>,
}

impl PriorTransform for Normal {
    fn ndims(&self) -> usize {
        self.mu.len()
    }

    fn transform(&self, u: &[f64], out: &mut [f64]) {
        for (out, &u, &mu, &sigma) in izip!(out.iter_mut(), u, &self.mu, &self.sigma) {
            *out = mu + sigma * ndtri(u);
        }
    }
}

struct Laplace {
    mu: Vec<f64>,
    scale: Vec<f64>,
}

impl PriorTransform for Laplace {
    fn ndims(&self) -> usize {
        self.mu.len()
    }

    fn transform(&self, u: &[f64], out: &mut [f64]) {
        for (out, &u, &mu, &scale) in izip!(out.iter_mut(), u, &self.mu, &self.scale) {
            let q = u - 0.5;
            *out = mu - scale * q.signum() * (1.0 - 2.0 * q.abs()).ln();
        }
    }
}

struct HalfLaplace {
    scale: Vec<f64>,
}

impl PriorTransform for HalfLaplace {
    fn ndims(&self) -> usize {
        self.scale.len()
    }

    fn transform(&self, u: &[f64], out: &mut [f64]) {
        // |Laplace(0, b)| is exponential with scale b.
        for (out, &u, &scale) in izip!(out.iter_mut(), u, &self.scale) {
            *out = -scale * (1.0 - u).ln();
        }
    }
}

/// A named prior occupying one slice of the chain's dimension layout.
pub struct PriorVariable {
    name: String,
    transform: Box<dyn PriorTransform>,
}

impl PriorVariable {
    pub fn new(name: impl Into<String>, transform: impl PriorTransform + 'static) -> Self {
        Self {
            name: name.into(),
            transform: Box::new(transform),
        }
    }

    pub fn uniform(name: impl Into<String>, low: Vec<f64>, high: Vec<f64>) -> Self {
        assert_eq!(low.len(), high.len(), "uniform prior bounds must match");
        Self::new(name, Uniform { low, high })
    }

    pub fn normal(name: impl Into<String>, mu: Vec<f64>, sigma: Vec<f64>) -> Self {
        assert_eq!(mu.len(), sigma.len(), "normal prior parameters must match");
        Self::new(name, Normal { mu, sigma })
    }

    pub fn laplace(name: impl Into<String>, mu: Vec<f64>, scale: Vec<f64>) -> Self {
        assert_eq!(mu.len(), scale.len(), "laplace prior parameters must match");
        Self::new(name, Laplace { mu, scale })
    }

    pub fn half_laplace(name: impl Into<String>, scale: Vec<f64>) -> Self {
        Self::new(name, HalfLaplace { scale })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ndims(&self) -> usize {
        self.transform.ndims()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LayoutEntry {
    pub name: String,
    pub offset: usize,
    pub len: usize,
}

/// The dimension layout of a built chain: which slice of the flat parameter
/// vector belongs to which variable.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    entries: Vec<LayoutEntry>,
}

impl Layout {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub(crate) fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    fn slice_of(&self, name: &str) -> Option<(usize, usize)> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| (e.offset, e.len))
    }
}

/// A read-only view of one transformed parameter vector, addressable by
/// variable name.
#[derive(Clone, Copy)]
pub struct ParamView<'a> {
    values: &'a [f64],
    layout: &'a Layout,
}

impl<'a> ParamView<'a> {
    pub(crate) fn new(values: &'a [f64], layout: &'a Layout) -> Self {
        Self { values, layout }
    }

    /// The slice of values belonging to `name`, if the chain defines it.
    pub fn get(&self, name: &str) -> Option<&'a [f64]> {
        self.layout
            .slice_of(name)
            .map(|(offset, len)| &self.values[offset..offset + len])
    }

    /// The full flat parameter vector in chain order.
    pub fn values(&self) -> &'a [f64] {
        self.values
    }
}

/// Ordered, immutable set of named prior transforms.
pub struct PriorChain {
    variables: Vec<PriorVariable>,
    layout: Layout,
    ndims: usize,
}

impl PriorChain {
    pub fn builder() -> PriorChainBuilder {
        PriorChainBuilder::default()
    }

    /// Total unit-cube dimension D.
    pub fn ndims(&self) -> usize {
        self.ndims
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Apply every variable's transform to its slice of `u`, filling `out`.
    pub fn transform_into(&self, u: &[f64], out: &mut [f64]) {
        assert_eq!(u.len(), self.ndims);
        assert_eq!(out.len(), self.ndims);
        for (var, entry) in self.variables.iter().zip(self.layout.entries()) {
            let range = entry.offset..entry.offset + entry.len;
            var.transform.transform(&u[range.clone()], &mut out[range]);
        }
    }

    pub fn transform(&self, u: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.ndims];
        self.transform_into(u, &mut out);
        out
    }
}

/// Chain-of-pushes builder. `push` rejects duplicate names before any
/// sampling can start.
#[derive(Default)]
pub struct PriorChainBuilder {
    variables: Vec<PriorVariable>,
    names: HashSet<String>,
}

impl std::fmt::Debug for PriorChainBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorChainBuilder")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl PriorChainBuilder {
    pub fn push(mut self, variable: PriorVariable) -> Result<Self, PriorError> {
        if !self.names.insert(variable.name.clone()) {
            return Err(PriorError::DuplicateName(variable.name));
        }
        self.variables.push(variable);
        Ok(self)
    }

    pub fn build(self) -> PriorChain {
        let mut entries = Vec::with_capacity(self.variables.len());
        let mut offset = 0;
        for var in &self.variables {
            let len = var.ndims();
            entries.push(LayoutEntry {
                name: var.name.clone(),
                offset,
                len,
            });
            offset += len;
        }
        PriorChain {
            variables: self.variables,
            layout: Layout { entries },
            ndims: offset,
        }
    }
}
