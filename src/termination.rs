//! Stop conditions for the sequential loop.

/// Which condition ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The evidence still enclosed by the live pool fell below
    /// `termination_frac` of the accumulated evidence.
    EvidenceConverged,
    /// The likelihood-evaluation budget was exhausted.
    MaxSamplesReached,
}

pub(crate) struct TerminationPolicy {
    termination_frac: f64,
    max_samples: u64,
}

impl TerminationPolicy {
    pub fn new(termination_frac: f64, max_samples: u64) -> Self {
        Self {
            termination_frac,
            max_samples,
        }
    }

    /// `Some(reason)` once either condition holds. The remaining-evidence
    /// ratio is NaN while `log_z` is still `-inf`, which correctly keeps
    /// the run going.
    pub fn check(&self, log_z: f64, remaining: f64, num_evals: u64) -> Option<TerminationReason> {
        if (remaining - log_z).exp() < self.termination_frac {
            return Some(TerminationReason::EvidenceConverged);
        }
        if num_evals >= self.max_samples {
            return Some(TerminationReason::MaxSamplesReached);
        }
        None
    }
}
