//! Run configuration.

use crate::problem::{ProblemSize, WorkGroupShape, SHIPPED_CANDIDATES};
use crate::validate::DEFAULT_TOLERANCE;

/// Inputs of one tuning run.
#[derive(Clone, Debug, PartialEq)]
pub struct TunerConfig {
    pub problem: ProblemSize,
    /// Swept in order; ties go to the earlier entry.
    pub candidates: Vec<WorkGroupShape>,
    /// Seed every input tensor is generated from.
    pub seed: u64,
    /// Absolute tolerance of the final validation.
    pub tolerance: f32,
}

impl TunerConfig {
    pub fn new(problem: ProblemSize) -> Self {
        Self {
            problem,
            ..Self::default()
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<WorkGroupShape>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            problem: ProblemSize::default(),
            candidates: SHIPPED_CANDIDATES.to_vec(),
            seed: 0,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}
