//! Work-group shape autotuning.
//!
//! Tuning is a two-state machine.  [`Autotuner::sweep`] runs one trial
//! per candidate, in order, and yields a [`Tuned`] value; that value's
//! [`Tuned::run_final`] re-runs the winning shape once with validation.
//! Both consume `self`, so the TUNING → FINAL transition happens exactly
//! once.

use crate::environment::{ExecutionEnvironment, ProfilingInfo};
use crate::error::Result;
use crate::problem::{WorkGroupShape, DEFAULT_SHAPE};
use crate::validate::ValidationReport;

/// Whether a trial is part of the sweep or the validated final run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrialMode {
    Tuning,
    Final,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrialOutcome {
    pub timing: ProfilingInfo,
    /// Present for final runs.
    pub validation: Option<ValidationReport>,
}

/// An algorithm that can be tuned over local work-group shapes.
pub trait Algorithm<E: ExecutionEnvironment> {
    fn name(&self) -> &'static str;

    fn create_kernel(&mut self, env: &E) -> Result<()>;

    /// One full allocate → bind → dispatch → measure → release cycle.
    fn run_trial(&mut self, env: &E, local: WorkGroupShape, mode: TrialMode) -> Result<TrialOutcome>;
}

/// Fastest shape seen so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BestResult {
    pub shape: WorkGroupShape,
    pub min_execution_ns: u64,
}

impl BestResult {
    /// Starting point of every sweep: the fallback shape with an
    /// execution time nothing can tie.
    pub fn sentinel() -> Self {
        Self {
            shape: DEFAULT_SHAPE,
            min_execution_ns: u64::MAX,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.min_execution_ns == u64::MAX
    }

    /// Take `shape` if it is strictly faster.  Equal times keep the
    /// earlier shape.
    pub fn offer(&mut self, shape: WorkGroupShape, execution_ns: u64) -> bool {
        if execution_ns < self.min_execution_ns {
            self.shape = shape;
            self.min_execution_ns = execution_ns;
            true
        } else {
            false
        }
    }
}

impl Default for BestResult {
    fn default() -> Self {
        Self::sentinel()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrialRecord {
    pub shape: WorkGroupShape,
    pub timing: ProfilingInfo,
}

/// TUNING state: the ordered candidate list.
#[derive(Clone, Debug)]
pub struct Autotuner {
    candidates: Vec<WorkGroupShape>,
}

impl Autotuner {
    pub fn new(candidates: Vec<WorkGroupShape>) -> Self {
        Self { candidates }
    }

    /// Run one trial per candidate and keep the fastest.
    pub fn sweep<E, A>(self, env: &E, algorithm: &mut A) -> Result<Tuned>
    where
        E: ExecutionEnvironment,
        A: Algorithm<E>,
    {
        let mut best = BestResult::sentinel();
        let mut trials = Vec::with_capacity(self.candidates.len());
        for shape in self.candidates {
            log::info!("{}: trying local sizes {shape}", algorithm.name());
            let outcome = algorithm.run_trial(env, shape, TrialMode::Tuning)?;
            let ns = outcome.timing.execution_ns();
            if best.offer(shape, ns) {
                log::debug!("new best {shape}: {ns} ns");
            }
            trials.push(TrialRecord {
                shape,
                timing: outcome.timing,
            });
        }
        if best.is_sentinel() {
            log::warn!("no trial completed; falling back to local sizes {}", best.shape);
        }
        Ok(Tuned { best, trials })
    }
}

/// FINAL state: sweep finished, best shape fixed.
#[derive(Clone, Debug)]
pub struct Tuned {
    best: BestResult,
    trials: Vec<TrialRecord>,
}

impl Tuned {
    pub fn best(&self) -> BestResult {
        self.best
    }

    pub fn trials(&self) -> &[TrialRecord] {
        &self.trials
    }

    /// Re-run the best shape once, validating its output.
    pub fn run_final<E, A>(self, env: &E, algorithm: &mut A) -> Result<TuningReport>
    where
        E: ExecutionEnvironment,
        A: Algorithm<E>,
    {
        log::info!("Using best local sizes: {}", self.best.shape);
        let outcome = algorithm.run_trial(env, self.best.shape, TrialMode::Final)?;
        Ok(TuningReport {
            best: self.best,
            trials: self.trials,
            final_timing: outcome.timing,
            validation: outcome.validation,
        })
    }
}

/// Everything a finished run measured.
#[derive(Clone, Debug, PartialEq)]
pub struct TuningReport {
    pub best: BestResult,
    pub trials: Vec<TrialRecord>,
    pub final_timing: ProfilingInfo,
    pub validation: Option<ValidationReport>,
}

impl TuningReport {
    /// Per-candidate table followed by the chosen shape.
    pub fn summary(&self) -> String {
        let mut out = String::from("local size   start->end (ns)\n");
        for t in &self.trials {
            let marker = if t.shape == self.best.shape && !self.best.is_sentinel() { " *" } else { "" };
            out.push_str(&format!("{:<12} {:>15}{marker}\n", t.shape.to_string(), t.timing.execution_ns()));
        }
        out.push_str(&format!("best: {}", self.best.shape));
        if let Some(v) = self.validation {
            out.push_str(&format!(", {} outputs validated", v.checked));
        }
        out
    }
}
