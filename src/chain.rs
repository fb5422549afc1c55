//! Chain executor and bounded chain generator.
//!
//! The executor threads a grid through ordered steps and records a trace per
//! step. The generator enumerates chains over a pool of atomic hypotheses,
//! shortest first, and within one length visits chains whose steps come from
//! pairwise distinct hierarchies before chains that repeat a hierarchy.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::Grid;
use crate::ontology::{Hypothesis, TransformError};
use crate::safety::{SafetyBoundary, SafetyError};

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ChainError {
    #[error("step {index} ({operation}) failed: {source}")]
    #[diagnostic(
        code(gridsynth::chain::step),
        help("The step's input did not satisfy its precondition; the chain is discarded.")
    )]
    Step {
        index: usize,
        operation: String,
        #[source]
        source: TransformError,
    },

    #[error("chain has no steps")]
    #[diagnostic(code(gridsynth::chain::empty), help("Provide at least one step."))]
    Empty,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Safety(#[from] SafetyError),
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error { message: String },
    /// Not run because an earlier step aborted the chain.
    Skipped,
}

/// Trace entry for one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTrace {
    pub index: usize,
    pub operation: String,
    pub input_dims: (usize, usize),
    pub output_dims: Option<(usize, usize)>,
    pub duration_us: u64,
    #[serde(flatten)]
    pub status: StepStatus,
}

impl StepTrace {
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.duration_us)
    }

    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Result of running a chain: the final grid (if any), the trace and the
/// first error that stopped or degraded the run.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub output: Option<Grid>,
    pub trace: Vec<StepTrace>,
    pub error: Option<ChainError>,
}

impl ChainOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.output.is_some()
    }

    pub fn into_result(self) -> ChainResult<Grid> {
        match (self.error, self.output) {
            (Some(e), _) => Err(e),
            (None, Some(g)) => Ok(g),
            (None, None) => Err(ChainError::Empty),
        }
    }
}

/// Runs ordered hypothesis steps against a grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainExecutor {
    /// Keep going after a failed step, feeding the last good grid onward.
    pub continue_on_error: bool,
}

impl ChainExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn continue_on_error(mut self, yes: bool) -> Self {
        self.continue_on_error = yes;
        self
    }

    pub fn execute(&self, steps: &[Hypothesis], input: &Grid) -> ChainOutcome {
        self.run(steps, input, None)
    }

    /// Like [`execute`](Self::execute) but checks the safety boundary before
    /// every step and charges intermediate grids against its memory estimate.
    pub fn execute_guarded(
        &self,
        steps: &[Hypothesis],
        input: &Grid,
        safety: &mut SafetyBoundary,
    ) -> ChainOutcome {
        if let Err(e) = safety.check_chain_len(steps.len()) {
            return ChainOutcome {
                output: None,
                trace: Vec::new(),
                error: Some(e.into()),
            };
        }
        self.run(steps, input, Some(safety))
    }

    fn run(
        &self,
        steps: &[Hypothesis],
        input: &Grid,
        mut safety: Option<&mut SafetyBoundary>,
    ) -> ChainOutcome {
        if steps.is_empty() {
            return ChainOutcome {
                output: None,
                trace: Vec::new(),
                error: Some(ChainError::Empty),
            };
        }
        let mut trace = Vec::with_capacity(steps.len());
        let mut current = input.clone();
        let mut first_error = None;
        let mut charged = 0usize;

        for (index, step) in steps.iter().enumerate() {
            if let Some(guard) = safety.as_deref_mut() {
                if let Err(e) = guard.check() {
                    first_error = Some(ChainError::Safety(e));
                    push_skipped(&mut trace, steps, index, &current);
                    break;
                }
            }
            let started = Instant::now();
            let result = step.apply(&current);
            let duration_us = started.elapsed().as_micros() as u64;
            match result {
                Ok(next) => {
                    trace.push(StepTrace {
                        index,
                        operation: step.qualified_name(),
                        input_dims: current.dims(),
                        output_dims: Some(next.dims()),
                        duration_us,
                        status: StepStatus::Success,
                    });
                    if let Some(guard) = safety.as_deref_mut() {
                        charged += next.len();
                        if let Err(e) = guard.charge(next.len()) {
                            first_error = Some(ChainError::Safety(e));
                            current = next;
                            push_skipped(&mut trace, steps, index + 1, &current);
                            break;
                        }
                    }
                    current = next;
                }
                Err(source) => {
                    tracing::trace!(step = index, operation = %step.qualified_name(), error = %source, "chain step failed");
                    trace.push(StepTrace {
                        index,
                        operation: step.qualified_name(),
                        input_dims: current.dims(),
                        output_dims: None,
                        duration_us,
                        status: StepStatus::Error {
                            message: source.to_string(),
                        },
                    });
                    if first_error.is_none() {
                        first_error = Some(ChainError::Step {
                            index,
                            operation: step.qualified_name(),
                            source,
                        });
                    }
                    if !self.continue_on_error {
                        push_skipped(&mut trace, steps, index + 1, &current);
                        if let Some(guard) = safety.as_deref_mut() {
                            guard.release(charged);
                        }
                        return ChainOutcome {
                            output: None,
                            trace,
                            error: first_error,
                        };
                    }
                }
            }
        }
        if let Some(guard) = safety {
            guard.release(charged);
        }
        let aborted = matches!(first_error, Some(ChainError::Safety(_)));
        ChainOutcome {
            output: (!aborted).then_some(current),
            trace,
            error: first_error,
        }
    }
}

fn push_skipped(trace: &mut Vec<StepTrace>, steps: &[Hypothesis], from: usize, current: &Grid) {
    for (index, step) in steps.iter().enumerate().skip(from) {
        trace.push(StepTrace {
            index,
            operation: step.qualified_name(),
            input_dims: current.dims(),
            output_dims: None,
            duration_us: 0,
            status: StepStatus::Skipped,
        });
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Bounded, restartable enumeration of chains over a pool.
///
/// Lengths run from `min_len` to `max_len`. For each length the generator
/// makes two passes over index tuples in lexicographic order: the first yields
/// tuples whose steps all come from different hierarchies, the second the
/// rest. Tuples repeating the same entry back to back are never yielded.
#[derive(Debug, Clone)]
pub struct ChainGenerator<'a> {
    pool: &'a [Hypothesis],
    max_len: usize,
    len: usize,
    distinct_pass: bool,
    odometer: Vec<usize>,
    exhausted: bool,
}

impl<'a> ChainGenerator<'a> {
    pub fn new(pool: &'a [Hypothesis], min_len: usize, max_len: usize) -> Self {
        let min_len = min_len.max(1);
        Self {
            pool,
            max_len,
            len: min_len,
            distinct_pass: true,
            odometer: vec![0; min_len],
            exhausted: pool.is_empty() || min_len > max_len,
        }
    }

    /// Current chain length being enumerated.
    pub fn current_len(&self) -> usize {
        self.len
    }

    /// Upper bound on chains yielded, before filtering.
    pub fn bound(&self) -> u128 {
        (self.len..=self.max_len)
            .map(|l| (self.pool.len() as u128).pow(l as u32))
            .sum()
    }

    fn admissible(&self) -> bool {
        if self.odometer.windows(2).any(|w| w[0] == w[1]) {
            return false;
        }
        let mut seen = HashSet::with_capacity(self.odometer.len());
        let distinct = self
            .odometer
            .iter()
            .all(|&i| seen.insert(self.pool[i].hierarchy()));
        distinct == self.distinct_pass
    }

    /// Abandon the current length and continue with the next one.
    pub fn skip_length(&mut self) {
        self.distinct_pass = true;
        self.len += 1;
        if self.len > self.max_len {
            self.exhausted = true;
        }
        self.odometer = vec![0; self.len];
    }

    /// Step the odometer; on overflow move to the next pass or length.
    fn advance(&mut self) {
        for slot in (0..self.odometer.len()).rev() {
            self.odometer[slot] += 1;
            if self.odometer[slot] < self.pool.len() {
                return;
            }
            self.odometer[slot] = 0;
        }
        if self.distinct_pass {
            self.distinct_pass = false;
        } else {
            self.skip_length();
        }
    }
}

impl Iterator for ChainGenerator<'_> {
    type Item = Hypothesis;

    fn next(&mut self) -> Option<Hypothesis> {
        while !self.exhausted {
            let hit = self.admissible();
            let steps: Vec<Hypothesis> = if hit {
                self.odometer.iter().map(|&i| self.pool[i].clone()).collect()
            } else {
                Vec::new()
            };
            self.advance();
            if hit {
                return Some(Hypothesis::chain(steps));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::grid::grid;
    use crate::ontology::{Hierarchy, Ontology};

    fn steps(names: &[&str]) -> Vec<Hypothesis> {
        let ontology = Ontology::standard();
        names
            .iter()
            .map(|n| ontology.get(n).cloned().unwrap())
            .collect()
    }

    #[test]
    fn threads_output_to_next_step() {
        let chain = steps(&["structural:flipHorizontal", "color:recolor1to2"]);
        let outcome = ChainExecutor::new().execute(&chain, &grid(&[&[1, 0, 0]]));
        assert!(outcome.is_ok());
        assert_eq!(outcome.trace.len(), 2);
        assert!(outcome.trace.iter().all(StepTrace::succeeded));
        assert_eq!(outcome.into_result().unwrap().to_rows(), vec![vec![0, 0, 2]]);
    }

    #[test]
    fn aborts_on_error_by_default() {
        let chain = steps(&["structural:scaleDown2", "structural:flipVertical"]);
        let outcome = ChainExecutor::new().execute(&chain, &grid(&[&[1, 2, 3]]));
        assert!(outcome.output.is_none());
        assert!(matches!(outcome.error, Some(ChainError::Step { index: 0, .. })));
        assert_eq!(outcome.trace[1].status, StepStatus::Skipped);
    }

    #[test]
    fn continue_on_error_keeps_last_good_grid() {
        let chain = steps(&["structural:scaleDown2", "structural:flipHorizontal"]);
        let outcome = ChainExecutor::new()
            .continue_on_error(true)
            .execute(&chain, &grid(&[&[1, 2, 3]]));
        assert!(outcome.error.is_some());
        assert_eq!(outcome.output.unwrap().to_rows(), vec![vec![3, 2, 1]]);
        assert!(outcome.trace[1].succeeded());
    }

    #[test]
    fn guarded_execution_checks_chain_length() {
        let config = SolverConfig {
            max_chain_length: 1,
            ..Default::default()
        };
        let mut safety = SafetyBoundary::new(config.safety_limits());
        safety.start().unwrap();
        let chain = steps(&["structural:flipHorizontal", "structural:flipVertical"]);
        let outcome = ChainExecutor::new().execute_guarded(&chain, &grid(&[&[1]]), &mut safety);
        assert!(matches!(
            outcome.error,
            Some(ChainError::Safety(SafetyError::ChainTooLong { .. }))
        ));
    }

    #[test]
    fn generator_prefers_distinct_hierarchies() {
        let pool = steps(&[
            "structural:flipHorizontal",
            "structural:flipVertical",
            "color:recolor1to2",
        ]);
        let chains: Vec<String> = ChainGenerator::new(&pool, 2, 2)
            .map(|h| h.qualified_name())
            .collect();
        // 3*3 tuples minus 3 back-to-back repeats.
        assert_eq!(chains.len(), 6);
        let first_repeat = chains
            .iter()
            .position(|c| !c.contains("color:"))
            .unwrap();
        assert!(chains[..first_repeat].iter().all(|c| c.contains("color:")));
        assert_eq!(first_repeat, 4);
    }

    #[test]
    fn skipping_a_length_jumps_to_the_next() {
        let pool = steps(&[
            "structural:flipHorizontal",
            "structural:flipVertical",
            "color:recolor1to2",
        ]);
        let mut chains = ChainGenerator::new(&pool, 2, 3);
        assert_eq!(chains.next().map(|h| h.chain_len()), Some(2));
        chains.skip_length();
        assert_eq!(chains.current_len(), 3);
        assert!(chains.all(|h| h.chain_len() == 3));

        let mut last = ChainGenerator::new(&pool, 2, 2);
        last.skip_length();
        assert!(last.next().is_none());
    }

    #[test]
    fn generator_is_bounded_and_restartable() {
        let pool = steps(&["structural:flipHorizontal", "color:recolor1to2"]);
        let generator = ChainGenerator::new(&pool, 1, 3);
        let a: Vec<String> = generator.clone().map(|h| h.qualified_name()).collect();
        let b: Vec<String> = generator.map(|h| h.qualified_name()).collect();
        assert_eq!(a, b);
        // 2 singles, 2 pairs, 2 alternating triples.
        assert_eq!(a.len(), 6);
        assert_eq!(a[0], "structural:flipHorizontal");
        let h: Vec<Hierarchy> = pool.iter().map(Hypothesis::hierarchy).collect();
        assert_eq!(h, vec![Hierarchy::Structural, Hierarchy::Color]);
    }
}
