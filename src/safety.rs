//! Safety boundary: resource ceilings for one solve.
//!
//! The solver calls [`SafetyBoundary::check`] at every candidate evaluation
//! point. Tripping a ceiling yields a named [`SafetyError`] carrying the limit;
//! the solver treats it as "stop this phase", never as a crash.

use std::time::{Duration, Instant};

use miette::Diagnostic;
use thiserror::Error;

use crate::complexity::{ComplexityVector, DIMENSION_NAMES};

#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum SafetyError {
    #[error("iteration limit reached: {limit}")]
    #[diagnostic(
        code(gridsynth::safety::iterations),
        help("Raise `max_iterations` or lower `max_complexity` to search a smaller space.")
    )]
    IterationLimit { limit: u64 },

    #[error("time budget of {limit_ms} ms exhausted")]
    #[diagnostic(
        code(gridsynth::safety::time),
        help("Raise `max_search_time_ms` for harder tasks.")
    )]
    TimeLimit { limit_ms: u64 },

    #[error("memory estimate {used} bytes exceeds {limit} bytes")]
    #[diagnostic(
        code(gridsynth::safety::memory),
        help("Raise `max_memory_mb` or reduce grid sizes and chain length.")
    )]
    MemoryLimit { used: usize, limit: usize },

    #[error("grid of {rows}x{cols} exceeds the {limit} cell-per-side ceiling")]
    #[diagnostic(
        code(gridsynth::safety::grid_size),
        help("Raise `max_grid_dim` if the task legitimately uses larger grids.")
    )]
    GridTooLarge { rows: usize, cols: usize, limit: usize },

    #[error("human oversight is required before search may start")]
    #[diagnostic(
        code(gridsynth::safety::oversight),
        help("Call `Solver::grant_oversight()` or set `human_oversight_required = false`.")
    )]
    OversightRequired,

    #[error("chain of length {length} exceeds the limit of {limit}")]
    #[diagnostic(
        code(gridsynth::safety::chain_length),
        help("Raise `max_chain_length` (hard cap 3).")
    )]
    ChainTooLong { length: usize, limit: usize },

    #[error("complexity jumped by {jump} on {dimension} (limit {limit})")]
    #[diagnostic(
        code(gridsynth::safety::complexity_jump),
        help("Raise `max_complexity_jump` to allow steeper steps between partitions.")
    )]
    ComplexityJump {
        dimension: &'static str,
        jump: u32,
        limit: u32,
    },
}

pub type SafetyResult<T> = std::result::Result<T, SafetyError>;

/// Ceilings for one solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyLimits {
    pub max_iterations: u64,
    pub max_time: Duration,
    pub max_memory_bytes: usize,
    pub max_grid_dim: usize,
    pub max_chain_length: usize,
    pub max_complexity_jump: u32,
    pub human_oversight_required: bool,
}

/// Counters for one solve, checked against [`SafetyLimits`].
#[derive(Debug)]
pub struct SafetyBoundary {
    limits: SafetyLimits,
    oversight_granted: bool,
    started: Option<Instant>,
    iterations: u64,
    memory_bytes: usize,
}

impl SafetyBoundary {
    pub fn new(limits: SafetyLimits) -> Self {
        Self {
            limits,
            oversight_granted: false,
            started: None,
            iterations: 0,
            memory_bytes: 0,
        }
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Record that a human approved the run.
    pub fn grant_oversight(&mut self) {
        self.oversight_granted = true;
    }

    /// Reset counters and start the clock. Refuses when oversight is required
    /// and has not been granted.
    pub fn start(&mut self) -> SafetyResult<()> {
        if self.limits.human_oversight_required && !self.oversight_granted {
            tracing::warn!("search refused: human oversight required");
            return Err(SafetyError::OversightRequired);
        }
        self.started = Some(Instant::now());
        self.iterations = 0;
        self.memory_bytes = 0;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn elapsed(&self) -> Duration {
        self.started.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Count one evaluation and test every running ceiling.
    pub fn check(&mut self) -> SafetyResult<()> {
        if self.started.is_none() {
            self.start()?;
        }
        self.iterations += 1;
        if self.iterations > self.limits.max_iterations {
            return Err(SafetyError::IterationLimit {
                limit: self.limits.max_iterations,
            });
        }
        if self.elapsed() > self.limits.max_time {
            return Err(SafetyError::TimeLimit {
                limit_ms: self.limits.max_time.as_millis() as u64,
            });
        }
        if self.memory_bytes > self.limits.max_memory_bytes {
            return Err(SafetyError::MemoryLimit {
                used: self.memory_bytes,
                limit: self.limits.max_memory_bytes,
            });
        }
        Ok(())
    }

    /// Add to the approximate memory estimate.
    pub fn charge(&mut self, bytes: usize) -> SafetyResult<()> {
        self.memory_bytes = self.memory_bytes.saturating_add(bytes);
        if self.memory_bytes > self.limits.max_memory_bytes {
            return Err(SafetyError::MemoryLimit {
                used: self.memory_bytes,
                limit: self.limits.max_memory_bytes,
            });
        }
        Ok(())
    }

    /// Release part of the memory estimate.
    pub fn release(&mut self, bytes: usize) {
        self.memory_bytes = self.memory_bytes.saturating_sub(bytes);
    }

    pub fn check_grid(&self, rows: usize, cols: usize) -> SafetyResult<()> {
        let limit = self.limits.max_grid_dim;
        if rows > limit || cols > limit {
            return Err(SafetyError::GridTooLarge { rows, cols, limit });
        }
        Ok(())
    }

    pub fn check_chain_len(&self, length: usize) -> SafetyResult<()> {
        if length > self.limits.max_chain_length {
            return Err(SafetyError::ChainTooLong {
                length,
                limit: self.limits.max_chain_length,
            });
        }
        Ok(())
    }

    /// Reject a step whose largest per-dimension change exceeds the limit.
    pub fn check_jump(&self, from: &ComplexityVector, to: &ComplexityVector) -> SafetyResult<()> {
        let (dim, jump) = from.max_jump(to);
        if jump > self.limits.max_complexity_jump {
            return Err(SafetyError::ComplexityJump {
                dimension: DIMENSION_NAMES[dim],
                jump,
                limit: self.limits.max_complexity_jump,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SafetyLimits {
        SafetyLimits {
            max_iterations: 3,
            max_time: Duration::from_secs(60),
            max_memory_bytes: 1000,
            max_grid_dim: 10,
            max_chain_length: 2,
            max_complexity_jump: 2,
            human_oversight_required: false,
        }
    }

    #[test]
    fn iteration_ceiling_trips() {
        let mut safety = SafetyBoundary::new(limits());
        safety.start().unwrap();
        for _ in 0..3 {
            safety.check().unwrap();
        }
        assert_eq!(safety.check(), Err(SafetyError::IterationLimit { limit: 3 }));
    }

    #[test]
    fn oversight_gate() {
        let mut safety = SafetyBoundary::new(SafetyLimits {
            human_oversight_required: true,
            ..limits()
        });
        assert_eq!(safety.start(), Err(SafetyError::OversightRequired));
        assert_eq!(safety.check(), Err(SafetyError::OversightRequired));
        safety.grant_oversight();
        safety.start().unwrap();
        assert!(safety.is_started());
    }

    #[test]
    fn time_ceiling_trips() {
        let mut safety = SafetyBoundary::new(SafetyLimits {
            max_time: Duration::ZERO,
            ..limits()
        });
        safety.start().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(safety.check(), Err(SafetyError::TimeLimit { .. })));
    }

    #[test]
    fn memory_and_shape_limits() {
        let mut safety = SafetyBoundary::new(limits());
        safety.charge(600).unwrap();
        assert!(safety.charge(600).is_err());
        safety.release(600);
        safety.charge(10).unwrap();
        assert!(safety.check_grid(10, 10).is_ok());
        assert!(safety.check_grid(11, 1).is_err());
        assert!(safety.check_chain_len(2).is_ok());
        assert_eq!(
            safety.check_chain_len(3),
            Err(SafetyError::ChainTooLong { length: 3, limit: 2 })
        );
    }

    #[test]
    fn jump_names_the_dimension() {
        let safety = SafetyBoundary::new(limits());
        let a = ComplexityVector::FLOOR;
        let mut arr = a.to_array();
        arr[2] = 4;
        let b = ComplexityVector::from_array(arr);
        match safety.check_jump(&a, &b) {
            Err(SafetyError::ComplexityJump { dimension, jump, .. }) => {
                assert_eq!(dimension, DIMENSION_NAMES[2]);
                assert_eq!(jump, 3);
            }
            other => panic!("expected jump error, got {other:?}"),
        }
    }
}
