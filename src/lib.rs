// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # gridsynth
//!
//! A program-synthesis engine for grid puzzles: given a few input/output
//! grid pairs, it searches a complexity-ordered ontology of transformations
//! for the simplest hypothesis reproducing every pair, then applies it to
//! the test inputs.
//!
//! ## Architecture
//!
//! - **Grids** (`grid`, `task`): immutable 2-D color grids and task loading
//! - **Ontology** (`ontology`, `complexity`): seven hierarchies of
//!   transformations, each entry tagged with a 7-dimensional complexity vector
//! - **Validation** (`validate`): six-stage pipeline with adversarial probes
//! - **Chains** (`chain`): sequential composition of ontology entries
//! - **Fast path** (`fastpath`): feature-driven candidates, fragment
//!   decomposition and convergence refinement
//! - **Memory** (`memory`): seven persisted cognitive layers biasing search
//! - **Safety** (`safety`): hard ceilings on time, iterations, memory and growth
//! - **Explanations** (`explain`): prose steps, detected patterns, diff heatmaps
//! - **Solver** (`solver`): the phase state machine tying it together
//!
//! ## Library usage
//!
//! ```no_run
//! use gridsynth::config::SolverConfig;
//! use gridsynth::solver::Solver;
//! use gridsynth::task::Task;
//!
//! let task = Task::from_file(std::path::Path::new("task.json")).unwrap();
//! let mut solver = Solver::new(SolverConfig::default()).unwrap();
//! let result = solver.solve(&task).unwrap();
//! println!("{}", serde_json::to_string_pretty(&result).unwrap());
//! ```

pub mod chain;
pub mod complexity;
pub mod config;
pub mod error;
pub mod explain;
pub mod fastpath;
pub mod grid;
pub mod memory;
pub mod ontology;
pub mod safety;
pub mod solver;
pub mod task;
pub mod validate;

pub use complexity::ComplexityVector;
pub use config::SolverConfig;
pub use error::{SynthError, SynthResult};
pub use grid::Grid;
pub use ontology::{Hierarchy, Hypothesis, Ontology};
pub use solver::{SolveResult, Solver};
pub use task::Task;
