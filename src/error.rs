//! Crate-level error type.
//!
//! Each subsystem defines its own error enum with miette `#[diagnostic]`
//! derives. [`SynthError`] wraps them transparently so codes and help text
//! reach the user unchanged.

use miette::Diagnostic;
use thiserror::Error;

use crate::chain::ChainError;
use crate::config::ConfigError;
use crate::grid::GridError;
use crate::memory::MemoryError;
use crate::ontology::TransformError;
use crate::safety::SafetyError;
use crate::task::TaskError;

#[derive(Debug, Error, Diagnostic)]
pub enum SynthError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Safety(#[from] SafetyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

pub type SynthResult<T> = std::result::Result<T, SynthError>;
