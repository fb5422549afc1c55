//! Task model: training pairs plus test inputs, as read from JSON.

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::{DEFAULT_MAX_DIM, Grid};

/// Errors for malformed tasks. These are the only errors `solve` raises.
#[derive(Debug, Error, Diagnostic)]
pub enum TaskError {
    #[error("task \"{id}\" has no training pairs")]
    #[diagnostic(
        code(gridsynth::task::no_training_pairs),
        help("A task needs at least one (input, output) example to infer a rule from.")
    )]
    NoTrainingPairs { id: String },

    #[error("task \"{id}\": {location} is {rows}x{cols}, above the {max}x{max} ceiling")]
    #[diagnostic(
        code(gridsynth::task::grid_too_large),
        help("Raise `max_grid_dim` in the solver config or shrink the task grids.")
    )]
    GridTooLarge {
        id: String,
        location: String,
        rows: usize,
        cols: usize,
        max: usize,
    },

    #[error("failed to parse task JSON: {message}")]
    #[diagnostic(
        code(gridsynth::task::parse),
        help(
            "Expected {{\"id\"?: string, \"train\": [{{\"input\": [[int]], \"output\": [[int]]}}], \
             \"test\": [{{\"input\": [[int]], \"output\"?: [[int]]}}]}}. \
             Every grid must be non-empty with rows of equal length."
        )
    )]
    Parse { message: String },

    #[error("failed to read task file: {path}")]
    #[diagnostic(
        code(gridsynth::task::io),
        help("Check that the file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// One worked example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainPair {
    pub input: Grid,
    pub output: Grid,
}

impl TrainPair {
    pub fn new(input: Grid, output: Grid) -> Self {
        Self { input, output }
    }
}

/// A held-out input, optionally with its expected output for offline scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPair {
    pub input: Grid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Grid>,
}

/// A few-shot grid transformation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Memory lookup key. ARC-format files carry no id; loaders fill it from
    /// the file name.
    #[serde(default)]
    pub id: String,
    pub train: Vec<TrainPair>,
    #[serde(default)]
    pub test: Vec<TestPair>,
}

impl Task {
    pub fn new(id: impl Into<String>, train: Vec<TrainPair>, test: Vec<TestPair>) -> Self {
        Self {
            id: id.into(),
            train,
            test,
        }
    }

    /// Parse a task from JSON text.
    pub fn from_json(text: &str) -> TaskResult<Self> {
        serde_json::from_str(text).map_err(|e| TaskError::Parse {
            message: e.to_string(),
        })
    }

    /// Load a task file. An empty id is replaced by the file stem.
    pub fn from_file(path: &Path) -> TaskResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| TaskError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut task = Self::from_json(&text)?;
        if task.id.is_empty() {
            task.id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "task".to_string());
        }
        Ok(task)
    }

    /// Reject tasks the solver cannot start on. Ragged and empty grids are
    /// already rejected when grids are constructed.
    pub fn validate(&self, max_dim: usize) -> TaskResult<()> {
        if self.train.is_empty() {
            return Err(TaskError::NoTrainingPairs {
                id: self.id.clone(),
            });
        }
        let grids = self
            .train
            .iter()
            .enumerate()
            .flat_map(|(i, p)| {
                [
                    (format!("train[{i}].input"), &p.input),
                    (format!("train[{i}].output"), &p.output),
                ]
            })
            .chain(self.test.iter().enumerate().flat_map(|(i, p)| {
                std::iter::once((format!("test[{i}].input"), &p.input)).chain(
                    p.output
                        .as_ref()
                        .map(|o| (format!("test[{i}].output"), o)),
                )
            }));
        for (location, grid) in grids {
            if grid.rows() > max_dim || grid.cols() > max_dim {
                return Err(TaskError::GridTooLarge {
                    id: self.id.clone(),
                    location,
                    rows: grid.rows(),
                    cols: grid.cols(),
                    max: max_dim,
                });
            }
        }
        Ok(())
    }

    /// Validate against the default dimension ceiling.
    pub fn validate_default(&self) -> TaskResult<()> {
        self.validate(DEFAULT_MAX_DIM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "id": "swap",
        "train": [{"input": [[1,2]], "output": [[2,1]]}],
        "test": [{"input": [[2,1]]}, {"input": [[1,1]], "output": [[2,2]]}]
    }"#;

    #[test]
    fn parses_task_json() {
        let task = Task::from_json(SAMPLE).unwrap();
        assert_eq!(task.id, "swap");
        assert_eq!(task.train.len(), 1);
        assert!(task.test[0].output.is_none());
        assert_eq!(task.test[1].output.as_ref().unwrap().to_rows(), vec![vec![2, 2]]);
        assert!(task.validate_default().is_ok());
    }

    #[test]
    fn missing_id_defaults_empty() {
        let task = Task::from_json(r#"{"train": [{"input": [[1]], "output": [[1]]}], "test": []}"#)
            .unwrap();
        assert!(task.id.is_empty());
    }

    #[test]
    fn ragged_grid_is_parse_error() {
        let err = Task::from_json(r#"{"train": [{"input": [[1,2],[3]], "output": [[1]]}]}"#)
            .unwrap_err();
        match err {
            TaskError::Parse { message } => assert!(message.contains("ragged"), "{message}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_training_pairs_rejected() {
        let task = Task::new("empty", vec![], vec![]);
        assert!(matches!(
            task.validate_default(),
            Err(TaskError::NoTrainingPairs { .. })
        ));
    }

    #[test]
    fn oversize_grid_rejected() {
        let big = Grid::filled(5, 5, 0);
        let task = Task::new("big", vec![TrainPair::new(big.clone(), big)], vec![]);
        let err = task.validate(4).unwrap_err();
        assert!(matches!(err, TaskError::GridTooLarge { rows: 5, max: 4, .. }));
    }

    #[test]
    fn file_stem_becomes_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("abc123.json");
        std::fs::write(&path, r#"{"train": [{"input": [[1]], "output": [[1]]}]}"#).unwrap();
        let task = Task::from_file(&path).unwrap();
        assert_eq!(task.id, "abc123");
    }
}
