//! Solver configuration: every operational knob, loadable from TOML.
//!
//! Missing keys fall back to their defaults, so a config file only needs to
//! name the values it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::complexity::FLOOR_TOTAL;
use crate::grid::DEFAULT_MAX_DIM;
use crate::safety::SafetyLimits;

/// Longest chain the search will ever build, regardless of configuration.
pub const HARD_CHAIN_CAP: usize = 3;

/// Errors from loading or saving a config file.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(gridsynth::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(gridsynth::config::parse),
        help("Check the TOML syntax; unknown keys are rejected.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(gridsynth::config::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid setting {key}: {message}")]
    #[diagnostic(
        code(gridsynth::config::invalid),
        help("Complexity bounds must satisfy 7 <= min_complexity <= max_complexity.")
    )]
    Invalid { key: &'static str, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Tuning of the cognitive memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Relative tolerance when comparing fingerprints (0.25 = within 25%).
    pub fingerprint_tolerance: f64,
    /// Capacity of the error ring buffer.
    pub error_capacity: usize,
    /// Oldest episodes are dropped past this count.
    pub max_episodes: usize,
    /// Starting exploration rate of a fresh curriculum.
    pub initial_exploration_rate: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            fingerprint_tolerance: 0.25,
            error_capacity: 64,
            max_episodes: 5_000,
            initial_exploration_rate: 0.3,
        }
    }
}

/// All knobs of one solver instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    pub max_search_time_ms: u64,
    pub max_iterations: u64,
    pub max_memory_mb: usize,
    pub max_grid_dim: usize,
    /// First total complexity level searched.
    pub min_complexity: u32,
    /// Last total complexity level searched.
    pub max_complexity: u32,
    /// Longest chain built in chain search; clamped to [`HARD_CHAIN_CAP`].
    pub max_chain_length: usize,
    /// Largest per-dimension change allowed between consecutive search steps.
    pub max_complexity_jump: u32,
    /// Cap on candidates drawn in one wave (one total level, or one chain length).
    pub max_strategies_per_wave: usize,
    /// Past this budget a candidate skips the advisory validation stages.
    pub candidate_time_budget_ms: u64,
    pub human_oversight_required: bool,
    /// Let the counterexample stage veto acceptance.
    pub strict_counterexample: bool,
    /// Allow the curriculum to override prior-biased ordering.
    pub exploration: bool,
    /// Log every wave at info level.
    pub verbose: bool,
    pub fast_path: bool,
    pub max_fragments: usize,
    pub convergence_cycles: usize,
    pub near_miss_keep: usize,
    /// Seed of the exploration RNG.
    pub seed: u64,
    /// Directory of the persisted memory layers; `None` keeps memory in process.
    pub memory_dir: Option<PathBuf>,
    pub memory: MemoryConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_search_time_ms: 30_000,
            max_iterations: 250_000,
            max_memory_mb: 512,
            max_grid_dim: DEFAULT_MAX_DIM,
            min_complexity: FLOOR_TOTAL,
            max_complexity: 16,
            max_chain_length: 2,
            max_complexity_jump: 3,
            max_strategies_per_wave: 20_000,
            candidate_time_budget_ms: 250,
            human_oversight_required: false,
            strict_counterexample: false,
            exploration: true,
            verbose: false,
            fast_path: true,
            max_fragments: 16,
            convergence_cycles: 12,
            near_miss_keep: 5,
            seed: 0x5EED,
            memory_dir: None,
            memory: MemoryConfig::default(),
        }
    }
}

impl SolverConfig {
    /// Load from a TOML file and validate.
    pub fn from_toml_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_complexity < FLOOR_TOTAL {
            return Err(ConfigError::Invalid {
                key: "min_complexity",
                message: format!("{} is below the floor of {FLOOR_TOTAL}", self.min_complexity),
            });
        }
        if self.max_complexity < self.min_complexity {
            return Err(ConfigError::Invalid {
                key: "max_complexity",
                message: format!(
                    "{} is below min_complexity {}",
                    self.max_complexity, self.min_complexity
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.memory.initial_exploration_rate) {
            return Err(ConfigError::Invalid {
                key: "memory.initial_exploration_rate",
                message: "must lie in [0, 1]".into(),
            });
        }
        Ok(())
    }

    /// Chain length actually used by chain search.
    pub fn effective_chain_length(&self) -> usize {
        self.max_chain_length.clamp(1, HARD_CHAIN_CAP)
    }

    pub fn candidate_budget(&self) -> Duration {
        Duration::from_millis(self.candidate_time_budget_ms)
    }

    /// Safety ceilings for one solve.
    pub fn safety_limits(&self) -> SafetyLimits {
        SafetyLimits {
            max_iterations: self.max_iterations,
            max_time: Duration::from_millis(self.max_search_time_ms),
            max_memory_bytes: self.max_memory_mb.saturating_mul(1024 * 1024),
            max_grid_dim: self.max_grid_dim,
            max_chain_length: self.effective_chain_length(),
            max_complexity_jump: self.max_complexity_jump,
            human_oversight_required: self.human_oversight_required,
        }
    }
}
