//! The seven memory layers. Each is a plain serializable struct; the store
//! wraps them in a versioned envelope on disk.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::grid::Grid;
use crate::ontology::Hierarchy;

/// Curriculum exploration rate bounds.
pub const MIN_EXPLORATION: f64 = 0.1;
pub const MAX_EXPLORATION: f64 = 0.5;

const EXPLORATION_DECAY: f64 = 0.9;
const EXPLORATION_GROWTH: f64 = 1.1;

/// Names the seven persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Episodic,
    Semantic,
    Procedural,
    Prediction,
    Error,
    Priors,
    Curriculum,
}

impl LayerKind {
    pub const ALL: [LayerKind; 7] = [
        Self::Episodic,
        Self::Semantic,
        Self::Procedural,
        Self::Prediction,
        Self::Error,
        Self::Priors,
        Self::Curriculum,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Prediction => "prediction",
            Self::Error => "error",
            Self::Priors => "priors",
            Self::Curriculum => "curriculum",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Coarse feature key of an input grid, compared with a tolerance band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub rows: usize,
    pub cols: usize,
    pub unique_colors: usize,
    pub object_count: usize,
    /// Foreground cells over all cells.
    pub density: f64,
}

impl Fingerprint {
    pub fn from_grid(g: &Grid) -> Self {
        let len = g.len().max(1);
        Self {
            rows: g.rows(),
            cols: g.cols(),
            unique_colors: g.unique_colors().len(),
            object_count: g.objects().len(),
            density: g.foreground_count() as f64 / len as f64,
        }
    }

    /// Whether every count is within `tolerance` relative difference and the
    /// densities differ by at most `tolerance`.
    pub fn matches(&self, other: &Fingerprint, tolerance: f64) -> bool {
        let close = |a: usize, b: usize| {
            let (a, b) = (a as f64, b as f64);
            (a - b).abs() <= tolerance * a.max(b)
        };
        close(self.rows, other.rows)
            && close(self.cols, other.cols)
            && close(self.unique_colors, other.unique_colors)
            && close(self.object_count, other.object_count)
            && (self.density - other.density).abs() <= tolerance
    }
}

// ---------------------------------------------------------------------------
// Episodic
// ---------------------------------------------------------------------------

/// One attempted hypothesis outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub task_id: String,
    pub hypothesis: String,
    /// Hierarchy label, or `chain`.
    pub hierarchy: String,
    pub complexity: u32,
    pub accuracy: f64,
    pub score: f64,
    pub passed: bool,
    pub fingerprint: Fingerprint,
    /// Seconds since the Unix epoch.
    pub recorded_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodicLayer {
    pub episodes: VecDeque<Episode>,
}

impl EpisodicLayer {
    /// Append, dropping the oldest episodes beyond `capacity`.
    pub fn push(&mut self, episode: Episode, capacity: usize) {
        self.episodes.push_back(episode);
        while self.episodes.len() > capacity {
            self.episodes.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Semantic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyStats {
    pub attempts: u64,
    pub successes: u64,
    pub accuracy_sum: f64,
}

impl HierarchyStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    pub fn mean_accuracy(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.accuracy_sum / self.attempts as f64
        }
    }
}

/// Success-rate rollup per hierarchy label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticLayer {
    pub by_hierarchy: BTreeMap<String, HierarchyStats>,
}

impl SemanticLayer {
    pub fn record(&mut self, label: &str, passed: bool, accuracy: f64) {
        let stats = self.by_hierarchy.entry(label.to_string()).or_default();
        stats.attempts += 1;
        stats.accuracy_sum += accuracy;
        if passed {
            stats.successes += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Procedural
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub hierarchy: Hierarchy,
    pub uses: u64,
    pub last_task: String,
}

/// Frequency table of hypotheses that solved a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProceduralLayer {
    pub procedures: BTreeMap<String, Procedure>,
}

impl ProceduralLayer {
    pub fn record_success(&mut self, strategy: &str, hierarchy: Hierarchy, task_id: &str) {
        let entry = self
            .procedures
            .entry(strategy.to_string())
            .or_insert_with(|| Procedure {
                hierarchy,
                uses: 0,
                last_task: String::new(),
            });
        entry.uses += 1;
        entry.last_task = task_id.to_string();
    }

    /// The `n` most used procedures, ties broken by name.
    pub fn top(&self, n: usize) -> Vec<(&str, &Procedure)> {
        let mut all: Vec<_> = self
            .procedures
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        all.sort_by(|a, b| b.1.uses.cmp(&a.1.uses).then(a.0.cmp(b.0)));
        all.truncate(n);
        all
    }
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEntry {
    pub fingerprint: Fingerprint,
    pub strategy: String,
    pub hits: u64,
}

/// Input fingerprint → strategy that solved it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionLayer {
    pub entries: Vec<PredictionEntry>,
}

impl PredictionLayer {
    pub fn record(&mut self, fingerprint: Fingerprint, strategy: &str) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.strategy == strategy && e.fingerprint == fingerprint)
        {
            Some(entry) => entry.hits += 1,
            None => self.entries.push(PredictionEntry {
                fingerprint,
                strategy: strategy.to_string(),
                hits: 1,
            }),
        }
    }

    /// Strategies whose fingerprint matches within `tolerance`, most hits first.
    pub fn lookup(&self, fingerprint: &Fingerprint, tolerance: f64) -> Vec<String> {
        let mut hits: BTreeMap<&str, u64> = BTreeMap::new();
        for entry in &self.entries {
            if entry.fingerprint.matches(fingerprint, tolerance) {
                *hits.entry(entry.strategy.as_str()).or_insert(0) += entry.hits;
            }
        }
        let mut ranked: Vec<(&str, u64)> = hits.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        ranked.into_iter().map(|(s, _)| s.to_string()).collect()
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub task_id: String,
    pub hypothesis: String,
    pub accuracy: f64,
    /// Execution error, when the hypothesis raised one.
    pub message: Option<String>,
    pub recorded_at: u64,
}

/// Ring buffer of recent failures, near misses included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorLayer {
    pub recent: VecDeque<ErrorRecord>,
}

impl ErrorLayer {
    pub fn push(&mut self, record: ErrorRecord, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.recent.len() >= capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Priors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorCounts {
    pub attempts: u64,
    pub successes: u64,
}

/// Per-hierarchy success probability with a Laplace prior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorsLayer {
    pub counts: BTreeMap<Hierarchy, PriorCounts>,
}

impl PriorsLayer {
    pub fn record(&mut self, hierarchy: Hierarchy, passed: bool) {
        let counts = self.counts.entry(hierarchy).or_default();
        counts.attempts += 1;
        if passed {
            counts.successes += 1;
        }
    }

    /// `(successes + 1) / (attempts + 2)`; 0.5 for an unseen hierarchy.
    pub fn probability(&self, hierarchy: Hierarchy) -> f64 {
        let c = self.counts.get(&hierarchy).copied().unwrap_or_default();
        (c.successes as f64 + 1.0) / (c.attempts as f64 + 2.0)
    }
}

// ---------------------------------------------------------------------------
// Curriculum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriculumLayer {
    pub exploration_rate: f64,
    /// Highest total complexity of any accepted solution.
    pub max_solved_complexity: u32,
    pub tasks_seen: u64,
    pub tasks_solved: u64,
}

impl CurriculumLayer {
    pub fn new(initial_rate: f64) -> Self {
        Self {
            exploration_rate: initial_rate.clamp(MIN_EXPLORATION, MAX_EXPLORATION),
            max_solved_complexity: 0,
            tasks_seen: 0,
            tasks_solved: 0,
        }
    }

    /// Decay exploration after a success, grow it after a failure.
    pub fn record_task(&mut self, solved_complexity: Option<u32>) {
        self.tasks_seen += 1;
        let factor = match solved_complexity {
            Some(total) => {
                self.tasks_solved += 1;
                self.max_solved_complexity = self.max_solved_complexity.max(total);
                EXPLORATION_DECAY
            }
            None => EXPLORATION_GROWTH,
        };
        self.exploration_rate =
            (self.exploration_rate * factor).clamp(MIN_EXPLORATION, MAX_EXPLORATION);
    }
}

impl Default for CurriculumLayer {
    fn default() -> Self {
        Self::new(0.3)
    }
}
