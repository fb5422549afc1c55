//! The solver: a state machine sequencing memory lookup, the fast path, the
//! dimensional search and chain search.
//!
//! ```text
//! MemoryLookup → FastPath → DimensionalSearch → ChainSearch → Exhausted
//!        └───────────┴──────────────┴──────────────┴──→ Solved
//! ```
//!
//! Each phase proposes hypotheses; the first one that passes the validation
//! pipeline's behavioral stage ends the search. A tripped safety ceiling ends
//! the current phase only. Malformed tasks are the only error `solve` returns.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::chain::{ChainError, ChainExecutor, ChainGenerator};
use crate::complexity::{ComplexityVector, Partitions};
use crate::config::SolverConfig;
use crate::error::SynthResult;
use crate::explain::{ExplainabilityEngine, Explanation};
use crate::fastpath::FastPath;
use crate::grid::{Cell, Grid};
use crate::memory::{Attempt, CognitiveMemory};
use crate::ontology::{Hierarchy, Hypothesis, Ontology};
use crate::safety::{SafetyBoundary, SafetyError, SafetyResult};
use crate::task::{Task, TaskResult, TrainPair};
use crate::validate::{ValidationPipeline, ValidationResult};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    MemoryLookup,
    FastPath,
    DimensionalSearch,
    ChainSearch,
    Solved,
    Exhausted,
}

impl SearchPhase {
    fn next(self) -> Self {
        match self {
            Self::MemoryLookup => Self::FastPath,
            Self::FastPath => Self::DimensionalSearch,
            Self::DimensionalSearch => Self::ChainSearch,
            Self::ChainSearch | Self::Exhausted => Self::Exhausted,
            Self::Solved => Self::Solved,
        }
    }
}

/// Which phase produced the accepted hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolutionSource {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "beast")]
    FastPath,
    #[serde(rename = "beast_frag")]
    FastPathFragment,
    #[serde(rename = "beast:convergence")]
    FastPathConvergence,
    #[serde(rename = "search")]
    Search,
    #[serde(rename = "chain")]
    Chain,
}

impl SolutionSource {
    /// Memory and fast-path hits skip the complexity ordering.
    fn is_shortcut(self) -> bool {
        !matches!(self, Self::Search | Self::Chain)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyInfo {
    pub name: String,
    /// Hierarchy name, or `chain`.
    pub hierarchy: String,
    pub complexity: ComplexityVector,
}

impl StrategyInfo {
    fn of(h: &Hypothesis) -> Self {
        Self {
            name: h.qualified_name(),
            hierarchy: h.hierarchy_label().to_string(),
            complexity: h.complexity(),
        }
    }
}

/// Prediction for one test input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPrediction {
    pub input: Grid,
    pub predicted: Option<Grid>,
    pub expected: Option<Grid>,
    pub correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveStats {
    pub strategies_tried: u64,
    /// Highest total complexity of any hypothesis evaluated.
    pub max_complexity_reached: u32,
    pub validation_passes: u64,
    pub validation_fails: u64,
    /// Milliseconds since the Unix epoch.
    pub start_time: u64,
    pub end_time: u64,
}

/// A hypothesis that came close without reproducing every training pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearMiss {
    pub name: String,
    pub accuracy: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub success: bool,
    pub strategy: StrategyInfo,
    pub results: Vec<TestPrediction>,
    pub explanation: Explanation,
    pub stats: SolveStats,
    pub source: SolutionSource,
    pub validation: ValidationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub success: bool,
    pub stats: SolveStats,
    pub message: String,
    #[serde(default)]
    pub near_misses: Vec<NearMiss>,
}

/// Outcome of one solve, serialized in the result JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SolveResult {
    Solved(Box<Solution>),
    Exhausted(Failure),
}

impl SolveResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Solved(_))
    }

    pub fn stats(&self) -> &SolveStats {
        match self {
            Self::Solved(s) => &s.stats,
            Self::Exhausted(f) => &f.stats,
        }
    }

    pub fn solution(&self) -> Option<&Solution> {
        match self {
            Self::Solved(s) => Some(s),
            Self::Exhausted(_) => None,
        }
    }
}

/// Capability report of the standard ontology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub hierarchies: BTreeMap<Hierarchy, usize>,
    pub total: usize,
    pub learned: usize,
    /// Lowest and highest total complexity of any entry.
    pub complexity_range: Option<(u32, u32)>,
}

impl Capabilities {
    pub fn of(ontology: &Ontology) -> Self {
        Self {
            hierarchies: ontology.count_classes(),
            total: ontology.len(),
            learned: ontology.learned_count(),
            complexity_range: ontology.total_range(),
        }
    }
}

// ---------------------------------------------------------------------------
// Search state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Found {
    hypothesis: Hypothesis,
    result: ValidationResult,
    source: SolutionSource,
}

/// Mutable state scoped to one `solve`.
struct Search<'t> {
    task: &'t Task,
    safety: SafetyBoundary,
    stats: SolveStats,
    near_misses: Vec<(Hypothesis, ValidationResult)>,
    keep: usize,
    tripped: Option<SafetyError>,
}

impl Search<'_> {
    fn train(&self) -> &[TrainPair] {
        &self.task.train
    }

    fn note_near_miss(&mut self, h: &Hypothesis, r: &ValidationResult) {
        if self.keep == 0 || r.passed || r.execution_error.is_some() || r.accuracy <= 0.0 {
            return;
        }
        let name = h.qualified_name();
        if self.near_misses.iter().any(|(n, _)| n.qualified_name() == name) {
            return;
        }
        self.near_misses.push((h.clone(), r.clone()));
        self.near_misses.sort_by(|a, b| {
            b.1.accuracy
                .partial_cmp(&a.1.accuracy)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.near_misses.truncate(self.keep);
    }
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

pub struct Solver {
    config: SolverConfig,
    memory: CognitiveMemory,
    pipeline: ValidationPipeline,
    explainer: ExplainabilityEngine,
    rng: StdRng,
    oversight_granted: bool,
}

impl Solver {
    /// Validate `config` and open its memory store: the directory named by
    /// `memory_dir` as single writer, or an in-process store.
    pub fn new(config: SolverConfig) -> SynthResult<Self> {
        config.validate()?;
        let memory = match &config.memory_dir {
            Some(dir) => CognitiveMemory::open(dir, config.memory.clone())?,
            None => CognitiveMemory::in_memory(config.memory.clone()),
        };
        Ok(Self::with_memory(config, memory))
    }

    /// Use an explicitly constructed memory store.
    pub fn with_memory(config: SolverConfig, memory: CognitiveMemory) -> Self {
        Self {
            pipeline: ValidationPipeline::from_config(&config),
            explainer: ExplainabilityEngine::new(),
            rng: StdRng::seed_from_u64(config.seed),
            oversight_granted: false,
            memory,
            config,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn memory(&self) -> &CognitiveMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut CognitiveMemory {
        &mut self.memory
    }

    /// Approve search when `human_oversight_required` is set.
    pub fn grant_oversight(&mut self) {
        self.oversight_granted = true;
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::of(&Ontology::standard())
    }

    /// Infer a rule from the training pairs and apply it to the test inputs.
    ///
    /// Returns `Err` only for a malformed task. Exhaustion and safety trips
    /// come back as [`SolveResult::Exhausted`].
    pub fn solve(&mut self, task: &Task) -> TaskResult<SolveResult> {
        task.validate(self.config.max_grid_dim)?;
        let start_time = unix_millis();
        tracing::info!(task = %task.id, pairs = task.train.len(), tests = task.test.len(), "solving task");

        let mut safety = SafetyBoundary::new(self.config.safety_limits());
        if self.oversight_granted {
            safety.grant_oversight();
        }
        let mut search = Search {
            task,
            safety,
            stats: SolveStats {
                start_time,
                ..Default::default()
            },
            near_misses: Vec::new(),
            keep: self.config.near_miss_keep,
            tripped: None,
        };
        if let Err(e) = search.safety.start() {
            search.stats.end_time = unix_millis();
            return Ok(SolveResult::Exhausted(Failure {
                success: false,
                stats: search.stats,
                message: format!("search refused: {e}"),
                near_misses: Vec::new(),
            }));
        }

        let ontology = Ontology::for_task(&task.train);
        let mut phase = SearchPhase::MemoryLookup;
        let found = loop {
            if matches!(phase, SearchPhase::Solved | SearchPhase::Exhausted) {
                break None;
            }
            tracing::debug!(task = %task.id, phase = ?phase, "entering phase");
            let outcome = match phase {
                SearchPhase::MemoryLookup => self.memory_lookup(&ontology, &mut search),
                SearchPhase::FastPath if self.config.fast_path => {
                    self.fast_path(&ontology, &mut search)
                }
                SearchPhase::FastPath => Ok(None),
                SearchPhase::DimensionalSearch => self
                    .dimensional_search(&ontology, &mut search, self.config.max_complexity)
                    .map(|hit| {
                        hit.map(|(hypothesis, result)| Found {
                            hypothesis,
                            result,
                            source: SolutionSource::Search,
                        })
                    }),
                SearchPhase::ChainSearch => self.chain_search(&ontology, &mut search),
                SearchPhase::Solved | SearchPhase::Exhausted => Ok(None),
            };
            match outcome {
                Ok(Some(found)) => break Some(found),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(task = %task.id, phase = ?phase, error = %e, "safety limit reached, ending phase");
                    search.tripped = Some(e);
                }
            }
            phase = phase.next();
        };

        let found = match found {
            Some(f) if f.source.is_shortcut() => Some(self.prefer_simpler(&ontology, &mut search, f)),
            other => other,
        };

        self.remember(&search, found.as_ref());
        search.stats.end_time = unix_millis();

        let result = match found {
            Some(found) => {
                tracing::info!(
                    task = %task.id,
                    strategy = %found.hypothesis.qualified_name(),
                    source = ?found.source,
                    tried = search.stats.strategies_tried,
                    "task solved"
                );
                SolveResult::Solved(Box::new(self.assemble(task, found, search.stats)))
            }
            None => {
                let message = match &search.tripped {
                    Some(e) => format!("search stopped: {e}"),
                    None => format!(
                        "no hypothesis reproduced every training pair up to complexity {} and chain length {}",
                        self.config.max_complexity,
                        self.config.effective_chain_length()
                    ),
                };
                tracing::info!(task = %task.id, tried = search.stats.strategies_tried, %message, "task exhausted");
                SolveResult::Exhausted(Failure {
                    success: false,
                    stats: search.stats,
                    message,
                    near_misses: search
                        .near_misses
                        .iter()
                        .map(|(h, r)| NearMiss {
                            name: h.qualified_name(),
                            accuracy: r.accuracy,
                            score: r.score,
                        })
                        .collect(),
                })
            }
        };
        Ok(result)
    }

    // -- evaluation ---------------------------------------------------------

    /// One candidate-evaluation point: check the boundary, validate, count.
    fn evaluate(&self, search: &mut Search<'_>, h: &Hypothesis) -> SafetyResult<ValidationResult> {
        search.safety.check()?;
        let result = self.pipeline.validate(h, search.train());
        let stats = &mut search.stats;
        stats.strategies_tried += 1;
        stats.max_complexity_reached = stats.max_complexity_reached.max(h.complexity().total());
        match &result.execution_error {
            Some(error) => {
                tracing::trace!(hypothesis = %h.qualified_name(), %error, "candidate raised an error");
            }
            None if result.passed => stats.validation_passes += 1,
            None => stats.validation_fails += 1,
        }
        search.note_near_miss(h, &result);
        Ok(result)
    }

    // -- phases ---------------------------------------------------------------

    fn memory_lookup(
        &mut self,
        ontology: &Ontology,
        search: &mut Search<'_>,
    ) -> SafetyResult<Option<Found>> {
        let Some(first) = search.train().first() else {
            return Ok(None);
        };
        let strategies = self.memory.predict_likely_strategies(&first.input);
        if strategies.is_empty() {
            return Ok(None);
        }
        tracing::debug!(count = strategies.len(), "memory suggested strategies");
        let fast = FastPath::new(ontology, &self.config);
        for name in strategies {
            let Some(h) = fast.resolve(&name) else {
                tracing::debug!(strategy = %name, "remembered strategy not in this ontology");
                continue;
            };
            let result = self.evaluate(search, &h)?;
            if result.passed {
                return Ok(Some(Found {
                    hypothesis: h,
                    result,
                    source: SolutionSource::Memory,
                }));
            }
        }
        Ok(None)
    }

    fn fast_path(
        &mut self,
        ontology: &Ontology,
        search: &mut Search<'_>,
    ) -> SafetyResult<Option<Found>> {
        let fast = FastPath::new(ontology, &self.config);
        let signals = fast.analyse(search.train());
        if let Some(top) = signals.first() {
            tracing::debug!(bucket = %top.bucket, confidence = top.confidence, "fast path signal");
        }

        let whole = fast.whole_grid_candidates(&signals, search.train());
        for h in &whole {
            let result = self.evaluate(search, h)?;
            if result.passed {
                return Ok(Some(Found {
                    hypothesis: h.clone(),
                    result,
                    source: SolutionSource::FastPath,
                }));
            }
        }

        let task = search.task;
        if let Some((h, _)) = fast.convergence_hypothesis(&task.train, &mut search.safety)? {
            let result = self.evaluate(search, &h)?;
            if result.passed {
                return Ok(Some(Found {
                    hypothesis: h,
                    result,
                    source: SolutionSource::FastPathConvergence,
                }));
            }
        }

        let fragments = fast.fragment_candidates(&whole, &task.train, &mut search.safety)?;
        for h in &fragments {
            let result = self.evaluate(search, h)?;
            if result.passed {
                return Ok(Some(Found {
                    hypothesis: h.clone(),
                    result,
                    source: SolutionSource::FastPathFragment,
                }));
            }
        }
        Ok(None)
    }

    /// Level-by-level search over total complexity up to `ceiling`. Within a
    /// level, every partition holding entries is visited in order, and the
    /// entries of one partition are ordered by their hierarchy prior (or
    /// shuffled when the curriculum decides to explore).
    fn dimensional_search(
        &mut self,
        ontology: &Ontology,
        search: &mut Search<'_>,
        ceiling: u32,
    ) -> SafetyResult<Option<(Hypothesis, ValidationResult)>> {
        let explore = self.config.exploration && self.memory.should_explore(&mut self.rng);
        let priors = self.memory.priors_snapshot();
        let cap = self.config.max_strategies_per_wave;
        let mut previous: Option<ComplexityVector> = None;

        for total in self.config.min_complexity..=ceiling {
            let mut wave = 0usize;
            'level: for vector in Partitions::new(total) {
                if !ontology.occupies(&vector) {
                    continue;
                }
                if let Some(prev) = previous {
                    search.safety.check_jump(&prev, &vector)?;
                }
                previous = Some(vector);

                let mut entries = ontology.enumerate_weighted(&vector, |h| {
                    priors.get(&h.hierarchy()).copied().unwrap_or(0.5)
                });
                if explore {
                    entries.shuffle(&mut self.rng);
                }
                for h in entries {
                    if wave >= cap {
                        tracing::debug!(total, cap, "wave cap reached");
                        break 'level;
                    }
                    wave += 1;
                    let result = self.evaluate(search, h)?;
                    if result.passed {
                        return Ok(Some((h.clone(), result)));
                    }
                }
            }
            if self.config.verbose {
                tracing::info!(total, evaluated = wave, explore, "complexity level searched");
            } else {
                tracing::debug!(total, evaluated = wave, explore, "complexity level searched");
            }
        }
        Ok(None)
    }

    /// Chains of length 2 up to the configured maximum, each pre-checked on
    /// the first training input before full validation.
    fn chain_search(
        &mut self,
        ontology: &Ontology,
        search: &mut Search<'_>,
    ) -> SafetyResult<Option<Found>> {
        let max_len = self.config.effective_chain_length();
        if max_len < 2 {
            return Ok(None);
        }
        let pool = chain_pool(ontology, search.train());
        let Some(first) = search.train().first().cloned() else {
            return Ok(None);
        };
        tracing::debug!(pool = pool.len(), max_len, "chain search");

        let executor = ChainExecutor::new();
        let cap = self.config.max_strategies_per_wave;
        let mut wave_len = 2;
        let mut wave = 0usize;
        let mut chains = ChainGenerator::new(&pool, 2, max_len);
        while let Some(chain) = chains.next() {
            search.safety.check()?;
            if chain.chain_len() != wave_len {
                if self.config.verbose {
                    tracing::info!(length = wave_len, evaluated = wave, "chain length searched");
                }
                wave_len = chain.chain_len();
                wave = 0;
            }
            if wave >= cap {
                tracing::debug!(length = wave_len, cap, "chain wave full, moving to next length");
                chains.skip_length();
                continue;
            }
            wave += 1;

            let outcome = executor.execute_guarded(chain.steps(), &first.input, &mut search.safety);
            match outcome.error {
                Some(ChainError::Safety(e)) => return Err(e),
                Some(_) => {
                    search.stats.strategies_tried += 1;
                    continue;
                }
                None => {}
            }
            let Some(output) = outcome.output else {
                continue;
            };
            if output.dims() != first.output.dims() {
                search.stats.strategies_tried += 1;
                continue;
            }
            let result = self.evaluate(search, &chain)?;
            if result.passed {
                return Ok(Some(Found {
                    hypothesis: chain,
                    result,
                    source: SolutionSource::Chain,
                }));
            }
        }
        Ok(None)
    }

    /// Re-run the dimensional search below a memory or fast-path hit, so a
    /// simpler ontology entry always wins over a shortcut's answer.
    fn prefer_simpler(&mut self, ontology: &Ontology, search: &mut Search<'_>, found: Found) -> Found {
        let total = found.hypothesis.complexity().total();
        let ceiling = total.saturating_sub(1).min(self.config.max_complexity);
        if ceiling < self.config.min_complexity {
            return found;
        }
        match self.dimensional_search(ontology, search, ceiling) {
            Ok(Some((hypothesis, result))) => {
                tracing::debug!(
                    shortcut = %found.hypothesis.qualified_name(),
                    simpler = %hypothesis.qualified_name(),
                    "simpler hypothesis replaces shortcut"
                );
                Found {
                    hypothesis,
                    result,
                    source: SolutionSource::Search,
                }
            }
            Ok(None) => found,
            Err(e) => {
                tracing::debug!(error = %e, "simplicity check stopped early");
                found
            }
        }
    }

    // -- assembly -------------------------------------------------------------

    /// Record the accepted hypothesis and near misses; flush failures only warn.
    fn remember(&mut self, search: &Search<'_>, found: Option<&Found>) {
        let mut attempts: Vec<Attempt<'_>> = Vec::new();
        if let Some(f) = found {
            attempts.push(Attempt {
                hypothesis: &f.hypothesis,
                result: &f.result,
            });
        }
        attempts.extend(search.near_misses.iter().map(|(h, r)| Attempt {
            hypothesis: h,
            result: r,
        }));
        if let Err(e) = self.memory.record_task(&search.task.id, search.train(), &attempts) {
            tracing::warn!(task = %search.task.id, error = %e, "failed to persist memory");
        }
    }

    fn assemble(&self, task: &Task, found: Found, stats: SolveStats) -> Solution {
        let results = task
            .test
            .iter()
            .map(|test| {
                let (predicted, error) = match found.hypothesis.apply(&test.input) {
                    Ok(g) => (Some(g), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                let correct = test
                    .output
                    .as_ref()
                    .map(|expected| predicted.as_ref() == Some(expected));
                TestPrediction {
                    input: test.input.clone(),
                    predicted,
                    expected: test.output.clone(),
                    correct,
                    error,
                }
            })
            .collect();
        Solution {
            success: true,
            strategy: StrategyInfo::of(&found.hypothesis),
            results,
            explanation: self.explainer.explain(&found.hypothesis, &task.train),
            stats,
            source: found.source,
            validation: found.result,
        }
    }
}

impl std::fmt::Debug for Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("memory", &self.memory)
            .field("oversight_granted", &self.oversight_granted)
            .finish()
    }
}

/// Solve independent tasks in parallel, each with its own in-process memory.
pub fn solve_isolated_batch(config: &SolverConfig, tasks: &[Task]) -> Vec<TaskResult<SolveResult>> {
    tasks
        .par_iter()
        .map(|task| {
            let mut config = config.clone();
            config.memory_dir = None;
            let memory = CognitiveMemory::in_memory(config.memory.clone());
            Solver::with_memory(config, memory).solve(task)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Chain pool
// ---------------------------------------------------------------------------

/// Atoms for chain search: no learned entries, no identity, and
/// color-parameterized entries only for colors the task uses.
fn chain_pool(ontology: &Ontology, train: &[TrainPair]) -> Vec<Hypothesis> {
    let present: BTreeSet<Cell> = train
        .iter()
        .flat_map(|p| p.input.unique_colors().into_iter().chain(p.output.unique_colors()))
        .collect();
    ontology
        .iter()
        .filter(|h| !h.is_learned() && h.name() != "identity")
        .filter(|h| {
            color_parameters(h.name())
                .is_none_or(|colors| colors.iter().all(|c| present.contains(c)))
        })
        .cloned()
        .collect()
}

/// Colors baked into a parameterized entry name, e.g. `recolor1to2` → [1, 2].
fn color_parameters(name: &str) -> Option<Vec<Cell>> {
    let digits = |s: &str| -> Vec<Cell> {
        s.chars()
            .filter_map(|c| c.to_digit(10))
            .map(|d| d as Cell)
            .collect()
    };
    ["recolor", "multiMap", "pad1With", "frameWith"]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .map(digits)
        .filter(|colors| !colors.is_empty())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid;
    use crate::task::TestPair;

    fn quiet_config() -> SolverConfig {
        SolverConfig {
            exploration: false,
            ..Default::default()
        }
    }

    fn swap_task() -> Task {
        Task::new(
            "swap",
            vec![
                TrainPair::new(grid(&[&[1, 2], &[0, 1]]), grid(&[&[2, 1], &[0, 2]])),
                TrainPair::new(grid(&[&[2, 2, 1]]), grid(&[&[1, 1, 2]])),
            ],
            vec![TestPair {
                input: grid(&[&[1, 0, 2]]),
                output: Some(grid(&[&[2, 0, 1]])),
            }],
        )
    }

    #[test]
    fn phases_advance_in_order() {
        let mut p = SearchPhase::MemoryLookup;
        let mut seen = vec![p];
        while p != SearchPhase::Exhausted {
            p = p.next();
            seen.push(p);
        }
        assert_eq!(
            seen,
            vec![
                SearchPhase::MemoryLookup,
                SearchPhase::FastPath,
                SearchPhase::DimensionalSearch,
                SearchPhase::ChainSearch,
                SearchPhase::Exhausted,
            ]
        );
    }

    #[test]
    fn solves_color_swap_and_predicts() {
        let mut solver = Solver::new(quiet_config()).unwrap();
        let result = solver.solve(&swap_task()).unwrap();
        let solution = result.solution().expect("solved");
        assert!(solution.validation.passed);
        assert_eq!(solution.results[0].correct, Some(true));
        assert!(solution.stats.strategies_tried >= 1);
        assert!(solution.stats.end_time >= solution.stats.start_time);
    }

    #[test]
    fn malformed_task_is_an_error() {
        let mut solver = Solver::new(quiet_config()).unwrap();
        assert!(solver.solve(&Task::new("empty", vec![], vec![])).is_err());
    }

    #[test]
    fn oversight_gate_refuses_until_granted() {
        let config = SolverConfig {
            human_oversight_required: true,
            ..quiet_config()
        };
        let mut solver = Solver::new(config).unwrap();
        let refused = solver.solve(&swap_task()).unwrap();
        match &refused {
            SolveResult::Exhausted(f) => assert!(f.message.contains("oversight"), "{}", f.message),
            SolveResult::Solved(_) => panic!("search ran without oversight"),
        }
        solver.grant_oversight();
        assert!(solver.solve(&swap_task()).unwrap().is_success());
    }

    #[test]
    fn iteration_ceiling_exhausts_without_error() {
        let config = SolverConfig {
            max_iterations: 1,
            fast_path: false,
            ..quiet_config()
        };
        let task = Task::new(
            "hard",
            vec![TrainPair::new(grid(&[&[1, 2], &[3, 4]]), grid(&[&[9, 8, 7]]))],
            vec![],
        );
        let result = Solver::new(config).unwrap().solve(&task).unwrap();
        match result {
            SolveResult::Exhausted(f) => {
                assert!(f.message.contains("iteration"), "{}", f.message);
                assert!(!f.success);
            }
            SolveResult::Solved(_) => panic!("unexpected solution"),
        }
    }

    fn fresh_search<'t>(task: &'t Task, config: &SolverConfig) -> Search<'t> {
        let mut safety = SafetyBoundary::new(config.safety_limits());
        safety.start().unwrap();
        Search {
            task,
            safety,
            stats: SolveStats::default(),
            near_misses: Vec::new(),
            keep: config.near_miss_keep,
            tripped: None,
        }
    }

    #[test]
    fn skipped_chains_are_still_metered() {
        let config = SolverConfig {
            max_chain_length: 3,
            max_strategies_per_wave: 0,
            max_iterations: 1,
            ..quiet_config()
        };
        let task = swap_task();
        let ontology = Ontology::for_task(&task.train);
        let mut solver = Solver::new(config.clone()).unwrap();
        let mut search = fresh_search(&task, &config);
        let err = solver.chain_search(&ontology, &mut search).unwrap_err();
        assert!(matches!(err, SafetyError::IterationLimit { limit: 1 }));
        assert_eq!(search.stats.strategies_tried, 0);
    }

    #[test]
    fn chain_search_evaluates_at_most_the_wave_cap_per_length() {
        let config = SolverConfig {
            max_chain_length: 3,
            max_strategies_per_wave: 2,
            ..quiet_config()
        };
        let task = Task::new(
            "contradictory",
            vec![
                TrainPair::new(grid(&[&[1, 2], &[3, 4]]), grid(&[&[4, 3], &[2, 1]])),
                TrainPair::new(grid(&[&[1, 2], &[3, 4]]), grid(&[&[9, 9], &[9, 9]])),
            ],
            vec![],
        );
        let ontology = Ontology::for_task(&task.train);
        let mut solver = Solver::new(config.clone()).unwrap();
        let mut search = fresh_search(&task, &config);
        assert!(solver.chain_search(&ontology, &mut search).unwrap().is_none());
        assert!(search.stats.strategies_tried <= 4);
    }

    /// Both inputs blank out, and each is the other with its colors swapped,
    /// so any rule reproducing the pairs ignores the swap.
    fn blanking_task() -> Task {
        Task::new(
            "blanking",
            vec![
                TrainPair::new(grid(&[&[1, 2]]), grid(&[&[0, 0]])),
                TrainPair::new(grid(&[&[2, 1]]), grid(&[&[0, 0]])),
            ],
            vec![],
        )
    }

    #[test]
    fn strict_counterexamples_veto_every_blanking_rule() {
        let lenient = Solver::new(quiet_config()).unwrap().solve(&blanking_task()).unwrap();
        assert!(lenient.is_success());

        let strict = SolverConfig {
            strict_counterexample: true,
            max_chain_length: 1,
            ..quiet_config()
        };
        match Solver::new(strict).unwrap().solve(&blanking_task()).unwrap() {
            SolveResult::Exhausted(f) => {
                assert!(!f.success);
                assert_eq!(f.stats.validation_passes, 0);
                assert!(f.stats.strategies_tried > 0);
            }
            SolveResult::Solved(s) => panic!("strict mode accepted {}", s.strategy.name),
        }
    }

    #[test]
    fn complexity_jump_ends_dimensional_search() {
        let config = SolverConfig {
            max_complexity_jump: 0,
            max_chain_length: 1,
            fast_path: false,
            ..quiet_config()
        };
        let task = Task::new(
            "contradictory",
            vec![
                TrainPair::new(grid(&[&[1, 2], &[3, 4]]), grid(&[&[4, 3], &[2, 1]])),
                TrainPair::new(grid(&[&[1, 2], &[3, 4]]), grid(&[&[9, 9], &[9, 9]])),
            ],
            vec![],
        );
        let ontology = Ontology::for_task(&task.train);
        let mut solver = Solver::new(config.clone()).unwrap();
        let mut search = fresh_search(&task, &config);
        let err = solver
            .dimensional_search(&ontology, &mut search, config.max_complexity)
            .unwrap_err();
        assert!(matches!(err, SafetyError::ComplexityJump { limit: 0, .. }));

        match solver.solve(&task).unwrap() {
            SolveResult::Exhausted(f) => {
                assert!(f.message.contains("complexity jumped"), "{}", f.message);
            }
            SolveResult::Solved(s) => panic!("solved with {}", s.strategy.name),
        }
    }

    #[test]
    fn chain_pool_restricts_color_parameters() {
        let train = vec![TrainPair::new(grid(&[&[1, 0]]), grid(&[&[0, 2]]))];
        let ontology = Ontology::for_task(&train);
        let pool = chain_pool(&ontology, &train);
        let names: Vec<String> = pool.iter().map(Hypothesis::qualified_name).collect();
        assert!(names.contains(&"color:recolor1to2".to_string()));
        assert!(!names.iter().any(|n| n == "color:recolor3to4"));
        assert!(!names.iter().any(|n| n == "structural:identity"));
        assert!(pool.iter().all(|h| !h.is_learned()));
        assert_eq!(color_parameters("multiMap1to2_2to1"), Some(vec![1, 2, 2, 1]));
        assert_eq!(color_parameters("flipHorizontal"), None);
    }

    #[test]
    fn batch_solves_each_task_independently() {
        let tasks = vec![swap_task(), swap_task()];
        let results = solve_isolated_batch(&quiet_config(), &tasks);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.as_ref().is_ok_and(SolveResult::is_success)));
    }

    #[test]
    fn capabilities_cover_all_hierarchies() {
        let caps = Solver::new(quiet_config()).unwrap().capabilities();
        assert_eq!(caps.hierarchies.len(), 7);
        assert_eq!(caps.learned, 0);
        assert_eq!(caps.hierarchies.values().sum::<usize>(), caps.total);
        let (lo, hi) = caps.complexity_range.expect("non-empty ontology");
        assert!(lo >= crate::complexity::FLOOR_TOTAL);
        assert!(lo <= hi);
    }
}
