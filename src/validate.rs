//! Six-stage validation pipeline.
//!
//! Stages run in order and short-circuit on failure:
//!
//! 1. syntactic: the hypothesis is well formed
//! 2. semantic: deterministic, non-degenerate output
//! 3. behavioral: every training output reproduced exactly (the acceptance gate)
//! 4. counterexample: probes on perturbed training inputs
//! 5. compression: shorter chains and names score higher
//! 6. evidence: weighted aggregate used for ranking near misses
//!
//! Acceptance depends only on the behavioral stage, plus the counterexample
//! stage when `strict_counterexample` is set. The aggregate score is advisory.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;
use crate::grid::{Cell, Grid};
use crate::ontology::Hypothesis;
use crate::ontology::color::MAX_COLOR;
use crate::ontology::counting::colors_by_count;
use crate::task::TrainPair;

pub const WEIGHT_BEHAVIORAL: f64 = 0.5;
pub const WEIGHT_SEMANTIC: f64 = 0.15;
pub const WEIGHT_COUNTEREXAMPLE: f64 = 0.15;
pub const WEIGHT_SYNTACTIC: f64 = 0.1;
pub const WEIGHT_COMPRESSION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Syntactic,
    Semantic,
    Behavioral,
    Counterexample,
    Compression,
    Evidence,
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub passed: bool,
    /// Stage score in [0, 1].
    pub score: f64,
    pub detail: String,
}

/// Verdict on one hypothesis against a task's training pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub hypothesis: String,
    pub stages: Vec<StageOutcome>,
    /// Mean cell accuracy over training pairs; 0 for pairs with a shape mismatch.
    pub accuracy: f64,
    /// Weighted evidence score in [0, 1].
    pub score: f64,
    /// Accepted as a solution.
    pub passed: bool,
    /// Set when the hypothesis raised an error; such candidates count as tried
    /// but neither as a validation pass nor a fail.
    pub execution_error: Option<String>,
    /// Counterexample probes generated.
    pub probes: usize,
    #[serde(with = "duration_micros")]
    pub elapsed: Duration,
}

impl ValidationResult {
    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Whether every training output was reproduced, regardless of strictness.
    pub fn behavioral_match(&self) -> bool {
        self.stage(Stage::Behavioral).is_some_and(|s| s.passed)
    }
}

mod duration_micros {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}

/// Runs the six stages.
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    strict_counterexample: bool,
    time_budget: Duration,
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::from_config(&SolverConfig::default())
    }
}

impl ValidationPipeline {
    pub fn new(strict_counterexample: bool, time_budget: Duration) -> Self {
        Self {
            strict_counterexample,
            time_budget,
        }
    }

    pub fn from_config(config: &SolverConfig) -> Self {
        Self::new(config.strict_counterexample, config.candidate_budget())
    }

    pub fn validate(&self, hypothesis: &Hypothesis, train: &[TrainPair]) -> ValidationResult {
        let started = Instant::now();
        let mut run = Run::default();

        // 1. syntactic
        let well_formed = hypothesis.is_well_formed() && !train.is_empty();
        run.push(Stage::Syntactic, well_formed, bool_score(well_formed), "");
        if !well_formed {
            return run.finish(hypothesis, self, started);
        }

        // 2. semantic
        let first = &train[0].input;
        let (a, b) = match (hypothesis.apply(first), hypothesis.apply(first)) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                run.execution_error = Some(e.to_string());
                run.push(Stage::Semantic, false, 0.0, "execution error");
                return run.finish(hypothesis, self, started);
            }
        };
        let deterministic = a == b;
        let degenerate = a.is_empty();
        let semantic_ok = deterministic && !degenerate;
        let detail = match (deterministic, degenerate) {
            (false, _) => "non-deterministic",
            (_, true) => "empty output",
            _ => "",
        };
        run.push(Stage::Semantic, semantic_ok, bool_score(semantic_ok), detail);
        if !semantic_ok {
            return run.finish(hypothesis, self, started);
        }

        // 3. behavioral
        let mut accuracies = Vec::with_capacity(train.len());
        for (i, pair) in train.iter().enumerate() {
            let predicted = if i == 0 {
                Ok(a.clone())
            } else {
                hypothesis.apply(&pair.input)
            };
            match predicted {
                Ok(p) => accuracies.push(if p == pair.output {
                    1.0
                } else {
                    p.cell_accuracy(&pair.output)
                }),
                Err(e) => {
                    run.execution_error = Some(format!("pair {i}: {e}"));
                    run.push(Stage::Behavioral, false, 0.0, "execution error");
                    return run.finish(hypothesis, self, started);
                }
            }
        }
        let exact = accuracies.iter().filter(|&&x| x == 1.0).count();
        run.accuracy = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
        let behavioral_ok = exact == train.len();
        run.push(
            Stage::Behavioral,
            behavioral_ok,
            run.accuracy,
            format!("{exact}/{} pairs exact", train.len()),
        );
        if !behavioral_ok {
            return run.finish(hypothesis, self, started);
        }

        // 4. counterexample
        if started.elapsed() > self.time_budget {
            run.push(Stage::Counterexample, true, 1.0, "skipped: time budget");
        } else {
            let (passed, probes) = counterexample_probes(hypothesis, train);
            run.probes = probes;
            let score = counterexample_score(passed, probes);
            run.push(
                Stage::Counterexample,
                score >= 1.0,
                score,
                format!("{passed}/{probes} probes"),
            );
        }

        // 5. compression
        let score = compression_score(hypothesis);
        run.push(Stage::Compression, true, score, "");

        run.finish(hypothesis, self, started)
    }
}

/// Share of probes passed. No probes at all is neutral, not a failure.
fn counterexample_score(passed: usize, probes: usize) -> f64 {
    if probes == 0 {
        1.0
    } else {
        passed as f64 / probes as f64
    }
}

fn bool_score(ok: bool) -> f64 {
    if ok { 1.0 } else { 0.0 }
}

/// Shorter chains score higher; among equal lengths, shorter names do.
pub fn compression_score(hypothesis: &Hypothesis) -> f64 {
    let chain = 1.0 / hypothesis.chain_len().max(1) as f64;
    let name = 1.0 - hypothesis.qualified_name().len().min(120) as f64 / 240.0;
    chain * name
}

#[derive(Default)]
struct Run {
    stages: Vec<StageOutcome>,
    accuracy: f64,
    probes: usize,
    execution_error: Option<String>,
}

impl Run {
    fn push(&mut self, stage: Stage, passed: bool, score: f64, detail: impl Into<String>) {
        self.stages.push(StageOutcome {
            stage,
            passed,
            score,
            detail: detail.into(),
        });
    }

    fn score_of(&self, stage: Stage) -> f64 {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map_or(0.0, |s| s.score)
    }

    fn passed(&self, stage: Stage) -> bool {
        self.stages.iter().any(|s| s.stage == stage && s.passed)
    }

    fn finish(
        mut self,
        hypothesis: &Hypothesis,
        pipeline: &ValidationPipeline,
        started: Instant,
    ) -> ValidationResult {
        let score = WEIGHT_BEHAVIORAL * self.accuracy
            + WEIGHT_SEMANTIC * self.score_of(Stage::Semantic)
            + WEIGHT_COUNTEREXAMPLE * self.score_of(Stage::Counterexample)
            + WEIGHT_SYNTACTIC * self.score_of(Stage::Syntactic)
            + WEIGHT_COMPRESSION * self.score_of(Stage::Compression);
        let vetoed = pipeline.strict_counterexample
            && self.stages.iter().any(|s| s.stage == Stage::Counterexample && !s.passed);
        let passed = self.passed(Stage::Behavioral) && !vetoed;
        self.push(Stage::Evidence, passed, score, "");
        ValidationResult {
            hypothesis: hypothesis.qualified_name(),
            stages: self.stages,
            accuracy: self.accuracy,
            score,
            passed,
            execution_error: self.execution_error,
            probes: self.probes,
            elapsed: started.elapsed(),
        }
    }
}

/// Run identity and color-swap probes on every training input. A swap probe
/// passes when the prediction responds to the swapped colors. Returns
/// `(passed, generated)`.
fn counterexample_probes(hypothesis: &Hypothesis, train: &[TrainPair]) -> (usize, usize) {
    let mut passed = 0;
    let mut probes = 0;
    for pair in train {
        // Identity probe: a fresh copy of the input must give the same output.
        probes += 1;
        if hypothesis.apply(&pair.input.clone()).is_ok_and(|g| g == pair.output) {
            passed += 1;
        }

        // Color-swap probe.
        let Some((a, b)) = swap_colors(pair) else {
            continue;
        };
        probes += 1;
        let perturbed = swap(&pair.input, a, b);
        match hypothesis.apply(&perturbed) {
            Ok(out) if !out.is_empty() => {
                if out != pair.output {
                    passed += 1;
                } else {
                    tracing::trace!(hypothesis = %hypothesis.qualified_name(), "color-swap probe ignored");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::trace!(hypothesis = %hypothesis.qualified_name(), error = %e, "color-swap probe crashed");
            }
        }
    }
    (passed, probes)
}

/// The two most frequent foreground colors, or the only one paired with a
/// color unused anywhere in the pair.
fn swap_colors(pair: &TrainPair) -> Option<(Cell, Cell)> {
    let ranked = colors_by_count(&pair.input);
    match ranked.as_slice() {
        [] => None,
        [(only, _)] => {
            let used = pair.input.unique_colors();
            let used_out = pair.output.unique_colors();
            (1..=MAX_COLOR)
                .find(|c| !used.contains(c) && !used_out.contains(c))
                .map(|spare| (*only, spare))
        }
        [(a, _), (b, _), ..] => Some((*a, *b)),
    }
}

fn swap(g: &Grid, a: Cell, b: Cell) -> Grid {
    g.map_cells(|v| match v {
        v if v == a => b,
        v if v == b => a,
        v => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complexity::ComplexityVector;
    use crate::grid::grid;
    use crate::ontology::{GridTransform, Hierarchy, Ontology, TransformResult, not_applicable};

    fn swap_task() -> Vec<TrainPair> {
        vec![
            TrainPair::new(grid(&[&[1, 2], &[0, 1]]), grid(&[&[2, 1], &[0, 2]])),
            TrainPair::new(grid(&[&[2, 2, 1]]), grid(&[&[1, 1, 2]])),
        ]
    }

    struct Crash;

    struct Constant(Grid);

    impl GridTransform for Constant {
        fn apply(&self, _: &Grid) -> TransformResult<Grid> {
            Ok(self.0.clone())
        }
    }

    impl GridTransform for Crash {
        fn apply(&self, _: &Grid) -> TransformResult<Grid> {
            Err(not_applicable("crash", "always"))
        }
    }

    #[test]
    fn exact_match_passes_every_stage() {
        let ontology = Ontology::standard();
        let h = ontology.get("color:multiMap1to2_2to1").unwrap();
        let result = ValidationPipeline::default().validate(h, &swap_task());
        assert!(result.passed);
        assert_eq!(result.accuracy, 1.0);
        assert_eq!(result.stages.len(), 6);
        assert!(result.probes >= 2);
        assert!(result.score > 0.9 && result.score <= 1.0);
    }

    #[test]
    fn partial_match_records_accuracy() {
        let ontology = Ontology::standard();
        let h = ontology.get("color:recolor1to2").unwrap();
        let result = ValidationPipeline::default().validate(h, &swap_task());
        assert!(!result.passed);
        assert!(result.accuracy > 0.0 && result.accuracy < 1.0);
        assert!(result.stage(Stage::Counterexample).is_none());
        assert!(result.execution_error.is_none());
    }

    #[test]
    fn execution_errors_are_flagged() {
        let h = Hypothesis::atomic(Hierarchy::Abstract, "crash", ComplexityVector::FLOOR, Crash);
        let result = ValidationPipeline::default().validate(&h, &swap_task());
        assert!(!result.passed);
        assert!(result.execution_error.is_some());
    }

    #[test]
    fn strict_mode_vetoes_unresponsive_rules() {
        let train = vec![
            TrainPair::new(grid(&[&[1, 2]]), grid(&[&[0, 0]])),
            TrainPair::new(grid(&[&[2, 1]]), grid(&[&[0, 0]])),
        ];
        let h = Hypothesis::atomic(
            Hierarchy::Abstract,
            "constant",
            ComplexityVector::FLOOR,
            Constant(grid(&[&[0, 0]])),
        );
        let lenient = ValidationPipeline::new(false, Duration::from_secs(5)).validate(&h, &train);
        let strict = ValidationPipeline::new(true, Duration::from_secs(5)).validate(&h, &train);
        assert!(lenient.passed);
        assert!(lenient.stage(Stage::Counterexample).is_some_and(|s| s.score == 0.5));
        assert!(strict.behavioral_match());
        assert!(!strict.passed);
    }

    #[test]
    fn no_counterexamples_is_neutral() {
        let ontology = Ontology::standard();
        let h = ontology.get("structural:identity").unwrap();
        assert_eq!(counterexample_probes(h, &[]), (0, 0));
        assert_eq!(counterexample_score(0, 0), 1.0);
        assert_eq!(counterexample_score(1, 2), 0.5);
        assert_eq!(counterexample_score(0, 3), 0.0);
    }

    #[test]
    fn blank_input_gets_only_the_identity_check() {
        let train = vec![TrainPair::new(grid(&[&[0, 0]]), grid(&[&[0, 0]]))];
        let ontology = Ontology::standard();
        let h = ontology.get("structural:identity").unwrap();
        let result = ValidationPipeline::new(true, Duration::from_secs(5)).validate(h, &train);
        assert_eq!(result.probes, 1);
        assert!(result.stage(Stage::Counterexample).is_some_and(|s| s.score == 1.0));
        assert!(result.passed);
    }

    #[test]
    fn compression_prefers_short_chains() {
        let ontology = Ontology::standard();
        let single = ontology.resolve("structural:flipHorizontal").unwrap();
        let pair = ontology
            .resolve("structural:flipHorizontal -> structural:flipVertical")
            .unwrap();
        assert!(compression_score(&single) > compression_score(&pair));
    }
}
