//! Fast-path micro-analysis.
//!
//! A cheap pre-pass ahead of the full search: classify the training pairs
//! into rule buckets, try the bucket's candidates on whole grids, then a
//! convergence chain, then the same candidates applied fragment by fragment.
//! The solver validates everything this module proposes.

pub mod candidates;
pub mod converge;
pub mod features;
pub mod fragment;

use crate::config::SolverConfig;
use crate::ontology::{Hypothesis, Ontology, same_shapes};
use crate::safety::{SafetyBoundary, SafetyResult};
use crate::task::TrainPair;

use candidates::{CandidateGenerator, has_content, rank_by_quick_score};
use converge::{ConvergenceResult, converge, convergence_candidates};
use features::{FeatureExtractor, FeatureSignal, RuleBucket, merge_signals};
use fragment::{FRAGMENT_PREFIX, Fragmenter, Fragmentwise};

/// Entry point for the fast path over one task's ontology.
#[derive(Debug, Clone, Copy)]
pub struct FastPath<'a> {
    ontology: &'a Ontology,
    extractor: FeatureExtractor,
    fragmenter: Fragmenter,
    max_cycles: usize,
}

impl<'a> FastPath<'a> {
    pub fn new(ontology: &'a Ontology, config: &SolverConfig) -> Self {
        Self {
            ontology,
            extractor: FeatureExtractor::new(),
            fragmenter: Fragmenter::new(config.max_fragments),
            max_cycles: config.convergence_cycles,
        }
    }

    /// Bucket signals averaged over all training pairs. When no pair relation
    /// is recognised, the training inputs are classified on their own.
    pub fn analyse(&self, train: &[TrainPair]) -> Vec<FeatureSignal> {
        let sets: Vec<_> = train
            .iter()
            .map(|p| self.extractor.extract_pair(&p.input, &p.output))
            .collect();
        let merged = merge_signals(&sets);
        if merged.iter().any(is_actionable) {
            return merged;
        }
        let inputs: Vec<_> = train.iter().map(|p| self.extractor.extract(&p.input)).collect();
        let fallback = merge_signals(&inputs);
        tracing::trace!(signals = fallback.len(), "no pair signal, using input structure");
        fallback
    }

    /// Candidates for every detected bucket, ranked by quick score with the
    /// strongest bucket winning ties.
    pub fn whole_grid_candidates(
        &self,
        signals: &[FeatureSignal],
        train: &[TrainPair],
    ) -> Vec<Hypothesis> {
        let buckets: Vec<RuleBucket> = signals
            .iter()
            .filter(|s| is_actionable(s))
            .map(|s| s.bucket)
            .collect();
        let candidates = CandidateGenerator::new(self.ontology).for_buckets(&buckets, train);
        rank_by_quick_score(candidates, train)
    }

    /// Converge the first training input toward its output. When it lands
    /// exactly, the applied steps become a hypothesis for full validation.
    /// Each candidate application inside the loop counts against `safety`.
    pub fn convergence_hypothesis(
        &self,
        train: &[TrainPair],
        safety: &mut SafetyBoundary,
    ) -> SafetyResult<Option<(Hypothesis, ConvergenceResult)>> {
        let Some(first) = train.first() else {
            return Ok(None);
        };
        let candidates = convergence_candidates(self.ontology);
        let result = converge(
            &first.input,
            &candidates,
            self.max_cycles,
            Some(&first.output),
            Some(safety),
        )?;
        tracing::debug!(
            cycles = result.cycles,
            exact = result.exact,
            stop = ?result.stop,
            "convergence finished"
        );
        if !result.exact || result.applied.is_empty() {
            return Ok(None);
        }
        let hypothesis = match result.applied.as_slice() {
            [single] => single.clone(),
            steps => Hypothesis::chain(steps.to_vec()),
        };
        Ok(Some((hypothesis, result)))
    }

    /// Wrap shape-preserving candidates so they run per fragment. Checks the
    /// safety boundary once per fragment of the first training input.
    pub fn fragment_candidates(
        &self,
        whole: &[Hypothesis],
        train: &[TrainPair],
        safety: &mut SafetyBoundary,
    ) -> SafetyResult<Vec<Hypothesis>> {
        let Some(first) = train.first() else {
            return Ok(Vec::new());
        };
        if !same_shapes(train) || !has_content(&first.input) {
            return Ok(Vec::new());
        }
        let fragments = self.fragmenter.split(&first.input);
        if fragments.len() < 2 {
            // A single fragment is the whole-grid case again.
            return Ok(Vec::new());
        }
        for _ in &fragments {
            safety.check()?;
        }
        Ok(whole
            .iter()
            .filter(|h| !h.is_chain())
            .filter(|h| {
                fragments
                    .first()
                    .and_then(|f| h.apply(&f.grid).ok())
                    .is_some_and(|out| out.dims() == fragments[0].grid.dims())
            })
            .map(|h| Fragmentwise::new(h.clone(), self.fragmenter).into_hypothesis())
            .collect())
    }

    /// Resolve a remembered strategy name: ontology entries, chains, and
    /// fragment-wise wrappers such as `structural:fragment[flipHorizontal]`.
    pub fn resolve(&self, name: &str) -> Option<Hypothesis> {
        if let Some(h) = self.ontology.resolve(name) {
            return Some(h);
        }
        let (hierarchy, local) = name.split_once(':')?;
        let inner = local.strip_prefix(FRAGMENT_PREFIX)?.strip_suffix(']')?;
        let inner = self.ontology.get(&format!("{hierarchy}:{inner}"))?.clone();
        Some(Fragmentwise::new(inner, self.fragmenter).into_hypothesis())
    }
}

fn is_actionable(signal: &FeatureSignal) -> bool {
    signal.confidence > 0.0 && signal.bucket != RuleBucket::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid;
    use crate::safety::SafetyLimits;

    #[test]
    fn swap_task_yields_swap_candidate_first() {
        let train = vec![
            TrainPair::new(grid(&[&[1, 2], &[0, 1]]), grid(&[&[2, 1], &[0, 2]])),
            TrainPair::new(grid(&[&[2, 0, 1]]), grid(&[&[1, 0, 2]])),
        ];
        let ontology = Ontology::for_task(&train);
        let config = SolverConfig::default();
        let fast = FastPath::new(&ontology, &config);
        let signals = fast.analyse(&train);
        assert_eq!(signals[0].bucket, RuleBucket::ColorReplacement);
        let candidates = fast.whole_grid_candidates(&signals, &train);
        assert_eq!(candidates[0].qualified_name(), "color:multiMap1to2_2to1");
    }

    #[test]
    fn unrelated_shapes_fall_back_to_input_structure() {
        // 2x2 to a non-multiple 3x3: no pair relation to recognise.
        let train = vec![TrainPair::new(
            grid(&[&[1, 0], &[0, 0]]),
            grid(&[&[1, 2, 3], &[4, 5, 6], &[7, 8, 9]]),
        )];
        let ontology = Ontology::standard();
        let config = SolverConfig::default();
        let fast = FastPath::new(&ontology, &config);
        let pair = FeatureExtractor::new().extract_pair(&train[0].input, &train[0].output);
        assert!(!pair.signals.iter().any(is_actionable));

        let signals = fast.analyse(&train);
        assert!(
            signals
                .iter()
                .any(|s| s.bucket == RuleBucket::IsolatedNoise && s.confidence > 0.0)
        );
        let candidates = fast.whole_grid_candidates(&signals, &train);
        assert!(
            candidates
                .iter()
                .any(|h| h.qualified_name() == "color:removeIsolatedCells")
        );
    }

    #[test]
    fn convergence_builds_hypothesis_for_mirror() {
        let input = grid(&[&[5, 0, 0], &[0, 0, 0], &[0, 0, 0]]);
        let train = vec![TrainPair::new(input.clone(), input.flip_horizontal())];
        let ontology = Ontology::standard();
        let config = SolverConfig::default();
        let mut safety = SafetyBoundary::new(config.safety_limits());
        safety.start().unwrap();
        let (h, result) = FastPath::new(&ontology, &config)
            .convergence_hypothesis(&train, &mut safety)
            .unwrap()
            .unwrap();
        assert!(result.cycles <= 2);
        assert!(safety.iterations() > 0);
        assert_eq!(h.apply(&input).unwrap(), input.flip_horizontal());

        let mut spent = SafetyBoundary::new(SafetyLimits {
            max_iterations: 0,
            ..config.safety_limits()
        });
        spent.start().unwrap();
        assert!(
            FastPath::new(&ontology, &config)
                .convergence_hypothesis(&train, &mut spent)
                .is_err()
        );
    }

    #[test]
    fn fragment_candidates_need_several_components() {
        let train = vec![TrainPair::new(
            grid(&[&[1, 1, 0, 0], &[0, 0, 0, 0], &[0, 0, 2, 0]]),
            grid(&[&[1, 1, 0, 0], &[0, 0, 0, 0], &[0, 0, 2, 0]]),
        )];
        let ontology = Ontology::standard();
        let config = SolverConfig::default();
        let fast = FastPath::new(&ontology, &config);
        let whole = vec![ontology.get("structural:flipHorizontal").cloned().unwrap()];
        let mut safety = SafetyBoundary::new(config.safety_limits());
        safety.start().unwrap();
        let wrapped = fast.fragment_candidates(&whole, &train, &mut safety).unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(safety.iterations(), 2);

        let single = vec![TrainPair::new(grid(&[&[1, 0]]), grid(&[&[0, 1]]))];
        assert!(fast.fragment_candidates(&whole, &single, &mut safety).unwrap().is_empty());
    }

    #[test]
    fn resolves_fragment_names() {
        let ontology = Ontology::standard();
        let config = SolverConfig::default();
        let fast = FastPath::new(&ontology, &config);
        let h = fast.resolve("structural:fragment[flipHorizontal]").unwrap();
        assert_eq!(h.qualified_name(), "structural:fragment[flipHorizontal]");
        assert!(fast.resolve("spatial:gravityDown").is_some());
        assert!(fast.resolve("structural:fragment[nope]").is_none());
    }
}
