//! Greedy convergence loop over a fixed candidate set.

use serde::{Deserialize, Serialize};

use crate::grid::Grid;
use crate::ontology::{Hypothesis, Ontology};
use crate::safety::{SafetyBoundary, SafetyResult};

use super::candidates::entropy;

/// Default cycle ceiling.
pub const DEFAULT_MAX_CYCLES: usize = 12;

/// Smallest score gain that counts as progress.
pub const MIN_IMPROVEMENT: f64 = 0.001;

const SYMMETRY_BONUS: f64 = 0.05;
const DIAGONAL_BONUS: f64 = 0.05;

/// Qualified names of the geometric candidates the loop draws from.
pub const CONVERGENCE_SET: &[&str] = &[
    "structural:flipHorizontal",
    "structural:flipVertical",
    "structural:rotate90",
    "structural:rotate180",
    "structural:rotate270",
    "structural:transpose",
    "structural:antiTranspose",
    "difference:symmetrizeHorizontal",
    "difference:symmetrizeVertical",
    "structural:fillDiagonal",
    "structural:fillAntiDiagonal",
    "color:removeIsolatedCells",
    "spatial:gravityDown",
    "spatial:gravityUp",
    "spatial:gravityLeft",
    "spatial:gravityRight",
];

/// The convergence candidates present in `ontology`.
pub fn convergence_candidates(ontology: &Ontology) -> Vec<Hypothesis> {
    CONVERGENCE_SET
        .iter()
        .filter_map(|n| ontology.get(n).cloned())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The grid already matched the target.
    AlreadyConverged,
    ExactMatch,
    NoValidCandidate,
    NegligibleImprovement,
    Unchanged,
    CycleLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceStep {
    pub cycle: usize,
    pub candidate: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ConvergenceResult {
    pub grid: Grid,
    /// Candidates applied, in order.
    pub applied: Vec<Hypothesis>,
    pub steps: Vec<ConvergenceStep>,
    pub cycles: usize,
    pub improved: bool,
    pub exact: bool,
    pub stop: StopReason,
}

/// Score of `grid`: cell accuracy against `target` (or an entropy proxy
/// without one), plus small bonuses for mirror and diagonal symmetry.
pub fn score(grid: &Grid, target: Option<&Grid>) -> f64 {
    let base = match target {
        Some(t) => grid.cell_accuracy(t),
        None => 1.0 - entropy(grid) / 10f64.log2(),
    };
    let mut bonus = 0.0;
    if grid.is_symmetric_horizontal() || grid.is_symmetric_vertical() {
        bonus += SYMMETRY_BONUS;
    }
    if grid.rows() == grid.cols() && *grid == grid.transpose() {
        bonus += DIAGONAL_BONUS;
    }
    base + bonus
}

/// Repeatedly apply the best-scoring candidate until no candidate helps, the
/// grid stops changing, the target is matched, or `max_cycles` is reached.
///
/// With a safety boundary, every candidate application is checked against it
/// first and a trip aborts the loop.
pub fn converge(
    grid: &Grid,
    candidates: &[Hypothesis],
    max_cycles: usize,
    target: Option<&Grid>,
    mut safety: Option<&mut SafetyBoundary>,
) -> SafetyResult<ConvergenceResult> {
    let mut current = grid.clone();
    let mut current_score = score(&current, target);
    let mut applied = Vec::new();
    let mut steps = Vec::new();
    let mut cycles = 0;

    let finish = |grid: Grid, applied: Vec<Hypothesis>, steps: Vec<ConvergenceStep>, cycles, stop| {
        let exact = target.is_some_and(|t| *t == grid);
        ConvergenceResult {
            improved: !steps.is_empty(),
            grid,
            applied,
            steps,
            cycles,
            exact,
            stop,
        }
    };

    if target.is_some_and(|t| *t == current) {
        return Ok(finish(current, applied, steps, 0, StopReason::AlreadyConverged));
    }

    while cycles < max_cycles {
        cycles += 1;
        let mut best: Option<(f64, Grid, &Hypothesis)> = None;
        for candidate in candidates {
            if let Some(guard) = safety.as_deref_mut() {
                guard.check()?;
            }
            let Ok(next) = candidate.apply(&current) else {
                continue;
            };
            if next.is_empty() {
                continue;
            }
            let s = score(&next, target);
            if best.as_ref().is_none_or(|(b, _, _)| s > *b) {
                best = Some((s, next, candidate));
            }
        }
        let Some((best_score, next, candidate)) = best else {
            return Ok(finish(current, applied, steps, cycles, StopReason::NoValidCandidate));
        };
        if next == current {
            return Ok(finish(current, applied, steps, cycles, StopReason::Unchanged));
        }
        if best_score - current_score < MIN_IMPROVEMENT {
            return Ok(finish(current, applied, steps, cycles, StopReason::NegligibleImprovement));
        }
        tracing::trace!(cycle = cycles, candidate = %candidate.qualified_name(), score = best_score, "convergence step");
        steps.push(ConvergenceStep {
            cycle: cycles,
            candidate: candidate.qualified_name(),
            score: best_score,
        });
        applied.push(candidate.clone());
        current = next;
        current_score = best_score;
        if target.is_some_and(|t| *t == current) {
            return Ok(finish(current, applied, steps, cycles, StopReason::ExactMatch));
        }
    }
    Ok(finish(current, applied, steps, cycles, StopReason::CycleLimit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::grid::grid;
    use crate::safety::{SafetyError, SafetyLimits};

    #[test]
    fn corner_cell_mirrors_in_one_cycle() {
        let ontology = Ontology::standard();
        let candidates = convergence_candidates(&ontology);
        let input = grid(&[&[4, 0, 0], &[0, 0, 0], &[0, 0, 0]]);
        let target = input.flip_horizontal();
        let result = converge(&input, &candidates, DEFAULT_MAX_CYCLES, Some(&target), None).unwrap();
        assert!(result.exact);
        assert!(result.cycles <= 2);
        assert_eq!(result.stop, StopReason::ExactMatch);
        assert!(result.improved);
    }

    #[test]
    fn converged_output_is_a_fixed_point() {
        let ontology = Ontology::standard();
        let candidates = convergence_candidates(&ontology);
        let input = grid(&[&[1, 0, 2], &[0, 3, 0], &[0, 0, 0]]);
        let first = converge(&input, &candidates, DEFAULT_MAX_CYCLES, None, None).unwrap();
        let mut current = first;
        // Iterate until a run reports no improvement, then check it is stable.
        for _ in 0..DEFAULT_MAX_CYCLES {
            if !current.improved {
                break;
            }
            current = converge(&current.grid, &candidates, DEFAULT_MAX_CYCLES, None, None).unwrap();
        }
        assert!(!current.improved);
        let again = converge(&current.grid, &candidates, DEFAULT_MAX_CYCLES, None, None).unwrap();
        assert_eq!(again.grid, current.grid);
        assert!(!again.improved);
    }

    #[test]
    fn already_matching_stops_immediately() {
        let candidates = convergence_candidates(&Ontology::standard());
        let g = grid(&[&[1, 2]]);
        let result = converge(&g, &candidates, 5, Some(&g), None).unwrap();
        assert_eq!(result.stop, StopReason::AlreadyConverged);
        assert_eq!(result.cycles, 0);
        assert!(!result.improved);
    }

    #[test]
    fn no_candidates_stops() {
        let result = converge(&grid(&[&[1]]), &[], 5, None, None).unwrap();
        assert_eq!(result.stop, StopReason::NoValidCandidate);
        assert_eq!(result.grid, grid(&[&[1]]));
    }

    #[test]
    fn every_candidate_application_is_metered() {
        let candidates = convergence_candidates(&Ontology::standard());
        let input = grid(&[&[4, 0, 0], &[0, 0, 0], &[0, 0, 0]]);
        let target = input.flip_horizontal();

        let limits = SolverConfig::default().safety_limits();
        let mut roomy = SafetyBoundary::new(limits.clone());
        roomy.start().unwrap();
        let result = converge(
            &input,
            &candidates,
            DEFAULT_MAX_CYCLES,
            Some(&target),
            Some(&mut roomy),
        )
        .unwrap();
        assert!(result.exact);
        assert_eq!(roomy.iterations(), (result.cycles * candidates.len()) as u64);

        let mut tight = SafetyBoundary::new(SafetyLimits {
            max_iterations: 3,
            ..limits
        });
        tight.start().unwrap();
        let err = converge(
            &input,
            &candidates,
            DEFAULT_MAX_CYCLES,
            Some(&target),
            Some(&mut tight),
        )
        .unwrap_err();
        assert!(matches!(err, SafetyError::IterationLimit { limit: 3 }));
        assert_eq!(tight.iterations(), 4);
    }

    #[test]
    fn symmetric_grids_score_higher() {
        let plain = grid(&[&[1, 0], &[0, 0]]);
        let target = grid(&[&[0, 0], &[0, 0]]);
        let sym = grid(&[&[1, 1], &[0, 0]]);
        assert!(score(&sym, None) > 0.0);
        assert!(score(&plain, Some(&target)) < score(&target, Some(&target)));
    }
}
