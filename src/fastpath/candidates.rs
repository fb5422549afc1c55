//! Bucket → candidate mapping and the quick entropy evaluator used to rank
//! candidates before full validation.

use std::collections::BTreeSet;

use crate::grid::{BACKGROUND, Cell, Grid};
use crate::ontology::color::{recolor_name, swap_name};
use crate::ontology::spatial::Direction;
use crate::ontology::{Hypothesis, Ontology};
use crate::task::TrainPair;

use super::features::RuleBucket;

/// Fixed qualified names tried for each bucket, in order.
fn bucket_names(bucket: RuleBucket) -> Vec<String> {
    let fixed: &[&str] = match bucket {
        RuleBucket::ColorReplacement => &[
            "color:learnedColorMap",
            "color:swapBackgroundForeground",
            "spatial:fillBoundingBox",
            "color:normalizePalette",
        ],
        RuleBucket::MirrorSymmetry => &[
            "difference:symmetrizeHorizontal",
            "difference:symmetrizeVertical",
            "difference:symmetrizeBoth",
            "structural:flipHorizontal",
            "structural:flipVertical",
            "structural:rotate180",
            "structural:mirrorExtendHorizontal",
            "structural:mirrorExtendVertical",
            "structural:mirrorQuad",
        ],
        RuleBucket::DiagonalPattern => &[
            "structural:transpose",
            "structural:antiTranspose",
            "structural:fillDiagonal",
            "structural:fillAntiDiagonal",
            "structural:rotate90",
            "structural:rotate270",
        ],
        RuleBucket::IsolatedNoise => &[
            "color:removeIsolatedCells",
            "abstract:neighbourhoodVote",
            "structural:keepLargestObject",
            "structural:erode",
        ],
        RuleBucket::BoundingBlobs => &[
            "spatial:fillBoundingBox",
            "border:fillEnclosed",
            "structural:cropToContent",
            "structural:cropToLargestObject",
            "structural:outline",
            "structural:dilate",
        ],
        RuleBucket::RunLength => &[
            "abstract:rowLines",
            "abstract:columnLines",
            "abstract:crossLines",
            "counting:sortRowsByCount",
            "counting:histogramBars",
        ],
        RuleBucket::PeriodicRepeat => &[
            "structural:tileHorizontal",
            "structural:tileVertical",
            "structural:tile2x2",
            "structural:tile3x3",
            "structural:scaleUp2",
            "structural:scaleUp3",
            "structural:mirrorQuad",
        ],
        RuleBucket::Motion | RuleBucket::Unknown => &[],
    };
    let mut names: Vec<String> = fixed.iter().map(|s| s.to_string()).collect();
    if bucket == RuleBucket::Motion {
        for prefix in ["gravity", "shift", "align"] {
            for dir in Direction::ALL {
                names.push(format!("spatial:{prefix}{}", dir.suffix()));
            }
        }
        names.push("spatial:centerContent".into());
    }
    names
}

/// Maps rule buckets to concrete ontology entries.
#[derive(Debug, Clone, Copy)]
pub struct CandidateGenerator<'a> {
    ontology: &'a Ontology,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(ontology: &'a Ontology) -> Self {
        Self { ontology }
    }

    /// Candidates for `bucket`, specialised by the colors seen in `train`.
    /// Names absent from the ontology (e.g. learned entries that did not fit)
    /// are skipped.
    pub fn for_bucket(&self, bucket: RuleBucket, train: &[TrainPair]) -> Vec<Hypothesis> {
        let mut names = Vec::new();
        if bucket == RuleBucket::ColorReplacement {
            names.extend(color_names(train));
        }
        names.extend(bucket_names(bucket));
        let mut seen = BTreeSet::new();
        names
            .into_iter()
            .filter(|n| seen.insert(n.clone()))
            .filter_map(|n| self.ontology.get(&n).cloned())
            .collect()
    }

    /// Candidates for several buckets in order, without duplicates.
    pub fn for_buckets(&self, buckets: &[RuleBucket], train: &[TrainPair]) -> Vec<Hypothesis> {
        let mut seen = BTreeSet::new();
        buckets
            .iter()
            .flat_map(|&b| self.for_bucket(b, train))
            .filter(|h| seen.insert(h.qualified_name()))
            .collect()
    }
}

/// Swap and recolor entries for every color change observed in same-shape
/// pairs, swaps first.
fn color_names(train: &[TrainPair]) -> Vec<String> {
    let mut changes: BTreeSet<(Cell, Cell)> = BTreeSet::new();
    for pair in train {
        if let Some(diff) = pair.input.diff(&pair.output) {
            changes.extend(diff.into_iter().map(|(_, _, a, b)| (a, b)));
        }
    }
    let mut swaps = Vec::new();
    let mut recolors = Vec::new();
    for &(a, b) in &changes {
        if changes.contains(&(b, a)) {
            swaps.push(format!("color:{}", swap_name(a, b)));
        }
        recolors.push(format!("color:{}", recolor_name(a, b)));
    }
    swaps.sort();
    swaps.dedup();
    swaps.into_iter().chain(recolors).collect()
}

/// Shannon entropy (bits) of the grid's color distribution.
pub fn entropy(g: &Grid) -> f64 {
    let n = g.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    g.histogram()
        .values()
        .map(|&count| {
            let p = count as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// Signed entropy reduction from `before` to `after`, normalised to [-1, 1].
/// Positive means the candidate made the grid more ordered.
pub fn quick_score(before: &Grid, after: &Grid) -> f64 {
    let max = (10f64).log2();
    ((entropy(before) - entropy(after)) / max).clamp(-1.0, 1.0)
}

/// Reorder candidates so those whose entropy change on each training input
/// best matches the observed input-to-output change come first. Candidates
/// that fail on a pair rank last. Ties keep their bucket order.
pub fn rank_by_quick_score(
    mut candidates: Vec<Hypothesis>,
    train: &[TrainPair],
) -> Vec<Hypothesis> {
    let observed: Vec<f64> = train
        .iter()
        .map(|p| quick_score(&p.input, &p.output))
        .collect();
    candidates.sort_by_cached_key(|h| {
        let distance: f64 = train
            .iter()
            .zip(&observed)
            .map(|(pair, &want)| match h.apply(&pair.input) {
                Ok(out) => (quick_score(&pair.input, &out) - want).abs(),
                Err(_) => 2.0,
            })
            .sum();
        // Quantised so float noise between equivalent candidates is a tie.
        (distance * 1e6).round() as i64
    });
    candidates
}

/// Whether a grid has any foreground.
pub(crate) fn has_content(g: &Grid) -> bool {
    g.cells().iter().any(|&v| v != BACKGROUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid;

    fn swap_train() -> Vec<TrainPair> {
        vec![TrainPair::new(grid(&[&[1, 2], &[0, 1]]), grid(&[&[2, 1], &[0, 2]]))]
    }

    #[test]
    fn color_bucket_starts_with_observed_swap() {
        let ontology = Ontology::for_task(&swap_train());
        let candidates = CandidateGenerator::new(&ontology)
            .for_bucket(RuleBucket::ColorReplacement, &swap_train());
        assert_eq!(candidates[0].qualified_name(), "color:multiMap1to2_2to1");
        assert!(candidates.iter().any(|h| h.qualified_name() == "color:learnedColorMap"));
        assert!(candidates.iter().any(|h| h.qualified_name() == "color:recolor1to2"));
    }

    #[test]
    fn motion_bucket_lists_gravity_first() {
        let ontology = Ontology::standard();
        let candidates = CandidateGenerator::new(&ontology).for_bucket(RuleBucket::Motion, &[]);
        assert_eq!(candidates[0].qualified_name(), "spatial:gravityUp");
        assert!(candidates.iter().any(|h| h.name() == "gravityDown"));
        assert!(CandidateGenerator::new(&ontology)
            .for_bucket(RuleBucket::Unknown, &[])
            .is_empty());
    }

    #[test]
    fn merged_buckets_are_deduplicated() {
        let ontology = Ontology::standard();
        let candidates = CandidateGenerator::new(&ontology).for_buckets(
            &[RuleBucket::MirrorSymmetry, RuleBucket::PeriodicRepeat],
            &[],
        );
        let quads = candidates
            .iter()
            .filter(|h| h.name() == "mirrorQuad")
            .count();
        assert_eq!(quads, 1);
    }

    #[test]
    fn ranking_prefers_matching_entropy_change() {
        let ontology = Ontology::standard();
        let pick = |names: &[&str]| -> Vec<Hypothesis> {
            names.iter().map(|n| ontology.get(n).cloned().unwrap()).collect()
        };
        let train = vec![TrainPair::new(grid(&[&[1, 2], &[0, 0]]), grid(&[&[2, 2], &[0, 0]]))];

        let ranked = rank_by_quick_score(
            pick(&["structural:flipHorizontal", "color:recolor1to2"]),
            &train,
        );
        assert_eq!(ranked[0].qualified_name(), "color:recolor1to2");

        // Equal entropy change keeps the incoming order.
        let ranked = rank_by_quick_score(
            pick(&["structural:flipVertical", "structural:flipHorizontal"]),
            &train,
        );
        assert_eq!(ranked[0].qualified_name(), "structural:flipVertical");
        assert!(rank_by_quick_score(Vec::new(), &train).is_empty());
    }

    #[test]
    fn entropy_and_quick_score() {
        let uniform = Grid::filled(2, 2, 3);
        let mixed = grid(&[&[1, 2], &[3, 4]]);
        assert_eq!(entropy(&uniform), 0.0);
        assert!((entropy(&mixed) - 2.0).abs() < 1e-9);
        assert!(quick_score(&mixed, &uniform) > 0.0);
        assert!(quick_score(&uniform, &mixed) < 0.0);
        assert!(has_content(&mixed) && !has_content(&Grid::filled(1, 1, 0)));
    }
}
