//! Coarse structural signals used to pick fast-path candidates.
//!
//! [`FeatureExtractor::extract`] looks at a single grid; [`FeatureExtractor::extract_pair`]
//! compares an input with its output. Both return signals sorted by
//! descending confidence.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grid::{BACKGROUND, Cell, Grid};
use crate::ontology::structural::neighbors4;

/// Rule family a grid or pair most likely belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleBucket {
    ColorReplacement,
    MirrorSymmetry,
    DiagonalPattern,
    IsolatedNoise,
    BoundingBlobs,
    RunLength,
    Motion,
    PeriodicRepeat,
    Unknown,
}

impl RuleBucket {
    pub const ALL: [RuleBucket; 9] = [
        Self::ColorReplacement,
        Self::MirrorSymmetry,
        Self::DiagonalPattern,
        Self::IsolatedNoise,
        Self::BoundingBlobs,
        Self::RunLength,
        Self::Motion,
        Self::PeriodicRepeat,
        Self::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ColorReplacement => "color_replacement",
            Self::MirrorSymmetry => "mirror_symmetry",
            Self::DiagonalPattern => "diagonal_pattern",
            Self::IsolatedNoise => "isolated_noise",
            Self::BoundingBlobs => "bounding_blobs",
            Self::RunLength => "run_length",
            Self::Motion => "motion",
            Self::PeriodicRepeat => "periodic_repeat",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RuleBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which mirror relation was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorKind {
    Horizontal,
    Vertical,
    Both,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSignal {
    pub bucket: RuleBucket,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

/// Signals for one grid or one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridFeatures {
    /// Sorted by descending confidence, ties in bucket order.
    pub signals: Vec<FeatureSignal>,
    pub mirror: MirrorKind,
    /// Fraction of cells equal to their left-right mirror.
    pub horizontal_symmetry: f64,
    /// Fraction of cells equal to their top-bottom mirror.
    pub vertical_symmetry: f64,
}

impl GridFeatures {
    fn new(mut signals: Vec<FeatureSignal>, mirror: MirrorKind, h: f64, v: f64) -> Self {
        signals.retain(|s| s.confidence > 0.0);
        signals.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.bucket.cmp(&b.bucket))
        });
        Self {
            signals,
            mirror,
            horizontal_symmetry: h,
            vertical_symmetry: v,
        }
    }

    /// Highest-confidence bucket, or `Unknown`.
    pub fn primary(&self) -> RuleBucket {
        self.signals.first().map_or(RuleBucket::Unknown, |s| s.bucket)
    }

    pub fn confidence(&self, bucket: RuleBucket) -> f64 {
        self.signals
            .iter()
            .find(|s| s.bucket == bucket)
            .map_or(0.0, |s| s.confidence)
    }
}

/// Average per-bucket confidence over several feature sets, sorted descending.
pub fn merge_signals(sets: &[GridFeatures]) -> Vec<FeatureSignal> {
    if sets.is_empty() {
        return Vec::new();
    }
    let mut sums: BTreeMap<RuleBucket, f64> = BTreeMap::new();
    for set in sets {
        for s in &set.signals {
            *sums.entry(s.bucket).or_insert(0.0) += s.confidence;
        }
    }
    let n = sets.len() as f64;
    let merged: Vec<FeatureSignal> = sums
        .into_iter()
        .map(|(bucket, sum)| FeatureSignal {
            bucket,
            confidence: sum / n,
        })
        .collect();
    GridFeatures::new(merged, MirrorKind::None, 0.0, 0.0).signals
}

/// Fraction of cells equal to the corresponding cell of `other`.
fn agreement(a: &Grid, b: &Grid) -> f64 {
    a.cell_accuracy(b)
}

/// Stateless feature extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Classify a single grid without training context.
    pub fn extract(&self, g: &Grid) -> GridFeatures {
        let fg = g.foreground_count();
        let h = agreement(g, &g.flip_horizontal());
        let v = agreement(g, &g.flip_vertical());
        let mirror = mirror_kind(h == 1.0, v == 1.0);
        if fg == 0 {
            return GridFeatures::new(Vec::new(), mirror, h, v);
        }

        let mut signals = Vec::new();
        let best_mirror = h.max(v);
        if best_mirror > 0.5 {
            signals.push(signal(RuleBucket::MirrorSymmetry, best_mirror));
        }
        if g.rows() == g.cols() && g.rows() > 1 {
            let diag = agreement(g, &g.transpose()).max(agreement(g, &g.anti_transpose()));
            if diag > 0.5 {
                signals.push(signal(RuleBucket::DiagonalPattern, diag * 0.9));
            }
        }
        let isolated = isolated_cells(g);
        if isolated > 0 {
            signals.push(signal(RuleBucket::IsolatedNoise, isolated as f64 / fg as f64));
        }
        signals.push(signal(RuleBucket::BoundingBlobs, blob_fraction(g)));
        signals.push(signal(RuleBucket::RunLength, run_fraction(g)));
        if let Some((pr, pc)) = period(g) {
            let ratio = (pr * pc) as f64 / g.len() as f64;
            signals.push(signal(RuleBucket::PeriodicRepeat, 1.0 - ratio));
        }
        GridFeatures::new(signals, mirror, h, v)
    }

    /// Classify the relation between an input and its output.
    pub fn extract_pair(&self, input: &Grid, output: &Grid) -> GridFeatures {
        let mut signals = Vec::new();
        let h_exact = *output == input.flip_horizontal();
        let v_exact = *output == input.flip_vertical();
        let mirror = mirror_kind(h_exact, v_exact);
        let (h, v) = if input.dims() == output.dims() {
            (
                agreement(output, &input.flip_horizontal()),
                agreement(output, &input.flip_vertical()),
            )
        } else {
            (0.0, 0.0)
        };

        if h_exact || v_exact || *output == input.rotate180() {
            signals.push(signal(RuleBucket::MirrorSymmetry, 1.0));
        } else if output.is_symmetric_horizontal() || output.is_symmetric_vertical() {
            let gain = !(input.is_symmetric_horizontal() || input.is_symmetric_vertical());
            signals.push(signal(RuleBucket::MirrorSymmetry, if gain { 0.85 } else { 0.3 }));
        } else if h.max(v) > 0.5 {
            signals.push(signal(RuleBucket::MirrorSymmetry, h.max(v) * 0.5));
        }

        if *output == input.transpose() || *output == input.anti_transpose() {
            signals.push(signal(RuleBucket::DiagonalPattern, 1.0));
        } else if output.rows() == output.cols()
            && *output == output.transpose()
            && *input != input.transpose()
        {
            signals.push(signal(RuleBucket::DiagonalPattern, 0.7));
        }

        if input.dims() == output.dims() {
            let mask_same = input.foreground_mask() == output.foreground_mask();
            if let Some(consistency) = color_map_consistency(input, output) {
                if mask_same || consistency == 1.0 {
                    signals.push(signal(RuleBucket::ColorReplacement, consistency));
                }
            }
            if !mask_same && input.histogram() == output.histogram() {
                signals.push(signal(RuleBucket::Motion, 0.9));
            }
            let (removed, added) = fg_delta(input, output);
            if removed > 0 && added == 0 {
                let before = isolated_cells(input);
                if before > 0 {
                    signals.push(signal(
                        RuleBucket::IsolatedNoise,
                        (before.min(removed) as f64 / removed as f64) * 0.9,
                    ));
                }
            }
            if added > 0 && removed == 0 {
                let inside = input.content_bbox().map_or(0, |bbox| {
                    input
                        .iter()
                        .filter(|&(r, c, v)| v == BACKGROUND && bbox.contains(r, c))
                        .filter(|&(r, c, _)| output.get(r, c) != BACKGROUND)
                        .count()
                });
                signals.push(signal(RuleBucket::BoundingBlobs, 0.8 * inside as f64 / added as f64));
                signals.push(signal(RuleBucket::RunLength, 0.7 * run_gain(input, output)));
            }
        } else {
            let (ir, ic) = input.dims();
            let (or, oc) = output.dims();
            if or % ir == 0 && oc % ic == 0 && (or > ir || oc > ic) {
                signals.push(signal(RuleBucket::PeriodicRepeat, 0.9));
            } else if or < ir || oc < ic {
                signals.push(signal(RuleBucket::BoundingBlobs, 0.4));
            }
        }
        GridFeatures::new(signals, mirror, h, v)
    }
}

fn signal(bucket: RuleBucket, confidence: f64) -> FeatureSignal {
    FeatureSignal {
        bucket,
        confidence: confidence.clamp(0.0, 1.0),
    }
}

fn mirror_kind(h: bool, v: bool) -> MirrorKind {
    match (h, v) {
        (true, true) => MirrorKind::Both,
        (true, false) => MirrorKind::Horizontal,
        (false, true) => MirrorKind::Vertical,
        (false, false) => MirrorKind::None,
    }
}

/// Foreground cells with no same-colored 4-neighbour.
pub(crate) fn isolated_cells(g: &Grid) -> usize {
    g.iter()
        .filter(|&(_, _, v)| v != BACKGROUND)
        .filter(|&(r, c, v)| !neighbors4(g, r, c).contains(&Some(v)))
        .count()
}

/// Share of foreground cells inside solid, roughly rectangular objects.
fn blob_fraction(g: &Grid) -> f64 {
    let fg = g.foreground_count();
    if fg == 0 {
        return 0.0;
    }
    let solid: usize = g
        .objects()
        .iter()
        .filter(|o| o.size() >= 4 && o.size() as f64 / o.bbox.area() as f64 >= 0.75)
        .map(|o| o.size())
        .sum();
    solid as f64 / fg as f64
}

/// Share of rows and columns whose foreground forms one run of length >= 2.
fn run_fraction(g: &Grid) -> f64 {
    let lines: Vec<Vec<Cell>> = (0..g.rows())
        .map(|r| g.row(r).to_vec())
        .chain((0..g.cols()).map(|c| g.column(c)))
        .collect();
    let runs = lines.iter().filter(|line| single_run(line)).count();
    runs as f64 / lines.len().max(1) as f64
}

fn single_run(line: &[Cell]) -> bool {
    let Some(start) = line.iter().position(|&v| v != BACKGROUND) else {
        return false;
    };
    let len = line[start..].iter().take_while(|&&v| v != BACKGROUND).count();
    len >= 2 && line[start + len..].iter().all(|&v| v == BACKGROUND)
}

fn run_gain(input: &Grid, output: &Grid) -> f64 {
    (run_fraction(output) - run_fraction(input)).max(0.0)
}

/// Smallest block that tiles the grid, if smaller than the grid.
pub(crate) fn period(g: &Grid) -> Option<(usize, usize)> {
    let (rows, cols) = g.dims();
    let tiles = |pr: usize, pc: usize| g.iter().all(|(r, c, v)| g.get(r % pr, c % pc) == v);
    (1..=rows)
        .flat_map(|pr| (1..=cols).map(move |pc| (pr, pc)))
        .filter(|&(pr, pc)| pr * pc < rows * cols)
        .filter(|&(pr, pc)| rows % pr == 0 && cols % pc == 0)
        .find(|&(pr, pc)| tiles(pr, pc))
}

/// Fraction of colors whose mapping input -> output is single-valued, or
/// `None` when nothing changed.
fn color_map_consistency(input: &Grid, output: &Grid) -> Option<f64> {
    let mut seen: BTreeMap<Cell, BTreeMap<Cell, usize>> = BTreeMap::new();
    let mut changed = false;
    for (&a, &b) in input.cells().iter().zip(output.cells()) {
        changed |= a != b;
        *seen.entry(a).or_default().entry(b).or_insert(0) += 1;
    }
    if !changed {
        return None;
    }
    let consistent = seen.values().filter(|targets| targets.len() == 1).count();
    Some(consistent as f64 / seen.len() as f64)
}

/// Foreground cells cleared and filled between two same-shape grids.
fn fg_delta(input: &Grid, output: &Grid) -> (usize, usize) {
    input
        .cells()
        .iter()
        .zip(output.cells())
        .fold((0, 0), |(removed, added), (&a, &b)| {
            match (a != BACKGROUND, b != BACKGROUND) {
                (true, false) => (removed + 1, added),
                (false, true) => (removed, added + 1),
                _ => (removed, added),
            }
        })
}
