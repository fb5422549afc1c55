//! Explainability: prose traces for winning hypotheses and cell-level diff
//! heatmaps between grids.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grid::{BACKGROUND, Cell, Grid};
use crate::ontology::Hypothesis;
use crate::ontology::spatial::Direction;
use crate::task::TrainPair;

// ── Explanation ─────────────────────────────────────────────────────────

/// Human-readable account of why a hypothesis solves a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    pub steps: Vec<StepExplanation>,
    pub patterns: Vec<DetectedPattern>,
    /// Heuristic confidence in [0.05, 0.99].
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExplanation {
    pub index: usize,
    pub operation: String,
    pub description: String,
}

/// Structural change observed between a training input and its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectedPattern {
    SizeChange {
        from: (usize, usize),
        to: (usize, usize),
    },
    ColorsAdded { colors: Vec<Cell> },
    ColorsRemoved { colors: Vec<Cell> },
    ObjectCountChange { from: usize, to: usize },
}

impl fmt::Display for DetectedPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeChange { from, to } => {
                write!(f, "size {}x{} -> {}x{}", from.0, from.1, to.0, to.1)
            }
            Self::ColorsAdded { colors } => write!(f, "colors added {colors:?}"),
            Self::ColorsRemoved { colors } => write!(f, "colors removed {colors:?}"),
            Self::ObjectCountChange { from, to } => write!(f, "objects {from} -> {to}"),
        }
    }
}

// ── Heatmap ─────────────────────────────────────────────────────────────

/// Per-cell classification of a grid diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellChange {
    Unchanged,
    Added,
    Removed,
    Modified,
    /// Cell exists in only one of the two grids.
    SizeChange,
}

impl CellChange {
    pub fn symbol(self) -> char {
        match self {
            Self::Unchanged => '.',
            Self::Added => '+',
            Self::Removed => '-',
            Self::Modified => '~',
            Self::SizeChange => '#',
        }
    }
}

/// Cell classification over the union of two grids' extents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHeatmap {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<Vec<CellChange>>,
}

impl DiffHeatmap {
    pub fn count(&self, kind: CellChange) -> usize {
        self.cells.iter().flatten().filter(|&&c| c == kind).count()
    }

    pub fn changed(&self) -> usize {
        self.rows * self.cols - self.count(CellChange::Unchanged)
    }
}

impl fmt::Display for DiffHeatmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.cells {
            let line: String = row.iter().map(|c| c.symbol()).collect();
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

// ── Engine ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ExplainabilityEngine;

impl ExplainabilityEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn explain(&self, hypothesis: &Hypothesis, train: &[TrainPair]) -> Explanation {
        let steps: Vec<StepExplanation> = hypothesis
            .steps()
            .iter()
            .enumerate()
            .map(|(index, step)| StepExplanation {
                index,
                operation: step.qualified_name(),
                description: self.describe(&step.qualified_name()),
            })
            .collect();

        let summary = if hypothesis.is_chain() {
            format!(
                "{}-step chain reproducing {} training pair(s): {}",
                steps.len(),
                train.len(),
                steps
                    .iter()
                    .map(|s| s.description.as_str())
                    .collect::<Vec<_>>()
                    .join(", then ")
            )
        } else {
            format!(
                "{} reproduces {} training pair(s): {}",
                hypothesis.qualified_name(),
                train.len(),
                steps.first().map(|s| s.description.as_str()).unwrap_or("")
            )
        };

        Explanation {
            summary,
            steps,
            patterns: detect_patterns(train),
            confidence: confidence(hypothesis, train.len()),
        }
    }

    /// Prose for one operation name, qualified or local.
    pub fn describe(&self, operation: &str) -> String {
        let local = operation
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(operation);
        if let Some(text) = known_operation(local) {
            return text.to_string();
        }
        if let Some(text) = parameterized(local) {
            return text;
        }
        format!("apply the {local} transform")
    }

    /// Classify every cell of `before` against `after`.
    pub fn diff_heatmap(&self, before: &Grid, after: &Grid) -> DiffHeatmap {
        let rows = before.rows().max(after.rows());
        let cols = before.cols().max(after.cols());
        let cell = |g: &Grid, r: usize, c: usize| (r < g.rows() && c < g.cols()).then(|| g.get(r, c));
        let cells = (0..rows)
            .map(|r| {
                (0..cols)
                    .map(|c| match (cell(before, r, c), cell(after, r, c)) {
                        (Some(a), Some(b)) if a == b => CellChange::Unchanged,
                        (Some(BACKGROUND), Some(_)) => CellChange::Added,
                        (Some(_), Some(BACKGROUND)) => CellChange::Removed,
                        (Some(_), Some(_)) => CellChange::Modified,
                        _ => CellChange::SizeChange,
                    })
                    .collect()
            })
            .collect();
        DiffHeatmap { rows, cols, cells }
    }
}

/// More training pairs raise confidence; longer chains and fitted entries
/// lower it.
fn confidence(hypothesis: &Hypothesis, pairs: usize) -> f64 {
    let mut c = 0.5 + 0.1 * pairs.min(4) as f64;
    c -= 0.1 * hypothesis.chain_len().saturating_sub(1) as f64;
    if hypothesis.is_learned() {
        c -= 0.05;
    }
    c.clamp(0.05, 0.99)
}

fn detect_patterns(train: &[TrainPair]) -> Vec<DetectedPattern> {
    let mut patterns: Vec<DetectedPattern> = Vec::new();
    let mut push = |p: DetectedPattern| {
        if !patterns.contains(&p) {
            patterns.push(p);
        }
    };
    for pair in train {
        let (input, output) = (&pair.input, &pair.output);
        if input.dims() != output.dims() {
            push(DetectedPattern::SizeChange {
                from: input.dims(),
                to: output.dims(),
            });
        }
        let before = input.foreground_colors();
        let after = output.foreground_colors();
        let added: Vec<Cell> = after.difference(&before).copied().collect();
        let removed: Vec<Cell> = before.difference(&after).copied().collect();
        if !added.is_empty() {
            push(DetectedPattern::ColorsAdded { colors: added });
        }
        if !removed.is_empty() {
            push(DetectedPattern::ColorsRemoved { colors: removed });
        }
        let (from, to) = (input.objects().len(), output.objects().len());
        if from != to {
            push(DetectedPattern::ObjectCountChange { from, to });
        }
    }
    patterns
}

fn known_operation(name: &str) -> Option<&'static str> {
    Some(match name {
        "identity" => "leave the grid unchanged",
        "flipHorizontal" => "mirror the grid left to right",
        "flipVertical" => "mirror the grid top to bottom",
        "rotate90" => "rotate the grid 90 degrees clockwise",
        "rotate180" => "rotate the grid 180 degrees",
        "rotate270" => "rotate the grid 90 degrees counter-clockwise",
        "transpose" => "reflect the grid across its main diagonal",
        "antiTranspose" => "reflect the grid across its anti-diagonal",
        "scaleUp2" | "scaleUp3" => "scale every cell up into a solid block",
        "scaleDown2" | "scaleDown3" => "shrink uniform blocks down to single cells",
        "tileHorizontal" => "repeat the grid side by side",
        "tileVertical" => "stack the grid on top of itself",
        "tile2x2" | "tile3x3" => "tile the grid into a larger square",
        "mirrorExtendHorizontal" => "append a mirrored copy to the right",
        "mirrorExtendVertical" => "append a mirrored copy below",
        "mirrorQuad" => "build a four-way mirrored quad",
        "dilate" => "grow every object by one cell",
        "erode" => "shrink every object by one cell",
        "outline" => "keep only object outlines",
        "skeletonize" => "thin objects down to their skeleton",
        "keepLargestObject" => "keep only the largest object",
        "keepSmallestObject" => "keep only the smallest object",
        "cropToContent" => "crop to the bounding box of all content",
        "cropToLargestObject" => "crop to the largest object",
        "fillDiagonal" => "draw the main diagonal of the dominant color",
        "fillAntiDiagonal" => "draw the anti-diagonal of the dominant color",
        "centerContent" => "move the content to the center",
        "borderFill" => "paint the outer border",
        "fillBoundingBox" => "fill each object's bounding box",
        "majorityFill" => "fill the grid with its majority color",
        "minorityFill" => "fill the background with the rarest color",
        "histogramBars" => "draw a bar per color sized by its count",
        "countObjectsToRow" => "write one cell per object in a single row",
        "replicateByColorCount" => "repeat the grid once per distinct color",
        "replicateByObjectCount" => "repeat the grid once per object",
        "scaleByColorCount" => "scale the grid by its number of colors",
        "recolorBySize" => "recolor objects by their size rank",
        "sortRowsByCount" => "sort rows by how many colored cells they hold",
        "sortColumnsByCount" => "sort columns by how many colored cells they hold",
        "swapBackgroundForeground" => "swap the background with the main color",
        "paletteRotateForward" => "shift every color one step up the palette",
        "paletteRotateBackward" => "shift every color one step down the palette",
        "normalizePalette" => "renumber colors in order of first appearance",
        "colorByRowIndex" => "color cells by their row",
        "colorByColumnIndex" => "color cells by their column",
        "keepDominantColor" => "keep only the dominant color",
        "pruneRarestColor" => "remove the rarest color",
        "removeIsolatedCells" => "remove isolated single cells",
        "learnedColorMap" => "apply the color table learned from the examples",
        "symmetrizeHorizontal" => "complete the left-right mirror symmetry",
        "symmetrizeVertical" => "complete the top-bottom mirror symmetry",
        "symmetrizeBoth" => "complete symmetry along both axes",
        "mirrorDiffHorizontal" => "mark cells that break left-right symmetry",
        "mirrorDiffVertical" => "mark cells that break top-bottom symmetry",
        "removeBorder" => "strip the outer border",
        "extractFrame" => "keep only the outer frame",
        "reconstructBorder" => "repair the outer border",
        "fillEnclosed" => "fill regions enclosed by a boundary",
        "propagateInward" => "propagate the border color inward",
        "propagateOutward" => "propagate content outward to the border",
        "inferredPadding" => "add the padding learned from the examples",
        "crossLines" => "extend each colored cell into a full row and column",
        "rowLines" => "extend each colored cell across its row",
        "columnLines" => "extend each colored cell down its column",
        "majorityVoteRows" => "replace each row with its majority color",
        "majorityVoteColumns" => "replace each column with its majority color",
        "neighbourhoodVote" => "replace each cell with its neighbourhood majority",
        "analogy" => "write the patch implied by the A:B::C:? analogy",
        "causalRule" => "apply the cause-and-effect rule induced from the diffs",
        "cellularRule" => "apply the learned neighbour rule to every cell",
        "roleByRank" => "recolor objects by their size rank as learned",
        _ => return None,
    })
}

fn parameterized(name: &str) -> Option<String> {
    if let Some(inner) = name
        .strip_prefix("fragment[")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        let described = known_operation(inner)
            .map(str::to_string)
            .or_else(|| parameterized(inner))
            .unwrap_or_else(|| format!("apply the {inner} transform"));
        return Some(format!("for each object separately, {described}"));
    }
    if let Some(rest) = name.strip_prefix("multiMap") {
        let (a, b) = rest.split_once('_')?;
        let (x, y) = parse_pair(a)?;
        let _ = parse_pair(b)?;
        return Some(format!("swap colors {x} and {y}"));
    }
    if let Some((x, y)) = name.strip_prefix("recolor").and_then(parse_pair) {
        return Some(format!("recolor {x} to {y}"));
    }
    if let Some(c) = name.strip_prefix("pad1With").and_then(parse_color) {
        return Some(format!("pad the grid with a one-cell border of {c}"));
    }
    if let Some(c) = name.strip_prefix("frameWith").and_then(parse_color) {
        return Some(format!("paint the outer frame with {c}"));
    }
    if let Some(c) = name.strip_prefix("fillEnclosedWith").and_then(parse_color) {
        return Some(format!("fill enclosed regions with {c}"));
    }
    for (prefix, verb) in [
        ("gravity", "let every colored cell fall"),
        ("shift", "shift the whole grid one cell"),
        ("align", "push all content against the edge"),
    ] {
        if let Some(dir) = name.strip_prefix(prefix).and_then(parse_direction) {
            return Some(format!("{verb} {}", dir.suffix().to_lowercase()));
        }
    }
    if let Some(idx) = name.find("Halves") {
        let op = &name[..idx];
        let rest = &name[idx + "Halves".len()..];
        let (axis, mark) = match rest.split_once("Mark") {
            Some((axis, mark)) => (axis, Some(mark)),
            None => (rest, None),
        };
        let axis = match axis {
            "LeftRight" => "left and right halves",
            "TopBottom" => "top and bottom halves",
            _ => return None,
        };
        let mut text = format!("combine the {axis} with {}", op.to_uppercase());
        if let Some(mark) = mark {
            text.push_str(&format!(", marking with {mark}"));
        }
        return Some(text);
    }
    None
}

fn parse_color(s: &str) -> Option<Cell> {
    s.parse().ok()
}

/// `"1to2"` → `(1, 2)`.
fn parse_pair(s: &str) -> Option<(Cell, Cell)> {
    let (a, b) = s.split_once("to")?;
    Some((parse_color(a)?, parse_color(b)?))
}

fn parse_direction(s: &str) -> Option<Direction> {
    Direction::ALL.into_iter().find(|d| d.suffix() == s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid;
    use crate::ontology::Ontology;

    #[test]
    fn describes_known_and_parameterized_operations() {
        let engine = ExplainabilityEngine::new();
        assert_eq!(engine.describe("structural:flipHorizontal"), "mirror the grid left to right");
        assert_eq!(engine.describe("color:recolor1to2"), "recolor 1 to 2");
        assert_eq!(engine.describe("color:multiMap1to2_2to1"), "swap colors 1 and 2");
        assert_eq!(engine.describe("spatial:gravityDown"), "let every colored cell fall down");
        assert_eq!(
            engine.describe("difference:xorHalvesLeftRightMark3"),
            "combine the left and right halves with XOR, marking with 3"
        );
        assert_eq!(
            engine.describe("structural:fragment[flipVertical]"),
            "for each object separately, mirror the grid top to bottom"
        );
        assert_eq!(engine.describe("mystery"), "apply the mystery transform");
    }

    #[test]
    fn chain_explanation_lists_each_step() {
        let ontology = Ontology::standard();
        let chain = ontology
            .resolve("structural:flipHorizontal -> color:recolor1to2")
            .unwrap();
        let train = vec![
            TrainPair::new(grid(&[&[1, 0]]), grid(&[&[0, 2]])),
            TrainPair::new(grid(&[&[1, 1, 0]]), grid(&[&[0, 2, 2]])),
        ];
        let explanation = ExplainabilityEngine::new().explain(&chain, &train);
        assert_eq!(explanation.steps.len(), 2);
        assert_eq!(explanation.steps[1].operation, "color:recolor1to2");
        assert!(explanation.summary.starts_with("2-step chain"));
        // Identical patterns from both pairs are reported once.
        assert_eq!(
            explanation.patterns,
            vec![
                DetectedPattern::ColorsAdded { colors: vec![2] },
                DetectedPattern::ColorsRemoved { colors: vec![1] },
            ]
        );
        assert!((explanation.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn confidence_grows_with_pairs() {
        let flip = Ontology::standard().get("structural:flipHorizontal").cloned().unwrap();
        let pair = TrainPair::new(grid(&[&[1, 0]]), grid(&[&[0, 1]]));
        let one = ExplainabilityEngine::new().explain(&flip, std::slice::from_ref(&pair));
        let three = ExplainabilityEngine::new().explain(&flip, &[pair.clone(), pair.clone(), pair]);
        assert!(three.confidence > one.confidence);
        assert!(one.patterns.is_empty());
    }

    #[test]
    fn heatmap_classifies_cells() {
        let before = grid(&[&[0, 1, 2], &[3, 0, 0]]);
        let after = grid(&[&[5, 0, 2]]);
        let map = ExplainabilityEngine::new().diff_heatmap(&before, &after);
        assert_eq!(map.rows, 2);
        assert_eq!(
            map.cells[0],
            vec![CellChange::Added, CellChange::Removed, CellChange::Unchanged]
        );
        assert_eq!(map.count(CellChange::SizeChange), 3);
        assert_eq!(map.changed(), 5);
        assert_eq!(map.to_string(), "+-.\n###\n");
    }

    #[test]
    fn size_change_is_detected() {
        let train = vec![TrainPair::new(grid(&[&[1, 1], &[1, 1]]), grid(&[&[1]]))];
        let flip = Ontology::standard().get("structural:identity").cloned().unwrap();
        let explanation = ExplainabilityEngine::new().explain(&flip, &train);
        assert_eq!(
            explanation.patterns,
            vec![DetectedPattern::SizeChange { from: (2, 2), to: (1, 1) }]
        );
    }
}
