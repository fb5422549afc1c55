//! Difference hierarchy: XOR/AND/overlay of two grids, mirror-vs-diff
//! classification and object deltas.
//!
//! The binary operations are exposed as [`PairTransform`]s. Inside the search
//! they run on the two halves of a single input, split at a uniform separator
//! line when one sits in the middle, otherwise at the midpoint.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::grid::{BACKGROUND, Cell, Grid, GridObject};
use crate::task::TrainPair;

use super::{
    Hierarchy, PairTransform, Registry, TransformError, TransformResult, cost, not_applicable,
};

const H: Hierarchy = Hierarchy::Difference;

/// Cell-wise boolean combination of two grids' foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffOp {
    /// Exactly one side colored.
    Xor,
    /// Both sides colored.
    And,
    /// Either side colored; the first grid wins on overlap.
    Overlay,
    /// Neither side colored.
    Nor,
}

impl DiffOp {
    pub const ALL: [DiffOp; 4] = [Self::Xor, Self::And, Self::Overlay, Self::Nor];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xor => "xor",
            Self::And => "and",
            Self::Overlay => "overlay",
            Self::Nor => "nor",
        }
    }
}

/// How a single grid is cut into the two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitAxis {
    /// Left half vs right half.
    LeftRight,
    /// Top half vs bottom half.
    TopBottom,
}

impl SplitAxis {
    pub const ALL: [SplitAxis; 2] = [Self::LeftRight, Self::TopBottom];

    fn suffix(self) -> &'static str {
        match self {
            Self::LeftRight => "LeftRight",
            Self::TopBottom => "TopBottom",
        }
    }
}

/// Combine `a` and `b` with `op`. Result cells take `mark` when given,
/// otherwise the contributing cell's own color.
pub fn combine(a: &Grid, b: &Grid, op: DiffOp, mark: Option<Cell>) -> TransformResult<Grid> {
    if a.dims() != b.dims() {
        return Err(TransformError::ShapeMismatch {
            left_rows: a.rows(),
            left_cols: a.cols(),
            right_rows: b.rows(),
            right_cols: b.cols(),
        });
    }
    let nor_mark = mark.unwrap_or_else(|| {
        a.majority_foreground()
            .or_else(|| b.majority_foreground())
            .unwrap_or(1)
    });
    Ok(Grid::from_fn(a.rows(), a.cols(), |r, c| {
        let (x, y) = (a.get(r, c), b.get(r, c));
        let (xa, ya) = (x != BACKGROUND, y != BACKGROUND);
        let hit = match op {
            DiffOp::Xor if xa != ya => Some(if xa { x } else { y }),
            DiffOp::And if xa && ya => Some(x),
            DiffOp::Overlay if xa => Some(x),
            DiffOp::Overlay if ya => Some(y),
            DiffOp::Nor if !xa && !ya => Some(nor_mark),
            _ => None,
        };
        match (hit, op) {
            (Some(_), DiffOp::Nor) => nor_mark,
            (Some(v), _) => mark.unwrap_or(v),
            (None, _) => BACKGROUND,
        }
    }))
}

/// A [`PairTransform`] for `op`.
pub fn pair_transform(op: DiffOp, mark: Option<Cell>) -> impl PairTransform {
    move |a: &Grid, b: &Grid| combine(a, b, op, mark)
}

/// Cut `g` into two equal halves along `axis`, dropping a uniform separator
/// line in the middle when the length is odd.
pub fn split_halves(g: &Grid, axis: SplitAxis) -> TransformResult<(Grid, Grid)> {
    let work = match axis {
        SplitAxis::LeftRight => g.clone(),
        SplitAxis::TopBottom => g.transpose(),
    };
    let cols = work.cols();
    let half = cols / 2;
    if half == 0 {
        return Err(not_applicable("splitHalves", "grid too narrow to split"));
    }
    let right_start = if cols % 2 == 0 {
        half
    } else {
        let sep = work.column(half);
        let uniform = sep.iter().all(|&v| v == sep[0]) && sep[0] != BACKGROUND;
        if !uniform {
            return Err(not_applicable(
                "splitHalves",
                "odd length without a uniform separator line",
            ));
        }
        half + 1
    };
    let left = Grid::from_fn(work.rows(), half, |r, c| work.get(r, c));
    let right = Grid::from_fn(work.rows(), half, |r, c| work.get(r, right_start + c));
    Ok(match axis {
        SplitAxis::LeftRight => (left, right),
        SplitAxis::TopBottom => (left.transpose(), right.transpose()),
    })
}

fn halves_name(op: DiffOp, axis: SplitAxis) -> String {
    format!("{}Halves{}", op.as_str(), axis.suffix())
}

pub(super) fn register(reg: &mut Registry) {
    for axis in SplitAxis::ALL {
        for op in DiffOp::ALL {
            reg.add(H, halves_name(op, axis), cost(2, 1, 2, 2, 2, 1), move |g| {
                let (a, b) = split_halves(g, axis)?;
                combine(&a, &b, op, None)
            });
        }
    }
    reg.add(H, "symmetrizeHorizontal", cost(1, 1, 3, 1, 2, 1), |g| Ok(symmetrize(g, true, false)));
    reg.add(H, "symmetrizeVertical", cost(1, 1, 3, 1, 2, 1), |g| Ok(symmetrize(g, false, true)));
    reg.add(H, "symmetrizeBoth", cost(1, 1, 4, 1, 2, 1), |g| Ok(symmetrize(g, true, true)));
    reg.add(H, "mirrorDiffHorizontal", cost(1, 1, 3, 2, 2, 1), |g| {
        Ok(mirror_diff(g, &g.flip_horizontal()))
    });
    reg.add(H, "mirrorDiffVertical", cost(1, 1, 3, 2, 2, 1), |g| {
        Ok(mirror_diff(g, &g.flip_vertical()))
    });
}

/// Register mark-color variants when every training output is drawn in a
/// single foreground color.
pub(super) fn learn(train: &[TrainPair], reg: &mut Registry) {
    let palettes: Vec<BTreeSet<Cell>> = train.iter().map(|p| p.output.foreground_colors()).collect();
    let Some(first) = palettes.first() else {
        return;
    };
    if first.len() != 1 || palettes.iter().any(|p| p != first) {
        return;
    }
    let Some(&mark) = first.iter().next() else {
        return;
    };
    for axis in SplitAxis::ALL {
        for op in DiffOp::ALL {
            let name = format!("{}Mark{mark}", halves_name(op, axis));
            reg.add_learned(H, name, cost(2, 1, 2, 2, 2, 2), move |g: &Grid| {
                let (a, b) = split_halves(g, axis)?;
                combine(&a, &b, op, Some(mark))
            });
        }
    }
}

/// Fill background cells from their mirror images.
pub(crate) fn symmetrize(g: &Grid, horizontal: bool, vertical: bool) -> Grid {
    let mut out = g.clone();
    if horizontal {
        let m = out.flip_horizontal();
        out = fill_from(&out, &m);
    }
    if vertical {
        let m = out.flip_vertical();
        out = fill_from(&out, &m);
    }
    out
}

fn fill_from(base: &Grid, source: &Grid) -> Grid {
    Grid::from_fn(base.rows(), base.cols(), |r, c| {
        let v = base.get(r, c);
        if v == BACKGROUND { source.get(r, c) } else { v }
    })
}

/// Keep only cells that disagree with their mirror.
fn mirror_diff(g: &Grid, mirrored: &Grid) -> Grid {
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        let v = g.get(r, c);
        if v != mirrored.get(r, c) { v } else { BACKGROUND }
    })
}

// ---------------------------------------------------------------------------
// Relation classification
// ---------------------------------------------------------------------------

/// How an output relates to its input geometrically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorRelation {
    Identical,
    MirrorHorizontal,
    MirrorVertical,
    Rotate180,
    Transpose,
    /// Not a rigid symmetry; carries the number of differing cells when
    /// shapes match.
    Diff { cells: Option<usize> },
}

/// Classify `after` as a mirror image of `before`, or as a plain diff.
pub fn classify_mirror(before: &Grid, after: &Grid) -> MirrorRelation {
    if before == after {
        MirrorRelation::Identical
    } else if before.flip_horizontal() == *after {
        MirrorRelation::MirrorHorizontal
    } else if before.flip_vertical() == *after {
        MirrorRelation::MirrorVertical
    } else if before.rotate180() == *after {
        MirrorRelation::Rotate180
    } else if before.transpose() == *after {
        MirrorRelation::Transpose
    } else {
        MirrorRelation::Diff {
            cells: before.diff(after).map(|d| d.len()),
        }
    }
}

/// Objects appearing, disappearing and persisting between two grids.
/// Objects are matched by identical color and cell set.
#[derive(Debug, Clone, Default)]
pub struct ObjectDelta {
    pub added: Vec<GridObject>,
    pub removed: Vec<GridObject>,
    pub kept: Vec<GridObject>,
}

pub fn delta_objects(before: &Grid, after: &Grid) -> ObjectDelta {
    let old = before.objects();
    let new = after.objects();
    let same = |a: &GridObject, b: &GridObject| a.color == b.color && a.cells == b.cells;
    let mut delta = ObjectDelta::default();
    for o in &old {
        if new.iter().any(|n| same(o, n)) {
            delta.kept.push(o.clone());
        } else {
            delta.removed.push(o.clone());
        }
    }
    for n in new {
        if !old.iter().any(|o| same(o, &n)) {
            delta.added.push(n);
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid;

    #[test]
    fn xor_and_overlay() {
        let a = grid(&[&[1, 1, 0, 0]]);
        let b = grid(&[&[2, 0, 2, 0]]);
        assert_eq!(combine(&a, &b, DiffOp::Xor, None).unwrap().to_rows(), vec![vec![0, 1, 2, 0]]);
        assert_eq!(combine(&a, &b, DiffOp::And, Some(5)).unwrap().to_rows(), vec![vec![5, 0, 0, 0]]);
        assert_eq!(combine(&a, &b, DiffOp::Overlay, None).unwrap().to_rows(), vec![vec![1, 1, 2, 0]]);
        assert_eq!(combine(&a, &b, DiffOp::Nor, Some(3)).unwrap().to_rows(), vec![vec![0, 0, 0, 3]]);
        assert!(combine(&a, &grid(&[&[1]]), DiffOp::Xor, None).is_err());
    }

    #[test]
    fn pair_transform_matches_combine() {
        let t = pair_transform(DiffOp::Xor, None);
        let a = grid(&[&[1, 0]]);
        let b = grid(&[&[1, 1]]);
        assert_eq!(t.combine(&a, &b).unwrap(), combine(&a, &b, DiffOp::Xor, None).unwrap());
    }

    #[test]
    fn split_uses_separator() {
        let g = grid(&[&[1, 0, 5, 0, 1], &[0, 1, 5, 1, 0]]);
        let (l, r) = split_halves(&g, SplitAxis::LeftRight).unwrap();
        assert_eq!(l.to_rows(), vec![vec![1, 0], vec![0, 1]]);
        assert_eq!(r.to_rows(), vec![vec![0, 1], vec![1, 0]]);
        let bad = grid(&[&[1, 0, 0, 0, 1]]);
        assert!(split_halves(&bad, SplitAxis::LeftRight).is_err());
        let (t, b) = split_halves(&grid(&[&[1], &[2]]), SplitAxis::TopBottom).unwrap();
        assert_eq!((t.get(0, 0), b.get(0, 0)), (1, 2));
    }

    #[test]
    fn symmetrize_completes_mirror() {
        let g = grid(&[&[3, 0, 0], &[0, 0, 0]]);
        assert_eq!(symmetrize(&g, true, false).to_rows(), vec![vec![3, 0, 3], vec![0, 0, 0]]);
        let both = symmetrize(&g, true, true);
        assert_eq!(both.foreground_count(), 4);
    }

    #[test]
    fn classifies_relations() {
        let g = grid(&[&[1, 0, 0], &[0, 0, 0], &[0, 0, 0]]);
        assert_eq!(classify_mirror(&g, &g.flip_horizontal()), MirrorRelation::MirrorHorizontal);
        assert_eq!(classify_mirror(&g, &g), MirrorRelation::Identical);
        let moved = g.with_cell(0, 0, 0).with_cell(1, 1, 1);
        assert_eq!(classify_mirror(&g, &moved), MirrorRelation::Diff { cells: Some(2) });
    }

    #[test]
    fn object_delta() {
        let before = grid(&[&[1, 0, 2]]);
        let after = grid(&[&[1, 0, 0], &[0, 0, 0]]);
        let d = delta_objects(&before, &after);
        assert_eq!(d.kept.len(), 1);
        assert_eq!(d.removed.len(), 1);
        assert!(d.added.is_empty());
    }
}
