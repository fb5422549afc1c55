//! Counting hierarchy: transforms driven by how many cells, colors or objects
//! a grid contains.

use crate::grid::{BACKGROUND, Cell, Grid};

use super::structural::{scale_up, tile};
use super::{Hierarchy, Registry, TransformResult, check_output_dims, cost, not_applicable};

const H: Hierarchy = Hierarchy::Counting;

pub(super) fn register(reg: &mut Registry) {
    reg.add(H, "majorityFill", cost(1, 1, 1, 2, 1, 1), |g| {
        Ok(Grid::filled(g.rows(), g.cols(), g.majority_foreground().unwrap_or(BACKGROUND)))
    });
    reg.add(H, "minorityFill", cost(1, 1, 1, 2, 2, 1), |g| {
        Ok(Grid::filled(g.rows(), g.cols(), minority_foreground(g).unwrap_or(BACKGROUND)))
    });
    reg.add(H, "histogramBars", cost(2, 1, 1, 3, 2, 2), histogram_bars);
    reg.add(H, "countObjectsToRow", cost(2, 1, 1, 3, 2, 1), count_objects_to_row);
    reg.add(H, "replicateByColorCount", cost(2, 1, 1, 2, 2, 2), |g| {
        tile(g, 1, g.foreground_colors().len().max(1))
    });
    reg.add(H, "replicateByObjectCount", cost(2, 1, 1, 3, 2, 2), |g| {
        tile(g, 1, g.objects().len().max(1))
    });
    reg.add(H, "scaleByColorCount", cost(2, 1, 1, 2, 2, 3), |g| {
        scale_up(g, g.foreground_colors().len().max(1))
    });
    reg.add(H, "recolorBySize", cost(1, 1, 1, 3, 2, 1), |g| Ok(recolor_by_size(g)));
    reg.add(H, "sortRowsByCount", cost(2, 1, 1, 2, 1, 2), |g| Ok(sort_rows_by_count(g)));
    reg.add(H, "sortColumnsByCount", cost(2, 1, 1, 2, 1, 2), |g| {
        Ok(sort_rows_by_count(&g.transpose()).transpose())
    });
}

/// Least frequent foreground color; ties go to the smaller value.
pub(crate) fn minority_foreground(g: &Grid) -> Option<Cell> {
    let mut hist = g.histogram();
    hist.remove(&BACKGROUND);
    hist.into_iter()
        .fold(None, |best: Option<(Cell, usize)>, (v, n)| match best {
            Some((_, bn)) if bn <= n => best,
            _ => Some((v, n)),
        })
        .map(|(v, _)| v)
}

/// Foreground colors ordered by descending count, ties by color.
pub(crate) fn colors_by_count(g: &Grid) -> Vec<(Cell, usize)> {
    let mut hist: Vec<(Cell, usize)> = g
        .histogram()
        .into_iter()
        .filter(|&(v, _)| v != BACKGROUND)
        .collect();
    hist.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    hist
}

/// One left-aligned bar per foreground color, longest first.
fn histogram_bars(g: &Grid) -> TransformResult<Grid> {
    let bars = colors_by_count(g);
    let width = bars.first().map(|&(_, n)| n).ok_or_else(|| {
        not_applicable("histogramBars", "grid has no foreground colors")
    })?;
    check_output_dims(bars.len(), width)?;
    Ok(Grid::from_fn(bars.len(), width, |r, c| {
        let (color, n) = bars[r];
        if c < n { color } else { BACKGROUND }
    }))
}

/// A single row with one dominant-color cell per object.
fn count_objects_to_row(g: &Grid) -> TransformResult<Grid> {
    let n = g.objects().len();
    if n == 0 {
        return Err(not_applicable("countObjectsToRow", "grid has no objects"));
    }
    check_output_dims(1, n)?;
    let color = g.majority_foreground().unwrap_or(BACKGROUND);
    Ok(Grid::filled(1, n, color))
}

/// Each object takes its own size as color, capped at 9.
fn recolor_by_size(g: &Grid) -> Grid {
    let mut size_color: Vec<Option<Cell>> = vec![None; g.len()];
    for obj in g.objects() {
        let color = obj.size().min(9) as Cell;
        for &(r, c) in &obj.cells {
            size_color[r * g.cols() + c] = Some(color);
        }
    }
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        size_color[r * g.cols() + c].unwrap_or_else(|| g.get(r, c))
    })
}

/// Rows ordered by descending foreground count; stable for ties.
fn sort_rows_by_count(g: &Grid) -> Grid {
    let mut order: Vec<usize> = (0..g.rows()).collect();
    order.sort_by_key(|&r| std::cmp::Reverse(g.row(r).iter().filter(|&&v| v != BACKGROUND).count()));
    Grid::from_fn(g.rows(), g.cols(), |r, c| g.get(order[r], c))
}
