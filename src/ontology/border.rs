//! Border hierarchy: padding, frames, enclosure fill and flood propagation
//! inward from the edge or outward from content.

use std::collections::{BTreeMap, VecDeque};

use crate::grid::{BACKGROUND, Cell, Grid, most_frequent};
use crate::task::TrainPair;

use super::color::MAX_COLOR;
use super::{
    GridTransform, Hierarchy, Registry, TransformResult, check_output_dims, cost, not_applicable,
    same_shapes,
};

const H: Hierarchy = Hierarchy::Border;

pub(super) fn register(reg: &mut Registry) {
    for color in 0..=MAX_COLOR {
        reg.add(H, format!("pad1With{color}"), cost(2, 1, 2, 1, 1, 2), move |g| {
            pad(g, 1, color)
        });
    }
    for color in 1..=MAX_COLOR {
        reg.add(H, format!("frameWith{color}"), cost(1, 1, 2, 1, 1, 2), move |g| {
            Ok(frame(g, color))
        });
    }
    reg.add(H, "removeBorder", cost(2, 1, 1, 1, 1, 1), remove_border);
    reg.add(H, "extractFrame", cost(1, 1, 2, 1, 2, 1), |g| {
        Ok(Grid::from_fn(g.rows(), g.cols(), |r, c| {
            if g.is_border(r, c) { g.get(r, c) } else { BACKGROUND }
        }))
    });
    reg.add(H, "reconstructBorder", cost(1, 1, 2, 1, 2, 2), |g| Ok(reconstruct_border(g)));
    reg.add(H, "fillEnclosed", cost(2, 1, 1, 2, 2, 1), |g| Ok(fill_enclosed(g, None)));
    reg.add(H, "propagateInward", cost(2, 2, 1, 1, 2, 1), |g| {
        let seeds: Vec<(usize, usize)> = g
            .border_cells()
            .into_iter()
            .filter(|&(r, c)| g.get(r, c) != BACKGROUND)
            .collect();
        Ok(flood_from(g, &seeds))
    });
    reg.add(H, "propagateOutward", cost(2, 2, 1, 1, 2, 1), |g| {
        let seeds: Vec<(usize, usize)> = g
            .iter()
            .filter(|&(_, _, v)| v != BACKGROUND)
            .map(|(r, c, _)| (r, c))
            .collect();
        Ok(flood_from(g, &seeds))
    });
}

pub(crate) fn pad(g: &Grid, width: usize, color: Cell) -> TransformResult<Grid> {
    let (rows, cols) = (g.rows() + 2 * width, g.cols() + 2 * width);
    check_output_dims(rows, cols)?;
    Ok(Grid::from_fn(rows, cols, |r, c| {
        let inside = (width..width + g.rows()).contains(&r) && (width..width + g.cols()).contains(&c);
        if inside { g.get(r - width, c - width) } else { color }
    }))
}

fn frame(g: &Grid, color: Cell) -> Grid {
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        if g.is_border(r, c) { color } else { g.get(r, c) }
    })
}

fn remove_border(g: &Grid) -> TransformResult<Grid> {
    if g.rows() < 3 || g.cols() < 3 {
        return Err(not_applicable("removeBorder", "grid smaller than 3x3"));
    }
    Ok(Grid::from_fn(g.rows() - 2, g.cols() - 2, |r, c| g.get(r + 1, c + 1)))
}

/// Patch background gaps in the outer ring with the ring's dominant color.
fn reconstruct_border(g: &Grid) -> Grid {
    let ring = g.border_cells();
    let mut hist = BTreeMap::new();
    for &(r, c) in &ring {
        let v = g.get(r, c);
        if v != BACKGROUND {
            *hist.entry(v).or_insert(0usize) += 1;
        }
    }
    let Some(color) = most_frequent(hist) else {
        return g.clone();
    };
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        let v = g.get(r, c);
        if v == BACKGROUND && g.is_border(r, c) { color } else { v }
    })
}

/// Background cells that cannot reach the edge through background.
pub(crate) fn enclosed_mask(g: &Grid) -> Vec<bool> {
    let (rows, cols) = g.dims();
    let mut reachable = vec![false; rows * cols];
    let mut queue = VecDeque::new();
    for (r, c) in g.border_cells() {
        if g.get(r, c) == BACKGROUND && !reachable[r * cols + c] {
            reachable[r * cols + c] = true;
            queue.push_back((r, c));
        }
    }
    while let Some((r, c)) = queue.pop_front() {
        for (nr, nc) in step4(r, c, rows, cols) {
            let idx = nr * cols + nc;
            if !reachable[idx] && g.get(nr, nc) == BACKGROUND {
                reachable[idx] = true;
                queue.push_back((nr, nc));
            }
        }
    }
    g.cells()
        .iter()
        .zip(reachable)
        .map(|(&v, reach)| v == BACKGROUND && !reach)
        .collect()
}

/// In-bounds 4-neighbour coordinates in up, down, left, right order.
pub(crate) fn step4(r: usize, c: usize, rows: usize, cols: usize) -> impl Iterator<Item = (usize, usize)> {
    [(-1isize, 0isize), (1, 0), (0, -1), (0, 1)]
        .into_iter()
        .filter_map(move |(dr, dc)| {
            let (nr, nc) = (r as isize + dr, c as isize + dc);
            (nr >= 0 && nc >= 0 && (nr as usize) < rows && (nc as usize) < cols)
                .then_some((nr as usize, nc as usize))
        })
}

/// Fill enclosed background with `color`, or with the dominant color
/// bordering each enclosed cell's region.
pub(crate) fn fill_enclosed(g: &Grid, color: Option<Cell>) -> Grid {
    let (rows, cols) = g.dims();
    let enclosed = enclosed_mask(g);
    let mut out: Vec<Cell> = g.cells().to_vec();
    let mut seen = vec![false; rows * cols];
    for start in 0..rows * cols {
        if !enclosed[start] || seen[start] {
            continue;
        }
        // Collect one enclosed region and the colors around it.
        let mut region = Vec::new();
        let mut hist = BTreeMap::new();
        let mut queue = VecDeque::from([(start / cols, start % cols)]);
        seen[start] = true;
        while let Some((r, c)) = queue.pop_front() {
            region.push(r * cols + c);
            for (nr, nc) in step4(r, c, rows, cols) {
                let idx = nr * cols + nc;
                if enclosed[idx] {
                    if !seen[idx] {
                        seen[idx] = true;
                        queue.push_back((nr, nc));
                    }
                } else if g.get(nr, nc) != BACKGROUND {
                    *hist.entry(g.get(nr, nc)).or_insert(0usize) += 1;
                }
            }
        }
        let fill = color.or_else(|| most_frequent(hist)).unwrap_or(BACKGROUND);
        for idx in region {
            out[idx] = fill;
        }
    }
    Grid::from_fn(rows, cols, |r, c| out[r * cols + c])
}

/// Multi-source breadth-first flood through background from `seeds`; each
/// reached cell takes the color of the seed that got there first.
fn flood_from(g: &Grid, seeds: &[(usize, usize)]) -> Grid {
    let (rows, cols) = g.dims();
    let mut out: Vec<Cell> = g.cells().to_vec();
    let mut done: Vec<bool> = g.cells().iter().map(|&v| v != BACKGROUND).collect();
    let mut queue: VecDeque<(usize, usize)> = seeds.iter().copied().collect();
    while let Some((r, c)) = queue.pop_front() {
        let color = out[r * cols + c];
        for (nr, nc) in step4(r, c, rows, cols) {
            let idx = nr * cols + nc;
            if !done[idx] {
                done[idx] = true;
                out[idx] = color;
                queue.push_back((nr, nc));
            }
        }
    }
    Grid::from_fn(rows, cols, |r, c| out[r * cols + c])
}

// ---------------------------------------------------------------------------
// Learned border models
// ---------------------------------------------------------------------------

/// Padding of constant width and color inferred from training pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingModel {
    pub width: usize,
    pub color: Cell,
}

impl PaddingModel {
    pub fn fit(train: &[TrainPair]) -> Option<Self> {
        let mut model: Option<Self> = None;
        for pair in train {
            let (ir, ic) = pair.input.dims();
            let (or, oc) = pair.output.dims();
            if or <= ir || or - ir != oc.checked_sub(ic)? || (or - ir) % 2 != 0 {
                return None;
            }
            let width = (or - ir) / 2;
            let color = pair.output.get(0, 0);
            let candidate = Self { width, color };
            if pad(&pair.input, width, color).ok()? != pair.output {
                return None;
            }
            match model {
                Some(m) if m != candidate => return None,
                _ => model = Some(candidate),
            }
        }
        model
    }
}

impl GridTransform for PaddingModel {
    fn apply(&self, grid: &Grid) -> TransformResult<Grid> {
        pad(grid, self.width, self.color)
    }
}

/// The single color enclosed background turns into, when training pairs
/// agree on one.
fn learn_enclosure_color(train: &[TrainPair]) -> Option<Cell> {
    if !same_shapes(train) {
        return None;
    }
    let mut color = None;
    for pair in train {
        for (_, _, from, to) in pair.input.diff(&pair.output)? {
            if from != BACKGROUND {
                return None;
            }
            match color {
                Some(k) if k != to => return None,
                _ => color = Some(to),
            }
        }
    }
    color
}

pub(super) fn learn(train: &[TrainPair], reg: &mut Registry) {
    if let Some(model) = PaddingModel::fit(train) {
        reg.add_learned(H, "inferredPadding", cost(2, 1, 2, 1, 2, 1), model);
    }
    if let Some(color) = learn_enclosure_color(train) {
        reg.add_learned(
            H,
            format!("fillEnclosedWith{color}"),
            cost(2, 1, 1, 2, 2, 2),
            move |g: &Grid| Ok(fill_enclosed(g, Some(color))),
        );
    }
}
