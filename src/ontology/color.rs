//! Color hierarchy: fixed and multi-way recolor maps, palette rotation,
//! positional recoloring, frequency pruning, and lookup tables learned from
//! training pairs.

use std::collections::BTreeMap;

use crate::grid::{BACKGROUND, Cell, Grid};
use crate::task::TrainPair;

use super::counting::minority_foreground;
use super::structural::neighbors4;
use super::{GridTransform, Hierarchy, Registry, TransformResult, cost, same_shapes};

const H: Hierarchy = Hierarchy::Color;

/// Highest color value the fixed recolor families cover.
pub const MAX_COLOR: Cell = 9;

pub(super) fn register(reg: &mut Registry) {
    for from in 0..=MAX_COLOR {
        for to in 0..=MAX_COLOR {
            if from != to {
                reg.add(H, recolor_name(from, to), cost(1, 1, 1, 1, 1, 2), move |g| {
                    Ok(g.map_cells(|v| if v == from { to } else { v }))
                });
            }
        }
    }
    for a in 1..=MAX_COLOR {
        for b in a + 1..=MAX_COLOR {
            reg.add(H, swap_name(a, b), cost(1, 1, 1, 1, 2, 2), move |g| {
                Ok(g.map_cells(|v| match v {
                    v if v == a => b,
                    v if v == b => a,
                    v => v,
                }))
            });
        }
    }

    reg.add(H, "swapBackgroundForeground", cost(1, 1, 1, 1, 2, 2), |g| {
        let Some(fg) = g.majority_foreground() else {
            return Ok(g.clone());
        };
        Ok(g.map_cells(|v| match v {
            BACKGROUND => fg,
            v if v == fg => BACKGROUND,
            v => v,
        }))
    });
    reg.add(H, "paletteRotateForward", cost(1, 1, 2, 1, 2, 2), |g| {
        Ok(g.map_cells(|v| if v == BACKGROUND || v > MAX_COLOR { v } else { v % MAX_COLOR + 1 }))
    });
    reg.add(H, "paletteRotateBackward", cost(1, 1, 2, 1, 2, 2), |g| {
        Ok(g.map_cells(|v| match v {
            BACKGROUND => v,
            1 => MAX_COLOR,
            v if v > MAX_COLOR => v,
            v => v - 1,
        }))
    });
    reg.add(H, "normalizePalette", cost(1, 1, 1, 2, 2, 2), |g| Ok(normalize_palette(g)));
    reg.add(H, "colorByRowIndex", cost(2, 1, 1, 1, 2, 2), |g| {
        Ok(positional(g, |r, _| r))
    });
    reg.add(H, "colorByColumnIndex", cost(2, 1, 1, 1, 2, 2), |g| {
        Ok(positional(g, |_, c| c))
    });
    reg.add(H, "keepDominantColor", cost(1, 1, 1, 2, 2, 1), |g| {
        let keep = g.majority_foreground();
        Ok(g.map_cells(|v| if Some(v) == keep { v } else { BACKGROUND }))
    });
    reg.add(H, "pruneRarestColor", cost(1, 1, 1, 2, 2, 1), |g| {
        let drop = minority_foreground(g);
        Ok(g.map_cells(|v| if Some(v) == drop { BACKGROUND } else { v }))
    });
    reg.add(H, "removeIsolatedCells", cost(1, 1, 1, 2, 1, 2), |g| Ok(remove_isolated(g)));
}

pub fn recolor_name(from: Cell, to: Cell) -> String {
    format!("recolor{from}to{to}")
}

/// Name of the two-way swap; order of the arguments does not matter.
pub fn swap_name(a: Cell, b: Cell) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("multiMap{lo}to{hi}_{hi}to{lo}")
}

/// Foreground colors relabelled 1, 2, 3, ... in ascending order.
fn normalize_palette(g: &Grid) -> Grid {
    let map: BTreeMap<Cell, Cell> = g
        .foreground_colors()
        .into_iter()
        .enumerate()
        .map(|(i, v)| (v, (i + 1).min(MAX_COLOR as usize) as Cell))
        .collect();
    g.map_cells(|v| map.get(&v).copied().unwrap_or(v))
}

/// Foreground cells take a color derived from their position.
fn positional(g: &Grid, index: impl Fn(usize, usize) -> usize) -> Grid {
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        let v = g.get(r, c);
        if v == BACKGROUND {
            v
        } else {
            (index(r, c) % MAX_COLOR as usize + 1) as Cell
        }
    })
}

/// Clear foreground cells with no same-colored 4-neighbour.
pub(crate) fn remove_isolated(g: &Grid) -> Grid {
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        let v = g.get(r, c);
        if v == BACKGROUND {
            return v;
        }
        let supported = neighbors4(g, r, c).iter().any(|n| *n == Some(v));
        if supported { v } else { BACKGROUND }
    })
}

// ---------------------------------------------------------------------------
// Learned lookup table
// ---------------------------------------------------------------------------

/// Per-cell color lookup table fitted on same-shape training pairs. Colors
/// never seen in training map to themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorLut {
    map: BTreeMap<Cell, Cell>,
}

impl ColorLut {
    /// Fit a table consistent with every pair, or `None` if shapes change,
    /// some color maps to two different colors, or the table is the identity.
    pub fn fit(train: &[TrainPair]) -> Option<Self> {
        if !same_shapes(train) {
            return None;
        }
        let mut map = BTreeMap::new();
        for pair in train {
            for (&a, &b) in pair.input.cells().iter().zip(pair.output.cells()) {
                match map.insert(a, b) {
                    Some(prev) if prev != b => return None,
                    _ => {}
                }
            }
        }
        map.retain(|k, v| k != v);
        (!map.is_empty()).then_some(Self { map })
    }

    pub fn mapping(&self) -> &BTreeMap<Cell, Cell> {
        &self.map
    }
}

impl GridTransform for ColorLut {
    fn apply(&self, grid: &Grid) -> TransformResult<Grid> {
        Ok(grid.map_cells(|v| self.map.get(&v).copied().unwrap_or(v)))
    }
}

pub(super) fn learn(train: &[TrainPair], reg: &mut Registry) {
    if let Some(lut) = ColorLut::fit(train) {
        reg.add_learned(H, "learnedColorMap", cost(1, 1, 1, 1, 2, 1), lut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid;

    #[test]
    fn swap_name_is_order_independent() {
        assert_eq!(swap_name(2, 1), "multiMap1to2_2to1");
        assert_eq!(swap_name(1, 2), "multiMap1to2_2to1");
    }

    #[test]
    fn lut_fits_consistent_mapping() {
        let train = vec![
            TrainPair::new(grid(&[&[1, 2, 0]]), grid(&[&[2, 1, 0]])),
            TrainPair::new(grid(&[&[2, 2], &[1, 0]]), grid(&[&[1, 1], &[2, 0]])),
        ];
        let lut = ColorLut::fit(&train).unwrap();
        assert_eq!(lut.mapping().len(), 2);
        assert_eq!(lut.apply(&grid(&[&[1, 3]])).unwrap().to_rows(), vec![vec![2, 3]]);
    }

    #[test]
    fn lut_rejects_conflicts_and_identity() {
        let conflict = vec![TrainPair::new(grid(&[&[1, 1]]), grid(&[&[2, 3]]))];
        assert!(ColorLut::fit(&conflict).is_none());
        let identity = vec![TrainPair::new(grid(&[&[1, 2]]), grid(&[&[1, 2]]))];
        assert!(ColorLut::fit(&identity).is_none());
        let reshaped = vec![TrainPair::new(grid(&[&[1, 2]]), grid(&[&[1], &[2]]))];
        assert!(ColorLut::fit(&reshaped).is_none());
    }

    #[test]
    fn isolated_cells_removed() {
        let g = grid(&[&[1, 0, 2], &[1, 0, 0]]);
        assert_eq!(remove_isolated(&g).to_rows(), vec![vec![1, 0, 0], vec![1, 0, 0]]);
    }

    #[test]
    fn palette_helpers() {
        let g = grid(&[&[0, 5, 9], &[7, 0, 5]]);
        assert_eq!(normalize_palette(&g).to_rows(), vec![vec![0, 1, 3], vec![2, 0, 1]]);
        let row = positional(&grid(&[&[4, 0], &[4, 4]]), |r, _| r);
        assert_eq!(row.to_rows(), vec![vec![1, 0], vec![2, 2]]);
    }
}
