//! Spatial hierarchy: gravity, shifts, axis alignment, recentring and fills
//! that depend on where content sits.

use crate::grid::{BACKGROUND, Grid};

use super::{Hierarchy, Registry, cost};

const H: Hierarchy = Hierarchy::Spatial;

/// Movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }

    /// Row/column step.
    pub fn delta(self) -> (isize, isize) {
        match self {
            Self::Up => (-1, 0),
            Self::Down => (1, 0),
            Self::Left => (0, -1),
            Self::Right => (0, 1),
        }
    }
}

pub(super) fn register(reg: &mut Registry) {
    for dir in Direction::ALL {
        let (dr, dc) = dir.delta();
        reg.add(H, format!("shift{}", dir.suffix()), cost(1, 2, 1, 1, 1, 1), move |g| {
            Ok(translate(g, dr, dc))
        });
    }
    for dir in Direction::ALL {
        reg.add(H, format!("gravity{}", dir.suffix()), cost(1, 2, 1, 2, 1, 1), move |g| {
            Ok(gravity(g, dir))
        });
    }
    for dir in Direction::ALL {
        reg.add(H, format!("align{}", dir.suffix()), cost(2, 2, 1, 1, 1, 1), move |g| {
            Ok(align(g, dir))
        });
    }
    reg.add(H, "centerContent", cost(2, 2, 2, 1, 1, 1), |g| Ok(center_content(g)));
    reg.add(H, "borderFill", cost(1, 1, 2, 1, 1, 2), |g| Ok(border_fill(g)));
    reg.add(H, "fillBoundingBox", cost(2, 1, 1, 2, 1, 1), |g| Ok(fill_bounding_box(g)));
}

/// Move every cell by `(dr, dc)`; vacated cells become background, cells
/// leaving the grid are dropped.
pub(crate) fn translate(g: &Grid, dr: isize, dc: isize) -> Grid {
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        g.get_signed(r as isize - dr, c as isize - dc)
            .unwrap_or(BACKGROUND)
    })
}

/// Colored cells slide as far as possible in `dir`, keeping their order
/// within each row or column.
pub(crate) fn gravity(g: &Grid, dir: Direction) -> Grid {
    let (rows, cols) = g.dims();
    let mut out = vec![BACKGROUND; rows * cols];
    match dir {
        Direction::Down | Direction::Up => {
            for c in 0..cols {
                let stack: Vec<u8> = g.column(c).into_iter().filter(|&v| v != BACKGROUND).collect();
                let start = if dir == Direction::Down { rows - stack.len() } else { 0 };
                for (i, v) in stack.into_iter().enumerate() {
                    out[(start + i) * cols + c] = v;
                }
            }
        }
        Direction::Left | Direction::Right => {
            for r in 0..rows {
                let stack: Vec<u8> = g.row(r).iter().copied().filter(|&v| v != BACKGROUND).collect();
                let start = if dir == Direction::Right { cols - stack.len() } else { 0 };
                for (i, v) in stack.into_iter().enumerate() {
                    out[r * cols + start + i] = v;
                }
            }
        }
    }
    Grid::from_fn(rows, cols, |r, c| out[r * cols + c])
}

/// Translate all content so its bounding box touches the edge in `dir`.
pub(crate) fn align(g: &Grid, dir: Direction) -> Grid {
    let Some(bbox) = g.content_bbox() else {
        return g.clone();
    };
    let (dr, dc) = match dir {
        Direction::Up => (-(bbox.min_row as isize), 0),
        Direction::Down => ((g.rows() - 1 - bbox.max_row) as isize, 0),
        Direction::Left => (0, -(bbox.min_col as isize)),
        Direction::Right => (0, (g.cols() - 1 - bbox.max_col) as isize),
    };
    translate(g, dr, dc)
}

/// Translate content so its center of mass lands on the grid center.
pub(crate) fn center_content(g: &Grid) -> Grid {
    let cells: Vec<(usize, usize)> = g
        .iter()
        .filter(|&(_, _, v)| v != BACKGROUND)
        .map(|(r, c, _)| (r, c))
        .collect();
    if cells.is_empty() {
        return g.clone();
    }
    let n = cells.len() as f64;
    let com_r = cells.iter().map(|&(r, _)| r as f64).sum::<f64>() / n;
    let com_c = cells.iter().map(|&(_, c)| c as f64).sum::<f64>() / n;
    let center_r = (g.rows() as f64 - 1.0) / 2.0;
    let center_c = (g.cols() as f64 - 1.0) / 2.0;
    translate(
        g,
        (center_r - com_r).round() as isize,
        (center_c - com_c).round() as isize,
    )
}

/// Paint the outer ring with the dominant foreground color.
pub(crate) fn border_fill(g: &Grid) -> Grid {
    let Some(color) = g.majority_foreground() else {
        return g.clone();
    };
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        if g.is_border(r, c) { color } else { g.get(r, c) }
    })
}

/// Fill background inside the content bounding box with the dominant color.
pub(crate) fn fill_bounding_box(g: &Grid) -> Grid {
    let (Some(bbox), Some(color)) = (g.content_bbox(), g.majority_foreground()) else {
        return g.clone();
    };
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        let v = g.get(r, c);
        if v == BACKGROUND && bbox.contains(r, c) { color } else { v }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid;

    #[test]
    fn gravity_down_stacks_in_order() {
        let g = grid(&[&[1, 0], &[0, 2], &[3, 0]]);
        let out = gravity(&g, Direction::Down);
        assert_eq!(out.to_rows(), vec![vec![0, 0], vec![1, 0], vec![3, 2]]);
        let up = gravity(&g, Direction::Up);
        assert_eq!(up.to_rows(), vec![vec![1, 2], vec![3, 0], vec![0, 0]]);
    }

    #[test]
    fn gravity_sideways() {
        let g = grid(&[&[0, 1, 0, 2]]);
        assert_eq!(gravity(&g, Direction::Left).to_rows(), vec![vec![1, 2, 0, 0]]);
        assert_eq!(gravity(&g, Direction::Right).to_rows(), vec![vec![0, 0, 1, 2]]);
    }

    #[test]
    fn single_cell_falls_one_row() {
        let g = grid(&[&[1, 0], &[0, 0]]);
        assert_eq!(gravity(&g, Direction::Down).to_rows(), vec![vec![0, 0], vec![1, 0]]);
    }

    #[test]
    fn translate_drops_cells_off_edge() {
        let g = grid(&[&[0, 1], &[0, 0]]);
        assert_eq!(translate(&g, 0, 1), Grid::filled(2, 2, 0));
        assert_eq!(translate(&g, 1, 0).to_rows(), vec![vec![0, 0], vec![0, 1]]);
    }

    #[test]
    fn align_and_center() {
        let g = grid(&[&[0, 0, 0], &[0, 0, 0], &[0, 0, 5]]);
        assert_eq!(align(&g, Direction::Up).get(0, 2), 5);
        assert_eq!(align(&g, Direction::Left).get(2, 0), 5);
        assert_eq!(center_content(&g).get(1, 1), 5);
        assert_eq!(center_content(&g).foreground_count(), 1);
    }

    #[test]
    fn fills() {
        let g = grid(&[&[0, 0, 0, 0], &[0, 2, 0, 0], &[0, 0, 2, 0], &[0, 0, 0, 0]]);
        let boxed = fill_bounding_box(&g);
        assert_eq!(boxed.foreground_count(), 4);
        let ring = border_fill(&g);
        assert_eq!(ring.get(0, 0), 2);
        assert_eq!(ring.get(1, 1), 2);
        assert_eq!(ring.get(1, 2), 0);
    }
}
