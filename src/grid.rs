//! Rectangular color grids and the structural queries every other subsystem
//! builds on.
//!
//! A [`Grid`] is immutable by convention: every transform takes `&Grid` and
//! returns a fresh `Grid`. Derived views (objects, palette, border cells) are
//! computed on demand and never cached.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use miette::Diagnostic;
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cell value. `0` is background by convention, `1..=9` are colors.
pub type Cell = u8;

/// Conventional background color.
pub const BACKGROUND: Cell = 0;

/// Default ceiling on either grid dimension.
pub const DEFAULT_MAX_DIM: usize = 100;

/// Errors from grid construction and region access.
#[derive(Debug, Error, Diagnostic)]
pub enum GridError {
    #[error("grid has no cells")]
    #[diagnostic(
        code(gridsynth::grid::empty),
        help("A grid needs at least one row and one column.")
    )]
    Empty,

    #[error("ragged grid: row {row} has {actual} cells, expected {expected}")]
    #[diagnostic(
        code(gridsynth::grid::ragged),
        help("Every row of a grid must have the same length.")
    )]
    Ragged {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("bounding box {bbox} does not fit a {rows}x{cols} grid")]
    #[diagnostic(
        code(gridsynth::grid::bbox_out_of_bounds),
        help("Extract regions only from inside the grid they were computed on.")
    )]
    BoxOutOfBounds {
        bbox: BoundingBox,
        rows: usize,
        cols: usize,
    },
}

pub type GridResult<T> = std::result::Result<T, GridError>;

// ---------------------------------------------------------------------------
// BoundingBox
// ---------------------------------------------------------------------------

/// Inclusive rectangular region of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_row: usize,
    pub min_col: usize,
    pub max_row: usize,
    pub max_col: usize,
}

impl BoundingBox {
    /// Single-cell box.
    pub fn point(row: usize, col: usize) -> Self {
        Self {
            min_row: row,
            min_col: col,
            max_row: row,
            max_col: col,
        }
    }

    /// Grow the box to include `(row, col)`.
    pub fn include(&mut self, row: usize, col: usize) {
        self.min_row = self.min_row.min(row);
        self.min_col = self.min_col.min(col);
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
    }

    pub fn height(&self) -> usize {
        self.max_row - self.min_row + 1
    }

    pub fn width(&self) -> usize {
        self.max_col - self.min_col + 1
    }

    pub fn area(&self) -> usize {
        self.height() * self.width()
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.min_row..=self.max_row).contains(&row) && (self.min_col..=self.max_col).contains(&col)
    }

    /// Whether the box lies fully inside a `rows`x`cols` grid.
    pub fn fits(&self, rows: usize, cols: usize) -> bool {
        self.max_row < rows && self.max_col < cols
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{}..{},{}]",
            self.min_row, self.min_col, self.max_row, self.max_col
        )
    }
}

// ---------------------------------------------------------------------------
// GridObject
// ---------------------------------------------------------------------------

/// A maximal 4-connected region of non-background cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridObject {
    /// Color of the object. For multi-color components this is the most
    /// frequent color among its cells.
    pub color: Cell,
    /// Cells in row-major discovery order.
    pub cells: Vec<(usize, usize)>,
    pub bbox: BoundingBox,
}

impl GridObject {
    pub fn size(&self) -> usize {
        self.cells.len()
    }
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// A rectangular matrix of small non-negative integers.
///
/// Stored row-major. Construction from user data goes through [`Grid::new`],
/// which rejects empty and ragged input. Transforms may build zero-sized grids
/// through [`Grid::from_fn`]; validation treats those as degenerate output.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<Cell>>", into = "Vec<Vec<Cell>>")]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<Cell>,
}

impl Grid {
    /// Build a grid from nested rows, rejecting empty and ragged input.
    pub fn new(rows: Vec<Vec<Cell>>) -> GridResult<Self> {
        let expected = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || expected == 0 {
            return Err(GridError::Empty);
        }
        let mut cells = Vec::with_capacity(rows.len() * expected);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != expected {
                return Err(GridError::Ragged {
                    row: i,
                    expected,
                    actual: row.len(),
                });
            }
            cells.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols: expected,
            cells,
        })
    }

    /// Build a grid by evaluating `f(row, col)` for every cell.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> Cell) -> Self {
        let mut cells = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                cells.push(f(r, c));
            }
        }
        Self { rows, cols, cells }
    }

    /// A grid filled with one color.
    pub fn filled(rows: usize, cols: usize, color: Cell) -> Self {
        Self {
            rows,
            cols,
            cells: vec![color; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True for zero-sized grids produced by degenerate transforms.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell value. Panics on out-of-range coordinates, like slice indexing.
    pub fn get(&self, row: usize, col: usize) -> Cell {
        self.cells[row * self.cols + col]
    }

    /// Cell value, or `None` outside the grid. Accepts signed coordinates so
    /// neighbourhood scans can probe past the edges.
    pub fn get_signed(&self, row: isize, col: isize) -> Option<Cell> {
        if row < 0 || col < 0 {
            return None;
        }
        let (r, c) = (row as usize, col as usize);
        (r < self.rows && c < self.cols).then(|| self.get(r, c))
    }

    pub fn row(&self, row: usize) -> &[Cell] {
        &self.cells[row * self.cols..(row + 1) * self.cols]
    }

    pub fn column(&self, col: usize) -> Vec<Cell> {
        (0..self.rows).map(|r| self.get(r, col)).collect()
    }

    /// Raw row-major cells.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Iterate `(row, col, value)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, Cell)> + '_ {
        let cols = self.cols.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i / cols, i % cols, v))
    }

    pub fn to_rows(&self) -> Vec<Vec<Cell>> {
        (0..self.rows).map(|r| self.row(r).to_vec()).collect()
    }

    /// Copy of this grid with one cell replaced.
    pub fn with_cell(&self, row: usize, col: usize, value: Cell) -> Self {
        let mut next = self.clone();
        next.cells[row * self.cols + col] = value;
        next
    }

    /// Copy of this grid with every cell passed through `f`.
    pub fn map_cells(&self, f: impl Fn(Cell) -> Cell) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            cells: self.cells.iter().map(|&v| f(v)).collect(),
        }
    }

    // -- structural queries --------------------------------------------------

    /// Count of each value present.
    pub fn histogram(&self) -> BTreeMap<Cell, usize> {
        let mut hist = BTreeMap::new();
        for &v in &self.cells {
            *hist.entry(v).or_insert(0) += 1;
        }
        hist
    }

    /// Distinct values present, background included.
    pub fn unique_colors(&self) -> BTreeSet<Cell> {
        self.cells.iter().copied().collect()
    }

    /// Distinct non-background values present.
    pub fn foreground_colors(&self) -> BTreeSet<Cell> {
        self.cells
            .iter()
            .copied()
            .filter(|&v| v != BACKGROUND)
            .collect()
    }

    /// Most frequent value; ties go to the smaller value.
    pub fn majority_color(&self) -> Cell {
        most_frequent(self.histogram()).unwrap_or(BACKGROUND)
    }

    /// Most frequent non-background value, if any.
    pub fn majority_foreground(&self) -> Option<Cell> {
        let mut hist = self.histogram();
        hist.remove(&BACKGROUND);
        most_frequent(hist)
    }

    pub fn foreground_count(&self) -> usize {
        self.cells.iter().filter(|&&v| v != BACKGROUND).count()
    }

    /// Coordinates of the outermost ring, clockwise from the top-left.
    pub fn border_cells(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        if self.is_empty() {
            return out;
        }
        let (rows, cols) = (self.rows, self.cols);
        for c in 0..cols {
            out.push((0, c));
        }
        for r in 1..rows {
            out.push((r, cols - 1));
        }
        if rows > 1 {
            for c in (0..cols.saturating_sub(1)).rev() {
                out.push((rows - 1, c));
            }
        }
        if cols > 1 {
            for r in (1..rows.saturating_sub(1)).rev() {
                out.push((r, 0));
            }
        }
        out
    }

    pub fn is_border(&self, row: usize, col: usize) -> bool {
        row == 0 || col == 0 || row + 1 == self.rows || col + 1 == self.cols
    }

    /// Bounding box of all non-background cells.
    pub fn content_bbox(&self) -> Option<BoundingBox> {
        let mut bbox: Option<BoundingBox> = None;
        for (r, c, v) in self.iter() {
            if v != BACKGROUND {
                match bbox.as_mut() {
                    Some(b) => b.include(r, c),
                    None => bbox = Some(BoundingBox::point(r, c)),
                }
            }
        }
        bbox
    }

    /// Maximal 4-connected same-color regions, excluding background.
    ///
    /// Objects are ordered by their first cell in row-major order.
    pub fn objects(&self) -> Vec<GridObject> {
        self.components(|a, b| a == b)
    }

    /// Maximal 4-connected non-background regions regardless of color.
    pub fn components_any_color(&self) -> Vec<GridObject> {
        self.components(|_, _| true)
    }

    fn components(&self, joins: impl Fn(Cell, Cell) -> bool) -> Vec<GridObject> {
        let n = self.cells.len();
        if n == 0 {
            return Vec::new();
        }
        let mut sets = UnionFind::<usize>::new(n);
        for r in 0..self.rows {
            for c in 0..self.cols {
                let v = self.get(r, c);
                if v == BACKGROUND {
                    continue;
                }
                let idx = r * self.cols + c;
                if c + 1 < self.cols {
                    let right = self.get(r, c + 1);
                    if right != BACKGROUND && joins(v, right) {
                        sets.union(idx, idx + 1);
                    }
                }
                if r + 1 < self.rows {
                    let down = self.get(r + 1, c);
                    if down != BACKGROUND && joins(v, down) {
                        sets.union(idx, idx + self.cols);
                    }
                }
            }
        }

        let mut order: Vec<usize> = Vec::new();
        let mut groups: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
        for (r, c, v) in self.iter() {
            if v == BACKGROUND {
                continue;
            }
            let root = sets.find(r * self.cols + c);
            let cells = groups.entry(root).or_insert_with(|| {
                order.push(root);
                Vec::new()
            });
            cells.push((r, c));
        }

        order
            .into_iter()
            .filter_map(|root| groups.remove(&root))
            .map(|cells| {
                let mut bbox = BoundingBox::point(cells[0].0, cells[0].1);
                let mut hist = BTreeMap::new();
                for &(r, c) in &cells {
                    bbox.include(r, c);
                    *hist.entry(self.get(r, c)).or_insert(0usize) += 1;
                }
                GridObject {
                    color: most_frequent(hist).unwrap_or(BACKGROUND),
                    cells,
                    bbox,
                }
            })
            .collect()
    }

    // -- transforms ----------------------------------------------------------

    /// Mirror left-to-right.
    pub fn flip_horizontal(&self) -> Self {
        Self::from_fn(self.rows, self.cols, |r, c| self.get(r, self.cols - 1 - c))
    }

    /// Mirror top-to-bottom.
    pub fn flip_vertical(&self) -> Self {
        Self::from_fn(self.rows, self.cols, |r, c| self.get(self.rows - 1 - r, c))
    }

    /// Rotate a quarter turn clockwise.
    pub fn rotate90(&self) -> Self {
        Self::from_fn(self.cols, self.rows, |r, c| self.get(self.rows - 1 - c, r))
    }

    pub fn rotate180(&self) -> Self {
        Self::from_fn(self.rows, self.cols, |r, c| {
            self.get(self.rows - 1 - r, self.cols - 1 - c)
        })
    }

    /// Rotate a quarter turn counter-clockwise.
    pub fn rotate270(&self) -> Self {
        Self::from_fn(self.cols, self.rows, |r, c| self.get(c, self.cols - 1 - r))
    }

    pub fn transpose(&self) -> Self {
        Self::from_fn(self.cols, self.rows, |r, c| self.get(c, r))
    }

    /// Mirror across the anti-diagonal.
    pub fn anti_transpose(&self) -> Self {
        Self::from_fn(self.cols, self.rows, |r, c| {
            self.get(self.rows - 1 - c, self.cols - 1 - r)
        })
    }

    /// Cells that differ between two same-shaped grids, as `(row, col, from, to)`.
    /// Returns `None` when the shapes differ.
    pub fn diff(&self, other: &Grid) -> Option<Vec<(usize, usize, Cell, Cell)>> {
        if self.dims() != other.dims() {
            return None;
        }
        Some(
            self.iter()
                .zip(other.cells.iter())
                .filter(|((_, _, a), b)| a != *b)
                .map(|((r, c, a), &b)| (r, c, a, b))
                .collect(),
        )
    }

    /// Fraction of cells equal to `other`; `0.0` when shapes differ.
    pub fn cell_accuracy(&self, other: &Grid) -> f64 {
        if self.dims() != other.dims() || self.is_empty() {
            return 0.0;
        }
        let same = self
            .cells
            .iter()
            .zip(other.cells.iter())
            .filter(|(a, b)| a == b)
            .count();
        same as f64 / self.cells.len() as f64
    }

    /// Copy of the region inside `bbox`.
    pub fn extract(&self, bbox: BoundingBox) -> GridResult<Self> {
        if !bbox.fits(self.rows, self.cols) {
            return Err(GridError::BoxOutOfBounds {
                bbox,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(Self::from_fn(bbox.height(), bbox.width(), |r, c| {
            self.get(bbox.min_row + r, bbox.min_col + c)
        }))
    }

    /// Copy of this grid with `patch` written at `(row, col)`. Parts of the
    /// patch falling outside the grid are clipped.
    pub fn paste(&self, patch: &Grid, row: usize, col: usize) -> Self {
        let mut next = self.clone();
        for (r, c, v) in patch.iter() {
            let (tr, tc) = (row + r, col + c);
            if tr < self.rows && tc < self.cols {
                next.cells[tr * self.cols + tc] = v;
            }
        }
        next
    }

    pub fn is_symmetric_horizontal(&self) -> bool {
        *self == self.flip_horizontal()
    }

    pub fn is_symmetric_vertical(&self) -> bool {
        *self == self.flip_vertical()
    }

    /// Mask of foreground cells: every non-background value becomes `1`.
    pub fn foreground_mask(&self) -> Self {
        self.map_cells(|v| u8::from(v != BACKGROUND))
    }
}

impl TryFrom<Vec<Vec<Cell>>> for Grid {
    type Error = GridError;

    fn try_from(rows: Vec<Vec<Cell>>) -> GridResult<Self> {
        Self::new(rows)
    }
}

impl From<Grid> for Vec<Vec<Cell>> {
    fn from(grid: Grid) -> Self {
        grid.to_rows()
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Grid({}x{})", self.rows, self.cols)?;
        if self.len() <= 64 {
            write!(f, " {:?}", self.to_rows())?;
        }
        Ok(())
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.rows {
            let line: Vec<String> = self.row(r).iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

/// Key with the largest count; ties go to the smallest key.
pub(crate) fn most_frequent(hist: BTreeMap<Cell, usize>) -> Option<Cell> {
    hist.into_iter()
        .fold(None, |best: Option<(Cell, usize)>, (v, n)| match best {
            Some((_, bn)) if bn >= n => best,
            _ => Some((v, n)),
        })
        .map(|(v, _)| v)
}

#[cfg(test)]
pub(crate) fn grid(rows: &[&[Cell]]) -> Grid {
    Grid::new(rows.iter().map(|r| r.to_vec()).collect()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_ragged() {
        assert!(matches!(Grid::new(vec![]), Err(GridError::Empty)));
        assert!(matches!(Grid::new(vec![vec![]]), Err(GridError::Empty)));
        let err = Grid::new(vec![vec![1, 2], vec![3]]).unwrap_err();
        assert!(matches!(
            err,
            GridError::Ragged {
                row: 1,
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn rotations_compose() {
        let g = grid(&[&[1, 2, 3], &[4, 5, 6]]);
        assert_eq!(g.rotate90().dims(), (3, 2));
        assert_eq!(g.rotate90().to_rows(), vec![vec![4, 1], vec![5, 2], vec![6, 3]]);
        assert_eq!(g.rotate90().rotate90(), g.rotate180());
        assert_eq!(g.rotate90().rotate270(), g);
        assert_eq!(g.transpose().transpose(), g);
        assert_eq!(g.anti_transpose().to_rows(), vec![vec![6, 3], vec![5, 2], vec![4, 1]]);
        assert_eq!(g.anti_transpose(), g.rotate90().flip_vertical());
    }

    #[test]
    fn flips() {
        let g = grid(&[&[1, 0], &[0, 2]]);
        assert_eq!(g.flip_horizontal().to_rows(), vec![vec![0, 1], vec![2, 0]]);
        assert_eq!(g.flip_vertical().to_rows(), vec![vec![0, 2], vec![1, 0]]);
    }

    #[test]
    fn objects_are_four_connected_per_color() {
        let g = grid(&[&[1, 1, 0], &[0, 1, 2], &[3, 0, 2]]);
        let objects = g.objects();
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0].color, 1);
        assert_eq!(objects[0].size(), 3);
        assert_eq!(objects[1].color, 2);
        assert_eq!(objects[1].bbox, BoundingBox { min_row: 1, min_col: 2, max_row: 2, max_col: 2 });
        assert_eq!(objects[2].color, 3);

        // Diagonal contact does not join.
        let diag = grid(&[&[1, 0], &[0, 1]]);
        assert_eq!(diag.objects().len(), 2);
    }

    #[test]
    fn multicolor_components_join_across_colors() {
        let g = grid(&[&[1, 2, 0], &[0, 2, 0], &[0, 0, 3]]);
        let comps = g.components_any_color();
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].size(), 3);
        assert_eq!(comps[0].color, 2);
    }

    #[test]
    fn border_cells_cover_ring_once() {
        let g = Grid::filled(3, 4, 0);
        let ring = g.border_cells();
        assert_eq!(ring.len(), 10);
        let unique: BTreeSet<_> = ring.iter().collect();
        assert_eq!(unique.len(), 10);
        assert_eq!(Grid::filled(1, 3, 0).border_cells().len(), 3);
        assert_eq!(Grid::filled(3, 1, 0).border_cells().len(), 3);
    }

    #[test]
    fn majority_and_palette() {
        let g = grid(&[&[0, 0, 3], &[3, 2, 0]]);
        assert_eq!(g.majority_color(), 0);
        assert_eq!(g.majority_foreground(), Some(3));
        assert_eq!(g.foreground_colors().into_iter().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(Grid::filled(2, 2, 0).majority_foreground(), None);
    }

    #[test]
    fn extract_and_paste_round_trip() {
        let g = grid(&[&[1, 2, 3], &[4, 5, 6], &[7, 8, 9]]);
        let bbox = BoundingBox { min_row: 1, min_col: 1, max_row: 2, max_col: 2 };
        let part = g.extract(bbox).unwrap();
        assert_eq!(part.to_rows(), vec![vec![5, 6], vec![8, 9]]);
        assert_eq!(g.paste(&part, bbox.min_row, bbox.min_col), g);
        let outside = BoundingBox { min_row: 2, min_col: 2, max_row: 3, max_col: 3 };
        assert!(g.extract(outside).is_err());
    }

    #[test]
    fn transforms_do_not_mutate_source() {
        let g = grid(&[&[1, 2], &[3, 4]]);
        let before = g.clone();
        let _ = g.rotate90();
        let _ = g.with_cell(0, 0, 9);
        let _ = g.paste(&grid(&[&[7]]), 1, 1);
        assert_eq!(g, before);
    }

    #[test]
    fn serde_rejects_ragged() {
        let ok: Grid = serde_json::from_str("[[1,2],[3,4]]").unwrap();
        assert_eq!(ok.dims(), (2, 2));
        assert!(serde_json::from_str::<Grid>("[[1,2],[3]]").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "[[1,2],[3,4]]");
    }

    #[test]
    fn accuracy_and_diff() {
        let a = grid(&[&[1, 0], &[0, 0]]);
        let b = grid(&[&[0, 0], &[1, 0]]);
        assert_eq!(a.cell_accuracy(&b), 0.5);
        assert_eq!(a.diff(&b).unwrap().len(), 2);
        assert!(a.diff(&Grid::filled(1, 1, 0)).is_none());
        assert_eq!(a.cell_accuracy(&Grid::filled(3, 3, 0)), 0.0);
    }
}
