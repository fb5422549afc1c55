//! Fragment extraction: split a grid into connected components, rank them by
//! how tractable they look, and merge transformed fragments back.

use crate::grid::{BoundingBox, Cell, Grid};
use crate::ontology::{GridTransform, Hypothesis, TransformError, TransformResult, not_applicable};

/// One connected region cut out of a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Bounding-box region of the source grid, including any cells of other
    /// components that fall inside it.
    pub grid: Grid,
    pub bbox: BoundingBox,
    pub color: Cell,
    pub size: usize,
    /// Heuristic tractability in [0, 1].
    pub solvability: f64,
}

/// Splits grids into at most `max_fragments` fragments.
#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    pub max_fragments: usize,
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self { max_fragments: 16 }
    }
}

impl Fragmenter {
    pub fn new(max_fragments: usize) -> Self {
        Self { max_fragments }
    }

    /// 4-connected non-background components, most solvable first.
    pub fn split(&self, g: &Grid) -> Vec<Fragment> {
        let mut fragments: Vec<Fragment> = g
            .components_any_color()
            .into_iter()
            .filter_map(|obj| {
                let grid = extract_grid(g, obj.bbox).ok()?;
                let solvability = solvability(&grid, obj.size());
                Some(Fragment {
                    grid,
                    bbox: obj.bbox,
                    color: obj.color,
                    size: obj.size(),
                    solvability,
                })
            })
            .collect();
        fragments.sort_by(|a, b| {
            b.solvability
                .partial_cmp(&a.solvability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then((a.bbox.min_row, a.bbox.min_col).cmp(&(b.bbox.min_row, b.bbox.min_col)))
        });
        fragments.truncate(self.max_fragments);
        fragments
    }
}

/// Favors low color diversity along the fragment edge and moderate size.
fn solvability(fragment: &Grid, size: usize) -> f64 {
    let edge_colors = fragment
        .border_cells()
        .into_iter()
        .map(|(r, c)| fragment.get(r, c))
        .collect::<std::collections::BTreeSet<_>>()
        .len()
        .max(1);
    let edge = 1.0 / edge_colors as f64;
    // Peaks at 8 cells, falls off logarithmically on both sides.
    let size_term = 1.0 - ((size.max(1) as f64 / 8.0).ln().abs() / 64f64.ln()).min(1.0);
    0.5 * edge + 0.5 * size_term
}

/// Copy of the region of `g` inside `bbox`.
pub fn extract_grid(g: &Grid, bbox: BoundingBox) -> TransformResult<Grid> {
    g.extract(bbox)
        .map_err(|e| not_applicable("extractGrid", e.to_string()))
}

/// Overwrite the `bbox` region of `base` with `fragment`.
pub fn apply_fragment_to_grid(
    base: &Grid,
    fragment: &Grid,
    bbox: BoundingBox,
) -> TransformResult<Grid> {
    if !bbox.fits(base.rows(), base.cols()) {
        return Err(not_applicable("applyFragment", format!("{bbox} outside grid")));
    }
    if fragment.dims() != (bbox.height(), bbox.width()) {
        return Err(TransformError::ShapeMismatch {
            left_rows: fragment.rows(),
            left_cols: fragment.cols(),
            right_rows: bbox.height(),
            right_cols: bbox.width(),
        });
    }
    Ok(base.paste(fragment, bbox.min_row, bbox.min_col))
}

/// Applies an inner hypothesis to every fragment independently and merges
/// the results back. Fails when the inner step changes a fragment's shape or
/// when the grid has no fragments.
pub struct Fragmentwise {
    inner: Hypothesis,
    fragmenter: Fragmenter,
}

impl Fragmentwise {
    pub fn new(inner: Hypothesis, fragmenter: Fragmenter) -> Self {
        Self {
            inner,
            fragmenter,
        }
    }

    /// Wrap as a hypothesis named `fragment[<inner>]` in the inner's hierarchy.
    pub fn into_hypothesis(self) -> Hypothesis {
        let name = fragment_name(&self.inner);
        let hierarchy = self.inner.hierarchy();
        let mut complexity = self.inner.complexity();
        complexity.structural_depth += 1;
        Hypothesis::atomic(hierarchy, name, complexity, self)
    }
}

pub(crate) const FRAGMENT_PREFIX: &str = "fragment[";

pub fn fragment_name(inner: &Hypothesis) -> String {
    format!("{FRAGMENT_PREFIX}{}]", inner.name())
}

impl GridTransform for Fragmentwise {
    fn apply(&self, grid: &Grid) -> TransformResult<Grid> {
        let fragments = self.fragmenter.split(grid);
        if fragments.is_empty() {
            return Err(not_applicable("fragmentwise", "grid has no fragments"));
        }
        fragments.iter().try_fold(grid.clone(), |merged, fragment| {
            let out = self.inner.apply(&fragment.grid)?;
            apply_fragment_to_grid(&merged, &out, fragment.bbox)
        })
    }
}
