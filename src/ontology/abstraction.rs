//! Abstract hierarchy: line drawing, majority votes, and rules induced from
//! training pairs (constant patches, neighbourhood automata, causal rules and
//! size-rank roles).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::grid::{BACKGROUND, Cell, Grid, GridObject, most_frequent};
use crate::task::TrainPair;

use super::structural::neighbors4;
use super::{GridTransform, Hierarchy, Registry, TransformResult, cost, not_applicable, same_shapes};

const H: Hierarchy = Hierarchy::Abstract;

pub(super) fn register(reg: &mut Registry) {
    reg.add(H, "crossLines", cost(2, 1, 2, 2, 3, 1), |g| Ok(extend_lines(g, true, true)));
    reg.add(H, "rowLines", cost(1, 1, 2, 1, 3, 1), |g| Ok(extend_lines(g, true, false)));
    reg.add(H, "columnLines", cost(1, 1, 2, 1, 3, 1), |g| Ok(extend_lines(g, false, true)));
    reg.add(H, "majorityVoteRows", cost(2, 1, 1, 2, 3, 1), |g| Ok(majority_rows(g)));
    reg.add(H, "majorityVoteColumns", cost(2, 1, 1, 2, 3, 1), |g| {
        Ok(majority_rows(&g.transpose()).transpose())
    });
    reg.add(H, "neighbourhoodVote", cost(2, 1, 1, 2, 3, 2), |g| Ok(neighbourhood_vote(g)));
}

/// Paint background along the row and/or column of every foreground cell.
/// Cells claimed by two lines keep the first color written in scan order.
fn extend_lines(g: &Grid, rows: bool, cols: bool) -> Grid {
    let mut out: Vec<Cell> = g.cells().to_vec();
    let width = g.cols();
    for (r, c, v) in g.iter().filter(|&(_, _, v)| v != BACKGROUND) {
        if rows {
            for cc in 0..width {
                let idx = r * width + cc;
                if out[idx] == BACKGROUND {
                    out[idx] = v;
                }
            }
        }
        if cols {
            for rr in 0..g.rows() {
                let idx = rr * width + c;
                if out[idx] == BACKGROUND {
                    out[idx] = v;
                }
            }
        }
    }
    Grid::from_fn(g.rows(), width, |r, c| out[r * width + c])
}

/// Every row becomes its most common color.
fn majority_rows(g: &Grid) -> Grid {
    let winners: Vec<Cell> = (0..g.rows())
        .map(|r| {
            let mut hist = BTreeMap::new();
            for &v in g.row(r) {
                *hist.entry(v).or_insert(0usize) += 1;
            }
            most_frequent(hist).unwrap_or(BACKGROUND)
        })
        .collect();
    Grid::from_fn(g.rows(), g.cols(), |r, _| winners[r])
}

/// Each cell takes the most common color in its 3x3 neighbourhood.
fn neighbourhood_vote(g: &Grid) -> Grid {
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        let mut hist = BTreeMap::new();
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                if let Some(v) = g.get_signed(r as isize + dr, c as isize + dc) {
                    *hist.entry(v).or_insert(0usize) += 1;
                }
            }
        }
        most_frequent(hist).unwrap_or(BACKGROUND)
    })
}

// ---------------------------------------------------------------------------
// Induced rules
// ---------------------------------------------------------------------------

/// The same set of cell writes observed in every training pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalogyPatch {
    dims: (usize, usize),
    writes: Vec<(usize, usize, Cell)>,
}

impl AnalogyPatch {
    pub fn fit(train: &[TrainPair]) -> Option<Self> {
        if !same_shapes(train) {
            return None;
        }
        let dims = train.first()?.input.dims();
        let mut writes: Option<Vec<(usize, usize, Cell)>> = None;
        for pair in train {
            if pair.input.dims() != dims {
                return None;
            }
            let these: Vec<(usize, usize, Cell)> = pair
                .input
                .diff(&pair.output)?
                .into_iter()
                .map(|(r, c, _, to)| (r, c, to))
                .collect();
            match &writes {
                Some(w) if *w != these => return None,
                Some(_) => {}
                None => writes = Some(these),
            }
        }
        writes
            .filter(|w| !w.is_empty())
            .map(|writes| Self { dims, writes })
    }
}

impl GridTransform for AnalogyPatch {
    fn apply(&self, grid: &Grid) -> TransformResult<Grid> {
        if grid.dims() != self.dims {
            return Err(not_applicable("analogy", "input shape differs from training"));
        }
        Ok(self
            .writes
            .iter()
            .fold(grid.clone(), |g, &(r, c, v)| g.with_cell(r, c, v)))
    }
}

/// Key for a cell's local context.
pub trait NeighbourKey: Ord + Clone + Send + Sync {
    fn of(g: &Grid, r: usize, c: usize) -> Self;
}

/// Own color plus the four von Neumann neighbours, off-grid read as background.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellularKey([Cell; 5]);

impl NeighbourKey for CellularKey {
    fn of(g: &Grid, r: usize, c: usize) -> Self {
        let n = neighbors4(g, r, c).map(|v| v.unwrap_or(BACKGROUND));
        Self([g.get(r, c), n[0], n[1], n[2], n[3]])
    }
}

/// Own color plus the set of foreground colors touching the cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CausalKey(Cell, BTreeSet<Cell>);

impl NeighbourKey for CausalKey {
    fn of(g: &Grid, r: usize, c: usize) -> Self {
        let touching = neighbors4(g, r, c)
            .into_iter()
            .flatten()
            .filter(|&v| v != BACKGROUND)
            .collect();
        Self(g.get(r, c), touching)
    }
}

/// Output color as a function of a local context key. Unseen contexts keep
/// their color.
#[derive(Debug, Clone)]
pub struct NeighbourRule<K> {
    table: BTreeMap<K, Cell>,
}

impl<K: NeighbourKey> NeighbourRule<K> {
    pub fn fit(train: &[TrainPair]) -> Option<Self> {
        if !same_shapes(train) {
            return None;
        }
        let mut table: BTreeMap<K, Cell> = BTreeMap::new();
        let mut changes = false;
        for pair in train {
            for (r, c, before) in pair.input.iter() {
                let after = pair.output.get(r, c);
                changes |= before != after;
                match table.insert(K::of(&pair.input, r, c), after) {
                    Some(prev) if prev != after => return None,
                    _ => {}
                }
            }
        }
        changes.then_some(Self { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl<K: NeighbourKey> GridTransform for NeighbourRule<K> {
    fn apply(&self, grid: &Grid) -> TransformResult<Grid> {
        Ok(Grid::from_fn(grid.rows(), grid.cols(), |r, c| {
            self.table
                .get(&K::of(grid, r, c))
                .copied()
                .unwrap_or_else(|| grid.get(r, c))
        }))
    }
}

pub type CellularRule = NeighbourRule<CellularKey>;
pub type CausalRule = NeighbourRule<CausalKey>;

/// Objects recolored by their size rank (largest first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleByRank {
    colors: Vec<Cell>,
}

/// Objects sorted by descending size, ties by first cell.
fn ranked(g: &Grid) -> Vec<GridObject> {
    let mut objects = g.objects();
    objects.sort_by(|a, b| b.size().cmp(&a.size()).then(a.cells.cmp(&b.cells)));
    objects
}

impl RoleByRank {
    pub fn fit(train: &[TrainPair]) -> Option<Self> {
        if !same_shapes(train) {
            return None;
        }
        let mut colors: HashMap<usize, Cell> = HashMap::new();
        let mut changes = false;
        for pair in train {
            // Background must stay put.
            let bg_stable = pair
                .input
                .iter()
                .filter(|&(_, _, v)| v == BACKGROUND)
                .all(|(r, c, _)| pair.output.get(r, c) == BACKGROUND);
            if !bg_stable {
                return None;
            }
            for (rank, obj) in ranked(&pair.input).iter().enumerate() {
                let (r0, c0) = *obj.cells.first()?;
                let color = pair.output.get(r0, c0);
                if obj.cells.iter().any(|&(r, c)| pair.output.get(r, c) != color) {
                    return None;
                }
                changes |= color != obj.color;
                match colors.insert(rank, color) {
                    Some(prev) if prev != color => return None,
                    _ => {}
                }
            }
        }
        if !changes {
            return None;
        }
        let n = colors.len();
        let ordered: Option<Vec<Cell>> = (0..n).map(|i| colors.get(&i).copied()).collect();
        ordered.map(|colors| Self { colors })
    }
}

impl GridTransform for RoleByRank {
    fn apply(&self, grid: &Grid) -> TransformResult<Grid> {
        let mut out = grid.clone();
        for (rank, obj) in ranked(grid).iter().enumerate() {
            let Some(&color) = self.colors.get(rank) else {
                break;
            };
            for &(r, c) in &obj.cells {
                out = out.with_cell(r, c, color);
            }
        }
        Ok(out)
    }
}

pub(super) fn learn(train: &[TrainPair], reg: &mut Registry) {
    if let Some(patch) = AnalogyPatch::fit(train) {
        reg.add_learned(H, "analogy", cost(1, 1, 1, 1, 4, 1), patch);
    }
    if let Some(rule) = CausalRule::fit(train) {
        tracing::trace!(keys = rule.len(), "causal rule induced");
        reg.add_learned(H, "causalRule", cost(2, 1, 1, 2, 3, 1), rule);
    }
    if let Some(rule) = CellularRule::fit(train) {
        tracing::trace!(keys = rule.len(), "cellular rule induced");
        reg.add_learned(H, "cellularRule", cost(2, 2, 1, 1, 3, 1), rule);
    }
    if let Some(roles) = RoleByRank::fit(train) {
        reg.add_learned(H, "roleByRank", cost(2, 1, 1, 3, 3, 1), roles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid;

    #[test]
    fn lines_extend_through_background() {
        let g = grid(&[&[0, 0, 0], &[0, 4, 0], &[0, 0, 0]]);
        let cross = extend_lines(&g, true, true);
        assert_eq!(cross.to_rows(), vec![vec![0, 4, 0], vec![4, 4, 4], vec![0, 4, 0]]);
        assert_eq!(extend_lines(&g, true, false).foreground_count(), 3);
    }

    #[test]
    fn majority_votes() {
        let g = grid(&[&[1, 1, 2], &[0, 3, 3]]);
        assert_eq!(majority_rows(&g).to_rows(), vec![vec![1, 1, 1], vec![3, 3, 3]]);
        let noisy = grid(&[&[5, 5, 5], &[5, 2, 5], &[5, 5, 5]]);
        assert_eq!(neighbourhood_vote(&noisy), Grid::filled(3, 3, 5));
    }

    #[test]
    fn analogy_requires_identical_writes() {
        let a = grid(&[&[0, 0], &[1, 0]]);
        let b = grid(&[&[2, 0], &[0, 0]]);
        let train = vec![
            TrainPair::new(a.clone(), a.with_cell(0, 1, 7)),
            TrainPair::new(b.clone(), b.with_cell(0, 1, 7)),
        ];
        let patch = AnalogyPatch::fit(&train).unwrap();
        assert_eq!(patch.apply(&Grid::filled(2, 2, 0)).unwrap().get(0, 1), 7);
        assert!(patch.apply(&Grid::filled(3, 3, 0)).is_err());

        let differing = vec![
            TrainPair::new(a.clone(), a.with_cell(0, 1, 7)),
            TrainPair::new(b.clone(), b.with_cell(1, 1, 7)),
        ];
        assert!(AnalogyPatch::fit(&differing).is_none());
    }

    #[test]
    fn cellular_rule_learns_local_update() {
        // Background cells right of a 1 become 2.
        let train = vec![
            TrainPair::new(grid(&[&[1, 0, 0]]), grid(&[&[1, 2, 0]])),
            TrainPair::new(grid(&[&[0, 1, 0]]), grid(&[&[0, 1, 2]])),
        ];
        let rule = CellularRule::fit(&train).unwrap();
        let out = rule.apply(&grid(&[&[1, 0, 0]])).unwrap();
        assert_eq!(out.to_rows(), vec![vec![1, 2, 0]]);
    }

    #[test]
    fn causal_rule_rejects_conflicts() {
        // Same key (background touching color 1) maps to both 0 and 2.
        let train = vec![TrainPair::new(grid(&[&[1, 0, 1, 0]]), grid(&[&[1, 2, 1, 0]]))];
        assert!(CausalRule::fit(&train).is_none());
        let identity = vec![TrainPair::new(grid(&[&[1, 0]]), grid(&[&[1, 0]]))];
        assert!(CausalRule::fit(&identity).is_none());
    }

    #[test]
    fn roles_follow_size_rank() {
        let input = grid(&[&[5, 5, 0, 5], &[5, 0, 0, 0]]);
        let output = grid(&[&[1, 1, 0, 2], &[1, 0, 0, 0]]);
        let roles = RoleByRank::fit(&[TrainPair::new(input, output)]).unwrap();
        let test = grid(&[&[5, 0, 5], &[0, 0, 5]]);
        assert_eq!(roles.apply(&test).unwrap().to_rows(), vec![vec![2, 0, 1], vec![0, 0, 1]]);
    }
}
