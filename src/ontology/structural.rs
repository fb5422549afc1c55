//! Structural hierarchy: flips, rotations, scaling, tiling, morphology,
//! connected components and skeletonization.

use std::collections::BTreeMap;

use crate::grid::{BACKGROUND, Cell, Grid, GridObject, most_frequent};

use super::{Hierarchy, Registry, TransformResult, check_output_dims, cost, not_applicable};

const H: Hierarchy = Hierarchy::Structural;

pub(super) fn register(reg: &mut Registry) {
    reg.add(H, "identity", cost(1, 1, 1, 1, 1, 1), |g| Ok(g.clone()));

    reg.add(H, "flipHorizontal", cost(1, 1, 2, 1, 1, 1), |g| Ok(g.flip_horizontal()));
    reg.add(H, "flipVertical", cost(1, 1, 2, 1, 1, 1), |g| Ok(g.flip_vertical()));
    reg.add(H, "rotate180", cost(1, 1, 2, 1, 1, 1), |g| Ok(g.rotate180()));
    reg.add(H, "rotate90", cost(2, 1, 2, 1, 1, 1), |g| Ok(g.rotate90()));
    reg.add(H, "rotate270", cost(2, 1, 2, 1, 1, 1), |g| Ok(g.rotate270()));
    reg.add(H, "transpose", cost(1, 1, 3, 1, 1, 1), |g| Ok(g.transpose()));
    reg.add(H, "antiTranspose", cost(1, 1, 3, 1, 1, 1), |g| Ok(g.anti_transpose()));

    reg.add(H, "scaleUp2", cost(2, 1, 1, 1, 1, 2), |g| scale_up(g, 2));
    reg.add(H, "scaleUp3", cost(2, 1, 1, 1, 1, 3), |g| scale_up(g, 3));
    reg.add(H, "scaleDown2", cost(2, 1, 1, 1, 2, 2), |g| scale_down(g, 2));
    reg.add(H, "scaleDown3", cost(2, 1, 1, 1, 2, 3), |g| scale_down(g, 3));

    reg.add(H, "tileHorizontal", cost(2, 1, 2, 1, 1, 2), |g| tile(g, 1, 2));
    reg.add(H, "tileVertical", cost(2, 1, 2, 1, 1, 2), |g| tile(g, 2, 1));
    reg.add(H, "tile2x2", cost(3, 1, 2, 1, 1, 2), |g| tile(g, 2, 2));
    reg.add(H, "tile3x3", cost(3, 1, 2, 1, 1, 3), |g| tile(g, 3, 3));
    reg.add(H, "mirrorExtendHorizontal", cost(2, 1, 3, 1, 1, 2), mirror_extend_horizontal);
    reg.add(H, "mirrorExtendVertical", cost(2, 1, 3, 1, 1, 2), mirror_extend_vertical);
    reg.add(H, "mirrorQuad", cost(3, 1, 3, 1, 1, 2), mirror_quad);

    reg.add(H, "dilate", cost(2, 1, 1, 2, 1, 1), |g| Ok(dilate(g)));
    reg.add(H, "erode", cost(2, 1, 1, 2, 1, 1), |g| Ok(erode(g)));
    reg.add(H, "outline", cost(2, 1, 1, 2, 2, 1), |g| Ok(outline(g)));
    reg.add(H, "skeletonize", cost(3, 1, 1, 2, 2, 2), |g| Ok(skeletonize(g)));

    reg.add(H, "keepLargestObject", cost(2, 1, 1, 3, 1, 1), |g| {
        Ok(keep_object(g, largest(&g.objects())))
    });
    reg.add(H, "keepSmallestObject", cost(2, 1, 1, 3, 1, 1), |g| {
        Ok(keep_object(g, smallest(&g.objects())))
    });
    reg.add(H, "cropToContent", cost(2, 1, 1, 2, 1, 2), crop_to_content);
    reg.add(H, "cropToLargestObject", cost(3, 1, 1, 3, 1, 2), |g| {
        let objects = g.objects();
        let obj = largest(&objects)
            .ok_or_else(|| not_applicable("cropToLargestObject", "grid has no objects"))?;
        g.extract(obj.bbox)
            .map_err(|e| not_applicable("cropToLargestObject", e.to_string()))
    });

    reg.add(H, "fillDiagonal", cost(1, 1, 3, 1, 2, 1), |g| Ok(fill_diagonal(g, false)));
    reg.add(H, "fillAntiDiagonal", cost(1, 1, 3, 1, 2, 1), |g| Ok(fill_diagonal(g, true)));
}

pub(crate) fn scale_up(g: &Grid, k: usize) -> TransformResult<Grid> {
    check_output_dims(g.rows() * k, g.cols() * k)?;
    Ok(Grid::from_fn(g.rows() * k, g.cols() * k, |r, c| g.get(r / k, c / k)))
}

/// Downscale by block majority. Requires both dimensions divisible by `k`.
pub(crate) fn scale_down(g: &Grid, k: usize) -> TransformResult<Grid> {
    if g.rows() % k != 0 || g.cols() % k != 0 || g.rows() < k || g.cols() < k {
        return Err(not_applicable(
            "scaleDown",
            format!("{}x{} is not divisible by {k}", g.rows(), g.cols()),
        ));
    }
    Ok(Grid::from_fn(g.rows() / k, g.cols() / k, |r, c| {
        let mut hist = BTreeMap::new();
        for dr in 0..k {
            for dc in 0..k {
                *hist.entry(g.get(r * k + dr, c * k + dc)).or_insert(0usize) += 1;
            }
        }
        most_frequent(hist).unwrap_or(BACKGROUND)
    }))
}

pub(crate) fn tile(g: &Grid, down: usize, across: usize) -> TransformResult<Grid> {
    let (rows, cols) = (g.rows() * down, g.cols() * across);
    check_output_dims(rows, cols)?;
    Ok(Grid::from_fn(rows, cols, |r, c| g.get(r % g.rows(), c % g.cols())))
}

fn mirror_extend_horizontal(g: &Grid) -> TransformResult<Grid> {
    check_output_dims(g.rows(), g.cols() * 2)?;
    let cols = g.cols();
    Ok(Grid::from_fn(g.rows(), cols * 2, |r, c| {
        if c < cols { g.get(r, c) } else { g.get(r, 2 * cols - 1 - c) }
    }))
}

fn mirror_extend_vertical(g: &Grid) -> TransformResult<Grid> {
    check_output_dims(g.rows() * 2, g.cols())?;
    let rows = g.rows();
    Ok(Grid::from_fn(rows * 2, g.cols(), |r, c| {
        if r < rows { g.get(r, c) } else { g.get(2 * rows - 1 - r, c) }
    }))
}

fn mirror_quad(g: &Grid) -> TransformResult<Grid> {
    mirror_extend_vertical(&mirror_extend_horizontal(g)?)
}

const NEIGHBORS4: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Values of the 4-neighbours of `(r, c)`; `None` outside the grid.
pub(crate) fn neighbors4(g: &Grid, r: usize, c: usize) -> [Option<Cell>; 4] {
    NEIGHBORS4.map(|(dr, dc)| g.get_signed(r as isize + dr, c as isize + dc))
}

/// Background cells touching a colored cell take the neighbours' majority color.
pub(crate) fn dilate(g: &Grid) -> Grid {
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        let v = g.get(r, c);
        if v != BACKGROUND {
            return v;
        }
        let mut hist = BTreeMap::new();
        for n in neighbors4(g, r, c).into_iter().flatten() {
            if n != BACKGROUND {
                *hist.entry(n).or_insert(0usize) += 1;
            }
        }
        most_frequent(hist).unwrap_or(BACKGROUND)
    })
}

/// Colored cells touching background (or the edge) are cleared.
pub(crate) fn erode(g: &Grid) -> Grid {
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        let v = g.get(r, c);
        let exposed = neighbors4(g, r, c)
            .iter()
            .any(|n| n.is_none_or(|n| n == BACKGROUND));
        if exposed { BACKGROUND } else { v }
    })
}

/// Keep only the boundary cells of each colored region.
pub(crate) fn outline(g: &Grid) -> Grid {
    Grid::from_fn(g.rows(), g.cols(), |r, c| {
        let v = g.get(r, c);
        if v == BACKGROUND {
            return v;
        }
        let exposed = neighbors4(g, r, c)
            .iter()
            .any(|n| n.is_none_or(|n| n != v));
        if exposed { v } else { BACKGROUND }
    })
}

pub(crate) fn largest(objects: &[GridObject]) -> Option<&GridObject> {
    objects
        .iter()
        .fold(None, |best: Option<&GridObject>, o| match best {
            Some(b) if b.size() >= o.size() => Some(b),
            _ => Some(o),
        })
}

pub(crate) fn smallest(objects: &[GridObject]) -> Option<&GridObject> {
    objects
        .iter()
        .fold(None, |best: Option<&GridObject>, o| match best {
            Some(b) if b.size() <= o.size() => Some(b),
            _ => Some(o),
        })
}

fn keep_object(g: &Grid, obj: Option<&GridObject>) -> Grid {
    let Some(obj) = obj else {
        return g.clone();
    };
    let mut out = Grid::filled(g.rows(), g.cols(), BACKGROUND);
    for &(r, c) in &obj.cells {
        out = out.with_cell(r, c, g.get(r, c));
    }
    out
}

pub(crate) fn crop_to_content(g: &Grid) -> TransformResult<Grid> {
    let bbox = g
        .content_bbox()
        .ok_or_else(|| not_applicable("cropToContent", "grid has no content"))?;
    g.extract(bbox)
        .map_err(|e| not_applicable("cropToContent", e.to_string()))
}

/// Zhang-Suen thinning of the foreground; surviving cells keep their color.
pub(crate) fn skeletonize(g: &Grid) -> Grid {
    let (rows, cols) = g.dims();
    let mut mask: Vec<bool> = g.cells().iter().map(|&v| v != BACKGROUND).collect();
    let at = |mask: &[bool], r: isize, c: isize| -> u8 {
        if r < 0 || c < 0 || r as usize >= rows || c as usize >= cols {
            0
        } else {
            u8::from(mask[r as usize * cols + c as usize])
        }
    };

    loop {
        let mut changed = false;
        for step in 0..2 {
            let mut remove = Vec::new();
            for r in 0..rows {
                for c in 0..cols {
                    if !mask[r * cols + c] {
                        continue;
                    }
                    let (ri, ci) = (r as isize, c as isize);
                    // P2..P9 clockwise from north.
                    let p = [
                        at(&mask, ri - 1, ci),
                        at(&mask, ri - 1, ci + 1),
                        at(&mask, ri, ci + 1),
                        at(&mask, ri + 1, ci + 1),
                        at(&mask, ri + 1, ci),
                        at(&mask, ri + 1, ci - 1),
                        at(&mask, ri, ci - 1),
                        at(&mask, ri - 1, ci - 1),
                    ];
                    let b: u8 = p.iter().sum();
                    let a = (0..8).filter(|&i| p[i] == 0 && p[(i + 1) % 8] == 1).count();
                    if !(2..=6).contains(&b) || a != 1 {
                        continue;
                    }
                    let (p2, p4, p6, p8) = (p[0], p[2], p[4], p[6]);
                    let ok = if step == 0 {
                        p2 * p4 * p6 == 0 && p4 * p6 * p8 == 0
                    } else {
                        p2 * p4 * p8 == 0 && p2 * p6 * p8 == 0
                    };
                    if ok {
                        remove.push(r * cols + c);
                    }
                }
            }
            for idx in &remove {
                mask[*idx] = false;
            }
            changed |= !remove.is_empty();
        }
        if !changed {
            break;
        }
    }

    Grid::from_fn(rows, cols, |r, c| {
        if mask[r * cols + c] { g.get(r, c) } else { BACKGROUND }
    })
}

/// Paint the main (or anti) diagonal's background cells with the dominant
/// foreground color.
pub(crate) fn fill_diagonal(g: &Grid, anti: bool) -> Grid {
    let Some(color) = g.majority_foreground() else {
        return g.clone();
    };
    let cols = g.cols();
    Grid::from_fn(g.rows(), cols, |r, c| {
        let on = if anti { r + c + 1 == cols } else { r == c };
        let v = g.get(r, c);
        if on && v == BACKGROUND { color } else { v }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid;

    #[test]
    fn scaling_round_trips() {
        let g = grid(&[&[1, 2], &[3, 4]]);
        let up = scale_up(&g, 2).unwrap();
        assert_eq!(up.dims(), (4, 4));
        assert_eq!(up.row(1), &[1, 1, 2, 2]);
        assert_eq!(scale_down(&up, 2).unwrap(), g);
        assert!(scale_down(&grid(&[&[1, 2, 3]]), 2).is_err());
    }

    #[test]
    fn scale_up_respects_ceiling() {
        let big = Grid::filled(200, 200, 1);
        assert!(scale_up(&big, 2).is_err());
    }

    #[test]
    fn mirror_extensions() {
        let g = grid(&[&[1, 2]]);
        assert_eq!(mirror_extend_horizontal(&g).unwrap().to_rows(), vec![vec![1, 2, 2, 1]]);
        let q = mirror_quad(&grid(&[&[1, 0], &[0, 2]])).unwrap();
        assert_eq!(q.dims(), (4, 4));
        assert!(q.is_symmetric_horizontal());
        assert!(q.is_symmetric_vertical());
    }

    #[test]
    fn morphology() {
        let g = grid(&[&[0, 0, 0], &[0, 3, 0], &[0, 0, 0]]);
        let d = dilate(&g);
        assert_eq!(d.to_rows(), vec![vec![0, 3, 0], vec![3, 3, 3], vec![0, 3, 0]]);
        let e = erode(&d);
        assert_eq!(e.foreground_count(), 1);
        assert_eq!(e.get(1, 1), 3);

        let block = Grid::filled(3, 3, 5);
        let o = outline(&block);
        assert_eq!(o.get(1, 1), BACKGROUND);
        assert_eq!(o.get(0, 0), 5);
    }

    #[test]
    fn keeps_largest_object() {
        let g = grid(&[&[1, 1, 0], &[0, 0, 2], &[0, 0, 0]]);
        let reg_out = keep_object(&g, largest(&g.objects()));
        assert_eq!(reg_out.to_rows(), vec![vec![1, 1, 0], vec![0, 0, 0], vec![0, 0, 0]]);
        let small = keep_object(&g, smallest(&g.objects()));
        assert_eq!(small.foreground_count(), 1);
    }

    #[test]
    fn crop_to_content_trims_background() {
        let g = grid(&[&[0, 0, 0], &[0, 4, 4], &[0, 0, 0]]);
        assert_eq!(crop_to_content(&g).unwrap().to_rows(), vec![vec![4, 4]]);
        assert!(crop_to_content(&Grid::filled(2, 2, 0)).is_err());
    }

    #[test]
    fn skeleton_thins_thick_bar() {
        let g = Grid::from_fn(5, 7, |r, c| u8::from((1..=3).contains(&r) && (1..=5).contains(&c)) * 2);
        let s = skeletonize(&g);
        assert!(s.foreground_count() < g.foreground_count());
        assert!(s.foreground_count() > 0);
        assert!(s.cells().iter().all(|&v| v == 0 || v == 2));
    }

    #[test]
    fn diagonal_fill() {
        let g = grid(&[&[3, 0, 0], &[0, 0, 0], &[0, 0, 0]]);
        assert_eq!(fill_diagonal(&g, false).to_rows(), vec![vec![3, 0, 0], vec![0, 3, 0], vec![0, 0, 3]]);
        assert_eq!(fill_diagonal(&g, true).get(2, 0), 3);
    }
}
