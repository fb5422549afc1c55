//! Seven-dimensional complexity vectors and the partition enumeration that
//! orders the hypothesis search from simplest to most complex.

use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};

/// Number of complexity dimensions.
pub const DIMENSIONS: usize = 7;

/// Smallest value any dimension takes. The floor total is therefore
/// `DIMENSIONS * MIN_PER_DIMENSION`.
pub const MIN_PER_DIMENSION: u32 = 1;

/// Lowest total complexity the search starts from.
pub const FLOOR_TOTAL: u32 = DIMENSIONS as u32 * MIN_PER_DIMENSION;

/// Dimension names, in vector order.
pub const DIMENSION_NAMES: [&str; DIMENSIONS] = [
    "structural_depth",
    "temporal_depth",
    "symmetry_rank",
    "object_cardinality",
    "chain_length",
    "abstraction_level",
    "compression_score",
];

/// Cost of a hypothesis along seven independent axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComplexityVector {
    pub structural_depth: u32,
    pub temporal_depth: u32,
    pub symmetry_rank: u32,
    pub object_cardinality: u32,
    pub chain_length: u32,
    pub abstraction_level: u32,
    pub compression_score: u32,
}

impl ComplexityVector {
    /// The simplest possible vector: every dimension at its floor.
    pub const FLOOR: Self = Self::from_array([MIN_PER_DIMENSION; DIMENSIONS]);

    pub const fn from_array(d: [u32; DIMENSIONS]) -> Self {
        Self {
            structural_depth: d[0],
            temporal_depth: d[1],
            symmetry_rank: d[2],
            object_cardinality: d[3],
            chain_length: d[4],
            abstraction_level: d[5],
            compression_score: d[6],
        }
    }

    pub const fn to_array(self) -> [u32; DIMENSIONS] {
        [
            self.structural_depth,
            self.temporal_depth,
            self.symmetry_rank,
            self.object_cardinality,
            self.chain_length,
            self.abstraction_level,
            self.compression_score,
        ]
    }

    /// Sum of all dimensions.
    pub fn total(&self) -> u32 {
        self.to_array().iter().sum()
    }

    /// Complexity of running `steps` in sequence: chain length adds up, every
    /// other dimension takes the maximum.
    pub fn chain_of<'a>(steps: impl IntoIterator<Item = &'a ComplexityVector>) -> Self {
        let mut out = [0u32; DIMENSIONS];
        let mut any = false;
        for step in steps {
            any = true;
            for (i, v) in step.to_array().into_iter().enumerate() {
                out[i] = if i == 4 { out[i] + v } else { out[i].max(v) };
            }
        }
        if any { Self::from_array(out) } else { Self::FLOOR }
    }

    /// Largest per-dimension difference to `other`, with the dimension index.
    pub fn max_jump(&self, other: &ComplexityVector) -> (usize, u32) {
        self.to_array()
            .into_iter()
            .zip(other.to_array())
            .map(|(a, b)| a.abs_diff(b))
            .enumerate()
            .fold((0, 0), |best, (i, d)| if d > best.1 { (i, d) } else { best })
    }
}

impl Default for ComplexityVector {
    fn default() -> Self {
        Self::FLOOR
    }
}

impl Index<usize> for ComplexityVector {
    type Output = u32;

    fn index(&self, i: usize) -> &u32 {
        match i {
            0 => &self.structural_depth,
            1 => &self.temporal_depth,
            2 => &self.symmetry_rank,
            3 => &self.object_cardinality,
            4 => &self.chain_length,
            5 => &self.abstraction_level,
            6 => &self.compression_score,
            _ => panic!("complexity dimension {i} out of range"),
        }
    }
}

impl fmt::Display for ComplexityVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.to_array();
        write!(
            f,
            "<{} {} {} {} {} {} {}>={}",
            d[0],
            d[1],
            d[2],
            d[3],
            d[4],
            d[5],
            d[6],
            self.total()
        )
    }
}

// ---------------------------------------------------------------------------
// Partition enumeration
// ---------------------------------------------------------------------------

/// Every way to split `total` across the seven dimensions with each dimension
/// at least [`MIN_PER_DIMENSION`].
///
/// Enumeration is lexicographic over the vector (first dimension varies
/// slowest), finite, and restartable by constructing a new iterator.
/// Totals below [`FLOOR_TOTAL`] yield nothing.
#[derive(Debug, Clone)]
pub struct Partitions {
    total: u32,
    current: Option<[u32; DIMENSIONS]>,
}

impl Partitions {
    pub fn new(total: u32) -> Self {
        let current = (total >= FLOOR_TOTAL).then(|| {
            let mut first = [MIN_PER_DIMENSION; DIMENSIONS];
            first[DIMENSIONS - 1] = total - (FLOOR_TOTAL - MIN_PER_DIMENSION);
            first
        });
        Self { total, current }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Advance `state` to the next composition in lexicographic order.
    fn advance(state: &mut [u32; DIMENSIONS]) -> bool {
        // Find the rightmost position (excluding the last) that can grow:
        // the tail after it must still have spare mass to give.
        for i in (0..DIMENSIONS - 1).rev() {
            let tail: u32 = state[i + 1..].iter().sum();
            let tail_floor = (DIMENSIONS - 1 - i) as u32 * MIN_PER_DIMENSION;
            if tail > tail_floor {
                state[i] += 1;
                let rest = tail - 1;
                for slot in state.iter_mut().take(DIMENSIONS - 1).skip(i + 1) {
                    *slot = MIN_PER_DIMENSION;
                }
                state[DIMENSIONS - 1] = rest - (DIMENSIONS - 2 - i) as u32 * MIN_PER_DIMENSION;
                return true;
            }
        }
        false
    }
}

impl Iterator for Partitions {
    type Item = ComplexityVector;

    fn next(&mut self) -> Option<ComplexityVector> {
        let state = self.current?;
        let mut next = state;
        self.current = Self::advance(&mut next).then_some(next);
        Some(ComplexityVector::from_array(state))
    }
}

/// Number of partitions at `total`: C(total - 1, 6) for a floor of one.
pub fn partition_count(total: u32) -> u64 {
    if total < FLOOR_TOTAL {
        return 0;
    }
    let n = u64::from(total - FLOOR_TOTAL) + (DIMENSIONS as u64 - 1);
    let k = DIMENSIONS as u64 - 1;
    (0..k).fold(1u64, |acc, i| acc * (n - i) / (i + 1))
}
