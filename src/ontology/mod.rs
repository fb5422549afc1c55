//! Hypothesis ontology: the catalog of named, pure grid transforms the search
//! draws from.
//!
//! Entries are grouped into seven [`Hierarchy`] families. Each entry carries a
//! [`ComplexityVector`] so the solver can enumerate them level by level.
//! Fixed entries come from [`Ontology::standard`]; [`Ontology::for_task`]
//! additionally fits learned entries (lookup tables, neighbour rules, ...) on a
//! task's training pairs and registers only those that are consistent.

pub mod abstraction;
pub mod border;
pub mod color;
pub mod counting;
pub mod difference;
pub mod spatial;
pub mod structural;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::complexity::ComplexityVector;
use crate::grid::{DEFAULT_MAX_DIM, Grid};
use crate::task::TrainPair;

/// Largest dimension any transform may produce.
pub const MAX_OUTPUT_DIM: usize = DEFAULT_MAX_DIM * 3;

/// Separator between steps in a chain's qualified name.
pub const CHAIN_SEPARATOR: &str = " -> ";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a single transform on a particular input.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum TransformError {
    #[error("shape mismatch: {left_rows}x{left_cols} vs {right_rows}x{right_cols}")]
    #[diagnostic(
        code(gridsynth::ontology::shape_mismatch),
        help("Binary transforms need both grids to have the same shape.")
    )]
    ShapeMismatch {
        left_rows: usize,
        left_cols: usize,
        right_rows: usize,
        right_cols: usize,
    },

    #[error("output of {rows}x{cols} exceeds the {max} cell-per-side ceiling")]
    #[diagnostic(
        code(gridsynth::ontology::too_large),
        help("The transform would grow the grid past the dimension ceiling.")
    )]
    TooLarge { rows: usize, cols: usize, max: usize },

    #[error("{transform} is not applicable: {reason}")]
    #[diagnostic(
        code(gridsynth::ontology::not_applicable),
        help("The input does not meet this transform's shape precondition; the candidate is skipped.")
    )]
    NotApplicable { transform: String, reason: String },

    #[error("chain has no steps")]
    #[diagnostic(
        code(gridsynth::ontology::empty_chain),
        help("A composite hypothesis needs at least one atomic step.")
    )]
    EmptyChain,
}

pub type TransformResult<T> = std::result::Result<T, TransformError>;

pub(crate) fn not_applicable(transform: &str, reason: impl Into<String>) -> TransformError {
    TransformError::NotApplicable {
        transform: transform.to_string(),
        reason: reason.into(),
    }
}

/// Reject output dimensions above [`MAX_OUTPUT_DIM`].
pub(crate) fn check_output_dims(rows: usize, cols: usize) -> TransformResult<()> {
    if rows > MAX_OUTPUT_DIM || cols > MAX_OUTPUT_DIM {
        return Err(TransformError::TooLarge {
            rows,
            cols,
            max: MAX_OUTPUT_DIM,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

/// The seven families of transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hierarchy {
    Structural,
    Spatial,
    Counting,
    Color,
    Difference,
    Border,
    Abstract,
}

impl Hierarchy {
    pub const ALL: [Hierarchy; 7] = [
        Self::Structural,
        Self::Spatial,
        Self::Counting,
        Self::Color,
        Self::Difference,
        Self::Border,
        Self::Abstract,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Spatial => "spatial",
            Self::Counting => "counting",
            Self::Color => "color",
            Self::Difference => "difference",
            Self::Border => "border",
            Self::Abstract => "abstract",
        }
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hierarchy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| format!("unknown hierarchy: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Transform traits
// ---------------------------------------------------------------------------

/// A pure grid → grid function.
///
/// Implementations must be deterministic and must never mutate their input.
pub trait GridTransform: Send + Sync {
    fn apply(&self, grid: &Grid) -> TransformResult<Grid>;
}

impl<F> GridTransform for F
where
    F: Fn(&Grid) -> TransformResult<Grid> + Send + Sync,
{
    fn apply(&self, grid: &Grid) -> TransformResult<Grid> {
        self(grid)
    }
}

/// A pure grid × grid → grid function (difference family).
pub trait PairTransform: Send + Sync {
    fn combine(&self, a: &Grid, b: &Grid) -> TransformResult<Grid>;
}

impl<F> PairTransform for F
where
    F: Fn(&Grid, &Grid) -> TransformResult<Grid> + Send + Sync,
{
    fn combine(&self, a: &Grid, b: &Grid) -> TransformResult<Grid> {
        self(a, b)
    }
}

// ---------------------------------------------------------------------------
// Hypothesis
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Body {
    Atomic(Arc<dyn GridTransform>),
    Chain(Vec<Hypothesis>),
}

/// A candidate explanation of a task: one ontology entry or an ordered chain
/// of entries.
#[derive(Clone)]
pub struct Hypothesis {
    name: String,
    hierarchy: Hierarchy,
    complexity: ComplexityVector,
    learned: bool,
    body: Body,
}

impl Hypothesis {
    /// Atomic hypothesis from a transform.
    pub fn atomic(
        hierarchy: Hierarchy,
        name: impl Into<String>,
        complexity: ComplexityVector,
        transform: impl GridTransform + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            hierarchy,
            complexity,
            learned: false,
            body: Body::Atomic(Arc::new(transform)),
        }
    }

    /// Composite hypothesis. Nested chains are flattened.
    pub fn chain(steps: Vec<Hypothesis>) -> Self {
        let flat: Vec<Hypothesis> = steps
            .into_iter()
            .flat_map(|s| match s.body {
                Body::Chain(inner) => inner,
                Body::Atomic(_) => vec![s],
            })
            .collect();
        let name = flat
            .iter()
            .map(Hypothesis::qualified_name)
            .collect::<Vec<_>>()
            .join(CHAIN_SEPARATOR);
        let hierarchy = flat.first().map(|s| s.hierarchy).unwrap_or(Hierarchy::Structural);
        let complexity = ComplexityVector::chain_of(flat.iter().map(|s| &s.complexity));
        let learned = flat.iter().any(|s| s.learned);
        Self {
            name,
            hierarchy,
            complexity,
            learned,
            body: Body::Chain(flat),
        }
    }

    pub(crate) fn into_learned(mut self) -> Self {
        self.learned = true;
        self
    }

    /// Local name, e.g. `gravityDown`. For chains this is the full chain name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `hierarchy:name` for atomic entries, steps joined by ` -> ` for chains.
    pub fn qualified_name(&self) -> String {
        match self.body {
            Body::Atomic(_) => format!("{}:{}", self.hierarchy, self.name),
            Body::Chain(_) => self.name.clone(),
        }
    }

    /// Hierarchy of an atomic entry, or of the first step of a chain.
    pub fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    /// `"chain"` for composites, the hierarchy name otherwise.
    pub fn hierarchy_label(&self) -> &'static str {
        if self.is_chain() {
            "chain"
        } else {
            self.hierarchy.as_str()
        }
    }

    pub fn complexity(&self) -> ComplexityVector {
        self.complexity
    }

    /// Whether any part of this hypothesis was fitted on training pairs.
    pub fn is_learned(&self) -> bool {
        self.learned
    }

    pub fn is_chain(&self) -> bool {
        matches!(self.body, Body::Chain(_))
    }

    /// Atomic steps in execution order; an atomic hypothesis is its own single step.
    pub fn steps(&self) -> &[Hypothesis] {
        match &self.body {
            Body::Chain(steps) => steps,
            Body::Atomic(_) => std::slice::from_ref(self),
        }
    }

    pub fn chain_len(&self) -> usize {
        self.steps().len()
    }

    /// Whether the hypothesis is structurally well formed: atomic entries need
    /// a name, chains need at least one step and only atomic steps.
    pub fn is_well_formed(&self) -> bool {
        match &self.body {
            Body::Atomic(_) => !self.name.is_empty(),
            Body::Chain(steps) => {
                !steps.is_empty() && steps.iter().all(|s| !s.is_chain() && s.is_well_formed())
            }
        }
    }

    /// Run the hypothesis on `grid`, threading chain steps left to right.
    pub fn apply(&self, grid: &Grid) -> TransformResult<Grid> {
        match &self.body {
            Body::Atomic(t) => t.apply(grid),
            Body::Chain(steps) => {
                let (first, rest) = steps.split_first().ok_or(TransformError::EmptyChain)?;
                rest.iter()
                    .try_fold(first.apply(grid)?, |current, step| step.apply(&current))
            }
        }
    }
}

impl fmt::Debug for Hypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hypothesis")
            .field("name", &self.qualified_name())
            .field("complexity", &self.complexity)
            .field("learned", &self.learned)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Shorthand for an atomic entry's cost. Chain length is always one.
pub(crate) const fn cost(
    structural: u32,
    temporal: u32,
    symmetry: u32,
    objects: u32,
    abstraction: u32,
    compression: u32,
) -> ComplexityVector {
    ComplexityVector::from_array([
        structural,
        temporal,
        symmetry,
        objects,
        1,
        abstraction,
        compression,
    ])
}

/// Collects entries while the ontology is being assembled.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<Hypothesis>,
}

impl Registry {
    pub(crate) fn add(
        &mut self,
        hierarchy: Hierarchy,
        name: impl Into<String>,
        complexity: ComplexityVector,
        transform: impl Fn(&Grid) -> TransformResult<Grid> + Send + Sync + 'static,
    ) {
        self.entries
            .push(Hypothesis::atomic(hierarchy, name, complexity, transform));
    }

    pub(crate) fn add_learned(
        &mut self,
        hierarchy: Hierarchy,
        name: impl Into<String>,
        complexity: ComplexityVector,
        transform: impl GridTransform + 'static,
    ) {
        self.entries.push(
            Hypothesis::atomic(hierarchy, name, complexity, transform).into_learned(),
        );
    }
}

// ---------------------------------------------------------------------------
// Ontology
// ---------------------------------------------------------------------------

/// Indexed catalog of atomic hypotheses.
#[derive(Clone)]
pub struct Ontology {
    entries: Vec<Hypothesis>,
    by_vector: HashMap<ComplexityVector, Vec<usize>>,
    by_name: HashMap<String, usize>,
}

impl Ontology {
    /// All fixed entries of the seven hierarchies.
    pub fn standard() -> Self {
        let mut reg = Registry::default();
        structural::register(&mut reg);
        spatial::register(&mut reg);
        counting::register(&mut reg);
        color::register(&mut reg);
        difference::register(&mut reg);
        border::register(&mut reg);
        abstraction::register(&mut reg);
        Self::from_entries(reg.entries)
    }

    /// Fixed entries plus learned entries fitted on `train`.
    pub fn for_task(train: &[TrainPair]) -> Self {
        let mut reg = Registry::default();
        structural::register(&mut reg);
        spatial::register(&mut reg);
        counting::register(&mut reg);
        color::register(&mut reg);
        difference::register(&mut reg);
        border::register(&mut reg);
        abstraction::register(&mut reg);
        if !train.is_empty() {
            color::learn(train, &mut reg);
            difference::learn(train, &mut reg);
            border::learn(train, &mut reg);
            abstraction::learn(train, &mut reg);
        }
        let ontology = Self::from_entries(reg.entries);
        tracing::debug!(
            entries = ontology.len(),
            learned = ontology.learned_count(),
            "ontology instantiated for task"
        );
        ontology
    }

    /// Build from a list of entries. Later duplicates of a qualified name are dropped.
    pub fn from_entries(entries: Vec<Hypothesis>) -> Self {
        let mut kept = Vec::with_capacity(entries.len());
        let mut by_name = HashMap::new();
        let mut by_vector: HashMap<ComplexityVector, Vec<usize>> = HashMap::new();
        for entry in entries {
            let qname = entry.qualified_name();
            if by_name.contains_key(&qname) {
                continue;
            }
            let idx = kept.len();
            by_name.insert(qname, idx);
            by_vector.entry(entry.complexity()).or_default().push(idx);
            kept.push(entry);
        }
        Self {
            entries: kept,
            by_vector,
            by_name,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn learned_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_learned()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hypothesis> {
        self.entries.iter()
    }

    /// Entries of one hierarchy in registration order.
    pub fn hierarchy(&self, hierarchy: Hierarchy) -> impl Iterator<Item = &Hypothesis> {
        self.entries
            .iter()
            .filter(move |e| e.hierarchy() == hierarchy)
    }

    /// Entries whose complexity equals `vector`, in registration order.
    pub fn enumerate(&self, vector: &ComplexityVector) -> impl Iterator<Item = &Hypothesis> {
        self.by_vector
            .get(vector)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|&i| &self.entries[i])
    }

    /// Entries at `vector`, stably reordered by descending `weight`.
    pub fn enumerate_weighted(
        &self,
        vector: &ComplexityVector,
        weight: impl Fn(&Hypothesis) -> f64,
    ) -> Vec<&Hypothesis> {
        let mut found: Vec<(f64, &Hypothesis)> =
            self.enumerate(vector).map(|h| (weight(h), h)).collect();
        found.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        found.into_iter().map(|(_, h)| h).collect()
    }

    /// Whether any entry sits at `vector`.
    pub fn occupies(&self, vector: &ComplexityVector) -> bool {
        self.by_vector.contains_key(vector)
    }

    /// Lowest and highest total complexity of any entry.
    pub fn total_range(&self) -> Option<(u32, u32)> {
        let totals = self.entries.iter().map(|e| e.complexity().total());
        let min = totals.clone().min()?;
        let max = totals.max()?;
        Some((min, max))
    }

    /// Look up an atomic entry by `hierarchy:name`.
    pub fn get(&self, qualified: &str) -> Option<&Hypothesis> {
        self.by_name.get(qualified).map(|&i| &self.entries[i])
    }

    /// Resolve an atomic qualified name or a ` -> `-joined chain name.
    pub fn resolve(&self, name: &str) -> Option<Hypothesis> {
        if name.contains(CHAIN_SEPARATOR) {
            let steps: Option<Vec<Hypothesis>> = name
                .split(CHAIN_SEPARATOR)
                .map(|part| self.get(part.trim()).cloned())
                .collect();
            steps.filter(|s| !s.is_empty()).map(Hypothesis::chain)
        } else {
            self.get(name).cloned()
        }
    }

    /// Number of entries per hierarchy, for capability reporting.
    pub fn count_classes(&self) -> BTreeMap<Hierarchy, usize> {
        let mut counts: BTreeMap<Hierarchy, usize> =
            Hierarchy::ALL.into_iter().map(|h| (h, 0)).collect();
        for entry in &self.entries {
            *counts.entry(entry.hierarchy()).or_insert(0) += 1;
        }
        counts
    }
}

impl fmt::Debug for Ontology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ontology")
            .field("entries", &self.entries.len())
            .field("learned", &self.learned_count())
            .finish()
    }
}

/// Whether every training pair keeps its input shape.
pub(crate) fn same_shapes(train: &[TrainPair]) -> bool {
    train.iter().all(|p| p.input.dims() == p.output.dims())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid;

    #[test]
    fn every_hierarchy_is_populated() {
        let ontology = Ontology::standard();
        let counts = ontology.count_classes();
        assert_eq!(counts.len(), 7);
        for (h, n) in &counts {
            assert!(*n > 0, "{h} has no entries");
        }
        assert_eq!(counts.values().sum::<usize>(), ontology.len());
    }

    #[test]
    fn qualified_names_are_unique() {
        let ontology = Ontology::standard();
        let mut names: Vec<String> = ontology.iter().map(Hypothesis::qualified_name).collect();
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn complexity_dimensions_stay_in_band() {
        for entry in Ontology::standard().iter() {
            let dims = entry.complexity().to_array();
            assert!(
                dims.iter().all(|&d| (1..=4).contains(&d)),
                "{} has {:?}",
                entry.qualified_name(),
                dims
            );
            assert_eq!(entry.complexity().chain_length, 1);
        }
    }

    #[test]
    fn every_fixed_entry_is_pure_and_non_mutating() {
        let samples = [
            grid(&[&[1, 0, 2], &[0, 3, 0], &[4, 0, 5]]),
            grid(&[&[0, 0, 0, 0], &[0, 1, 1, 0], &[0, 1, 1, 0], &[0, 0, 0, 0]]),
            grid(&[&[2, 2, 5, 0, 1], &[2, 0, 5, 1, 1]]),
        ];
        for entry in Ontology::standard().iter() {
            for sample in &samples {
                let before = sample.clone();
                let first = entry.apply(sample);
                let second = entry.apply(sample);
                assert_eq!(*sample, before, "{} mutated input", entry.qualified_name());
                match (first, second) {
                    (Ok(a), Ok(b)) => assert_eq!(a, b, "{} is not deterministic", entry.qualified_name()),
                    (Err(_), Err(_)) => {}
                    _ => panic!("{} is not deterministic", entry.qualified_name()),
                }
            }
        }
    }

    #[test]
    fn resolve_builds_chains() {
        let ontology = Ontology::standard();
        let chain = ontology
            .resolve("structural:flipHorizontal -> color:recolor1to2")
            .unwrap();
        assert!(chain.is_chain());
        assert_eq!(chain.chain_len(), 2);
        assert_eq!(chain.complexity().chain_length, 2);
        let out = chain.apply(&grid(&[&[1, 0]])).unwrap();
        assert_eq!(out.to_rows(), vec![vec![0, 2]]);
        assert!(ontology.resolve("structural:nope -> color:recolor1to2").is_none());
    }

    #[test]
    fn enumerate_filters_by_vector() {
        let ontology = Ontology::standard();
        let flip = ontology.get("structural:flipHorizontal").unwrap();
        let v = flip.complexity();
        assert!(ontology.enumerate(&v).any(|h| h.name() == "flipHorizontal"));
        assert!(ontology.enumerate(&v).all(|h| h.complexity() == v));
    }
}
