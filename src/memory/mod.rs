//! Cognitive memory: seven layers of cross-task experience.
//!
//! Layers are loaded lazily on first access and flushed at task boundaries.
//! Every update is applied to a copy of all layers and swapped in only once
//! complete, so a failed update never leaves the layers half-changed.

pub mod layers;
pub mod store;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::config::MemoryConfig;
use crate::grid::Grid;
use crate::ontology::{Hierarchy, Hypothesis};
use crate::task::TrainPair;
use crate::validate::ValidationResult;

pub use layers::{
    CurriculumLayer, Episode, EpisodicLayer, ErrorLayer, ErrorRecord, Fingerprint, LayerKind,
    PredictionLayer, PriorsLayer, ProceduralLayer, Procedure, SemanticLayer,
};
pub use store::{LayerStore, MemoryError, MemoryResult, SCHEMA_VERSION, StoreLock};

/// Fallback strategies returned when no fingerprint matches.
const FALLBACK_STRATEGIES: usize = 10;

/// All seven layers.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLayers {
    pub episodic: EpisodicLayer,
    pub semantic: SemanticLayer,
    pub procedural: ProceduralLayer,
    pub prediction: PredictionLayer,
    pub errors: ErrorLayer,
    pub priors: PriorsLayer,
    pub curriculum: CurriculumLayer,
}

impl MemoryLayers {
    fn fresh(config: &MemoryConfig) -> Self {
        Self {
            episodic: EpisodicLayer::default(),
            semantic: SemanticLayer::default(),
            procedural: ProceduralLayer::default(),
            prediction: PredictionLayer::default(),
            errors: ErrorLayer::default(),
            priors: PriorsLayer::default(),
            curriculum: CurriculumLayer::new(config.initial_exploration_rate),
        }
    }
}

enum Backing {
    InMemory,
    Disk {
        store: LayerStore,
        /// `None` for a read-only view.
        lock: Option<StoreLock>,
    },
}

/// One attempted hypothesis and its verdict.
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    pub hypothesis: &'a Hypothesis,
    pub result: &'a ValidationResult,
}

pub struct CognitiveMemory {
    config: MemoryConfig,
    backing: Backing,
    layers: Option<MemoryLayers>,
}

impl CognitiveMemory {
    /// A store that never touches disk.
    pub fn in_memory(config: MemoryConfig) -> Self {
        Self {
            config,
            backing: Backing::InMemory,
            layers: None,
        }
    }

    /// Open `dir` as the single writer. Fails with [`MemoryError::Locked`]
    /// while another live process holds the directory.
    pub fn open(dir: &Path, config: MemoryConfig) -> MemoryResult<Self> {
        let lock = StoreLock::acquire(dir)?;
        tracing::debug!(dir = %dir.display(), "memory store opened");
        Ok(Self {
            config,
            backing: Backing::Disk {
                store: LayerStore::new(dir),
                lock: Some(lock),
            },
            layers: None,
        })
    }

    /// Open `dir` without taking the lock. Updates stay in process; `flush`
    /// writes nothing.
    pub fn open_read_only(dir: &Path, config: MemoryConfig) -> Self {
        Self {
            config,
            backing: Backing::Disk {
                store: LayerStore::new(dir),
                lock: None,
            },
            layers: None,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.backing, Backing::Disk { lock: None, .. })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The layers, loading them on first access. A layer that fails to load
    /// is logged and starts fresh.
    pub fn layers(&mut self) -> &MemoryLayers {
        self.loaded()
    }

    fn loaded(&mut self) -> &mut MemoryLayers {
        if self.layers.is_none() {
            let layers = self.load_all();
            self.layers = Some(layers);
        }
        self.layers.get_or_insert_with(|| MemoryLayers::fresh(&self.config))
    }

    fn load_all(&self) -> MemoryLayers {
        let mut layers = MemoryLayers::fresh(&self.config);
        let Backing::Disk { store, .. } = &self.backing else {
            return layers;
        };
        fn take<T: serde::de::DeserializeOwned>(store: &LayerStore, kind: LayerKind, slot: &mut T) {
            match store.load::<T>(kind) {
                Ok(Some(value)) => *slot = value,
                Ok(None) => {}
                Err(e) => tracing::warn!(layer = %kind, error = %e, "memory layer unreadable, starting fresh"),
            }
        }
        take(store, LayerKind::Episodic, &mut layers.episodic);
        take(store, LayerKind::Semantic, &mut layers.semantic);
        take(store, LayerKind::Procedural, &mut layers.procedural);
        take(store, LayerKind::Prediction, &mut layers.prediction);
        take(store, LayerKind::Error, &mut layers.errors);
        take(store, LayerKind::Priors, &mut layers.priors);
        take(store, LayerKind::Curriculum, &mut layers.curriculum);
        tracing::debug!(
            dir = %store.dir().display(),
            episodes = layers.episodic.len(),
            tasks_seen = layers.curriculum.tasks_seen,
            "memory layers loaded"
        );
        layers
    }

    /// Record a single hypothesis outcome in all seven layers and persist.
    pub fn record_episode(
        &mut self,
        task_id: &str,
        hypothesis: &Hypothesis,
        train: &[TrainPair],
        result: &ValidationResult,
    ) -> MemoryResult<()> {
        self.record_task(task_id, train, &[Attempt { hypothesis, result }])
    }

    /// Record every attempt of one task as a single update, count the task in
    /// the curriculum, and persist once.
    pub fn record_task(
        &mut self,
        task_id: &str,
        train: &[TrainPair],
        attempts: &[Attempt<'_>],
    ) -> MemoryResult<()> {
        let fingerprint = train
            .first()
            .map(|p| Fingerprint::from_grid(&p.input))
            .unwrap_or(Fingerprint {
                rows: 0,
                cols: 0,
                unique_colors: 0,
                object_count: 0,
                density: 0.0,
            });
        let now = unix_now();
        let config = self.config.clone();

        let mut next = self.loaded().clone();
        let mut solved: Option<u32> = None;
        for attempt in attempts {
            apply_attempt(&mut next, &config, task_id, fingerprint, now, attempt);
            if attempt.result.passed {
                let total = attempt.hypothesis.complexity().total();
                solved = Some(solved.map_or(total, |s| s.min(total)));
            }
        }
        next.curriculum.record_task(solved);
        self.layers = Some(next);
        self.flush()
    }

    /// Strategy names for inputs like `input`: fingerprint matches first,
    /// otherwise the most used procedures ranked by their hierarchy prior.
    pub fn predict_likely_strategies(&mut self, input: &Grid) -> Vec<String> {
        let tolerance = self.config.fingerprint_tolerance;
        let fingerprint = Fingerprint::from_grid(input);
        let layers = self.loaded();
        let matched = layers.prediction.lookup(&fingerprint, tolerance);
        if !matched.is_empty() {
            return matched;
        }
        let mut fallback: Vec<(f64, u64, &str)> = layers
            .procedural
            .procedures
            .iter()
            .map(|(name, p)| (layers.priors.probability(p.hierarchy), p.uses, name.as_str()))
            .collect();
        fallback.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
                .then(a.2.cmp(b.2))
        });
        fallback
            .into_iter()
            .take(FALLBACK_STRATEGIES)
            .map(|(_, _, name)| name.to_string())
            .collect()
    }

    pub fn prior_probability(&mut self, hierarchy: Hierarchy) -> f64 {
        self.loaded().priors.probability(hierarchy)
    }

    /// Prior of every hierarchy, for ordering one search wave.
    pub fn priors_snapshot(&mut self) -> BTreeMap<Hierarchy, f64> {
        let priors = &self.loaded().priors;
        Hierarchy::ALL
            .into_iter()
            .map(|h| (h, priors.probability(h)))
            .collect()
    }

    pub fn exploration_rate(&mut self) -> f64 {
        self.loaded().curriculum.exploration_rate
    }

    /// Draw against the curriculum's exploration rate.
    pub fn should_explore(&mut self, rng: &mut impl Rng) -> bool {
        let rate = self.exploration_rate().clamp(0.0, 1.0);
        rng.gen_bool(rate)
    }

    /// Write every layer. A no-op for in-memory and read-only stores, and
    /// before anything was loaded.
    pub fn flush(&self) -> MemoryResult<()> {
        let Backing::Disk {
            store,
            lock: Some(_),
        } = &self.backing
        else {
            return Ok(());
        };
        let Some(layers) = &self.layers else {
            return Ok(());
        };
        store.save(LayerKind::Episodic, &layers.episodic)?;
        store.save(LayerKind::Semantic, &layers.semantic)?;
        store.save(LayerKind::Procedural, &layers.procedural)?;
        store.save(LayerKind::Prediction, &layers.prediction)?;
        store.save(LayerKind::Error, &layers.errors)?;
        store.save(LayerKind::Priors, &layers.priors)?;
        store.save(LayerKind::Curriculum, &layers.curriculum)?;
        tracing::debug!(dir = %store.dir().display(), "memory flushed");
        Ok(())
    }
}

impl std::fmt::Debug for CognitiveMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backing = match &self.backing {
            Backing::InMemory => "in-memory".to_string(),
            Backing::Disk { store, lock } => format!(
                "{}{}",
                store.dir().display(),
                if lock.is_some() { "" } else { " (read-only)" }
            ),
        };
        f.debug_struct("CognitiveMemory")
            .field("backing", &backing)
            .field("loaded", &self.layers.is_some())
            .finish()
    }
}

fn apply_attempt(
    layers: &mut MemoryLayers,
    config: &MemoryConfig,
    task_id: &str,
    fingerprint: Fingerprint,
    now: u64,
    attempt: &Attempt<'_>,
) {
    let h = attempt.hypothesis;
    let r = attempt.result;
    let name = h.qualified_name();

    layers.episodic.push(
        Episode {
            task_id: task_id.to_string(),
            hypothesis: name.clone(),
            hierarchy: h.hierarchy_label().to_string(),
            complexity: h.complexity().total(),
            accuracy: r.accuracy,
            score: r.score,
            passed: r.passed,
            fingerprint,
            recorded_at: now,
        },
        config.max_episodes,
    );
    layers
        .semantic
        .record(h.hierarchy_label(), r.passed, r.accuracy);

    let mut hierarchies: Vec<Hierarchy> = h.steps().iter().map(Hypothesis::hierarchy).collect();
    hierarchies.sort();
    hierarchies.dedup();
    for hierarchy in hierarchies {
        layers.priors.record(hierarchy, r.passed);
    }

    if r.passed {
        layers
            .procedural
            .record_success(&name, h.hierarchy(), task_id);
        layers.prediction.record(fingerprint, &name);
    } else {
        layers.errors.push(
            ErrorRecord {
                task_id: task_id.to_string(),
                hypothesis: name,
                accuracy: r.accuracy,
                message: r.execution_error.clone(),
                recorded_at: now,
            },
            config.error_capacity,
        );
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
