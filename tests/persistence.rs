//! Tests that cognitive memory survives solver restarts.

use gridsynth::config::SolverConfig;
use gridsynth::error::SynthError;
use gridsynth::grid::{Cell, Grid};
use gridsynth::memory::{CognitiveMemory, LayerKind, MemoryError};
use gridsynth::solver::{SolutionSource, Solver};
use gridsynth::task::{Task, TestPair, TrainPair};

fn g(rows: &[&[Cell]]) -> Grid {
    Grid::new(rows.iter().map(|r| r.to_vec()).collect()).unwrap()
}

fn persistent_config(dir: &std::path::Path) -> SolverConfig {
    SolverConfig {
        exploration: false,
        memory_dir: Some(dir.to_path_buf()),
        ..Default::default()
    }
}

fn swap_task(id: &str) -> Task {
    Task::new(
        id,
        vec![
            TrainPair::new(g(&[&[1, 2], &[0, 1]]), g(&[&[2, 1], &[0, 2]])),
            TrainPair::new(g(&[&[2, 2, 1]]), g(&[&[1, 1, 2]])),
        ],
        vec![TestPair {
            input: g(&[&[1, 0, 2]]),
            output: Some(g(&[&[2, 0, 1]])),
        }],
    )
}

#[test]
fn memory_survives_restart_and_guides_next_solve() {
    let dir = tempfile::TempDir::new().unwrap();

    let first_strategy = {
        let mut solver = Solver::new(persistent_config(dir.path())).unwrap();
        let result = solver.solve(&swap_task("first")).unwrap();
        result.solution().expect("solved").strategy.name.clone()
    };

    {
        let mut memory = CognitiveMemory::open(dir.path(), Default::default()).unwrap();
        let layers = memory.layers();
        assert_eq!(layers.curriculum.tasks_seen, 1);
        assert_eq!(layers.curriculum.tasks_solved, 1);
        assert!(layers.procedural.procedures.contains_key(&first_strategy));
        assert!(!layers.episodic.is_empty());
    }

    let mut solver = Solver::new(persistent_config(dir.path())).unwrap();
    let result = solver.solve(&swap_task("second")).unwrap();
    let solution = result.solution().expect("solved again");
    assert_eq!(solution.source, SolutionSource::Memory);
    assert_eq!(solution.strategy.name, first_strategy);
    assert_eq!(solver.memory_mut().layers().curriculum.tasks_seen, 2);
}

#[test]
fn flush_writes_every_layer_without_temp_files() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let mut solver = Solver::new(persistent_config(dir.path())).unwrap();
        solver.solve(&swap_task("t")).unwrap();
    }
    for kind in LayerKind::ALL {
        let path = dir.path().join(kind.file_name());
        assert!(path.exists(), "missing {}", path.display());
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["layer"], kind.as_str());
    }
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    // Released when the solver dropped.
    assert!(!dir.path().join("memory.lock").exists());
}

#[cfg(unix)]
#[test]
fn second_writer_is_refused_while_first_is_alive() {
    let dir = tempfile::TempDir::new().unwrap();
    let _holder = Solver::new(persistent_config(dir.path())).unwrap();
    let err = Solver::new(persistent_config(dir.path())).unwrap_err();
    assert!(matches!(err, SynthError::Memory(MemoryError::Locked { .. })));

    // Readers do not need the lock.
    let mut reader = CognitiveMemory::open_read_only(dir.path(), Default::default());
    assert!(reader.is_read_only());
    assert_eq!(reader.layers().curriculum.tasks_seen, 0);
}

#[test]
fn corrupt_layer_starts_fresh_and_is_rewritten() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join(LayerKind::Priors.file_name()), "{ not json").unwrap();

    let mut solver = Solver::new(persistent_config(dir.path())).unwrap();
    assert!(solver.solve(&swap_task("t")).unwrap().is_success());
    drop(solver);

    let text = std::fs::read_to_string(dir.path().join(LayerKind::Priors.file_name())).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["layer"], "priors");
}

#[test]
fn read_only_view_never_writes() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut memory = CognitiveMemory::open_read_only(dir.path(), Default::default());
    assert_eq!(memory.layers().curriculum.tasks_seen, 0);
    memory.flush().unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
