//! Benchmarks for ontology construction, validation and whole solves.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use gridsynth::config::SolverConfig;
use gridsynth::grid::Grid;
use gridsynth::ontology::Ontology;
use gridsynth::solver::Solver;
use gridsynth::task::{Task, TrainPair};
use gridsynth::validate::ValidationPipeline;

fn pair(input: Vec<Vec<u8>>, output: Vec<Vec<u8>>) -> TrainPair {
    TrainPair::new(Grid::new(input).unwrap(), Grid::new(output).unwrap())
}

fn gravity_train() -> Vec<TrainPair> {
    vec![
        pair(
            vec![vec![1, 0, 0], vec![0, 2, 0], vec![0, 0, 0]],
            vec![vec![0, 0, 0], vec![0, 0, 0], vec![1, 2, 0]],
        ),
        pair(
            vec![vec![0, 3, 0], vec![0, 0, 0], vec![0, 0, 4]],
            vec![vec![0, 0, 0], vec![0, 0, 0], vec![0, 3, 4]],
        ),
    ]
}

fn bench_ontology(c: &mut Criterion) {
    let train = gravity_train();
    c.bench_function("ontology_for_task", |bench| {
        bench.iter(|| black_box(Ontology::for_task(&train)))
    });
}

fn bench_validate(c: &mut Criterion) {
    let train = gravity_train();
    let ontology = Ontology::for_task(&train);
    let pipeline = ValidationPipeline::default();
    let h = ontology.get("spatial:gravityDown").cloned().unwrap();

    c.bench_function("validate_gravity", |bench| {
        bench.iter(|| black_box(pipeline.validate(&h, &train)))
    });
}

fn bench_solve(c: &mut Criterion) {
    let task = Task::new("gravity", gravity_train(), vec![]);
    let config = SolverConfig {
        exploration: false,
        ..Default::default()
    };

    c.bench_function("solve_gravity", |bench| {
        bench.iter(|| {
            let mut solver = Solver::new(config.clone()).unwrap();
            black_box(solver.solve(&task).unwrap())
        })
    });
}

criterion_group!(benches, bench_ontology, bench_validate, bench_solve);
criterion_main!(benches);
