//! gridsynth CLI: solve grid puzzles by complexity-ordered program synthesis.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use gridsynth::config::SolverConfig;
use gridsynth::explain::ExplainabilityEngine;
use gridsynth::grid::Grid;
use gridsynth::memory::CognitiveMemory;
use gridsynth::ontology::Ontology;
use gridsynth::solver::{SolveResult, Solver, solve_isolated_batch};
use gridsynth::task::Task;

#[derive(Parser)]
#[command(name = "gridsynth", version, about = "Grid puzzle program synthesis")]
struct Cli {
    /// Solver configuration (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of the persistent memory layers.
    #[arg(long, global = true)]
    memory_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve one task file and print the result JSON.
    Solve {
        /// Path to the task JSON.
        #[arg(long)]
        task: PathBuf,

        /// Write the result here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Last total complexity level to search.
        #[arg(long)]
        max_complexity: Option<u32>,

        /// Longest chain to try.
        #[arg(long)]
        max_chain_length: Option<usize>,

        /// Require adversarial probes to pass, not just warn.
        #[arg(long)]
        strict: bool,

        /// Approve search when the configuration requires human oversight.
        #[arg(long)]
        approve: bool,
    },

    /// Solve every task file in a directory.
    Batch {
        /// Directory containing task JSON files.
        #[arg(long)]
        dir: PathBuf,
    },

    /// Show the ontology's entry count per hierarchy.
    Ontology,

    /// Show the cell-level diff between two grid files.
    Diff {
        /// Grid JSON (array of rows).
        #[arg(long)]
        a: PathBuf,
        #[arg(long)]
        b: PathBuf,
    },

    /// Show what the memory store has learned.
    Memory,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SolverConfig::from_toml_file(path)?,
        None => SolverConfig::default(),
    };
    if cli.memory_dir.is_some() {
        config.memory_dir = cli.memory_dir.clone();
    }

    match cli.command {
        Commands::Solve {
            task,
            output,
            max_complexity,
            max_chain_length,
            strict,
            approve,
        } => {
            if let Some(n) = max_complexity {
                config.max_complexity = n;
            }
            if let Some(n) = max_chain_length {
                config.max_chain_length = n;
            }
            config.strict_counterexample |= strict;

            let task = Task::from_file(&task)?;
            let mut solver = Solver::new(config)?;
            if approve {
                solver.grant_oversight();
            }
            let result = solver.solve(&task)?;
            let json = serde_json::to_string_pretty(&result).into_diagnostic()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json).into_diagnostic()?;
                    println!("{} → {}", summary_line(&task.id, &result), path.display());
                }
                None => println!("{json}"),
            }
        }

        Commands::Batch { dir } => {
            let tasks = load_tasks(&dir)?;
            if tasks.is_empty() {
                println!("No task files in {}", dir.display());
                return Ok(());
            }
            let results: Vec<_> = if config.memory_dir.is_some() {
                // A shared store has one writer, so tasks run in order.
                let mut solver = Solver::new(config)?;
                tasks.iter().map(|t| solver.solve(t)).collect()
            } else {
                solve_isolated_batch(&config, &tasks)
            };

            let mut solved = 0usize;
            for (task, result) in tasks.iter().zip(&results) {
                match result {
                    Ok(r) => {
                        if r.is_success() {
                            solved += 1;
                        }
                        println!("{}", summary_line(&task.id, r));
                    }
                    Err(e) => println!("{:<24} invalid: {e}", task.id),
                }
            }
            println!("\nSolved {solved}/{} tasks", tasks.len());
        }

        Commands::Ontology => {
            let ontology = Ontology::standard();
            println!("Ontology entries:");
            for (hierarchy, count) in ontology.count_classes() {
                println!("  {:<14} {count:>5}", hierarchy.to_string());
            }
            println!("  {:<14} {:>5}", "total", ontology.len());
            if let Some((lo, hi)) = ontology.total_range() {
                println!("Complexity totals span {lo}..={hi}");
            }
        }

        Commands::Diff { a, b } => {
            let before = load_grid(&a)?;
            let after = load_grid(&b)?;
            let heatmap = ExplainabilityEngine::new().diff_heatmap(&before, &after);
            println!("{heatmap}");
            println!("{} of {} cells changed", heatmap.changed(), heatmap.rows * heatmap.cols);
        }

        Commands::Memory => {
            let Some(dir) = config.memory_dir.clone() else {
                miette::bail!("--memory-dir is required to inspect memory");
            };
            let mut memory = CognitiveMemory::open_read_only(&dir, config.memory.clone());
            let priors = memory.priors_snapshot();
            let layers = memory.layers();
            let c = &layers.curriculum;
            println!("Memory at {}", dir.display());
            println!(
                "  tasks: {} seen, {} solved, max solved complexity {}",
                c.tasks_seen, c.tasks_solved, c.max_solved_complexity
            );
            println!("  exploration rate: {:.3}", c.exploration_rate);
            println!("  episodes: {}, errors: {}", layers.episodic.len(), layers.errors.len());
            println!("\nPriors:");
            for (hierarchy, p) in &priors {
                println!("  {:<14} {p:.3}", hierarchy.to_string());
            }
            println!("\nTop procedures:");
            for (name, proc_) in layers.procedural.top(10) {
                println!("  {:>4}x {name}", proc_.uses);
            }
        }
    }

    Ok(())
}

fn summary_line(id: &str, result: &SolveResult) -> String {
    match result {
        SolveResult::Solved(s) => format!(
            "{id:<24} solved   {} ({} tried)",
            s.strategy.name, s.stats.strategies_tried
        ),
        SolveResult::Exhausted(f) => format!(
            "{id:<24} failed   {} ({} tried)",
            f.message, f.stats.strategies_tried
        ),
    }
}

fn load_tasks(dir: &Path) -> Result<Vec<Task>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_diagnostic()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    let mut tasks = Vec::with_capacity(paths.len());
    for path in paths {
        match Task::from_file(&path) {
            Ok(t) => tasks.push(t),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable task"),
        }
    }
    Ok(tasks)
}

fn load_grid(path: &Path) -> Result<Grid> {
    let text = std::fs::read_to_string(path).into_diagnostic()?;
    serde_json::from_str(&text).into_diagnostic()
}
