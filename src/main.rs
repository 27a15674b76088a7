use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vsm_learn::config::CONFIG_FILE;
use vsm_learn::learning::criticality::{self, SystemSignals};
use vsm_learn::learning::{SystemState, Task};
use vsm_learn::storage::{self, WorkOutcome};
use vsm_learn::{load_config, LearningLoop};

/// vsm - capability learning for an autonomous agent loop
#[derive(Parser)]
#[command(name = "vsm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Capability registry and explore/exploit scheduler", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (defaults to $VSM_HOME, ./.vsm or ~/.vsm)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory
    Init,

    /// Show current status
    Status,

    /// Show detailed statistics
    Stats,

    /// Register a capability at zero uses
    Seed {
        id: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Decide whether a cycle explores and print its decision context
    Decide {
        #[arg(long)]
        cycle: u64,
        /// 0.0 = chaos, 0.5 = viable, 1.0 = stagnant
        #[arg(long)]
        criticality: Option<f64>,
        /// JSON array of pending tasks ("-" for stdin)
        #[arg(long)]
        tasks: Option<String>,
        /// Seed the random draw for a reproducible decision
        #[arg(long)]
        seed: Option<u64>,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a cycle's work outcome and learn from it
    Record {
        #[arg(long)]
        cycle: u64,
        /// The cycle was an exploration cycle
        #[arg(long)]
        explore: bool,
        /// JSON work outcome file (stdin when omitted)
        #[arg(long)]
        input: Option<String>,
    },

    /// Run consolidation now, regardless of cadence
    Consolidate {
        /// Cycle to attribute the consolidation to (defaults to the last logged cycle)
        #[arg(long)]
        cycle: Option<u64>,
    },

    /// Prune stale low-confidence capabilities
    Prune {
        /// Current cycle (defaults to the last logged cycle)
        #[arg(long)]
        cycle: Option<u64>,
        /// Preview what would be pruned without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Show recent experiences
    Recent {
        #[arg(long, default_value = "10")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },

    /// Compute criticality from system signals
    Criticality {
        /// Errors in the last hour
        #[arg(long, default_value = "0")]
        errors: u32,
        /// The periodic trigger is missing or unhealthy
        #[arg(long)]
        scheduler_down: bool,
        /// Hours since the last completed cycle
        #[arg(long)]
        idle_hours: Option<f64>,
        #[arg(long, default_value = "0")]
        pending: u32,
    },
}

impl Commands {
    /// Commands whose stdout is machine-readable
    fn prints_json(&self) -> bool {
        match self {
            Commands::Decide { json, .. } | Commands::Recent { json, .. } => *json,
            Commands::Record { .. } | Commands::Criticality { .. } => true,
            _ => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // JSON-printing commands stay quiet unless verbose so stdout parses
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else if cli.command.prints_json() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => storage::get_data_dir()?,
    };

    let open_loop = || -> Result<LearningLoop> {
        let config = load_config(&data_dir.join(CONFIG_FILE))?;
        let oracle = config.oracle.build();
        Ok(LearningLoop::new(config, &data_dir, oracle))
    };

    match cli.command {
        Commands::Init => {
            info!("Initializing vsm");
            storage::init(&data_dir).await?;
        }
        Commands::Status => {
            storage::show_status(&data_dir).await?;
        }
        Commands::Stats => {
            storage::show_stats(&data_dir).await?;
        }
        Commands::Seed { id, description, tags } => {
            let store = storage::registry_store(&data_dir);
            let mut registry = store.load();
            let tags = tags.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
            if registry.seed_capability(&id, &description, tags) {
                registry.updated = Some(chrono::Utc::now());
                store.save(&registry)?;
                println!("Seeded capability '{}'", id);
            } else {
                println!("Capability '{}' already exists (or id is empty); nothing changed", id);
            }
        }
        Commands::Decide { cycle, criticality, tasks, seed, json } => {
            let lp = open_loop()?;
            let tasks: Vec<Task> = match tasks {
                Some(source) => read_json(Some(&source)).context("reading tasks")?,
                None => Vec::new(),
            };
            let state = SystemState { criticality };
            let mut rng: Box<dyn RngCore> = match seed {
                Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
                None => Box::new(rand::thread_rng()),
            };

            let plan = lp.plan(cycle, &state, &tasks, rng.as_mut())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!(
                    "Cycle {}: {} (rate {:.2}, criticality {:.2})",
                    plan.cycle,
                    if plan.explore { "EXPLORE" } else { "exploit" },
                    plan.rate,
                    plan.criticality
                );
                println!();
                println!("{}", plan.context.render());
            }
        }
        Commands::Record { cycle, explore, input } => {
            let lp = open_loop()?;
            let outcome: WorkOutcome = read_json(input.as_deref()).context("reading work outcome")?;
            let report = lp.complete(cycle, explore, outcome).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Consolidate { cycle } => {
            let lp = open_loop()?;
            let cycle = cycle.unwrap_or_else(|| lp.last_cycle());
            info!("Running consolidation for cycle {}", cycle);
            let report = lp.consolidate_now(cycle).await?;

            if let Some(failure) = &report.failure {
                println!("Consolidation skipped: {}", failure);
            } else {
                println!("Consolidation complete");
                println!("  New capabilities: {}", report.capabilities_added.len());
                println!("  Updated capabilities: {}", report.capabilities_updated.len());
                println!("  New anti-patterns: {}", report.anti_patterns_added.len());
                println!("  Confidence overrides: {}", report.confidence_overrides.len());
                if let Some(insights) = &report.insights {
                    println!("  Insight: {}", insights);
                }
            }
        }
        Commands::Prune { cycle, dry_run } => {
            let lp = open_loop()?;
            let cycle = cycle.unwrap_or_else(|| lp.last_cycle());
            let removed = lp.prune(cycle, dry_run)?;

            if dry_run {
                println!("DRY RUN: Would prune {} capabilities at cycle {}", removed.len(), cycle);
            } else {
                println!("Pruned {} capabilities at cycle {}", removed.len(), cycle);
            }
            for id in &removed {
                println!("  {}", id);
            }
        }
        Commands::Recent { limit, json } => {
            storage::show_recent(&data_dir, limit, json).await?;
        }
        Commands::Criticality { errors, scheduler_down, idle_hours, pending } => {
            let signals = SystemSignals {
                recent_errors: errors,
                scheduler_ok: !scheduler_down,
                idle_hours,
                pending_tasks: pending,
            };
            println!("{:.2}", criticality::compute(&signals));
        }
    }

    Ok(())
}

/// Parse JSON from a file, or stdin for `None` or `-`
fn read_json<T: DeserializeOwned>(source: Option<&str>) -> Result<T> {
    let content = match source {
        Some(path) if path != "-" => {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&content)?)
}
