use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleet_dispatch::config::DispatchConfig;
use fleet_dispatch::dimensions::ObjectiveMode;
use fleet_dispatch::dispatch::{run_dispatch, Planner};
use fleet_dispatch::http_store::{HttpScenarioStore, HttpStoreConfig};
use fleet_dispatch::scenario::ScenarioSnapshot;
use fleet_dispatch::solver::GuidedLocalSearch;
use tracing::info;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file; `FLEET_DISPATCH_*` variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan routes for a scenario snapshot stored on disk and print them
    Solve {
        #[arg(short, long)]
        scenario: PathBuf,

        #[arg(short, long)]
        objective: Option<Objective>,

        /// Solver time budget in seconds
        #[arg(short, long)]
        time_budget: Option<u64>,
    },
    /// Dispatch a live scenario until it completes
    Dispatch {
        #[arg(short, long)]
        scenario_id: String,

        #[arg(short, long)]
        base_url: Option<String>,

        #[arg(short, long)]
        objective: Option<Objective>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Objective {
    TotalTime,
    Makespan,
}

impl From<Objective> for ObjectiveMode {
    fn from(objective: Objective) -> Self {
        match objective {
            Objective::TotalTime => ObjectiveMode::MinTotalTime,
            Objective::Makespan => ObjectiveMode::MinMakespan,
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    dotenvy::from_filename("./.env.local").ok();

    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let config = match &cli.config {
        Some(path) => DispatchConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DispatchConfig::default(),
    };
    let mut config = config.apply_env()?;

    match cli.command {
        Commands::Solve {
            scenario,
            objective,
            time_budget,
        } => {
            if let Some(objective) = objective {
                config.objective_mode = objective.into();
            }
            if let Some(seconds) = time_budget {
                config.solver_time_budget_seconds = seconds;
            }

            let contents = std::fs::read_to_string(&scenario)
                .with_context(|| format!("reading scenario {}", scenario.display()))?;
            let snapshot: ScenarioSnapshot = serde_json::from_str(&contents)?;

            let solver = GuidedLocalSearch::new(config.search.clone());
            let plan = Planner::from_config(solver, &config).plan(&snapshot)?;
            for (vehicle, queue) in plan.queues.iter() {
                info!(vehicle, customers = ?queue.iter().collect::<Vec<_>>(), "route");
            }
            println!("{}", serde_json::to_string_pretty(&plan.solution)?);
        }
        Commands::Dispatch {
            scenario_id,
            base_url,
            objective,
        } => {
            if let Some(base_url) = base_url {
                config.base_url = base_url;
            }
            if let Some(objective) = objective {
                config.objective_mode = objective.into();
            }

            let store = HttpScenarioStore::new(HttpStoreConfig::from(&config))?;
            let solver = GuidedLocalSearch::new(config.search.clone());
            let report = run_dispatch(store, &scenario_id, &config, solver)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
