//! Kinescript CLI - runs JSON program trees against the simulated planner.
//!
//! Useful for inspecting what a program would do: every motion batch the
//! simulation receives is printed, along with the program's output and its
//! final top-level bindings.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kinescript::interpreter::ast::Program;
use kinescript::interpreter::value::Value;
use kinescript::runtime::{Runtime, RuntimeConfig, SimulatedPlanner};

#[derive(Parser)]
#[command(name = "kinescript")]
#[command(about = "Deferred-dispatch runtime for a multi-robot motion scripting language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JSON program tree on the simulated planner
    Run {
        /// Path to the program (JSON syntax tree)
        program: PathBuf,

        /// Controllers available to the program
        #[arg(short, long, default_value = "robot_0")]
        controllers: Vec<String>,

        /// Controller used by motions outside any `do with` arm
        #[arg(long)]
        default_controller: Option<String>,

        /// Initial top-level bindings as a JSON object
        #[arg(long)]
        args: Option<String>,

        /// Print the dispatched motion batches
        #[arg(long)]
        trace_motions: bool,
    },

    /// Parse a program and print its statement count
    Check {
        /// Path to the program (JSON syntax tree)
        program: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            program,
            controllers,
            default_controller,
            args,
            trace_motions,
        } => {
            let text = std::fs::read_to_string(&program)
                .with_context(|| format!("reading {}", program.display()))?;
            let program = Program::from_json(&text).context("parsing program")?;

            let initial: HashMap<String, Value> = match args {
                Some(text) => {
                    let json: serde_json::Value =
                        serde_json::from_str(&text).context("parsing --args")?;
                    let object = json
                        .as_object()
                        .context("--args must be a JSON object")?;
                    object
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect()
                }
                None => HashMap::new(),
            };

            let planner = Arc::new(SimulatedPlanner::new(&controllers));
            let config = RuntimeConfig {
                default_controller: default_controller.or_else(|| controllers.first().cloned()),
                controllers,
                ..RuntimeConfig::default()
            };
            let runtime = Runtime::new(config, Arc::clone(&planner) as _);

            let outcome = runtime
                .run(&program, initial)
                .await
                .map_err(|err| anyhow::anyhow!("{err}"))?;

            for line in &outcome.printed {
                println!("{line}");
            }
            if trace_motions {
                for record in planner.dispatch_log() {
                    println!(
                        "dispatch -> {} ({} motion(s))",
                        record.controller,
                        record.actions.len()
                    );
                    for action in &record.actions {
                        println!("  {:?} to {:?}", action.kind, action.target.to_components());
                    }
                }
            }
            if outcome.terminated {
                println!("program terminated by interrupt policy");
            }
            for (name, value) in &outcome.variables {
                println!("{name} = {value}");
            }
        }

        Commands::Check { program } => {
            let text = std::fs::read_to_string(&program)
                .with_context(|| format!("reading {}", program.display()))?;
            let parsed = Program::from_json(&text).context("parsing program")?;
            println!("ok: {} top-level statement(s)", parsed.body.statements.len());
        }
    }

    Ok(())
}
