//! Definitions of CLI arguments and commands for deploy scripts

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    commands::{deploy_contract, plan_graph, run_graph, show_journal},
    config::RunnerConfig,
    errors::ScriptError,
};

/// Declarative, resumable contract deployments
#[derive(Parser)]
pub struct Cli {
    #[command(flatten)]
    pub config: RunnerConfig,

    /// The command to run
    #[command(subcommand)]
    pub command: Command,
}

/// The possible CLI commands
#[derive(Subcommand)]
pub enum Command {
    /// Execute a graph file, resuming from its journal
    Run(RunArgs),
    /// Print the execution order of a graph file without touching the chain
    Plan(PlanArgs),
    /// Deploy a single contract from the artifacts directory
    Deploy(DeployArgs),
    /// Print the journal of a run, or list the known runs
    Journal(JournalArgs),
}

impl Command {
    /// Run the command
    pub async fn run(
        self,
        config: &RunnerConfig,
        cancel: CancellationToken,
    ) -> Result<(), ScriptError> {
        match self {
            Command::Run(args) => {
                info!("Running graph {}...", args.graph.display());
                run_graph(config, args, cancel).await
            }
            Command::Plan(args) => plan_graph(args),
            Command::Deploy(args) => {
                info!("Deploying {}...", args.contract);
                deploy_contract(config, args, cancel).await
            }
            Command::Journal(args) => show_journal(config, args),
        }
    }
}

/// Execute a graph
#[derive(Args)]
pub struct RunArgs {
    /// Path of the YAML graph declaration
    pub graph: PathBuf,
    /// Use this journal instead of the one derived from the graph and chain
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Plan a graph
#[derive(Args)]
pub struct PlanArgs {
    /// Path of the YAML graph declaration
    pub graph: PathBuf,
}

/// Deploy one contract
#[derive(Args)]
pub struct DeployArgs {
    /// Artifact name of the contract
    pub contract: String,
    /// Constructor arguments; JSON values, anything else is taken as a string
    pub args: Vec<String>,
}

/// Inspect journals
#[derive(Args)]
pub struct JournalArgs {
    /// Run to print; lists the runs when omitted
    pub run_id: Option<String>,
}
