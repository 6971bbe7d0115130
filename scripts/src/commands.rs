//! Implementation of the CLI commands

use alloy::primitives::U256;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    cli::{DeployArgs, JournalArgs, PlanArgs, RunArgs},
    config::RunnerConfig,
    errors::ScriptError,
    graph::{Action, ActionGraph, ActionKind, Arg, Planner},
    journal::{list_runs, ActionStatus, Journal},
    orchestrator::{Orchestrator, RunReport},
    tx::Chain,
};

/// Execute a graph file against the configured chain
pub async fn run_graph(
    config: &RunnerConfig,
    args: RunArgs,
    cancel: CancellationToken,
) -> Result<(), ScriptError> {
    let graph = ActionGraph::load(&args.graph)?;
    execute(config, &graph, args.run_id, cancel).await
}

/// Validate a graph file and print its execution order
pub fn plan_graph(args: PlanArgs) -> Result<(), ScriptError> {
    let graph = ActionGraph::load(&args.graph)?;
    let plan = Planner::plan(&graph)?;
    println!("{} v{}: {} action(s)", graph.name(), graph.version(), plan.len());
    for (position, action) in plan.actions(&graph).enumerate() {
        println!("{:>3}. {}", position + 1, describe(action));
    }
    Ok(())
}

/// Deploy one contract through a single action graph
pub async fn deploy_contract(
    config: &RunnerConfig,
    args: DeployArgs,
    cancel: CancellationToken,
) -> Result<(), ScriptError> {
    let mut graph = ActionGraph::new(format!("deploy-{}", args.contract), 1);
    graph.add_action(
        Action::deploy(args.contract.clone(), args.contract)
            .with_args(args.args.iter().map(|arg| parse_cli_arg(arg))),
    )?;
    execute(config, &graph, None, cancel).await
}

/// Print the records of a run, or the known runs
pub fn show_journal(config: &RunnerConfig, args: JournalArgs) -> Result<(), ScriptError> {
    let Some(run_id) = args.run_id else {
        let runs = list_runs(config.journal_backend, &config.journal_dir)?;
        if runs.is_empty() {
            println!("No run journaled in {}", config.journal_dir.display());
        }
        for run in runs {
            println!("{run}");
        }
        return Ok(());
    };
    let journal = config.journal(&run_id)?;
    print_journal(config, journal.as_ref())
}

async fn execute(
    config: &RunnerConfig,
    graph: &ActionGraph,
    run_id: Option<String>,
    cancel: CancellationToken,
) -> Result<(), ScriptError> {
    let chain = config.connect().await?;
    let catalog = config.artifacts()?;
    info!(
        "Loaded {} artifact(s) from {}",
        catalog.names().count(),
        config.artifacts_dir.display()
    );

    let network = chain.network_info().await?;
    let run_id = run_id.unwrap_or_else(|| graph.run_id(network.chain_id));
    let mut journal = config.journal(&run_id)?;

    let mut orchestrator =
        Orchestrator::new(&chain, &catalog, config.orchestrator()).with_cancellation(cancel);
    let outcome = orchestrator.run(graph, journal.as_mut()).await;

    print_journal(config, journal.as_ref())?;
    match outcome {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            println!();
            println!("Run {} stopped ({})", e.run_id, e.kind());
            if let Some(action) = &e.action {
                println!("  failing action: {action}");
            }
            println!("  completed: [{}]", e.completed.join(", "));
            Err(e.into())
        }
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("Run {} completed", report.run_id);
    println!("  submitted: [{}]", report.submitted.join(", "));
    println!("  replayed:  [{}]", report.replayed.join(", "));
    if report.total_cost > U256::ZERO {
        println!("  cost paid: {} wei", report.total_cost);
    }
}

fn print_journal(config: &RunnerConfig, journal: &dyn Journal) -> Result<(), ScriptError> {
    let records = journal.records()?;
    println!("Journal {} ({} record(s))", journal.run_id(), records.len());
    for record in records {
        let status = match record.result.status {
            ActionStatus::Confirmed => "confirmed",
            ActionStatus::Failed => "failed",
        };
        println!(
            "{:>3}. {} [{status}] {}",
            record.seq,
            record.action_id,
            record.recorded_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(address) = record.result.produced_address {
            println!("       address: {}", config.address_link(address));
        }
        if let Some(data) = &record.result.return_data {
            println!("       returned: {data}");
        }
        println!("       tx: {}", config.tx_link(record.result.submission_ref));
        println!("       cost: {} wei", record.result.cost_paid);
    }
    Ok(())
}

fn describe(action: &Action) -> String {
    let what = match &action.kind {
        ActionKind::Deploy { contract } => format!("deploy {contract}"),
        ActionKind::Invoke { target, method, .. } => format!("invoke {target}.{method}"),
    };
    let mut deps: Vec<&str> = Vec::new();
    for dep in action.dependencies() {
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }
    if deps.is_empty() {
        format!("{} ({what})", action.id)
    } else {
        format!("{} ({what}) after [{}]", action.id, deps.join(", "))
    }
}

/// Arrays, objects and booleans are read as JSON; everything else is passed through as a
/// string so big integers and addresses keep their exact text
fn parse_cli_arg(arg: &str) -> Arg {
    let trimmed = arg.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') || matches!(arg, "true" | "false") {
        if let Ok(value) = serde_json::from_str(arg) {
            return Arg::Literal(value);
        }
    }
    Arg::literal(arg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cli_args_keep_numbers_as_text() {
        assert_eq!(
            parse_cli_arg("1000000000000000000000000"),
            Arg::literal("1000000000000000000000000")
        );
        assert_eq!(parse_cli_arg("true"), Arg::Literal(json!(true)));
        assert_eq!(parse_cli_arg("[1, 2]"), Arg::Literal(json!([1, 2])));
        assert_eq!(parse_cli_arg("[oops"), Arg::literal("[oops"));
    }
}
