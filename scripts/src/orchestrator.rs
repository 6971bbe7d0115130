//! Runs a validated graph against the chain, one action at a time, journaling every result.
//!
//! The loop is `plan -> (replay | reconcile | estimate, submit, confirm, record)*`. Anything
//! already in the journal is replayed without touching the chain, so re-running after a crash
//! or a failure resumes at the first unfinished action.

use std::time::Duration;

use alloy::primitives::{Bytes, TxHash, U256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    constants::{DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_MIN_BALANCE_WEI, DEFAULT_POLL_INTERVAL},
    errors::{ActionError, ConfirmationError, RunError},
    graph::{Action, ActionGraph, ExecutionPlan, Planner},
    journal::{ActionResult, ActionStatus, Journal},
    tx::{
        estimator::{Margin, ResourceEstimator},
        sender::{RemoteExecutor, RetryPolicy},
        waiter::ConfirmationWaiter,
        Chain, ContractCodec, Receipt,
    },
};

/// Where an orchestrator is in its run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Planning,
    /// Working on the action at this plan position
    Executing { cursor: usize },
    Completed,
    Aborted(String),
}

/// Tunables of a run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub margin: Margin,
    pub retry: RetryPolicy,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    /// Pre-flight warning threshold for the default sender
    pub min_balance: U256,
    /// Journal reverted actions as `Failed` so later runs stop there without a remote call
    pub record_reverts: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            margin: Margin::default(),
            retry: RetryPolicy::default(),
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            min_balance: U256::from(DEFAULT_MIN_BALANCE_WEI),
            record_reverts: false,
        }
    }
}

/// Bookkeeping of the run in progress
#[derive(Debug)]
pub struct RunState {
    pub run_id: String,
    pub plan: ExecutionPlan,
    pub cursor: usize,
    completed: Vec<String>,
    replayed: Vec<String>,
    submitted: Vec<String>,
    total_cost: U256,
}

impl RunState {
    fn new(run_id: String, plan: ExecutionPlan) -> Self {
        Self {
            run_id,
            plan,
            cursor: 0,
            completed: Vec::new(),
            replayed: Vec::new(),
            submitted: Vec::new(),
            total_cost: U256::ZERO,
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    /// Every action in plan order
    pub completed: Vec<String>,
    /// Taken from the journal of an earlier run
    pub replayed: Vec<String>,
    /// Confirmed during this run
    pub submitted: Vec<String>,
    /// Cost paid by the actions confirmed during this run
    pub total_cost: U256,
}

/// What happened to a single action
enum Step {
    Replayed,
    Confirmed(ActionResult),
}

/// Composes planning, estimation, submission, confirmation and journaling.
pub struct Orchestrator<'a, C: ?Sized, K: ?Sized> {
    chain: &'a C,
    codec: &'a K,
    config: OrchestratorConfig,
    estimator: ResourceEstimator,
    executor: RemoteExecutor,
    waiter: ConfirmationWaiter,
    cancel: CancellationToken,
    state: OrchestratorState,
}

impl<'a, C, K> Orchestrator<'a, C, K>
where
    C: Chain + ?Sized,
    K: ContractCodec + ?Sized,
{
    pub fn new(chain: &'a C, codec: &'a K, config: OrchestratorConfig) -> Self {
        Self {
            chain,
            codec,
            estimator: ResourceEstimator::new(config.margin),
            executor: RemoteExecutor::new(config.retry),
            waiter: ConfirmationWaiter::new(config.poll_interval),
            config,
            cancel: CancellationToken::new(),
            state: OrchestratorState::Idle,
        }
    }

    /// Stop before the next action once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    /// Execute `graph`, resuming from whatever `journal` already holds
    pub async fn run<J: Journal + ?Sized>(
        &mut self,
        graph: &ActionGraph,
        journal: &mut J,
    ) -> Result<RunReport, Box<RunError>> {
        let run_id = journal.run_id().to_string();
        self.state = OrchestratorState::Planning;
        let plan = match Planner::plan(graph) {
            Ok(plan) => plan,
            Err(e) => {
                let run = RunState::new(run_id, ExecutionPlan::default());
                return Err(self.abort(run, None, e.into()));
            }
        };
        info!("Planned {} action(s) for run {run_id}", plan.len());

        self.preflight().await;

        let mut run = RunState::new(run_id, plan);
        while let Some(id) = run.plan.get(run.cursor).map(str::to_string) {
            self.state = OrchestratorState::Executing { cursor: run.cursor };
            match self.step(graph, journal, &id).await {
                Ok(Step::Replayed) => run.replayed.push(id.clone()),
                Ok(Step::Confirmed(result)) => {
                    run.total_cost = run.total_cost.saturating_add(result.cost_paid);
                    run.submitted.push(id.clone());
                }
                Err(e) => return Err(self.abort(run, Some(id), e)),
            }
            run.completed.push(id);
            run.cursor += 1;
        }

        self.state = OrchestratorState::Completed;
        info!(
            "Run {} completed: {} submitted, {} replayed",
            run.run_id,
            run.submitted.len(),
            run.replayed.len()
        );
        Ok(RunReport {
            run_id: run.run_id,
            completed: run.completed,
            replayed: run.replayed,
            submitted: run.submitted,
            total_cost: run.total_cost,
        })
    }

    /// Log where we are about to spend, never fails the run
    async fn preflight(&self) {
        match self.chain.network_info().await {
            Ok(network) => info!("Network: {} (chain id {})", network.name, network.chain_id),
            Err(e) => warn!("Could not fetch network info: {e}"),
        }
        let sender = self.chain.default_sender();
        match self.chain.balance(sender).await {
            Ok(balance) if balance < self.config.min_balance => warn!(
                "Balance of {sender} is {balance} wei, below the {} wei threshold",
                self.config.min_balance
            ),
            Ok(balance) => info!("Balance of {sender}: {balance} wei"),
            Err(e) => warn!("Could not fetch balance of {sender}: {e}"),
        }
    }

    async fn step<J: Journal + ?Sized>(
        &self,
        graph: &ActionGraph,
        journal: &mut J,
        id: &str,
    ) -> Result<Step, ActionError> {
        if let Some(record) = journal.lookup(id)? {
            if record.result.status == ActionStatus::Failed {
                return Err(ActionError::PreviouslyReverted(record.result.submission_ref));
            }
            info!("Skipping '{id}', already confirmed in {}", record.result.submission_ref);
            return Ok(Step::Replayed);
        }

        if self.cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }

        let action = graph
            .get(id)
            .ok_or_else(|| ActionError::Resolution(format!("'{id}' is not in the graph")))?;

        if let Some(submission) = journal.pending(id)? {
            match self.reconcile(action, journal, submission).await? {
                Some(step) => return Ok(step),
                None => info!("Executing '{id}' again"),
            }
        }

        info!("Executing '{id}'");
        let tx = self.executor.prepare(graph, action, &*journal, self.codec)?;
        let cost = self.estimator.estimate(self.chain, &tx).await?;
        let return_data = if action.is_deploy() {
            None
        } else {
            Some(self.estimator.simulate(self.chain, &tx).await?)
        };

        let submission = self.executor.submit(self.chain, &tx, cost.limit).await?;
        let marked = journal.set_pending(id, Some(submission));
        if let Err(e) = &marked {
            warn!("Could not mark {submission} as pending for '{id}': {e}");
        }

        let confirmed = self
            .waiter
            .await_confirmation(self.chain, submission, self.config.confirmation_timeout)
            .await;
        let settled = self.settle(action, journal, submission, confirmed, return_data);
        match (marked, settled) {
            // Fate unknown and nothing on disk points at the submission
            (
                Err(error),
                Err(ActionError::Confirmation(
                    ConfirmationError::Timeout { .. } | ConfirmationError::Chain(_),
                )),
            ) => Err(ActionError::Untracked { submission, error }),
            (_, settled) => settled,
        }
    }

    /// Find out what became of a submission from an earlier run. Never submits it again.
    ///
    /// None when the node no longer knows the submission: the marker is cleared and the
    /// action can be executed afresh.
    async fn reconcile<J: Journal + ?Sized>(
        &self,
        action: &Action,
        journal: &mut J,
        submission: TxHash,
    ) -> Result<Option<Step>, ActionError> {
        info!("'{}' has a pending submission {submission}, checking it", action.id);
        let confirmed = match self.waiter.check(self.chain, submission).await {
            Ok(Some(receipt)) => Ok(receipt),
            Ok(None) => {
                info!("{submission} still unknown, waiting for it");
                self.waiter
                    .await_confirmation(self.chain, submission, self.config.confirmation_timeout)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(ConfirmationError::Timeout { .. }) = &confirmed {
            let known = self
                .chain
                .transaction_known(submission)
                .await
                .map_err(ConfirmationError::Chain)?;
            if !known {
                warn!("{submission} was dropped by the node, clearing it");
                journal.set_pending(&action.id, None)?;
                return Ok(None);
            }
        }

        // The simulated output of the earlier run is gone
        self.settle(action, journal, submission, confirmed, None)
            .map(Some)
    }

    /// Journal the outcome of a confirmation attempt
    fn settle<J: Journal + ?Sized>(
        &self,
        action: &Action,
        journal: &mut J,
        submission: TxHash,
        confirmed: Result<Receipt, ConfirmationError>,
        return_data: Option<Bytes>,
    ) -> Result<Step, ActionError> {
        let receipt = match confirmed {
            Ok(receipt) => receipt,
            Err(e @ ConfirmationError::Reverted { cost_paid, .. }) => {
                if self.config.record_reverts {
                    journal.record(
                        &action.id,
                        ActionResult {
                            status: ActionStatus::Failed,
                            produced_address: None,
                            return_data: None,
                            submission_ref: submission,
                            cost_paid,
                        },
                    )?;
                } else {
                    journal.set_pending(&action.id, None)?;
                }
                return Err(e.into());
            }
            // Fate unknown: the marker stays so the next run checks instead of resubmitting
            Err(e) => return Err(e.into()),
        };

        let produced_address = if action.is_deploy() {
            if receipt.contract_address.is_none() {
                warn!("Receipt of '{}' carries no contract address", action.id);
            }
            receipt.contract_address
        } else {
            None
        };
        let result = ActionResult {
            status: ActionStatus::Confirmed,
            produced_address,
            return_data,
            submission_ref: receipt.submission,
            cost_paid: receipt.cost_paid,
        };
        journal.record(&action.id, result.clone())?;
        match result.produced_address {
            Some(address) => info!("'{}' deployed at {address}", action.id),
            None => info!("'{}' confirmed, cost {} wei", action.id, result.cost_paid),
        }
        Ok(Step::Confirmed(result))
    }

    fn abort(&mut self, run: RunState, action: Option<String>, error: ActionError) -> Box<RunError> {
        warn!(
            "Aborting run {}{}: {error}",
            run.run_id,
            action.as_deref().map(|a| format!(" at '{a}'")).unwrap_or_default()
        );
        self.state = OrchestratorState::Aborted(error.to_string());
        Box::new(RunError {
            run_id: run.run_id,
            action,
            completed: run.completed,
            error,
        })
    }
}
