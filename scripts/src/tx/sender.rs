use std::time::Duration;

use alloy::primitives::TxHash;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    constants::{DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY, DEFAULT_SUBMIT_RETRIES},
    errors::{ActionError, JournalError, SubmissionError},
    graph::{Action, ActionGraph, ActionKind, Arg, ResultField, Target},
    journal::{ActionResult, Journal},
    tx::{Chain, ContractCodec, EncodedAction, ResolvedAction, ResolvedCall, Value},
};

/// Bounded exponential backoff for retryable submission errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_SUBMIT_RETRIES,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retries_used + 1`: base * 2^retries_used, capped
    pub fn delay(&self, retries_used: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let multiplier = 1u128 << retries_used.min(20);
        let backoff_ms = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }
}

/// Turns a declared action into a transaction and hands it to the chain.
#[derive(Debug, Clone, Default)]
pub struct RemoteExecutor {
    retry: RetryPolicy,
}

impl RemoteExecutor {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Replace the deploy target and deferred arguments of `action` with journaled values
    pub fn resolve<J: Journal + ?Sized>(
        &self,
        graph: &ActionGraph,
        action: &Action,
        journal: &J,
    ) -> Result<ResolvedAction, ActionError> {
        let call = match &action.kind {
            ActionKind::Deploy { contract } => ResolvedCall::Deploy {
                contract: contract.clone(),
            },
            ActionKind::Invoke {
                target: Target::Address(address),
                method,
                contract,
            } => ResolvedCall::Invoke {
                target: *address,
                contract: contract.clone(),
                method: method.clone(),
            },
            ActionKind::Invoke {
                target: Target::Action(id),
                method,
                contract,
            } => {
                let deployed = graph.get(id).and_then(|target| match &target.kind {
                    ActionKind::Deploy { contract } => Some(contract.clone()),
                    ActionKind::Invoke { .. } => None,
                });
                let address = journaled(journal, id)?
                    .produced_address
                    .ok_or_else(|| missing(id, ResultField::Address))?;
                ResolvedCall::Invoke {
                    target: address,
                    contract: contract.clone().or(deployed),
                    method: method.clone(),
                }
            }
        };

        let args = action
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Literal(value) => Ok(Value::Literal(value.clone())),
                Arg::Deferred { result_of, field } => {
                    let result = journaled(journal, result_of)?;
                    match field {
                        ResultField::Address => result
                            .produced_address
                            .map(Value::Address)
                            .ok_or_else(|| missing(result_of, *field)),
                        ResultField::ReturnData => result
                            .return_data
                            .map(Value::Bytes)
                            .ok_or_else(|| missing(result_of, *field)),
                        ResultField::SubmissionRef => Ok(Value::Hash(result.submission_ref)),
                    }
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedAction {
            id: action.id.clone(),
            call,
            args,
            sender: action.sender,
        })
    }

    /// Resolve and encode `action`. Pure given the journal: same inputs, same bytes.
    pub fn prepare<J: Journal + ?Sized, K: ContractCodec + ?Sized>(
        &self,
        graph: &ActionGraph,
        action: &Action,
        journal: &J,
        codec: &K,
    ) -> Result<EncodedAction, ActionError> {
        let resolved = self.resolve(graph, action, journal)?;
        Ok(codec.encode(&resolved)?)
    }

    /// Send `tx`, retrying retryable failures with backoff. Does not wait for inclusion.
    pub async fn submit<C: Chain + ?Sized>(
        &self,
        chain: &C,
        tx: &EncodedAction,
        cost_limit: u128,
    ) -> Result<TxHash, SubmissionError> {
        let mut retries_used = 0;
        loop {
            match chain.submit(tx, cost_limit).await {
                Ok(hash) => {
                    info!("Pending transaction... {hash}");
                    return Ok(hash);
                }
                Err(e) if !e.is_retryable() => return Err(SubmissionError::Fatal(e)),
                Err(e) if retries_used >= self.retry.max_retries => {
                    return Err(SubmissionError::Exhausted {
                        attempts: retries_used + 1,
                        last: e,
                    })
                }
                Err(e) => {
                    let delay = self.retry.delay(retries_used);
                    warn!("Submission failed ({e}), retrying in {delay:?}");
                    sleep(delay).await;
                    retries_used += 1;
                }
            }
        }
    }
}

/// A confirmed journal entry for a referenced action
fn journaled<J: Journal + ?Sized>(journal: &J, id: &str) -> Result<ActionResult, ActionError> {
    match journal.get(id) {
        Ok(result) if result.is_confirmed() => Ok(result),
        Ok(_) => Err(ActionError::Resolution(format!("'{id}' did not confirm"))),
        Err(JournalError::NotFound(_)) => Err(ActionError::Resolution(format!(
            "'{id}' has no journaled result yet"
        ))),
        Err(e) => Err(e.into()),
    }
}

fn missing(id: &str, field: ResultField) -> ActionError {
    ActionError::Resolution(format!("'{id}' produced no {field:?}"))
}
