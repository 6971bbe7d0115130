use std::time::Duration;

use alloy::primitives::TxHash;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::{
    constants::DEFAULT_POLL_INTERVAL,
    errors::ConfirmationError,
    tx::{Chain, Receipt},
};

/// Polls the chain for a receipt until it shows up or a deadline passes.
#[derive(Debug, Clone)]
pub struct ConfirmationWaiter {
    poll_interval: Duration,
}

impl Default for ConfirmationWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ConfirmationWaiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Wait for `submission` to be included.
    ///
    /// A timeout does not mean the submission failed, only that its fate is unknown.
    /// Transient lookup errors are retried until the deadline.
    pub async fn await_confirmation<C: Chain + ?Sized>(
        &self,
        chain: &C,
        submission: TxHash,
        timeout: Duration,
    ) -> Result<Receipt, ConfirmationError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.check(chain, submission).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(ConfirmationError::Chain(e)) if e.is_retryable() => {
                    debug!("Receipt lookup for {submission} failed: {e}");
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConfirmationError::Timeout {
                    submission,
                    waited: timeout,
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Single non-blocking lookup: Some when included (and successful), None when unknown
    pub async fn check<C: Chain + ?Sized>(
        &self,
        chain: &C,
        submission: TxHash,
    ) -> Result<Option<Receipt>, ConfirmationError> {
        let Some(receipt) = chain
            .receipt(submission)
            .await
            .map_err(ConfirmationError::Chain)?
        else {
            return Ok(None);
        };
        if !receipt.success {
            return Err(ConfirmationError::Reverted {
                submission,
                reason: receipt.revert_reason,
                cost_paid: receipt.cost_paid,
            });
        }
        match receipt.block_number {
            Some(block) => info!("Transaction {submission} included in block {block}"),
            None => info!("Transaction {submission} included"),
        }
        Ok(Some(receipt))
    }
}
