//! Definitions of errors that can occur while planning and executing a deployment graph

use std::{fmt, time::Duration};

use alloy::primitives::{TxHash, U256};
use thiserror::Error;

/// Structural errors in a declared action graph. Raised before any remote interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two actions share the same id
    #[error("duplicate action id: {0}")]
    DuplicateId(String),
    /// The explicit + implicit dependency relation contains a cycle
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    /// An action depends on, or references the result of, an undeclared id
    #[error("action '{action}' references unknown action '{reference}'")]
    UnknownReference { action: String, reference: String },
    /// A reference points at an action that cannot produce the requested value
    #[error("action '{action}' cannot use '{reference}': {reason}")]
    InvalidReference {
        action: String,
        reference: String,
        reason: String,
    },
}

/// Failures reported by the remote chain, classified by how the caller should react.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The node refused the request, or the action would revert
    #[error("rejected by node: {0}")]
    Rejected(String),
    /// The sender cannot pay for the action
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    /// Nonce / ordering conflicts with another pending transaction of the sender
    #[error("sequencing conflict: {0}")]
    Sequencing(String),
    /// Network level failure, the request may not have reached the node
    #[error("transport failure: {0}")]
    Transport(String),
}

impl ChainError {
    /// Whether re-sending the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Sequencing(_) | ChainError::Transport(_))
    }
}

/// Errors turning an action into the wire form the chain expects
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no artifact found for contract '{0}'")]
    UnknownContract(String),
    #[error("contract '{contract}' has no method '{method}' taking {arity} argument(s)")]
    UnknownMethod {
        contract: String,
        method: String,
        arity: usize,
    },
    #[error("expected {expected} argument(s), got {got}")]
    ArgumentCount { expected: usize, got: usize },
    #[error("invalid argument #{index}: {reason}")]
    InvalidArgument { index: usize, reason: String },
    #[error("invalid artifact {path}: {reason}")]
    Artifact { path: String, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors while asking the chain for the cost of an action
#[derive(Debug, Error)]
pub enum EstimationError {
    /// The estimate (or the pre-flight simulation) was refused
    #[error("cost estimation failed: {0}")]
    Query(#[source] ChainError),
    /// Applying the safety margin does not fit in the cost type
    #[error("cost estimate {raw} overflows once the margin is applied")]
    Overflow { raw: u128 },
}

/// Errors while handing an action to the chain
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Not worth retrying (insufficient funds, outright rejection)
    #[error("submission rejected: {0}")]
    Fatal(#[source] ChainError),
    /// A retryable error persisted through every allowed attempt
    #[error("submission failed after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: ChainError },
}

/// Errors while waiting for a submitted action to be included
#[derive(Debug, Error)]
pub enum ConfirmationError {
    /// No receipt within the deadline; the submission may still land
    #[error("no confirmation for {submission} after {}s", .waited.as_secs())]
    Timeout { submission: TxHash, waited: Duration },
    /// Included, but the remote execution failed
    #[error("{submission} reverted{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Reverted {
        submission: TxHash,
        reason: Option<String>,
        /// Fee charged for the failed execution
        cost_paid: U256,
    },
    /// The receipt could not be queried
    #[error("receipt lookup failed: {0}")]
    Chain(#[source] ChainError),
}

/// Journal storage errors
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("no journal entry for action '{0}'")]
    NotFound(String),
    #[error("action '{0}' is already journaled with a different result")]
    Conflict(String),
    #[error("journal storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an action failure, shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Graph,
    Resolution,
    Encoding,
    Estimation,
    Submission,
    Pending,
    Revert,
    Journal,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Graph => "graph",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Encoding => "encoding",
            ErrorKind::Estimation => "estimation",
            ErrorKind::Submission => "submission",
            ErrorKind::Pending => "pending",
            ErrorKind::Revert => "revert",
            ErrorKind::Journal => "journal",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Everything that can stop the orchestrator
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A deferred argument or target could not be taken from the journal
    #[error("cannot resolve input: {0}")]
    Resolution(String),
    #[error(transparent)]
    Encoding(#[from] CodecError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),
    /// A previous run journaled this action as reverted
    #[error("action reverted in a previous run ({0})")]
    PreviouslyReverted(TxHash),
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// Sent, but neither its pending marker nor its outcome could be stored
    #[error("{submission} could not be marked pending ({error}); check it before running again")]
    Untracked {
        submission: TxHash,
        #[source]
        error: JournalError,
    },
    #[error("cancelled before the action was submitted")]
    Cancelled,
}

impl ActionError {
    /// The user-facing category of this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::Graph(_) => ErrorKind::Graph,
            ActionError::Resolution(_) => ErrorKind::Resolution,
            ActionError::Encoding(_) => ErrorKind::Encoding,
            ActionError::Estimation(_) => ErrorKind::Estimation,
            ActionError::Submission(_) => ErrorKind::Submission,
            ActionError::Confirmation(ConfirmationError::Timeout { .. }) => ErrorKind::Pending,
            ActionError::Confirmation(ConfirmationError::Reverted { .. }) => ErrorKind::Revert,
            ActionError::Confirmation(ConfirmationError::Chain(_)) => ErrorKind::Pending,
            ActionError::PreviouslyReverted(_) => ErrorKind::Revert,
            ActionError::Journal(_) | ActionError::Untracked { .. } => ErrorKind::Journal,
            ActionError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// A halted run: where it stopped, why, and what is already done
#[derive(Debug, Error)]
#[error("run '{run_id}' stopped{} ({}): {error}", .action.as_deref().map(|a| format!(" at '{a}'")).unwrap_or_default(), .error.kind())]
pub struct RunError {
    pub run_id: String,
    /// None when the failure happened before any action was selected
    pub action: Option<String>,
    pub completed: Vec<String>,
    #[source]
    pub error: ActionError,
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Errors that can occur during the execution of the deploy scripts binary
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Error when creating the client
    #[error("error during client init: {0}")]
    ClientInitialization(String),
    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Error reading or parsing a graph declaration
    #[error("error loading graph {path}: {reason}")]
    GraphFile { path: String, reason: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Run(#[from] Box<RunError>),
}
