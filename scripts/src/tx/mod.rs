//! Everything that talks to the chain: the remote seams and the per-action steps built on them.
//!
//! `Chain` is the node (balance, estimate, call, submit, receipts) and `ContractCodec` turns a
//! resolved action into calldata. The steps the orchestrator runs for each action sit on top:
//! [`estimator::ResourceEstimator`], [`sender::RemoteExecutor`] and
//! [`waiter::ConfirmationWaiter`].

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;

use crate::errors::{ChainError, CodecError};

pub mod abi;
pub mod client;
pub mod estimator;
pub mod sender;
pub mod waiter;

/// A transaction ready to be estimated and sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAction {
    /// Sender, None for the default identity
    pub from: Option<Address>,
    /// None for a contract creation
    pub to: Option<Address>,
    pub input: Bytes,
}

/// Inclusion receipt of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub submission: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
    /// Set when the transaction created a contract
    pub contract_address: Option<Address>,
    /// gas used * effective gas price
    pub cost_paid: U256,
    /// Diagnostic payload, when the node provides one for a failure
    pub revert_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub chain_id: u64,
}

/// The remote system actions are executed against.
#[async_trait]
pub trait Chain: Send + Sync {
    /// Identity used when an action has no sender override
    fn default_sender(&self) -> Address;

    async fn network_info(&self) -> Result<NetworkInfo, ChainError>;

    async fn balance(&self, who: Address) -> Result<U256, ChainError>;

    /// Raw cost estimate. Fails if the transaction would be rejected.
    async fn estimate_cost(&self, tx: &EncodedAction) -> Result<u128, ChainError>;

    /// Execute without committing, returning the raw output
    async fn call(&self, tx: &EncodedAction) -> Result<Bytes, ChainError>;

    /// Send with the given cost limit, returning as soon as the node accepted it
    async fn submit(&self, tx: &EncodedAction, cost_limit: u128) -> Result<TxHash, ChainError>;

    /// Receipt of a submission, None while it is not included
    async fn receipt(&self, submission: TxHash) -> Result<Option<Receipt>, ChainError>;

    /// Whether the node still knows the submission, included or waiting in its pool
    async fn transaction_known(&self, submission: TxHash) -> Result<bool, ChainError>;
}

/// A positional argument after deferred references were replaced by journaled values
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Literal(serde_json::Value),
    Address(Address),
    Bytes(Bytes),
    Hash(B256),
}

/// What a resolved action does on chain
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedCall {
    Deploy { contract: String },
    Invoke {
        target: Address,
        /// Artifact name of the target, when known
        contract: Option<String>,
        method: String,
    },
}

/// An action with every input made concrete
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    pub id: String,
    pub call: ResolvedCall,
    pub args: Vec<Value>,
    pub sender: Option<Address>,
}

/// Contract metadata: how to turn a resolved action into calldata.
pub trait ContractCodec: Send + Sync {
    fn encode(&self, action: &ResolvedAction) -> Result<EncodedAction, CodecError>;
}
