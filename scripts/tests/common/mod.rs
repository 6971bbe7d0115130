//! Scripted in-memory chain and codec shared by the integration tests

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use deploy_scripts::{
    errors::{ChainError, CodecError},
    orchestrator::OrchestratorConfig,
    tx::{
        sender::RetryPolicy, Chain, ContractCodec, EncodedAction, NetworkInfo, Receipt,
        ResolvedAction, ResolvedCall,
    },
};

pub const CHAIN_ID: u64 = 31337;

/// Cost reported for every receipt
pub const COST_PER_TX: u64 = 21_000;

#[derive(Default)]
struct State {
    estimate: u128,
    nonce: u64,
    estimates: usize,
    attempts: usize,
    submissions: Vec<(EncodedAction, u128)>,
    submit_failures: VecDeque<ChainError>,
    revert_on: Vec<String>,
    reject_estimate_on: Vec<String>,
    withhold: bool,
    withheld: HashMap<TxHash, Receipt>,
    receipts: HashMap<TxHash, Receipt>,
}

/// Chain double: every submission gets a deterministic hash, deploys a deterministic
/// address, and the receipt is available immediately unless withheld.
pub struct MockChain {
    state: Mutex<State>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                estimate: 100,
                ..Default::default()
            }),
        }
    }
}

impl MockChain {
    pub fn with_estimate(estimate: u128) -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().estimate = estimate;
        chain
    }

    /// Transactions whose input mentions `tag` revert once included
    pub fn revert_on(&self, tag: &str) {
        self.state.lock().unwrap().revert_on.push(tag.to_string());
    }

    pub fn clear_reverts(&self) {
        self.state.lock().unwrap().revert_on.clear();
    }

    /// Estimation of transactions whose input mentions `tag` is rejected
    pub fn reject_estimate_on(&self, tag: &str) {
        self.state
            .lock()
            .unwrap()
            .reject_estimate_on
            .push(tag.to_string());
    }

    /// The next submission attempts fail with these errors, in order
    pub fn fail_next_submits(&self, errors: impl IntoIterator<Item = ChainError>) {
        self.state.lock().unwrap().submit_failures.extend(errors);
    }

    /// Keep receipts of new submissions hidden until `release`
    pub fn withhold_receipts(&self) {
        self.state.lock().unwrap().withhold = true;
    }

    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.withhold = false;
        let withheld = std::mem::take(&mut state.withheld);
        state.receipts.extend(withheld);
    }

    /// The node forgets every withheld submission, as if evicted from its pool
    pub fn drop_withheld(&self) {
        let mut state = self.state.lock().unwrap();
        state.withhold = false;
        state.withheld.clear();
    }

    /// Accepted submissions
    pub fn submission_count(&self) -> usize {
        self.state.lock().unwrap().submissions.len()
    }

    /// Submission attempts, including refused ones
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn estimates(&self) -> usize {
        self.state.lock().unwrap().estimates
    }

    pub fn cost_limits(&self) -> Vec<u128> {
        let state = self.state.lock().unwrap();
        state.submissions.iter().map(|(_, limit)| *limit).collect()
    }

    pub fn submitted_inputs(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .submissions
            .iter()
            .map(|(tx, _)| String::from_utf8_lossy(&tx.input).into_owned())
            .collect()
    }

    /// Address the n-th accepted submission (1-based) deploys to
    pub fn deployed_address(nonce: u64) -> Address {
        Address::left_padding_from(&(0x1000 + nonce).to_be_bytes())
    }

    pub fn submission_hash(nonce: u64) -> TxHash {
        TxHash::left_padding_from(&nonce.to_be_bytes())
    }
}

fn mentions(tx: &EncodedAction, tags: &[String]) -> bool {
    let input = String::from_utf8_lossy(&tx.input);
    tags.iter().any(|tag| input.contains(tag.as_str()))
}

#[async_trait]
impl Chain for MockChain {
    fn default_sender(&self) -> Address {
        Address::repeat_byte(0x11)
    }

    async fn network_info(&self) -> Result<NetworkInfo, ChainError> {
        Ok(NetworkInfo {
            name: "hardhat".into(),
            chain_id: CHAIN_ID,
        })
    }

    async fn balance(&self, _who: Address) -> Result<U256, ChainError> {
        Ok(U256::from(10u64).pow(U256::from(18u64)))
    }

    async fn estimate_cost(&self, tx: &EncodedAction) -> Result<u128, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.estimates += 1;
        if mentions(tx, &state.reject_estimate_on) {
            return Err(ChainError::Rejected("execution reverted".into()));
        }
        Ok(state.estimate)
    }

    async fn call(&self, tx: &EncodedAction) -> Result<Bytes, ChainError> {
        Ok(Bytes::from(format!("out:{}", tx.input.len()).into_bytes()))
    }

    async fn submit(&self, tx: &EncodedAction, cost_limit: u128) -> Result<TxHash, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if let Some(error) = state.submit_failures.pop_front() {
            return Err(error);
        }
        state.nonce += 1;
        let nonce = state.nonce;
        let hash = Self::submission_hash(nonce);
        let success = !mentions(tx, &state.revert_on);
        let receipt = Receipt {
            submission: hash,
            success,
            block_number: Some(nonce),
            contract_address: (tx.to.is_none() && success).then(|| Self::deployed_address(nonce)),
            cost_paid: U256::from(COST_PER_TX),
            revert_reason: (!success).then(|| "mock revert".to_string()),
        };
        if state.withhold {
            state.withheld.insert(hash, receipt);
        } else {
            state.receipts.insert(hash, receipt);
        }
        state.submissions.push((tx.clone(), cost_limit));
        Ok(hash)
    }

    async fn receipt(&self, submission: TxHash) -> Result<Option<Receipt>, ChainError> {
        Ok(self.state.lock().unwrap().receipts.get(&submission).cloned())
    }

    async fn transaction_known(&self, submission: TxHash) -> Result<bool, ChainError> {
        let state = self.state.lock().unwrap();
        Ok(state.receipts.contains_key(&submission) || state.withheld.contains_key(&submission))
    }
}

/// Codec writing a readable description of the call as input, and remembering what it saw
#[derive(Default)]
pub struct TextCodec {
    seen: Mutex<Vec<ResolvedAction>>,
}

impl TextCodec {
    pub fn seen(&self, id: &str) -> Option<ResolvedAction> {
        let seen = self.seen.lock().unwrap();
        seen.iter().rev().find(|action| action.id == id).cloned()
    }
}

impl ContractCodec for TextCodec {
    fn encode(&self, action: &ResolvedAction) -> Result<EncodedAction, CodecError> {
        self.seen.lock().unwrap().push(action.clone());
        let (to, mut text) = match &action.call {
            ResolvedCall::Deploy { contract } => (None, format!("deploy {contract}")),
            ResolvedCall::Invoke { target, method, .. } => {
                (Some(*target), format!("invoke {target} {method}"))
            }
        };
        for arg in &action.args {
            text.push_str(&format!(" {arg:?}"));
        }
        Ok(EncodedAction {
            from: action.sender,
            to,
            input: Bytes::from(text.into_bytes()),
        })
    }
}

/// Defaults with timings small enough for tests
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        },
        confirmation_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    }
}
