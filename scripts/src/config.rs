//! Runner configuration: CLI flags with environment (and `.env`) fallbacks

use std::{path::PathBuf, time::Duration};

use alloy::primitives::U256;
use clap::Args;

use crate::{
    constants::{DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY, DEFAULT_RPC},
    errors::{JournalError, ScriptError},
    journal::{open_journal, Journal, JournalBackend},
    orchestrator::OrchestratorConfig,
    tx::{abi::ArtifactCatalog, client::RpcChain, estimator::Margin, sender::RetryPolicy},
};

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct RunnerConfig {
    /// Private key of the default sender
    #[arg(short, long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub priv_key: Option<String>,

    /// Network RPC URL
    #[arg(short, long, env = "RPC_URL", default_value = DEFAULT_RPC)]
    pub rpc_url: String,

    /// Extra signer keys, for actions overriding their sender
    #[arg(long, env = "SENDER_KEYS", value_delimiter = ',', hide_env_values = true)]
    pub sender_keys: Vec<String>,

    /// Directory holding the compiled contract artifacts
    #[arg(long, env = "ARTIFACTS_DIR", default_value = "artifacts")]
    pub artifacts_dir: PathBuf,

    /// Directory holding the run journals
    #[arg(long, env = "JOURNAL_DIR", default_value = "deployments")]
    pub journal_dir: PathBuf,

    /// Journal storage
    #[arg(long, env = "JOURNAL_BACKEND", value_enum, default_value_t = JournalBackend::File)]
    pub journal_backend: JournalBackend,

    /// Safety margin applied to gas estimates, as N/D
    #[arg(long, env = "GAS_MARGIN", default_value = "120/100")]
    pub gas_margin: Margin,

    #[arg(long, env = "CONFIRMATION_TIMEOUT_SECS", default_value_t = 120)]
    pub confirmation_timeout_secs: u64,

    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Submission retries on transient errors
    #[arg(long, env = "MAX_SUBMIT_RETRIES", default_value_t = 3)]
    pub max_submit_retries: u32,

    /// Warn when the sender balance is below this many wei
    #[arg(long, env = "MIN_BALANCE_WEI", default_value_t = 10_000_000_000_000_000)]
    pub min_balance_wei: u128,

    /// Block explorer base URL, e.g. https://sepolia.etherscan.io
    #[arg(long, env = "EXPLORER_URL")]
    pub explorer_url: Option<String>,

    /// Journal reverted actions as failed instead of retrying them on the next run
    #[arg(long, env = "RECORD_REVERTS")]
    pub record_reverts: bool,
}

impl RunnerConfig {
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            margin: self.gas_margin,
            retry: RetryPolicy {
                max_retries: self.max_submit_retries,
                base_delay: DEFAULT_RETRY_BASE_DELAY,
                max_delay: DEFAULT_RETRY_MAX_DELAY,
            },
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            min_balance: U256::from(self.min_balance_wei),
            record_reverts: self.record_reverts,
        }
    }

    /// Connect to the node with the configured signers
    pub async fn connect(&self) -> Result<RpcChain, ScriptError> {
        let key = self
            .priv_key
            .as_deref()
            .ok_or_else(|| ScriptError::Config("PRIVATE_KEY is required".into()))?;
        RpcChain::connect(&self.rpc_url, key, &self.sender_keys).await
    }

    pub fn artifacts(&self) -> Result<ArtifactCatalog, ScriptError> {
        Ok(ArtifactCatalog::load(&self.artifacts_dir)?)
    }

    pub fn journal(&self, run_id: &str) -> Result<Box<dyn Journal>, JournalError> {
        open_journal(self.journal_backend, &self.journal_dir, run_id)
    }

    /// Explorer link for an address, or the address itself without an explorer
    pub fn address_link(&self, address: impl std::fmt::Display) -> String {
        self.link("address", address)
    }

    pub fn tx_link(&self, hash: impl std::fmt::Display) -> String {
        self.link("tx", hash)
    }

    fn link(&self, kind: &str, value: impl std::fmt::Display) -> String {
        match &self.explorer_url {
            Some(base) => format!("{}/{kind}/{value}", base.trim_end_matches('/')),
            None => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: RunnerConfig,
    }

    #[test]
    fn defaults_match_orchestrator_defaults() {
        let TestCli { config } = TestCli::parse_from(["test"]);
        let runner = config.orchestrator();
        let defaults = OrchestratorConfig::default();
        assert_eq!(runner.margin, defaults.margin);
        assert_eq!(runner.retry, defaults.retry);
        assert_eq!(runner.confirmation_timeout, defaults.confirmation_timeout);
        assert_eq!(runner.poll_interval, defaults.poll_interval);
        assert_eq!(runner.min_balance, defaults.min_balance);
        assert!(!runner.record_reverts);
    }

    #[test]
    fn flags_override_defaults() {
        let TestCli { config } = TestCli::parse_from([
            "test",
            "--gas-margin",
            "150/100",
            "--journal-backend",
            "redb",
            "--sender-keys",
            "0x01,0x02",
            "--record-reverts",
        ]);
        assert_eq!(config.gas_margin.apply(100), Some(150));
        assert_eq!(config.journal_backend, JournalBackend::Redb);
        assert_eq!(config.sender_keys, ["0x01", "0x02"]);
        assert!(config.orchestrator().record_reverts);
    }

    #[test]
    fn links_use_explorer_when_set() {
        let TestCli { mut config } = TestCli::parse_from(["test"]);
        assert_eq!(config.tx_link("0xabc"), "0xabc");
        config.explorer_url = Some("https://sepolia.etherscan.io/".into());
        assert_eq!(
            config.address_link("0xdef"),
            "https://sepolia.etherscan.io/address/0xdef"
        );
    }
}
