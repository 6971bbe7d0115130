//! Constants used in the deploy scripts

use std::time::Duration;

/// Default RPC endpoint
pub const DEFAULT_RPC: &str = "https://testnet-rpc.monad.xyz";

/// Retries after the first submission attempt
pub const DEFAULT_SUBMIT_RETRIES: u32 = 3;

pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

/// How long to wait for a receipt before reporting the action as pending
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between two receipt lookups
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Below this balance (0.01 native unit) the runner warns before submitting anything
pub const DEFAULT_MIN_BALANCE_WEI: u128 = 10_000_000_000_000_000;

/// Human readable names of the chains we usually deploy to
pub const KNOWN_NETWORKS: &[(u64, &str)] = &[
    (1, "mainnet"),
    (10, "optimism"),
    (137, "polygon"),
    (8453, "base"),
    (10143, "monad-testnet"),
    (31337, "hardhat"),
    (42161, "arbitrum"),
    (84532, "base-sepolia"),
    (421614, "arbitrum-sepolia"),
    (11155111, "sepolia"),
];

/// Name of a chain id, "unknown" when not listed
pub fn network_name(chain_id: u64) -> &'static str {
    KNOWN_NETWORKS
        .iter()
        .find(|(id, _)| *id == chain_id)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}
