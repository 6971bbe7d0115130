use alloy::{
    network::{Ethereum, EthereumWallet, TransactionBuilder},
    eips::BlockId,
    primitives::{Address, Bytes, TxHash, U256},
    providers::{
        fillers::{ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller},
        Identity, Provider, ProviderBuilder, ReqwestProvider,
    },
    rpc::types::eth::TransactionRequest,
    signers::local::PrivateKeySigner,
    transports::{RpcError, TransportError},
};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, info};

use crate::{
    constants::network_name,
    errors::{ChainError, ScriptError},
    tx::{Chain, EncodedAction, NetworkInfo, Receipt},
};

/// Re-export from alloy recommend filter
type RecommendFiller =
    JoinFill<JoinFill<JoinFill<Identity, GasFiller>, NonceFiller>, ChainIdFiller>;

/// An alloy provider that signs with a local wallet
/// & interfaces with the RPC endpoint over HTTP
pub type RpcProvider = FillProvider<
    JoinFill<RecommendFiller, WalletFiller<EthereumWallet>>,
    ReqwestProvider,
    alloy::transports::http::Http<Client>,
    Ethereum,
>;

/// The chain as seen through an HTTP JSON-RPC endpoint.
///
/// The wallet holds the default signer plus any extra keys, so actions with a `from`
/// override are signed by the matching key.
#[derive(Clone)]
pub struct RpcChain {
    provider: RpcProvider,
    default_sender: Address,
}

impl RpcChain {
    /// Build the provider and check the endpoint answers
    pub async fn connect(
        rpc_url: &str,
        private_key: &str,
        extra_keys: &[String],
    ) -> Result<Self, ScriptError> {
        // Create our signers
        let signer = parse_signer(private_key)?;
        let default_sender = signer.address();
        let mut wallet = EthereumWallet::from(signer);
        for key in extra_keys {
            let extra = parse_signer(key)?;
            info!("Registered extra signer {}", extra.address());
            wallet.register_signer(extra);
        }

        let url = rpc_url
            .parse::<Url>()
            .map_err(|e| ScriptError::ClientInitialization(format!("invalid RPC url: {e}")))?;

        // Create our provider with the rpc client + signer
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(url);

        // Fetch chain id
        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| ScriptError::ClientInitialization(e.to_string()))?;

        info!("Build client on chain ID: {}", chain_id);

        Ok(Self {
            provider,
            default_sender,
        })
    }

    fn request(&self, tx: &EncodedAction) -> TransactionRequest {
        let request = TransactionRequest::default().from(tx.from.unwrap_or(self.default_sender));
        match tx.to {
            Some(to) => request.to(to).with_input(tx.input.clone()),
            None => request.with_deploy_code(tx.input.clone()),
        }
    }
}

fn parse_signer(key: &str) -> Result<PrivateKeySigner, ScriptError> {
    key.trim()
        .parse::<PrivateKeySigner>()
        .map_err(|e| ScriptError::ClientInitialization(format!("invalid private key: {e}")))
}

/// Map a node error onto what the runner can do about it
fn classify(error: TransportError) -> ChainError {
    if let RpcError::Transport(kind) = &error {
        return ChainError::Transport(kind.to_string());
    }
    classify_message(error.to_string())
}

fn classify_message(message: String) -> ChainError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") {
        ChainError::InsufficientFunds(message)
    } else if lower.contains("nonce too low")
        || lower.contains("nonce too high")
        || lower.contains("already known")
        || lower.contains("replacement transaction underpriced")
    {
        ChainError::Sequencing(message)
    } else {
        ChainError::Rejected(message)
    }
}

#[async_trait]
impl Chain for RpcChain {
    fn default_sender(&self) -> Address {
        self.default_sender
    }

    async fn network_info(&self) -> Result<NetworkInfo, ChainError> {
        let chain_id = self.provider.get_chain_id().await.map_err(classify)?;
        Ok(NetworkInfo {
            name: network_name(chain_id).to_string(),
            chain_id,
        })
    }

    async fn balance(&self, who: Address) -> Result<U256, ChainError> {
        self.provider.get_balance(who).await.map_err(classify)
    }

    async fn estimate_cost(&self, tx: &EncodedAction) -> Result<u128, ChainError> {
        self.provider
            .estimate_gas(&self.request(tx))
            .await
            .map_err(classify)
    }

    async fn call(&self, tx: &EncodedAction) -> Result<Bytes, ChainError> {
        self.provider.call(&self.request(tx)).await.map_err(classify)
    }

    async fn submit(&self, tx: &EncodedAction, cost_limit: u128) -> Result<TxHash, ChainError> {
        let request = self.request(tx).with_gas_limit(cost_limit);
        let pending_tx = self
            .provider
            .send_transaction(request)
            .await
            .map_err(classify)?;
        Ok(*pending_tx.tx_hash())
    }

    async fn receipt(&self, submission: TxHash) -> Result<Option<Receipt>, ChainError> {
        let Some(receipt) = self
            .provider
            .get_transaction_receipt(submission)
            .await
            .map_err(classify)?
        else {
            return Ok(None);
        };
        let success = receipt.status();
        let revert_reason = if success {
            None
        } else {
            self.revert_reason(submission, receipt.block_number).await
        };
        Ok(Some(Receipt {
            submission: receipt.transaction_hash,
            success,
            block_number: receipt.block_number,
            contract_address: receipt.contract_address,
            cost_paid: U256::from(receipt.gas_used) * U256::from(receipt.effective_gas_price),
            revert_reason,
        }))
    }

    async fn transaction_known(&self, submission: TxHash) -> Result<bool, ChainError> {
        let tx = self
            .provider
            .get_transaction_by_hash(submission)
            .await
            .map_err(classify)?;
        Ok(tx.is_some())
    }
}

impl RpcChain {
    /// Replay a failed transaction on the state before its block to get the revert data
    async fn revert_reason(&self, submission: TxHash, block: Option<u64>) -> Option<String> {
        let tx = match self.provider.get_transaction_by_hash(submission).await {
            Ok(Some(tx)) => tx,
            Ok(None) => return None,
            Err(e) => {
                debug!("Could not fetch {submission} to replay it: {e}");
                return None;
            }
        };
        let mut request = TransactionRequest::default()
            .from(tx.from)
            .with_value(tx.value)
            .with_input(tx.input.clone());
        request = match tx.to {
            Some(to) => request.to(to),
            None => request.with_deploy_code(tx.input),
        };
        let call = self.provider.call(&request);
        let replayed = match block {
            Some(number) => call.block(BlockId::number(number.saturating_sub(1))).await,
            None => call.await,
        };
        match replayed {
            Ok(_) => None,
            Err(e) => Some(revert_message(classify(e))),
        }
    }
}

/// Text of a node refusal, without our classification prefix
fn revert_message(error: ChainError) -> String {
    match error {
        ChainError::Rejected(message)
        | ChainError::InsufficientFunds(message)
        | ChainError::Sequencing(message)
        | ChainError::Transport(message) => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_node_messages() {
        assert!(matches!(
            classify_message("insufficient funds for gas * price + value".into()),
            ChainError::InsufficientFunds(_)
        ));
        let nonce = classify_message("nonce too low: next nonce 7, tx nonce 6".into());
        assert!(matches!(nonce, ChainError::Sequencing(_)));
        assert!(nonce.is_retryable());
        let revert = classify_message("execution reverted: merchant exists".into());
        assert!(matches!(revert, ChainError::Rejected(_)));
        assert!(!revert.is_retryable());
        assert_eq!(revert_message(revert), "execution reverted: merchant exists");
    }
}
