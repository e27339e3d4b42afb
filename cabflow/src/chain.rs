use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::eth::{TransactionInput, TransactionRequest};
use alloy::transports::BoxTransport;
use alloy_primitives::aliases::U192;
use alloy_primitives::{Address, U256};
use alloy_sol_macro::sol;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use lib::CabError;
use url::Url;

sol! {
    function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
}

/// The two pieces of chain state an operation needs before it is quoted.
#[async_trait]
pub trait ChainState: Send + Sync {
    async fn is_deployed(&self, account: Address) -> Result<bool, CabError>;

    /// EntryPoint nonce for `sender` under nonce key 0.
    async fn nonce(&self, entry_point: Address, sender: Address) -> Result<U256, CabError>;
}

pub struct RpcChainState {
    url: Url,
    provider: RootProvider<BoxTransport>,
}

impl RpcChainState {
    /// HTTP provider; nothing is sent until the first query.
    pub fn new(url: Url) -> Self {
        let provider = ProviderBuilder::new().on_http(url.clone()).boxed();
        Self { url, provider }
    }

    fn transport_error(&self, e: impl std::fmt::Display) -> CabError {
        CabError::Transport {
            endpoint: self.url.to_string(),
            error: e.to_string(),
        }
    }
}

#[async_trait]
impl ChainState for RpcChainState {
    async fn is_deployed(&self, account: Address) -> Result<bool, CabError> {
        let code = self
            .provider
            .get_code_at(account)
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(!code.is_empty())
    }

    async fn nonce(&self, entry_point: Address, sender: Address) -> Result<U256, CabError> {
        let call = getNonceCall {
            sender,
            key: U192::ZERO,
        };
        let tx = TransactionRequest::default()
            .to(entry_point)
            .input(TransactionInput::new(call.abi_encode().into()));
        let bytes = self
            .provider
            .call(&tx)
            .await
            .map_err(|e| self.transport_error(e))?;
        let decoded = getNonceCall::abi_decode_returns(&bytes, true).map_err(|e| {
            CabError::MalformedResponse {
                method: "getNonce".to_string(),
                error: e.to_string(),
            }
        })?;
        Ok(decoded.nonce)
    }
}
