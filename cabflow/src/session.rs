//! Per-chain sessions: one smart account bound to one chain, its bundler and
//! the shared aggregation service.

use crate::account::SmartAccount;
use crate::bundler::{BundlerApi, BundlerClient};
use crate::cab::{CabApi, CabClient};
use crate::chain::{ChainState, RpcChainState};
use crate::rpc::{JsonRpcClient, REQUEST_TIMEOUT};
use crate::tokens::to_smallest_unit;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_macro::sol;
use alloy_sol_types::{SolCall, SolValue};
use lib::{CabError, Call, ChainId, TokenDeployment, TokenRegistry, TokenSymbol};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

sol! {
    struct Execution {
        address target;
        uint256 value;
        bytes callData;
    }

    function execute(bytes32 execMode, bytes executionCalldata) external payable;

    function transfer(address to, uint256 amount) external returns (bool);
}

/// ERC-7579 call type byte for a batch of executions.
const CALLTYPE_BATCH: u8 = 0x01;

/// RPC endpoint of a chain the account operates on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainEndpoint {
    pub chain_id: ChainId,
    pub rpc_url: Url,
}

/// Binds the shared account to individual chains.
pub struct SessionFactory {
    account: Arc<SmartAccount>,
    http: reqwest::Client,
    paymaster_url: Url,
    cab: Arc<dyn CabApi>,
    registry: Arc<TokenRegistry>,
}

impl SessionFactory {
    pub fn new(
        account: Arc<SmartAccount>,
        paymaster_url: Url,
        registry: Arc<TokenRegistry>,
    ) -> Result<Self, CabError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CabError::config(format!("failed to build HTTP client: {e}")))?;
        let cab = Arc::new(CabClient::new(JsonRpcClient::new(
            http.clone(),
            paymaster_url.clone(),
        )));
        Ok(Self {
            account,
            http,
            paymaster_url,
            cab,
            registry,
        })
    }

    /// Side-effect free: transport problems surface on first use.
    pub fn open_session(&self, chain: ChainEndpoint, bundler_url: Url) -> ChainSession {
        let bundler = Arc::new(BundlerClient::new(JsonRpcClient::new(
            self.http.clone(),
            bundler_url.clone(),
        )));
        let chain_state = Arc::new(RpcChainState::new(chain.rpc_url));
        ChainSession::from_parts(
            chain.chain_id,
            self.account.clone(),
            bundler_url,
            self.paymaster_url.clone(),
            self.cab.clone(),
            bundler,
            chain_state,
            self.registry.for_chain(chain.chain_id),
        )
    }
}

pub struct ChainSession {
    chain_id: ChainId,
    account: Arc<SmartAccount>,
    bundler_endpoint: Url,
    paymaster_endpoint: Url,
    cab: Arc<dyn CabApi>,
    bundler: Arc<dyn BundlerApi>,
    chain: Arc<dyn ChainState>,
    tokens: BTreeMap<TokenSymbol, TokenDeployment>,
}

impl fmt::Debug for ChainSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainSession")
            .field("chain_id", &self.chain_id)
            .field("account", &self.account)
            .field("bundler", &self.bundler_endpoint.as_str())
            .field("paymaster", &self.paymaster_endpoint.as_str())
            .field("tokens", &self.tokens.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ChainSession {
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        chain_id: ChainId,
        account: Arc<SmartAccount>,
        bundler_endpoint: Url,
        paymaster_endpoint: Url,
        cab: Arc<dyn CabApi>,
        bundler: Arc<dyn BundlerApi>,
        chain: Arc<dyn ChainState>,
        tokens: BTreeMap<TokenSymbol, TokenDeployment>,
    ) -> Self {
        Self {
            chain_id,
            account,
            bundler_endpoint,
            paymaster_endpoint,
            cab,
            bundler,
            chain,
            tokens,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn account(&self) -> &SmartAccount {
        &self.account
    }

    pub fn bundler_endpoint(&self) -> &Url {
        &self.bundler_endpoint
    }

    pub fn paymaster_endpoint(&self) -> &Url {
        &self.paymaster_endpoint
    }

    pub fn cab(&self) -> &dyn CabApi {
        self.cab.as_ref()
    }

    pub fn bundler(&self) -> &dyn BundlerApi {
        self.bundler.as_ref()
    }

    pub fn chain(&self) -> &dyn ChainState {
        self.chain.as_ref()
    }

    pub fn token(&self, symbol: &TokenSymbol) -> Option<&TokenDeployment> {
        self.tokens.get(symbol)
    }

    /// True when `address` is a registered token contract on this chain.
    pub fn is_known_token(&self, address: Address) -> bool {
        self.tokens.values().any(|t| t.address == address)
    }

    /// ERC-20 `transfer(to, amount)` on `symbol`, with `amount` given in
    /// whole-token decimal notation.
    pub fn erc20_transfer_call(
        &self,
        symbol: &TokenSymbol,
        to: Address,
        amount: &str,
    ) -> Result<Call, CabError> {
        let token = self.token(symbol).ok_or_else(|| {
            CabError::config(format!(
                "token {symbol} is not registered on chain {}",
                self.chain_id
            ))
        })?;
        let amount = to_smallest_unit(amount, token.decimals)?;
        Ok(Call {
            to: token.address,
            data: transferCall { to, amount }.abi_encode().into(),
            value: U256::ZERO,
        })
    }
}

/// Kernel `execute(mode, executionCalldata)` for `calls`.
pub fn encode_calls(calls: &[Call]) -> Result<Bytes, CabError> {
    let (mode, execution) = match calls {
        [] => {
            return Err(CabError::InvalidOperation {
                error: "no calls to execute".to_string(),
            })
        }
        [call] => {
            let mut packed = call.to.to_vec();
            packed.extend_from_slice(&call.value.to_be_bytes::<32>());
            packed.extend_from_slice(&call.data);
            (B256::ZERO, packed)
        }
        calls => {
            let mut mode = [0u8; 32];
            mode[0] = CALLTYPE_BATCH;
            let executions = calls
                .iter()
                .map(|call| Execution {
                    target: call.to,
                    value: call.value,
                    callData: call.data.clone(),
                })
                .collect::<Vec<_>>();
            (B256::from(mode), executions.abi_encode())
        }
    };
    Ok(executeCall {
        execMode: mode,
        executionCalldata: execution.into(),
    }
    .abi_encode()
    .into())
}
