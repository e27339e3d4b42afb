//! Client for the cross-chain balance aggregation service.
//!
//! The service sits behind a single URL independent of chain. Every method
//! is one round-trip; gating policy lives in [`crate::gate`].

use crate::rpc::JsonRpcClient;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use lib::cab::*;
use lib::{AggregatedBalance, CabError, ChainId, TokenSymbol};
use tracing::info;

#[async_trait]
pub trait CabApi: Send + Sync {
    /// Register `tokens` for aggregation. Re-enabling is a no-op.
    async fn enable_tokens(&self, params: EnableTokensParams) -> Result<(), CabError>;

    async fn enabled_chains(&self, account: Address) -> Result<Vec<ChainId>, CabError>;

    async fn balance(
        &self,
        account: Address,
        tokens: &[TokenSymbol],
    ) -> Result<AggregatedBalance, CabError>;

    async fn prepare_user_operation(
        &self,
        params: PrepareUserOperationParams,
    ) -> Result<PrepareUserOperationResult, CabError>;

    async fn send_user_operation(&self, params: SendUserOperationParams)
        -> Result<B256, CabError>;
}

#[derive(Debug)]
pub struct CabClient {
    rpc: JsonRpcClient,
}

impl CabClient {
    pub fn new(rpc: JsonRpcClient) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl CabApi for CabClient {
    async fn enable_tokens(&self, params: EnableTokensParams) -> Result<(), CabError> {
        let result: EnableTokensResult = self.rpc.request(CAB_ENABLE_TOKENS, [params]).await?;
        info!("enable tokens acknowledged (enabled={})", result.enabled);
        Ok(())
    }

    async fn enabled_chains(&self, account: Address) -> Result<Vec<ChainId>, CabError> {
        let result: EnabledChainsResult = self
            .rpc
            .request(CAB_GET_ENABLED_CHAINS, [AccountParams { account }])
            .await?;
        Ok(result.enabled_chains)
    }

    async fn balance(
        &self,
        account: Address,
        tokens: &[TokenSymbol],
    ) -> Result<AggregatedBalance, CabError> {
        let result: BalanceResult = self
            .rpc
            .request(
                CAB_GET_BALANCE,
                [BalanceParams {
                    account,
                    tokens: tokens.to_vec(),
                }],
            )
            .await?;
        Ok(AggregatedBalance(result.balances))
    }

    async fn prepare_user_operation(
        &self,
        params: PrepareUserOperationParams,
    ) -> Result<PrepareUserOperationResult, CabError> {
        self.rpc.request(CAB_PREPARE_USER_OPERATION, [params]).await
    }

    async fn send_user_operation(
        &self,
        params: SendUserOperationParams,
    ) -> Result<B256, CabError> {
        self.rpc.request(CAB_SEND_USER_OPERATION, [params]).await
    }
}
