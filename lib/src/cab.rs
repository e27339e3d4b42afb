//! Wire types for the cross-chain balance (CAB) aggregation service and the
//! ERC-4337 bundler receipt.

use crate::types::*;
use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CAB_ENABLE_TOKENS: &str = "cab_enableTokens";
pub const CAB_GET_ENABLED_CHAINS: &str = "cab_getEnabledChains";
pub const CAB_GET_BALANCE: &str = "cab_getBalance";
pub const CAB_PREPARE_USER_OPERATION: &str = "cab_prepareUserOperation";
pub const CAB_SEND_USER_OPERATION: &str = "cab_sendUserOperation";
pub const ETH_GET_USER_OPERATION_RECEIPT: &str = "eth_getUserOperationReceipt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableTokensParams {
    pub account: Address,
    pub chain_id: ChainId,
    pub tokens: Vec<TokenSymbol>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnableTokensResult {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountParams {
    pub account: Address,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnabledChainsResult {
    pub enabled_chains: Vec<ChainId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceParams {
    pub account: Address,
    pub tokens: Vec<TokenSymbol>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceResult {
    pub balances: BTreeMap<TokenSymbol, U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareUserOperationParams {
    pub account: Address,
    pub chain_id: ChainId,
    pub entry_point: Address,
    pub calls: Vec<Call>,
    pub call_data: Bytes,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub repay_tokens: Vec<TokenSymbol>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareUserOperationResult {
    pub user_operation: UserOperation,
    #[serde(default)]
    pub repay_tokens_info: Vec<RepayTokenInfo>,
    #[serde(default)]
    pub sponsor_tokens_info: Vec<SponsorTokenInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendUserOperationParams {
    pub chain_id: ChainId,
    pub entry_point: Address,
    pub user_operation: UserOperation,
}

/// `eth_getUserOperationReceipt` result. Some bundlers nest the transaction
/// hash under `receipt`, others put it at the top level.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUserOperationReceipt {
    #[serde(default)]
    pub user_op_hash: Option<alloy_primitives::B256>,
    #[serde(default)]
    pub transaction_hash: Option<alloy_primitives::B256>,
    #[serde(default)]
    pub receipt: Option<RawTransactionReceipt>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub actual_gas_used: Option<U256>,
    #[serde(default)]
    pub actual_gas_cost: Option<U256>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransactionReceipt {
    #[serde(default)]
    pub transaction_hash: Option<alloy_primitives::B256>,
}
