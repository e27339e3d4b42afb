use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub type ChainId = u64;

/// Upper-cased ticker of an aggregated token, e.g. `USDC`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSymbol(String);

impl TokenSymbol {
    pub fn new(symbol: &str) -> Self {
        Self(symbol.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenSymbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let symbol = TokenSymbol::new(s);
        if symbol.0.is_empty() || !symbol.0.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("invalid token symbol: {s:?}"));
        }
        Ok(symbol)
    }
}

/// Where a token lives on one chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDeployment {
    pub address: Address,
    pub decimals: u8,
}

/// chain -> token -> deployment
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenRegistry(pub BTreeMap<ChainId, BTreeMap<TokenSymbol, TokenDeployment>>);

impl TokenRegistry {
    pub fn insert(&mut self, chain_id: ChainId, token: TokenSymbol, deployment: TokenDeployment) {
        self.0.entry(chain_id).or_default().insert(token, deployment);
    }

    pub fn get(&self, chain_id: ChainId, token: &TokenSymbol) -> Option<&TokenDeployment> {
        self.0.get(&chain_id).and_then(|tokens| tokens.get(token))
    }

    /// All tokens deployed on `chain_id`, empty if the chain is unknown.
    pub fn for_chain(&self, chain_id: ChainId) -> BTreeMap<TokenSymbol, TokenDeployment> {
        self.0.get(&chain_id).cloned().unwrap_or_default()
    }
}

/// One sub-action of a multi-call operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Tokens the account aggregates and the chains that report it enabled.
///
/// `enabled_chains` only grows: a poll that omits a previously seen chain
/// does not remove it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentState {
    pub tokens: BTreeSet<TokenSymbol>,
    pub enabled_chains: Vec<ChainId>,
}

impl EnrollmentState {
    pub fn new(tokens: impl IntoIterator<Item = TokenSymbol>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
            enabled_chains: Vec::new(),
        }
    }

    /// Merge one poll into the state. Returns chains we had seen before
    /// that this poll no longer reports.
    pub fn observe(&mut self, polled: &[ChainId]) -> Vec<ChainId> {
        for chain in polled {
            if !self.enabled_chains.contains(chain) {
                self.enabled_chains.push(*chain);
            }
        }
        self.enabled_chains
            .iter()
            .filter(|chain| !polled.contains(chain))
            .copied()
            .collect()
    }
}

/// Per-token balance across every enrolled chain, in smallest units.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregatedBalance(pub BTreeMap<TokenSymbol, U256>);

impl AggregatedBalance {
    pub fn get(&self, token: &TokenSymbol) -> U256 {
        self.0.get(token).copied().unwrap_or(U256::ZERO)
    }

    pub fn total<'a>(&self, tokens: impl IntoIterator<Item = &'a TokenSymbol>) -> U256 {
        tokens
            .into_iter()
            .fold(U256::ZERO, |acc, token| acc.saturating_add(self.get(token)))
    }
}

/// EntryPoint v0.7 user operation in its unpacked JSON-RPC form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    #[serde(default)]
    pub signature: Bytes,
}

impl UserOperation {
    /// `factory ‖ factoryData`, empty for deployed accounts.
    pub fn init_code(&self) -> Vec<u8> {
        match self.factory {
            Some(factory) => {
                let mut code = factory.to_vec();
                if let Some(data) = &self.factory_data {
                    code.extend_from_slice(data);
                }
                code
            }
            None => Vec::new(),
        }
    }

    /// `paymaster ‖ uint128 verificationGas ‖ uint128 postOpGas ‖ paymasterData`
    pub fn paymaster_and_data(&self) -> Vec<u8> {
        let Some(paymaster) = self.paymaster else {
            return Vec::new();
        };
        let mut data = paymaster.to_vec();
        data.extend_from_slice(&low_u128_bytes(
            self.paymaster_verification_gas_limit.unwrap_or_default(),
        ));
        data.extend_from_slice(&low_u128_bytes(
            self.paymaster_post_op_gas_limit.unwrap_or_default(),
        ));
        if let Some(extra) = &self.paymaster_data {
            data.extend_from_slice(extra);
        }
        data
    }

    /// verificationGasLimit << 128 | callGasLimit
    pub fn account_gas_limits(&self) -> B256 {
        pack_u128_pair(self.verification_gas_limit, self.call_gas_limit)
    }

    /// maxPriorityFeePerGas << 128 | maxFeePerGas
    pub fn gas_fees(&self) -> B256 {
        pack_u128_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas)
    }

    /// The hash the account signs, as computed by EntryPoint v0.7
    /// `getUserOpHash`. The signature field is not part of it.
    pub fn hash(&self, entry_point: Address, chain_id: ChainId) -> B256 {
        let packed = (
            self.sender,
            self.nonce,
            keccak256(self.init_code()),
            keccak256(&self.call_data),
            self.account_gas_limits(),
            self.pre_verification_gas,
            self.gas_fees(),
            keccak256(self.paymaster_and_data()),
        )
            .abi_encode();
        keccak256((keccak256(packed), entry_point, U256::from(chain_id)).abi_encode())
    }
}

fn low_u128_bytes(value: U256) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&value.to_be_bytes::<32>()[16..]);
    out
}

fn pack_u128_pair(high: U256, low: U256) -> B256 {
    let mut packed = [0u8; 32];
    packed[..16].copy_from_slice(&low_u128_bytes(high));
    packed[16..].copy_from_slice(&low_u128_bytes(low));
    B256::from(packed)
}

/// Which token the aggregation service will debit, on which chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepayTokenInfo {
    pub chain_id: ChainId,
    pub address: Address,
    pub amount: U256,
}

/// Which chain fronts the gas, and how much.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorTokenInfo {
    pub chain_id: ChainId,
    pub address: Address,
    pub amount: U256,
}

/// A priced, sponsored bundle ready to be signed and sent.
///
/// Not `Clone`: submitting consumes it, so one prepared bundle is sent at
/// most once.
#[derive(Debug, PartialEq, Eq)]
pub struct PreparedOperation {
    pub account: Address,
    pub chain_id: ChainId,
    pub calls: Vec<Call>,
    pub repay_tokens: Vec<TokenSymbol>,
    pub user_operation: UserOperation,
    pub repay_tokens_info: Vec<RepayTokenInfo>,
    pub sponsor_tokens_info: Vec<SponsorTokenInfo>,
}

/// Terminal inclusion record for a user operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReceipt {
    pub user_op_hash: B256,
    pub transaction_hash: B256,
    pub success: bool,
    pub actual_gas_used: Option<U256>,
    pub actual_gas_cost: Option<U256>,
}
