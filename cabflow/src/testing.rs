//! In-memory stand-ins for the aggregation service, bundler and chain, used
//! by the unit tests. Each records how often it was called.

use crate::account::test_constants::ANVIL_PRIVATE_KEY_0;
use crate::account::{derive, EntryPointVersion, SmartAccount, ValidatorConfig};
use crate::bundler::BundlerApi;
use crate::cab::CabApi;
use crate::chain::ChainState;
use crate::gate::Trigger;
use crate::session::ChainSession;
use crate::tokens::default_registry;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use lib::cab::*;
use lib::{
    AggregatedBalance, CabError, ChainId, OperationReceipt, RepayTokenInfo, SponsorTokenInfo,
    TokenSymbol, UserOperation,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub fn test_account() -> SmartAccount {
    let signer = PrivateKeySigner::from_str(ANVIL_PRIVATE_KEY_0).unwrap();
    derive(signer, ValidatorConfig::default(), EntryPointVersion::V07).unwrap()
}

pub fn test_session(
    chain_id: ChainId,
    cab: impl Into<Arc<FakeCab>>,
    bundler: impl Into<Arc<FakeBundler>>,
) -> ChainSession {
    test_session_on(chain_id, cab, bundler, FakeChain::default())
}

pub fn test_session_on(
    chain_id: ChainId,
    cab: impl Into<Arc<FakeCab>>,
    bundler: impl Into<Arc<FakeBundler>>,
    chain: FakeChain,
) -> ChainSession {
    let cab: Arc<FakeCab> = cab.into();
    let bundler: Arc<FakeBundler> = bundler.into();
    ChainSession::from_parts(
        chain_id,
        Arc::new(test_account()),
        "http://bundler.test".parse().unwrap(),
        "http://paymaster.test".parse().unwrap(),
        cab,
        bundler,
        Arc::new(chain),
        default_registry().for_chain(chain_id),
    )
}

pub fn balance(entries: &[(&str, u64)]) -> AggregatedBalance {
    AggregatedBalance(
        entries
            .iter()
            .map(|(symbol, amount)| (TokenSymbol::new(symbol), U256::from(*amount)))
            .collect::<BTreeMap<_, _>>(),
    )
}

#[derive(Default)]
pub struct FakeCab {
    pub enabled_chain_polls: Mutex<VecDeque<Result<Vec<ChainId>, CabError>>>,
    pub balance_polls: Mutex<VecDeque<Result<AggregatedBalance, CabError>>>,
    pub prepare_results: Mutex<VecDeque<Result<PrepareUserOperationResult, CabError>>>,
    pub enabled_tokens: Mutex<BTreeSet<TokenSymbol>>,
    pub last_prepare: Mutex<Option<PrepareUserOperationParams>>,
    pub sent: Mutex<Vec<SendUserOperationParams>>,
    pub enable_calls: AtomicUsize,
    pub enabled_chain_calls: AtomicUsize,
    pub balance_calls: AtomicUsize,
    pub prepare_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
}

impl FakeCab {
    pub fn with_enabled_chains(self, polls: Vec<Result<Vec<ChainId>, CabError>>) -> Self {
        *self.enabled_chain_polls.lock().unwrap() = polls.into();
        self
    }

    pub fn with_balances(self, polls: Vec<Result<AggregatedBalance, CabError>>) -> Self {
        *self.balance_polls.lock().unwrap() = polls.into();
        self
    }

    pub fn with_prepare_results(
        self,
        results: Vec<Result<PrepareUserOperationResult, CabError>>,
    ) -> Self {
        *self.prepare_results.lock().unwrap() = results.into();
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// What a real service would hand back: the caller's operation, priced.
pub fn priced(params: &PrepareUserOperationParams) -> PrepareUserOperationResult {
    PrepareUserOperationResult {
        user_operation: UserOperation {
            sender: params.account,
            nonce: params.nonce,
            factory: params.factory,
            factory_data: params.factory_data.clone(),
            call_data: params.call_data.clone(),
            call_gas_limit: U256::from(300_000),
            verification_gas_limit: U256::from(150_000),
            pre_verification_gas: U256::from(60_000),
            max_fee_per_gas: U256::from(3_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            paymaster: Some(Address::repeat_byte(0x77)),
            paymaster_verification_gas_limit: Some(U256::from(500_000)),
            paymaster_post_op_gas_limit: Some(U256::from(300_000)),
            paymaster_data: None,
            signature: Default::default(),
        },
        repay_tokens_info: vec![RepayTokenInfo {
            chain_id: 42161,
            address: Address::repeat_byte(0x42),
            amount: U256::from(5),
        }],
        sponsor_tokens_info: vec![SponsorTokenInfo {
            chain_id: params.chain_id,
            address: Address::repeat_byte(0x56),
            amount: U256::from(3),
        }],
    }
}

#[async_trait]
impl CabApi for FakeCab {
    async fn enable_tokens(&self, params: EnableTokensParams) -> Result<(), CabError> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        self.enabled_tokens.lock().unwrap().extend(params.tokens);
        Ok(())
    }

    async fn enabled_chains(&self, _account: Address) -> Result<Vec<ChainId>, CabError> {
        self.enabled_chain_calls.fetch_add(1, Ordering::SeqCst);
        self.enabled_chain_polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn balance(
        &self,
        _account: Address,
        _tokens: &[TokenSymbol],
    ) -> Result<AggregatedBalance, CabError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.balance_polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(AggregatedBalance::default()))
    }

    async fn prepare_user_operation(
        &self,
        params: PrepareUserOperationParams,
    ) -> Result<PrepareUserOperationResult, CabError> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.prepare_results.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| Ok(priced(&params)));
        *self.last_prepare.lock().unwrap() = Some(params);
        result
    }

    async fn send_user_operation(
        &self,
        params: SendUserOperationParams,
    ) -> Result<B256, CabError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let hash = params
            .user_operation
            .hash(params.entry_point, params.chain_id);
        self.sent.lock().unwrap().push(params);
        Ok(hash)
    }
}

pub struct FakeBundler {
    included_after: Option<Duration>,
    success: bool,
    start: Instant,
    latency: Duration,
    failures: Mutex<VecDeque<CabError>>,
    pub polls: AtomicUsize,
}

impl FakeBundler {
    pub fn never() -> Self {
        Self {
            included_after: None,
            success: true,
            start: Instant::now(),
            latency: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn included_after(delay: Duration, success: bool) -> Self {
        Self {
            included_after: Some(delay),
            success,
            ..Self::never()
        }
    }

    /// Every poll takes `latency` to answer.
    pub fn responding_after(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The first `errors` polls fail before normal behaviour resumes.
    pub fn failing_first(mut self, errors: Vec<CabError>) -> Self {
        self.failures = Mutex::new(errors.into());
        self
    }
}

#[async_trait]
impl BundlerApi for FakeBundler {
    async fn user_operation_receipt(
        &self,
        user_op_hash: B256,
    ) -> Result<Option<OperationReceipt>, CabError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        match self.included_after {
            Some(delay) if self.start.elapsed() >= delay => Ok(Some(OperationReceipt {
                user_op_hash,
                transaction_hash: B256::repeat_byte(0x99),
                success: self.success,
                actual_gas_used: Some(U256::from(120_000)),
                actual_gas_cost: None,
            })),
            _ => Ok(None),
        }
    }
}

pub struct FakeChain {
    pub deployed: bool,
    pub nonce: U256,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            deployed: false,
            nonce: U256::ZERO,
        }
    }
}

#[async_trait]
impl ChainState for FakeChain {
    async fn is_deployed(&self, _account: Address) -> Result<bool, CabError> {
        Ok(self.deployed)
    }

    async fn nonce(&self, _entry_point: Address, _sender: Address) -> Result<U256, CabError> {
        Ok(self.nonce)
    }
}

/// Fires immediately; counts how often it was asked to.
#[derive(Default)]
pub struct CountingTrigger {
    pub fired: usize,
}

#[async_trait]
impl Trigger for CountingTrigger {
    async fn fire(&mut self) -> Result<(), CabError> {
        self.fired += 1;
        Ok(())
    }
}
