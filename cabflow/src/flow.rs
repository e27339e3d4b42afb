//! The end-to-end run: enroll, wait for chains, wait for balance, quote,
//! submit, confirm. Every step depends on the one before it.

use crate::account::derive;
use crate::builder::OperationBuilder;
use crate::config::{RunConfig, TriggerKind};
use crate::enrollment::EnrollmentController;
use crate::gate::{
    enough_chains, wait_until, BackoffTrigger, IntervalTrigger, Shutdown, StdinTrigger, Trigger,
};
use crate::session::{ChainSession, SessionFactory};
use crate::tracker::SubmissionTracker;
use alloy_primitives::{Address, B256};
use lib::{AggregatedBalance, CabError, ChainId, EnrollmentState, OperationReceipt};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Backoff stops growing at this multiple of the base poll interval.
const BACKOFF_CAP_FACTOR: u32 = 12;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub account: Address,
    pub chain_id: ChainId,
    pub enabled_chains: Vec<ChainId>,
    pub balance: AggregatedBalance,
    pub user_op_hash: B256,
    pub receipt: OperationReceipt,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.receipt.success
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "account:         {}", self.account)?;
        writeln!(f, "chain:           {}", self.chain_id)?;
        writeln!(f, "enabled chains:  {:?}", self.enabled_chains)?;
        for (token, amount) in &self.balance.0 {
            writeln!(f, "balance {token:<8} {amount}")?;
        }
        writeln!(f, "user op hash:    {}", self.user_op_hash)?;
        writeln!(f, "tx hash:         {}", self.receipt.transaction_hash)?;
        if let Some(gas) = self.receipt.actual_gas_used {
            writeln!(f, "gas used:        {gas}")?;
        }
        write!(
            f,
            "status:          {}",
            if self.receipt.success { "success" } else { "reverted" }
        )
    }
}

/// Derive the account and bind it to the configured chain. No I/O.
pub fn connect(config: &RunConfig) -> Result<ChainSession, CabError> {
    let account = derive(
        config.signer.clone(),
        config.validator.clone(),
        config.entry_point_version,
    )?;
    info!(
        account = %account.address(),
        owner = %account.owner(),
        "derived smart account (kernel {:?}, entry point {})",
        account.validator_config().kernel_version,
        config.entry_point_version,
    );
    let factory = SessionFactory::new(
        Arc::new(account),
        config.paymaster_url.clone(),
        Arc::new(config.registry.clone()),
    )?;
    let session = factory.open_session(config.chain.clone(), config.bundler_url.clone());
    info!(
        chain_id = session.chain_id(),
        "bundler {}, aggregation service {}",
        session.bundler_endpoint(),
        session.paymaster_endpoint()
    );
    Ok(session)
}

pub fn trigger_for(config: &RunConfig) -> Result<Box<dyn Trigger>, CabError> {
    Ok(match config.trigger {
        TriggerKind::Stdin => Box::new(StdinTrigger::spawn()?),
        TriggerKind::Interval => Box::new(IntervalTrigger::new(config.poll_interval)),
        TriggerKind::Backoff => Box::new(BackoffTrigger::new(
            config.poll_interval,
            config.poll_interval.saturating_mul(BACKOFF_CAP_FACTOR),
        )),
    })
}

pub async fn run(
    config: &RunConfig,
    session: &ChainSession,
    trigger: &mut dyn Trigger,
    shutdown: &mut Shutdown,
) -> Result<RunReport, CabError> {
    let account = session.account().address();
    let tokens = config.tokens.as_slice();
    info!(%account, chain_id = session.chain_id(), "starting run");

    let controller = &EnrollmentController::new(session);
    shutdown.guard(controller.enable(tokens)).await?;

    let mut state = EnrollmentState::new(tokens.iter().cloned());
    let threshold = config.enabled_chain_threshold;
    wait_until(
        "enrollment",
        &format!(
            "Checking enabled chains. Press Enter to check. Will proceed when more than {threshold} chains are enabled."
        ),
        &mut *trigger,
        shutdown,
        config.max_attempts,
        move || async move { controller.poll_enabled_chains().await },
        |polled: &Vec<ChainId>| {
            let dropped = state.observe(polled);
            if !dropped.is_empty() {
                warn!("service no longer reports chains {dropped:?}; keeping them");
            }
            info!("enabled chains: {:?}", state.enabled_chains);
            enough_chains(state.enabled_chains.len(), threshold)
        },
    )
    .await?;

    let builder = &OperationBuilder::new(session);
    let policy = config.balance_policy;
    let (balance, _) = wait_until(
        "balance",
        "Deposit tokens on another enabled chain. Press Enter to check. Will proceed when the aggregated balance is positive.",
        trigger,
        shutdown,
        config.max_attempts,
        move || async move { builder.poll_balance(tokens).await },
        |balance: &AggregatedBalance| {
            info!("aggregated balance: {:?}", balance.0);
            policy.is_satisfied(balance, tokens)
        },
    )
    .await?;

    let calls = tokens
        .iter()
        .map(|token| session.erc20_transfer_call(token, account, &config.transfer_amount))
        .collect::<Result<Vec<_>, _>>()?;
    let prepared = shutdown
        .guard(builder.build_operation(calls, tokens))
        .await?;

    // once sent, the operation is out of our hands; let the send finish
    let tracker = SubmissionTracker::new(session, config.receipt_poll_interval);
    let user_op_hash = tracker.submit(prepared).await?;
    let receipt = shutdown
        .guard(tracker.await_receipt(user_op_hash, config.receipt_timeout))
        .await
        .map_err(|e| {
            if e == CabError::Cancelled {
                warn!("stopped waiting for user operation {user_op_hash}; its fate is unknown");
            }
            e
        })?;

    Ok(RunReport {
        account,
        chain_id: session.chain_id(),
        enabled_chains: state.enabled_chains,
        balance,
        user_op_hash,
        receipt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::test_constants::ANVIL_PRIVATE_KEY_0;
    use crate::config::Args;
    use crate::testing::{balance, test_session, CountingTrigger, FakeBundler, FakeCab};
    use crate::tokens::BSC;
    use alloy_primitives::U256;
    use clap::Parser;
    use lib::TokenSymbol;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::Instant;

    async fn config(extra: &[&str]) -> RunConfig {
        let mut argv = vec![
            "cabflow",
            "--private-key",
            ANVIL_PRIVATE_KEY_0,
            "--cab-paymaster-url",
            "http://paymaster.test",
            "--bundler-rpc",
            "http://bundler.test",
        ];
        argv.extend_from_slice(extra);
        RunConfig::from_args(Args::try_parse_from(argv).unwrap())
            .await
            .unwrap()
    }

    fn ready_cab() -> FakeCab {
        FakeCab::default()
            .with_enabled_chains(vec![
                Ok(vec![56]),
                Ok(vec![56, 10]),
                Ok(vec![56, 10, 42161, 8453]),
            ])
            .with_balances(vec![
                Ok(balance(&[("USDC", 0)])),
                Ok(balance(&[("USDC", 0)])),
                Ok(balance(&[("USDC", 5)])),
            ])
    }

    #[tokio::test]
    async fn connect_rejects_unsupported_entry_point() {
        let config = config(&["--entry-point-version", "0.6"]).await;
        assert_eq!(connect(&config).unwrap_err().kind(), "Configuration");
    }

    #[tokio::test]
    async fn connect_derives_the_configured_owner() {
        let config = config(&[]).await;
        let session = connect(&config).unwrap();
        assert_eq!(session.account().owner(), config.signer.address());
        assert_eq!(session.chain_id(), BSC);
        assert_eq!(session.paymaster_endpoint().as_str(), "http://paymaster.test/");
    }

    #[tokio::test(start_paused = true)]
    async fn full_run_submits_once_and_returns_at_inclusion() {
        let cab = Arc::new(ready_cab());
        let bundler = Arc::new(FakeBundler::included_after(Duration::from_secs(10), true));
        let session = test_session(BSC, cab.clone(), bundler.clone());
        let config = config(&[]).await;
        let mut trigger = CountingTrigger::default();

        let start = Instant::now();
        let report = run(&config, &session, &mut trigger, &mut Shutdown::never())
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.enabled_chains.len(), 4);
        assert_eq!(report.balance.get(&TokenSymbol::new("USDC")), U256::from(5));
        assert_eq!(report.account, session.account().address());
        assert_eq!(trigger.fired, 6);
        assert_eq!(FakeCab::count(&cab.enable_calls), 1);
        assert_eq!(FakeCab::count(&cab.enabled_chain_calls), 3);
        assert_eq!(FakeCab::count(&cab.balance_calls), 3);
        assert_eq!(FakeCab::count(&cab.prepare_calls), 1);
        assert_eq!(FakeCab::count(&cab.send_calls), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        let prepared = cab.last_prepare.lock().unwrap().clone().unwrap();
        assert_eq!(prepared.calls.len(), 2);
        assert!(prepared.calls.iter().all(|c| session.is_known_token(c.to)));
    }

    #[tokio::test]
    async fn quote_error_stops_the_run_before_submission() {
        let cab = Arc::new(ready_cab().with_prepare_results(vec![Err(CabError::Rpc {
            method: "cab_prepareUserOperation".into(),
            code: -32602,
            message: "insufficient balance".into(),
        })]));
        let session = test_session(BSC, cab.clone(), FakeBundler::never());
        let config = config(&[]).await;

        let err = run(
            &config,
            &session,
            &mut CountingTrigger::default(),
            &mut Shutdown::never(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "Quote");
        assert_eq!(FakeCab::count(&cab.prepare_calls), 1);
        assert_eq!(FakeCab::count(&cab.send_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_operation_is_reported_not_hidden() {
        let cab = Arc::new(ready_cab());
        let session = test_session(
            BSC,
            cab,
            FakeBundler::included_after(Duration::from_secs(4), false),
        );
        let config = config(&[]).await;
        let report = run(
            &config,
            &session,
            &mut CountingTrigger::default(),
            &mut Shutdown::never(),
        )
        .await
        .unwrap();
        assert!(!report.succeeded());
        assert!(report.to_string().contains("reverted"));
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_operation_times_out() {
        let cab = Arc::new(ready_cab());
        let session = test_session(BSC, cab.clone(), FakeBundler::never());
        let config = config(&["--receipt-timeout-secs", "30"]).await;
        let start = Instant::now();
        let err = run(
            &config,
            &session,
            &mut CountingTrigger::default(),
            &mut Shutdown::never(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "Timeout");
        assert!(start.elapsed() <= Duration::from_secs(30 + 2));
        assert_eq!(FakeCab::count(&cab.send_calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_an_endless_enrollment_wait() {
        let cab = Arc::new(FakeCab::default());
        let session = test_session(BSC, cab.clone(), FakeBundler::never());
        let config = config(&["--trigger", "interval"]).await;
        let mut trigger = trigger_for(&config).unwrap();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let _ = tx.send(true);
        });

        let err = run(&config, &session, trigger.as_mut(), &mut Shutdown::new(rx))
            .await
            .unwrap_err();
        assert_eq!(err, CabError::Cancelled);
        assert_eq!(FakeCab::count(&cab.balance_calls), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_receipt_wait_after_submission() {
        let cab = Arc::new(ready_cab());
        let bundler = Arc::new(FakeBundler::never());
        let session = test_session(BSC, cab.clone(), bundler.clone());
        let config = config(&["--receipt-timeout-secs", "600"]).await;
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = tx.send(true);
        });

        let start = Instant::now();
        let err = run(
            &config,
            &session,
            &mut CountingTrigger::default(),
            &mut Shutdown::new(rx),
        )
        .await
        .unwrap_err();
        assert_eq!(err, CabError::Cancelled);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(FakeCab::count(&cab.send_calls), 1);
        assert!(bundler.polls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn max_attempts_bounds_an_unattended_run() {
        let cab = Arc::new(FakeCab::default());
        let session = test_session(BSC, cab.clone(), FakeBundler::never());
        let config = config(&["--max-attempts", "2"]).await;
        let err = run(
            &config,
            &session,
            &mut CountingTrigger::default(),
            &mut Shutdown::never(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "Exhausted");
        assert_eq!(FakeCab::count(&cab.enabled_chain_calls), 2);
    }
}
