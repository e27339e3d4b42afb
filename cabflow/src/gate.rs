//! Suspend-until-confirmed polling.
//!
//! A [`Trigger`] decides *when* to look again (a keypress, a timer, a
//! backoff). A predicate decides *whether* what we saw is good enough. The
//! loop in [`wait_until`] only wires the two together, so either side can be
//! swapped without touching the other.

use alloy_primitives::U256;
use async_trait::async_trait;
use lib::{AggregatedBalance, CabError, TokenSymbol};
use std::future::Future;
use std::io::{self, BufRead};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

#[async_trait]
pub trait Trigger: Send {
    /// Resolve when the next poll should happen.
    async fn fire(&mut self) -> Result<(), CabError>;

    /// Tell whoever is driving the trigger what we are waiting for.
    fn announce(&self, prompt: &str) {
        info!("{prompt}");
    }
}

/// One line on stdin per poll. End of input cancels the run.
///
/// Lines are read on a dedicated OS thread and handed over a channel, so a
/// pending prompt never holds up runtime shutdown.
pub struct StdinTrigger {
    lines: mpsc::UnboundedReceiver<io::Result<String>>,
}

impl StdinTrigger {
    pub fn spawn() -> Result<Self, CabError> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("stdin-trigger".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
            })
            .map_err(|e| CabError::config(format!("failed to start stdin reader: {e}")))?;
        Ok(Self::from_lines(rx))
    }

    pub fn from_lines(lines: mpsc::UnboundedReceiver<io::Result<String>>) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl Trigger for StdinTrigger {
    async fn fire(&mut self) -> Result<(), CabError> {
        match self.lines.recv().await {
            Some(Ok(_)) => Ok(()),
            None => {
                warn!("stdin closed while waiting for confirmation");
                Err(CabError::Cancelled)
            }
            Some(Err(e)) => {
                warn!("failed to read stdin: {e}");
                Err(CabError::Cancelled)
            }
        }
    }

    fn announce(&self, prompt: &str) {
        println!("{prompt}");
    }
}

/// Fixed delay between polls; the first poll happens immediately.
pub struct IntervalTrigger {
    period: Duration,
    next: Option<Instant>,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        Self { period, next: None }
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn fire(&mut self) -> Result<(), CabError> {
        if let Some(next) = self.next {
            tokio::time::sleep_until(next).await;
        }
        let next = Instant::now()
            .checked_add(self.period)
            .ok_or_else(|| CabError::config("poll interval is too long"))?;
        self.next = Some(next);
        Ok(())
    }
}

/// Doubling delay between polls, capped at `max`. The first poll happens
/// immediately.
pub struct BackoffTrigger {
    delay: Duration,
    max: Duration,
    first: bool,
}

impl BackoffTrigger {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            delay: initial,
            max,
            first: true,
        }
    }
}

#[async_trait]
impl Trigger for BackoffTrigger {
    async fn fire(&mut self) -> Result<(), CabError> {
        if self.first {
            self.first = false;
            return Ok(());
        }
        tokio::time::sleep(self.delay).await;
        self.delay = self.delay.saturating_mul(2).min(self.max);
        Ok(())
    }
}

/// Cancellation path for the open-ended wait loops.
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A shutdown that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // sender gone: nobody can cancel us any more
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drive `work` to completion unless shutdown is requested first.
    pub async fn guard<T, F>(&mut self, work: F) -> Result<T, CabError>
    where
        F: Future<Output = Result<T, CabError>>,
    {
        tokio::select! {
            _ = self.cancelled() => Err(CabError::Cancelled),
            result = work => result,
        }
    }
}

/// Repeatedly wait for `trigger`, `poll`, and stop once `ready` accepts the
/// polled value. Returns the accepted value and how many polls it took.
///
/// Retryable poll errors are logged and the loop waits for the next trigger;
/// any other error aborts. `max_attempts` bounds the loop for unattended runs.
pub async fn wait_until<T, V, P, Fut, R>(
    what: &str,
    prompt: &str,
    trigger: &mut T,
    shutdown: &mut Shutdown,
    max_attempts: Option<u32>,
    mut poll: P,
    mut ready: R,
) -> Result<(V, u32), CabError>
where
    T: Trigger + ?Sized,
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<V, CabError>>,
    R: FnMut(&V) -> bool,
{
    let mut attempts = 0u32;
    loop {
        if let Some(max) = max_attempts {
            if attempts >= max {
                return Err(CabError::Exhausted {
                    what: what.to_string(),
                    attempts,
                });
            }
        }
        attempts += 1;

        trigger.announce(prompt);
        tokio::select! {
            _ = shutdown.cancelled() => return Err(CabError::Cancelled),
            fired = trigger.fire() => fired?,
        }

        let polled = tokio::select! {
            _ = shutdown.cancelled() => return Err(CabError::Cancelled),
            polled = poll() => polled,
        };

        match polled {
            Ok(value) if ready(&value) => {
                info!("{what}: satisfied after {attempts} poll(s)");
                return Ok((value, attempts));
            }
            Ok(_) => info!("{what}: not yet (poll {attempts})"),
            Err(e) if e.is_retryable() => {
                warn!("{what}: poll {attempts} failed, will retry on next trigger: {e}")
            }
            Err(e) => return Err(e),
        }
    }
}

/// Enrollment gate: strictly more than `threshold` chains enabled.
pub fn enough_chains(enabled: usize, threshold: usize) -> bool {
    enabled > threshold
}

/// How much balance must be visible before an operation is quoted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum BalancePolicy {
    /// The repay tokens together hold a positive balance.
    #[default]
    Any,
    /// Every repay token individually holds a positive balance.
    Each,
}

impl BalancePolicy {
    pub fn is_satisfied(&self, balance: &AggregatedBalance, tokens: &[TokenSymbol]) -> bool {
        match self {
            BalancePolicy::Any => balance.total(tokens) > U256::ZERO,
            BalancePolicy::Each => {
                !tokens.is_empty() && tokens.iter().all(|t| balance.get(t) > U256::ZERO)
            }
        }
    }
}
