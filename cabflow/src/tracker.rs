//! Signing, single-shot submission and receipt polling.

use crate::session::ChainSession;
use alloy_primitives::B256;
use lib::cab::SendUserOperationParams;
use lib::{CabError, OperationReceipt, PreparedOperation};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct SubmissionTracker<'a> {
    session: &'a ChainSession,
    poll_interval: Duration,
}

impl<'a> SubmissionTracker<'a> {
    pub fn new(session: &'a ChainSession, poll_interval: Duration) -> Self {
        Self {
            session,
            poll_interval,
        }
    }

    /// Sign `prepared` and send it exactly once. Never retried here: a
    /// resend could authorize the same repayment twice.
    pub async fn submit(&self, prepared: PreparedOperation) -> Result<B256, CabError> {
        let account = self.session.account();
        if prepared.account != account.address() {
            return Err(CabError::Submission {
                error: format!(
                    "prepared for account {}, session account is {}",
                    prepared.account,
                    account.address()
                ),
            });
        }
        if prepared.chain_id != self.session.chain_id() {
            return Err(CabError::Submission {
                error: format!(
                    "prepared for chain {}, session chain is {}",
                    prepared.chain_id,
                    self.session.chain_id()
                ),
            });
        }

        let mut user_operation = prepared.user_operation;
        let hash = user_operation.hash(account.entry_point(), self.session.chain_id());
        user_operation.signature = account.sign_user_operation_hash(hash)?;
        debug!("signed user operation {hash}");

        let sent = self
            .session
            .cab()
            .send_user_operation(SendUserOperationParams {
                chain_id: self.session.chain_id(),
                entry_point: account.entry_point(),
                user_operation,
            })
            .await
            .map_err(|e| CabError::Submission {
                error: e.to_string(),
            })?;
        if sent != hash {
            warn!("service reported user operation hash {sent}, computed {hash}");
        }
        info!(user_op_hash = %sent, "user operation submitted");
        Ok(sent)
    }

    /// Poll the bundler until the operation is included or `timeout` passes.
    /// A poll still in flight at the deadline is abandoned.
    pub async fn await_receipt(
        &self,
        user_op_hash: B256,
        timeout: Duration,
    ) -> Result<OperationReceipt, CabError> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or_else(|| CabError::config("receipt timeout is too long"))?;
        loop {
            let poll = self.session.bundler().user_operation_receipt(user_op_hash);
            match tokio::time::timeout_at(deadline, poll).await {
                Ok(Ok(Some(receipt))) => return Ok(receipt),
                Ok(Ok(None)) => debug!("user operation {user_op_hash} still pending"),
                Ok(Err(e)) => warn!("receipt poll for {user_op_hash} failed: {e}"),
                Err(_) => {
                    warn!("receipt poll for {user_op_hash} still running at the deadline");
                    break;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
        Err(CabError::Timeout {
            user_op_hash: user_op_hash.to_string(),
            waited_secs: timeout.as_secs(),
        })
    }
}
