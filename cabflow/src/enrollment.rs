//! Enrollment of the account with the aggregation service.

use crate::session::ChainSession;
use lib::cab::EnableTokensParams;
use lib::{CabError, ChainId, TokenSymbol};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// One-shot enrollment calls. Waiting for enough chains is the caller's job.
pub struct EnrollmentController<'a> {
    session: &'a ChainSession,
}

impl<'a> EnrollmentController<'a> {
    pub fn new(session: &'a ChainSession) -> Self {
        Self { session }
    }

    /// Ask the service to aggregate `tokens` for this account. Safe to repeat.
    pub async fn enable(&self, tokens: &[TokenSymbol]) -> Result<(), CabError> {
        let tokens: BTreeSet<TokenSymbol> = tokens.iter().cloned().collect();
        if tokens.is_empty() {
            return Err(CabError::config("no tokens to enable"));
        }
        let account = self.session.account().address();
        info!(
            %account,
            chain_id = self.session.chain_id(),
            "enabling {} token(s) for aggregation",
            tokens.len()
        );
        self.session
            .cab()
            .enable_tokens(EnableTokensParams {
                account,
                chain_id: self.session.chain_id(),
                tokens: tokens.into_iter().collect(),
            })
            .await
    }

    /// A single enabled-chains query.
    pub async fn poll_enabled_chains(&self) -> Result<Vec<ChainId>, CabError> {
        let chains = self
            .session
            .cab()
            .enabled_chains(self.session.account().address())
            .await
            .map_err(|e| CabError::EnrollmentQuery {
                error: e.to_string(),
            })?;
        debug!("enabled chains: {chains:?}");
        Ok(chains)
    }
}
