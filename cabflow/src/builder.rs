//! Balance queries and operation quoting against the aggregation service.

use crate::session::{encode_calls, ChainSession};
use lib::cab::PrepareUserOperationParams;
use lib::{AggregatedBalance, CabError, Call, PreparedOperation, TokenSymbol};
use tracing::{debug, info};

pub struct OperationBuilder<'a> {
    session: &'a ChainSession,
}

impl<'a> OperationBuilder<'a> {
    pub fn new(session: &'a ChainSession) -> Self {
        Self { session }
    }

    /// A single aggregated-balance query.
    pub async fn poll_balance(
        &self,
        tokens: &[TokenSymbol],
    ) -> Result<AggregatedBalance, CabError> {
        let balance = self
            .session
            .cab()
            .balance(self.session.account().address(), tokens)
            .await
            .map_err(|e| CabError::BalanceQuery {
                error: e.to_string(),
            })?;
        debug!("aggregated balance: {:?}", balance.0);
        Ok(balance)
    }

    /// Have the aggregation service price and sponsor `calls`, repaid from
    /// `repay_tokens`. Amounts and routing are whatever the service returns.
    pub async fn build_operation(
        &self,
        calls: Vec<Call>,
        repay_tokens: &[TokenSymbol],
    ) -> Result<PreparedOperation, CabError> {
        if repay_tokens.is_empty() {
            return Err(CabError::InvalidOperation {
                error: "no repay tokens given".to_string(),
            });
        }
        if let Some(call) = calls.iter().find(|c| !self.session.is_known_token(c.to)) {
            return Err(CabError::InvalidOperation {
                error: format!(
                    "call target {} is not a registered token on chain {}",
                    call.to,
                    self.session.chain_id()
                ),
            });
        }
        let call_data = encode_calls(&calls)?;

        let account = self.session.account();
        let entry_point = account.entry_point();
        let nonce = self.session.chain().nonce(entry_point, account.address()).await?;
        let deployed = self.session.chain().is_deployed(account.address()).await?;
        let (factory, factory_data) = if deployed {
            (None, None)
        } else {
            debug!("account not deployed yet, attaching factory data");
            (Some(account.factory()), Some(account.factory_data()))
        };

        let params = PrepareUserOperationParams {
            account: account.address(),
            chain_id: self.session.chain_id(),
            entry_point,
            calls: calls.clone(),
            call_data,
            nonce,
            factory,
            factory_data,
            repay_tokens: repay_tokens.to_vec(),
        };
        let quoted = self
            .session
            .cab()
            .prepare_user_operation(params)
            .await
            .map_err(|e| match e {
                CabError::Rpc { .. } | CabError::MalformedResponse { .. } => CabError::Quote {
                    error: e.to_string(),
                },
                other => other,
            })?;

        if quoted.user_operation.sender != account.address() {
            return Err(CabError::Quote {
                error: format!(
                    "quote is for sender {}, expected {}",
                    quoted.user_operation.sender,
                    account.address()
                ),
            });
        }

        for repay in &quoted.repay_tokens_info {
            info!(
                chain_id = repay.chain_id,
                "repay {} of token {}", repay.amount, repay.address
            );
        }
        for sponsor in &quoted.sponsor_tokens_info {
            info!(
                chain_id = sponsor.chain_id,
                "sponsor {} of token {}", sponsor.amount, sponsor.address
            );
        }

        Ok(PreparedOperation {
            account: account.address(),
            chain_id: self.session.chain_id(),
            calls,
            repay_tokens: repay_tokens.to_vec(),
            user_operation: quoted.user_operation,
            repay_tokens_info: quoted.repay_tokens_info,
            sponsor_tokens_info: quoted.sponsor_tokens_info,
        })
    }
}
