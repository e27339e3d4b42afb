//! ERC-4337 bundler client: receipt lookup for submitted user operations.

use crate::rpc::JsonRpcClient;
use alloy_primitives::B256;
use async_trait::async_trait;
use lib::cab::{RawUserOperationReceipt, ETH_GET_USER_OPERATION_RECEIPT};
use lib::{CabError, OperationReceipt};
use tracing::{error, info};

#[async_trait]
pub trait BundlerApi: Send + Sync {
    /// `Ok(None)` while the operation is still pending.
    async fn user_operation_receipt(
        &self,
        user_op_hash: B256,
    ) -> Result<Option<OperationReceipt>, CabError>;
}

#[derive(Debug)]
pub struct BundlerClient {
    rpc: JsonRpcClient,
}

impl BundlerClient {
    pub fn new(rpc: JsonRpcClient) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl BundlerApi for BundlerClient {
    async fn user_operation_receipt(
        &self,
        user_op_hash: B256,
    ) -> Result<Option<OperationReceipt>, CabError> {
        let raw: Option<RawUserOperationReceipt> = self
            .rpc
            .request(ETH_GET_USER_OPERATION_RECEIPT, [user_op_hash])
            .await?;
        raw.map(|raw| parse_user_op_receipt(raw, user_op_hash))
            .transpose()
    }
}

/// Pull the transaction hash and outcome out of a bundler receipt.
pub fn parse_user_op_receipt(
    raw: RawUserOperationReceipt,
    user_op_hash: B256,
) -> Result<OperationReceipt, CabError> {
    let transaction_hash = raw
        .receipt
        .as_ref()
        .and_then(|r| r.transaction_hash)
        // some bundlers put it at the top level
        .or(raw.transaction_hash)
        .ok_or_else(|| {
            error!("receipt for {user_op_hash} missing transaction hash");
            CabError::MalformedResponse {
                method: ETH_GET_USER_OPERATION_RECEIPT.to_string(),
                error: "receipt missing transaction hash".to_string(),
            }
        })?;

    // an included operation without an outcome tells us nothing about its fate
    let success = raw.success.ok_or_else(|| {
        error!("receipt for {user_op_hash} missing success flag");
        CabError::MalformedResponse {
            method: ETH_GET_USER_OPERATION_RECEIPT.to_string(),
            error: "receipt missing success flag".to_string(),
        }
    })?;

    info!("user operation {user_op_hash} included in transaction {transaction_hash}");
    if !success {
        error!("user operation {user_op_hash} reverted");
    }

    Ok(OperationReceipt {
        user_op_hash: raw.user_op_hash.unwrap_or(user_op_hash),
        transaction_hash,
        success,
        actual_gas_used: raw.actual_gas_used,
        actual_gas_cost: raw.actual_gas_cost,
    })
}
