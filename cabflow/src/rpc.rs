//! JSON-RPC over HTTP for the aggregation service and the bundler, on
//! alloy's `RpcClient`.
//!
//! One call is exactly one HTTP round-trip. Nothing here retries: whether a
//! failed poll is re-attempted is the caller's decision.

use alloy::rpc::client::RpcClient;
use alloy::rpc::json_rpc::{RpcError, RpcParam, RpcReturn};
use alloy::transports::http::{Client, Http};
use alloy::transports::TransportError;
use lib::CabError;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct JsonRpcClient {
    client: RpcClient<Http<Client>>,
    endpoint: Url,
}

impl JsonRpcClient {
    /// Builds the client; no connection is opened until the first request.
    pub fn new(http: Client, endpoint: Url) -> Self {
        let transport = Http::with_client(http, endpoint.clone());
        let is_local = transport.guess_local();
        Self {
            client: RpcClient::new(transport, is_local),
            endpoint,
        }
    }

    /// Send `method`. A `null` result is only accepted when `R` is an
    /// `Option`.
    pub async fn request<P, R>(&self, method: &'static str, params: P) -> Result<R, CabError>
    where
        P: RpcParam,
        R: RpcReturn,
    {
        debug!("JSON-RPC {method} to {}: {params:?}", self.endpoint);
        self.client
            .request(method, params)
            .await
            .map_err(|e| to_cab_error(method, &self.endpoint, e))
    }
}

/// Fold alloy's transport and response errors into the crate's taxonomy.
pub fn to_cab_error(method: &str, endpoint: &Url, e: TransportError) -> CabError {
    match e {
        RpcError::ErrorResp(payload) => {
            error!("JSON-RPC error {} from {method}: {}", payload.code, payload.message);
            CabError::Rpc {
                method: method.to_string(),
                code: payload.code,
                message: payload.message.into_owned(),
            }
        }
        RpcError::NullResp => CabError::MalformedResponse {
            method: method.to_string(),
            error: "missing result".to_string(),
        },
        RpcError::DeserError { err, text } => {
            error!("failed to parse {method} response: {err}");
            debug!("unparsed {method} response: {text}");
            CabError::MalformedResponse {
                method: method.to_string(),
                error: err.to_string(),
            }
        }
        other => {
            error!("request to {endpoint} failed: {other}");
            CabError::Transport {
                endpoint: endpoint.to_string(),
                error: other.to_string(),
            }
        }
    }
}
