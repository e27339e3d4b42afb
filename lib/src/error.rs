use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every failure the cross-chain balance run can surface.
///
/// Poll failures (`Transport`, `EnrollmentQuery`, `BalanceQuery`) are safe to
/// re-attempt on the next trigger. `Quote`, `Submission` and `Timeout` are
/// never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CabError {
    #[error("configuration error: {error}")]
    Configuration { error: String },
    #[error("transport error talking to {endpoint}: {error}")]
    Transport { endpoint: String, error: String },
    #[error("JSON-RPC error {code} from {method}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
    #[error("malformed response to {method}: {error}")]
    MalformedResponse { method: String, error: String },
    #[error("failed to query enabled chains: {error}")]
    EnrollmentQuery { error: String },
    #[error("failed to query aggregated balance: {error}")]
    BalanceQuery { error: String },
    #[error("invalid operation: {error}")]
    InvalidOperation { error: String },
    #[error("aggregation service could not quote the operation: {error}")]
    Quote { error: String },
    #[error("failed to sign user operation: {error}")]
    Signing { error: String },
    #[error("failed to submit user operation: {error}")]
    Submission { error: String },
    #[error("user operation {user_op_hash} not included after {waited_secs}s; on-chain fate unknown, re-check before retrying")]
    Timeout {
        user_op_hash: String,
        waited_secs: u64,
    },
    #[error("{what} not satisfied after {attempts} attempts")]
    Exhausted { what: String, attempts: u32 },
    #[error("run cancelled")]
    Cancelled,
}

impl CabError {
    pub fn kind(&self) -> &str {
        match *self {
            CabError::Configuration { .. } => "Configuration",
            CabError::Transport { .. } => "Transport",
            CabError::Rpc { .. } => "Rpc",
            CabError::MalformedResponse { .. } => "MalformedResponse",
            CabError::EnrollmentQuery { .. } => "EnrollmentQuery",
            CabError::BalanceQuery { .. } => "BalanceQuery",
            CabError::InvalidOperation { .. } => "InvalidOperation",
            CabError::Quote { .. } => "Quote",
            CabError::Signing { .. } => "Signing",
            CabError::Submission { .. } => "Submission",
            CabError::Timeout { .. } => "Timeout",
            CabError::Exhausted { .. } => "Exhausted",
            CabError::Cancelled => "Cancelled",
        }
    }

    /// Whether the caller may re-issue the same poll after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CabError::Transport { .. }
                | CabError::EnrollmentQuery { .. }
                | CabError::BalanceQuery { .. }
        )
    }

    pub fn config(error: impl Into<String>) -> Self {
        CabError::Configuration {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_failures_are_retryable() {
        assert!(CabError::EnrollmentQuery {
            error: "503".into()
        }
        .is_retryable());
        assert!(CabError::BalanceQuery {
            error: "503".into()
        }
        .is_retryable());
        assert!(CabError::Transport {
            endpoint: "http://localhost".into(),
            error: "refused".into()
        }
        .is_retryable());
    }

    #[test]
    fn terminal_failures_are_not_retryable() {
        assert!(!CabError::Quote {
            error: "insufficient".into()
        }
        .is_retryable());
        assert!(!CabError::Timeout {
            user_op_hash: "0x01".into(),
            waited_secs: 60
        }
        .is_retryable());
        assert!(!CabError::config("missing PRIVATE_KEY").is_retryable());
        assert!(!CabError::Cancelled.is_retryable());
    }

    #[test]
    fn timeout_message_warns_fate_is_unknown() {
        let e = CabError::Timeout {
            user_op_hash: "0xabc".into(),
            waited_secs: 60,
        };
        assert_eq!(e.kind(), "Timeout");
        assert!(e.to_string().contains("fate unknown"));
    }
}
