use crate::account::{EntryPointVersion, KernelVersion, ValidatorConfig};
use crate::gate::BalancePolicy;
use crate::session::ChainEndpoint;
use crate::tokens::{default_registry, load_registry, ARBITRUM, BASE, BSC, OPTIMISM};
use alloy::signers::local::PrivateKeySigner;
use clap::{Parser, ValueEnum};
use lib::{CabError, ChainId, TokenRegistry, TokenSymbol};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Enroll a smart account in cross-chain balance aggregation and send a
/// sponsored transfer repaid from other chains.
#[derive(Parser, Debug, Clone)]
#[command(name = "cabflow")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Hex-encoded secp256k1 key that owns the smart account
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Aggregation service (paymaster) JSON-RPC endpoint
    #[arg(long, env = "CAB_PAYMASTER_URL")]
    pub cab_paymaster_url: Option<String>,

    /// ERC-4337 bundler endpoint for the target chain
    #[arg(long, env = "BUNDLER_RPC")]
    pub bundler_rpc: Option<String>,

    /// Chain JSON-RPC endpoint (defaults to a public endpoint for known chains)
    #[arg(long, env = "CHAIN_RPC")]
    pub rpc_url: Option<String>,

    /// Chain the operation executes on
    #[arg(long, default_value_t = BSC)]
    pub chain_id: ChainId,

    /// Proceed once strictly more than this many chains are enabled
    #[arg(long, default_value_t = 3)]
    pub enabled_chain_threshold: usize,

    /// What prompts each enrollment and balance poll
    #[arg(long, value_enum, default_value_t = TriggerKind::Stdin)]
    pub trigger: TriggerKind,

    /// Delay between polls for the interval trigger; initial delay for backoff
    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Give up the enrollment or balance wait after this many polls
    #[arg(long)]
    pub max_attempts: Option<u32>,

    #[arg(long, default_value_t = 60)]
    pub receipt_timeout_secs: u64,

    #[arg(long, default_value_t = 2)]
    pub receipt_poll_interval_secs: u64,

    /// Balance required before quoting
    #[arg(long, value_enum, default_value_t = BalancePolicy::Any)]
    pub balance_policy: BalancePolicy,

    /// Amount of each token sent back to the account itself
    #[arg(long, default_value = "0.001")]
    pub transfer_amount: String,

    /// Tokens to enable, transfer and repay with
    #[arg(long, value_delimiter = ',', default_value = "USDC,USDT")]
    pub tokens: Vec<String>,

    /// JSON token registry replacing the built-in one
    #[arg(long)]
    pub token_registry: Option<PathBuf>,

    /// Kernel smart account version
    #[arg(long, default_value = "0.3.1")]
    pub kernel_version: String,

    /// ERC-4337 entry point version
    #[arg(long, default_value = "0.7")]
    pub entry_point_version: String,

    /// Account index; each index yields a distinct account for the same key
    #[arg(long, default_value_t = 0)]
    pub account_index: u64,

    /// Verbosity level: higher is more verbose
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TriggerKind {
    /// One line on stdin per poll
    Stdin,
    /// Fixed delay between polls
    Interval,
    /// Doubling delay between polls
    Backoff,
}

/// Everything a run needs, validated up front.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub signer: PrivateKeySigner,
    pub paymaster_url: Url,
    pub bundler_url: Url,
    pub chain: ChainEndpoint,
    pub enabled_chain_threshold: usize,
    pub trigger: TriggerKind,
    pub poll_interval: Duration,
    pub max_attempts: Option<u32>,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub balance_policy: BalancePolicy,
    pub transfer_amount: String,
    pub tokens: Vec<TokenSymbol>,
    pub registry: TokenRegistry,
    pub validator: ValidatorConfig,
    pub entry_point_version: EntryPointVersion,
}

/// Longest accepted poll interval.
pub const MAX_POLL_INTERVAL_SECS: u64 = 60 * 60;
/// Longest accepted receipt wait.
pub const MAX_RECEIPT_TIMEOUT_SECS: u64 = 24 * 60 * 60;

pub fn default_rpc_url(chain_id: ChainId) -> Option<&'static str> {
    match chain_id {
        BSC => Some("https://bsc-dataseed.bnbchain.org"),
        OPTIMISM => Some("https://mainnet.optimism.io"),
        ARBITRUM => Some("https://arb1.arbitrum.io/rpc"),
        BASE => Some("https://mainnet.base.org"),
        _ => None,
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, CabError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CabError::config(format!("{name} is required")))
}

fn parse_url(value: &str, name: &str) -> Result<Url, CabError> {
    Url::parse(value).map_err(|e| CabError::config(format!("{name} is not a valid URL: {e}")))
}

impl RunConfig {
    /// Validate `args` in full before anything touches the network.
    pub async fn from_args(args: Args) -> Result<Self, CabError> {
        let signer = PrivateKeySigner::from_str(required(&args.private_key, "PRIVATE_KEY")?)
            .map_err(|e| CabError::config(format!("PRIVATE_KEY is not a valid key: {e}")))?;
        let paymaster_url = parse_url(
            required(&args.cab_paymaster_url, "CAB_PAYMASTER_URL")?,
            "CAB_PAYMASTER_URL",
        )?;
        let bundler_url = parse_url(required(&args.bundler_rpc, "BUNDLER_RPC")?, "BUNDLER_RPC")?;
        let rpc_url = match args.rpc_url.as_deref() {
            Some(url) => parse_url(url, "CHAIN_RPC")?,
            None => {
                let url = default_rpc_url(args.chain_id).ok_or_else(|| {
                    CabError::config(format!(
                        "CHAIN_RPC is required for chain {}",
                        args.chain_id
                    ))
                })?;
                parse_url(url, "CHAIN_RPC")?
            }
        };

        let mut tokens = Vec::new();
        for raw in &args.tokens {
            let symbol = TokenSymbol::from_str(raw.trim()).map_err(CabError::config)?;
            if !tokens.contains(&symbol) {
                tokens.push(symbol);
            }
        }
        if tokens.is_empty() {
            return Err(CabError::config("at least one token is required"));
        }

        let registry = match &args.token_registry {
            Some(path) => load_registry(path).await?,
            None => default_registry(),
        };
        for token in &tokens {
            if registry.get(args.chain_id, token).is_none() {
                return Err(CabError::config(format!(
                    "token {token} has no deployment on chain {}",
                    args.chain_id
                )));
            }
        }

        if args.poll_interval_secs == 0 || args.receipt_poll_interval_secs == 0 {
            return Err(CabError::config("poll intervals must be at least one second"));
        }
        if args.poll_interval_secs > MAX_POLL_INTERVAL_SECS
            || args.receipt_poll_interval_secs > MAX_POLL_INTERVAL_SECS
        {
            return Err(CabError::config(format!(
                "poll intervals must not exceed {MAX_POLL_INTERVAL_SECS} seconds"
            )));
        }
        if args.receipt_timeout_secs == 0 || args.receipt_timeout_secs > MAX_RECEIPT_TIMEOUT_SECS {
            return Err(CabError::config(format!(
                "--receipt-timeout-secs must be between 1 and {MAX_RECEIPT_TIMEOUT_SECS}"
            )));
        }
        if args.max_attempts == Some(0) {
            return Err(CabError::config("--max-attempts must be positive"));
        }

        let validator = ValidatorConfig {
            kernel_version: KernelVersion::from_str(&args.kernel_version)?,
            index: args.account_index,
            ..ValidatorConfig::default()
        };
        let entry_point_version = EntryPointVersion::from_str(&args.entry_point_version)?;

        Ok(Self {
            signer,
            paymaster_url,
            bundler_url,
            chain: ChainEndpoint {
                chain_id: args.chain_id,
                rpc_url,
            },
            enabled_chain_threshold: args.enabled_chain_threshold,
            trigger: args.trigger,
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            max_attempts: args.max_attempts,
            receipt_timeout: Duration::from_secs(args.receipt_timeout_secs),
            receipt_poll_interval: Duration::from_secs(args.receipt_poll_interval_secs),
            balance_policy: args.balance_policy,
            transfer_amount: args.transfer_amount,
            tokens,
            registry,
            validator,
            entry_point_version,
        })
    }
}
