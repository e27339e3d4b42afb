use alloy_primitives::utils::parse_units;
use alloy_primitives::{address, Address, U256};
use lib::{CabError, ChainId, TokenDeployment, TokenRegistry, TokenSymbol};
use std::path::Path;

pub const BSC: ChainId = 56;
pub const OPTIMISM: ChainId = 10;
pub const ARBITRUM: ChainId = 42161;
pub const BASE: ChainId = 8453;

/// Stablecoin deployments the aggregation service supports out of the box.
const DEFAULT_DEPLOYMENTS: &[(ChainId, &str, Address, u8)] = &[
    (BSC, "USDC", address!("8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d"), 18),
    (BSC, "USDT", address!("55d398326f99059fF775485246999027B3197955"), 18),
    (OPTIMISM, "USDC", address!("0b2C639c533813f4Aa9D7837CAf62653d097Ff85"), 6),
    (OPTIMISM, "USDT", address!("94b008aA00579c1307B0EF2c499aD98a8ce58e58"), 6),
    (ARBITRUM, "USDC", address!("af88d065e77c8cC2239327C5EDb3A432268e5831"), 6),
    (ARBITRUM, "USDT", address!("Fd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9"), 6),
    (BASE, "USDC", address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"), 6),
];

pub fn default_registry() -> TokenRegistry {
    let mut registry = TokenRegistry::default();
    for (chain_id, symbol, address, decimals) in DEFAULT_DEPLOYMENTS {
        registry.insert(
            *chain_id,
            TokenSymbol::new(symbol),
            TokenDeployment {
                address: *address,
                decimals: *decimals,
            },
        );
    }
    registry
}

/// Load a registry from a JSON file shaped `{ "<chainId>": { "<SYMBOL>": {address, decimals} } }`.
pub async fn load_registry(path: &Path) -> Result<TokenRegistry, CabError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        CabError::config(format!("failed to read token registry {}: {e}", path.display()))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        CabError::config(format!("failed to parse token registry {}: {e}", path.display()))
    })
}

/// Convert a decimal amount such as `"0.001"` into the token's smallest unit.
pub fn to_smallest_unit(amount: &str, decimals: u8) -> Result<U256, CabError> {
    let parsed = parse_units(amount, decimals)
        .map_err(|e| CabError::config(format!("invalid amount {amount:?}: {e}")))?;
    if parsed.is_negative() {
        return Err(CabError::config(format!("amount {amount:?} is negative")));
    }
    Ok(parsed.get_absolute())
}
