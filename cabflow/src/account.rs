//! Kernel smart-account provisioning.
//!
//! The account address is a CREATE2 counterfactual derived purely from the
//! signer and the validator configuration, so it is identical on every chain.
//! That shared identity is what lets the aggregation service sum balances.

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy_primitives::{address, hex, keccak256, Address, Bytes, FixedBytes, B256, U256};
use alloy_sol_macro::sol;
use alloy_sol_types::SolCall;
use lib::CabError;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

sol! {
    function initialize(
        bytes21 rootValidator,
        address hook,
        bytes validatorData,
        bytes hookData,
        bytes[] initConfig
    ) external;

    function deployWithFactory(address factory, bytes createData, bytes32 salt)
        external
        payable
        returns (address);
}

pub const ENTRY_POINT_V06: Address = address!("5FF137D4b0FDCD49DcA30c7CF57E578a026d2789");
pub const ENTRY_POINT_V07: Address = address!("0000000071727De22E5E9d8BAf0edAc6f37da032");

pub const KERNEL_V3_1_FACTORY: Address = address!("aac5D4240AF87249B3f71BC8E4A2cae074A3E419");
pub const KERNEL_V3_1_META_FACTORY: Address = address!("d703aaE79538628d27099B8c4f621bE4CCd142d5");
pub const KERNEL_V3_1_IMPLEMENTATION: Address =
    address!("BAC849bB641841b44E965fB01A4Bf5F074f84b4D");
pub const MULTI_CHAIN_ECDSA_VALIDATOR: Address =
    address!("02d32f9c668C92A60b44825C4f79B501c0F685dA");

/// Kernel validation type for a plain validator module.
const VALIDATION_TYPE_VALIDATOR: u8 = 0x01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelVersion {
    V3_0,
    V3_1,
}

impl FromStr for KernelVersion {
    type Err = CabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('v') {
            "0.3.0" | "3.0" => Ok(KernelVersion::V3_0),
            "0.3.1" | "3.1" => Ok(KernelVersion::V3_1),
            other => Err(CabError::config(format!("unknown kernel version {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryPointVersion {
    V06,
    V07,
}

impl EntryPointVersion {
    pub fn address(&self) -> Address {
        match self {
            EntryPointVersion::V06 => ENTRY_POINT_V06,
            EntryPointVersion::V07 => ENTRY_POINT_V07,
        }
    }
}

impl FromStr for EntryPointVersion {
    type Err = CabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('v') {
            "0.6" | "0.6.0" => Ok(EntryPointVersion::V06),
            "0.7" | "0.7.0" => Ok(EntryPointVersion::V07),
            other => Err(CabError::config(format!("unknown entry point version {other}"))),
        }
    }
}

impl fmt::Display for EntryPointVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPointVersion::V06 => write!(f, "0.6"),
            EntryPointVersion::V07 => write!(f, "0.7"),
        }
    }
}

/// How the account checks authorization. Constant across chains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorConfig {
    pub kernel_version: KernelVersion,
    pub validator: Address,
    /// CREATE2 deployer of the account proxy.
    pub factory: Address,
    /// Staker the bundler calls; forwards to `factory`.
    pub meta_factory: Address,
    pub implementation: Address,
    pub index: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            kernel_version: KernelVersion::V3_1,
            validator: MULTI_CHAIN_ECDSA_VALIDATOR,
            factory: KERNEL_V3_1_FACTORY,
            meta_factory: KERNEL_V3_1_META_FACTORY,
            implementation: KERNEL_V3_1_IMPLEMENTATION,
            index: 0,
        }
    }
}

/// A provisioned smart account. Read-only once derived.
#[derive(Clone)]
pub struct SmartAccount {
    address: Address,
    validator_config: ValidatorConfig,
    signer: PrivateKeySigner,
    entry_point: Address,
    init_data: Bytes,
}

impl fmt::Debug for SmartAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartAccount")
            .field("address", &self.address)
            .field("owner", &self.signer.address())
            .field("validator", &self.validator_config.validator)
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

/// Derive the account for `signer` under `validator_config`.
///
/// No network access: deployment is deferred to the account's first
/// operation via [`SmartAccount::factory_data`].
pub fn derive(
    signer: PrivateKeySigner,
    validator_config: ValidatorConfig,
    entry_point_version: EntryPointVersion,
) -> Result<SmartAccount, CabError> {
    match (validator_config.kernel_version, entry_point_version) {
        (KernelVersion::V3_1, EntryPointVersion::V07) => {}
        (kernel, entry_point) => {
            return Err(CabError::config(format!(
                "unsupported combination: kernel {kernel:?} with entry point {entry_point}"
            )))
        }
    }
    if validator_config.validator == Address::ZERO
        || validator_config.factory == Address::ZERO
        || validator_config.implementation == Address::ZERO
    {
        return Err(CabError::config(
            "validator, factory and implementation addresses must be set",
        ));
    }

    let init_data = kernel_init_data(validator_config.validator, signer.address());
    let salt = keccak256([init_data.as_ref(), index_salt(validator_config.index).as_slice()].concat());
    let address = validator_config
        .factory
        .create2_from_code(salt, erc1967_init_code(validator_config.implementation));

    debug!(
        "derived account {address} for owner {} (index {})",
        signer.address(),
        validator_config.index
    );

    Ok(SmartAccount {
        address,
        validator_config,
        signer,
        entry_point: entry_point_version.address(),
        init_data,
    })
}

impl SmartAccount {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.signer.address()
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn validator_config(&self) -> &ValidatorConfig {
        &self.validator_config
    }

    pub fn factory(&self) -> Address {
        self.validator_config.meta_factory
    }

    /// Calldata for the meta factory that deploys this exact account.
    pub fn factory_data(&self) -> Bytes {
        deployWithFactoryCall {
            factory: self.validator_config.factory,
            createData: self.init_data.clone(),
            salt: index_salt(self.validator_config.index),
        }
        .abi_encode()
        .into()
    }

    /// ECDSA validator signature: EIP-191 personal sign over the user
    /// operation hash.
    pub fn sign_user_operation_hash(&self, hash: B256) -> Result<Bytes, CabError> {
        let signature = self
            .signer
            .sign_message_sync(hash.as_slice())
            .map_err(|e| CabError::Signing {
                error: e.to_string(),
            })?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}

fn index_salt(index: u64) -> B256 {
    B256::from(U256::from(index).to_be_bytes::<32>())
}

fn kernel_init_data(validator: Address, owner: Address) -> Bytes {
    let mut root_validator = [0u8; 21];
    root_validator[0] = VALIDATION_TYPE_VALIDATOR;
    root_validator[1..].copy_from_slice(validator.as_slice());
    initializeCall {
        rootValidator: FixedBytes::<21>::from(root_validator),
        hook: Address::ZERO,
        validatorData: Bytes::from(owner.to_vec()),
        hookData: Bytes::new(),
        initConfig: Vec::new(),
    }
    .abi_encode()
    .into()
}

/// Init code of the ERC-1967 proxy the Kernel factory clones.
fn erc1967_init_code(implementation: Address) -> Vec<u8> {
    let mut code = Vec::with_capacity(0x5f);
    code.extend_from_slice(&hex!("603d3d8160223d3973"));
    code.extend_from_slice(implementation.as_slice());
    code.extend_from_slice(&hex!("6009"));
    code.extend_from_slice(&hex!(
        "5155f3363d3d373d3d363d7f360894a13ba1a3210667c828492db98dca3e2076"
    ));
    code.extend_from_slice(&hex!(
        "cc3735a920a3ca505d382bbc545af43d6000803e6038573d6000fd5b3d6000f3"
    ));
    code
}
