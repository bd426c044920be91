//! Core types for the controller
//!
//! This module defines the data model shared by the signer, session and
//! execution layers: chain identifiers, contract calls, transaction requests,
//! credential assertions and cached account state.

use crate::felt::{self, felt_hex, Felt};
use crate::policy::{Policy, PolicySet};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Contract-level signature: an ordered sequence of field elements
pub type Signature = Vec<Felt>;

/// Chain identifier (a Cairo short string such as `SN_MAIN`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(#[serde(with = "felt_hex")] pub Felt);

impl ChainId {
    /// Starknet mainnet
    pub fn mainnet() -> Self {
        ChainId(Felt::from_bytes_be_slice(b"SN_MAIN"))
    }

    /// Starknet Sepolia testnet
    pub fn sepolia() -> Self {
        ChainId(Felt::from_bytes_be_slice(b"SN_SEPOLIA"))
    }

    /// Build from a short-string name
    pub fn from_name(name: &str) -> Result<Self> {
        felt::short_string(name).map(ChainId)
    }

    /// Short-string name, or hex if the id is not printable
    pub fn name(&self) -> String {
        felt::decode_short_string(&self.0).unwrap_or_else(|| felt::to_hex(&self.0))
    }

    /// Storage key fragment
    pub fn key(&self) -> String {
        felt::to_hex(&self.0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<Felt> for ChainId {
    fn from(id: Felt) -> Self {
        ChainId(id)
    }
}

/// A single contract call within a multicall
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Target contract address
    #[serde(with = "felt_hex")]
    pub to: Felt,
    /// Entrypoint name
    pub entrypoint: String,
    /// Call arguments
    #[serde(with = "felt_hex::seq", default)]
    pub calldata: Vec<Felt>,
}

impl Call {
    /// Create a new call
    pub fn new(to: Felt, entrypoint: impl Into<String>, calldata: Vec<Felt>) -> Self {
        Self {
            to,
            entrypoint: entrypoint.into(),
            calldata,
        }
    }

    /// Policy needed to execute this call without a prompt
    pub fn policy(&self) -> Policy {
        Policy::new(self.to, Some(self.entrypoint.as_str()))
    }
}

/// Fee limits the caller wants to impose on a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeOverrides {
    /// Maximum fee the account will pay
    #[serde(with = "felt_hex")]
    pub max_fee: Felt,
}

/// Transaction request built per call to the controller; never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Ordered calls executed atomically
    pub calls: Vec<Call>,
    /// Optional fee limits
    #[serde(default)]
    pub fee_overrides: Option<FeeOverrides>,
}

impl TransactionRequest {
    /// Create a request from calls
    pub fn new(calls: Vec<Call>) -> Self {
        Self {
            calls,
            fee_overrides: None,
        }
    }

    /// Set the maximum fee
    pub fn with_max_fee(mut self, max_fee: Felt) -> Self {
        self.fee_overrides = Some(FeeOverrides { max_fee });
        self
    }

    /// Maximum fee requested by the caller, if any
    pub fn max_fee(&self) -> Option<Felt> {
        self.fee_overrides.map(|f| f.max_fee)
    }

    /// One policy per distinct `(contract, entrypoint)` pair
    pub fn policies(&self) -> PolicySet {
        crate::policy::policies_for_calls(&self.calls)
    }
}

/// Output of a platform credential signing ceremony
///
/// Produced once per ceremony and consumed exactly once by the encoder; it is
/// deliberately not `Clone`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    /// Credential identifier
    #[serde(with = "bytes_hex")]
    pub credential_id: Vec<u8>,
    /// Raw authenticator data
    #[serde(with = "bytes_hex")]
    pub authenticator_data: Vec<u8>,
    /// Raw client data JSON
    #[serde(with = "bytes_hex", rename = "clientDataJSON")]
    pub client_data_json: Vec<u8>,
    /// DER-encoded ECDSA signature
    #[serde(with = "bytes_hex")]
    pub signature_der: Vec<u8>,
    /// Client extension outputs
    #[serde(default)]
    pub client_extensions: serde_json::Value,
}

/// Cached on-chain state of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Account address
    #[serde(with = "felt_hex")]
    pub address: Felt,
    /// Chain the state belongs to
    pub chain_id: ChainId,
    /// Whether a contract is deployed at the address
    pub deployed: bool,
    /// Whether the signer's key is an owner of the account
    pub registered: bool,
    /// Best-known-safe nonce (zero before any successful sync)
    #[serde(with = "felt_hex")]
    pub nonce: Felt,
    /// Class hash of the deployed contract
    #[serde(with = "felt_hex::option", default)]
    pub class_hash: Option<Felt>,
    /// Time of the last successful sync
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl AccountState {
    /// State of an account nothing is known about yet
    pub fn unknown(address: Felt, chain_id: ChainId) -> Self {
        Self {
            address,
            chain_id,
            deployed: false,
            registered: false,
            nonce: Felt::ZERO,
            class_hash: None,
            last_synced_at: None,
        }
    }

    /// Milliseconds since the last successful sync
    pub fn age_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_synced_at
            .map(|at| (now - at).num_milliseconds())
    }
}

mod bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
