//! # Chain Access
//!
//! The controller reads account state from and submits transactions to a
//! Starknet node through the [`ChainQuery`] collaborator. Two
//! implementations ship with the crate:
//!
//! - **MemoryChain** - in-process devnet with injectable latency and outages
//! - **RpcChain** - Starknet JSON-RPC over HTTP with URL failover (feature `rpc`)
//!
//! Transaction hashing and calldata encoding live in [`invoke`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use controller_core::chain::{BlockId, ChainQuery, MemoryChain};
//!
//! let chain = MemoryChain::new(ChainId::sepolia());
//! chain.deploy_account(address, class_hash, owner_key);
//!
//! let nonce = chain.get_nonce(address, BlockId::Pending).await?;
//! ```

pub mod invoke;
pub mod memory;

#[cfg(feature = "rpc")]
pub mod rpc;

use crate::felt::{felt_hex, Felt};
use crate::types::{ChainId, Signature};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use invoke::{
    compute_hash_on_elements, compute_invoke_hash, encode_execute_calldata, selector_from_name,
};
pub use memory::MemoryChain;

#[cfg(feature = "rpc")]
pub use rpc::{RpcChain, RpcClient};

// ============================================================================
// Core Types
// ============================================================================

/// Block a query is evaluated against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockId {
    /// Latest accepted block
    Latest,
    /// Pending block (includes transactions not yet in a block)
    #[default]
    Pending,
    /// Specific block number
    Number(u64),
}

/// Fully signed invoke transaction ready for submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedInvoke {
    /// Account submitting the transaction
    #[serde(with = "felt_hex")]
    pub sender_address: Felt,
    /// `__execute__` calldata
    #[serde(with = "felt_hex::seq")]
    pub calldata: Vec<Felt>,
    /// Maximum fee
    #[serde(with = "felt_hex")]
    pub max_fee: Felt,
    /// Account nonce the transaction consumes
    #[serde(with = "felt_hex")]
    pub nonce: Felt,
    /// Contract-level signature
    #[serde(with = "felt_hex::seq")]
    pub signature: Signature,
    /// Hash the signature commits to
    #[serde(with = "felt_hex")]
    pub transaction_hash: Felt,
}

/// Result of an accepted submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeReceipt {
    /// Transaction hash assigned by the node
    #[serde(with = "felt_hex")]
    pub transaction_hash: Felt,
}

// ============================================================================
// Chain Query Trait
// ============================================================================

/// Read/submit access to one chain
///
/// Implementations must keep the error taxonomy intact: transport failures
/// are `ChainUnavailable`, an address without a contract is
/// `ContractNotFound`, a stale nonce is `NonceMismatch`, and any other
/// rejection is `TransactionRejected`.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Chain this collaborator talks to
    fn chain_id(&self) -> ChainId;

    /// Class hash of the contract deployed at `address`
    async fn get_class_hash_at(&self, address: Felt, block: BlockId) -> Result<Felt>;

    /// Current nonce of the account at `address`
    async fn get_nonce(&self, address: Felt, block: BlockId) -> Result<Felt>;

    /// Call a view entrypoint
    async fn call_view(
        &self,
        contract: Felt,
        entrypoint: &str,
        calldata: &[Felt],
    ) -> Result<Vec<Felt>>;

    /// Submit a signed invoke transaction
    async fn submit_invoke(&self, tx: &SignedInvoke) -> Result<InvokeReceipt>;
}
