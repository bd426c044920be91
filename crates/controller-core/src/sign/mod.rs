//! Signers
//!
//! Every account variant signs through the same [`Signer`] capability:
//!
//! - **KeypairSigner** - Stark-curve key held in process memory
//! - **CredentialSigner** - platform credential (passkey); each signature
//!   runs a fresh ceremony and is encoded by [`webauthn`]
//!
//! ## Signing Flow (credential)
//!
//! 1. Hash is turned into a fixed-size challenge
//! 2. Ceremony is queued behind any in-flight ceremony and bounded by a timeout
//! 3. Client data is checked to bind the challenge
//! 4. Assertion is encoded into the contract signature layout

mod credential;
mod keypair;
pub mod software;
pub mod webauthn;

pub use credential::{CredentialCeremony, CredentialSigner};
pub use keypair::KeypairSigner;
pub use software::{credential_public_key_felt, SoftwareAuthenticator};
pub use webauthn::SignatureLayout;

use crate::felt::Felt;
use crate::types::{ChainId, Signature};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account variant a signer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    /// Local Stark keypair
    Keypair,
    /// Platform credential
    Credential,
}

impl fmt::Display for SignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerKind::Keypair => write!(f, "keypair"),
            SignerKind::Credential => write!(f, "credential"),
        }
    }
}

/// Transaction a hash belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignContext {
    /// Account signing the transaction
    pub address: Felt,
    /// Chain the transaction targets
    pub chain_id: ChainId,
    /// Nonce the transaction consumes
    pub nonce: Felt,
}

/// Signing capability shared by every account variant
#[async_trait]
pub trait Signer: Send + Sync {
    /// Public key identifying the signer to the account contract
    fn public_key(&self) -> Felt;

    /// Account variant
    fn kind(&self) -> SignerKind;

    /// Sign an invoke transaction hash
    async fn sign_transaction_hash(&self, hash: Felt, context: &SignContext) -> Result<Signature>;

    /// Sign an off-chain message hash for `account`
    async fn sign_message_hash(&self, hash: Felt, account: Felt) -> Result<Signature>;

    /// Sign a declare transaction hash
    async fn sign_declare_hash(&self, hash: Felt, context: &SignContext) -> Result<Signature>;
}
