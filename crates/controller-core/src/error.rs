//! Error types for controller operations
//!
//! Each layer keeps its own error kind: an encoding defect never surfaces as a
//! network failure and vice versa, so callers can tell "my request was
//! malformed" from "the network is down" from "I need to ask for permission".

use crate::policy::Policy;
use thiserror::Error;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during controller operations
#[derive(Debug, Error)]
pub enum Error {
    // ============ Encoding Errors ============
    /// Integer does not fit in a field element
    #[error("Value out of field range: {0}")]
    OutOfRange(String),

    /// DER signature could not be parsed
    #[error("Invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),

    /// Signature scalar does not fit in three 86-bit limbs
    #[error("Signature scalar out of range: {bits} bits (max 258)")]
    ScalarOutOfRange { bits: u64 },

    /// Word/byte codec violation
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Assertion does not bind the requested challenge
    #[error("Invalid assertion: {0}")]
    InvalidAssertion(String),

    // ============ Ceremony Errors ============
    /// User dismissed or timed out the prompt
    #[error("User cancelled: {0}")]
    UserCancelled(String),

    /// Credential missing or revoked on this device
    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    // ============ Authorization Errors ============
    /// Request needs policies the session does not grant
    #[error("Missing policies: {} uncovered", .0.len())]
    MissingPolicies(Vec<Policy>),

    // ============ Chain Errors ============
    /// Network or RPC failure
    #[error("Chain unavailable: {0}")]
    ChainUnavailable(String),

    /// Submitted nonce did not match the account nonce
    #[error("Nonce mismatch: submitted {submitted}")]
    NonceMismatch { submitted: String },

    /// Contract is not deployed at the address
    #[error("Contract not found: {0}")]
    ContractNotFound(String),

    /// Transaction rejected (invalid signature, balance, fee)
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    /// No chain registered for the requested id
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    // ============ Cryptographic Errors ============
    /// Signing primitive failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    // ============ Configuration / Storage Errors ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if the caller may retry the same operation
    ///
    /// `UserCancelled` re-prompts; `ChainUnavailable` should be retried with
    /// backoff by the caller (never silently inside the core).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ChainUnavailable(_) | Error::UserCancelled(_))
    }

    /// Check if the error is expected to reach an end-user message
    ///
    /// Anything else indicates a defect and should be logged for diagnosis.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::UserCancelled(_) | Error::MissingPolicies(_) | Error::ChainUnavailable(_)
        )
    }

    /// Check if the next attempt must re-read the nonce from the chain
    pub fn requires_fresh_nonce(&self) -> bool {
        matches!(self, Error::NonceMismatch { .. })
    }

    /// Check if the error comes from the codec layer
    pub fn is_encoding_defect(&self) -> bool {
        matches!(
            self,
            Error::OutOfRange(_)
                | Error::InvalidSignatureEncoding(_)
                | Error::ScalarOutOfRange { .. }
                | Error::InvalidEncoding(_)
                | Error::InvalidAssertion(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Deserialization(e.to_string())
    }
}
