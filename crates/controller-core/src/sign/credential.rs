//! Platform credential signer

use super::webauthn::{self, SignatureLayout};
use super::{SignContext, Signer, SignerKind};
use crate::felt::{self, Felt, FELT_BYTES};
use crate::types::{Assertion, Signature};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// Default challenge size in bytes
pub const DEFAULT_CHALLENGE_LEN: usize = 32;

/// Default bound on a single ceremony
pub const DEFAULT_CEREMONY_TIMEOUT: Duration = Duration::from_secs(60);

/// Platform credential API
///
/// Implementations reject with `UserCancelled` when the user dismisses the
/// prompt and with `CredentialUnavailable` when the credential no longer
/// exists on the device.
#[async_trait]
pub trait CredentialCeremony: Send + Sync {
    /// Run one assertion ceremony over `challenge`
    async fn request_assertion(&self, challenge: &[u8], credential_id: &[u8]) -> Result<Assertion>;
}

/// Signs by running a fresh platform-credential ceremony per hash
pub struct CredentialSigner {
    ceremony: Arc<dyn CredentialCeremony>,
    credential_id: Vec<u8>,
    public_key: Felt,
    layout: SignatureLayout,
    challenge_len: usize,
    ceremony_timeout: Duration,
    /// FIFO queue of ceremonies; the platform runs one at a time
    queue: Mutex<()>,
}

impl CredentialSigner {
    /// Create a signer for a registered credential
    pub fn new(ceremony: Arc<dyn CredentialCeremony>, credential_id: Vec<u8>, public_key: Felt) -> Self {
        Self {
            ceremony,
            credential_id,
            public_key,
            layout: SignatureLayout::default(),
            challenge_len: DEFAULT_CHALLENGE_LEN,
            ceremony_timeout: DEFAULT_CEREMONY_TIMEOUT,
            queue: Mutex::new(()),
        }
    }

    /// Set the contract signature layout
    pub fn with_layout(mut self, layout: SignatureLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the challenge size
    pub fn with_challenge_len(mut self, len: usize) -> Self {
        self.challenge_len = len;
        self
    }

    /// Set the ceremony timeout
    pub fn with_ceremony_timeout(mut self, timeout: Duration) -> Self {
        self.ceremony_timeout = timeout;
        self
    }

    /// Credential identifier
    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    /// Challenge bytes for a hash
    ///
    /// The big-endian hash is left-padded with zeros up to the challenge
    /// size, or keeps its low-order bytes when the challenge is shorter.
    pub fn challenge_for(&self, hash: &Felt) -> Vec<u8> {
        let bytes = hash.to_bytes_be();
        if self.challenge_len >= FELT_BYTES {
            let mut challenge = vec![0u8; self.challenge_len - FELT_BYTES];
            challenge.extend_from_slice(&bytes);
            challenge
        } else {
            bytes[FELT_BYTES - self.challenge_len..].to_vec()
        }
    }

    #[instrument(skip(self, hash), fields(hash = %felt::to_hex(&hash)))]
    async fn sign_hash(&self, hash: Felt) -> Result<Signature> {
        let challenge = self.challenge_for(&hash);

        let _turn = self.queue.lock().await;
        debug!("Starting credential ceremony");

        let assertion = tokio::time::timeout(
            self.ceremony_timeout,
            self.ceremony.request_assertion(&challenge, &self.credential_id),
        )
        .await
        .map_err(|_| {
            Error::UserCancelled(format!(
                "Credential ceremony timed out after {}s",
                self.ceremony_timeout.as_secs()
            ))
        })??;

        webauthn::verify_client_data(&assertion.client_data_json, &challenge)?;

        let signature = webauthn::encode_assertion(assertion, &self.layout).map_err(|e| {
            error!(error = %e, "Assertion encoding failed");
            e
        })?;

        info!(felts = signature.len(), "Credential signature produced");
        Ok(signature)
    }
}

impl std::fmt::Debug for CredentialSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSigner")
            .field("credential_id", &hex::encode(&self.credential_id))
            .field("public_key", &felt::to_hex(&self.public_key))
            .field("layout", &self.layout)
            .field("challenge_len", &self.challenge_len)
            .field("ceremony_timeout", &self.ceremony_timeout)
            .finish()
    }
}

#[async_trait]
impl Signer for CredentialSigner {
    fn public_key(&self) -> Felt {
        self.public_key
    }

    fn kind(&self) -> SignerKind {
        SignerKind::Credential
    }

    async fn sign_transaction_hash(&self, hash: Felt, context: &SignContext) -> Result<Signature> {
        debug!(
            chain = %context.chain_id,
            nonce = %felt::to_hex(&context.nonce),
            "Signing transaction hash"
        );
        self.sign_hash(hash).await
    }

    async fn sign_message_hash(&self, hash: Felt, account: Felt) -> Result<Signature> {
        debug!(account = %felt::to_hex(&account), "Signing message hash");
        self.sign_hash(hash).await
    }

    async fn sign_declare_hash(&self, hash: Felt, context: &SignContext) -> Result<Signature> {
        debug!(chain = %context.chain_id, "Signing declare hash");
        self.sign_hash(hash).await
    }
}
