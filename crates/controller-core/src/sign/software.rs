//! Software platform authenticator
//!
//! A P-256 credential held in process memory that answers assertion
//! ceremonies the way a platform authenticator does:
//!
//! ```text
//! authenticator_data = sha256(rp_id) ‖ flags ‖ sign_count (u32 BE)
//! client_data_json   = {"type":"webauthn.get","challenge":b64url(challenge),...}
//! signature          = ECDSA-P256(authenticator_data ‖ sha256(client_data_json)), DER
//! ```
//!
//! Used by the CLI demo and by tests that need real credential signatures.

use super::credential::CredentialCeremony;
use crate::felt::Felt;
use crate::types::Assertion;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{DerSignature, Signature as P256Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// User present
const FLAG_UP: u8 = 0x01;
/// User verified
const FLAG_UV: u8 = 0x04;

/// Felt identity of a credential public key
///
/// SHA-256 of the SEC1-encoded point, truncated to 250 bits.
pub fn credential_public_key_felt(sec1: &[u8]) -> Felt {
    let mut digest: [u8; 32] = Sha256::digest(sec1).into();
    digest[0] &= 0x03;
    Felt::from_bytes_be(&digest)
}

/// In-memory P-256 credential
pub struct SoftwareAuthenticator {
    rp_id: String,
    credential_id: Vec<u8>,
    signing_key: SigningKey,
    sign_count: AtomicU32,
    revoked: AtomicBool,
}

impl SoftwareAuthenticator {
    /// Register a new credential for a relying party
    pub fn new(rp_id: impl Into<String>) -> Self {
        let mut credential_id = vec![0u8; 16];
        OsRng.fill_bytes(&mut credential_id);

        Self {
            rp_id: rp_id.into(),
            credential_id,
            signing_key: SigningKey::random(&mut OsRng),
            sign_count: AtomicU32::new(0),
            revoked: AtomicBool::new(false),
        }
    }

    /// Relying party identifier
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    /// Credential identifier
    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    /// Uncompressed SEC1 public key
    pub fn public_key_sec1(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Felt identity registered with the account contract
    pub fn public_key_felt(&self) -> Felt {
        credential_public_key_felt(&self.public_key_sec1())
    }

    /// Ceremonies answered so far
    pub fn sign_count(&self) -> u32 {
        self.sign_count.load(Ordering::SeqCst)
    }

    /// Remove the credential from the "device"
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    /// Verify an assertion produced by this credential
    pub fn verify_assertion(&self, assertion: &Assertion) -> Result<()> {
        let signature = P256Signature::from_der(&assertion.signature_der)
            .map_err(|e| Error::InvalidSignatureEncoding(e.to_string()))?;
        let message = signed_message(&assertion.authenticator_data, &assertion.client_data_json);
        VerifyingKey::from(&self.signing_key)
            .verify(&message, &signature)
            .map_err(|e| Error::InvalidAssertion(format!("P-256 verification failed: {}", e)))
    }

    fn authenticator_data(&self, counter: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(37);
        data.extend_from_slice(&Sha256::digest(self.rp_id.as_bytes()));
        data.push(FLAG_UP | FLAG_UV);
        data.extend_from_slice(&counter.to_be_bytes());
        data
    }
}

fn signed_message(authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let mut message = authenticator_data.to_vec();
    message.extend_from_slice(&Sha256::digest(client_data_json));
    message
}

impl std::fmt::Debug for SoftwareAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareAuthenticator")
            .field("rp_id", &self.rp_id)
            .field("credential_id", &hex::encode(&self.credential_id))
            .field("sign_count", &self.sign_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialCeremony for SoftwareAuthenticator {
    async fn request_assertion(&self, challenge: &[u8], credential_id: &[u8]) -> Result<Assertion> {
        if self.revoked.load(Ordering::SeqCst) {
            return Err(Error::CredentialUnavailable("Credential was removed".into()));
        }
        // an empty id lets the authenticator pick its own credential
        if !credential_id.is_empty() && credential_id != self.credential_id.as_slice() {
            return Err(Error::CredentialUnavailable(format!(
                "Unknown credential {}",
                hex::encode(credential_id)
            )));
        }

        let counter = self.sign_count.fetch_add(1, Ordering::SeqCst) + 1;
        let authenticator_data = self.authenticator_data(counter);
        let client_data_json = serde_json::to_vec(&serde_json::json!({
            "type": super::webauthn::WEBAUTHN_GET,
            "challenge": URL_SAFE_NO_PAD.encode(challenge),
            "origin": format!("https://{}", self.rp_id),
            "crossOrigin": false,
        }))?;

        let signature: P256Signature = self
            .signing_key
            .sign(&signed_message(&authenticator_data, &client_data_json));
        let der: DerSignature = signature.to_der();

        Ok(Assertion {
            credential_id: self.credential_id.clone(),
            authenticator_data,
            client_data_json,
            signature_der: der.as_bytes().to_vec(),
            client_extensions: serde_json::Value::Null,
        })
    }
}
