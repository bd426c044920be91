//! Stark-curve keypair signer

use super::{SignContext, Signer, SignerKind};
use crate::felt::{self, Felt};
use crate::types::Signature;
use crate::{Error, Result};
use async_trait::async_trait;
use num_bigint::BigUint;
use rand::RngCore;
use starknet_crypto::{get_public_key, rfc6979_generate_k, sign};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

/// Order of the Stark curve
const CURVE_ORDER_BE: [u8; 32] = [
    0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xb7, 0x81, 0x12, 0x6d, 0xca, 0xe7, 0xb2, 0x32, 0x1e, 0x66, 0xa2, 0x41, 0xad, 0xc6, 0x4d, 0x2f,
];

/// Signs directly with a held Stark private key
///
/// Output layout is `[discriminator?, public_key, r, s]`. The secret is wiped
/// from memory on drop.
pub struct KeypairSigner {
    secret: Zeroizing<[u8; 32]>,
    public_key: Felt,
    discriminator: Option<Felt>,
}

impl KeypairSigner {
    /// Create a signer from a big-endian private key
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Result<Self> {
        let secret = Zeroizing::new(bytes);
        let scalar = BigUint::from_bytes_be(&secret[..]);
        if scalar == BigUint::from(0u8) || scalar >= BigUint::from_bytes_be(&CURVE_ORDER_BE) {
            return Err(Error::Crypto("Private key is not a valid Stark scalar".into()));
        }

        let public_key = get_public_key(&Felt::from_bytes_be(&secret));
        Ok(Self {
            secret,
            public_key,
            discriminator: None,
        })
    }

    /// Create a signer from a hex-encoded private key
    pub fn from_hex(secret: &str) -> Result<Self> {
        let digits = Zeroizing::new(secret.trim().trim_start_matches("0x").to_string());
        if digits.is_empty() || digits.len() > 64 {
            return Err(Error::Crypto("Private key must be 1 to 32 hex bytes".into()));
        }
        let padded = Zeroizing::new(format!("{:0>64}", digits.as_str()));
        let mut bytes = Zeroizing::new([0u8; 32]);
        hex::decode_to_slice(padded.as_str(), &mut bytes[..])?;
        Self::from_secret_bytes(*bytes)
    }

    /// Generate a random signer
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = Zeroizing::new([0u8; 32]);
            rng.fill_bytes(&mut bytes[..]);
            // below 2^251, hence below the curve order
            bytes[0] &= 0x07;
            if let Ok(signer) = Self::from_secret_bytes(*bytes) {
                return signer;
            }
        }
    }

    /// Prefix every signature with an account-variant discriminator
    pub fn with_discriminator(mut self, discriminator: Felt) -> Self {
        self.discriminator = Some(discriminator);
        self
    }

    /// Hex-encoded private key
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("0x{}", hex::encode(&self.secret[..])))
    }

    fn sign_hash(&self, hash: &Felt) -> Result<Signature> {
        let secret = Felt::from_bytes_be(&self.secret);
        let k = rfc6979_generate_k(hash, &secret, None);
        let signature = sign(&secret, hash, &k)
            .map_err(|e| Error::Crypto(format!("Stark signing failed: {}", e)))?;

        let mut out = Vec::with_capacity(4);
        out.extend(self.discriminator);
        out.push(self.public_key);
        out.push(signature.r);
        out.push(signature.s);
        Ok(out)
    }
}

impl std::fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("public_key", &felt::to_hex(&self.public_key))
            .field("discriminator", &self.discriminator.as_ref().map(felt::to_hex))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for KeypairSigner {
    fn public_key(&self) -> Felt {
        self.public_key
    }

    fn kind(&self) -> SignerKind {
        SignerKind::Keypair
    }

    #[instrument(skip(self, context), fields(nonce = %felt::to_hex(&context.nonce)))]
    async fn sign_transaction_hash(&self, hash: Felt, context: &SignContext) -> Result<Signature> {
        debug!(chain = %context.chain_id, "Signing transaction hash");
        self.sign_hash(&hash)
    }

    async fn sign_message_hash(&self, hash: Felt, account: Felt) -> Result<Signature> {
        debug!(account = %felt::to_hex(&account), "Signing message hash");
        self.sign_hash(&hash)
    }

    async fn sign_declare_hash(&self, hash: Felt, context: &SignContext) -> Result<Signature> {
        debug!(chain = %context.chain_id, "Signing declare hash");
        self.sign_hash(&hash)
    }
}
