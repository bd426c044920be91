//! WebAuthn assertion encoding
//!
//! Converts a platform-credential assertion into the field-element signature
//! the account contract verifies. The layout is a compatibility contract
//! with the verifying contract and must be reproduced exactly:
//!
//! ```text
//! [discriminator, signer_slot,
//!  r_lo, r_mid, r_hi, s_lo, s_mid, s_hi,
//!  format_count, format_version,
//!  client_data_word_count, client_data_remainder, ...client_data_words,
//!  auth_data_word_count,   auth_data_remainder,   ...auth_data_words]
//! ```
//!
//! P-256 scalars are 256-bit, wider than a field element, so `r` and `s` each
//! travel as three 86-bit limbs: `x = lo + mid·2^86 + hi·2^172`.

use crate::felt::{self, felt_hex, Felt};
use crate::types::{Assertion, Signature};
use crate::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Bits per scalar limb
pub const LIMB_BITS: usize = 86;

/// Widest scalar three limbs can carry
pub const MAX_SCALAR_BITS: u64 = (LIMB_BITS * 3) as u64;

/// Client data type of an assertion ceremony
pub const WEBAUTHN_GET: &str = "webauthn.get";

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;

/// Marker constants of the contract signature layout
///
/// The values are deployment-specific and follow the verifying contract's
/// version; the defaults match the current credential account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureLayout {
    /// Account-variant discriminator leading the signature
    #[serde(with = "felt_hex")]
    pub discriminator: Felt,
    /// Signer slot following the discriminator
    #[serde(with = "felt_hex")]
    pub signer_slot: Felt,
    /// Literal count preceding the byte payloads
    pub format_count: u64,
    /// Format version following the count
    pub format_version: u64,
}

impl Default for SignatureLayout {
    fn default() -> Self {
        Self {
            discriminator: Felt::from_bytes_be_slice(b"Webauthn"),
            signer_slot: Felt::ZERO,
            format_count: 9,
            format_version: 0,
        }
    }
}

/// Parse a DER `SEQUENCE { INTEGER r, INTEGER s }`
///
/// A single leading `0x00` sign-padding byte is stripped from each integer
/// independently. Only short-form lengths are accepted; an ECDSA P-256
/// signature never needs the long form.
pub fn parse_der_signature(der: &[u8]) -> Result<(BigUint, BigUint)> {
    if der.len() < 2 {
        return Err(Error::InvalidSignatureEncoding(format!(
            "{} bytes is too short",
            der.len()
        )));
    }
    if der[0] != DER_SEQUENCE {
        return Err(Error::InvalidSignatureEncoding(format!(
            "Expected SEQUENCE tag 0x30, found 0x{:02x}",
            der[0]
        )));
    }

    let seq_len = short_form_len(der[1])?;
    if seq_len != der.len() - 2 {
        return Err(Error::InvalidSignatureEncoding(format!(
            "SEQUENCE length {} does not match {} content bytes",
            seq_len,
            der.len() - 2
        )));
    }

    let (r, rest) = read_integer(&der[2..], "r")?;
    let (s, rest) = read_integer(rest, "s")?;
    if !rest.is_empty() {
        return Err(Error::InvalidSignatureEncoding(format!(
            "{} trailing bytes after s",
            rest.len()
        )));
    }

    Ok((r, s))
}

fn short_form_len(byte: u8) -> Result<usize> {
    if byte & 0x80 != 0 {
        return Err(Error::InvalidSignatureEncoding(
            "Long-form DER length".into(),
        ));
    }
    Ok(byte as usize)
}

fn read_integer<'a>(bytes: &'a [u8], name: &str) -> Result<(BigUint, &'a [u8])> {
    if bytes.len() < 2 {
        return Err(Error::InvalidSignatureEncoding(format!(
            "Truncated INTEGER {}",
            name
        )));
    }
    if bytes[0] != DER_INTEGER {
        return Err(Error::InvalidSignatureEncoding(format!(
            "Expected INTEGER tag 0x02 for {}, found 0x{:02x}",
            name, bytes[0]
        )));
    }

    let len = short_form_len(bytes[1])?;
    if len == 0 || bytes.len() < 2 + len {
        return Err(Error::InvalidSignatureEncoding(format!(
            "INTEGER {} length {} out of bounds",
            name, len
        )));
    }

    let mut value = &bytes[2..2 + len];
    if value.len() > 1 && value[0] == 0x00 {
        value = &value[1..];
    }

    Ok((BigUint::from_bytes_be(value), &bytes[2 + len..]))
}

/// Split a scalar into `(lo, mid, hi)` 86-bit limbs
pub fn split_limbs(value: &BigUint) -> Result<[Felt; 3]> {
    if value.bits() > MAX_SCALAR_BITS {
        return Err(Error::ScalarOutOfRange { bits: value.bits() });
    }

    let mask = (BigUint::from(1u8) << LIMB_BITS) - 1u8;
    let lo = value & &mask;
    let mid = (value >> LIMB_BITS) & &mask;
    let hi = value >> (LIMB_BITS * 2);

    // 86 bits fit in 11 bytes
    Ok([
        felt::from_uint(&lo, 11)?,
        felt::from_uint(&mid, 11)?,
        felt::from_uint(&hi, 11)?,
    ])
}

/// Reassemble a scalar from its limbs
pub fn join_limbs(limbs: &[Felt; 3]) -> BigUint {
    let [lo, mid, hi] = limbs;
    felt::to_biguint(lo)
        + (felt::to_biguint(mid) << LIMB_BITS)
        + (felt::to_biguint(hi) << (LIMB_BITS * 2))
}

/// Check that client data binds the requested challenge
///
/// The JSON must be an assertion (`type == "webauthn.get"`) whose `challenge`
/// is the unpadded base64url encoding of `challenge`.
pub fn verify_client_data(client_data_json: &[u8], challenge: &[u8]) -> Result<()> {
    let client_data: serde_json::Value = serde_json::from_slice(client_data_json)
        .map_err(|e| Error::InvalidAssertion(format!("Client data is not JSON: {}", e)))?;

    let kind = client_data.get("type").and_then(|v| v.as_str());
    if kind != Some(WEBAUTHN_GET) {
        return Err(Error::InvalidAssertion(format!(
            "Client data type {:?}, expected {}",
            kind, WEBAUTHN_GET
        )));
    }

    let expected = URL_SAFE_NO_PAD.encode(challenge);
    match client_data.get("challenge").and_then(|v| v.as_str()) {
        Some(actual) if actual == expected => Ok(()),
        Some(_) => Err(Error::InvalidAssertion(
            "Client data challenge does not match the signed hash".into(),
        )),
        None => Err(Error::InvalidAssertion("Client data has no challenge".into())),
    }
}

/// Encode an assertion as a contract signature
///
/// Consumes the assertion; an assertion is never encoded twice.
pub fn encode_assertion(assertion: Assertion, layout: &SignatureLayout) -> Result<Signature> {
    let (r, s) = parse_der_signature(&assertion.signature_der)?;
    let r_limbs = split_limbs(&r)?;
    let s_limbs = split_limbs(&s)?;

    let client_data = felt::to_big_endian_words(&assertion.client_data_json);
    let auth_data = felt::to_big_endian_words(&assertion.authenticator_data);

    let mut signature = Vec::with_capacity(14 + client_data.word_count() + auth_data.word_count());
    signature.push(layout.discriminator);
    signature.push(layout.signer_slot);
    signature.extend_from_slice(&r_limbs);
    signature.extend_from_slice(&s_limbs);
    signature.push(Felt::from(layout.format_count));
    signature.push(Felt::from(layout.format_version));
    signature.extend(client_data.to_felts());
    signature.extend(auth_data.to_felts());

    Ok(signature)
}
