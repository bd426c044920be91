//! Field element codec
//!
//! Every contract-facing value is a [`Felt`]: an integer modulo the Stark
//! prime `P = 2^251 + 17·2^192 + 1`, serialized as 32 big-endian bytes.
//! Construction from wider integers is a checked error, never truncation.
//!
//! Byte buffers (WebAuthn client data, authenticator data) travel to the
//! account contract as 32-bit big-endian words plus a remainder telling the
//! on-chain decoder how many bytes of the final word are meaningful:
//!
//! ```text
//! bytes:     de ad be ef 01 02
//! words:     0xdeadbeef 0x01020000
//! remainder: 2            (len % 4; 0 means the final word is full)
//! ```

use crate::{Error, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

pub use starknet_crypto::Felt;

/// Width of a serialized field element
pub const FELT_BYTES: usize = 32;

/// Maximum length of a Cairo short string
pub const SHORT_STRING_MAX_LEN: usize = 31;

/// Big-endian bytes of the field modulus
const MODULUS_BE: [u8; FELT_BYTES] = [
    0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
];

/// The field modulus as an arbitrary-precision integer
pub fn field_modulus() -> BigUint {
    BigUint::from_bytes_be(&MODULUS_BE)
}

/// Build a field element from an unsigned integer
///
/// Fails with `OutOfRange` if the value needs more than `max_bytes` bytes or
/// is not below the field modulus.
pub fn from_uint(value: &BigUint, max_bytes: usize) -> Result<Felt> {
    let max_bytes = max_bytes.min(FELT_BYTES);
    if value.bits() > (max_bytes as u64) * 8 {
        return Err(Error::OutOfRange(format!(
            "{} bits exceeds {} bytes",
            value.bits(),
            max_bytes
        )));
    }
    if value >= &field_modulus() {
        return Err(Error::OutOfRange(format!(
            "0x{} is not below the field modulus",
            value.to_str_radix(16)
        )));
    }

    let bytes = value.to_bytes_be();
    let mut buf = [0u8; FELT_BYTES];
    buf[FELT_BYTES - bytes.len()..].copy_from_slice(&bytes);
    Ok(Felt::from_bytes_be(&buf))
}

/// Build a field element from big-endian bytes (checked)
pub fn from_bytes_be(bytes: &[u8]) -> Result<Felt> {
    from_uint(&BigUint::from_bytes_be(bytes), FELT_BYTES)
}

/// Convert a field element to an arbitrary-precision integer
pub fn to_biguint(felt: &Felt) -> BigUint {
    BigUint::from_bytes_be(&felt.to_bytes_be())
}

/// Minimal `0x`-prefixed hex rendering
pub fn to_hex(felt: &Felt) -> String {
    format!("0x{}", to_biguint(felt).to_str_radix(16))
}

/// Parse a `0x`-prefixed hex or decimal string into a field element
pub fn parse_felt(s: &str) -> Result<Felt> {
    let s = s.trim();
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) if !digits.is_empty() => BigUint::parse_bytes(digits.as_bytes(), 16),
        Some(_) => None,
        None => BigUint::parse_bytes(s.as_bytes(), 10),
    }
    .ok_or_else(|| Error::Deserialization(format!("Invalid field element: {}", s)))?;

    from_uint(&value, FELT_BYTES)
}

/// Encode an ASCII string of at most 31 bytes as a Cairo short string
pub fn short_string(s: &str) -> Result<Felt> {
    if !s.is_ascii() {
        return Err(Error::OutOfRange(format!("Short string is not ASCII: {}", s)));
    }
    if s.len() > SHORT_STRING_MAX_LEN {
        return Err(Error::OutOfRange(format!(
            "Short string longer than {} bytes: {}",
            SHORT_STRING_MAX_LEN, s
        )));
    }
    Ok(Felt::from_bytes_be_slice(s.as_bytes()))
}

/// Decode a Cairo short string, if the element is printable ASCII
pub fn decode_short_string(felt: &Felt) -> Option<String> {
    let bytes = felt.to_bytes_be();
    let start = bytes.iter().position(|&b| b != 0)?;
    let text = &bytes[start..];
    if text.len() > SHORT_STRING_MAX_LEN || !text.iter().all(|b| b.is_ascii_graphic()) {
        return None;
    }
    String::from_utf8(text.to_vec()).ok()
}

// ============================================================================
// Word Codec
// ============================================================================

/// A byte buffer split into 32-bit big-endian words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordEncoding {
    /// Words as field elements, final word zero-padded on the right
    pub words: Vec<Felt>,
    /// Meaningful bytes in the final word (0 when the final word is full)
    pub remainder: usize,
}

impl WordEncoding {
    /// Number of words
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Original byte length
    pub fn byte_len(&self) -> usize {
        match self.remainder {
            0 => self.words.len() * 4,
            r => (self.words.len() - 1) * 4 + r,
        }
    }

    /// Contract layout: `[word_count, remainder, ...words]`
    pub fn to_felts(&self) -> Vec<Felt> {
        let mut out = Vec::with_capacity(self.words.len() + 2);
        out.push(Felt::from(self.words.len() as u64));
        out.push(Felt::from(self.remainder as u64));
        out.extend_from_slice(&self.words);
        out
    }
}

/// Split a byte buffer into 32-bit big-endian words
pub fn to_big_endian_words(bytes: &[u8]) -> WordEncoding {
    let words = bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            Felt::from(u32::from_be_bytes(word))
        })
        .collect();

    WordEncoding {
        words,
        remainder: bytes.len() % 4,
    }
}

/// Reassemble the byte buffer from its words and remainder
pub fn from_big_endian_words(words: &[Felt], remainder: usize) -> Result<Vec<u8>> {
    if remainder > 3 {
        return Err(Error::InvalidEncoding(format!(
            "Remainder {} is not in 0..=3",
            remainder
        )));
    }
    if words.is_empty() && remainder != 0 {
        return Err(Error::InvalidEncoding(
            "Non-zero remainder without words".into(),
        ));
    }

    let mut out = Vec::with_capacity(words.len() * 4);
    for word in words {
        let bytes = word.to_bytes_be();
        if bytes[..FELT_BYTES - 4].iter().any(|&b| b != 0) {
            return Err(Error::InvalidEncoding(format!(
                "Word {} exceeds 32 bits",
                to_hex(word)
            )));
        }
        out.extend_from_slice(&bytes[FELT_BYTES - 4..]);
    }

    if remainder != 0 {
        let padding = 4 - remainder;
        let keep = out.len() - padding;
        if out[keep..].iter().any(|&b| b != 0) {
            return Err(Error::InvalidEncoding("Non-zero padding in final word".into()));
        }
        out.truncate(keep);
    }

    Ok(out)
}

// ============================================================================
// Serde Adapters
// ============================================================================

/// Serialize field elements as `0x` hex strings
pub mod felt_hex {
    use super::{parse_felt, to_hex, Felt};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(felt: &Felt, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&to_hex(felt))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Felt, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_felt(&s).map_err(de::Error::custom)
    }

    /// `Option<Felt>` variant
    pub mod option {
        use super::{parse_felt, to_hex, Felt};
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(
            felt: &Option<Felt>,
            serializer: S,
        ) -> std::result::Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match felt {
                Some(f) => serializer.serialize_some(&to_hex(f)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Option<Felt>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| parse_felt(&s).map_err(de::Error::custom))
                .transpose()
        }
    }

    /// `Vec<Felt>` variant
    pub mod seq {
        use super::{parse_felt, to_hex, Felt};
        use serde::{de, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(felts: &[Felt], serializer: S) -> std::result::Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut seq = serializer.serialize_seq(Some(felts.len()))?;
            for felt in felts {
                seq.serialize_element(&to_hex(felt))?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<Felt>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Vec::<String>::deserialize(deserializer)?
                .iter()
                .map(|s| parse_felt(s).map_err(de::Error::custom))
                .collect()
        }
    }
}

/// Field element wrapper that serializes as hex, for ad-hoc JSON documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HexFelt(#[serde(with = "felt_hex")] pub Felt);

impl From<Felt> for HexFelt {
    fn from(felt: Felt) -> Self {
        HexFelt(felt)
    }
}
