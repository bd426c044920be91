//! Unit tests for the assertion encoder

use controller_core::felt::{self, Felt};
use controller_core::sign::webauthn::{
    encode_assertion, join_limbs, parse_der_signature, split_limbs, SignatureLayout,
};
use controller_core::{Assertion, Error};
use num_bigint::BigUint;

/// DER `SEQUENCE { INTEGER r, INTEGER s }` from raw integer contents
fn der(r: &[u8], s: &[u8]) -> Vec<u8> {
    let mut out = vec![0x30, (4 + r.len() + s.len()) as u8, 0x02, r.len() as u8];
    out.extend_from_slice(r);
    out.push(0x02);
    out.push(s.len() as u8);
    out.extend_from_slice(s);
    out
}

fn assertion(signature_der: Vec<u8>, client_data: &[u8], auth_data: &[u8]) -> Assertion {
    Assertion {
        credential_id: vec![0xc0, 0xde],
        authenticator_data: auth_data.to_vec(),
        client_data_json: client_data.to_vec(),
        signature_der,
        client_extensions: serde_json::Value::Null,
    }
}

fn high_bit_scalar(fill: u8) -> Vec<u8> {
    let mut bytes = vec![fill; 32];
    bytes[0] = 0x80 | fill;
    bytes
}

fn padded(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![0x00];
    out.extend_from_slice(bytes);
    out
}

// ============================================================================
// DER Parsing
// ============================================================================

#[test]
fn test_padded_and_unpadded_decode_identically() {
    let r = high_bit_scalar(0x11);
    let s = high_bit_scalar(0x22);

    // canonical DER pads both; the unpadded form carries the same magnitudes
    let canonical = parse_der_signature(&der(&padded(&r), &padded(&s))).unwrap();
    let unpadded = parse_der_signature(&der(&r, &s)).unwrap();

    assert_eq!(canonical, unpadded);
    assert_eq!(canonical.0, BigUint::from_bytes_be(&r));
    assert_eq!(canonical.1, BigUint::from_bytes_be(&s));
}

#[test]
fn test_padding_stripped_per_integer() {
    let r = high_bit_scalar(0x33);
    let s = vec![0x44; 32];

    let (pr, ps) = parse_der_signature(&der(&padded(&r), &s)).unwrap();
    assert_eq!(pr, BigUint::from_bytes_be(&r));
    assert_eq!(ps, BigUint::from_bytes_be(&s));

    let (pr, ps) = parse_der_signature(&der(&s, &padded(&r))).unwrap();
    assert_eq!(pr, BigUint::from_bytes_be(&s));
    assert_eq!(ps, BigUint::from_bytes_be(&r));
}

#[test]
fn test_short_scalars() {
    let (r, s) = parse_der_signature(&der(&[0x01], &[0x00, 0x80])).unwrap();
    assert_eq!(r, BigUint::from(1u8));
    assert_eq!(s, BigUint::from(0x80u8));
}

#[test]
fn test_malformed_der() {
    let good = der(&[0x01], &[0x02]);

    let mut wrong_tag = good.clone();
    wrong_tag[0] = 0x31;
    assert!(matches!(
        parse_der_signature(&wrong_tag),
        Err(Error::InvalidSignatureEncoding(_))
    ));

    let mut wrong_len = good.clone();
    wrong_len[1] += 1;
    assert!(matches!(
        parse_der_signature(&wrong_len),
        Err(Error::InvalidSignatureEncoding(_))
    ));

    let mut wrong_int_tag = good.clone();
    wrong_int_tag[2] = 0x03;
    assert!(parse_der_signature(&wrong_int_tag).is_err());

    let mut trailing = good;
    trailing.push(0x00);
    trailing[1] += 1;
    assert!(parse_der_signature(&trailing).is_err());

    assert!(parse_der_signature(&[]).is_err());
    assert!(parse_der_signature(&[0x30, 0x81, 0x00]).is_err());
}

// ============================================================================
// Limbs
// ============================================================================

#[test]
fn test_limb_split_order() {
    let value = BigUint::from(3u8) + (BigUint::from(5u8) << 86) + (BigUint::from(7u8) << 172);
    let limbs = split_limbs(&value).unwrap();
    assert_eq!(limbs, [Felt::from(3u64), Felt::from(5u64), Felt::from(7u64)]);
    assert_eq!(join_limbs(&limbs), value);
}

#[test]
fn test_limb_bounds() {
    let max = (BigUint::from(1u8) << 258) - 1u8;
    assert_eq!(join_limbs(&split_limbs(&max).unwrap()), max);

    let over = BigUint::from(1u8) << 258;
    assert!(matches!(
        split_limbs(&over),
        Err(Error::ScalarOutOfRange { bits: 259 })
    ));
}

// ============================================================================
// Signature Layout
// ============================================================================

#[test]
fn test_layout_exact_order() {
    let client_data = b"{\"type\":\"webauthn.get\",\"challenge\":\"AA\"}";
    let auth_data = [0xab; 37];
    let r = high_bit_scalar(0x05);
    let s = vec![0x06; 32];

    let signature = encode_assertion(
        assertion(der(&padded(&r), &s), client_data, &auth_data),
        &SignatureLayout::default(),
    )
    .unwrap();

    let layout = SignatureLayout::default();
    let r_limbs = split_limbs(&BigUint::from_bytes_be(&r)).unwrap();
    let s_limbs = split_limbs(&BigUint::from_bytes_be(&s)).unwrap();
    let cd = felt::to_big_endian_words(client_data);
    let ad = felt::to_big_endian_words(&auth_data);

    let mut expected = vec![layout.discriminator, Felt::ZERO];
    expected.extend_from_slice(&r_limbs);
    expected.extend_from_slice(&s_limbs);
    expected.push(Felt::from(9u64));
    expected.push(Felt::ZERO);
    expected.push(Felt::from(cd.word_count() as u64));
    expected.push(Felt::from(cd.remainder as u64));
    expected.extend_from_slice(&cd.words);
    expected.push(Felt::from(ad.word_count() as u64));
    expected.push(Felt::from(ad.remainder as u64));
    expected.extend_from_slice(&ad.words);

    assert_eq!(signature, expected);
    assert_eq!(signature.len(), 14 + cd.word_count() + ad.word_count());

    // authenticator data is 37 bytes: 10 words, one meaningful byte in the last
    assert_eq!(ad.word_count(), 10);
    assert_eq!(ad.remainder, 1);
}

#[test]
fn test_layout_constants_from_configuration() {
    let layout = SignatureLayout {
        discriminator: Felt::from(0xd15cu64),
        signer_slot: Felt::TWO,
        format_count: 11,
        format_version: 1,
    };
    let signature = encode_assertion(assertion(der(&[1], &[2]), b"{}", &[0; 4]), &layout).unwrap();

    assert_eq!(signature[0], Felt::from(0xd15cu64));
    assert_eq!(signature[1], Felt::TWO);
    assert_eq!(signature[8], Felt::from(11u64));
    assert_eq!(signature[9], Felt::ONE);
}

#[test]
fn test_encoder_errors_keep_their_kind() {
    let bad_der = encode_assertion(assertion(vec![0x02, 0x00], b"{}", &[]), &SignatureLayout::default());
    assert!(matches!(bad_der, Err(Error::InvalidSignatureEncoding(_))));

    let wide = vec![0x7f; 33];
    let oversized = encode_assertion(assertion(der(&wide, &[1]), b"{}", &[]), &SignatureLayout::default());
    assert!(matches!(oversized, Err(Error::ScalarOutOfRange { .. })));
}
