//! Unit tests for field elements and the word codec

use controller_core::felt::{self, Felt};
use controller_core::Error;
use num_bigint::BigUint;

// ============================================================================
// Field Element Construction
// ============================================================================

#[test]
fn test_from_uint_accepts_below_modulus() {
    let max = felt::field_modulus() - 1u8;
    let element = felt::from_uint(&max, 32).unwrap();
    assert_eq!(felt::to_biguint(&element), max);
}

#[test]
fn test_from_uint_rejects_modulus() {
    let result = felt::from_uint(&felt::field_modulus(), 32);
    assert!(matches!(result, Err(Error::OutOfRange(_))));

    let huge = BigUint::from(1u8) << 300;
    assert!(matches!(felt::from_uint(&huge, 32), Err(Error::OutOfRange(_))));
}

#[test]
fn test_from_uint_respects_byte_width() {
    let value = BigUint::from(0x1_0000u32);
    assert!(felt::from_uint(&value, 2).is_err());
    assert_eq!(felt::from_uint(&value, 3).unwrap(), Felt::from(0x1_0000u64));
}

#[test]
fn test_parse_felt_forms() {
    assert_eq!(felt::parse_felt("0x1f").unwrap(), Felt::from(31u64));
    assert_eq!(felt::parse_felt("31").unwrap(), Felt::from(31u64));
    assert!(felt::parse_felt("0x").is_err());
    assert!(felt::parse_felt("zz").is_err());
}

#[test]
fn test_short_string_round_trip() {
    let id = felt::short_string("SN_SEPOLIA").unwrap();
    assert_eq!(felt::decode_short_string(&id).as_deref(), Some("SN_SEPOLIA"));
    assert!(felt::short_string(&"x".repeat(32)).is_err());
}

// ============================================================================
// Word Codec
// ============================================================================

#[test]
fn test_words_empty_buffer() {
    let encoding = felt::to_big_endian_words(&[]);
    assert!(encoding.words.is_empty());
    assert_eq!(encoding.remainder, 0);
    assert_eq!(felt::from_big_endian_words(&encoding.words, 0).unwrap(), Vec::<u8>::new());
}

#[test]
fn test_words_partial_final_word() {
    let encoding = felt::to_big_endian_words(&[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02]);
    assert_eq!(encoding.words, vec![Felt::from(0xdeadbeefu64), Felt::from(0x0102_0000u64)]);
    assert_eq!(encoding.remainder, 2);
    assert_eq!(encoding.byte_len(), 6);
    assert_eq!(
        encoding.to_felts(),
        vec![Felt::TWO, Felt::TWO, Felt::from(0xdeadbeefu64), Felt::from(0x0102_0000u64)]
    );
}

#[test]
fn test_words_full_final_word() {
    let encoding = felt::to_big_endian_words(&[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(encoding.word_count(), 2);
    assert_eq!(encoding.remainder, 0);
    assert_eq!(encoding.byte_len(), 8);
}

#[test]
fn test_words_remainder_distinguishes_trailing_zeros() {
    let with_zero = felt::to_big_endian_words(&[0xaa, 0x00]);
    let without = felt::to_big_endian_words(&[0xaa]);
    assert_eq!(with_zero.words, without.words);
    assert_ne!(with_zero.remainder, without.remainder);
    assert_eq!(
        felt::from_big_endian_words(&with_zero.words, with_zero.remainder).unwrap(),
        vec![0xaa, 0x00]
    );
}

#[test]
fn test_decode_rejects_malformed() {
    assert!(matches!(
        felt::from_big_endian_words(&[Felt::ONE], 4),
        Err(Error::InvalidEncoding(_))
    ));
    assert!(matches!(
        felt::from_big_endian_words(&[], 1),
        Err(Error::InvalidEncoding(_))
    ));
    assert!(matches!(
        felt::from_big_endian_words(&[Felt::from(1u64 << 32)], 0),
        Err(Error::InvalidEncoding(_))
    ));
    // 0x01020304 with remainder 2 leaves non-zero padding
    assert!(matches!(
        felt::from_big_endian_words(&[Felt::from(0x0102_0304u64)], 2),
        Err(Error::InvalidEncoding(_))
    ));
}
