//! Invoke transaction encoding
//!
//! ```text
//! calldata = [n_calls, to_0, selector_0, len_0, ...data_0, to_1, ...]
//! tx_hash  = h("invoke", 1, sender, 0, h(calldata), max_fee, chain_id, nonce)
//! h(xs)    = pedersen(fold(pedersen, 0, xs), len(xs))
//! ```

use crate::felt::Felt;
use crate::types::{Call, ChainId};
use starknet_crypto::pedersen_hash;
use tiny_keccak::{Hasher, Keccak};

/// Transaction version of v1 invoke transactions
const INVOKE_VERSION: u64 = 1;

/// Entrypoints addressed by selector zero
const DEFAULT_ENTRYPOINTS: [&str; 2] = ["__default__", "__l1_default__"];

/// Prefix of invoke transaction hashes (Cairo short string `invoke`)
fn invoke_prefix() -> Felt {
    Felt::from_bytes_be_slice(b"invoke")
}

/// Starknet keccak of an entrypoint name, masked to 250 bits
pub fn selector_from_name(name: &str) -> Felt {
    if DEFAULT_ENTRYPOINTS.contains(&name) {
        return Felt::ZERO;
    }

    let mut hasher = Keccak::v256();
    hasher.update(name.as_bytes());
    let mut digest = [0u8; 32];
    hasher.finalize(&mut digest);

    // keep the low 250 bits
    digest[0] &= 0x03;
    Felt::from_bytes_be(&digest)
}

/// Pedersen hash over a sequence, length-suffixed
pub fn compute_hash_on_elements(elements: &[Felt]) -> Felt {
    let acc = elements
        .iter()
        .fold(Felt::ZERO, |acc, element| pedersen_hash(&acc, element));
    pedersen_hash(&acc, &Felt::from(elements.len() as u64))
}

/// `__execute__` calldata for a multicall
pub fn encode_execute_calldata(calls: &[Call]) -> Vec<Felt> {
    let mut calldata = Vec::with_capacity(1 + calls.iter().map(|c| 3 + c.calldata.len()).sum::<usize>());
    calldata.push(Felt::from(calls.len() as u64));
    for call in calls {
        calldata.push(call.to);
        calldata.push(selector_from_name(&call.entrypoint));
        calldata.push(Felt::from(call.calldata.len() as u64));
        calldata.extend_from_slice(&call.calldata);
    }
    calldata
}

/// Hash of a v1 invoke transaction
pub fn compute_invoke_hash(
    sender_address: Felt,
    calldata: &[Felt],
    max_fee: Felt,
    chain_id: ChainId,
    nonce: Felt,
) -> Felt {
    compute_hash_on_elements(&[
        invoke_prefix(),
        Felt::from(INVOKE_VERSION),
        sender_address,
        Felt::ZERO,
        compute_hash_on_elements(calldata),
        max_fee,
        chain_id.0,
        nonce,
    ])
}
