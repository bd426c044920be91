//! Unit tests for session policies

use controller_core::policy::{diff, policies_for_calls, Policy, PolicySet, PolicyStore};
use controller_core::storage::{KeyValueStore, MemoryStore};
use controller_core::{Call, ChainId, Error, Felt};
use std::sync::Arc;

const ORIGIN: &str = "https://game.example";

fn policy(target: u64, method: &str) -> Policy {
    Policy::new(Felt::from(target), Some(method))
}

fn set(policies: &[Policy]) -> PolicySet {
    policies.iter().cloned().collect()
}

// ============================================================================
// Diff
// ============================================================================

#[test]
fn test_diff_one_directional() {
    let a = set(&[policy(0xa, "transfer"), policy(0xb, "approve")]);
    let b = set(&[policy(0xb, "approve"), policy(0xc, "mint")]);

    assert_eq!(diff(&a, &b), set(&[policy(0xc, "mint")]));
    assert_eq!(diff(&b, &a), set(&[policy(0xa, "transfer")]));
    assert!(diff(&a, &a).is_empty());
    assert_eq!(diff(&PolicySet::new(), &a), a);
}

#[test]
fn test_method_absence_is_distinct() {
    let granted = set(&[Policy::any_method(Felt::from(0xau64))]);
    let requested = set(&[policy(0xa, "transfer")]);

    // a wildcard grant is compared by equality, not expanded
    assert_eq!(diff(&granted, &requested), requested);
}

#[test]
fn test_policies_for_calls_dedup() {
    let calls = vec![
        Call::new(Felt::from(0xau64), "transfer", vec![Felt::ONE]),
        Call::new(Felt::from(0xau64), "transfer", vec![Felt::TWO]),
        Call::new(Felt::from(0xbu64), "approve", vec![]),
    ];
    assert_eq!(
        policies_for_calls(&calls),
        set(&[policy(0xa, "transfer"), policy(0xb, "approve")])
    );
}

#[test]
fn test_policy_json_shape() {
    let json = serde_json::to_value(policy(0xa, "transfer")).unwrap();
    assert_eq!(json["target"], "0xa");
    assert_eq!(json["method"], "transfer");

    let parsed: Policy = serde_json::from_str(r#"{"target":"0xa"}"#).unwrap();
    assert_eq!(parsed, Policy::any_method(Felt::from(0xau64)));
}

// ============================================================================
// Store
// ============================================================================

#[tokio::test]
async fn test_empty_request_always_covered() {
    let store = PolicyStore::new(ChainId::sepolia(), Arc::new(MemoryStore::new()));
    assert!(store.is_covered(ORIGIN, ChainId::sepolia(), &PolicySet::new()).await);
    assert!(store.is_covered("https://unknown.example", ChainId::mainnet(), &PolicySet::new()).await);
}

#[tokio::test]
async fn test_approve_replaces_merge_unions() {
    let store = PolicyStore::new(ChainId::sepolia(), Arc::new(MemoryStore::new()));
    let chain = ChainId::sepolia();

    store.approve(ORIGIN, chain, set(&[policy(0xa, "transfer")]), None).await.unwrap();
    store.approve(ORIGIN, chain, set(&[policy(0xb, "approve")]), None).await.unwrap();
    let session = store.session(ORIGIN, chain).await.unwrap();
    assert_eq!(session.policies, set(&[policy(0xb, "approve")]));

    store
        .merge(ORIGIN, chain, set(&[policy(0xa, "transfer")]), Some(Felt::from(100u64)))
        .await
        .unwrap();
    let session = store.session(ORIGIN, chain).await.unwrap();
    assert_eq!(session.policies, set(&[policy(0xa, "transfer"), policy(0xb, "approve")]));
    assert_eq!(session.fee_ceiling, Some(Felt::from(100u64)));
}

#[tokio::test]
async fn test_fee_ceiling() {
    let store = PolicyStore::new(ChainId::sepolia(), Arc::new(MemoryStore::new()));
    let chain = ChainId::sepolia();
    store
        .approve(ORIGIN, chain, PolicySet::new(), Some(Felt::from(1000u64)))
        .await
        .unwrap();

    assert!(store.covers_fee(ORIGIN, chain, None).await);
    assert!(store.covers_fee(ORIGIN, chain, Some(Felt::from(1000u64))).await);
    assert!(!store.covers_fee(ORIGIN, chain, Some(Felt::from(1001u64))).await);
}

#[tokio::test]
async fn test_revoke_idempotent() {
    let store = PolicyStore::new(ChainId::sepolia(), Arc::new(MemoryStore::new()));
    store.revoke(ORIGIN).await.unwrap();

    store
        .approve(ORIGIN, ChainId::sepolia(), set(&[policy(0xa, "transfer")]), None)
        .await
        .unwrap();
    store.revoke(ORIGIN).await.unwrap();
    store.revoke(ORIGIN).await.unwrap();
    assert!(store.session(ORIGIN, ChainId::sepolia()).await.is_none());

    store.revoke_all().await.unwrap();
}

#[tokio::test]
async fn test_other_chain_rejected() {
    let store = PolicyStore::new(ChainId::sepolia(), Arc::new(MemoryStore::new()));
    let result = store
        .approve(ORIGIN, ChainId::mainnet(), set(&[policy(0xa, "transfer")]), None)
        .await;
    assert!(matches!(result, Err(Error::UnsupportedChain(_))));
    assert!(store.session(ORIGIN, ChainId::mainnet()).await.is_none());
}

#[tokio::test]
async fn test_sessions_survive_restart() {
    let kv = Arc::new(MemoryStore::new());
    let chain = ChainId::sepolia();
    {
        let store = PolicyStore::new(chain, kv.clone());
        store.approve(ORIGIN, chain, set(&[policy(0xa, "transfer")]), None).await.unwrap();
        store
            .approve("https://other.example", chain, set(&[policy(0xb, "approve")]), None)
            .await
            .unwrap();
        store.revoke("https://other.example").await.unwrap();
    }

    // one record per session, plus an unreadable one that is skipped
    kv.set(&format!("session:{}:https://broken.example", chain.key()), b"not json".to_vec())
        .await
        .unwrap();

    let restored = PolicyStore::load(chain, kv.clone()).await.unwrap();
    let sessions = restored.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].origin, ORIGIN);
    assert!(restored.is_covered(ORIGIN, chain, &set(&[policy(0xa, "transfer")])).await);

    // sessions of another chain are not loaded
    let mainnet = PolicyStore::load(ChainId::mainnet(), kv).await.unwrap();
    assert!(mainnet.sessions().await.is_empty());
}
