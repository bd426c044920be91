//! In-memory devnet for testing and local development

use super::{invoke, BlockId, ChainQuery, InvokeReceipt, SignedInvoke};
use crate::felt::{self, Felt};
use crate::types::ChainId;
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Entrypoint the devnet answers ownership queries on
pub const DEFAULT_OWNER_ENTRYPOINT: &str = "is_owner";

/// Account deployed on the devnet
#[derive(Debug, Clone)]
struct DevAccount {
    class_hash: Felt,
    nonce: u64,
    owners: HashSet<Felt>,
}

/// Query counters
#[derive(Debug, Default)]
struct Counters {
    class_hash: AtomicUsize,
    nonce: AtomicUsize,
    view: AtomicUsize,
    submit: AtomicUsize,
}

/// In-process chain for local testing
///
/// Accounts are deployed explicitly, nonces are enforced on submission, and
/// every query can be slowed down or failed on demand. It's useful for:
/// - Unit and integration testing
/// - The CLI demo
/// - Reproducing nonce races deterministically
#[derive(Debug)]
pub struct MemoryChain {
    chain_id: ChainId,
    accounts: Arc<DashMap<Felt, DevAccount>>,
    submitted: Arc<Mutex<Vec<SignedInvoke>>>,
    owner_entrypoint: String,
    outage: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
    counters: Arc<Counters>,
}

impl MemoryChain {
    /// Create an empty devnet
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            accounts: Arc::new(DashMap::new()),
            submitted: Arc::new(Mutex::new(Vec::new())),
            owner_entrypoint: DEFAULT_OWNER_ENTRYPOINT.to_string(),
            outage: Arc::new(AtomicBool::new(false)),
            latency_ms: Arc::new(AtomicU64::new(0)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Answer ownership queries on a different entrypoint
    pub fn with_owner_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.owner_entrypoint = entrypoint.into();
        self
    }

    /// Deploy an account owned by `owner`
    pub fn deploy_account(&self, address: Felt, class_hash: Felt, owner: Felt) {
        self.accounts.insert(
            address,
            DevAccount {
                class_hash,
                nonce: 0,
                owners: HashSet::from([owner]),
            },
        );
    }

    /// Add an owner to a deployed account
    pub fn register_owner(&self, address: Felt, owner: Felt) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(&address)
            .ok_or_else(|| Error::ContractNotFound(felt::to_hex(&address)))?;
        account.owners.insert(owner);
        Ok(())
    }

    /// Overwrite an account nonce (simulates a transaction sent elsewhere)
    pub fn set_nonce(&self, address: Felt, nonce: u64) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(&address)
            .ok_or_else(|| Error::ContractNotFound(felt::to_hex(&address)))?;
        account.nonce = nonce;
        Ok(())
    }

    /// Current nonce of a deployed account
    pub fn nonce_of(&self, address: Felt) -> Option<u64> {
        self.accounts.get(&address).map(|a| a.nonce)
    }

    /// Make every query fail with `ChainUnavailable`
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Delay every query
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Transactions accepted so far, in order
    pub fn submitted(&self) -> Vec<SignedInvoke> {
        self.submitted.lock().clone()
    }

    /// Number of `get_nonce` queries served
    pub fn nonce_queries(&self) -> usize {
        self.counters.nonce.load(Ordering::SeqCst)
    }

    /// Number of `get_class_hash_at` queries served
    pub fn class_hash_queries(&self) -> usize {
        self.counters.class_hash.load(Ordering::SeqCst)
    }

    /// Number of `call_view` queries served
    pub fn view_calls(&self) -> usize {
        self.counters.view.load(Ordering::SeqCst)
    }

    /// Number of submissions attempted
    pub fn submissions(&self) -> usize {
        self.counters.submit.load(Ordering::SeqCst)
    }

    /// Total queries of any kind
    pub fn total_queries(&self) -> usize {
        self.nonce_queries() + self.class_hash_queries() + self.view_calls() + self.submissions()
    }

    async fn simulate_network(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.outage.load(Ordering::SeqCst) {
            return Err(Error::ChainUnavailable("devnet outage".into()));
        }
        Ok(())
    }

    fn account(&self, address: &Felt) -> Result<DevAccount> {
        self.accounts
            .get(address)
            .map(|a| a.clone())
            .ok_or_else(|| Error::ContractNotFound(felt::to_hex(address)))
    }
}

impl Clone for MemoryChain {
    fn clone(&self) -> Self {
        Self {
            chain_id: self.chain_id,
            accounts: Arc::clone(&self.accounts),
            submitted: Arc::clone(&self.submitted),
            owner_entrypoint: self.owner_entrypoint.clone(),
            outage: Arc::clone(&self.outage),
            latency_ms: Arc::clone(&self.latency_ms),
            counters: Arc::clone(&self.counters),
        }
    }
}

#[async_trait]
impl ChainQuery for MemoryChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn get_class_hash_at(&self, address: Felt, _block: BlockId) -> Result<Felt> {
        self.simulate_network(&self.counters.class_hash).await?;
        Ok(self.account(&address)?.class_hash)
    }

    async fn get_nonce(&self, address: Felt, _block: BlockId) -> Result<Felt> {
        self.simulate_network(&self.counters.nonce).await?;
        Ok(Felt::from(self.account(&address)?.nonce))
    }

    async fn call_view(
        &self,
        contract: Felt,
        entrypoint: &str,
        calldata: &[Felt],
    ) -> Result<Vec<Felt>> {
        self.simulate_network(&self.counters.view).await?;
        let account = self.account(&contract)?;

        if entrypoint != self.owner_entrypoint {
            return Err(Error::TransactionRejected(format!(
                "Entrypoint not found: {}",
                entrypoint
            )));
        }

        let key = calldata
            .first()
            .ok_or_else(|| Error::TransactionRejected("Missing owner argument".into()))?;
        let owned = account.owners.contains(key);
        Ok(vec![if owned { Felt::ONE } else { Felt::ZERO }])
    }

    async fn submit_invoke(&self, tx: &SignedInvoke) -> Result<InvokeReceipt> {
        self.simulate_network(&self.counters.submit).await?;

        if tx.signature.is_empty() {
            return Err(Error::TransactionRejected("Empty signature".into()));
        }

        let expected_hash = invoke::compute_invoke_hash(
            tx.sender_address,
            &tx.calldata,
            tx.max_fee,
            self.chain_id,
            tx.nonce,
        );
        if expected_hash != tx.transaction_hash {
            return Err(Error::TransactionRejected(format!(
                "Transaction hash mismatch: expected {}",
                felt::to_hex(&expected_hash)
            )));
        }

        let mut account = self
            .accounts
            .get_mut(&tx.sender_address)
            .ok_or_else(|| Error::ContractNotFound(felt::to_hex(&tx.sender_address)))?;

        if Felt::from(account.nonce) != tx.nonce {
            return Err(Error::NonceMismatch {
                submitted: felt::to_hex(&tx.nonce),
            });
        }
        account.nonce += 1;
        drop(account);

        self.submitted.lock().push(tx.clone());

        Ok(InvokeReceipt {
            transaction_hash: tx.transaction_hash,
        })
    }
}
