//! Account state cache
//!
//! Per-chain cache of `{deployed, registered, nonce, class_hash}` for the
//! accounts the controller signs for. Reads never block on the network:
//! an address nothing is known about reports `{deployed: false,
//! registered: false, nonce: 0}`, which is exactly the state of an account
//! that has not been deployed yet.
//!
//! ## Refresh rules
//!
//! - `sync` is throttled by `min_sync_interval` and best-effort: a failed
//!   query keeps the previous state and is only logged.
//! - `require_fresh_nonce` always hits the chain and reports failure as
//!   `ChainUnavailable`; nothing retries it silently.
//! - `next_nonce` is the execution path's nonce source. It reads fresh when
//!   the account is not known to be deployed or after a `NonceMismatch`, and
//!   otherwise trusts the throttled cache, which is advanced locally after
//!   every accepted submission.
//! - A chain read never lowers a locally advanced nonce unless a mismatch
//!   marked it stale; the decision is taken when the result is written.

use crate::chain::{BlockId, ChainQuery};
use crate::felt::{self, Felt};
use crate::storage::KeyValueStore;
use crate::types::{AccountState, ChainId};
use crate::{Error, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default throttle between two chain syncs of the same account
pub const DEFAULT_MIN_SYNC_INTERVAL: Duration = Duration::from_millis(5000);

/// Default entrypoint confirming the signer's key is an account owner
pub const DEFAULT_REGISTRATION_ENTRYPOINT: &str = "is_owner";

/// Cached entry, as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    #[serde(flatten)]
    state: AccountState,
    /// Set after a nonce mismatch; the next nonce must come from the chain
    #[serde(default)]
    nonce_stale: bool,
}

impl Snapshot {
    /// Whether the cached nonce was advanced past a chain read
    ///
    /// Accepted submissions move the cached nonce ahead of what a concurrent
    /// read may have seen. Such a read must not roll it back unless a
    /// mismatch marked it stale.
    fn ahead_of(&self, deployed: bool, chain_nonce: &Felt) -> bool {
        self.state.deployed
            && deployed
            && !self.nonce_stale
            && felt::to_biguint(&self.state.nonce) > felt::to_biguint(chain_nonce)
    }
}

/// Cache of account state for one chain
pub struct AccountStateCache {
    chain: Arc<dyn ChainQuery>,
    store: Arc<dyn KeyValueStore>,
    /// Key checked by the registration query
    signer_key: Felt,
    registration_entrypoint: String,
    min_sync_interval: Duration,
    entries: RwLock<HashMap<Felt, Snapshot>>,
    /// One sync in flight per address
    sync_locks: DashMap<Felt, Arc<tokio::sync::Mutex<()>>>,
    /// Serializes snapshot updates and their persistence per address
    write_locks: DashMap<Felt, Arc<tokio::sync::Mutex<()>>>,
}

impl AccountStateCache {
    /// Create an empty cache
    pub fn new(chain: Arc<dyn ChainQuery>, store: Arc<dyn KeyValueStore>, signer_key: Felt) -> Self {
        Self {
            chain,
            store,
            signer_key,
            registration_entrypoint: DEFAULT_REGISTRATION_ENTRYPOINT.to_string(),
            min_sync_interval: DEFAULT_MIN_SYNC_INTERVAL,
            entries: RwLock::new(HashMap::new()),
            sync_locks: DashMap::new(),
            write_locks: DashMap::new(),
        }
    }

    /// Set the sync throttle
    pub fn with_min_sync_interval(mut self, interval: Duration) -> Self {
        self.min_sync_interval = interval;
        self
    }

    /// Set the registration view entrypoint
    pub fn with_registration_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.registration_entrypoint = entrypoint.into();
        self
    }

    /// Chain this cache serves
    pub fn chain_id(&self) -> ChainId {
        self.chain.chain_id()
    }

    /// Restore persisted snapshots for this chain
    ///
    /// Unreadable records are skipped. Returns the number restored.
    pub async fn restore(&self) -> Result<usize> {
        let prefix = self.key_prefix();
        let mut restored = Vec::new();

        for key in self.store.keys().await? {
            if !key.starts_with(&prefix) {
                continue;
            }
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) if snapshot.state.chain_id == self.chain_id() => restored.push(snapshot),
                Ok(_) => warn!(key = %key, "Account snapshot belongs to another chain"),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable account snapshot"),
            }
        }

        let count = restored.len();
        let mut entries = self.entries.write();
        for snapshot in restored {
            entries.insert(snapshot.state.address, snapshot);
        }
        debug!(chain = %self.chain_id(), count, "Restored account snapshots");
        Ok(count)
    }

    /// Cached state, defaulting to "unknown" without touching the network
    pub fn get(&self, address: Felt) -> AccountState {
        self.entries
            .read()
            .get(&address)
            .map(|s| s.state.clone())
            .unwrap_or_else(|| AccountState::unknown(address, self.chain_id()))
    }

    /// Check whether the next nonce must be read from the chain
    pub fn is_nonce_stale(&self, address: Felt) -> bool {
        self.entries
            .read()
            .get(&address)
            .map(|s| s.nonce_stale)
            .unwrap_or(false)
    }

    /// Best-effort throttled refresh
    ///
    /// Returns the previous state when the last sync is younger than the
    /// throttle or when any chain query fails.
    #[instrument(skip(self, address), fields(chain = %self.chain_id(), address = %felt::to_hex(&address)))]
    pub async fn sync(&self, address: Felt) -> AccountState {
        let lock = self.sync_lock(address);
        let _guard = lock.lock().await;

        let current = self.get(address);
        if let Some(age) = current.age_ms(Utc::now()) {
            if age >= 0 && (age as u128) < self.min_sync_interval.as_millis() {
                debug!(age_ms = age, "Sync throttled");
                return current;
            }
        }

        match self.query(address).await {
            Ok(fresh) => {
                let synced = self
                    .update(address, |entry| {
                        let nonce = if entry.ahead_of(fresh.deployed, &fresh.nonce) {
                            entry.state.nonce
                        } else {
                            fresh.nonce
                        };
                        entry.state = fresh;
                        entry.state.nonce = nonce;
                        entry.nonce_stale = false;
                    })
                    .await
                    .state;
                debug!(
                    deployed = synced.deployed,
                    registered = synced.registered,
                    nonce = %felt::to_hex(&synced.nonce),
                    "Account synced"
                );
                synced
            }
            Err(e) => {
                warn!(error = %e, "Account sync failed, keeping cached state");
                current
            }
        }
    }

    /// Non-throttled nonce read
    ///
    /// An address without a contract has nonce zero. Any other failure is
    /// `ChainUnavailable`.
    #[instrument(skip(self, address), fields(chain = %self.chain_id(), address = %felt::to_hex(&address)))]
    pub async fn require_fresh_nonce(&self, address: Felt) -> Result<Felt> {
        let (nonce, deployed) = match self.chain.get_nonce(address, BlockId::Pending).await {
            Ok(nonce) => (nonce, true),
            Err(Error::ContractNotFound(_)) => (Felt::ZERO, false),
            Err(e @ Error::ChainUnavailable(_)) => return Err(e),
            Err(e) => return Err(Error::ChainUnavailable(e.to_string())),
        };

        let snapshot = self
            .update(address, |entry| {
                if !entry.ahead_of(deployed, &nonce) {
                    entry.state.nonce = nonce;
                }
                entry.state.deployed = deployed;
                entry.nonce_stale = false;
            })
            .await;

        debug!(nonce = %felt::to_hex(&snapshot.state.nonce), deployed, "Fresh nonce");
        Ok(snapshot.state.nonce)
    }

    /// Nonce for the next transaction
    pub async fn next_nonce(&self, address: Felt) -> Result<Felt> {
        let current = self.get(address);
        if !current.deployed || self.is_nonce_stale(address) {
            return self.require_fresh_nonce(address).await;
        }
        Ok(self.sync(address).await.nonce)
    }

    /// Advance the cached nonce after an accepted submission
    pub async fn record_submitted(&self, address: Felt, next_nonce: Felt) {
        self.update(address, |entry| {
            entry.state.nonce = next_nonce;
            entry.state.deployed = true;
            entry.nonce_stale = false;
        })
        .await;
    }

    /// Force the next nonce to be read from the chain
    pub async fn mark_nonce_stale(&self, address: Felt) {
        self.update(address, |entry| entry.nonce_stale = true).await;
        debug!(address = %felt::to_hex(&address), "Nonce marked stale");
    }

    /// Drop every cached entry and snapshot for this chain
    pub async fn forget(&self) -> Result<()> {
        let prefix = self.key_prefix();
        for key in self.store.keys().await? {
            if key.starts_with(&prefix) {
                self.store.remove(&key).await?;
            }
        }
        self.entries.write().clear();
        Ok(())
    }

    async fn query(&self, address: Felt) -> Result<AccountState> {
        let mut state = AccountState::unknown(address, self.chain_id());
        state.last_synced_at = Some(Utc::now());

        let class_hash = match self.chain.get_class_hash_at(address, BlockId::Pending).await {
            Ok(hash) => hash,
            Err(Error::ContractNotFound(_)) => return Ok(state),
            Err(e) => return Err(e),
        };

        let nonce = self.chain.get_nonce(address, BlockId::Pending).await?;
        let registered = self
            .chain
            .call_view(address, &self.registration_entrypoint, &[self.signer_key])
            .await?
            .first()
            .map(|v| *v != Felt::ZERO)
            .unwrap_or(false);

        state.deployed = true;
        state.class_hash = Some(class_hash);
        state.nonce = nonce;
        state.registered = registered;
        Ok(state)
    }

    /// Read-modify-write of one entry, persisted before the next update
    ///
    /// Every change to a snapshot goes through here, so a decision made in
    /// `apply` always sees the latest cached value.
    async fn update<F>(&self, address: Felt, apply: F) -> Snapshot
    where
        F: FnOnce(&mut Snapshot),
    {
        let chain_id = self.chain_id();
        let lock = self.write_lock(address);
        let _guard = lock.lock().await;

        let snapshot = {
            let mut entries = self.entries.write();
            let entry = entries.entry(address).or_insert_with(|| Snapshot {
                state: AccountState::unknown(address, chain_id),
                nonce_stale: false,
            });
            apply(&mut *entry);
            entry.clone()
        };
        self.persist(&snapshot).await;
        snapshot
    }

    async fn persist(&self, snapshot: &Snapshot) {
        let key = self.key(&snapshot.state.address);
        let bytes = serde_json::to_vec(snapshot);
        let result = match bytes {
            Ok(bytes) => self.store.set(&key, bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to persist account snapshot");
        }
    }

    fn sync_lock(&self, address: Felt) -> Arc<tokio::sync::Mutex<()>> {
        self.sync_locks
            .entry(address)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn write_lock(&self, address: Felt) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .entry(address)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn key_prefix(&self) -> String {
        format!("account:{}:", self.chain_id().key())
    }

    fn key(&self, address: &Felt) -> String {
        format!("{}{}", self.key_prefix(), felt::to_hex(address))
    }
}

impl std::fmt::Debug for AccountStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountStateCache")
            .field("chain_id", &self.chain_id())
            .field("min_sync_interval", &self.min_sync_interval)
            .field("entries", &self.entries.read().len())
            .finish()
    }
}
