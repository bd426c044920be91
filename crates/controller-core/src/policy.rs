//! Session policy store
//!
//! A session grants a requesting origin the right to execute a set of
//! contract calls on one chain without prompting the user. Each grant is a
//! [`Policy`]: a target contract plus an optional entrypoint.
//!
//! ## Coverage
//!
//! A request is covered when every policy it implies is already granted:
//!
//! ```text
//! diff(granted, requested) = requested \ granted
//! covered                 <=> diff is empty
//! ```
//!
//! `diff` is one-directional; it is not a symmetric difference.
//!
//! ## Persistence
//!
//! One key/value record per `(origin, chain)` session. Mutations hold the
//! store's write lock across the persistence write, so a concurrent coverage
//! check observes either the previous or the new policy set, never a mix.
//!
//! ## Example
//!
//! ```rust,ignore
//! use controller_core::policy::{Policy, PolicyStore};
//!
//! let store = PolicyStore::load(ChainId::mainnet(), kv).await?;
//! store.approve("https://game.example", chain, [Policy::new(token, Some("transfer"))].into(), None).await?;
//! assert!(store.is_covered("https://game.example", chain, &request.policies()).await);
//! ```

use crate::felt::{self, felt_hex, Felt};
use crate::storage::KeyValueStore;
use crate::types::{Call, ChainId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Authorization unit scoping a session to one contract and optionally one entrypoint
///
/// Equality is exact on both fields; `method: None` is its own grant and is
/// not expanded against named entrypoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Policy {
    /// Contract address
    #[serde(with = "felt_hex")]
    pub target: Felt,
    /// Entrypoint name (`None` = any method on target)
    #[serde(default)]
    pub method: Option<String>,
}

impl Policy {
    /// Create a new policy
    pub fn new(target: Felt, method: Option<&str>) -> Self {
        Self {
            target,
            method: method.map(str::to_string),
        }
    }

    /// Policy covering every entrypoint of a contract
    pub fn any_method(target: Felt) -> Self {
        Self {
            target,
            method: None,
        }
    }
}

/// Unordered set of policies with deterministic iteration order
pub type PolicySet = BTreeSet<Policy>;

/// Policies in `requested` that `current` does not contain
pub fn diff(current: &PolicySet, requested: &PolicySet) -> PolicySet {
    requested.difference(current).cloned().collect()
}

/// One policy per distinct `(contract, entrypoint)` pair
pub fn policies_for_calls(calls: &[Call]) -> PolicySet {
    calls.iter().map(Call::policy).collect()
}

/// Approved session for one origin on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Requesting origin
    pub origin: String,
    /// Chain the session applies to
    pub chain_id: ChainId,
    /// Granted policies
    pub policies: PolicySet,
    /// Maximum fee a session-signed transaction may pay
    #[serde(with = "felt_hex::option", default)]
    pub fee_ceiling: Option<Felt>,
    /// Time of the last approval
    pub approved_at: DateTime<Utc>,
}

impl Session {
    /// Check whether a fee is within the session ceiling
    pub fn allows_fee(&self, max_fee: &Felt) -> bool {
        match &self.fee_ceiling {
            Some(ceiling) => felt::to_biguint(max_fee) <= felt::to_biguint(ceiling),
            None => true,
        }
    }
}

/// Per-chain store of approved sessions, keyed by origin
pub struct PolicyStore {
    /// Chain this store serves
    chain_id: ChainId,
    /// Sessions by origin
    sessions: RwLock<HashMap<String, Session>>,
    /// Persistence backend
    store: Arc<dyn KeyValueStore>,
}

impl PolicyStore {
    /// Create an empty store
    pub fn new(chain_id: ChainId, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            chain_id,
            sessions: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Create a store and restore this chain's persisted sessions
    ///
    /// Unreadable records are skipped; they never block unrelated sessions.
    pub async fn load(chain_id: ChainId, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let prefix = Self::key_prefix(&chain_id);
        let mut sessions = HashMap::new();

        for key in store.keys().await? {
            if !key.starts_with(&prefix) {
                continue;
            }
            let Some(bytes) = store.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<Session>(&bytes) {
                Ok(session) if session.chain_id == chain_id => {
                    sessions.insert(session.origin.clone(), session);
                }
                Ok(_) => warn!(key = %key, "Session record belongs to another chain"),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable session record"),
            }
        }

        debug!(chain = %chain_id, count = sessions.len(), "Restored sessions");

        Ok(Self {
            chain_id,
            sessions: RwLock::new(sessions),
            store,
        })
    }

    /// Chain this store serves
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Current session for an origin
    pub async fn session(&self, origin: &str, chain_id: ChainId) -> Option<Session> {
        if chain_id != self.chain_id {
            return None;
        }
        self.sessions.read().await.get(origin).cloned()
    }

    /// All sessions on this chain
    pub async fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.origin.cmp(&b.origin));
        sessions
    }

    /// Replace or create the session for an origin
    pub async fn approve(
        &self,
        origin: &str,
        chain_id: ChainId,
        policies: PolicySet,
        fee_ceiling: Option<Felt>,
    ) -> Result<Session> {
        self.check_chain(chain_id)?;

        let mut sessions = self.sessions.write().await;
        let session = Session {
            origin: origin.to_string(),
            chain_id,
            policies,
            fee_ceiling,
            approved_at: Utc::now(),
        };

        self.persist(&session).await?;
        sessions.insert(origin.to_string(), session.clone());

        info!(
            origin = %origin,
            chain = %chain_id,
            policies = session.policies.len(),
            "Session approved"
        );
        Ok(session)
    }

    /// Add policies to the existing session for an origin
    ///
    /// The union is computed and stored under a single write lock, so two
    /// concurrent grants never lose each other's policies. A `None` ceiling
    /// keeps the current one.
    pub async fn merge(
        &self,
        origin: &str,
        chain_id: ChainId,
        policies: PolicySet,
        fee_ceiling: Option<Felt>,
    ) -> Result<Session> {
        self.check_chain(chain_id)?;

        let mut sessions = self.sessions.write().await;
        let (mut merged, current_ceiling) = match sessions.get(origin) {
            Some(existing) => (existing.policies.clone(), existing.fee_ceiling),
            None => (PolicySet::new(), None),
        };
        let added = diff(&merged, &policies).len();
        merged.extend(policies);

        let session = Session {
            origin: origin.to_string(),
            chain_id,
            policies: merged,
            fee_ceiling: fee_ceiling.or(current_ceiling),
            approved_at: Utc::now(),
        };

        self.persist(&session).await?;
        sessions.insert(origin.to_string(), session.clone());

        info!(
            origin = %origin,
            chain = %chain_id,
            added,
            total = session.policies.len(),
            "Session extended"
        );
        Ok(session)
    }

    /// Requested policies not granted to the origin
    pub async fn uncovered(
        &self,
        origin: &str,
        chain_id: ChainId,
        requested: &PolicySet,
    ) -> PolicySet {
        match self.session(origin, chain_id).await {
            Some(session) => diff(&session.policies, requested),
            None => requested.clone(),
        }
    }

    /// Check whether every requested policy is granted
    ///
    /// A missing session is empty coverage; an empty request is always covered.
    pub async fn is_covered(&self, origin: &str, chain_id: ChainId, requested: &PolicySet) -> bool {
        self.uncovered(origin, chain_id, requested).await.is_empty()
    }

    /// Check whether a fee is within the origin's session ceiling
    pub async fn covers_fee(&self, origin: &str, chain_id: ChainId, max_fee: Option<Felt>) -> bool {
        let Some(max_fee) = max_fee else {
            return true;
        };
        match self.session(origin, chain_id).await {
            Some(session) => session.allows_fee(&max_fee),
            None => true,
        }
    }

    /// Remove the session for an origin (idempotent)
    pub async fn revoke(&self, origin: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        self.store.remove(&self.key(origin)).await?;
        if sessions.remove(origin).is_some() {
            info!(origin = %origin, chain = %self.chain_id, "Session revoked");
        }
        Ok(())
    }

    /// Remove every session on this chain (idempotent)
    pub async fn revoke_all(&self) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let prefix = Self::key_prefix(&self.chain_id);
        for key in self.store.keys().await? {
            if key.starts_with(&prefix) {
                self.store.remove(&key).await?;
            }
        }
        let count = sessions.len();
        sessions.clear();
        info!(chain = %self.chain_id, count, "All sessions revoked");
        Ok(())
    }

    fn check_chain(&self, chain_id: ChainId) -> Result<()> {
        if chain_id != self.chain_id {
            return Err(Error::UnsupportedChain(format!(
                "{} (store serves {})",
                chain_id, self.chain_id
            )));
        }
        Ok(())
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        let bytes = serde_json::to_vec(session)?;
        self.store.set(&self.key(&session.origin), bytes).await
    }

    fn key_prefix(chain_id: &ChainId) -> String {
        format!("session:{}:", chain_id.key())
    }

    fn key(&self, origin: &str) -> String {
        format!("{}{}", Self::key_prefix(&self.chain_id), origin)
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}
