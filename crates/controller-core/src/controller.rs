//! Controller
//!
//! Composition root tying one account and one signer to any number of
//! chains. Each registered chain gets its own session store, account state
//! cache and execution coordinator; the approval gate and the key/value
//! store are shared.
//!
//! ## Example
//!
//! ```rust,ignore
//! use controller_core::{Controller, ControllerConfig};
//!
//! let controller = Controller::builder()
//!     .address(account)
//!     .keypair(KeypairSigner::random())
//!     .chain(Arc::new(MemoryChain::new(ChainId::sepolia())))
//!     .approval_ui(Arc::new(AutoApprove::approving()))
//!     .config(ControllerConfig::default())
//!     .build()
//!     .await?;
//!
//! let outcome = controller.execute("https://game.example", ChainId::sepolia(), &request).await?;
//! ```

use crate::approval::{ApprovalGate, ApprovalUi};
use crate::chain::ChainQuery;
use crate::config::ControllerConfig;
use crate::coordinator::{ExecutionCoordinator, ExecutionOutcome};
use crate::felt::{self, Felt};
use crate::policy::{PolicySet, PolicyStore, Session};
use crate::state::AccountStateCache;
use crate::sign::{CredentialCeremony, CredentialSigner, KeypairSigner, SignContext, Signer};
use crate::storage::{KeyValueStore, MemoryStore};
use crate::types::{AccountState, ChainId, Signature, TransactionRequest};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Per-chain components
struct ChainContext {
    policies: Arc<PolicyStore>,
    state: Arc<AccountStateCache>,
    coordinator: ExecutionCoordinator,
}

/// Signer source resolved at build time
enum SignerSource {
    Ready(Arc<dyn Signer>),
    Credential {
        ceremony: Arc<dyn CredentialCeremony>,
        credential_id: Vec<u8>,
        public_key: Felt,
    },
}

/// Builder for [`Controller`]
#[derive(Default)]
pub struct ControllerBuilder {
    address: Option<Felt>,
    signer: Option<SignerSource>,
    store: Option<Arc<dyn KeyValueStore>>,
    approval_ui: Option<Arc<dyn ApprovalUi>>,
    config: ControllerConfig,
    chains: Vec<Arc<dyn ChainQuery>>,
}

impl ControllerBuilder {
    /// Account address
    pub fn address(mut self, address: Felt) -> Self {
        self.address = Some(address);
        self
    }

    /// Use an already configured signer
    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(SignerSource::Ready(signer));
        self
    }

    /// Sign with a local Stark keypair
    pub fn keypair(self, signer: KeypairSigner) -> Self {
        self.signer(Arc::new(signer))
    }

    /// Sign with a platform credential
    ///
    /// Challenge size, ceremony timeout and signature layout come from the
    /// configuration.
    pub fn credential(
        mut self,
        ceremony: Arc<dyn CredentialCeremony>,
        credential_id: Vec<u8>,
        public_key: Felt,
    ) -> Self {
        self.signer = Some(SignerSource::Credential {
            ceremony,
            credential_id,
            public_key,
        });
        self
    }

    /// Key/value store for sessions and account snapshots (default: in memory)
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Interactive approval surface
    pub fn approval_ui(mut self, ui: Arc<dyn ApprovalUi>) -> Self {
        self.approval_ui = Some(ui);
        self
    }

    /// Controller configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a chain; may be called repeatedly
    pub fn chain(mut self, chain: Arc<dyn ChainQuery>) -> Self {
        self.chains.push(chain);
        self
    }

    /// Build the controller, restoring persisted sessions and account state
    pub async fn build(self) -> Result<Controller> {
        self.config.validate()?;

        let address = self
            .address
            .ok_or_else(|| Error::InvalidConfig("Account address is required".into()))?;
        let signer: Arc<dyn Signer> = match self.signer {
            Some(SignerSource::Ready(signer)) => signer,
            Some(SignerSource::Credential {
                ceremony,
                credential_id,
                public_key,
            }) => Arc::new(
                CredentialSigner::new(ceremony, credential_id, public_key)
                    .with_layout(self.config.signature_layout)
                    .with_challenge_len(self.config.challenge_len)
                    .with_ceremony_timeout(self.config.ceremony_timeout()),
            ),
            None => return Err(Error::InvalidConfig("A signer is required".into())),
        };
        let approval_ui = self
            .approval_ui
            .ok_or_else(|| Error::InvalidConfig("An approval UI is required".into()))?;
        if self.chains.is_empty() {
            return Err(Error::InvalidConfig("At least one chain is required".into()));
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let approvals =
            Arc::new(ApprovalGate::new(approval_ui).with_timeout(self.config.approval_timeout()));

        let mut chains = BTreeMap::new();
        for chain in self.chains {
            let chain_id = chain.chain_id();
            if chains.contains_key(&chain_id.0) {
                return Err(Error::InvalidConfig(format!("Chain {} registered twice", chain_id)));
            }

            let policies = Arc::new(PolicyStore::load(chain_id, Arc::clone(&store)).await?);
            let state = Arc::new(
                AccountStateCache::new(Arc::clone(&chain), Arc::clone(&store), signer.public_key())
                    .with_min_sync_interval(self.config.min_sync_interval())
                    .with_registration_entrypoint(self.config.registration_entrypoint.clone()),
            );
            state.restore().await?;

            let coordinator = ExecutionCoordinator::new(
                chain,
                Arc::clone(&signer),
                Arc::clone(&policies),
                Arc::clone(&state),
                Arc::clone(&approvals),
            )
            .with_default_max_fee(self.config.default_max_fee)
            .with_keypair_sessions(self.config.enforce_keypair_sessions);

            chains.insert(
                chain_id.0,
                ChainContext {
                    policies,
                    state,
                    coordinator,
                },
            );
        }

        info!(
            address = %felt::to_hex(&address),
            signer = %signer.kind(),
            chains = chains.len(),
            "Controller ready"
        );

        Ok(Controller {
            address,
            signer,
            approvals,
            chains,
        })
    }
}

/// Account controller
pub struct Controller {
    address: Felt,
    signer: Arc<dyn Signer>,
    approvals: Arc<ApprovalGate>,
    chains: BTreeMap<Felt, ChainContext>,
}

impl Controller {
    /// Start building a controller
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::default()
    }

    /// Account address
    pub fn address(&self) -> Felt {
        self.address
    }

    /// Signer public key
    pub fn public_key(&self) -> Felt {
        self.signer.public_key()
    }

    /// Registered chains
    pub fn chains(&self) -> Vec<ChainId> {
        self.chains.keys().copied().map(ChainId).collect()
    }

    fn context(&self, chain_id: ChainId) -> Result<&ChainContext> {
        self.chains
            .get(&chain_id.0)
            .ok_or_else(|| Error::UnsupportedChain(chain_id.to_string()))
    }

    /// Execute a request on behalf of `origin`
    pub async fn execute(
        &self,
        origin: &str,
        chain_id: ChainId,
        request: &TransactionRequest,
    ) -> Result<ExecutionOutcome> {
        self.context(chain_id)?
            .coordinator
            .execute(origin, self.address, request)
            .await
    }

    /// Sign an off-chain message hash
    pub async fn sign_message(&self, hash: Felt) -> Result<Signature> {
        self.signer.sign_message_hash(hash, self.address).await
    }

    /// Sign a declare transaction hash
    #[instrument(skip(self, hash), fields(chain = %chain_id))]
    pub async fn sign_declare(&self, hash: Felt, chain_id: ChainId, nonce: Felt) -> Result<Signature> {
        self.context(chain_id)?;
        let context = SignContext {
            address: self.address,
            chain_id,
            nonce,
        };
        self.signer.sign_declare_hash(hash, &context).await
    }

    /// Grant a session, replacing any previous one for the origin
    pub async fn approve_session(
        &self,
        origin: &str,
        chain_id: ChainId,
        policies: PolicySet,
        fee_ceiling: Option<Felt>,
    ) -> Result<Session> {
        self.context(chain_id)?
            .policies
            .approve(origin, chain_id, policies, fee_ceiling)
            .await
    }

    /// Check whether a session covers the policies
    pub async fn is_covered(&self, origin: &str, chain_id: ChainId, policies: &PolicySet) -> Result<bool> {
        Ok(self
            .context(chain_id)?
            .policies
            .is_covered(origin, chain_id, policies)
            .await)
    }

    /// Current session of an origin
    pub async fn session(&self, origin: &str, chain_id: ChainId) -> Result<Option<Session>> {
        Ok(self.context(chain_id)?.policies.session(origin, chain_id).await)
    }

    /// Revoke the session of an origin on one chain
    pub async fn revoke(&self, origin: &str, chain_id: ChainId) -> Result<()> {
        self.context(chain_id)?.policies.revoke(origin).await
    }

    /// Revoke every session on every chain
    pub async fn revoke_all(&self) -> Result<()> {
        for context in self.chains.values() {
            context.policies.revoke_all().await?;
        }
        Ok(())
    }

    /// Cached account state; never touches the network
    pub fn account_state(&self, chain_id: ChainId) -> Result<AccountState> {
        Ok(self.context(chain_id)?.state.get(self.address))
    }

    /// Throttled best-effort refresh
    pub async fn sync(&self, chain_id: ChainId) -> Result<AccountState> {
        Ok(self.context(chain_id)?.state.sync(self.address).await)
    }

    /// Read the nonce from the chain, bypassing the cache throttle
    pub async fn require_fresh_nonce(&self, chain_id: ChainId) -> Result<Felt> {
        self.context(chain_id)?
            .state
            .require_fresh_nonce(self.address)
            .await
    }

    /// Cancel every approval wait in progress
    pub fn cancel_pending_approvals(&self) {
        self.approvals.cancel_pending();
    }

    /// Revoke all sessions and drop cached account state
    pub async fn logout(&self) -> Result<()> {
        self.approvals.cancel_pending();
        for context in self.chains.values() {
            context.policies.revoke_all().await?;
            context.state.forget().await?;
        }
        info!(address = %felt::to_hex(&self.address), "Logged out");
        Ok(())
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("address", &felt::to_hex(&self.address))
            .field("signer", &self.signer.kind())
            .field("chains", &self.chains())
            .finish_non_exhaustive()
    }
}
