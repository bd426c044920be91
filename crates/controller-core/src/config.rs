//! Controller configuration

use crate::coordinator::DEFAULT_MAX_FEE;
use crate::felt::{felt_hex, Felt, FELT_BYTES};
use crate::sign::SignatureLayout;
use crate::state::DEFAULT_REGISTRATION_ENTRYPOINT;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest challenge a platform authenticator is asked to sign
const MAX_CHALLENGE_LEN: usize = 64;

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Minimum age of cached account state before a sync hits the chain
    pub min_sync_interval_ms: u64,
    /// Bound on an interactive approval
    pub approval_timeout_secs: u64,
    /// Bound on a single credential ceremony
    pub ceremony_timeout_secs: u64,
    /// Challenge size in bytes
    pub challenge_len: usize,
    /// Fee limit for requests that set none
    #[serde(with = "felt_hex")]
    pub default_max_fee: Felt,
    /// View entrypoint answering "is this key an owner"
    pub registration_entrypoint: String,
    /// Require sessions for keypair signers too
    pub enforce_keypair_sessions: bool,
    /// Contract signature marker constants
    pub signature_layout: SignatureLayout,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_sync_interval_ms: 5000,
            approval_timeout_secs: 120,
            ceremony_timeout_secs: 60,
            challenge_len: FELT_BYTES,
            default_max_fee: Felt::from(DEFAULT_MAX_FEE),
            registration_entrypoint: DEFAULT_REGISTRATION_ENTRYPOINT.to_string(),
            enforce_keypair_sessions: false,
            signature_layout: SignatureLayout::default(),
        }
    }
}

impl ControllerConfig {
    /// Load and validate a JSON configuration file
    ///
    /// Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw).map_err(|e| {
            Error::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.approval_timeout_secs == 0 {
            return Err(Error::InvalidConfig("approval_timeout_secs must be positive".into()));
        }
        if self.ceremony_timeout_secs == 0 {
            return Err(Error::InvalidConfig("ceremony_timeout_secs must be positive".into()));
        }
        if self.challenge_len == 0 || self.challenge_len > MAX_CHALLENGE_LEN {
            return Err(Error::InvalidConfig(format!(
                "challenge_len must be between 1 and {}, got {}",
                MAX_CHALLENGE_LEN, self.challenge_len
            )));
        }
        if self.default_max_fee == Felt::ZERO {
            return Err(Error::InvalidConfig("default_max_fee must be non-zero".into()));
        }
        if self.registration_entrypoint.is_empty() {
            return Err(Error::InvalidConfig("registration_entrypoint is empty".into()));
        }
        Ok(())
    }

    /// Set the sync throttle
    pub fn with_min_sync_interval(mut self, ms: u64) -> Self {
        self.min_sync_interval_ms = ms;
        self
    }

    /// Set the approval timeout
    pub fn with_approval_timeout(mut self, secs: u64) -> Self {
        self.approval_timeout_secs = secs;
        self
    }

    /// Set the ceremony timeout
    pub fn with_ceremony_timeout(mut self, secs: u64) -> Self {
        self.ceremony_timeout_secs = secs;
        self
    }

    /// Set the challenge size
    pub fn with_challenge_len(mut self, len: usize) -> Self {
        self.challenge_len = len;
        self
    }

    /// Set the default fee limit
    pub fn with_default_max_fee(mut self, max_fee: Felt) -> Self {
        self.default_max_fee = max_fee;
        self
    }

    /// Set the registration view entrypoint
    pub fn with_registration_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.registration_entrypoint = entrypoint.into();
        self
    }

    /// Require sessions for keypair signers
    pub fn with_keypair_sessions(mut self) -> Self {
        self.enforce_keypair_sessions = true;
        self
    }

    /// Set the signature layout
    pub fn with_signature_layout(mut self, layout: SignatureLayout) -> Self {
        self.signature_layout = layout;
        self
    }

    pub fn min_sync_interval(&self) -> Duration {
        Duration::from_millis(self.min_sync_interval_ms)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn ceremony_timeout(&self) -> Duration {
        Duration::from_secs(self.ceremony_timeout_secs)
    }
}
