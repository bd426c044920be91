//! # Controller Core
//!
//! Signing and session-authorization core for Starknet smart-contract
//! accounts controlled by a platform credential (passkey) or a local
//! Stark keypair.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Field codec**: integers and byte strings to field elements
//! - **Assertion encoder**: platform-credential assertions to the account
//!   contract's signature layout
//! - **Signers**: one capability over keypair and credential signing
//! - **Session policies**: per-origin grants to call contract entrypoints
//!   without prompting
//! - **Account state cache**: deployment, registration and nonce, refreshed
//!   without blocking reads
//! - **Execution coordinator**: policy check, approval escalation, nonce,
//!   signing and submission as one state machine
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use controller_core::{Controller, TransactionRequest, Call, ChainId};
//! use controller_core::sign::SoftwareAuthenticator;
//!
//! let authenticator = Arc::new(SoftwareAuthenticator::new("controller.example"));
//! let controller = Controller::builder()
//!     .address(account)
//!     .credential(authenticator.clone(), authenticator.credential_id().to_vec(), authenticator.public_key_felt())
//!     .chain(chain)
//!     .approval_ui(ui)
//!     .build()
//!     .await?;
//!
//! let request = TransactionRequest::new(vec![Call::new(token, "transfer", calldata)]);
//! let outcome = controller.execute("https://game.example", ChainId::sepolia(), &request).await?;
//! ```
//!
//! ## Security Model
//!
//! - Every credential signature runs a fresh ceremony; assertions are never
//!   cached or reused
//! - A request outside the origin's session is either approved by the user
//!   or rejected with the exact policies missing
//! - Nonce read, signing and submission for one account never interleave

pub mod approval;
pub mod chain;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod felt;
pub mod policy;
pub mod sign;
pub mod state;
pub mod storage;
pub mod types;

pub use approval::{ApprovalGate, ApprovalRequest, ApprovalResponse, ApprovalUi, AutoApprove};
pub use chain::{ChainQuery, MemoryChain};
pub use config::ControllerConfig;
pub use controller::{Controller, ControllerBuilder};
pub use coordinator::{ExecutionCoordinator, ExecutionOutcome, ExecutionState};
pub use error::{Error, Result};
pub use felt::Felt;
pub use policy::{Policy, PolicySet, PolicyStore, Session};
pub use sign::{CredentialSigner, KeypairSigner, SignContext, Signer, SignerKind};
pub use state::AccountStateCache;
pub use storage::{FileSystemStore, KeyValueStore, MemoryStore};
pub use types::{AccountState, Assertion, Call, ChainId, Signature, TransactionRequest};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
