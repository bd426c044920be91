//! Passkey-backed controller end to end
//!
//! Checks that what lands on chain is exactly what the credential signed:
//! the challenge is the transaction hash and the signature felts decode back
//! to the assertion.

use async_trait::async_trait;
use controller_core::chain::MemoryChain;
use controller_core::felt::{self, Felt};
use controller_core::sign::webauthn::{join_limbs, parse_der_signature, SignatureLayout};
use controller_core::sign::{CredentialCeremony, SoftwareAuthenticator};
use controller_core::{
    Assertion, AutoApprove, Call, ChainId, Controller, ControllerConfig, Error, Result,
    TransactionRequest,
};
use parking_lot::Mutex;
use std::sync::Arc;

const ORIGIN: &str = "https://game.example";
const ACCOUNT: u64 = 0xacc0_0002;

/// Copy of the parts of an assertion the contract sees
#[derive(Debug, Clone)]
struct Seen {
    challenge: Vec<u8>,
    client_data_json: Vec<u8>,
    authenticator_data: Vec<u8>,
    signature_der: Vec<u8>,
}

/// Forwards to a software authenticator and records every assertion
struct Capturing {
    inner: Arc<SoftwareAuthenticator>,
    seen: Mutex<Vec<Seen>>,
}

#[async_trait]
impl CredentialCeremony for Capturing {
    async fn request_assertion(&self, challenge: &[u8], credential_id: &[u8]) -> Result<Assertion> {
        let assertion = self.inner.request_assertion(challenge, credential_id).await?;
        self.seen.lock().push(Seen {
            challenge: challenge.to_vec(),
            client_data_json: assertion.client_data_json.clone(),
            authenticator_data: assertion.authenticator_data.clone(),
            signature_der: assertion.signature_der.clone(),
        });
        Ok(assertion)
    }
}

fn count(value: &Felt) -> usize {
    u64::try_from(felt::to_biguint(value)).unwrap() as usize
}

async fn setup(config: ControllerConfig) -> (MemoryChain, Arc<Capturing>, Controller) {
    let authenticator = Arc::new(SoftwareAuthenticator::new("game.example"));
    let ceremony = Arc::new(Capturing {
        inner: authenticator.clone(),
        seen: Mutex::new(Vec::new()),
    });

    let chain = MemoryChain::new(ChainId::sepolia());
    chain.deploy_account(Felt::from(ACCOUNT), Felt::from(0xc1a55u64), authenticator.public_key_felt());

    let controller = Controller::builder()
        .address(Felt::from(ACCOUNT))
        .credential(
            ceremony.clone(),
            authenticator.credential_id().to_vec(),
            authenticator.public_key_felt(),
        )
        .chain(Arc::new(chain.clone()))
        .approval_ui(Arc::new(AutoApprove::approving()))
        .config(config)
        .build()
        .await
        .unwrap();

    (chain, ceremony, controller)
}

fn request() -> TransactionRequest {
    TransactionRequest::new(vec![Call::new(
        Felt::from(0x70c3u64),
        "transfer",
        vec![Felt::from(0xbeefu64), Felt::from(1u64), Felt::ZERO],
    )])
}

#[tokio::test]
async fn test_signature_on_chain_decodes_to_assertion() {
    let (chain, ceremony, controller) = setup(ControllerConfig::default()).await;

    let outcome = controller
        .execute(ORIGIN, ChainId::sepolia(), &request())
        .await
        .unwrap();

    let submitted = chain.submitted();
    assert_eq!(submitted.len(), 1);
    let signature = &submitted[0].signature;

    let seen = ceremony.seen.lock().clone();
    assert_eq!(seen.len(), 1);
    let seen = &seen[0];

    // the challenge is the transaction hash
    assert_eq!(seen.challenge, outcome.transaction_hash.to_bytes_be().to_vec());

    // limbs reassemble the DER scalars
    let (r, s) = parse_der_signature(&seen.signature_der).unwrap();
    let layout = SignatureLayout::default();
    assert_eq!(signature[0], layout.discriminator);
    assert_eq!(join_limbs(&[signature[2], signature[3], signature[4]]), r);
    assert_eq!(join_limbs(&[signature[5], signature[6], signature[7]]), s);
    assert_eq!(signature[8], Felt::from(9u64));
    assert_eq!(signature[9], Felt::ZERO);

    // client data then authenticator data, each `[count, remainder, words...]`
    let cd_count = count(&signature[10]);
    let cd_remainder = count(&signature[11]);
    let cd_words = &signature[12..12 + cd_count];
    assert_eq!(
        felt::from_big_endian_words(cd_words, cd_remainder).unwrap(),
        seen.client_data_json
    );

    let ad_start = 12 + cd_count;
    let ad_count = count(&signature[ad_start]);
    let ad_remainder = count(&signature[ad_start + 1]);
    let ad_words = &signature[ad_start + 2..];
    assert_eq!(ad_words.len(), ad_count);
    assert_eq!(
        felt::from_big_endian_words(ad_words, ad_remainder).unwrap(),
        seen.authenticator_data
    );
}

#[tokio::test]
async fn test_fresh_ceremony_per_transaction() {
    let (chain, ceremony, controller) = setup(ControllerConfig::default()).await;

    let first = controller.execute(ORIGIN, ChainId::sepolia(), &request()).await.unwrap();
    let second = controller.execute(ORIGIN, ChainId::sepolia(), &request()).await.unwrap();

    assert_ne!(first.transaction_hash, second.transaction_hash);
    assert_eq!(second.nonce, first.nonce + Felt::ONE);

    let seen = ceremony.seen.lock().clone();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0].challenge, seen[1].challenge);
    assert_ne!(chain.submitted()[0].signature, chain.submitted()[1].signature);
}

#[tokio::test]
async fn test_configured_layout_and_challenge() {
    let layout = SignatureLayout {
        discriminator: Felt::from(0x5eedu64),
        signer_slot: Felt::ONE,
        format_count: 9,
        format_version: 0,
    };
    let config = ControllerConfig::default()
        .with_signature_layout(layout)
        .with_challenge_len(48);
    let (_chain, ceremony, controller) = setup(config).await;

    let signature = controller.sign_message(Felt::from(0x1234u64)).await.unwrap();
    assert_eq!(signature[0], Felt::from(0x5eedu64));
    assert_eq!(signature[1], Felt::ONE);

    let seen = ceremony.seen.lock().clone();
    assert_eq!(seen[0].challenge.len(), 48);
    assert_eq!(&seen[0].challenge[46..], &[0x12, 0x34]);
}

#[tokio::test]
async fn test_removed_credential_surfaces_unavailable() {
    let authenticator = Arc::new(SoftwareAuthenticator::new("game.example"));
    let chain = MemoryChain::new(ChainId::sepolia());
    chain.deploy_account(Felt::from(ACCOUNT), Felt::from(0xc1a55u64), authenticator.public_key_felt());

    let controller = Controller::builder()
        .address(Felt::from(ACCOUNT))
        .credential(
            authenticator.clone(),
            authenticator.credential_id().to_vec(),
            authenticator.public_key_felt(),
        )
        .chain(Arc::new(chain.clone()))
        .approval_ui(Arc::new(AutoApprove::approving()))
        .build()
        .await
        .unwrap();

    authenticator.revoke();
    let err = controller
        .execute(ORIGIN, ChainId::sepolia(), &request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CredentialUnavailable(_)));
    assert!(!err.is_retryable());
    assert_eq!(chain.submissions(), 0);
}

#[tokio::test]
async fn test_sign_declare_checks_chain() {
    let (_chain, _ceremony, controller) = setup(ControllerConfig::default()).await;

    assert!(controller
        .sign_declare(Felt::from(7u64), ChainId::sepolia(), Felt::ZERO)
        .await
        .is_ok());
    assert!(matches!(
        controller
            .sign_declare(Felt::from(7u64), ChainId::mainnet(), Felt::ZERO)
            .await,
        Err(Error::UnsupportedChain(_))
    ));
}
