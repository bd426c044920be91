//! Controller CLI
//!
//! Command-line tool for exercising the passkey controller core.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use controller_core::{
    chain::{self, MemoryChain},
    felt::{self, Felt},
    policy::{self, Policy, PolicySet},
    sign::{webauthn, SoftwareAuthenticator},
    Assertion, AutoApprove, Call, ChainId, Controller, ControllerConfig, KeypairSigner, Signer,
    TransactionRequest,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "controller")]
#[command(about = "Passkey controller CLI", version)]
struct Cli {
    /// Controller configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new Stark keypair
    Keygen {
        /// Output format (json, hex)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Compute the selector of an entrypoint name
    Selector {
        /// Entrypoint name
        name: String,
    },

    /// Encode an assertion JSON file as a contract signature
    EncodeAssertion {
        /// Assertion file (camelCase fields, hex-encoded bytes)
        file: PathBuf,
    },

    /// Policies in `requested` missing from `current`
    PolicyDiff {
        /// JSON array of granted policies
        current: PathBuf,
        /// JSON array of requested policies
        requested: PathBuf,
    },

    /// Run an end-to-end flow against an in-memory devnet
    Demo {
        /// Signer variant
        #[arg(short, long, value_enum, default_value = "credential")]
        signer: DemoSigner,

        /// Number of transactions to execute
        #[arg(short = 'n', long, default_value = "3")]
        transactions: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DemoSigner {
    Keypair,
    Credential,
}

#[derive(Serialize)]
struct KeypairOutput {
    public_key: String,
    private_key: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder().with_max_level(level).init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Keygen { format } => keygen(&format)?,
        Commands::Selector { name } => {
            println!("{}", felt::to_hex(&chain::selector_from_name(&name)));
        }
        Commands::EncodeAssertion { file } => encode_assertion(&file, &config)?,
        Commands::PolicyDiff { current, requested } => policy_diff(&current, &requested)?,
        Commands::Demo {
            signer,
            transactions,
        } => demo(signer, transactions, config).await?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    match path {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(ControllerConfig::default()),
    }
}

fn keygen(format: &str) -> Result<()> {
    let signer = KeypairSigner::random();
    let secret = signer.secret_hex();

    match format {
        "hex" => {
            println!("public_key:  {}", felt::to_hex(&signer.public_key()));
            println!("private_key: {}", secret.as_str());
        }
        _ => {
            let output = KeypairOutput {
                public_key: felt::to_hex(&signer.public_key()),
                private_key: secret.to_string(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn encode_assertion(file: &Path, config: &ControllerConfig) -> Result<()> {
    let raw = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let assertion: Assertion = serde_json::from_slice(&raw).context("parsing assertion")?;

    let signature = webauthn::encode_assertion(assertion, &config.signature_layout)?;
    let hex: Vec<String> = signature.iter().map(felt::to_hex).collect();
    println!("{}", serde_json::to_string_pretty(&hex)?);
    Ok(())
}

fn read_policies(path: &Path) -> Result<PolicySet> {
    let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let policies: Vec<Policy> =
        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(policies.into_iter().collect())
}

fn policy_diff(current: &Path, requested: &Path) -> Result<()> {
    let missing = policy::diff(&read_policies(current)?, &read_policies(requested)?);
    println!("{}", serde_json::to_string_pretty(&missing)?);
    Ok(())
}

async fn demo(signer: DemoSigner, transactions: u64, config: ControllerConfig) -> Result<()> {
    const ORIGIN: &str = "https://demo.example";
    let chain_id = ChainId::sepolia();
    let account = Felt::from(0xacc0_0000_0001u64);
    let token = Felt::from(0x70c3u64);

    let devnet = MemoryChain::new(chain_id)
        .with_owner_entrypoint(config.registration_entrypoint.clone());
    let builder = Controller::builder()
        .address(account)
        .chain(Arc::new(devnet.clone()))
        .approval_ui(Arc::new(AutoApprove::approving()))
        .config(config);

    let builder = match signer {
        DemoSigner::Keypair => {
            let signer = KeypairSigner::random();
            devnet.deploy_account(account, Felt::from(0xc1a55u64), signer.public_key());
            builder.keypair(signer)
        }
        DemoSigner::Credential => {
            let authenticator = Arc::new(SoftwareAuthenticator::new("demo.example"));
            devnet.deploy_account(account, Felt::from(0xc1a55u64), authenticator.public_key_felt());
            builder.credential(
                authenticator.clone(),
                authenticator.credential_id().to_vec(),
                authenticator.public_key_felt(),
            )
        }
    };
    let controller = builder.build().await?;

    let state = controller.sync(chain_id).await?;
    info!(
        deployed = state.deployed,
        registered = state.registered,
        nonce = %felt::to_hex(&state.nonce),
        "Account synced"
    );

    for i in 0..transactions {
        let request = TransactionRequest::new(vec![Call::new(
            token,
            "transfer",
            vec![Felt::from(0xbeefu64), Felt::from(i + 1), Felt::ZERO],
        )]);
        let outcome = controller.execute(ORIGIN, chain_id, &request).await?;
        println!(
            "tx {} nonce={} hash={} approvals={} trace={:?}",
            i,
            felt::to_hex(&outcome.nonce),
            felt::to_hex(&outcome.transaction_hash),
            outcome.approvals_requested,
            outcome.trace
        );
    }

    if let Some(session) = controller.session(ORIGIN, chain_id).await? {
        println!("\nSession for {}:", session.origin);
        for policy in &session.policies {
            println!(
                "  - {} {}",
                felt::to_hex(&policy.target),
                policy.method.as_deref().unwrap_or("*")
            );
        }
    }

    let submitted = devnet.submitted();
    let signature_len = submitted.last().map(|tx| tx.signature.len()).unwrap_or(0);
    println!(
        "\n{} transactions accepted, last signature {} felts",
        submitted.len(),
        signature_len
    );

    controller.logout().await?;
    Ok(())
}
