//! Starknet JSON-RPC client

use super::{invoke, BlockId, ChainQuery, InvokeReceipt, SignedInvoke};
use crate::felt::{self, Felt};
use crate::types::ChainId;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Starknet RPC error codes with a dedicated meaning
mod codes {
    pub const CONTRACT_NOT_FOUND: i64 = 20;
    pub const INVALID_TRANSACTION_NONCE: i64 = 52;
    pub const INSUFFICIENT_MAX_FEE: i64 = 53;
    pub const INSUFFICIENT_ACCOUNT_BALANCE: i64 = 54;
    pub const VALIDATION_FAILURE: i64 = 55;
}

/// HTTP JSON-RPC client with failover support
///
/// Only transport failures rotate to the next URL; an error object returned by
/// a node is authoritative and surfaces immediately.
#[derive(Clone)]
pub struct RpcClient {
    urls: Vec<String>,
    client: reqwest::Client,
    current_index: Arc<AtomicUsize>,
}

impl RpcClient {
    /// Create a new RPC client with failover URLs
    pub fn new(urls: Vec<String>) -> Result<Self> {
        Self::with_timeout(urls, Duration::from_secs(30))
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(urls: Vec<String>, timeout: Duration) -> Result<Self> {
        if urls.is_empty() {
            return Err(Error::InvalidConfig("At least one RPC URL required".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ChainUnavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            urls,
            client,
            current_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn current_url(&self) -> &str {
        let idx = self.current_index.load(Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }

    fn rotate_url(&self) {
        self.current_index.fetch_add(1, Ordering::Relaxed);
    }

    /// Make a JSON-RPC request with automatic failover
    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T> {
        let mut last_error = None;

        for _ in 0..self.urls.len() {
            let url = self.current_url();

            match self.make_request(url, method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e @ Error::ChainUnavailable(_)) => {
                    warn!("RPC request failed on {}: {}", url, e);
                    last_error = Some(e);
                    self.rotate_url();
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::ChainUnavailable("All RPC endpoints failed".into())))
    }

    async fn make_request<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: Value,
    ) -> Result<T> {
        let request_body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| Error::ChainUnavailable(format!("RPC request failed: {}", e)))?;

        let response_body: Value = response
            .json()
            .await
            .map_err(|e| Error::ChainUnavailable(format!("Failed to parse RPC response: {}", e)))?;

        if let Some(error) = response_body.get("error") {
            return Err(map_rpc_error(error));
        }

        let result = response_body
            .get("result")
            .ok_or_else(|| Error::ChainUnavailable("Missing result in RPC response".into()))?;

        serde_json::from_value(result.clone())
            .map_err(|e| Error::Deserialization(format!("Failed to deserialize result: {}", e)))
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("urls", &self.urls)
            .field("current_index", &self.current_index.load(Ordering::Relaxed))
            .finish()
    }
}

/// Map a JSON-RPC error object onto the error taxonomy
fn map_rpc_error(error: &Value) -> Error {
    let code = error.get("code").and_then(Value::as_i64);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let detail = match error.get("data") {
        Some(data) => format!("{} ({})", message, data),
        None => message,
    };

    match code {
        Some(codes::CONTRACT_NOT_FOUND) => Error::ContractNotFound(detail),
        Some(codes::INVALID_TRANSACTION_NONCE) => Error::NonceMismatch { submitted: detail },
        Some(
            codes::INSUFFICIENT_MAX_FEE
            | codes::INSUFFICIENT_ACCOUNT_BALANCE
            | codes::VALIDATION_FAILURE,
        ) => Error::TransactionRejected(detail),
        Some(code) => Error::TransactionRejected(format!("RPC error {}: {}", code, detail)),
        None => Error::ChainUnavailable(format!("Malformed RPC error: {}", error)),
    }
}

fn block_id_param(block: BlockId) -> Value {
    match block {
        BlockId::Latest => json!("latest"),
        BlockId::Pending => json!("pending"),
        BlockId::Number(n) => json!({ "block_number": n }),
    }
}

fn hex_seq(felts: &[Felt]) -> Vec<String> {
    felts.iter().map(felt::to_hex).collect()
}

fn parse_hex(value: &str) -> Result<Felt> {
    felt::parse_felt(value)
        .map_err(|e| Error::Deserialization(format!("Invalid felt in RPC response: {}", e)))
}

#[derive(Debug, Deserialize)]
struct AddInvokeResult {
    transaction_hash: String,
}

/// `ChainQuery` over Starknet JSON-RPC
#[derive(Debug, Clone)]
pub struct RpcChain {
    chain_id: ChainId,
    client: RpcClient,
}

impl RpcChain {
    /// Create a chain client for a known chain id
    pub fn new(chain_id: ChainId, client: RpcClient) -> Self {
        Self { chain_id, client }
    }

    /// Create a chain client, asking the node for its chain id
    pub async fn connect(client: RpcClient) -> Result<Self> {
        let id: String = client.request("starknet_chainId", json!([])).await?;
        let chain_id = ChainId(parse_hex(&id)?);
        debug!(chain = %chain_id, "Connected to RPC node");
        Ok(Self { chain_id, client })
    }

    /// Underlying RPC client
    pub fn client(&self) -> &RpcClient {
        &self.client
    }
}

#[async_trait]
impl ChainQuery for RpcChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn get_class_hash_at(&self, address: Felt, block: BlockId) -> Result<Felt> {
        let hash: String = self
            .client
            .request(
                "starknet_getClassHashAt",
                json!({
                    "block_id": block_id_param(block),
                    "contract_address": felt::to_hex(&address),
                }),
            )
            .await?;
        parse_hex(&hash)
    }

    async fn get_nonce(&self, address: Felt, block: BlockId) -> Result<Felt> {
        let nonce: String = self
            .client
            .request(
                "starknet_getNonce",
                json!({
                    "block_id": block_id_param(block),
                    "contract_address": felt::to_hex(&address),
                }),
            )
            .await?;
        parse_hex(&nonce)
    }

    async fn call_view(
        &self,
        contract: Felt,
        entrypoint: &str,
        calldata: &[Felt],
    ) -> Result<Vec<Felt>> {
        let result: Vec<String> = self
            .client
            .request(
                "starknet_call",
                json!({
                    "request": {
                        "contract_address": felt::to_hex(&contract),
                        "entry_point_selector": felt::to_hex(&invoke::selector_from_name(entrypoint)),
                        "calldata": hex_seq(calldata),
                    },
                    "block_id": block_id_param(BlockId::Pending),
                }),
            )
            .await?;
        result.iter().map(|v| parse_hex(v)).collect()
    }

    async fn submit_invoke(&self, tx: &SignedInvoke) -> Result<InvokeReceipt> {
        let result: AddInvokeResult = self
            .client
            .request(
                "starknet_addInvokeTransaction",
                json!({
                    "invoke_transaction": {
                        "type": "INVOKE",
                        "version": "0x1",
                        "sender_address": felt::to_hex(&tx.sender_address),
                        "calldata": hex_seq(&tx.calldata),
                        "max_fee": felt::to_hex(&tx.max_fee),
                        "nonce": felt::to_hex(&tx.nonce),
                        "signature": hex_seq(&tx.signature),
                    }
                }),
            )
            .await?;

        Ok(InvokeReceipt {
            transaction_hash: parse_hex(&result.transaction_hash)?,
        })
    }
}
