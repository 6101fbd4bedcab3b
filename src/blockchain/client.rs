// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! NEAR JSON-RPC client.
//!
//! Only the three calls the signing engine needs: the latest final block
//! hash, the on-chain nonce of an access key, and `broadcast_tx_commit`.
//! [`RpcConnector`] hands out one client per node URL and keeps them in an
//! LRU cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use lru::LruCache;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::keys::{CryptoHash, PublicKey};
use super::transactions::SignedTransaction;

/// Node URLs kept warm in the connector cache.
const CLIENT_CACHE_CAPACITY: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC error: {0}")]
    Server(String),

    #[error("Unexpected RPC response: {0}")]
    InvalidResponse(String),
}

/// NEAR node operations used while signing.
#[async_trait]
pub trait NearRpc: Send + Sync {
    async fn final_block_hash(&self) -> Result<CryptoHash, RpcError>;

    async fn access_key_nonce(&self, account_id: &str, public_key: &PublicKey) -> Result<u64, RpcError>;

    async fn broadcast_tx_commit(&self, signed: &SignedTransaction) -> Result<Value, RpcError>;
}

/// Hands out an RPC client for a network's node URL.
pub trait RpcConnector: Send + Sync {
    fn connect(&self, node_url: &str) -> Result<Arc<dyn NearRpc>, RpcError>;
}

// =============================================================================
// Response parsing
// =============================================================================

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Best human-readable description of a NEAR RPC error object.
fn describe_error(error: &Value) -> String {
    let pick = |key: &str| match error.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Object(_)) => Some(error[key].to_string()),
        _ => None,
    };
    pick("data")
        .or_else(|| error.pointer("/cause/name").and_then(Value::as_str).map(str::to_string))
        .or_else(|| pick("message"))
        .unwrap_or_else(|| error.to_string())
}

fn unwrap_response(response: JsonRpcResponse) -> Result<Value, RpcError> {
    if let Some(error) = response.error {
        return Err(RpcError::Server(describe_error(&error)));
    }
    let result = response
        .result
        .ok_or_else(|| RpcError::InvalidResponse("missing result".into()))?;
    // `query` reports some failures inside an otherwise successful result.
    if let Some(Value::String(error)) = result.get("error") {
        return Err(RpcError::Server(error.clone()));
    }
    Ok(result)
}

pub(crate) fn parse_block_hash(result: &Value) -> Result<CryptoHash, RpcError> {
    let raw = result
        .pointer("/header/hash")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::InvalidResponse("block without header.hash".into()))?;
    raw.parse()
        .map_err(|e| RpcError::InvalidResponse(format!("bad block hash: {e}")))
}

pub(crate) fn parse_access_key_nonce(result: &Value) -> Result<u64, RpcError> {
    result
        .get("nonce")
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::InvalidResponse("access key without nonce".into()))
}

// =============================================================================
// JsonRpcClient
// =============================================================================

/// JSON-RPC over HTTPS to one NEAR node.
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: url::Url,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(node_url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let url: url::Url = node_url
            .parse()
            .map_err(|e: url::ParseError| RpcError::InvalidRpcUrl(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(rpc_method = method, rpc_id = id, node = %self.url, "NEAR RPC request");

        let response = self
            .http
            .post(self.url.clone())
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id.to_string(),
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        unwrap_response(body)
    }
}

#[async_trait]
impl NearRpc for JsonRpcClient {
    async fn final_block_hash(&self) -> Result<CryptoHash, RpcError> {
        let result = self.call("block", json!({ "finality": "final" })).await?;
        parse_block_hash(&result)
    }

    async fn access_key_nonce(&self, account_id: &str, public_key: &PublicKey) -> Result<u64, RpcError> {
        let result = self
            .call(
                "query",
                json!({
                    "request_type": "view_access_key",
                    "finality": "final",
                    "account_id": account_id,
                    "public_key": public_key.to_string(),
                }),
            )
            .await?;
        parse_access_key_nonce(&result)
    }

    async fn broadcast_tx_commit(&self, signed: &SignedTransaction) -> Result<Value, RpcError> {
        let bytes = signed
            .encode()
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        self.call("broadcast_tx_commit", json!([Base64::encode_string(bytes)]))
            .await
    }
}

// =============================================================================
// HttpRpcConnector
// =============================================================================

/// Connector that reuses one [`JsonRpcClient`] per node URL.
pub struct HttpRpcConnector {
    timeout: Duration,
    clients: Mutex<LruCache<String, Arc<JsonRpcClient>>>,
}

impl HttpRpcConnector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(LruCache::new(
                NonZeroUsize::new(CLIENT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }
}

impl RpcConnector for HttpRpcConnector {
    fn connect(&self, node_url: &str) -> Result<Arc<dyn NearRpc>, RpcError> {
        if let Ok(mut clients) = self.clients.lock() {
            if let Some(client) = clients.get(node_url) {
                return Ok(client.clone());
            }
            let client = Arc::new(JsonRpcClient::new(node_url, self.timeout)?);
            clients.put(node_url.to_string(), client.clone());
            return Ok(client);
        }
        // Poisoned cache: serve an uncached client.
        Ok(Arc::new(JsonRpcClient::new(node_url, self.timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(value: Value) -> JsonRpcResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn block_hash_is_read_from_header() {
        let hash = CryptoHash([3u8; 32]);
        let result = unwrap_response(response(json!({
            "jsonrpc": "2.0", "id": "1",
            "result": {"header": {"hash": hash.to_string(), "height": 10}}
        })))
        .unwrap();
        assert_eq!(parse_block_hash(&result).unwrap(), hash);
    }

    #[test]
    fn access_key_nonce_is_read_from_query_result() {
        let result = unwrap_response(response(json!({
            "result": {"nonce": 77, "permission": "FullAccess", "block_height": 1}
        })))
        .unwrap();
        assert_eq!(parse_access_key_nonce(&result).unwrap(), 77);
    }

    #[test]
    fn query_errors_inside_result_are_surfaced() {
        let err = unwrap_response(response(json!({
            "result": {"error": "access key ed25519:abc does not exist while viewing", "logs": []}
        })))
        .unwrap_err();
        assert!(matches!(err, RpcError::Server(msg) if msg.contains("does not exist")));
    }

    #[test]
    fn server_errors_prefer_cause_name() {
        let err = unwrap_response(response(json!({
            "error": {"name": "HANDLER_ERROR", "cause": {"name": "UNKNOWN_ACCOUNT"}, "message": "Server error"}
        })))
        .unwrap_err();
        assert!(matches!(err, RpcError::Server(msg) if msg == "UNKNOWN_ACCOUNT"));
    }

    #[test]
    fn connector_reuses_clients_per_node_url() {
        let connector = HttpRpcConnector::new(Duration::from_secs(1));
        let a = connector.connect("https://rpc.testnet.near.org").unwrap();
        let b = connector.connect("https://rpc.testnet.near.org").unwrap();
        let c = connector.connect("https://rpc.mainnet.near.org").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn invalid_node_url_is_rejected() {
        let connector = HttpRpcConnector::new(Duration::from_secs(1));
        assert!(matches!(
            connector.connect("not a url"),
            Err(RpcError::InvalidRpcUrl(_))
        ));
    }
}
