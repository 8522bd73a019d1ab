//! JSON-RPC client for the chain peer.
//!
//! Wraps a jsonrpsee HTTP client with a per-request timeout and optional
//! HTTP basic auth, and implements [`ChainSource`]. Every failure maps to a
//! [`PeerError`]; the sync job never retries.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HeaderMap, HeaderValue, HttpClient, HttpClientBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use carver_core::error::PeerError;
use carver_core::traits::ChainSource;
use carver_core::types::{RpcBlock, RpcInfo, RpcTransaction};

use crate::config::SyncConfig;

/// `Authorization` header value for HTTP basic auth.
pub fn basic_auth_value(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

pub struct RpcClient {
    client: HttpClient,
    endpoint: String,
}

impl RpcClient {
    /// Build a client for `endpoint`. No connection is made until the first
    /// call.
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        auth: Option<(&str, &str)>,
    ) -> Result<Self, PeerError> {
        let mut headers = HeaderMap::new();
        if let Some((user, password)) = auth {
            let value = HeaderValue::from_str(&basic_auth_value(user, password))
                .map_err(|e| PeerError::Transport(format!("invalid credentials: {e}")))?;
            headers.insert("Authorization", value);
        }

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .set_headers(headers)
            .build(endpoint)
            .map_err(|e| PeerError::Transport(format!("{endpoint}: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, PeerError> {
        Self::new(&config.rpc_endpoint, config.rpc_timeout(), config.rpc_auth())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: ArrayParams,
    ) -> Result<T, PeerError> {
        debug!(method, "rpc call");
        self.client
            .request(method, params)
            .await
            .map_err(|e| map_client_error(method, e))
    }
}

fn params<P: Serialize>(method: &str, values: &[P]) -> Result<ArrayParams, PeerError> {
    let mut params = ArrayParams::new();
    for value in values {
        params.insert(value).map_err(|e| PeerError::Malformed {
            method: method.to_string(),
            reason: e.to_string(),
        })?;
    }
    Ok(params)
}

fn map_client_error(method: &str, err: ClientError) -> PeerError {
    match err {
        ClientError::Call(obj) => PeerError::Remote {
            method: method.to_string(),
            message: obj.message().to_string(),
        },
        ClientError::RequestTimeout => PeerError::Timeout(method.to_string()),
        ClientError::ParseError(e) => PeerError::Malformed {
            method: method.to_string(),
            reason: e.to_string(),
        },
        other => PeerError::Transport(format!("{method}: {other}")),
    }
}

#[async_trait]
impl ChainSource for RpcClient {
    async fn get_block_hash(&self, height: u64) -> Result<String, PeerError> {
        self.call("getblockhash", params("getblockhash", &[height])?).await
    }

    async fn get_block(&self, hash: &str) -> Result<RpcBlock, PeerError> {
        self.call("getblock", params("getblock", &[hash])?).await
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RpcTransaction, PeerError> {
        let mut p = params("getrawtransaction", &[txid])?;
        p.insert(1).map_err(|e| PeerError::Malformed {
            method: "getrawtransaction".to_string(),
            reason: e.to_string(),
        })?;
        self.call("getrawtransaction", p).await
    }

    async fn get_info(&self) -> Result<RpcInfo, PeerError> {
        self.call("getinfo", ArrayParams::new()).await
    }
}
