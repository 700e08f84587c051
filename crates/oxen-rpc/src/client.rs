//! Base JSON-RPC 2.0 HTTP client.
//!
//! Provides `call()` for JSON-RPC methods (POST to `/json_rpc`) and
//! `post()` for the node's plain JSON endpoints. Supports Basic auth, a
//! request timeout, and a fixed-delay retry of transient failures.

use crate::error::RpcError;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Configuration for an RPC client.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Base URL (e.g., `http://localhost:22023`).
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    /// Extra attempts after a transient failure.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:22023".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl RpcConfig {
    pub fn with_url(url: &str) -> Self {
        Self { url: url.trim_end_matches('/').to_string(), ..Default::default() }
    }
}

/// Async RPC client for the node's JSON-RPC and plain JSON endpoints.
pub struct RpcClient {
    client: reqwest::Client,
    config: RpcConfig,
    request_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Self::with_config(RpcConfig::with_url(url))
    }

    pub fn with_config(mut config: RpcConfig) -> Result<Self, RpcError> {
        config.url = config.url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(RpcError::Client)?;

        Ok(Self { client, config, request_id: AtomicU64::new(0) })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn auth_header(&self) -> Option<HeaderValue> {
        match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
                HeaderValue::from_str(&format!("Basic {encoded}")).ok()
            }
            _ => None,
        }
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(auth) = self.auth_header() {
            headers.insert(AUTHORIZATION, auth);
        }
        headers
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    async fn with_retries<F, Fut>(&self, context: &str, op: F) -> Result<Value, RpcError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Value, RpcError>>,
    {
        let attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(val) => return Ok(val),
                Err(e) if e.is_transient() && attempt < attempts => {
                    log::debug!("{context}: attempt {attempt}/{attempts} failed ({e}), retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Call a JSON-RPC 2.0 method (POST to `/json_rpc`).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let url = format!("{}/json_rpc", self.config.url);
        self.with_retries(method, || {
            let req = JsonRpcRequest { jsonrpc: "2.0", id: self.next_id(), method, params: params.clone() };
            let url = url.clone();
            async move { self.do_call(&url, &req, method).await }
        })
        .await
    }

    async fn do_call(&self, url: &str, req: &JsonRpcRequest<'_>, method: &str) -> Result<Value, RpcError> {
        let body = self.send(url, method, req).await?;
        let body: JsonRpcResponse = serde_json::from_value(body)?;

        if let Some(err) = body.error {
            if err.message == "BUSY" {
                return Err(RpcError::Busy { context: method.to_string() });
            }
            return Err(RpcError::Rpc { code: err.code, message: err.message, method: method.to_string() });
        }

        body.result.ok_or(RpcError::NoResult { context: method.to_string() })
    }

    /// POST JSON to a plain endpoint such as `/get_height`.
    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, RpcError> {
        let url = format!("{}{}", self.config.url, endpoint);
        self.with_retries(endpoint, || self.send(&url, endpoint, body)).await
    }

    async fn send<B: Serialize + ?Sized>(&self, url: &str, method: &str, body: &B) -> Result<Value, RpcError> {
        let http = |source| RpcError::Http { method: method.to_string(), url: url.to_string(), source };
        let resp = self.client.post(url).headers(self.build_headers()).json(body).send().await.map_err(http)?;

        let status = resp.status().as_u16();
        if status == 401 {
            return Err(RpcError::AuthFailed { url: url.to_string() });
        }
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::HttpStatus {
                method: method.to_string(),
                url: url.to_string(),
                status,
                body: body.chars().take(500).collect(),
            });
        }

        resp.json().await.map_err(http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default() {
        let config = RpcConfig::default();
        assert_eq!(config.url, "http://localhost:22023");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = RpcClient::new("http://example.com:22023/").unwrap();
        assert_eq!(client.url(), "http://example.com:22023");
    }

    #[test]
    fn request_ids_increment() {
        let client = RpcClient::new("http://localhost:22023").unwrap();
        let id1 = client.next_id();
        let id2 = client.next_id();
        assert_eq!(id2, id1 + 1);
    }

    #[tokio::test]
    async fn unreachable_node_fails_after_retries() {
        let client = RpcClient::with_config(RpcConfig {
            url: "http://127.0.0.1:1".into(),
            timeout: Duration::from_millis(200),
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
            ..Default::default()
        })
        .unwrap();
        let err = client.post("/get_height", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::Http { .. }));
    }
}
