//! RPC error types.

use thiserror::Error;

/// JSON-RPC 2.0 standard error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{method} to {url} failed: {source}")]
    Http {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} to {url} returned HTTP {status}: {body}")]
    HttpStatus { method: String, url: String, status: u16, body: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code} from {method}: {message}")]
    Rpc { code: i64, message: String, method: String },

    #[error("no result in {context} response")]
    NoResult { context: String },

    #[error("{context}: node returned status '{status}'")]
    Status { context: String, status: String },

    #[error("malformed {context} response: {reason}")]
    InvalidResponse { context: String, reason: String },

    #[error("authentication failed for {url}")]
    AuthFailed { url: String },

    #[error("node busy during {context}")]
    Busy { context: String },

    #[error("no node configured")]
    NotConnected,
}

impl RpcError {
    /// Transport hiccups and busy nodes are worth retrying after a delay;
    /// anything the node rejected on its merits is not.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Http { source, .. } => source.is_timeout() || source.is_connect() || source.is_request(),
            RpcError::HttpStatus { status, .. } => *status >= 500,
            RpcError::Busy { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn invalid(context: &str, reason: impl Into<String>) -> Self {
        RpcError::InvalidResponse { context: context.to_string(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(RpcError::Busy { context: "get_blocks".into() }.is_transient());
        assert!(RpcError::HttpStatus { method: "m".into(), url: "u".into(), status: 503, body: String::new() }
            .is_transient());
        assert!(!RpcError::HttpStatus { method: "m".into(), url: "u".into(), status: 404, body: String::new() }
            .is_transient());
        assert!(!RpcError::Rpc { code: codes::INVALID_PARAMS, message: "bad".into(), method: "m".into() }
            .is_transient());
        assert!(!RpcError::NotConnected.is_transient());
    }
}
