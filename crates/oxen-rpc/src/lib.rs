//! Oxen node RPC client.
//!
//! An async HTTP client for the node's JSON RPC interface, typed wrappers
//! for the handful of calls a light wallet needs, and the [`NodeRpc`] trait
//! the wallet's daemon comms are written against.
//!
//! # Example
//!
//! ```ignore
//! use oxen_rpc::{DaemonRpc, NodeRpc};
//!
//! #[tokio::main]
//! async fn main() {
//!     let daemon = DaemonRpc::new("http://localhost:22023").unwrap();
//!     let tip = daemon.get_height().await.unwrap();
//!     println!("Height: {}", tip.height);
//! }
//! ```

pub mod client;
pub mod daemon;
pub mod error;
pub mod node;

pub use client::{RpcClient, RpcConfig};
pub use daemon::DaemonRpc;
pub use error::RpcError;
pub use node::{BlockBatch, NodeRpc};

use oxen_types::NetType;

/// Default node URL for `nettype`.
pub fn default_daemon_url(nettype: NetType) -> String {
    format!("http://127.0.0.1:{}", nettype.rpc_default_port())
}
