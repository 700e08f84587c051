//! Wallet and daemon comms settings.

use std::path::PathBuf;
use std::time::Duration;

use oxen_types::NetType;

/// Settings for one wallet instance.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub nettype: NetType,
    /// Ledger file; `:memory:` keeps everything in memory.
    pub db_path: PathBuf,
    /// Node URL; `None` uses the network's default local port.
    pub daemon_url: Option<String>,
    /// Subaddress rectangle scanned for receives: `(majors, minors)`.
    pub subaddress_lookahead: (u32, u32),
    pub submit_timeout: Duration,
    pub ons_lookup_timeout: Duration,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            nettype: NetType::Mainnet,
            db_path: PathBuf::from("wallet.sqlite"),
            daemon_url: None,
            subaddress_lookahead: (50, 200),
            submit_timeout: Duration::from_secs(5),
            ons_lookup_timeout: Duration::from_secs(5),
        }
    }
}

impl WalletConfig {
    pub fn new(nettype: NetType, db_path: impl Into<PathBuf>) -> Self {
        Self { nettype, db_path: db_path.into(), ..Default::default() }
    }

    pub fn daemon_url(mut self, url: impl Into<String>) -> Self {
        self.daemon_url = Some(url.into());
        self
    }

    pub fn subaddress_lookahead(mut self, majors: u32, minors: u32) -> Self {
        self.subaddress_lookahead = (majors.max(1), minors.max(1));
        self
    }

    pub fn submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn ons_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.ons_lookup_timeout = timeout;
        self
    }

    pub fn resolved_daemon_url(&self) -> String {
        self.daemon_url.clone().unwrap_or_else(|| oxen_rpc::default_daemon_url(self.nettype))
    }
}

/// Tuning for the block sync engine.
#[derive(Debug, Clone)]
pub struct CommsConfig {
    pub max_blocks_per_request: u64,
    /// Byte budget the node may fill per `get_blocks` reply.
    pub blocks_size_limit: u64,
    pub sync_retry_delay: Duration,
    /// Tip poll period until the first successful poll.
    pub tip_poll_initial: Duration,
    pub tip_poll_interval: Duration,
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_request: 200,
            blocks_size_limit: 1024 * 1024,
            sync_retry_delay: Duration::from_millis(500),
            tip_poll_initial: Duration::from_secs(3),
            tip_poll_interval: Duration::from_secs(15),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = WalletConfig::default();
        assert_eq!(config.subaddress_lookahead, (50, 200));
        assert_eq!(config.submit_timeout, Duration::from_secs(5));
        assert_eq!(config.resolved_daemon_url(), "http://127.0.0.1:22023");

        let comms = CommsConfig::default();
        assert_eq!(comms.max_blocks_per_request, 200);
        assert_eq!(comms.sync_retry_delay, Duration::from_millis(500));
    }

    #[test]
    fn builder_setters() {
        let config = WalletConfig::new(NetType::Testnet, "/tmp/w.sqlite")
            .daemon_url("http://node:38157")
            .subaddress_lookahead(0, 5);
        assert_eq!(config.subaddress_lookahead, (1, 5));
        assert_eq!(config.resolved_daemon_url(), "http://node:38157");
    }
}
