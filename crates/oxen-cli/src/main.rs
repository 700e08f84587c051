use clap::{Parser, Subcommand};
use oxen_types::NetType;
use std::path::PathBuf;

mod commands;

/// Oxen light wallet command-line interface.
#[derive(Parser)]
#[command(name = "oxen-wallet-cli")]
#[command(about = "Command-line light wallet for the Oxen network")]
#[command(version)]
struct Cli {
    /// Network to use.
    #[arg(long, default_value = "mainnet")]
    network: NetworkArg,

    /// Node RPC URL (overrides the default for the selected network).
    #[arg(long)]
    daemon: Option<String>,

    /// Wallet ledger path.
    #[arg(long)]
    wallet_file: Option<String>,

    /// Log at debug level (RUST_LOG still wins when set).
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug)]
enum NetworkArg {
    Mainnet,
    Testnet,
    Devnet,
}

impl std::str::FromStr for NetworkArg {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "devnet" | "dev" => Ok(Self::Devnet),
            _ => Err(format!("unknown network: {} (use mainnet, testnet, or devnet)", s)),
        }
    }
}

impl NetworkArg {
    fn to_nettype(self) -> NetType {
        match self {
            Self::Mainnet => NetType::Mainnet,
            Self::Testnet => NetType::Testnet,
            Self::Devnet => NetType::Devnet,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new wallet with fresh keys.
    Create,

    /// Show a wallet address.
    Address {
        #[arg(long, default_value = "0")]
        major: u32,
        #[arg(long, default_value = "0")]
        minor: u32,
    },

    /// Show wallet balance.
    Balance,

    /// Sync the wallet with the node.
    Sync,

    /// Send funds to an address.
    Transfer {
        /// Destination address.
        address: String,

        /// Amount in OXEN (e.g., "1.5" or "0.001").
        amount: String,

        /// Send as a blink transaction.
        #[arg(long)]
        blink: bool,

        /// Build and print the transaction without relaying it.
        #[arg(long)]
        do_not_relay: bool,
    },

    /// Register an ONS name.
    OnsBuy {
        /// Record type: session, wallet, lokinet, lokinet_2y, ...
        #[arg(long, default_value = "session")]
        r#type: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: String,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        backup_owner: Option<String>,
    },

    /// Change the value or owners of an ONS record you own.
    OnsUpdate {
        #[arg(long, default_value = "session")]
        r#type: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        backup_owner: Option<String>,
    },

    /// Renew a lokinet ONS registration.
    OnsRenew {
        #[arg(long, default_value = "lokinet")]
        r#type: String,
        #[arg(long)]
        name: String,
    },

    /// Print the secret view and spend keys.
    ExportKeys,
}

/// Application context shared across commands.
struct AppContext {
    nettype: NetType,
    daemon_url: Option<String>,
    wallet_path: PathBuf,
}

impl AppContext {
    fn from_cli(cli: &Cli) -> Self {
        let wallet_path = match &cli.wallet_file {
            Some(path) => PathBuf::from(path),
            None => default_wallet_dir(cli.network).join("wallet.sqlite"),
        };
        Self { nettype: cli.network.to_nettype(), daemon_url: cli.daemon.clone(), wallet_path }
    }
}

fn default_wallet_dir(network: NetworkArg) -> PathBuf {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("oxen-light-wallet");
    match network {
        NetworkArg::Mainnet => base,
        NetworkArg::Testnet => base.join("testnet"),
        NetworkArg::Devnet => base.join("devnet"),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    let ctx = AppContext::from_cli(&cli);

    let result = match cli.command {
        Commands::Create => commands::create_wallet(&ctx).await,
        Commands::Address { major, minor } => commands::show_address(&ctx, major, minor).await,
        Commands::Balance => commands::show_balance(&ctx).await,
        Commands::Sync => commands::sync_wallet(&ctx).await,
        Commands::Transfer { address, amount, blink, do_not_relay } => {
            commands::transfer(&ctx, &address, &amount, blink, do_not_relay).await
        }
        Commands::OnsBuy { r#type, name, value, owner, backup_owner } => {
            commands::ons_buy(&ctx, r#type, name, value, owner, backup_owner).await
        }
        Commands::OnsUpdate { r#type, name, value, owner, backup_owner } => {
            commands::ons_update(&ctx, r#type, name, value, owner, backup_owner).await
        }
        Commands::OnsRenew { r#type, name } => commands::ons_renew(&ctx, r#type, name).await,
        Commands::ExportKeys => commands::export_keys(&ctx).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
