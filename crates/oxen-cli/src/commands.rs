//! CLI command implementations.

use crate::AppContext;
use oxen_types::constants::COIN;
use oxen_wallet::request::{
    Destination, MnemonicRequest, OnsBuyRequest, OnsRenewRequest, OnsUpdateRequest, TransferRequest,
    TransferResponse, TxOptions,
};
use oxen_wallet::{
    CommsConfig, DaemonComms, KeyHolder, RequestHandler, SoftwareKeyHolder, SubaddressIndex, SyncEvent, SyncStep,
    Wallet, WalletConfig,
};
use std::sync::Arc;
use tokio::sync::mpsc;

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

/// Consecutive failed sync rounds before giving up.
const MAX_SYNC_RETRIES: u32 = 10;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn config(ctx: &AppContext) -> WalletConfig {
    let mut config = WalletConfig::new(ctx.nettype, &ctx.wallet_path);
    if let Some(url) = &ctx.daemon_url {
        config = config.daemon_url(url.clone());
    }
    config
}

fn connect(config: &WalletConfig) -> std::result::Result<Arc<DaemonComms>, Box<dyn std::error::Error>> {
    let comms = DaemonComms::new(CommsConfig::default());
    comms.set_remote(&config.resolved_daemon_url())?;
    Ok(comms)
}

async fn open_wallet(ctx: &AppContext) -> std::result::Result<Arc<Wallet>, Box<dyn std::error::Error>> {
    if !ctx.wallet_path.exists() {
        return Err(format!(
            "wallet file not found: {}\nUse 'create' first, or specify --wallet-file",
            ctx.wallet_path.display()
        )
        .into());
    }
    let config = config(ctx);
    let comms = connect(&config)?;
    Ok(Wallet::open(config, comms, None).await?)
}

fn format_oxen(atomic: u64) -> String {
    format!("{}.{:09}", atomic / COIN, atomic % COIN)
}

fn parse_oxen_amount(s: &str) -> std::result::Result<u64, Box<dyn std::error::Error>> {
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse()? };
    if frac.len() > 9 {
        return Err("too many decimal places (max 9)".into());
    }
    let frac: u64 = if frac.is_empty() { 0 } else { format!("{:0<9}", frac).parse()? };
    whole
        .checked_mul(COIN)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| "amount too large".into())
}

fn print_event(event: SyncEvent) {
    match event {
        SyncEvent::Progress { height, target_height, outputs_found } => {
            let pct = if target_height > 0 { (height as f64 / target_height as f64 * 100.0) as u32 } else { 100 };
            print!("\rHeight {}/{} ({}%), {} outputs found", height, target_height, pct.min(100), outputs_found);
        }
        SyncEvent::Complete { height } => println!("\nSync complete at height {}.", height),
        SyncEvent::Reorg { from_height, to_height } => {
            println!("\nReorg detected: rolled back from {} to {}", from_height, to_height)
        }
        SyncEvent::Error { message } => eprintln!("\nSync error: {}", message),
    }
}

/// Pull blocks until the wallet has reached the node's tip.
async fn catch_up(wallet: &Wallet, mut events: Option<&mut mpsc::Receiver<SyncEvent>>) -> Result {
    let comms = wallet.comms();
    let tip = comms.refresh_top_block().await?;
    log::info!("node reports height {}", tip.height);

    let mut retries = 0;
    loop {
        let step = comms.sync_step().await;
        if let Some(rx) = events.as_deref_mut() {
            while let Ok(event) = rx.try_recv() {
                print_event(event);
            }
        }
        match step {
            SyncStep::Idle | SyncStep::Applied { reached_tip: true, .. } => return Ok(()),
            SyncStep::Applied { .. } => retries = 0,
            SyncStep::Retry(reason) => {
                retries += 1;
                if retries >= MAX_SYNC_RETRIES {
                    return Err(format!("sync stalled: {}", reason).into());
                }
                tokio::time::sleep(comms.config().sync_retry_delay).await;
            }
        }
    }
}

fn print_tx(resp: &TransferResponse, relayed: bool) {
    println!("Transaction {}", if relayed { "submitted" } else { "built (not relayed)" });
    println!("  Hash:   {}", resp.tx_hash);
    println!("  Amount: {} OXEN", format_oxen(resp.amount));
    println!("  Fee:    {} OXEN", format_oxen(resp.fee));
    if !resp.tx_key.is_empty() {
        println!("  Tx key: {}", resp.tx_key);
    }
    if !resp.tx_blob.is_empty() {
        println!("  Blob:   {}", resp.tx_blob);
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

pub async fn create_wallet(ctx: &AppContext) -> Result {
    let path = &ctx.wallet_path;
    if path.exists() {
        return Err(format!("wallet file already exists: {}", path.display()).into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let config = config(ctx);
    let comms = connect(&config)?;
    let keys: Arc<dyn KeyHolder> = Arc::new(SoftwareKeyHolder::generate());
    let wallet = Wallet::open(config, comms, Some(keys)).await?;

    println!("Wallet created: {}", path.display());
    println!();
    println!("The ledger holds your secret keys unencrypted; keep it private.");
    println!("Use 'export-keys' to back them up.");
    println!();
    println!("Address: {}", wallet.address(SubaddressIndex::PRIMARY)?);
    wallet.stop().await;
    Ok(())
}

pub async fn show_address(ctx: &AppContext, major: u32, minor: u32) -> Result {
    let wallet = open_wallet(ctx).await?;
    println!("{}", wallet.address(SubaddressIndex::new(major, minor))?);
    Ok(())
}

pub async fn show_balance(ctx: &AppContext) -> Result {
    let wallet = open_wallet(ctx).await?;
    let handler = RequestHandler::new(wallet);
    let balance = handler.get_balance()?;
    let status = handler.status()?;
    println!("Balance:  {} OXEN", format_oxen(balance.balance));
    println!("Unlocked: {} OXEN", format_oxen(balance.unlocked_balance));
    println!();
    println!("Synced to height: {}", status.sync_height);
    Ok(())
}

pub async fn sync_wallet(ctx: &AppContext) -> Result {
    let wallet = open_wallet(ctx).await?;
    let mut events = wallet.subscribe(256);
    let from = wallet.last_scan_height()? + 1;
    println!("Syncing from height {} ...", from);

    catch_up(&wallet, Some(&mut events)).await?;

    let balance = wallet.balance()?;
    println!();
    println!("Balance:  {} OXEN", format_oxen(balance.balance));
    println!("Unlocked: {} OXEN", format_oxen(balance.unlocked_balance));
    wallet.stop().await;
    Ok(())
}

pub async fn transfer(ctx: &AppContext, address: &str, amount: &str, blink: bool, do_not_relay: bool) -> Result {
    let amount = parse_oxen_amount(amount)?;
    if amount == 0 {
        return Err("amount must be greater than zero".into());
    }
    let wallet = open_wallet(ctx).await?;
    catch_up(&wallet, None).await?;

    let handler = RequestHandler::new(Arc::clone(&wallet));
    let resp = handler
        .transfer(TransferRequest {
            destinations: vec![Destination { address: address.to_string(), amount }],
            priority: if blink { 5 } else { 1 },
            unlock_time: 0,
            do_not_relay,
            options: TxOptions { get_tx_key: true, get_tx_hex: do_not_relay, get_tx_metadata: false },
        })
        .await?;
    print_tx(&resp, !do_not_relay);
    wallet.stop().await;
    Ok(())
}

pub async fn ons_buy(
    ctx: &AppContext,
    ons_type: String,
    name: String,
    value: String,
    owner: Option<String>,
    backup_owner: Option<String>,
) -> Result {
    let wallet = open_wallet(ctx).await?;
    catch_up(&wallet, None).await?;
    let handler = RequestHandler::new(Arc::clone(&wallet));
    let resp = handler
        .ons_buy_mapping(OnsBuyRequest { ons_type, owner, backup_owner, name, value, options: TxOptions::default() })
        .await?;
    print_tx(&resp, true);
    wallet.stop().await;
    Ok(())
}

pub async fn ons_update(
    ctx: &AppContext,
    ons_type: String,
    name: String,
    value: Option<String>,
    owner: Option<String>,
    backup_owner: Option<String>,
) -> Result {
    let wallet = open_wallet(ctx).await?;
    catch_up(&wallet, None).await?;
    let handler = RequestHandler::new(Arc::clone(&wallet));
    let resp = handler
        .ons_update_mapping(OnsUpdateRequest { ons_type, name, value, owner, backup_owner, options: TxOptions::default() })
        .await?;
    print_tx(&resp, true);
    wallet.stop().await;
    Ok(())
}

pub async fn ons_renew(ctx: &AppContext, ons_type: String, name: String) -> Result {
    let wallet = open_wallet(ctx).await?;
    catch_up(&wallet, None).await?;
    let handler = RequestHandler::new(Arc::clone(&wallet));
    let resp = handler.ons_renew_mapping(OnsRenewRequest { ons_type, name, options: TxOptions::default() }).await?;
    print_tx(&resp, true);
    wallet.stop().await;
    Ok(())
}

pub async fn export_keys(ctx: &AppContext) -> Result {
    let wallet = open_wallet(ctx).await?;
    let handler = RequestHandler::new(wallet);
    println!("Secret view key:  {}", handler.export_view_key()?.key);
    println!("Secret spend key: {}", handler.export_spend_key()?.key);
    if let Ok(words) = handler.export_mnemonic_key(MnemonicRequest { language: "English".into() }) {
        println!("Seed words: {}", words.mnemonic);
    }
    println!();
    println!("WARNING: Anyone with the spend key can spend your funds!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts() {
        assert_eq!(parse_oxen_amount("1.5").unwrap(), 1_500_000_000);
        assert_eq!(parse_oxen_amount(".001").unwrap(), 1_000_000);
        assert_eq!(parse_oxen_amount("7").unwrap(), 7 * COIN);
        assert!(parse_oxen_amount("1.0000000001").is_err());
        assert!(parse_oxen_amount("abc").is_err());
        assert!(parse_oxen_amount("99999999999999999").is_err());
        assert_eq!(format_oxen(1_500_000_000), "1.500000000");
        assert_eq!(format_oxen(7), "0.000000007");
    }
}
