//! CLI commands for the ledger
//!
//! Implements all command handlers for the CLI interface.

use crate::core::{Block, Ledger, SharedLedger};
use crate::mining::{Miner, MinerConfig, MiningError};
use crate::storage::{Collection, JsonFileStore, StorageConfig};
use crate::wallet::Wallet;
use chrono::{TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub ledger: SharedLedger,
    pub config: StorageConfig,
    pub wallets_dir: PathBuf,
    /// Whether opening the instance created its block store
    pub created: bool,
}

impl AppState {
    /// Open the ledger instance described by `config`
    pub fn new(config: StorageConfig) -> CliResult<Self> {
        let store = JsonFileStore::new(&config)?;
        let created = !store.exists(Collection::Blocks);
        let ledger = Ledger::open(store)?;

        let wallets_dir = config.instance_dir().join("wallets");
        fs::create_dir_all(&wallets_dir)?;

        Ok(Self {
            ledger: ledger.into_shared(),
            config,
            wallets_dir,
            created,
        })
    }

    fn wallet_path(&self, address: &str) -> PathBuf {
        self.wallets_dir.join(format!("{}.json", address))
    }

    /// Load a saved wallet by address
    pub fn load_wallet(&self, address: &str) -> CliResult<Wallet> {
        let path = self.wallet_path(address);
        if !path.exists() {
            return Err(format!("Wallet not found: {}", address).into());
        }
        Ok(Wallet::load(&path)?)
    }

    /// Addresses of all saved wallets
    pub fn list_wallets(&self) -> CliResult<Vec<String>> {
        let mut addresses = Vec::new();

        for entry in fs::read_dir(&self.wallets_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(wallet) = Wallet::load(&path) {
                    addresses.push(wallet.address());
                }
            }
        }

        addresses.sort();
        Ok(addresses)
    }
}

fn short(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

fn format_timestamp(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Initialize a new ledger instance
pub fn cmd_init(state: &AppState) -> CliResult<()> {
    let instance_dir = state.config.instance_dir();
    let ledger = state.ledger.blocking_read();

    if state.created {
        println!("✅ Ledger initialized!");
    } else {
        println!("⚠️  Ledger already exists at {:?}", instance_dir);
    }
    println!("   📁 Data directory: {:?}", instance_dir);
    println!("   🧱 Genesis block hash: {}", ledger.get_all_blocks()[0].hash);
    println!("   📏 Blocks: {}", ledger.get_all_blocks().len());

    Ok(())
}

/// Mine new blocks, paying rewards and fees to `address`
pub fn cmd_mine(state: &AppState, address: &str, count: u32, max_attempts: u64) -> CliResult<()> {
    let config = MinerConfig {
        max_attempts,
        ..MinerConfig::default()
    };
    let miner = Miner::with_config(address, address, config);
    let rt = tokio::runtime::Runtime::new()?;

    println!("⛏️  Mining {} block(s) for address: {}", count, short(address));

    rt.block_on(async {
        let mut mined = 0;

        while mined < count {
            match miner.mine(&state.ledger).await {
                Ok((block, stats)) => {
                    mined += 1;
                    println!("\n   Block {} mined!", block.index);
                    println!("   ├─ Hash: {}", short(&block.hash));
                    println!("   ├─ Target: {}", block.target);
                    println!("   ├─ Transactions: {}", block.tx_count());
                    println!("   ├─ Time: {}ms", stats.time_ms);
                    println!("   ├─ Attempts: {}", stats.hash_attempts);
                    println!("   └─ Hash rate: {:.2} H/s", stats.hash_rate);
                }
                Err(MiningError::Stale(err)) => {
                    log::info!("Retrying stale mining attempt: {}", err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok::<(), MiningError>(())
    })?;

    let balance = state.ledger.blocking_read().get_balance_for_address(address);
    println!("\n💰 New balance for miner: {} coins", balance);

    Ok(())
}

/// Create a new wallet
pub fn cmd_wallet_new(state: &AppState, label: Option<&str>) -> CliResult<()> {
    let wallet = match label {
        Some(l) => Wallet::with_label(l),
        None => Wallet::new(),
    };
    wallet.save(&state.wallet_path(&wallet.address()))?;

    println!("🔐 New wallet created!");
    println!("   📍 Address: {}", wallet.address());
    if let Some(l) = &wallet.label {
        println!("   🏷️  Label: {}", l);
    }
    println!("\n   ⚠️  IMPORTANT: Your private key is stored in the wallets directory.");
    println!("   Back up this directory to avoid losing access to your funds!");

    Ok(())
}

/// List all wallets
pub fn cmd_wallet_list(state: &AppState) -> CliResult<()> {
    let addresses = state.list_wallets()?;

    if addresses.is_empty() {
        println!("📭 No wallets found. Create one with: attendance-ledger wallet new");
        return Ok(());
    }

    let ledger = state.ledger.blocking_read();
    println!("📋 Wallets:");
    for address in &addresses {
        let balance = ledger.get_balance_for_address(address);
        let wallet = state.load_wallet(address)?;
        let label = wallet.label.as_deref().unwrap_or("-");
        let student = ledger.get_student_id_by_public_key(address).unwrap_or("-");
        println!(
            "   {} ({}) - {} coins - student {}",
            address, label, balance, student
        );
    }

    Ok(())
}

/// Get wallet balance
pub fn cmd_wallet_balance(state: &AppState, address: &str) -> CliResult<()> {
    let ledger = state.ledger.blocking_read();
    let utxos = ledger.get_unspent_transactions_for_address(Some(address));
    let balance = ledger.get_balance_for_address(address);

    println!("💰 Balance for {}", short(address));
    println!("   Total: {} coins", balance);
    println!("   UTXOs: {}", utxos.len());

    if !utxos.is_empty() {
        println!("\n   Transaction outputs:");
        for utxo in utxos.iter().take(10) {
            println!(
                "   └─ {}:{} = {} coins",
                short(&utxo.transaction),
                utxo.index,
                utxo.amount
            );
        }
        if utxos.len() > 10 {
            println!("   ... and {} more", utxos.len() - 10);
        }
    }

    Ok(())
}

/// Send coins
pub fn cmd_send(state: &AppState, from: &str, to: &str, amount: u64) -> CliResult<()> {
    let wallet = state.load_wallet(from)?;
    let mut ledger = state.ledger.blocking_write();

    let tx = wallet.create_transaction(&ledger, to, amount, None)?;
    let tx = ledger.add_transaction(tx, true)?;

    println!("📤 Transaction created:");
    println!("   ID: {}", tx.id);
    println!("   From: {}", short(from));
    println!("   To: {}", short(to));
    println!("   Amount: {} coins", amount);
    println!("\n✅ Transaction added to the pending pool");
    println!("   It will be included in a future mined block.");

    Ok(())
}

/// Register a wallet's key as a student id
pub fn cmd_register(state: &AppState, address: &str, student_id: &str) -> CliResult<()> {
    let wallet = state.load_wallet(address)?;
    let mut ledger = state.ledger.blocking_write();

    let tx = wallet.create_registration(&ledger, student_id)?;
    let tx = ledger.add_transaction(tx, true)?;

    println!("🎓 Registration submitted:");
    println!("   ID: {}", tx.id);
    println!("   Student: {}", student_id);
    println!("   Key: {}", short(address));

    Ok(())
}

/// Record attendance of a registered student
pub fn cmd_attend(
    state: &AppState,
    address: &str,
    student_id: &str,
    event_id: &str,
    time_stamp: Option<i64>,
) -> CliResult<()> {
    let wallet = state.load_wallet(address)?;
    let time_stamp = time_stamp.unwrap_or_else(|| Utc::now().timestamp());
    let mut ledger = state.ledger.blocking_write();

    let tx = wallet.create_attendance(&ledger, student_id, event_id, time_stamp)?;
    let tx = ledger.add_transaction(tx, true)?;

    println!("📝 Attendance submitted:");
    println!("   ID: {}", tx.id);
    println!("   Student: {}", student_id);
    println!("   Event: {}", event_id);
    println!("   Time: {}", format_timestamp(time_stamp));

    Ok(())
}

/// Attendance query filters; the first one given wins
pub struct AttendanceQuery<'a> {
    pub student_id: Option<&'a str>,
    pub event_id: Option<&'a str>,
    pub address: Option<&'a str>,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

/// List attendance records
pub fn cmd_attendance(state: &AppState, query: AttendanceQuery<'_>) -> CliResult<()> {
    let ledger = state.ledger.blocking_read();
    let from = query.from.unwrap_or(i64::MIN);
    let to = query.to.unwrap_or(i64::MAX);

    let records = if let Some(student_id) = query.student_id {
        ledger.get_attendance_list_for_id_by_time(student_id, from, to)?
    } else if let Some(event_id) = query.event_id {
        ledger.get_attendance_list_by_event_id(event_id)
    } else if let Some(address) = query.address {
        ledger.get_attendance_list_by_address(address)
    } else {
        ledger.get_attendance_list_by_time(from, to)
    };

    if records.is_empty() {
        println!("📭 No attendance records found.");
        return Ok(());
    }

    println!("📋 Attendance records ({}):", records.len());
    for record in &records {
        println!(
            "   {} | {} | {} | {}",
            format_timestamp(record.time_stamp),
            record.student_id,
            record.event_id,
            short(&record.transaction)
        );
    }

    Ok(())
}

/// Display ledger info
pub fn cmd_chain_info(state: &AppState) -> CliResult<()> {
    let ledger = state.ledger.blocking_read();
    let blocks = ledger.get_all_blocks();
    let last = ledger.get_last_block();
    let total_transactions: usize = blocks.iter().map(Block::tx_count).sum();

    println!("⛓️  Ledger Info ({})", state.config.instance_name);
    println!("   ├─ Height: {}", last.index);
    println!("   ├─ Total blocks: {}", blocks.len());
    println!("   ├─ Total transactions: {}", total_transactions);
    println!("   ├─ Pending transactions: {}", ledger.get_all_transactions().len());
    println!("   ├─ Next target: {}", ledger.get_difficulty(None));
    println!("   └─ Latest hash: {}", last.hash);

    Ok(())
}

/// List recent blocks
pub fn cmd_chain_blocks(state: &AppState, count: usize) -> CliResult<()> {
    let ledger = state.ledger.blocking_read();

    println!("🧱 Recent blocks:");
    for block in ledger.get_all_blocks().iter().rev().take(count) {
        println!(
            "   #{} | {} | {} tx | target {} | {}",
            block.index,
            short(&block.hash),
            block.tx_count(),
            block.target,
            format_timestamp(block.timestamp)
        );
    }

    Ok(())
}

/// Show the pending pool
pub fn cmd_pending(state: &AppState) -> CliResult<()> {
    let ledger = state.ledger.blocking_read();
    let pending = ledger.get_all_transactions();

    println!("📬 Pending transactions: {}", pending.len());
    for tx in pending.iter().take(10) {
        println!(
            "   └─ {} ({}, {} outputs)",
            short(&tx.id),
            tx.kind(),
            tx.outputs().len()
        );
    }

    Ok(())
}

/// Validate the ledger
pub fn cmd_validate(state: &AppState) -> CliResult<()> {
    let ledger = state.ledger.blocking_read();
    println!("🔍 Validating ledger...");

    match ledger.validator().check_chain(ledger.get_all_blocks()) {
        Ok(()) => {
            println!("✅ Ledger is valid!");
            println!("   {} blocks verified", ledger.get_all_blocks().len());
        }
        Err(err) => {
            println!("❌ Ledger validation FAILED: {}", err);
        }
    }

    Ok(())
}

/// Export the block list to file
pub fn cmd_export(state: &AppState, path: &Path) -> CliResult<()> {
    let ledger = state.ledger.blocking_read();
    let json = serde_json::to_string_pretty(ledger.get_all_blocks())?;
    fs::write(path, json)?;
    println!("📦 Blocks exported to {:?}", path);
    Ok(())
}

/// Offer a block list from file as a replacement chain
pub fn cmd_import(state: &AppState, path: &Path) -> CliResult<()> {
    let json = fs::read_to_string(path)?;
    let candidate: Vec<Block> = serde_json::from_str(&json)?;

    let mut ledger = state.ledger.blocking_write();
    let applied = ledger.replace_chain(candidate)?;

    println!("📥 Chain replaced from {:?}", path);
    println!("   {} blocks applied", applied.len());
    println!("   Height: {}", ledger.get_last_block().index);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &Path) -> StorageConfig {
        StorageConfig {
            data_dir: dir.to_path_buf(),
            instance_name: "cli".to_string(),
        }
    }

    #[test]
    fn test_init_reports_existing_instance() {
        let temp_dir = tempfile::tempdir().unwrap();

        let first = AppState::new(temp_config(temp_dir.path())).unwrap();
        assert!(first.created);
        assert!(cmd_init(&first).is_ok());
        drop(first);

        let second = AppState::new(temp_config(temp_dir.path())).unwrap();
        assert!(!second.created);
        assert_eq!(second.ledger.blocking_read().get_all_blocks().len(), 1);
    }

    #[test]
    fn test_mine_stops_at_attempt_bound() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = AppState::new(temp_config(temp_dir.path())).unwrap();

        assert!(cmd_mine(&state, "miner", 1, 0).is_err());
        assert!(cmd_mine(&state, "miner", 1, u64::MAX).is_ok());
        assert_eq!(state.ledger.blocking_read().get_all_blocks().len(), 2);
    }
}
