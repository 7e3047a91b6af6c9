//! Attendance Ledger CLI Application
//!
//! A command-line interface for operating a ledger instance.

use attendance_ledger::cli::{self, AppState, AttendanceQuery};
use attendance_ledger::storage::StorageConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "attendance-ledger")]
#[command(version = "0.1.0")]
#[command(about = "A proof-of-work ledger for student registration and attendance", long_about = None)]
struct Cli {
    /// Data directory for ledger storage
    #[arg(short, long, default_value = ".ledger_data")]
    data_dir: PathBuf,

    /// Ledger instance name (instances share a data directory)
    #[arg(short, long, default_value = "main")]
    name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new ledger
    Init,

    /// Mine new blocks
    Mine {
        /// Address receiving rewards and fees
        #[arg(short, long)]
        address: String,

        /// Number of blocks to mine
        #[arg(short, long, default_value = "1")]
        count: u32,

        /// Hash attempts per block before giving up
        #[arg(short, long, default_value = "100000000")]
        max_attempts: u64,
    },

    /// Wallet operations
    Wallet {
        #[command(subcommand)]
        action: WalletCommands,
    },

    /// Send coins to an address
    Send {
        /// Sender's wallet address
        #[arg(short, long)]
        from: String,

        /// Recipient's address
        #[arg(short, long)]
        to: String,

        /// Amount to send
        #[arg(short, long)]
        amount: u64,
    },

    /// Register a wallet's key as a student id
    Register {
        /// Wallet address
        #[arg(short, long)]
        wallet: String,

        /// Student id to bind
        #[arg(short, long)]
        student_id: String,
    },

    /// Record attendance at an event
    Attend {
        /// Wallet address of the registered student
        #[arg(short, long)]
        wallet: String,

        #[arg(short, long)]
        student_id: String,

        #[arg(short, long)]
        event_id: String,

        /// Event time in seconds (defaults to now)
        #[arg(short, long)]
        time_stamp: Option<i64>,
    },

    /// Query attendance records
    Attendance {
        #[arg(long)]
        student_id: Option<String>,

        #[arg(long)]
        event_id: Option<String>,

        #[arg(long)]
        address: Option<String>,

        /// Earliest time stamp (inclusive)
        #[arg(long)]
        from: Option<i64>,

        /// Latest time stamp (inclusive)
        #[arg(long)]
        to: Option<i64>,
    },

    /// Display ledger information
    Chain {
        #[command(subcommand)]
        action: Option<ChainCommands>,
    },

    /// Show pending transactions
    Pending,

    /// Validate the ledger
    Validate,

    /// Export blocks to file
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replace the chain with blocks from file if they carry more work
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Subcommand)]
enum WalletCommands {
    /// Create a new wallet
    New {
        /// Optional label for the wallet
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List all wallets
    List,

    /// Show wallet balance
    Balance {
        /// Wallet address
        #[arg(short, long)]
        address: String,
    },
}

#[derive(Subcommand)]
enum ChainCommands {
    /// Show detailed info
    Info,

    /// List recent blocks
    Blocks {
        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = StorageConfig {
        data_dir: cli.data_dir,
        instance_name: cli.name,
    };

    let state = AppState::new(config)?;

    match cli.command {
        Commands::Init => {
            cli::cmd_init(&state)?;
        }

        Commands::Mine {
            address,
            count,
            max_attempts,
        } => {
            cli::cmd_mine(&state, &address, count, max_attempts)?;
        }

        Commands::Wallet { action } => match action {
            WalletCommands::New { label } => {
                cli::cmd_wallet_new(&state, label.as_deref())?;
            }
            WalletCommands::List => {
                cli::cmd_wallet_list(&state)?;
            }
            WalletCommands::Balance { address } => {
                cli::cmd_wallet_balance(&state, &address)?;
            }
        },

        Commands::Send { from, to, amount } => {
            cli::cmd_send(&state, &from, &to, amount)?;
        }

        Commands::Register { wallet, student_id } => {
            cli::cmd_register(&state, &wallet, &student_id)?;
        }

        Commands::Attend {
            wallet,
            student_id,
            event_id,
            time_stamp,
        } => {
            cli::cmd_attend(&state, &wallet, &student_id, &event_id, time_stamp)?;
        }

        Commands::Attendance {
            student_id,
            event_id,
            address,
            from,
            to,
        } => {
            let query = AttendanceQuery {
                student_id: student_id.as_deref(),
                event_id: event_id.as_deref(),
                address: address.as_deref(),
                from,
                to,
            };
            cli::cmd_attendance(&state, query)?;
        }

        Commands::Chain { action } => match action {
            None | Some(ChainCommands::Info) => {
                cli::cmd_chain_info(&state)?;
            }
            Some(ChainCommands::Blocks { count }) => {
                cli::cmd_chain_blocks(&state, count)?;
            }
        },

        Commands::Pending => {
            cli::cmd_pending(&state)?;
        }

        Commands::Validate => {
            cli::cmd_validate(&state)?;
        }

        Commands::Export { output } => {
            cli::cmd_export(&state, &output)?;
        }

        Commands::Import { input } => {
            cli::cmd_import(&state, &input)?;
        }
    }

    Ok(())
}
