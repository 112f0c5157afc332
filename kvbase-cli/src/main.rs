//! Command-line tool for KVB database files
//!
//! Keys and values are fixed-width, so they are passed on the command
//! line as hex strings of exactly the widths the database declares.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use kvbase_core::{validate_file, Error, Geometry, OpenMode, Store};

#[derive(Parser)]
#[command(name = "kvb")]
#[command(about = "Fixed-width key-value database tool")]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a database file
    Create {
        path: PathBuf,
        /// Slots per hash page
        #[arg(short, long, default_value_t = 1024)]
        slots: u64,
        /// Key width in bytes
        #[arg(short, long)]
        key_size: u64,
        /// Value width in bytes
        #[arg(long)]
        value_size: u64,
        /// Truncate if the file already exists
        #[arg(long)]
        force: bool,
    },

    /// Look up one key
    Get { path: PathBuf, key: String },

    /// Insert or overwrite one entry
    Put {
        path: PathBuf,
        key: String,
        value: String,
    },

    /// Delete one key (tombstone)
    Del { path: PathBuf, key: String },

    /// List all live entries
    Dump {
        path: PathBuf,
        /// Emit JSON instead of tab-separated hex
        #[arg(long)]
        json: bool,
    },

    /// Show geometry and chain statistics
    Info {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Verify the file structure without opening the database
    Check {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .compact()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            // Engine errors exit with the negated C protocol code (1..4)
            let code = err
                .downcast_ref::<Error>()
                .map(|e| (-e.code()) as u8)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn run(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Create {
            path,
            slots,
            key_size,
            value_size,
            force,
        } => {
            let mode = if force {
                OpenMode::RwReplace
            } else {
                OpenMode::RwCreat
            };
            let store = Store::open(&path, mode, Geometry::new(slots, key_size, value_size))?;
            let g = store.geometry();
            println!(
                "{}: S={} K={} V={}",
                path.display(),
                g.hash_table_size,
                g.key_size,
                g.value_size
            );
            Ok(ExitCode::SUCCESS)
        }

        Commands::Get { path, key } => {
            let mut store = Store::open(&path, OpenMode::Rdonly, Geometry::new(0, 0, 0))?;
            let key = parse_hex(&key, store.geometry().key_size, "key")?;
            let mut value = vec![0u8; store.geometry().value_size as usize];
            if store.get(&key, &mut value)? {
                println!("{}", to_hex(&value));
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("key not found");
                Ok(ExitCode::from(1))
            }
        }

        Commands::Put { path, key, value } => {
            let mut store = Store::open(&path, OpenMode::Rdwr, Geometry::new(0, 0, 0))?;
            let key = parse_hex(&key, store.geometry().key_size, "key")?;
            let value = parse_hex(&value, store.geometry().value_size, "value")?;
            store.put(&key, &value)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Del { path, key } => {
            let mut store = Store::open(&path, OpenMode::Rdwr, Geometry::new(0, 0, 0))?;
            let key = parse_hex(&key, store.geometry().key_size, "key")?;
            store.delete(&key)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Dump { path, json } => {
            let mut store = Store::open(&path, OpenMode::Rdonly, Geometry::new(0, 0, 0))?;
            if json {
                let mut entries = Vec::new();
                for entry in store.iter() {
                    let (key, value) = entry?;
                    entries.push(json!({
                        "key": to_hex(&key),
                        "value": to_hex(&value),
                    }));
                }
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in store.iter() {
                    let (key, value) = entry?;
                    println!("{}\t{}", to_hex(&key), to_hex(&value));
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Info { path, json } => {
            let store = Store::open(&path, OpenMode::Rdonly, Geometry::new(0, 0, 0))?;
            let g = store.geometry();
            let file_size = std::fs::metadata(&path)?.len();
            if json {
                let info = json!({
                    "path": path.display().to_string(),
                    "hash_table_size": g.hash_table_size,
                    "key_size": g.key_size,
                    "value_size": g.value_size,
                    "pages": store.page_count(),
                    "file_size": file_size,
                });
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Path: {}", path.display());
                println!(
                    "Geometry: S={} K={} V={}",
                    g.hash_table_size, g.key_size, g.value_size
                );
                println!("Hash pages: {}", store.page_count());
                println!("File size: {} bytes", file_size);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Check { path, json } => {
            let result = validate_file(&path)?;
            let valid = if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                result.valid
            } else {
                result.print()
            };
            if valid {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(4))
            }
        }
    }
}

/// Parse a hex string of exactly `width` bytes.
fn parse_hex(s: &str, width: u64, what: &str) -> anyhow::Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    anyhow::ensure!(
        s.len() % 2 == 0,
        "{what} needs an even number of hex digits"
    );
    let bytes = (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .with_context(|| format!("{what} is not valid hex"))?;
    anyhow::ensure!(
        bytes.len() as u64 == width,
        "{what} must be {width} bytes, got {}",
        bytes.len()
    );
    Ok(bytes)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
