/*!
Stow CLI - inspect and manage versioned stores.

Each command takes a target: a URI (`s3://bucket/key`, `memory://key`) or a
plain object path on the storage selected with `--storage`.
*/

use anyhow::{bail, Context};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use stow_core::storage::{join_path, parent_of};
use stow_core::{
    create_backend, init_observability, EnvelopeHeader, NativeSerializer, StorageConfig,
    StorageKind, StoreInterface, StowError, VersionedStore,
};
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stow")]
#[command(about = "CLI for inspecting and managing versioned stores")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Storage backend for targets given as plain paths
    #[arg(short, long, global = true, value_enum, default_value = "disk")]
    storage: StorageType,

    /// Base directory for disk storage
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// S3 bucket for s3 storage
    #[arg(long, global = true, env = "AWS_S3_BUCKET")]
    bucket: Option<String>,

    /// AWS region for s3 storage
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StorageType {
    Disk,
    S3,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the envelope header of the current object or a history entry
    Inspect {
        #[arg(env = "STOW_URI")]
        target: String,
        /// History entry to inspect instead of the current object
        #[arg(short, long)]
        entry: Option<String>,
    },
    /// Check the integrity of the current object
    Verify {
        #[arg(env = "STOW_URI")]
        target: String,
        /// Also check every history entry
        #[arg(short, long)]
        all: bool,
    },
    /// List history entries, oldest first
    History {
        #[arg(env = "STOW_URI")]
        target: String,
    },
    /// Make a history entry current again
    Restore {
        #[arg(env = "STOW_URI")]
        target: String,
        /// History entry (full path or file name)
        entry: String,
    },
    /// Delete all but the newest history entries
    Prune {
        #[arg(env = "STOW_URI")]
        target: String,
        /// Number of history entries to keep
        #[arg(short, long)]
        keep: usize,
    },
    /// Save a JSON document as the current object
    Import {
        #[arg(env = "STOW_URI")]
        target: String,
        /// JSON file to store
        file: PathBuf,
        /// Keep the replaced object as a history entry
        #[arg(long, env = "STOW_HISTORY")]
        history: bool,
    },
    /// Print the content of the current object or a history entry as JSON
    Export {
        #[arg(env = "STOW_URI")]
        target: String,
        /// History entry to export instead of the current object
        #[arg(short, long)]
        entry: Option<String>,
    },
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Entry")]
    entry: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Status")]
    status: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    init_observability(cli.json_logs, level)?;

    match &cli.command {
        Commands::Inspect { target, entry } => {
            inspect(&open_target(&cli, target)?, entry.as_deref())?
        }
        Commands::Verify { target, all } => verify(&open_target(&cli, target)?, *all)?,
        Commands::History { target } => history(&open_target(&cli, target)?)?,
        Commands::Restore { target, entry } => restore(&open_target(&cli, target)?, entry)?,
        Commands::Prune { target, keep } => prune(&open_target(&cli, target)?, *keep)?,
        Commands::Import {
            target,
            file,
            history,
        } => import(open_target(&cli, target)?, file, *history)?,
        Commands::Export { target, entry } => {
            export(&open_target(&cli, target)?, entry.as_deref())?
        }
    }

    Ok(())
}

fn storage_config(cli: &Cli) -> Result<StorageConfig, anyhow::Error> {
    match cli.storage {
        StorageType::Disk => Ok(match &cli.base_dir {
            Some(base) => StorageConfig::local_with_base(base),
            None => StorageConfig::default_local(),
        }),
        StorageType::S3 => {
            let bucket = cli
                .bucket
                .clone()
                .context("--bucket or AWS_S3_BUCKET is required for s3 storage")?;
            Ok(StorageConfig {
                s3_region: cli.region.clone(),
                ..StorageConfig::s3_with_bucket(bucket)
            })
        }
    }
}

fn open_target(cli: &Cli, target: &str) -> Result<VersionedStore, anyhow::Error> {
    let (mut config, path) = if target.contains("://") {
        StorageConfig::from_uri(target)?
    } else {
        (storage_config(cli)?, target.to_string())
    };
    if path.is_empty() {
        bail!("{target} names no object path");
    }
    if config.backend == StorageKind::S3 && config.s3_region.is_none() {
        config.s3_region = cli.region.clone();
    }

    info!(backend = %config.backend, path = %path, "Opening store");
    let backend = create_backend(&config)?;
    Ok(VersionedStore::new(path, backend))
}

/// Accept either a full history path or just its file name
fn resolve_entry(store: &VersionedStore, entry: &str) -> String {
    if entry.contains('/') {
        entry.to_string()
    } else {
        join_path(parent_of(store.path()), entry)
    }
}

fn read_target(store: &VersionedStore, entry: Option<&str>) -> Result<(String, Vec<u8>), StowError> {
    match entry {
        Some(entry) => {
            let location = resolve_entry(store, entry);
            let bytes = store.load_bytes_from(&location)?;
            Ok((location, bytes))
        }
        None => Ok((store.path().to_string(), store.load_bytes()?)),
    }
}

fn inspect(store: &VersionedStore, entry: Option<&str>) -> Result<(), anyhow::Error> {
    let (location, bytes) = read_target(store, entry)?;
    let header = NativeSerializer::inspect(&bytes)?;
    print_header(&location, bytes.len(), &header);
    Ok(())
}

fn print_header(location: &str, stored_size: usize, header: &EnvelopeHeader) {
    println!("Object Details:");
    println!("  Location: {location}");
    println!("  Type: {}", header.type_tag);
    println!("  Envelope ID: {}", header.envelope_id);
    println!("  Created: {}", format_timestamp(header.created_at));
    println!("  Format Version: {}", header.format_version);
    println!("  Compression: {}", header.compression_algorithm);
    println!("  Stored Size: {}", format_size(stored_size as u64));
    println!(
        "  Uncompressed Size: {}",
        format_size(header.uncompressed_size as u64)
    );
    println!("  Content Hash: {}", header.content_hash);
}

fn verify(store: &VersionedStore, all: bool) -> Result<(), anyhow::Error> {
    let mut locations = vec![store.path().to_string()];
    if all {
        locations.extend(store.history()?);
    }

    let mut failures = 0;
    for location in &locations {
        let outcome = store
            .load_bytes_from(location)
            .and_then(|bytes| NativeSerializer::inspect(&bytes));
        match outcome {
            Ok(_) => println!("✓ {location}"),
            Err(e) => {
                error!(location = %location, error = %e, "Verification failed");
                println!("✗ {location}: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} object(s) failed verification", locations.len());
    }
    println!("All {} object(s) passed integrity checks", locations.len());
    Ok(())
}

fn history(store: &VersionedStore) -> Result<(), anyhow::Error> {
    let entries = store.history()?;
    if entries.is_empty() {
        println!("No history entries for {}", store.path());
        return Ok(());
    }

    let rows: Vec<HistoryRow> = entries
        .into_iter()
        .map(|entry| {
            let (created, size, status) = match store.load_bytes_from(&entry) {
                Ok(bytes) => match NativeSerializer::inspect(&bytes) {
                    Ok(header) => (
                        format_timestamp(header.created_at),
                        format_size(bytes.len() as u64),
                        "ok".to_string(),
                    ),
                    Err(e) => ("-".to_string(), format_size(bytes.len() as u64), e.kind().to_string()),
                },
                Err(e) => ("-".to_string(), "-".to_string(), e.kind().to_string()),
            };
            HistoryRow {
                entry,
                created,
                size,
                status,
            }
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

fn restore(store: &VersionedStore, entry: &str) -> Result<(), anyhow::Error> {
    let location = resolve_entry(store, entry);
    store.restore(&location)?;
    println!("✓ Restored {location} as {}", store.path());
    Ok(())
}

fn prune(store: &VersionedStore, keep: usize) -> Result<(), anyhow::Error> {
    let removed = store.prune_history(keep)?;
    println!("✓ Removed {removed} history entr{}", if removed == 1 { "y" } else { "ies" });
    Ok(())
}

fn import(store: VersionedStore, file: &Path, history: bool) -> Result<(), anyhow::Error> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let document: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let store = store.with_history(history);
    store.save(&document)?;
    println!("✓ Saved {} to {}", file.display(), store.path());
    Ok(())
}

fn export(store: &VersionedStore, entry: Option<&str>) -> Result<(), anyhow::Error> {
    let (_, bytes) = read_target(store, entry)?;
    let (_, value) = NativeSerializer::decode_untyped(&bytes)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
