//! Offline inspection of a persistent corpus store, outside of a running
//! manager process. A store on disk carries only program bytes and their
//! content hash and no recorded coverage, so this tool can only reproduce the
//! disabled-syscall bookkeeping half of `CorpusEngine::minimize`, not the
//! coverage-based half (that needs a live fuzzer's cover samples).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use manager_core::{LineProgramDeserializer, PersistentStore, ProgramDeserializer};

#[derive(Parser)]
#[command(about = "Inspect a manager's persistent corpus store offline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every surviving entry: content hash, size, decoded call names.
    List {
        /// Path to the store's `corpus/` directory.
        dir: PathBuf,
    },
    /// Report which entries reference a disabled syscall and would never be
    /// pruned by a real minimize, without touching anything on disk.
    MinimizeDryRun {
        dir: PathBuf,
        /// Syscall names considered enabled; anything else is disabled.
        #[arg(long)]
        enabled: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let deserializer = LineProgramDeserializer;

    match cli.command {
        Command::List { dir } => {
            let (_store, entries) = PersistentStore::open(&dir, |bytes| deserializer.decode(bytes).is_ok())
                .map_err(|e| anyhow::anyhow!("cannot open {dir:?}: {e}"))?;
            for (hash, bytes) in &entries {
                let calls = deserializer
                    .decode(bytes)
                    .unwrap_or_default()
                    .join(",");
                println!("{hash}\t{} bytes\t{calls}", bytes.len());
            }
            println!("{} entries", entries.len());
        }
        Command::MinimizeDryRun { dir, enabled } => {
            let enabled: std::collections::HashSet<String> = enabled.into_iter().collect();
            let (_store, entries) = PersistentStore::open(&dir, |bytes| deserializer.decode(bytes).is_ok())
                .map_err(|e| anyhow::anyhow!("cannot open {dir:?}: {e}"))?;

            let mut disabled_hashes = Vec::new();
            let mut triageable = Vec::new();
            for (hash, bytes) in &entries {
                let calls = deserializer.decode(bytes).unwrap_or_default();
                if calls.iter().any(|c| !enabled.contains(c)) {
                    disabled_hashes.push(hash.clone());
                } else {
                    triageable.push(hash.clone());
                }
            }

            println!("{} entries reference a disabled syscall (kept forever):", disabled_hashes.len());
            for hash in &disabled_hashes {
                println!("  {hash}");
            }
            println!("{} entries are eligible for coverage-based minimization once a fuzzer retriages them", triageable.len());
        }
    }
    Ok(())
}
