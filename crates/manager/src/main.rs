//! Boots the persistent store, the corpus engine, the RPC server and the
//! per-slot supervisors, then waits for `SIGINT` to drain everything down.

mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::Config;
use manager_bolts::Suppressions;
use manager_core::{CallTable, CorpusEngine, LineProgramDeserializer, PersistentStore, Supervisor, SupervisorTuning, UniformPriorityModel};
use rustc_hash::FxHashSet;

#[derive(Parser, Debug)]
#[command(about = "Coordinates a fleet of VM-based fuzzer instances")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long)]
    config: std::path::PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    std::fs::create_dir_all(config.crashes_dir())
        .map_err(|e| anyhow::anyhow!("cannot create crashes dir: {e}"))?;

    let deserializer: Arc<dyn manager_core::ProgramDeserializer> = Arc::new(LineProgramDeserializer);
    let validator_deserializer = Arc::clone(&deserializer);
    let (store, persisted) = PersistentStore::open(&config.corpus_dir(), move |bytes| {
        validator_deserializer.decode(bytes).is_ok()
    })
    .map_err(|e| anyhow::anyhow!("cannot open corpus store: {e}"))?;

    let enabled: FxHashSet<String> = config.enabled_syscalls.iter().cloned().collect();
    let calls = CallTable::new(&config.syscalls, &enabled);
    let cover_enabled = config.cover;

    let priority_model = Arc::new(UniformPriorityModel);
    let engine = Arc::new(CorpusEngine::new(
        store,
        calls,
        cover_enabled,
        deserializer,
        priority_model,
    ));
    engine.startup_load(persisted);

    let suppressions = Arc::new(
        Suppressions::compile(&config.suppressions)
            .map_err(|e| anyhow::anyhow!("bad suppression regex: {e}"))?,
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handler(Arc::clone(&shutdown));

    let rpc_engine = Arc::clone(&engine);
    let rpc_shutdown = Arc::clone(&shutdown);
    let rpc_addr = config.rpc.clone();
    tokio::spawn(async move {
        if let Err(e) = manager_core::rpc::serve(&rpc_addr, rpc_engine, rpc_shutdown).await {
            log::error!("rpc server exited: {e}");
        }
    });

    let pool = manager_drivers::pool_for(&config.vm_type)
        .map_err(|e| anyhow::anyhow!("cannot set up vm driver {:?}: {e}", config.vm_type))?
        .into();
    spawn_supervisors(&config, Arc::clone(&engine), Arc::clone(&suppressions), Arc::clone(&shutdown), pool);

    spawn_stats_logger(Arc::clone(&engine), Arc::clone(&shutdown));

    while !shutdown.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    log::info!("shutdown requested, draining supervisors");
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}

fn spawn_supervisors(
    config: &Config,
    engine: Arc<CorpusEngine>,
    suppressions: Arc<Suppressions>,
    shutdown: Arc<AtomicBool>,
    pool: Arc<dyn manager_drivers::VmPool>,
) {
    for slot in 0..config.count {
        let name = format!("vm{slot}");
        let supervisor = Supervisor::new(
            name,
            Arc::clone(&pool),
            config.rpc.clone(),
            config.procs,
            config.leak,
            config.cover,
            config.sandbox.clone(),
            config.debug,
            config.syzkaller.clone(),
            config.crashes_dir(),
            Arc::clone(&suppressions),
            Arc::clone(&engine),
            slot == 0,
            Arc::clone(&shutdown),
            SupervisorTuning::default(),
        );
        tokio::spawn(async move { supervisor.run().await });
    }
}

fn spawn_stats_logger(engine: Arc<CorpusEngine>, shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        while !shutdown.load(Ordering::Relaxed) {
            interval.tick().await;
            let stats = engine.stats_snapshot();
            log::info!(
                "exec total {}, crashes {}",
                stats.get("exec total"),
                stats.get("crashes")
            );
        }
    });
}

/// First `SIGINT` sets the shutdown flag and lets supervisors drain; a
/// second terminates immediately. Runs on a blocking thread since
/// `signal_hook::iterator::Signals` is a synchronous iterator.
fn install_signal_handler(shutdown: Arc<AtomicBool>) {
    let mut signals = match signal_hook::iterator::Signals::new([signal_hook::consts::SIGINT]) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("could not install SIGINT handler: {e}");
            return;
        }
    };
    tokio::task::spawn_blocking(move || {
        let mut first = true;
        for _ in signals.forever() {
            if first {
                log::info!("received interrupt, shutting down gracefully (press again to force)");
                shutdown.store(true, Ordering::Relaxed);
                first = false;
            } else {
                log::warn!("received second interrupt, terminating immediately");
                std::process::exit(130);
            }
        }
    });
}
