//! vmsd - Video Management System daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file + env overrides)
//! 2. Opens the SQLite result/alert store
//! 3. Registers the builtin inference models
//! 4. Autostarts any streams named in the config, then restores streams
//!    the store still marks active from a previous run
//! 5. Serves the local control API until ctrl-c
//! 6. Stops all workers cooperatively on shutdown

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vms_kernel::api::{ApiConfig, ApiContext, ApiServer};
use vms_kernel::config::VmsdConfig;
use vms_kernel::{
    register_builtin_models, InferenceRegistry, SqliteStorage, StreamManager, StreamStore,
};

#[derive(Debug, Parser)]
#[command(name = "vmsd", about = "Video Management System daemon")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "VMS_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = VmsdConfig::load_from(args.config.as_deref())?;

    let storage = Arc::new(SqliteStorage::open(&cfg.db_path)?);

    let mut registry = InferenceRegistry::new();
    register_builtin_models(&mut registry);
    let registry = Arc::new(registry);

    let manager = Arc::new(
        StreamManager::new(
            registry,
            storage.clone(),
            storage.clone(),
            cfg.capture,
        )
        .with_stop_timeout(cfg.stop_timeout),
    );

    log::info!("vmsd starting; results stored in {}", cfg.db_path);
    log::info!(
        "available models: {}",
        manager.registry().available_models().join(", ")
    );

    for stream in &cfg.streams {
        if !stream.enabled {
            continue;
        }
        if manager.start(stream.clone()) {
            if let Err(e) = storage.save_stream(stream) {
                log::warn!(
                    "failed to persist config for stream '{}': {}",
                    stream.stream_id,
                    e
                );
            }
        }
    }

    let restored = manager.restore_streams(storage.as_ref());
    if restored > 0 {
        log::info!("restored {} stream(s) from {}", restored, cfg.db_path);
    }

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        ApiContext {
            manager: manager.clone(),
            results: storage.clone(),
            alerts: storage.clone(),
            streams: storage.clone(),
        },
    )
    .spawn()?;
    log::info!("control api listening on {}", api_handle.addr);

    let term = Arc::new(AtomicBool::new(false));
    let term_handler = term.clone();
    ctrlc::set_handler(move || {
        term_handler.store(true, Ordering::SeqCst);
    })?;

    while !term.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutdown requested; stopping {} stream(s)", manager.list_status().len());
    manager.stop_all();
    api_handle.stop()?;
    log::info!("vmsd stopped");
    Ok(())
}
