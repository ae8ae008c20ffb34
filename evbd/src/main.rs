mod config;
mod control_api;
mod dto;
mod engine_thread;
mod ingest;
mod sink;

use std::io::Write;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;

use clap::Parser;
use evb_core::{EngineStats, ObserverRegistry};
use log::{error, info};

use config::Config;
use sink::Sink;

/// Time-ordered multi-source fragment event builder daemon.
#[derive(Parser, Debug)]
#[command(name = "evbd", version, about)]
struct Args {
    /// Path to a TOML config file. Overrides `EVBD_CONFIG` if given.
    #[arg(long, env = "EVBD_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Fragment-ingestion listen address, overriding the config file.
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,

    /// Control/status API listen address, overriding the config file.
    #[arg(long)]
    control_listen: Option<std::net::SocketAddr>,

    /// Write merged events here instead of what the config file says.
    #[arg(long)]
    sink: Option<std::path::PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_log::LogTracer::init()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(control_listen) = args.control_listen {
        config.control_listen = control_listen;
    }
    if let Some(sink_path) = args.sink {
        config.sink.path = Some(sink_path);
    }

    run(config)
}

fn run(config: Config) -> anyhow::Result<()> {
    let observers = Arc::new(ObserverRegistry::new());
    let stats = Arc::new(EngineStats::new());

    let (sort_in_tx, sort_in_rx) = sync_channel(1024);
    let (output_in_tx, output_in_rx) = sync_channel(1024);

    let sort_handle = std::thread::Builder::new()
        .name("evb-sort".into())
        .spawn(move || evb_core::sort::run(sort_in_rx, output_in_tx))?;

    let sink = Sink::open(&config.sink)?;
    let max_write = config.sink.max_write_bytes;
    let output_stats = Arc::new(evb_core::output::OutputStats::default());
    let output_stats_for_thread = output_stats.clone();
    let output_handle = std::thread::Builder::new()
        .name("evb-output".into())
        .spawn(move || evb_core::output::run(output_in_rx, sink, max_write, &output_stats_for_thread))?;

    let (engine_handle, engine_tx) = engine_thread::spawn(
        config.engine.to_engine_config(),
        observers.clone(),
        stats.clone(),
        sort_in_tx,
    );

    ctrlc::set_handler(move || {
        info!("received shutdown signal, exiting");
        std::process::exit(0);
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let listen = config.listen;
    let control_listen = config.control_listen;
    let api_state = control_api::AppState {
        engine_tx: engine_tx.clone(),
    };

    runtime.block_on(async move {
        let ingest = tokio::spawn(async move {
            if let Err(e) = ingest::run(listen, engine_tx).await {
                error!("ingest listener failed: {e}");
            }
        });

        let router = control_api::router(api_state);
        let control_task = tokio::spawn(async move {
            match tokio::net::TcpListener::bind(control_listen).await {
                Ok(listener) => {
                    info!("control API listening on {control_listen}");
                    if let Err(e) = axum::serve(listener, router).await {
                        error!("control API failed: {e}");
                    }
                }
                Err(e) => error!("failed to bind control API on {control_listen}: {e}"),
            }
        });

        let _ = tokio::join!(ingest, control_task);
    });

    let _ = sort_handle.join();
    let _ = output_handle.join();
    let _ = engine_handle.join();
    let _ = std::io::stdout().flush();

    Ok(())
}
