// Allow dead code - several query APIs are kept for completeness alongside
// the handlers that exercise their siblings
#![allow(dead_code)]

//! SKS mesh spider daemon
//!
//! A web server that starts from a seed SKS keyserver, spiders the gossip
//! mesh out from there, and serves the result: HTML pages for operators
//! and machine-readable feeds for DNS-zone builders.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SKS SPIDER                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Scan scheduler       ──► spider run every interval+jitter   │
//! │  Spider coordinator   ──► DNS + stats fetch fan-out          │
//! │  Snapshot builder     ──► immutable mesh snapshot, published │
//! │  HTTP frontend        ──► peers UI, ip-valid feed, graph-dot │
//! │  Persist signal       ──► SIGUSR1 dumps snapshot to JSON     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use trust_dns_resolver::TokioAsyncResolver;

mod api;
mod config;
mod countries;
mod diagnostics;
mod ipvalid;
mod membership;
mod skip_addresses;
mod snapshot;
mod spider;
mod types;
mod versions;

use api::ApiState;
use config::SpiderConfig;
use diagnostics::Diagnostics;
use snapshot::CurrentSnapshot;

/// SKS mesh spider and stats server
#[derive(Parser, Debug)]
#[command(name = "sks-spider")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Spiders the SKS keyserver mesh and serves the snapshot", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hostname the spider starts from
    #[arg(long)]
    seed_host: Option<String>,

    /// Listen address for the HTTP frontend
    #[arg(long)]
    listen: Option<String>,

    /// Where to write the daemon log
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log to stdout instead of the log file
    #[arg(long)]
    log_stdout: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write each completed scan here as JSON
    #[arg(long)]
    json_dump: Option<PathBuf>,

    /// Serve this JSON dump instead of spidering at all
    #[arg(long)]
    json_load: Option<PathBuf>,

    /// Snapshot carried across restarts; rewritten on SIGUSR1
    #[arg(long)]
    json_persist: Option<PathBuf>,

    /// SKS membership file for the hostnames endpoint
    #[arg(long)]
    membership_file: Option<PathBuf>,

    /// Created with a greeting line once the first snapshot is served
    #[arg(long)]
    started_file: Option<PathBuf>,
}

/// Set up tracing; the guard must outlive main
fn setup_logging(
    config: &SpiderConfig,
    level: &str,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if config.log_stdout {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    }

    // Fail now, not at first write: an unwritable logfile is fatal
    std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(&config.log_file)
        .map_err(|err| anyhow::anyhow!("unable to open logfile {:?}: {err}", config.log_file))?;

    let directory = config
        .log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = config
        .log_file
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "sksdaemon.log".into());
    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

/// Write the started-flag file once the first snapshot is being served
async fn touch_started_file(config: &SpiderConfig) {
    if let Some(path) = &config.started_file {
        let greeting = format!("sks-spider {} serving\n", env!("CARGO_PKG_VERSION"));
        if let Err(err) = tokio::fs::write(path, greeting).await {
            warn!("could not write started file {path:?}: {err}");
        }
    }
}

/// Periodic spider passes, each publishing a fresh snapshot
async fn run_scan_loop(
    config: Arc<SpiderConfig>,
    resolver: Arc<TokioAsyncResolver>,
    client: reqwest::Client,
    snapshot_slot: CurrentSnapshot,
    diagnostics: Diagnostics,
    scanning: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let mut first_scan = true;
    loop {
        scanning.store(true, Ordering::Relaxed);
        let outcome = spider::run_spider(
            config.clone(),
            resolver.clone(),
            client.clone(),
            &diagnostics,
        )
        .await;
        match outcome {
            Ok(state) => {
                let mut info = snapshot::generate_persisted(state, &config.seed_host);
                snapshot::resolve_countries(&mut info, &resolver, &config.countries_zone).await;
                if let Some(path) = &config.json_dump {
                    if let Err(err) = snapshot::serialize::dump_json_to_file(&info.host_map, path)
                    {
                        warn!("JSON dump to {path:?} failed: {err}");
                    }
                }
                let mesh_size = info.host_map.len();
                snapshot::publish(&snapshot_slot, info).await;
                info!("snapshot published: {mesh_size} hosts");
                if first_scan {
                    touch_started_file(&config).await;
                    first_scan = false;
                }
            }
            Err(err) => error!("spider pass failed: {err}"),
        }
        scanning.store(false, Ordering::Relaxed);

        let jitter_secs = if config.scan_interval_jitter_secs > 0 {
            rand::thread_rng().gen_range(0..=config.scan_interval_jitter_secs) as u64
        } else {
            0
        };
        let pause = std::time::Duration::from_secs(config.scan_interval_secs + jitter_secs);
        info!("next scan in {}s", pause.as_secs());
        tokio::time::sleep(pause).await;
    }
}

/// Serve a JSON dump forever; the load path replaces live spidering
async fn run_loaded(
    config: Arc<SpiderConfig>,
    resolver: Arc<TokioAsyncResolver>,
    path: PathBuf,
    snapshot_slot: CurrentSnapshot,
) -> anyhow::Result<()> {
    let host_map = snapshot::serialize::load_json_from_file(&path)?;
    let mut info = snapshot::generate_from_loaded(host_map, &config.seed_host);
    snapshot::resolve_countries(&mut info, &resolver, &config.countries_zone).await;
    snapshot::publish(&snapshot_slot, info).await;
    touch_started_file(&config).await;
    info!("serving loaded snapshot from {path:?}, no spidering");
    std::future::pending::<()>().await;
    Ok(())
}

/// Rewrite the persist file whenever the persist signal arrives
#[cfg(unix)]
async fn run_persist_signal(
    path: PathBuf,
    snapshot_slot: CurrentSnapshot,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut stream = signal(SignalKind::user_defined1())?;
    while stream.recv().await.is_some() {
        match snapshot::current(&snapshot_slot).await {
            Some(info) => match snapshot::serialize::dump_json_to_file(&info.host_map, &path) {
                Ok(()) => info!("persisted current snapshot to {path:?}"),
                Err(err) => warn!("persist to {path:?} failed: {err}"),
            },
            None => warn!("persist requested but no snapshot collected yet"),
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn run_persist_signal(
    _path: PathBuf,
    _snapshot_slot: CurrentSnapshot,
) -> anyhow::Result<()> {
    // No signal mechanism here; the scan loop's json-dump still works
    std::future::pending::<()>().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SpiderConfig::load(path)?,
        None => SpiderConfig::default(),
    };
    let config = config
        .with_seed_host(args.seed_host)
        .with_listen(args.listen)
        .with_log_file(args.log_file)
        .with_log_stdout(args.log_stdout)
        .with_json_paths(args.json_dump, args.json_load, args.json_persist)
        .with_membership_file(args.membership_file)
        .with_started_file(args.started_file);
    config.validate()?;

    let _log_guard = setup_logging(&config, &args.log_level)?;
    info!("sks-spider v{} started", env!("CARGO_PKG_VERSION"));
    info!("  seed host: {}", config.seed_host);
    info!("  listen: {}", config.listen);
    info!(
        "  scan interval: {}s (+ up to {}s jitter)",
        config.scan_interval_secs, config.scan_interval_jitter_secs
    );

    let config = Arc::new(config);
    let resolver = spider::dns::build_resolver();
    let client = spider::build_client(&config)?;
    let snapshot_slot: CurrentSnapshot = Arc::new(RwLock::new(None));
    let diagnostics = Diagnostics::new();
    let scanning = Arc::new(AtomicBool::new(false));

    let api_state = Arc::new(ApiState {
        config: config.clone(),
        snapshot: snapshot_slot.clone(),
        diagnostics: diagnostics.clone(),
        scanning: scanning.clone(),
    });
    let api_handle = tokio::spawn(api::run_api_server(api_state));

    let worker_handle = match config.json_load.clone() {
        Some(path) => tokio::spawn(run_loaded(
            config.clone(),
            resolver.clone(),
            path,
            snapshot_slot.clone(),
        )),
        None => {
            // A snapshot persisted by an earlier incarnation bridges the
            // gap until the first scan of this one completes
            if let Some(path) = &config.json_persist {
                if path.exists() {
                    match snapshot::serialize::load_json_from_file(path) {
                        Ok(host_map) if snapshot::serialize::looks_complete(&host_map) => {
                            let info =
                                snapshot::generate_from_loaded(host_map, &config.seed_host);
                            snapshot::publish(&snapshot_slot, info).await;
                            info!("restored persisted snapshot from {path:?}");
                        }
                        Ok(_) => warn!("persisted snapshot {path:?} looks empty, ignoring"),
                        Err(err) => warn!("could not restore {path:?}: {err}"),
                    }
                }
            }
            tokio::spawn(run_scan_loop(
                config.clone(),
                resolver.clone(),
                client,
                snapshot_slot.clone(),
                diagnostics.clone(),
                scanning,
            ))
        }
    };

    let persist_handle = match config.json_persist.clone() {
        Some(path) => tokio::spawn(run_persist_signal(path, snapshot_slot.clone())),
        None => tokio::spawn(std::future::pending::<anyhow::Result<()>>()),
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = api_handle => {
            error!("HTTP frontend exited: {result:?}");
        }
        result = worker_handle => {
            if let Ok(Err(err)) = result {
                error!("worker exited: {err}");
            }
        }
        result = persist_handle => {
            error!("persist listener exited: {result:?}");
        }
    }

    info!("sks-spider shutting down");
    Ok(())
}
