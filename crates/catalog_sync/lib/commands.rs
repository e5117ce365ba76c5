use crate::{
    config::Config,
    logging::{format_error_report, init_logging},
    orchestrator::{
        LocalScheduler, PlaybackThrottle, ServiceRunner, SourceRunner, SyncMode, SyncOrchestrator,
        DEFAULT_MAX_CONCURRENT_CHAINS,
    },
    server::setup_server_with_addr,
    sources::chat::{parse_chat_filter, CHAT_PHASES},
    sources::{ChatHistorySource, HttpChatHistoryClient, XtreamClient, XtreamSource},
    state::AppState,
    sync_service::types::{RetryPolicy, RunStatus, SyncConfig, DEFAULT_SCAN_BATCH_SIZE},
    sync_service::writer::SqliteCatalogStore,
};
use catalog_core::ScanPhase;
use clap::{Args, ValueEnum};
use dotenv::dotenv;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceSelection {
    Xtream,
    Chat,
    All,
}

impl SourceSelection {
    fn includes(self, source_key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Xtream => source_key == crate::sources::XTREAM_SOURCE_KEY,
            Self::Chat => source_key == crate::sources::CHAT_SOURCE_KEY,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct SyncArgs {
    #[arg(long, value_enum, default_value_t = SourceSelection::All)]
    pub source: SourceSelection,
    #[arg(long, default_value = "full")]
    pub mode: SyncMode,
    #[arg(long, value_delimiter = ',')]
    /// Category allow-list entries, `PHASE=CATEGORY_ID`
    pub category: Vec<String>,
    #[arg(long = "batch-size", default_value_t = DEFAULT_SCAN_BATCH_SIZE)]
    pub batch_size: usize,
    #[arg(long = "max-items")]
    /// Per-fetch quota on raw records
    pub max_items: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct DaemonArgs {
    #[arg(long = "metrics-bind", default_value = "0.0.0.0:3000")]
    pub metrics_bind: String,
    #[arg(long = "interval-secs")]
    /// Overrides SYNC_INTERVAL_SECS
    pub interval_secs: Option<u64>,
    #[arg(long = "periodic-mode", default_value = "full")]
    pub periodic_mode: SyncMode,
    #[arg(long = "max-concurrent-chains", default_value_t = DEFAULT_MAX_CONCURRENT_CHAINS)]
    pub max_concurrent_chains: usize,
}

pub fn parse_category_filters(raw: &[String]) -> Result<BTreeMap<ScanPhase, Vec<String>>, String> {
    let mut filters: BTreeMap<ScanPhase, Vec<String>> = BTreeMap::new();
    for entry in raw {
        let (phase, category_id) = entry
            .split_once('=')
            .ok_or_else(|| format!("--category entry `{entry}` must look like PHASE=ID"))?;
        let phase: ScanPhase = phase.parse()?;
        let category_id = category_id.trim();
        if category_id.is_empty() {
            return Err(format!("--category entry `{entry}` has an empty id"));
        }
        let ids = filters.entry(phase).or_default();
        if !ids.iter().any(|id| id == category_id) {
            ids.push(category_id.to_string());
        }
    }
    Ok(filters)
}

pub fn validate_sync_args(args: &SyncArgs) -> Result<(), String> {
    if args.batch_size == 0 {
        return Err("--batch-size must be > 0".to_string());
    }
    if args.max_items == Some(0) {
        return Err("--max-items must be > 0".to_string());
    }
    let filters = parse_category_filters(&args.category)?;
    if matches!(args.source, SourceSelection::Chat | SourceSelection::All) {
        filters
            .iter()
            .filter(|(phase, _)| CHAT_PHASES.contains(*phase))
            .flat_map(|(_, ids)| ids.iter())
            .try_for_each(|id| parse_chat_filter(id).map(|_| ()))?;
    }
    Ok(())
}

pub fn validate_daemon_args(args: &DaemonArgs) -> Result<SocketAddr, String> {
    if args.interval_secs == Some(0) {
        return Err("--interval-secs must be > 0".to_string());
    }
    if args.max_concurrent_chains == 0 {
        return Err("--max-concurrent-chains must be > 0".to_string());
    }
    args.metrics_bind.parse::<SocketAddr>().map_err(|err| {
        format!(
            "invalid --metrics-bind address `{}`: {err}",
            args.metrics_bind
        )
    })
}

/// Run-wide settings shared by every chain step; phases and the floor are filled in per step.
pub fn base_sync_config(
    config: &Config,
    batch_size: usize,
    category_filters: BTreeMap<ScanPhase, Vec<String>>,
    max_items: Option<usize>,
) -> SyncConfig {
    SyncConfig {
        category_filters,
        batch_size,
        account_label: config.account_label.clone(),
        max_items,
        ..SyncConfig::default()
    }
}

/// One runner per configured source in `selection`.
pub fn build_source_runners(
    config: &Config,
    store: &SqliteCatalogStore,
    selection: SourceSelection,
) -> Result<Vec<Arc<dyn SourceRunner>>, String> {
    let device_class = config.device_class_provider();
    let mut runners: Vec<Arc<dyn SourceRunner>> = Vec::new();

    if let Some(xtream) = &config.xtream {
        if selection.includes(crate::sources::XTREAM_SOURCE_KEY) {
            let client = XtreamClient::new(
                xtream.credentials.clone(),
                xtream.requests_per_second,
                RetryPolicy::default(),
            )
            .map_err(|err| format!("failed to build xtream client: {err}"))?;
            runners.push(Arc::new(ServiceRunner::new(
                store.clone(),
                Arc::clone(&device_class),
                Arc::new(XtreamSource::new(client)),
            )));
        }
    }
    if let Some(chat) = &config.chat {
        if selection.includes(crate::sources::CHAT_SOURCE_KEY) {
            let client = HttpChatHistoryClient::new(chat.bridge_url.clone())
                .map_err(|err| format!("failed to build chat client: {err}"))?;
            runners.push(Arc::new(ServiceRunner::new(
                store.clone(),
                Arc::clone(&device_class),
                Arc::new(ChatHistorySource::new(
                    Arc::new(client),
                    chat.chat_ids.clone(),
                )),
            )));
        }
    }
    Ok(runners)
}

fn load_config(db_path: Option<String>) -> Result<Config, String> {
    let mut config = Config::from_env().map_err(|err| err.to_string())?;
    if let Some(db_path) = db_path {
        config.db_path = db_path;
    }
    Ok(config)
}

fn open_store(config: &Config) -> Result<SqliteCatalogStore, i32> {
    SqliteCatalogStore::open(&config.db_path).map_err(|err| {
        let error_report = format_error_report(&err);
        error!(
            event = "catalog_store_open_failed",
            db_path = %config.db_path,
            error = %err,
            error_report = %error_report,
            "failed to open catalog store"
        );
        eprintln!("failed to open catalog store at {}: {err}", config.db_path);
        1
    })
}

fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Succeeded | RunStatus::PartialSuccess => 0,
        RunStatus::Failed(_) => 1,
    }
}

/// Runs one chain per selected source in the foreground and exits.
pub async fn run_sync_once(args: SyncArgs, db_path: Option<String>, log_level: &str) -> i32 {
    dotenv().ok();

    let logging_context = init_logging("catalog_sync", "sync", log_level);
    let run_span = logging_context.run_span();
    let _run_guard = run_span.enter();
    info!(
        event = "sync_command_starting",
        source = ?args.source,
        mode = %args.mode,
        "starting one-shot sync"
    );

    if let Err(err) = validate_sync_args(&args) {
        eprintln!("{err}");
        return 2;
    }
    let config = match load_config(db_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };
    let store = match open_store(&config) {
        Ok(store) => store,
        Err(code) => return code,
    };
    let runners = match build_source_runners(&config, &store, args.source) {
        Ok(runners) if runners.is_empty() => {
            eprintln!("no configured source matches --source {:?}", args.source);
            return 2;
        }
        Ok(runners) => runners,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };

    let category_filters = match parse_category_filters(&args.category) {
        Ok(filters) => filters,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };
    let cancel = CancellationToken::new();
    // The scheduler is never used by run_now; it only satisfies the orchestrator.
    let scheduler = LocalScheduler::new(1, cancel.child_token());
    let mut orchestrator = SyncOrchestrator::new(
        Arc::new(scheduler),
        Arc::new(store.clone()),
        PlaybackThrottle::disabled(),
        base_sync_config(&config, args.batch_size, category_filters, args.max_items),
    );
    for runner in runners {
        orchestrator = orchestrator.with_source(runner);
    }

    let signal_cancel = cancel.clone();
    let signal_handle = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_cancel.cancel();
    });

    let mut exit = 0;
    for source_key in orchestrator.source_keys() {
        match orchestrator
            .run_now(&source_key, args.mode, cancel.clone())
            .await
        {
            Ok(report) => {
                info!(
                    event = "sync_command_source_finished",
                    source = %source_key,
                    status = report.status.as_db_str(),
                    items_written = report.items_written,
                    "source sync finished"
                );
                println!(
                    "{source_key}: {} ({} items written)",
                    report.status.as_db_str(),
                    report.items_written
                );
                exit = exit.max(exit_code(report.status));
            }
            Err(err) => {
                let error_report = format_error_report(&err);
                error!(
                    event = "sync_command_source_failed",
                    source = %source_key,
                    error = %err,
                    error_report = %error_report,
                    "source sync failed"
                );
                eprintln!("{source_key}: sync failed: {err}");
                exit = 1;
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    signal_handle.abort();
    info!(event = "sync_command_complete", exit_code = exit, "one-shot sync finished");
    exit
}

/// Schedules periodic chains and serves the HTTP surface until SIGINT/SIGTERM.
pub async fn run_daemon(args: DaemonArgs, db_path: Option<String>, log_level: &str) -> i32 {
    dotenv().ok();

    let logging_context = init_logging("catalog_sync", "daemon", log_level);
    let run_span = logging_context.run_span();
    let _run_guard = run_span.enter();

    let bind = match validate_daemon_args(&args) {
        Ok(bind) => bind,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };
    let config = match load_config(db_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };
    if !config.has_sources() {
        eprintln!("no catalog source configured; set XTREAM_* or CHAT_BRIDGE_URL/CHAT_IDS");
        return 2;
    }
    let store = match open_store(&config) {
        Ok(store) => store,
        Err(code) => return code,
    };
    let runners = match build_source_runners(&config, &store, SourceSelection::All) {
        Ok(runners) => runners,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };

    let shutdown = CancellationToken::new();
    let scheduler = LocalScheduler::new(args.max_concurrent_chains, shutdown.child_token());
    let (playback, activity) = watch::channel(false);
    let mut orchestrator = SyncOrchestrator::new(
        Arc::new(scheduler.clone()),
        Arc::new(store.clone()),
        PlaybackThrottle::new(activity, config.playback_throttle),
        base_sync_config(&config, DEFAULT_SCAN_BATCH_SIZE, BTreeMap::new(), None),
    );
    for runner in runners {
        orchestrator = orchestrator.with_source(runner);
    }
    let orchestrator = Arc::new(orchestrator);

    let state = Arc::new(AppState::new(
        Arc::clone(&orchestrator),
        playback,
        shutdown.clone(),
    ));
    let server_handle = match setup_server_with_addr(state, bind).await {
        Ok(handle) => handle,
        Err(err) => {
            let error_report = format_error_report(&err);
            error!(
                event = "http_server_start_failed",
                bind = %bind,
                error = %err,
                error_report = %error_report,
                "failed to start http server"
            );
            eprintln!("failed to start http server on {bind}: {err}");
            return 1;
        }
    };

    let interval = args
        .interval_secs
        .map(Duration::from_secs)
        .unwrap_or(config.sync_interval);
    if let Err(err) = orchestrator
        .schedule_periodic(args.periodic_mode, interval)
        .await
    {
        error!(
            event = "periodic_schedule_failed",
            error = %err,
            "failed to schedule periodic sync"
        );
        shutdown.cancel();
        let _ = server_handle.await;
        return 1;
    }
    info!(
        event = "daemon_started",
        sources = ?orchestrator.source_keys(),
        periodic_mode = %args.periodic_mode,
        interval_secs = interval.as_secs(),
        bind = %bind,
        "daemon started"
    );

    wait_for_shutdown_signal().await;
    shutdown.cancel();
    scheduler.shutdown().await;
    if let Err(err) = server_handle.await {
        warn!(event = "http_server_join_failed", error = %err, "http server task ended abnormally");
    }
    info!(event = "daemon_stopped", "daemon stopped");
    0
}

/// Resolves on SIGTERM or SIGINT; falls back to Ctrl-C when the handlers cannot be installed.
pub async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!(event = "shutdown_signal", signal = "SIGTERM", "shutting down")
                }
                _ = sigint.recv() => {
                    info!(event = "shutdown_signal", signal = "SIGINT", "shutting down")
                }
            }
        }
        (Err(err), _) | (_, Err(err)) => {
            warn!(
                event = "signal_handler_install_failed",
                error = %err,
                "could not install unix signal handlers; waiting for ctrl-c"
            );
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(event = "ctrl_c_wait_failed", error = %err, "ctrl-c handler failed");
                std::future::pending::<()>().await;
            }
        }
    }
}
