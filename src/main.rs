//! Watchdog daemon: polls every configured transit server, reconciles its
//! static, realtime and REST views, and exposes the results for scraping.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use transit_watchdog::backoff::BackoffStore;
use transit_watchdog::checks::{CheckContext, Pipeline};
use transit_watchdog::config::{
    FileTargetSource, HttpTimeouts, TargetList, TargetSource, UrlTargetSource, WatchdogConfig,
    refresh_targets,
};
use transit_watchdog::exposition::CachedExposition;
use transit_watchdog::fetch::{BasicClient, HttpClient, Instrumented};
use transit_watchdog::gtfs::BundleRefresher;
use transit_watchdog::http::{AppState, serve};
use transit_watchdog::metrics::Metrics;
use transit_watchdog::report::{ErrorReporter, TracingReporter};
use transit_watchdog::scheduler::Orchestrator;
use transit_watchdog::store::{BoundingBoxStore, RealtimeStore, StaticStore};
use transit_watchdog::tasks::run_periodic;
use transit_watchdog::telemetry::{TelemetryStore, run_eviction};

#[derive(Parser)]
#[command(name = "transit_watchdog", version)]
#[command(about = "Monitors transit servers and their GTFS / GTFS-RT feeds", long_about = None)]
#[command(group(ArgGroup::new("config").required(true).args(["config_file", "config_url"])))]
struct Cli {
    /// Port for the metrics and health endpoints
    #[arg(long, env = "PORT", default_value_t = 4000)]
    port: u16,

    /// Deployment environment reported by the health check
    #[arg(long = "env", env = "ENVIRONMENT", default_value = "development")]
    environment: String,

    /// JSON file with the server list
    #[arg(long, env = "CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// URL serving the server list as JSON; reloaded periodically
    #[arg(long, env = "CONFIG_URL")]
    config_url: Option<String>,

    /// Basic auth user for --config-url
    #[arg(long, env = "CONFIG_AUTH_USER", default_value = "")]
    config_auth_user: String,

    /// Basic auth password for --config-url
    #[arg(long, env = "CONFIG_AUTH_PASS", default_value = "", hide_env_values = true)]
    config_auth_pass: String,

    #[arg(long, default_value_t = 30)]
    collect_interval_secs: u64,

    #[arg(long, default_value_t = 86_400)]
    bundle_refresh_secs: u64,

    #[arg(long, default_value_t = 60)]
    config_refresh_secs: u64,

    #[arg(long, default_value_t = 900)]
    eviction_interval_secs: u64,

    /// Vehicles silent for longer than this are forgotten
    #[arg(long, default_value_t = 3600)]
    eviction_threshold_secs: u64,

    #[arg(long, default_value_t = 10)]
    scrape_cache_ttl_secs: u64,

    /// Transport retries per request (0 = retry until shutdown)
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Servers collected at once (0 = all)
    #[arg(long, default_value_t = 0)]
    max_concurrency: usize,
}

impl Cli {
    fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            collect_interval: Duration::from_secs(self.collect_interval_secs),
            bundle_refresh_interval: Duration::from_secs(self.bundle_refresh_secs),
            config_refresh_interval: Duration::from_secs(self.config_refresh_secs),
            eviction_interval: Duration::from_secs(self.eviction_interval_secs),
            eviction_threshold: Duration::from_secs(self.eviction_threshold_secs),
            scrape_cache_ttl: Duration::from_secs(self.scrape_cache_ttl_secs),
            max_retries: self.max_retries,
            max_concurrency: self.max_concurrency,
            http: HttpTimeouts::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_logging()?;
    let cli = Cli::parse();
    let config = cli.watchdog_config();
    let cancel = CancellationToken::new();

    let metrics = Arc::new(Metrics::new()?);
    let client: Arc<dyn HttpClient> = Arc::new(Instrumented::new(
        BasicClient::new(&config.http)?,
        metrics.http_request_duration_seconds.clone(),
    ));
    let reporter: Arc<dyn ErrorReporter> = Arc::new(TracingReporter);

    let remote_config = cli.config_url.is_some();
    let source: Arc<dyn TargetSource> = match (&cli.config_file, &cli.config_url) {
        (_, Some(url)) if !cli.config_auth_user.is_empty() && !cli.config_auth_pass.is_empty() => {
            Arc::new(UrlTargetSource::with_basic_auth(
                Arc::clone(&client),
                url.clone(),
                &cli.config_auth_user,
                &cli.config_auth_pass,
                cancel.clone(),
                config.max_retries,
            )?)
        }
        (_, Some(url)) => Arc::new(UrlTargetSource::new(
            Arc::clone(&client),
            url.clone(),
            cancel.clone(),
            config.max_retries,
        )),
        (Some(path), None) => Arc::new(FileTargetSource::new(path)),
        (None, None) => anyhow::bail!("either --config-file or --config-url is required"),
    };

    let initial = source
        .load()
        .await
        .with_context(|| format!("failed to load server list from {}", source.describe()))?;
    if initial.is_empty() {
        warn!("Server list is empty; health check will report not ready");
    }
    info!(servers = initial.len(), source = %source.describe(), "Loaded server list");
    let targets = Arc::new(TargetList::new(initial));

    let static_store = Arc::new(StaticStore::new());
    let bbox_store = Arc::new(BoundingBoxStore::new());
    let telemetry = Arc::new(TelemetryStore::new());

    let refresher = Arc::new(BundleRefresher::new(
        Arc::clone(&client),
        Arc::clone(&static_store),
        Arc::clone(&bbox_store),
        Arc::clone(&reporter),
        cancel.clone(),
        config.max_retries,
    ));
    info!("Downloading GTFS bundles");
    refresher.refresh_all(&targets.snapshot()).await;

    let ctx = Arc::new(CheckContext {
        client: Arc::clone(&client),
        metrics: Arc::clone(&metrics),
        static_store,
        realtime_store: Arc::new(RealtimeStore::new()),
        bbox_store,
        telemetry: Arc::clone(&telemetry),
        cancel: cancel.clone(),
        max_retries: config.max_retries,
    });
    let orchestrator = Arc::new(Orchestrator::new(
        ctx,
        Pipeline::standard(),
        Arc::clone(&targets),
        Arc::new(BackoffStore::new()),
        Arc::clone(&reporter),
        config.max_concurrency,
    ));
    let exposition = Arc::new(CachedExposition::new(
        Arc::clone(&metrics),
        config.scrape_cache_ttl,
    ));

    let mut tasks: Vec<JoinHandle<()>> = vec![
        tokio::spawn(Arc::clone(&refresher).run(Arc::clone(&targets), config.bundle_refresh_interval)),
        tokio::spawn(run_eviction(
            Arc::clone(&telemetry),
            Arc::clone(&metrics),
            config.eviction_interval,
            config.eviction_threshold,
            cancel.clone(),
        )),
        tokio::spawn(Arc::clone(&exposition).run(cancel.clone())),
        tokio::spawn(Arc::clone(&orchestrator).run(config.collect_interval)),
    ];

    if remote_config {
        tasks.push(tokio::spawn(refresh_targets(
            Arc::clone(&source),
            Arc::clone(&targets),
            Arc::clone(&reporter),
            config.config_refresh_interval,
            cancel.clone(),
        )));

        // Servers added by a reload get their bundle on the next pass.
        let refresher = Arc::clone(&refresher);
        let targets = Arc::clone(&targets);
        tasks.push(tokio::spawn(run_periodic(
            "bundle_backfill",
            config.config_refresh_interval,
            cancel.clone(),
            move || {
                let refresher = Arc::clone(&refresher);
                let targets = targets.snapshot();
                async move { refresher.refresh_missing(&targets).await }
            },
        )));
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });

    let listener = TcpListener::bind(("0.0.0.0", cli.port))
        .await
        .with_context(|| format!("failed to bind port {}", cli.port))?;
    let state = AppState {
        exposition,
        targets,
        environment: cli.environment.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Err(e) = serve(listener, state, cancel.clone()).await {
        error!(error = %e, "HTTP server failed");
        cancel.cancel();
    }

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task failed");
        }
    }
    info!("Watchdog stopped");
    Ok(())
}

/// Coloured stderr plus a JSON daily-rolling log file. The returned guard
/// flushes the file writer on drop.
fn init_logging() -> Result<WorkerGuard> {
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_watchdog.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_watchdog.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Ok(file_guard)
}
