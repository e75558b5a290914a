//! caption-rota - Entry Point
//!
//! Loads the proxy pool and runs one of the probe, fetch, status or run
//! commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use caption_rota::captions::{extract_video_id, CaptionFetcher, TimedTextSource, TranscriptCheck};
use caption_rota::config::{Config, LogConfig};
use caption_rota::proxy::{provider, ConnectCheck, HealthProber, ProbeCheck, ProxyPool, ProxyProvider};
use caption_rota::services::{
    BlacklistSweepHandle, BlacklistSweepService, ProxyRefreshHandle, ProxyRefreshService,
    StatusReportHandle, StatusReportService,
};

/// YouTube caption fetcher backed by a self-healing proxy pool
#[derive(Parser)]
#[command(name = "caption-rota")]
#[command(about = "YouTube caption fetcher backed by a self-healing proxy pool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe a random sample of the pool and print a health report
    Probe {
        /// Number of proxies to probe
        #[arg(short, long)]
        sample: Option<usize>,
        /// Number of concurrent probe workers
        #[arg(short, long)]
        workers: Option<usize>,
        /// Kind of probe request
        #[arg(short, long, value_enum, default_value_t = CheckKind::Connect)]
        check: CheckKind,
        /// Save the full report as JSON
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// Fetch the transcript of a video and print it as JSON
    Fetch {
        /// Video URL or 11-character id
        video: String,
        /// Caption language code
        #[arg(short, long, default_value = "en")]
        lang: String,
    },
    /// Load the pool and print its status snapshot
    Status,
    /// Keep the pool refreshed and swept until interrupted, logging its status
    Run,
}

#[derive(Clone, Copy, ValueEnum)]
enum CheckKind {
    /// HTTP CONNECT tunnel to the probe target
    Connect,
    /// Caption fetch for a known test video
    Transcript,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config.log);
    info!("Configuration loaded");

    match cli.command {
        Commands::Probe {
            sample,
            workers,
            check,
            report,
        } => run_probe(&config, sample, workers, check, report).await,
        Commands::Fetch { video, lang } => run_fetch(&config, &video, &lang).await,
        Commands::Status => {
            let (pool, _) = load_pool(&config).await?;
            println!("{}", serde_json::to_string_pretty(&pool.status())?);
            Ok(())
        }
        Commands::Run => run_services(&config).await,
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("caption_rota={}", log.level).into());

    if log.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Build the provider named by the configuration and load its list
async fn load_pool(config: &Config) -> anyhow::Result<(Arc<ProxyPool>, Arc<dyn ProxyProvider>)> {
    let provider: Arc<dyn ProxyProvider> = Arc::from(provider::from_config(&config.provider)?);
    let endpoints = provider.fetch().await?;

    let pool = Arc::new(ProxyPool::with_endpoints(config.pool.clone(), endpoints)?);
    if pool.is_empty() {
        warn!("No proxies available from {} provider", provider.name());
    } else {
        info!("Loaded {} proxies from {} provider", pool.len(), provider.name());
    }

    Ok((pool, provider))
}

async fn run_probe(
    config: &Config,
    sample: Option<usize>,
    workers: Option<usize>,
    check: CheckKind,
    report_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (pool, _) = load_pool(config).await?;

    let check: Box<dyn ProbeCheck> = match check {
        CheckKind::Connect => Box::new(ConnectCheck::from_config(&config.probe_target)),
        CheckKind::Transcript => Box::new(TranscriptCheck::new(Arc::new(TimedTextSource::new(
            config.pool.probe_timeout,
        )?))),
    };

    let report = HealthProber::new(pool)
        .probe(
            sample.unwrap_or(config.pool.sample_size),
            workers.unwrap_or(config.pool.worker_count),
            check.as_ref(),
            None,
        )
        .await?;

    println!("Proxies tested:  {}", report.tested);
    println!("Successful:      {}", report.succeeded);
    println!("Failed:          {}", report.failed);
    println!("Success rate:    {:.1}%", report.success_rate);
    if let (Some(avg), Some(min), Some(max)) = (
        report.avg_latency_millis,
        report.min_latency_millis,
        report.max_latency_millis,
    ) {
        println!("Latency (ms):    avg {} / min {} / max {}", avg, min, max);
    }
    for (kind, count) in &report.errors {
        println!("  {:<24} {}", kind.as_str(), count);
    }
    if !report.failed_proxies.is_empty() {
        println!("Failed proxies:  {}", report.failed_proxies.join(", "));
    }
    println!("Verdict:         {:?}", report.verdict);

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!("Report saved to {}", path.display());
    }

    Ok(())
}

async fn run_fetch(config: &Config, video: &str, language: &str) -> anyhow::Result<()> {
    let video_id = extract_video_id(video).ok_or_else(|| anyhow!("Invalid YouTube URL: {}", video))?;
    let source = Arc::new(TimedTextSource::new(config.pool.request_timeout)?);

    let fetcher = if config.provider.use_proxy {
        let (pool, _) = load_pool(config).await?;
        CaptionFetcher::proxied(source, pool)
    } else {
        CaptionFetcher::direct(source)
    };

    let transcript = fetcher.fetch(&video_id, language).await?;
    println!("{}", serde_json::to_string_pretty(&transcript)?);
    Ok(())
}

/// Long-running pool maintenance.
///
/// Keeps one shared pool refreshed, swept and reported on. A request layer
/// serving captions would share this `Arc<ProxyPool>` through a
/// `CaptionFetcher::proxied`.
async fn run_services(config: &Config) -> anyhow::Result<()> {
    let (pool, provider) = load_pool(config).await?;

    // Start proxy refresh service
    let (refresh_handle, refresh_shutdown) = ProxyRefreshHandle::new();
    let refresh_service =
        ProxyRefreshService::new(pool.clone(), provider, config.provider.refresh_interval);
    let refresh_task = tokio::spawn(async move {
        refresh_service.run(refresh_shutdown).await;
    });

    // Start blacklist sweep service
    let (sweep_handle, sweep_shutdown) = BlacklistSweepHandle::new();
    let sweep_service = BlacklistSweepService::new(pool.clone());
    let sweep_task = tokio::spawn(async move {
        sweep_service.run(sweep_shutdown).await;
    });

    // Start status report service
    let (status_handle, status_shutdown) = StatusReportHandle::new();
    let status_service = StatusReportService::new(pool.clone(), config.log.status_interval);
    let status_task = tokio::spawn(async move {
        status_service.run(status_shutdown).await;
    });

    info!("Services started with {} proxies", pool.len());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    refresh_handle.shutdown();
    sweep_handle.shutdown();
    status_handle.shutdown();
    let _ = tokio::join!(refresh_task, sweep_task, status_task);

    let status = pool.status();
    info!(
        "caption-rota stopped ({} uses, {} failures across {} proxies)",
        status.total_uses, status.total_failures, status.total
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
