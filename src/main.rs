use anyhow::{Context, Result};
use clap::Parser;
use replica_pool::config::Config;
use replica_pool::{
    DnsDirectory, PoolManager, ServiceDirectory, StaticDirectory, TcpCapability, TcpTransport,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "replica-pool")]
#[command(about = "Keeps warm connection pools to the replicas of backend services", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Seconds between pool statistics log lines
    #[arg(long, default_value_t = 30)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(config_path) = args.generate_config {
        println!("Generating example configuration file: {:?}", config_path);
        Config::create_example(&config_path)
            .with_context(|| format!("writing {}", config_path.display()))?;
        println!("Example configuration file created successfully!");
        println!(
            "Edit the file and run: replica-pool --config {:?}",
            config_path
        );
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, &config.logging.format)?;

    info!("replica-pool v{} starting", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("No configuration file specified, using defaults"),
    }

    let directory: Arc<dyn ServiceDirectory> = match config.discovery.backend.as_str() {
        "dns" => {
            info!(cluster_domain = %config.discovery.cluster_domain, "Using DNS service directory");
            Arc::new(DnsDirectory::new(config.discovery.cluster_domain.clone()))
        }
        _ => {
            info!(
                services = config.discovery.services.len(),
                "Using static service directory"
            );
            Arc::new(StaticDirectory::from_config(&config.discovery))
        }
    };

    let manager = PoolManager::<TcpCapability, TcpTransport>::new(
        directory,
        TcpTransport::new(config.transport.default_port),
        config.pool_settings(),
    );
    manager.start();

    let capability = Arc::new(TcpCapability);
    for service in &config.watch {
        match manager
            .connect(&service.name, &service.namespace, capability.clone())
            .await
        {
            Ok(handle) => info!(
                service = %service.name,
                namespace = %service.namespace,
                peer = %handle.peer_addr(),
                "Service pool warmed"
            ),
            Err(e) => warn!(
                service = %service.name,
                namespace = %service.namespace,
                error = %e,
                "Initial populate failed; background reconciliation will retry"
            ),
        }
    }

    let mut ticker = interval(Duration::from_secs(args.stats_interval.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = manager.stats().await;
                match serde_json::to_string(&stats) {
                    Ok(json) => info!(pools = stats.len(), stats = %json, "Pool statistics"),
                    Err(e) => warn!(error = %e, "Failed to serialize pool statistics"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl+C")?;
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(level).context("invalid log level")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    Ok(())
}
