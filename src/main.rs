//! ips-relay - alert enrichment relay
//!
//! Receives intrusion-detection alerts, enriches them with ownership and
//! geolocation data and forwards them to a JSON log file and syslog
//! collectors. The `lookup-server` subcommand runs the fallback IP lookup
//! service instead, and `backfill` resolves the addresses it could not
//! answer through whois.

use anyhow::Result;
use clap::Parser;
use ips_relay::{
    app::App,
    backfill::{Backfill, CymruWhois, ProcessedLedger},
    cli::{Cli, Command},
    config::Config,
    enrichment::NetboxRegistry,
    lookup_server::{LookupServer, MissingIps},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            let _ = tracing_subscriber::fmt().try_init();
            error!("Failed to load configuration: {}", err);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received. Shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    });

    match cli.command {
        Some(Command::LookupServer { .. }) => run_lookup_server(config, shutdown_rx).await,
        Some(Command::Backfill { .. }) => run_backfill(config).await,
        Some(Command::Serve) | None => run_relay(config, shutdown_rx).await,
    }
}

async fn run_relay(config: Config, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    info!("ips-relay starting up...");

    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Listen Address: {}", config.server.listen_address);
    info!("Webhook Path: {}", config.server.webhook_path);
    info!("Registry URL: {}", config.registry.url);
    info!("Fallback Endpoints: {}", config.fallback.endpoints.join(", "));
    info!("Geo Endpoint: {}", config.geo.endpoint);
    info!("Alert File: {}", config.store.path.display());
    info!("Syslog Format: {}", config.syslog.format);
    let collectors: Vec<&str> = config
        .syslog
        .collectors
        .iter()
        .map(|c| c.address.as_str())
        .collect();
    info!("Syslog Collectors: {}", collectors.join(", "));
    info!(
        "Metrics: {}",
        if config.metrics.enabled {
            config.metrics.listen_address.to_string()
        } else {
            "Disabled".to_string()
        }
    );
    info!("-------------------------------------------------------");

    let app = App::builder(config).build(shutdown_rx).await?;
    app.run().await?;

    info!("ips-relay exited.");
    Ok(())
}

async fn run_lookup_server(config: Config, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let lookup = &config.lookup_server;
    info!("Lookup server starting up...");
    info!("Data File: {}", lookup.data_path.display());
    info!("Missing IP File: {}", lookup.missing_ips_path.display());

    let mut server = LookupServer::bind(lookup).await?;
    if lookup.register_prefixes {
        info!("Registering Prefixes In: {}", config.registry.url);
        server = server.with_registry(Arc::new(NetboxRegistry::from_config(&config.registry)?));
    }
    server.run(shutdown_rx).await?;

    info!("Lookup server exited.");
    Ok(())
}

async fn run_backfill(config: Config) -> Result<()> {
    let backfill = &config.backfill;
    info!("Backfill starting up...");
    info!("Missing IP File: {}", config.lookup_server.missing_ips_path.display());
    info!("Ledger File: {}", backfill.processed_ips_path.display());
    info!("Whois Server: {}", backfill.whois_server);
    info!("Registry URL: {}", config.registry.url);

    let missing = MissingIps::load(&config.lookup_server.missing_ips_path)
        .await
        .snapshot()
        .await;
    let mut ledger = ProcessedLedger::load(&backfill.processed_ips_path).await;
    let whois = CymruWhois::new(
        backfill.whois_server.clone(),
        backfill.timeout_ms.map(Duration::from_millis),
    );
    let registry = NetboxRegistry::from_config(&config.registry)?;

    Backfill::new(Arc::new(whois), Arc::new(registry))
        .run(&missing, &mut ledger)
        .await?;

    info!("Backfill exited.");
    Ok(())
}
