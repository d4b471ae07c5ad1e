//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    core::{AlertStore, Collector, FallbackLookup, GeoLookup, RegistryLookup},
    enrichment::{FallbackPool, HttpFallbackLookup, NetboxRegistry, OwnershipResolver},
    formatting::{resolve_hostname, SyslogFramer},
    geo::{GeoResolver, HttpGeoLookup},
    internal_metrics::{Metrics, MetricsBuilder},
    normalizer::AlertNormalizer,
    outputs::{run_delivery_monitor, JsonLinesStore, Publisher, UdpSyslogCollector},
    server::{router, RelayState},
    task_manager::TaskManager,
};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

/// A handle to the running application, containing all its task handles.
pub struct App {
    task_manager: TaskManager,
    relay_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the webhook listener is bound to.
    pub fn relay_addr(&self) -> SocketAddr {
        self.relay_addr
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Waits for the shutdown signal and then gracefully shuts down all tasks.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        if !*shutdown_rx.borrow() {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        self.task_manager.shutdown().await;

        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Every external dependency of the relay can be swapped out, which is how
/// the integration tests run it without a registry, geocoder or collectors.
pub struct AppBuilder {
    config: Config,
    registry_override: Option<Arc<dyn RegistryLookup>>,
    fallback_override: Option<Arc<dyn FallbackLookup>>,
    geo_override: Option<Arc<dyn GeoLookup>>,
    store_override: Option<Arc<dyn AlertStore>>,
    collectors_override: Option<Vec<Arc<dyn Collector>>>,
    metrics_override: Option<Metrics>,
}

impl AppBuilder {
    /// Creates a new `AppBuilder` with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry_override: None,
            fallback_override: None,
            geo_override: None,
            store_override: None,
            collectors_override: None,
            metrics_override: None,
        }
    }

    /// Overrides the prefix registry client.
    pub fn registry_override(mut self, registry: Arc<dyn RegistryLookup>) -> Self {
        self.registry_override = Some(registry);
        self
    }

    /// Overrides the client used to query fallback endpoints. The endpoint
    /// list still comes from configuration.
    pub fn fallback_override(mut self, fallback: Arc<dyn FallbackLookup>) -> Self {
        self.fallback_override = Some(fallback);
        self
    }

    /// Overrides the geocoding client.
    pub fn geo_override(mut self, geo: Arc<dyn GeoLookup>) -> Self {
        self.geo_override = Some(geo);
        self
    }

    /// Overrides the alert store.
    pub fn store_override(mut self, store: Arc<dyn AlertStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    /// Overrides the syslog collectors.
    pub fn collectors_override(mut self, collectors: Vec<Arc<dyn Collector>>) -> Self {
        self.collectors_override = Some(collectors);
        self
    }

    /// Overrides the metrics system.
    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    /// Builds and initializes all application components, binds the webhook
    /// listener and returns a runnable `App`.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        config.validate()?;
        let task_manager = TaskManager::new(shutdown_rx);

        // =========================================================================
        // 1. Initialize Metrics
        // =========================================================================
        let (metrics, metrics_server_info) = match self.metrics_override {
            Some(m) => (m, None),
            None => MetricsBuilder::new(config.metrics.clone()).build(task_manager.get_shutdown_rx()),
        };
        let metrics = Arc::new(metrics);

        let metrics_addr = if let Some((server, addr)) = metrics_server_info {
            task_manager.spawn("MetricsServer", server.run());
            Some(addr)
        } else {
            None
        };

        // =========================================================================
        // 2. Enrichment
        // =========================================================================
        let registry: Arc<dyn RegistryLookup> = match self.registry_override {
            Some(registry) => registry,
            None => {
                debug!(url = %config.registry.url, "Initializing NetBox registry client");
                Arc::new(NetboxRegistry::from_config(&config.registry)?)
            }
        };

        let fallback_client: Arc<dyn FallbackLookup> = match self.fallback_override {
            Some(client) => client,
            None => Arc::new(HttpFallbackLookup::new(
                config.fallback.timeout_ms.map(Duration::from_millis),
            )?),
        };
        debug!(endpoints = ?config.fallback.endpoints, "Initializing fallback pool");
        let fallback = Arc::new(FallbackPool::new(
            config.fallback.endpoints.clone(),
            fallback_client,
            metrics.clone(),
        )?);
        let ownership = Arc::new(OwnershipResolver::new(registry, fallback, metrics.clone()));

        let geo_lookup: Arc<dyn GeoLookup> = match self.geo_override {
            Some(geo) => geo,
            None => Arc::new(HttpGeoLookup::new(
                &config.geo.endpoint,
                config.geo.timeout_ms.map(Duration::from_millis),
            )?),
        };
        let geo = Arc::new(GeoResolver::new(geo_lookup, &config.geo, metrics.clone()));

        let normalizer = AlertNormalizer::new(ownership, geo, metrics.clone());

        // =========================================================================
        // 3. Outputs
        // =========================================================================
        let store: Arc<dyn AlertStore> = match self.store_override {
            Some(store) => store,
            None => {
                debug!(path = %config.store.path.display(), "Initializing JSON-lines store");
                Arc::new(JsonLinesStore::new(config.store.path.clone()))
            }
        };

        let collectors = match self.collectors_override {
            Some(collectors) => collectors,
            None => {
                let framer = SyslogFramer::new(
                    config.syslog.format,
                    config.syslog.facility,
                    config.syslog.severity,
                    resolve_hostname(config.syslog.hostname.as_deref()),
                    config.syslog.app_name.clone(),
                );
                debug!(
                    format = %config.syslog.format,
                    priority = framer.priority(),
                    "Initializing syslog collectors"
                );
                config
                    .syslog
                    .collectors
                    .iter()
                    .map(|c| {
                        Arc::new(UdpSyslogCollector::new(c.address.clone(), framer.clone()))
                            as Arc<dyn Collector>
                    })
                    .collect()
            }
        };

        let (publisher, reports_rx) = Publisher::new(store, collectors, metrics.clone());
        task_manager.spawn(
            "DeliveryMonitor",
            run_delivery_monitor(reports_rx, metrics.clone(), task_manager.get_shutdown_rx()),
        );

        // =========================================================================
        // 4. Webhook Server
        // =========================================================================
        let state = Arc::new(RelayState {
            normalizer,
            publisher,
            metrics,
        });
        let app = router(state, &config.server.webhook_path);

        let listener = TcpListener::bind(config.server.listen_address).await?;
        let relay_addr = listener.local_addr()?;
        info!("Relay listening on {}{}", relay_addr, config.server.webhook_path);

        let mut server_shutdown_rx = task_manager.get_shutdown_rx();
        task_manager.spawn("WebhookServer", async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown_rx.changed().await;
                    info!("Webhook server received shutdown signal.");
                })
                .await;
            if let Err(e) = result {
                error!("Webhook server failed: {}", e);
            }
        });

        info!("Relay initialized successfully. Waiting for alerts...");

        Ok(App {
            task_manager,
            relay_addr,
            metrics_addr,
        })
    }
}
