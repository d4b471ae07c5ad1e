#![allow(dead_code)]
//! Test helpers for running the full relay in-process.

use super::fakes::{FakeFallback, FakeGeo, FakeRegistry, RecordingCollector};
use anyhow::Result;
use ips_relay::{
    app::AppBuilder,
    config::Config,
    core::{AlertStore, Collector, FallbackLookup, GeoLookup, RegistryLookup},
    internal_metrics::Metrics,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// A running relay bound to an ephemeral port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub store_path: PathBuf,
    pub metrics_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    app_handle: JoinHandle<Result<()>>,
    client: reqwest::Client,
    // Keeps the store directory alive for the lifetime of the app.
    _dir: TempDir,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Posts `alert` the way the upstream sensor does: as the first key of a
    /// form-urlencoded body.
    pub async fn post_alert(&self, alert: &str) -> reqwest::Response {
        self.client
            .post(self.url("/webhook"))
            .form(&[(alert, "")])
            .send()
            .await
            .expect("webhook request should complete")
    }

    /// The lines currently in the alert file.
    pub async fn stored_lines(&self) -> Vec<String> {
        match tokio::fs::read_to_string(&self.store_path).await {
            Ok(contents) => contents.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Shuts down the relay and waits for it to terminate.
    pub async fn shutdown(self, timeout_duration: Duration) -> Result<()> {
        self.shutdown_tx.send(true)?;
        match timeout(timeout_duration, self.app_handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(anyhow::anyhow!("App failed to shut down within the timeout")),
        }
    }
}

/// A builder for creating `TestApp` instances with specific fakes.
pub struct TestAppBuilder {
    pub config: Config,
    registry: Arc<dyn RegistryLookup>,
    fallback: Arc<dyn FallbackLookup>,
    geo: Arc<dyn GeoLookup>,
    store: Option<Arc<dyn AlertStore>>,
    collectors: Vec<Arc<dyn Collector>>,
    metrics: Option<Metrics>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.server.listen_address = SocketAddr::from(([127, 0, 0, 1], 0));
        config.fallback.endpoints = vec![
            "http://fallback-a".to_string(),
            "http://fallback-b".to_string(),
            "http://fallback-c".to_string(),
        ];

        Self {
            config,
            registry: Arc::new(FakeRegistry::new()),
            fallback: Arc::new(FakeFallback::new()),
            geo: Arc::new(FakeGeo::new()),
            store: None,
            collectors: vec![Arc::new(RecordingCollector::new("collector-a"))],
            metrics: Some(Metrics::disabled()),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn RegistryLookup>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackLookup>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_geo(mut self, geo: Arc<dyn GeoLookup>) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn AlertStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_collectors(mut self, collectors: Vec<Arc<dyn Collector>>) -> Self {
        self.collectors = collectors;
        self
    }

    /// Uses the real metrics system configured by `config.metrics`.
    pub fn with_real_metrics(mut self) -> Self {
        self.metrics = None;
        self
    }

    pub fn with_config_modifier(mut self, modifier: impl FnOnce(&mut Config)) -> Self {
        modifier(&mut self.config);
        self
    }

    /// Builds the relay, spawns it and returns a handle once it is listening.
    pub async fn start(mut self) -> Result<TestApp> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let dir = tempfile::tempdir()?;
        let store_path = dir.path().join("alerts.json");
        self.config.store.path = store_path.clone();

        let mut builder = AppBuilder::new(self.config)
            .registry_override(self.registry)
            .fallback_override(self.fallback)
            .geo_override(self.geo)
            .collectors_override(self.collectors);
        if let Some(store) = self.store {
            builder = builder.store_override(store);
        }
        if let Some(metrics) = self.metrics {
            builder = builder.metrics_override(metrics);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = builder.build(shutdown_rx).await?;
        let addr = app.relay_addr();
        let metrics_addr = app.metrics_addr();
        let app_handle = tokio::spawn(app.run());

        Ok(TestApp {
            addr,
            store_path,
            metrics_addr,
            shutdown_tx,
            app_handle,
            client: reqwest::Client::new(),
            _dir: dir,
        })
    }
}
