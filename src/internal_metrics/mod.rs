//! # Internal Metrics Module
//!
//! Collection and exposure of relay metrics.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: installs the Prometheus recorder, binds the
//!   metrics listener and constructs the `Metrics` handle.
//!
//! - **`Metrics`**: a cloneable handle used by the rest of the application to
//!   update the predefined metrics.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that exposes the `/metrics` endpoint for Prometheus to scrape.

pub mod server;

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use metrics::{Counter, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;

/// The public API for the metrics system.
#[derive(Clone)]
pub struct Metrics {
    pub alerts_received_total: Counter,
    pub alerts_rejected_total: Counter,
    pub registry_misses_total: Counter,
    pub geo_defaults_total: Counter,
    pub enrichment_duration_seconds: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance and registers descriptions for all
    /// supported metrics with the global recorder.
    pub fn new() -> Self {
        metrics::describe_counter!("alerts_received_total", Unit::Count, "Total number of alerts received on the webhook.");
        metrics::describe_counter!("alerts_rejected_total", Unit::Count, "Total number of alerts rejected because they could not be parsed.");
        metrics::describe_counter!("registry_misses_total", Unit::Count, "Total number of registry lookups that required a fallback lookup.");
        metrics::describe_counter!("fallback_requests_total", Unit::Count, "Total number of fallback lookups, labeled by endpoint and outcome.");
        metrics::describe_counter!("geo_defaults_total", Unit::Count, "Total number of geo lookups answered with the default coordinates.");
        metrics::describe_counter!("store_writes_total", Unit::Count, "Total number of alert store appends, labeled by outcome.");
        metrics::describe_counter!("collector_sends_total", Unit::Count, "Total number of collector transmissions, labeled by collector and outcome.");
        metrics::describe_histogram!("enrichment_duration_seconds", Unit::Seconds, "Time taken to enrich one alert.");

        Self {
            alerts_received_total: metrics::counter!("alerts_received_total"),
            alerts_rejected_total: metrics::counter!("alerts_rejected_total"),
            registry_misses_total: metrics::counter!("registry_misses_total"),
            geo_defaults_total: metrics::counter!("geo_defaults_total"),
            enrichment_duration_seconds: metrics::histogram!("enrichment_duration_seconds"),
        }
    }

    /// Creates a `Metrics` instance that is never exported.
    pub fn disabled() -> Self {
        Self {
            alerts_received_total: metrics::counter!("disabled"),
            alerts_rejected_total: metrics::counter!("disabled"),
            registry_misses_total: metrics::counter!("disabled"),
            geo_defaults_total: metrics::counter!("disabled"),
            enrichment_duration_seconds: metrics::histogram!("disabled"),
        }
    }

    pub fn increment_fallback_request(&self, endpoint: &str, outcome: &'static str) {
        metrics::counter!("fallback_requests_total", "endpoint" => endpoint.to_string(), "outcome" => outcome).increment(1);
    }

    pub fn increment_store_write(&self, outcome: &'static str) {
        metrics::counter!("store_writes_total", "outcome" => outcome).increment(1);
    }

    pub fn increment_collector_send(&self, collector: &str, outcome: &'static str) {
        metrics::counter!("collector_sends_total", "collector" => collector.to_string(), "outcome" => outcome).increment(1);
    }
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Initializes the metrics system and returns a `Metrics` handle and an
    /// optional `MetricsServer` with the address it is bound to.
    ///
    /// Any failure to set up the exporter is logged and degrades to a
    /// disabled `Metrics` instance; the relay keeps running without it.
    pub fn build(
        self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Metrics, Option<(MetricsServer, SocketAddr)>) {
        if !self.config.enabled {
            return (Metrics::disabled(), None);
        }

        let recorder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        ) {
            Ok(builder) => builder.build_recorder(),
            Err(e) => {
                error!("Failed to configure Prometheus recorder: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let handle = recorder.handle();

        let listener = match std::net::TcpListener::bind(self.config.listen_address) {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind metrics server to {}: {}",
                    self.config.listen_address, e
                );
                return (Metrics::disabled(), None);
            }
        };

        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to get local address for metrics server: {}", e);
                return (Metrics::disabled(), None);
            }
        };

        // The listener must be non-blocking to be used with Tokio.
        let listener = match listener
            .set_nonblocking(true)
            .and_then(|_| TcpListener::from_std(listener))
        {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to prepare metrics listener: {}", e);
                return (Metrics::disabled(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return (Metrics::disabled(), None);
        }

        let metrics = Metrics::new();
        let server = MetricsServer::new(listener, handle, shutdown_rx);

        (metrics, Some((server, addr)))
    }
}
