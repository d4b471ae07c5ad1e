//! Alert sinks and the publisher that fans an alert out to them.
//!
//! The JSON-lines store gates every publish: an alert that cannot be
//! appended is never transmitted. Collector transmissions run as detached
//! tasks and report their outcome on a delivery channel.

use crate::core::{AlertStore, Collector, DeliveryError, EnrichedAlert, StoreError};
use crate::formatting::{flatten_alert, SyslogFramer};
use crate::internal_metrics::Metrics;
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Appends one JSON document per alert to a file.
///
/// The path is reopened for every append, so a file renamed away by log
/// rotation is recreated on the next alert.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    // Serializes appends so concurrent lines never interleave.
    lock: Mutex<()>,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl AlertStore for JsonLinesStore {
    async fn append(&self, alert: &EnrichedAlert) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&alert.record())?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&line).await.map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// Sends framed syslog datagrams to one collector over UDP.
#[derive(Debug)]
pub struct UdpSyslogCollector {
    address: String,
    framer: SyslogFramer,
}

impl UdpSyslogCollector {
    pub fn new(address: impl Into<String>, framer: SyslogFramer) -> Self {
        Self {
            address: address.into(),
            framer,
        }
    }

    async fn target(&self) -> Result<SocketAddr, DeliveryError> {
        tokio::net::lookup_host(self.address.as_str())
            .await?
            .next()
            .ok_or_else(|| DeliveryError::Resolve(self.address.clone()))
    }
}

#[async_trait]
impl Collector for UdpSyslogCollector {
    fn name(&self) -> &str {
        &self.address
    }

    async fn send(&self, line: &str) -> Result<(), DeliveryError> {
        let target = self.target().await?;
        let bind: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        let message = self.framer.frame(line);
        socket.send_to(message.as_bytes(), target).await?;
        Ok(())
    }
}

/// The outcome of one collector transmission.
#[derive(Debug)]
pub struct DeliveryReport {
    pub collector: String,
    pub outcome: Result<(), DeliveryError>,
}

/// Fans enriched alerts out to the store and the collectors.
pub struct Publisher {
    store: Arc<dyn AlertStore>,
    collectors: Vec<Arc<dyn Collector>>,
    reports: Sender<DeliveryReport>,
    metrics: Arc<Metrics>,
}

impl Publisher {
    /// Creates a publisher and the receiving end of its delivery-report channel.
    pub fn new(
        store: Arc<dyn AlertStore>,
        collectors: Vec<Arc<dyn Collector>>,
        metrics: Arc<Metrics>,
    ) -> (Self, Receiver<DeliveryReport>) {
        let (reports, reports_rx) = async_channel::unbounded();
        (
            Self {
                store,
                collectors,
                reports,
                metrics,
            },
            reports_rx,
        )
    }

    /// Appends `alert` to the store and, once that succeeds, dispatches one
    /// detached transmission per collector. Returns without waiting for the
    /// transmissions.
    ///
    /// # Returns
    /// * `Ok(n)` with the number of transmissions dispatched
    /// * `Err` if the store append failed; nothing is transmitted
    #[instrument(skip_all, fields(source_ip = %alert.raw.source_ip))]
    pub async fn publish(&self, alert: &EnrichedAlert) -> Result<usize, StoreError> {
        if let Err(e) = self.store.append(alert).await {
            self.metrics.increment_store_write("failure");
            return Err(e);
        }
        self.metrics.increment_store_write("success");
        debug!("Alert appended to store");

        let line: Arc<str> = flatten_alert(alert).into();
        for collector in &self.collectors {
            let collector = collector.clone();
            let line = line.clone();
            let reports = self.reports.clone();
            tokio::spawn(async move {
                let outcome = collector.send(&line).await;
                let report = DeliveryReport {
                    collector: collector.name().to_string(),
                    outcome,
                };
                if let Err(e) = reports.send(report).await {
                    error!(collector = %e.0.collector, "Delivery report channel closed");
                }
            });
        }
        Ok(self.collectors.len())
    }
}

/// How long the monitor keeps draining reports after shutdown is signalled.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Drains delivery reports, logging and counting each outcome, until the
/// channel closes.
///
/// On shutdown the monitor keeps receiving for up to [`DRAIN_GRACE`] so
/// that transmissions dispatched while the webhook server drains are still
/// reported. The channel closes once the publisher and every in-flight
/// transmission are gone.
pub async fn run_delivery_monitor(
    reports: Receiver<DeliveryReport>,
    metrics: Arc<Metrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            report = reports.recv() => {
                let Ok(report) = report else {
                    info!("Delivery report channel closed, monitor shutting down.");
                    return;
                };
                record_report(&metrics, &report);
            }
            _ = shutdown_rx.changed() => {
                info!("Delivery monitor received shutdown signal, draining remaining reports.");
                break;
            }
        }
    }

    let drain = async {
        while let Ok(report) = reports.recv().await {
            record_report(&metrics, &report);
        }
    };
    match tokio::time::timeout(DRAIN_GRACE, drain).await {
        Ok(()) => info!("Delivery report channel closed, monitor shutting down."),
        Err(_) => warn!(
            pending = reports.len(),
            "Delivery monitor stopped before every transmission reported"
        ),
    }
}

fn record_report(metrics: &Metrics, report: &DeliveryReport) {
    match &report.outcome {
        Ok(()) => {
            info!(collector = %report.collector, "Syslog message sent successfully");
            metrics.increment_collector_send(&report.collector, "success");
        }
        Err(e) => {
            error!(collector = %report.collector, error = %e, "Error sending syslog message");
            metrics.increment_collector_send(&report.collector, "failure");
        }
    }
}
