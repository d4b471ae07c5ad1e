//! The bundled fallback lookup server.
//!
//! Serves `GET /iplookup?ip=<ip>` from a CSV range table. Addresses that are
//! not covered by any range are remembered in a JSON file so they can be
//! researched later, and are rejected up front on subsequent requests.
//!
//! When a registry writer is attached, every hit is written back to the
//! registry as one prefix per CIDR block of the matched range.

pub mod range_table;

pub use range_table::{summarize_range, RangeEntry, RangeTable};

use crate::config::LookupServerConfig;
use crate::core::{NewPrefix, PrefixWriter};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Addresses that were looked up but not found, persisted as a pretty-printed
/// JSON array.
#[derive(Debug)]
pub struct MissingIps {
    path: PathBuf,
    ips: Mutex<Vec<String>>,
}

impl MissingIps {
    /// Loads the list from `path`. A missing or unreadable file starts an
    /// empty list.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ips = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str::<Vec<String>>(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt missing IP list");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read missing IP list");
                Vec::new()
            }
        };
        debug!(count = ips.len(), "Loaded missing IP list");
        Self {
            path,
            ips: Mutex::new(ips),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn contains(&self, ip: &str) -> bool {
        self.ips.lock().await.iter().any(|known| known == ip)
    }

    /// Adds `ip` to the list and rewrites the file. Already-listed addresses
    /// are not written twice.
    pub async fn record(&self, ip: &str) -> Result<()> {
        let mut ips = self.ips.lock().await;
        if ips.iter().any(|known| known == ip) {
            return Ok(());
        }
        ips.push(ip.to_string());
        let contents = serde_json::to_string_pretty(&*ips)?;
        tokio::fs::write(&self.path, contents).await?;
        info!(ip, "Recorded missing IP");
        Ok(())
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.ips.lock().await.clone()
    }
}

/// Status given to prefixes written back to the registry.
pub const REGISTERED_PREFIX_STATUS: &str = "active";

/// Everything a lookup request needs.
pub struct LookupState {
    pub table: RangeTable,
    pub missing: MissingIps,
    pub registry: Option<Arc<dyn PrefixWriter>>,
}

#[derive(Debug, Deserialize)]
struct LookupParams {
    ip: Option<String>,
}

/// The body returned for an address inside a known range.
#[derive(Debug, Serialize)]
pub struct LookupHit {
    pub ip_address: String,
    pub start_ip: String,
    pub end_ip: String,
    pub asn: String,
    pub as_name: String,
    pub as_domain: String,
    pub prefixes: Vec<String>,
    pub description: String,
}

impl LookupHit {
    fn new(ip: IpAddr, entry: &RangeEntry) -> Self {
        Self {
            ip_address: ip.to_string(),
            start_ip: entry.start_ip.to_string(),
            end_ip: entry.end_ip.to_string(),
            asn: entry.asn.clone(),
            as_name: entry.as_name.clone(),
            as_domain: entry.as_domain.clone(),
            prefixes: entry.prefixes().iter().map(ToString::to_string).collect(),
            description: entry.description(),
        }
    }
}

#[derive(Debug, Serialize)]
struct LookupFailure {
    error: &'static str,
}

fn failure(status: StatusCode, error: &'static str) -> Response {
    (status, Json(LookupFailure { error })).into_response()
}

pub fn router(state: Arc<LookupState>) -> Router {
    Router::new()
        .route("/iplookup", get(ip_lookup))
        .with_state(state)
}

async fn ip_lookup(
    State(state): State<Arc<LookupState>>,
    Query(params): Query<LookupParams>,
) -> Response {
    let Some(raw_ip) = params.ip.filter(|ip| !ip.is_empty()) else {
        return failure(StatusCode::BAD_REQUEST, "IP address is required");
    };

    let Ok(ip) = raw_ip.parse::<IpAddr>() else {
        return failure(StatusCode::BAD_REQUEST, "Invalid IP address");
    };

    if state.missing.contains(&raw_ip).await {
        debug!(ip = %raw_ip, "IP is already in the missing list");
        return failure(StatusCode::NOT_FOUND, "IP is in missing list, please check later");
    }

    match state.table.find(ip) {
        Some(entry) => {
            let hit = LookupHit::new(ip, entry);
            if let Some(registry) = &state.registry {
                register_prefixes(registry.as_ref(), &hit).await;
            }
            (StatusCode::OK, Json(hit)).into_response()
        }
        None => {
            if let Err(e) = state.missing.record(&raw_ip).await {
                error!(ip = %raw_ip, error = %e, "Failed to record missing IP");
            }
            failure(StatusCode::NOT_FOUND, "IP not found in database")
        }
    }
}

/// Creates one registry prefix per CIDR block of `hit`. Failures are logged
/// and never change the lookup answer.
async fn register_prefixes(registry: &dyn PrefixWriter, hit: &LookupHit) {
    for prefix in &hit.prefixes {
        let new_prefix = NewPrefix::new(prefix.as_str(), hit.description.as_str())
            .with_status(REGISTERED_PREFIX_STATUS);
        if let Err(e) = registry.create_prefix(&new_prefix).await {
            warn!(prefix = %prefix, error = %e, "Failed to add prefix to registry");
        }
    }
}

/// A bound, ready-to-run lookup server.
pub struct LookupServer {
    listener: TcpListener,
    state: LookupState,
}

impl LookupServer {
    /// Loads the range table and missing list, then binds the listener.
    pub async fn bind(config: &LookupServerConfig) -> Result<Self> {
        let table = RangeTable::from_path(&config.data_path)?;
        if table.is_empty() {
            warn!(path = %config.data_path.display(), "IP range table is empty");
        }
        let missing = MissingIps::load(&config.missing_ips_path).await;
        let listener = TcpListener::bind(config.listen_address).await?;
        Ok(Self {
            listener,
            state: LookupState {
                table,
                missing,
                registry: None,
            },
        })
    }

    /// Writes every hit back to `registry`.
    pub fn with_registry(mut self, registry: Arc<dyn PrefixWriter>) -> Self {
        self.state.registry = Some(registry);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves requests until `shutdown_rx` flips.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        info!("Lookup server listening on {}", self.listener.local_addr()?);
        axum::serve(self.listener, router(Arc::new(self.state)))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
                info!("Lookup server received shutdown signal.");
            })
            .await?;
        Ok(())
    }
}
