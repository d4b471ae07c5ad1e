//! The fallback lookup pool consulted when the registry has no prefix for an
//! address.

use crate::config::FallbackConfig;
use crate::core::{Description, FallbackAnswer, FallbackLookup, LookupError};
use crate::internal_metrics::Metrics;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Description used when the selected fallback endpoint cannot answer.
pub const FALLBACK_UNAVAILABLE: &str = "No data available from fallback";

/// Issues `GET <endpoint>/iplookup?ip=<ip>` requests.
#[derive(Debug, Clone)]
pub struct HttpFallbackLookup {
    client: reqwest::Client,
}

impl HttpFallbackLookup {
    pub fn new(timeout: Option<Duration>) -> Result<Self, LookupError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl FallbackLookup for HttpFallbackLookup {
    async fn lookup(&self, endpoint: &str, ip: &str) -> Result<FallbackAnswer, LookupError> {
        let url = format!("{}/iplookup", endpoint.trim_end_matches('/'));
        let response = self.client.get(&url).query(&[("ip", ip)]).send().await?;
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }
        Ok(response.json::<FallbackAnswer>().await?)
    }
}

/// A fixed, ordered set of fallback endpoints shared by every request.
///
/// Each lookup takes the next endpoint in rotation. The cursor is a single
/// atomic counter, so concurrent callers never observe a torn index, but
/// the order in which they are served is not strict.
pub struct FallbackPool {
    endpoints: Vec<String>,
    cursor: AtomicUsize,
    client: Arc<dyn FallbackLookup>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for FallbackPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPool")
            .field("endpoints", &self.endpoints)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl FallbackPool {
    /// Creates a pool over `endpoints`. The pool must not be empty.
    pub fn new(
        endpoints: Vec<String>,
        client: Arc<dyn FallbackLookup>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        if endpoints.is_empty() {
            anyhow::bail!("fallback pool requires at least one endpoint");
        }
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            client,
            metrics,
        })
    }

    /// Creates an HTTP-backed pool from configuration.
    pub fn from_config(config: &FallbackConfig, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let client = HttpFallbackLookup::new(config.timeout_ms.map(Duration::from_millis))?;
        Self::new(config.endpoints.clone(), Arc::new(client), metrics)
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Returns the endpoint to use for the next lookup and advances the cursor.
    pub fn next_endpoint(&self) -> &str {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[index]
    }

    /// Asks exactly one endpoint about `ip`. Never fails: any error degrades
    /// to the [`FALLBACK_UNAVAILABLE`] description.
    pub async fn lookup(&self, ip: &str) -> Description {
        let endpoint = self.next_endpoint();
        debug!(ip, endpoint, "Querying fallback endpoint");
        match self.client.lookup(endpoint, ip).await {
            Ok(answer) => {
                self.metrics.increment_fallback_request(endpoint, "success");
                Description::from(answer.description)
            }
            Err(e) => {
                warn!(ip, endpoint, error = %e, "Fallback lookup failed");
                self.metrics.increment_fallback_request(endpoint, "failure");
                Description::known(FALLBACK_UNAVAILABLE)
            }
        }
    }
}
