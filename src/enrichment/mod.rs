//! IP ownership resolution.
//!
//! The registry is authoritative; addresses it does not know are handed to
//! one endpoint of the fallback pool. Callers always get a [`Description`]
//! back, never an error.

pub mod fallback;
pub mod registry;

pub use fallback::{FallbackPool, HttpFallbackLookup, FALLBACK_UNAVAILABLE};
pub use registry::NetboxRegistry;

use crate::core::{Description, RegistryLookup};
use crate::internal_metrics::Metrics;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolves an IP address to its ownership description.
pub struct OwnershipResolver {
    registry: Arc<dyn RegistryLookup>,
    fallback: Arc<FallbackPool>,
    metrics: Arc<Metrics>,
}

impl OwnershipResolver {
    pub fn new(
        registry: Arc<dyn RegistryLookup>,
        fallback: Arc<FallbackPool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            fallback,
            metrics,
        }
    }

    /// Returns the registry description for `ip`, or the answer of a single
    /// fallback endpoint when the registry has no prefix for it.
    pub async fn resolve(&self, ip: &str) -> Description {
        match self.registry.lookup(ip).await {
            Ok(Some(record)) => {
                debug!(ip, prefix = %record.prefix, "Registry hit");
                Description::from(record.description)
            }
            Ok(None) => {
                info!(ip, "IP not found in registry, calling fallback lookup");
                self.metrics.registry_misses_total.increment(1);
                self.fallback.lookup(ip).await
            }
            Err(e) => {
                warn!(ip, error = %e, "Registry lookup failed, calling fallback lookup");
                self.metrics.registry_misses_total.increment(1);
                self.fallback.lookup(ip).await
            }
        }
    }
}
