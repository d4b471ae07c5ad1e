//! Turns a raw delimited alert into an [`EnrichedAlert`].

use crate::core::{EndpointInfo, EnrichedAlert, OwnershipFields, ParseError, RawAlert};
use crate::enrichment::OwnershipResolver;
use crate::geo::GeoResolver;
use crate::internal_metrics::Metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

/// Parses alerts and runs the ownership and geo lookups for both sides.
pub struct AlertNormalizer {
    ownership: Arc<OwnershipResolver>,
    geo: Arc<GeoResolver>,
    metrics: Arc<Metrics>,
}

impl AlertNormalizer {
    pub fn new(
        ownership: Arc<OwnershipResolver>,
        geo: Arc<GeoResolver>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            ownership,
            geo,
            metrics,
        }
    }

    /// Parses `message` and enriches it.
    pub async fn normalize(&self, message: &str) -> Result<EnrichedAlert, ParseError> {
        let raw = RawAlert::parse(message)?;
        Ok(self.enrich(raw).await)
    }

    /// Resolves both addresses and both countries concurrently, then derives
    /// the ownership fields for each side.
    #[instrument(skip_all, fields(source_ip = %raw.source_ip, destination_ip = %raw.destination_ip))]
    pub async fn enrich(&self, raw: RawAlert) -> EnrichedAlert {
        let start = Instant::now();

        let (source_description, destination_description, source_coordinates, destination_coordinates) = tokio::join!(
            self.ownership.resolve(&raw.source_ip),
            self.ownership.resolve(&raw.destination_ip),
            self.geo.resolve_coordinates(&raw.source_country),
            self.geo.resolve_coordinates(&raw.destination_country),
        );

        let source = EndpointInfo {
            ownership: OwnershipFields::from_description(&source_description),
            description: source_description,
            coordinates: source_coordinates,
        };
        let destination = EndpointInfo {
            ownership: OwnershipFields::from_description(&destination_description),
            description: destination_description,
            coordinates: destination_coordinates,
        };

        self.metrics
            .enrichment_duration_seconds
            .record(start.elapsed().as_secs_f64());
        debug!(
            source_asn = %source.ownership.asn,
            destination_asn = %destination.ownership.asn,
            "Alert enriched"
        );

        EnrichedAlert {
            raw,
            source,
            destination,
        }
    }
}
