//! Country geolocation with static defaults.

use crate::config::GeoConfig;
use crate::core::{Coordinates, GeoLookup, LookupError};
use crate::internal_metrics::Metrics;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_LATITUDE: &str = "-7.983908";
pub const DEFAULT_LONGITUDE: &str = "112.621391";

/// Issues `GET <endpoint>/geo/<country>` requests.
#[derive(Debug, Clone)]
pub struct HttpGeoLookup {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpGeoLookup {
    pub fn new(endpoint: &str, timeout: Option<Duration>) -> Result<Self, LookupError> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| LookupError::Url(format!("{}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(LookupError::Url(format!("{} cannot be a base url", endpoint)));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint,
        })
    }

    fn url_for(&self, country: &str) -> Result<reqwest::Url, LookupError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| LookupError::Url(self.endpoint.to_string()))?
            .pop_if_empty()
            .push("geo")
            .push(country);
        Ok(url)
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn coordinates(&self, country: &str) -> Result<Coordinates, LookupError> {
        let response = self.client.get(self.url_for(country)?).send().await?;
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }
        Ok(response.json::<Coordinates>().await?)
    }
}

/// Resolves country identifiers to coordinates. Never fails: denylisted
/// countries and every lookup error yield the default pair.
pub struct GeoResolver {
    lookup: Arc<dyn GeoLookup>,
    invalid_countries: Vec<String>,
    default: Coordinates,
    cache: Option<Cache<String, Coordinates>>,
    metrics: Arc<Metrics>,
}

impl GeoResolver {
    pub fn new(lookup: Arc<dyn GeoLookup>, config: &GeoConfig, metrics: Arc<Metrics>) -> Self {
        let cache = (config.cache_size > 0).then(|| {
            Cache::builder()
                .max_capacity(config.cache_size)
                .time_to_live(Duration::from_secs(config.cache_ttl_seconds))
                .build()
        });

        Self {
            lookup,
            invalid_countries: config.invalid_countries.clone(),
            default: Coordinates::new(
                config.default_latitude.clone(),
                config.default_longitude.clone(),
            ),
            cache,
            metrics,
        }
    }

    /// Creates an HTTP-backed resolver from configuration.
    pub fn from_config(config: &GeoConfig, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let lookup = HttpGeoLookup::new(
            &config.endpoint,
            config.timeout_ms.map(Duration::from_millis),
        )?;
        Ok(Self::new(Arc::new(lookup), config, metrics))
    }

    pub fn default_coordinates(&self) -> &Coordinates {
        &self.default
    }

    pub async fn resolve_coordinates(&self, country: &str) -> Coordinates {
        if self.invalid_countries.iter().any(|c| c == country) {
            info!(country, "Country is not valid, returning default coordinates");
            self.metrics.geo_defaults_total.increment(1);
            return self.default.clone();
        }

        if let Some(cache) = &self.cache {
            if let Some(coordinates) = cache.get(country).await {
                debug!(country, "Coordinates served from cache");
                return coordinates;
            }
        }

        match self.lookup.coordinates(country).await {
            Ok(coordinates) => {
                if let Some(cache) = &self.cache {
                    cache.insert(country.to_string(), coordinates.clone()).await;
                }
                coordinates
            }
            Err(e) => {
                warn!(country, error = %e, "Geo lookup failed, returning default coordinates");
                self.metrics.geo_defaults_total.increment(1);
                self.default.clone()
            }
        }
    }
}
