//! Client for the primary ownership registry, a NetBox IPAM instance.
//!
//! The same client reads prefixes for the relay and writes them back for the
//! lookup server and the whois backfill.

use crate::config::RegistryConfig;
use crate::core::{LookupError, NewPrefix, PrefixRecord, PrefixWriter, RegistryLookup};
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Looks up prefixes through the NetBox `/api/ipam/prefixes/` endpoint.
#[derive(Debug, Clone)]
pub struct NetboxRegistry {
    client: reqwest::Client,
    prefixes_url: reqwest::Url,
}

#[derive(Debug, Deserialize)]
struct PrefixPage {
    #[serde(default)]
    results: Vec<PrefixRecord>,
}

impl NetboxRegistry {
    pub fn from_config(config: &RegistryConfig) -> Result<Self, LookupError> {
        let base = reqwest::Url::parse(&config.url)
            .map_err(|e| LookupError::Url(format!("{}: {}", config.url, e)))?;
        let prefixes_url = prefixes_url(base)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Token {}", token))
                .map_err(|_| LookupError::Url("registry token is not a valid header".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout));
        }

        Ok(Self {
            client: builder.build()?,
            prefixes_url,
        })
    }

    /// The collection endpoint every request goes to.
    pub fn prefixes_url(&self) -> &reqwest::Url {
        &self.prefixes_url
    }
}

/// Appends `api/ipam/prefixes/` to `base`, keeping any path the registry is
/// mounted under.
fn prefixes_url(mut base: reqwest::Url) -> Result<reqwest::Url, LookupError> {
    let display = base.to_string();
    base.path_segments_mut()
        .map_err(|_| LookupError::Url(display))?
        .pop_if_empty()
        .extend(["api", "ipam", "prefixes", ""]);
    Ok(base)
}

#[async_trait]
impl RegistryLookup for NetboxRegistry {
    async fn lookup(&self, ip: &str) -> Result<Option<PrefixRecord>, LookupError> {
        trace!(ip, "Querying registry");
        let response = self
            .client
            .get(self.prefixes_url.clone())
            .query(&[("contains", ip)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LookupError::Status(response.status()));
        }

        let page: PrefixPage = response.json().await?;
        let record = most_specific(page.results);
        debug!(ip, prefix = ?record.as_ref().map(|r| &r.prefix), "Registry lookup finished");
        Ok(record)
    }
}

#[async_trait]
impl PrefixWriter for NetboxRegistry {
    async fn create_prefix(&self, prefix: &NewPrefix) -> Result<(), LookupError> {
        let response = self
            .client
            .post(self.prefixes_url.clone())
            .json(prefix)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(prefix = %prefix.prefix, %status, body = %body, "Registry rejected prefix");
            return Err(LookupError::Status(status));
        }
        info!(prefix = %prefix.prefix, "Prefix added to registry");
        Ok(())
    }
}

/// Picks the record with the longest prefix length. Records whose prefix
/// does not parse sort below every valid one.
fn most_specific(records: Vec<PrefixRecord>) -> Option<PrefixRecord> {
    records
        .into_iter()
        .filter(|r| !r.prefix.is_empty())
        .max_by_key(|r| {
            r.prefix
                .parse::<IpNetwork>()
                .map(|net| i16::from(net.prefix()))
                .unwrap_or(-1)
        })
}
