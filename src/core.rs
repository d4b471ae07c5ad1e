//! Core domain types and service traits for the relay
//!
//! This module defines the records that flow through the enrichment pipeline
//! and the trait contracts for every external collaborator, so that each one
//! can be swapped for a fake in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// The sentinel used wherever a field could not be derived.
pub const UNKNOWN: &str = "Unknown";

/// Number of named positional fields in a raw alert.
pub const RAW_ALERT_FIELDS: usize = 8;

/// One inbound intrusion-detection event, split into its positional fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawAlert {
    pub timestamp: String,
    pub source_ip: String,
    pub destination_ip: String,
    pub source_country: String,
    pub destination_country: String,
    pub severity: String,
    pub threat_type: String,
    pub action: String,
}

/// Why a raw alert could not be split into its fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("alert body is empty")]
    Empty,

    #[error("expected {expected} pipe-delimited fields, found {found}")]
    FieldCount { expected: usize, found: usize },
}

impl RawAlert {
    /// Splits a pipe-delimited alert into its named fields.
    ///
    /// The eight named fields are required. Any fields after the eighth,
    /// including the empty one left behind by a trailing `|`, are dropped.
    pub fn parse(message: &str) -> Result<Self, ParseError> {
        if message.is_empty() {
            return Err(ParseError::Empty);
        }

        let fields: Vec<&str> = message.split('|').collect();
        if fields.len() < RAW_ALERT_FIELDS {
            return Err(ParseError::FieldCount {
                expected: RAW_ALERT_FIELDS,
                found: fields.len(),
            });
        }

        Ok(Self {
            timestamp: fields[0].to_string(),
            source_ip: fields[1].to_string(),
            destination_ip: fields[2].to_string(),
            source_country: fields[3].to_string(),
            destination_country: fields[4].to_string(),
            severity: fields[5].to_string(),
            threat_type: fields[6].to_string(),
            action: fields[7].to_string(),
        })
    }
}

/// Free-text network ownership metadata for an IP, as produced by the
/// registry or a fallback server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Description {
    Known(String),
    #[default]
    Unknown,
}

impl Description {
    pub fn known(text: impl Into<String>) -> Self {
        Self::Known(text.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Known(text) => Some(text),
            Self::Unknown => None,
        }
    }
}

impl From<Option<String>> for Description {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

impl Serialize for Description {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(text) => serializer.serialize_str(text),
            Self::Unknown => serializer.serialize_none(),
        }
    }
}

/// A prefix record returned by the primary registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrefixRecord {
    pub prefix: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Latitude/longitude pair, kept as the decimal-degree strings the geocoder
/// returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(rename = "Latitude")]
    pub latitude: String,
    #[serde(rename = "Longitude")]
    pub longitude: String,
}

impl Coordinates {
    pub fn new(latitude: impl Into<String>, longitude: impl Into<String>) -> Self {
        Self {
            latitude: latitude.into(),
            longitude: longitude.into(),
        }
    }
}

/// Structured ownership fields derived from a description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipFields {
    /// `AS<digits>` or `Unknown`.
    pub asn: String,
    pub as_name: String,
    pub as_domain: String,
}

/// Everything known about one side (source or destination) of an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub ownership: OwnershipFields,
    pub description: Description,
    pub coordinates: Coordinates,
}

/// The canonical enriched record. Built once per inbound alert and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedAlert {
    pub raw: RawAlert,
    pub source: EndpointInfo,
    pub destination: EndpointInfo,
}

impl EnrichedAlert {
    /// Returns the flat, ordered representation that is written to the store.
    pub fn record(&self) -> AlertRecord<'_> {
        AlertRecord {
            kind: "alert",
            timestamp: &self.raw.timestamp,
            source_ip: &self.raw.source_ip,
            destination_ip: &self.raw.destination_ip,
            source_country: &self.raw.source_country,
            destination_country: &self.raw.destination_country,
            severity: &self.raw.severity,
            threat_type: &self.raw.threat_type,
            action: &self.raw.action,
            source_asn: &self.source.ownership.asn,
            source_as_name: &self.source.ownership.as_name,
            source_as_domain: &self.source.ownership.as_domain,
            source_description: &self.source.description,
            destination_asn: &self.destination.ownership.asn,
            destination_as_name: &self.destination.ownership.as_name,
            destination_as_domain: &self.destination.ownership.as_domain,
            destination_description: &self.destination.description,
            source_country_latitude: &self.source.coordinates.latitude,
            source_country_longitude: &self.source.coordinates.longitude,
            destination_country_latitude: &self.destination.coordinates.latitude,
            destination_country_longitude: &self.destination.coordinates.longitude,
        }
    }
}

/// Borrowed, flattened view of an [`EnrichedAlert`] in stored field order.
#[derive(Debug, Serialize)]
pub struct AlertRecord<'a> {
    #[serde(rename = "ips-firewall")]
    pub kind: &'static str,
    pub timestamp: &'a str,
    pub source_ip: &'a str,
    pub destination_ip: &'a str,
    pub source_country: &'a str,
    pub destination_country: &'a str,
    pub severity: &'a str,
    pub threat_type: &'a str,
    pub action: &'a str,
    pub source_asn: &'a str,
    pub source_as_name: &'a str,
    pub source_as_domain: &'a str,
    pub source_description: &'a Description,
    pub destination_asn: &'a str,
    pub destination_as_name: &'a str,
    pub destination_as_domain: &'a str,
    pub destination_description: &'a Description,
    pub source_country_latitude: &'a str,
    pub source_country_longitude: &'a str,
    pub destination_country_latitude: &'a str,
    pub destination_country_longitude: &'a str,
}

// =============================================================================
// Service Traits
// =============================================================================

/// Errors raised by the HTTP lookup clients. The resolvers log these and
/// degrade to default values; they never reach the webhook caller.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid endpoint url: {0}")]
    Url(String),
}

/// The primary ownership registry (an IPAM prefix database).
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    /// Looks up the most specific prefix containing `ip`.
    ///
    /// # Returns
    /// * `Ok(Some(record))` when a prefix is known
    /// * `Ok(None)` when the registry has no prefix for the address
    /// * `Err` on transport or protocol failure
    async fn lookup(&self, ip: &str) -> Result<Option<PrefixRecord>, LookupError>;
}

/// A prefix to be created in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPrefix {
    pub prefix: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl NewPrefix {
    pub fn new(prefix: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            description: description.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Write access to the registry, used to feed resolved ranges back so that
/// later alerts hit the registry instead of the fallback pool.
#[async_trait]
pub trait PrefixWriter: Send + Sync {
    async fn create_prefix(&self, prefix: &NewPrefix) -> Result<(), LookupError>;
}

/// The answer of a fallback lookup server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct FallbackAnswer {
    #[serde(default)]
    pub description: Option<String>,
}

/// Client for a single request against one fallback endpoint.
#[async_trait]
pub trait FallbackLookup: Send + Sync {
    async fn lookup(&self, endpoint: &str, ip: &str) -> Result<FallbackAnswer, LookupError>;
}

/// The geocoding collaborator.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn coordinates(&self, country: &str) -> Result<Coordinates, LookupError>;
}

/// Failure to persist an enriched alert.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to serialize alert: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to append to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The append-only alert store.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn append(&self, alert: &EnrichedAlert) -> Result<(), StoreError>;
}

/// Failure to hand a line to a collector.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("could not resolve collector address {0}")]
    Resolve(String),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Rejected(String),
}

/// A remote log collector.
#[async_trait]
pub trait Collector: Send + Sync {
    /// A unique, descriptive name (typically the collector address), used
    /// for logging and metrics.
    fn name(&self) -> &str;

    /// Transmits one flattened alert line.
    async fn send(&self, line: &str) -> Result<(), DeliveryError>;
}
