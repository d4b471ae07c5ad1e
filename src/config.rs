//! Configuration management for the relay
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer built-in defaults, an `ips-relay.toml` file,
//! `IPS_RELAY_` environment variables and command-line flags.

use crate::cli::Cli;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "ips-relay.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// The inbound webhook listener.
    pub server: ServerConfig,
    /// The primary prefix registry.
    pub registry: RegistryConfig,
    /// The fallback lookup pool.
    pub fallback: FallbackConfig,
    /// The geocoding service.
    pub geo: GeoConfig,
    /// The append-only alert file.
    pub store: StoreConfig,
    /// The syslog collectors.
    pub syslog: SyslogConfig,
    /// Prometheus metrics exporter.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// The bundled fallback lookup server.
    pub lookup_server: LookupServerConfig,
    /// The whois backfill of unresolved addresses.
    pub backfill: BackfillConfig,
}

/// Configuration for the inbound webhook.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Address the webhook listener binds to.
    pub listen_address: SocketAddr,
    /// Route that accepts alerts.
    pub webhook_path: String,
}

/// Configuration for the NetBox prefix registry.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegistryConfig {
    /// Base URL of the registry, e.g. `http://localhost:8000`.
    pub url: String,
    /// API token sent as `Authorization: Token <token>`.
    pub token: Option<String>,
    /// Optional request timeout. No timeout when absent.
    pub timeout_ms: Option<u64>,
}

/// Configuration for the fallback lookup pool.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FallbackConfig {
    /// Endpoints queried in round-robin order on a registry miss.
    pub endpoints: Vec<String>,
    /// Optional request timeout. No timeout when absent.
    pub timeout_ms: Option<u64>,
}

/// Configuration for the geocoding service.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeoConfig {
    /// Base URL of the geocoder; lookups go to `<endpoint>/geo/<country>`.
    pub endpoint: String,
    /// Country values that are never sent to the geocoder.
    pub invalid_countries: Vec<String>,
    /// Latitude returned when no real coordinates are available.
    pub default_latitude: String,
    /// Longitude returned when no real coordinates are available.
    pub default_longitude: String,
    /// Number of successful lookups to cache. Zero disables the cache.
    pub cache_size: u64,
    /// Lifetime of cached coordinates in seconds.
    pub cache_ttl_seconds: u64,
    /// Optional request timeout. No timeout when absent.
    pub timeout_ms: Option<u64>,
}

/// Configuration for the alert file.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    /// File that receives one JSON document per alert.
    pub path: PathBuf,
}

/// Syslog message framing.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyslogFormat {
    #[default]
    Rfc3164,
    Rfc5424,
}

impl fmt::Display for SyslogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyslogFormat::Rfc3164 => write!(f, "rfc3164"),
            SyslogFormat::Rfc5424 => write!(f, "rfc5424"),
        }
    }
}

/// Syslog facility codes.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Facility {
    Kern,
    User,
    Daemon,
    Auth,
    Syslog,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

impl Facility {
    pub fn code(self) -> u8 {
        match self {
            Facility::Kern => 0,
            Facility::User => 1,
            Facility::Daemon => 3,
            Facility::Auth => 4,
            Facility::Syslog => 5,
            Facility::Local0 => 16,
            Facility::Local1 => 17,
            Facility::Local2 => 18,
            Facility::Local3 => 19,
            Facility::Local4 => 20,
            Facility::Local5 => 21,
            Facility::Local6 => 22,
            Facility::Local7 => 23,
        }
    }
}

/// Syslog severity levels.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Informational,
    Debug,
}

impl Severity {
    pub fn code(self) -> u8 {
        match self {
            Severity::Emergency => 0,
            Severity::Alert => 1,
            Severity::Critical => 2,
            Severity::Error => 3,
            Severity::Warning => 4,
            Severity::Notice => 5,
            Severity::Informational => 6,
            Severity::Debug => 7,
        }
    }
}

/// One remote syslog collector.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// `host:port` of the collector.
    pub address: String,
}

/// Configuration for the syslog collectors.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyslogConfig {
    pub format: SyslogFormat,
    pub facility: Facility,
    pub severity: Severity,
    /// Hostname written into each message. Falls back to the system host name.
    pub hostname: Option<String>,
    /// Application name used by the RFC 5424 framing.
    pub app_name: String,
    /// Collectors that each receive every alert.
    pub collectors: Vec<CollectorConfig>,
}

/// Configuration for the Prometheus exporter.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MetricsConfig {
    /// Whether the exporter is enabled.
    pub enabled: bool,
    /// Address the `/metrics` endpoint listens on.
    pub listen_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

/// Configuration for the bundled fallback lookup server.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LookupServerConfig {
    /// Address the lookup server binds to.
    pub listen_address: SocketAddr,
    /// CSV file with `start_ip,end_ip,asn,as_name,as_domain` rows.
    pub data_path: PathBuf,
    /// JSON file collecting addresses that could not be resolved.
    pub missing_ips_path: PathBuf,
    /// Write every hit back to the registry described by `[registry]`.
    pub register_prefixes: bool,
}

/// Configuration for the whois backfill.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackfillConfig {
    /// `host:port` of the Team Cymru style whois server.
    pub whois_server: String,
    /// Ledger of addresses the backfill has already handled.
    pub processed_ips_path: PathBuf,
    /// Optional timeout for a single whois query. No timeout when absent.
    pub timeout_ms: Option<u64>,
}

impl Config {
    /// Loads the application configuration by layering defaults, the TOML
    /// file, environment variables and command-line arguments.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            // e.g. IPS_RELAY_STORE__PATH=/tmp/alerts.json
            .merge(Env::prefixed("IPS_RELAY_").split("__"))
            .merge(cli.clone())
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the relay cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.fallback.endpoints.is_empty() {
            anyhow::bail!("fallback.endpoints must contain at least one endpoint");
        }
        if self.syslog.collectors.is_empty() {
            anyhow::bail!("syslog.collectors must contain at least one collector");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig {
                listen_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
                webhook_path: "/webhook".to_string(),
            },
            registry: RegistryConfig {
                url: "http://localhost:8000".to_string(),
                token: None,
                timeout_ms: None,
            },
            fallback: FallbackConfig {
                endpoints: vec![
                    "http://localhost:5000".to_string(),
                    "http://localhost:5001".to_string(),
                    "http://localhost:5002".to_string(),
                ],
                timeout_ms: None,
            },
            geo: GeoConfig {
                endpoint: "http://localhost:5050".to_string(),
                invalid_countries: vec!["Reversed".to_string()],
                default_latitude: crate::geo::DEFAULT_LATITUDE.to_string(),
                default_longitude: crate::geo::DEFAULT_LONGITUDE.to_string(),
                cache_size: 1_000,
                cache_ttl_seconds: 3600,
                timeout_ms: None,
            },
            store: StoreConfig {
                path: PathBuf::from("/var/log/firewall/alerts.json"),
            },
            syslog: SyslogConfig {
                format: SyslogFormat::Rfc3164,
                facility: Facility::Local0,
                severity: Severity::Warning,
                hostname: None,
                app_name: "ips-relay".to_string(),
                collectors: vec![
                    CollectorConfig {
                        address: "10.255.50.10:514".to_string(),
                    },
                    CollectorConfig {
                        address: "10.255.50.9:514".to_string(),
                    },
                ],
            },
            metrics: MetricsConfig::default(),
            lookup_server: LookupServerConfig {
                listen_address: SocketAddr::from(([0, 0, 0, 0], 5000)),
                data_path: PathBuf::from("data.csv"),
                missing_ips_path: PathBuf::from("missing_ips.json"),
                register_prefixes: true,
            },
            backfill: BackfillConfig {
                whois_server: crate::backfill::DEFAULT_WHOIS_SERVER.to_string(),
                processed_ips_path: PathBuf::from("processed_ips.json"),
                timeout_ms: Some(10_000),
            },
        }
    }
}
