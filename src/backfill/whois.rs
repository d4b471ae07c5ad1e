//! Client for Team Cymru's IP-to-ASN whois service.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

/// Team Cymru's whois server.
pub const DEFAULT_WHOIS_SERVER: &str = "whois.cymru.com:43";

#[derive(Error, Debug)]
pub enum WhoisError {
    #[error("whois connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("whois query timed out")]
    Timeout,

    #[error("whois answer has no data line")]
    NoData,

    #[error("malformed whois line: {0}")]
    Malformed(String),
}

/// One data line of a verbose Cymru answer:
///
/// `15169 | 8.8.8.8 | 8.8.8.0/24 | US | arin | 2023-12-28 | GOOGLE, US`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoisRecord {
    pub asn: String,
    pub ip: String,
    pub prefix: String,
    pub country: String,
    pub registry: String,
    pub allocated: String,
    pub as_name: String,
}

impl WhoisRecord {
    /// Parses a verbose answer. The first line is the column header; the
    /// record is on the second.
    pub fn parse(answer: &str) -> Result<Self, WhoisError> {
        let line = answer
            .lines()
            .filter(|line| !line.trim().is_empty())
            .nth(1)
            .ok_or(WhoisError::NoData)?;

        let parts: Vec<&str> = line.splitn(7, '|').map(str::trim).collect();
        let [asn, ip, prefix, country, registry, allocated, as_name] = parts[..] else {
            return Err(WhoisError::Malformed(line.to_string()));
        };

        Ok(Self {
            asn: asn.to_string(),
            ip: ip.to_string(),
            prefix: prefix.to_string(),
            country: country.to_string(),
            registry: registry.to_string(),
            allocated: allocated.to_string(),
            as_name: as_name.to_string(),
        })
    }

    /// Cymru answers `NA` for unrouted space.
    pub fn is_routed(&self) -> bool {
        !self.asn.is_empty()
            && self.asn != "NA"
            && !self.prefix.is_empty()
            && !self.as_name.is_empty()
    }

    /// Registry description in `"<AS name> (AS<number>)"` form.
    pub fn description(&self) -> String {
        format!("{} (AS{})", self.as_name, self.asn)
    }
}

#[async_trait]
pub trait WhoisLookup: Send + Sync {
    async fn query(&self, ip: &str) -> Result<WhoisRecord, WhoisError>;
}

/// Speaks the whois protocol over TCP: send one query line, read until the
/// server closes the connection.
#[derive(Debug, Clone)]
pub struct CymruWhois {
    server: String,
    timeout: Option<Duration>,
}

impl CymruWhois {
    pub fn new(server: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            server: server.into(),
            timeout,
        }
    }

    async fn exchange(&self, ip: &str) -> Result<String, WhoisError> {
        let mut stream = TcpStream::connect(self.server.as_str()).await?;
        stream.write_all(format!(" -v {}\r\n", ip).as_bytes()).await?;
        stream.flush().await?;

        let mut answer = String::new();
        stream.read_to_string(&mut answer).await?;
        Ok(answer)
    }
}

#[async_trait]
impl WhoisLookup for CymruWhois {
    async fn query(&self, ip: &str) -> Result<WhoisRecord, WhoisError> {
        trace!(ip, server = %self.server, "Querying whois");
        let answer = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(ip))
                .await
                .map_err(|_| WhoisError::Timeout)??,
            None => self.exchange(ip).await?,
        };
        WhoisRecord::parse(&answer)
    }
}
