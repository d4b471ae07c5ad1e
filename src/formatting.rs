// src/formatting.rs

use crate::config::{Facility, Severity, SyslogFormat};
use crate::core::{Description, EnrichedAlert};
use chrono::{DateTime, Local, SecondsFormat};
use tracing::debug;

/// Builds the single-line `key=value` representation sent to collectors.
///
/// Free-text values have their spaces replaced with `.` so each field stays a
/// single token for the collector's parser.
pub fn flatten_alert(alert: &EnrichedAlert) -> String {
    let raw = &alert.raw;
    let src = &alert.source;
    let dst = &alert.destination;

    format!(
        "ips-firewall timestamp={} source_country={} destination_country={} source_ip={} destination_ip={} Threat_detected={} Severity={} action={} source_asn={} destination_asn={} source_as_name={} destination_as_name={} source_as_domain={} destination_as_domain={} source_description={} destination_description={} source_lat={} source_long={} destination_lat={} destination_long={}",
        raw.timestamp,
        dotted(&raw.source_country),
        dotted(&raw.destination_country),
        raw.source_ip,
        raw.destination_ip,
        raw.threat_type,
        raw.severity,
        raw.action,
        src.ownership.asn,
        dst.ownership.asn,
        dotted(&src.ownership.as_name),
        dotted(&dst.ownership.as_name),
        src.ownership.as_domain,
        dst.ownership.as_domain,
        dotted_description(&src.description, "source_description"),
        dotted_description(&dst.description, "destination_description"),
        src.coordinates.latitude,
        src.coordinates.longitude,
        dst.coordinates.latitude,
        dst.coordinates.longitude,
    )
}

fn dotted(value: &str) -> String {
    value.replace(' ', ".")
}

fn dotted_description(description: &Description, field: &'static str) -> String {
    match description {
        Description::Known(text) => dotted(text),
        Description::Unknown => {
            debug!(field, "Description unavailable, leaving field empty");
            String::new()
        }
    }
}

/// Frames messages as syslog datagrams.
#[derive(Debug, Clone)]
pub struct SyslogFramer {
    format: SyslogFormat,
    priority: u8,
    hostname: String,
    app_name: String,
}

impl SyslogFramer {
    pub fn new(
        format: SyslogFormat,
        facility: Facility,
        severity: Severity,
        hostname: String,
        app_name: String,
    ) -> Self {
        Self {
            format,
            priority: facility.code() * 8 + severity.code(),
            hostname,
            app_name,
        }
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Frames `message` using the current local time.
    pub fn frame(&self, message: &str) -> String {
        self.frame_at(message, Local::now())
    }

    pub fn frame_at(&self, message: &str, now: DateTime<Local>) -> String {
        match self.format {
            SyslogFormat::Rfc3164 => format!(
                "<{}>{} {} {}",
                self.priority,
                now.format("%b %e %H:%M:%S"),
                self.hostname,
                message
            ),
            SyslogFormat::Rfc5424 => format!(
                "<{}>1 {} {} {} {} - - {}",
                self.priority,
                now.to_rfc3339_opts(SecondsFormat::Millis, false),
                self.hostname,
                self.app_name,
                std::process::id(),
                message
            ),
        }
    }
}

/// Returns the configured hostname, or the system host name, or `localhost`.
pub fn resolve_hostname(configured: Option<&str>) -> String {
    configured
        .map(str::to_string)
        .or_else(sysinfo::System::host_name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
