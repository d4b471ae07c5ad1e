//! Derives structured autonomous-system fields from free-text ownership
//! descriptions such as `"Example Org (AS64512), example.com"`.

use crate::core::{Description, OwnershipFields, UNKNOWN};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static AS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)(?:\s*\(AS\d+\))?\s*(?:,\s*.*)?$").expect("AS name pattern is valid")
});

static AS_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*(\S+)\s*$").expect("AS domain pattern is valid"));

static ASN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bAS(\d+)\b").expect("ASN pattern is valid"));

/// Returns the organisation name, i.e. everything before the optional
/// `(ASn)` marker and the optional `, domain` suffix.
///
/// An empty name (for example a description that starts with `(AS...)`)
/// is reported as `Unknown`.
pub fn extract_as_name(description: &Description) -> String {
    let Some(text) = known_text(description, "as_name") else {
        return UNKNOWN.to_string();
    };

    AS_NAME
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Returns the single token following the last comma at the end of the
/// description.
pub fn extract_as_domain(description: &Description) -> String {
    let Some(text) = known_text(description, "as_domain") else {
        return UNKNOWN.to_string();
    };

    AS_DOMAIN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Returns the first `AS<digits>` token found anywhere in the description.
pub fn extract_asn(description: &Description) -> String {
    let Some(text) = known_text(description, "asn") else {
        return UNKNOWN.to_string();
    };

    ASN.find(text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn known_text<'a>(description: &'a Description, field: &'static str) -> Option<&'a str> {
    let text = description.as_str();
    if text.is_none() {
        debug!(field, "No ownership description available, defaulting to Unknown");
    }
    text
}

impl OwnershipFields {
    /// Runs all three extractors over one description.
    pub fn from_description(description: &Description) -> Self {
        Self {
            asn: extract_asn(description),
            as_name: extract_as_name(description),
            as_domain: extract_as_domain(description),
        }
    }
}
