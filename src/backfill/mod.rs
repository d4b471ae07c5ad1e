//! Whois backfill for addresses the lookup server could not resolve.
//!
//! Reads the lookup server's missing IP list, asks whois for the announcing
//! prefix of each address and creates that prefix in the registry. Every
//! handled address is written to a ledger so reruns skip it.

pub mod whois;

pub use whois::{CymruWhois, WhoisError, WhoisLookup, WhoisRecord, DEFAULT_WHOIS_SERVER};

use crate::core::{NewPrefix, PrefixWriter};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What happened to one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    Processed,
    InvalidData,
    RegistryError,
    WhoisError,
}

impl BackfillOutcome {
    /// The comment stored in the ledger.
    pub fn comment(self) -> &'static str {
        match self {
            BackfillOutcome::Processed => "Processed successfully",
            BackfillOutcome::InvalidData => "Not processed due to invalid data",
            BackfillOutcome::RegistryError => "Not processed due to NetBox error",
            BackfillOutcome::WhoisError => "Not processed due to whois error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub ip: String,
    pub comment: String,
}

/// Addresses the backfill has already handled, persisted as a pretty-printed
/// JSON array of `{"ip", "comment"}` objects.
#[derive(Debug)]
pub struct ProcessedLedger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
}

impl ProcessedLedger {
    /// Loads the ledger from `path`. A missing or unreadable file starts an
    /// empty ledger.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt processed IP ledger");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read processed IP ledger");
                Vec::new()
            }
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.entries.iter().any(|entry| entry.ip == ip)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Records `outcome` for `ip` and rewrites the file.
    pub async fn record(&mut self, ip: &str, outcome: BackfillOutcome) -> Result<()> {
        let comment = outcome.comment().to_string();
        match self.entries.iter_mut().find(|entry| entry.ip == ip) {
            Some(entry) => entry.comment = comment,
            None => self.entries.push(LedgerEntry {
                ip: ip.to_string(),
                comment,
            }),
        }
        let contents = serde_json::to_string_pretty(&self.entries)?;
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }
}

/// Counts per outcome for one backfill run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub skipped: usize,
    pub processed: usize,
    pub invalid: usize,
    pub failed: usize,
}

impl BackfillSummary {
    fn count(&mut self, outcome: BackfillOutcome) {
        match outcome {
            BackfillOutcome::Processed => self.processed += 1,
            BackfillOutcome::InvalidData => self.invalid += 1,
            BackfillOutcome::RegistryError | BackfillOutcome::WhoisError => self.failed += 1,
        }
    }
}

/// Resolves addresses through whois and writes the prefixes to the registry.
pub struct Backfill {
    whois: Arc<dyn WhoisLookup>,
    registry: Arc<dyn PrefixWriter>,
}

impl Backfill {
    pub fn new(whois: Arc<dyn WhoisLookup>, registry: Arc<dyn PrefixWriter>) -> Self {
        Self { whois, registry }
    }

    /// Handles every address in `missing` that the ledger does not list yet.
    /// The ledger is saved after each address.
    #[instrument(skip_all, fields(count = missing.len()))]
    pub async fn run(
        &self,
        missing: &[String],
        ledger: &mut ProcessedLedger,
    ) -> Result<BackfillSummary> {
        let mut summary = BackfillSummary::default();
        for ip in missing {
            if ledger.contains(ip) {
                debug!(ip = %ip, "IP has already been processed, skipping");
                summary.skipped += 1;
                continue;
            }
            let outcome = self.resolve(ip).await;
            summary.count(outcome);
            ledger.record(ip, outcome).await?;
        }
        info!(
            processed = summary.processed,
            invalid = summary.invalid,
            failed = summary.failed,
            skipped = summary.skipped,
            "Backfill finished"
        );
        Ok(summary)
    }

    async fn resolve(&self, ip: &str) -> BackfillOutcome {
        let record = match self.whois.query(ip).await {
            Ok(record) => record,
            Err(WhoisError::NoData | WhoisError::Malformed(_)) => {
                warn!(ip, "Whois returned no usable data");
                return BackfillOutcome::InvalidData;
            }
            Err(e) => {
                warn!(ip, error = %e, "Whois lookup failed");
                return BackfillOutcome::WhoisError;
            }
        };

        if !record.is_routed() {
            warn!(ip, asn = %record.asn, "Skipping IP due to invalid data");
            return BackfillOutcome::InvalidData;
        }

        let prefix = NewPrefix::new(record.prefix.as_str(), record.description());
        match self.registry.create_prefix(&prefix).await {
            Ok(()) => {
                info!(ip, prefix = %record.prefix, "Backfilled prefix");
                BackfillOutcome::Processed
            }
            Err(e) => {
                warn!(ip, prefix = %record.prefix, error = %e, "Failed to add prefix to registry");
                BackfillOutcome::RegistryError
            }
        }
    }
}
