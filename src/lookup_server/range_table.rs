//! An in-memory IP range table loaded from CSV, backed by interval maps for
//! fast range lookups.

use anyhow::Result;
use ipnetwork::IpNetwork;
use rangemap::RangeInclusiveMap;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::{debug, info, warn};

/// Ownership data for one address range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeEntry {
    pub start_ip: IpAddr,
    pub end_ip: IpAddr,
    pub asn: String,
    pub as_name: String,
    pub as_domain: String,
}

impl RangeEntry {
    /// The registry description format: `"<as_name> (<asn>), <as_domain>"`.
    pub fn description(&self) -> String {
        format!("{} ({}), {}", self.as_name, self.asn, self.as_domain)
    }

    /// The CIDR blocks that exactly cover this range.
    pub fn prefixes(&self) -> Vec<IpNetwork> {
        summarize_range(self.start_ip, self.end_ip)
    }
}

/// A row of the source CSV. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct CsvRow {
    start_ip: String,
    end_ip: String,
    asn: String,
    as_name: String,
    as_domain: String,
}

/// IPv4 and IPv6 ranges are kept in separate maps so an address only ever
/// matches a range of its own family.
#[derive(Debug, Clone, Default)]
pub struct RangeTable {
    v4: RangeInclusiveMap<u32, RangeEntry>,
    v6: RangeInclusiveMap<u128, RangeEntry>,
}

impl RangeTable {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Loading IP range data from CSV file: {:?}", path.as_ref());
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    /// Builds the table from CSV with a header row. Rows that fail to parse
    /// are skipped. When ranges overlap, the row that appears first wins.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = Self::default();
        let mut skipped = 0usize;
        for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!(line = line + 2, error = %e, "Skipping malformed CSV row");
                    skipped += 1;
                    continue;
                }
            };
            if let Err(reason) = table.insert_row(row) {
                warn!(line = line + 2, reason, "Skipping invalid CSV row");
                skipped += 1;
            }
        }

        debug!(
            v4_ranges = table.v4.len(),
            v6_ranges = table.v6.len(),
            skipped,
            "Built IP range table"
        );
        Ok(table)
    }

    fn insert_row(&mut self, row: CsvRow) -> Result<(), &'static str> {
        let start: IpAddr = row.start_ip.parse().map_err(|_| "invalid start_ip")?;
        let end: IpAddr = row.end_ip.parse().map_err(|_| "invalid end_ip")?;

        let entry = RangeEntry {
            start_ip: start,
            end_ip: end,
            asn: row.asn,
            as_name: row.as_name,
            as_domain: row.as_domain,
        };

        match (start, end) {
            (IpAddr::V4(s), IpAddr::V4(e)) => {
                insert_first_wins(&mut self.v4, u32::from(s)..=u32::from(e), entry)
            }
            (IpAddr::V6(s), IpAddr::V6(e)) => {
                insert_first_wins(&mut self.v6, u128::from(s)..=u128::from(e), entry)
            }
            _ => Err("start_ip and end_ip are different address families"),
        }
    }

    /// Finds the range containing `ip`.
    pub fn find(&self, ip: IpAddr) -> Option<&RangeEntry> {
        match ip {
            IpAddr::V4(v4) => self.v4.get(&u32::from(v4)),
            IpAddr::V6(v6) => self.v6.get(&u128::from(v6)),
        }
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn insert_first_wins<K>(
    map: &mut RangeInclusiveMap<K, RangeEntry>,
    range: RangeInclusive<K>,
    entry: RangeEntry,
) -> Result<(), &'static str>
where
    K: Ord + Clone + rangemap::StepLite,
{
    if range.start() > range.end() {
        return Err("start_ip is greater than end_ip");
    }
    // Only fill the parts of the range no earlier row claimed.
    let gaps: Vec<RangeInclusive<K>> = map.gaps(&range).collect();
    for gap in gaps {
        map.insert(gap, entry.clone());
    }
    Ok(())
}

/// Splits an inclusive address range into the minimal list of CIDR blocks.
/// Mixed-family or reversed ranges yield an empty list.
pub fn summarize_range(start: IpAddr, end: IpAddr) -> Vec<IpNetwork> {
    match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => {
            summarize(u128::from(u32::from(s)), u128::from(u32::from(e)), 32)
                .into_iter()
                .filter_map(|(base, prefix)| {
                    IpNetwork::new(IpAddr::V4(Ipv4Addr::from(base as u32)), prefix).ok()
                })
                .collect()
        }
        (IpAddr::V6(s), IpAddr::V6(e)) => summarize(u128::from(s), u128::from(e), 128)
            .into_iter()
            .filter_map(|(base, prefix)| IpNetwork::new(IpAddr::V6(Ipv6Addr::from(base)), prefix).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn summarize(start: u128, end: u128, bits: u32) -> Vec<(u128, u8)> {
    let mut blocks = Vec::new();
    if start > end {
        return blocks;
    }

    let mut current = start;
    loop {
        let alignment = if current == 0 {
            bits
        } else {
            current.trailing_zeros().min(bits)
        };
        let remaining = end - current;
        let fits = match remaining.checked_add(1) {
            Some(count) => 127 - count.leading_zeros(),
            None => 128,
        };
        let size_bits = alignment.min(fits);
        blocks.push((current, (bits - size_bits) as u8));

        if size_bits >= 128 {
            break;
        }
        let last = current + ((1u128 << size_bits) - 1);
        if last >= end {
            break;
        }
        current = last + 1;
    }
    blocks
}
