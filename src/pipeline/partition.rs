//! Allow/block partitioning of classified addresses

use crate::pipeline::models::IpRecord;
use crate::pipeline::parser::ListFile;
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Composite classifications (`<code><name>`) whose addresses are allowed
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: HashSet<String>,
}

impl AllowList {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("allow-list {} could not be read", path.display()))?;
        Ok(Self::parse(&content))
    }

    /// One entry per line; spaces are removed so entries match directory names
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(|line| line.trim().replace(' ', ""))
            .filter(|line| !line.is_empty())
            .collect();
        Self { entries }
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact match only, no prefix or code-only matching
    pub fn contains(&self, classification: &str) -> bool {
        self.entries.contains(classification)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Records split into their buckets, in input order
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub allowed: Vec<IpRecord>,
    pub blocked: Vec<IpRecord>,
    /// Subset of `blocked` that failed the reachability probe
    pub unreachable: Vec<IpRecord>,
}

/// Locations of the six partition outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionOutputs {
    pub allowed_ips: PathBuf,
    pub blocked_ips: PathBuf,
    pub allowed_with_country: PathBuf,
    pub blocked_with_country: PathBuf,
    pub unreachable_ips: PathBuf,
    pub unreachable_with_country: PathBuf,
}

impl PartitionOutputs {
    /// Address-only files under `ips_dir`, annotated files under `info_dir`
    pub fn in_dirs(ips_dir: &Path, info_dir: &Path) -> Self {
        Self {
            allowed_ips: ips_dir.join("allowed_ips.txt"),
            blocked_ips: ips_dir.join("blocked_ips.txt"),
            allowed_with_country: info_dir.join("allowed_ips_with_country.txt"),
            blocked_with_country: info_dir.join("blocked_ips_with_country.txt"),
            unreachable_ips: ips_dir.join("unreachable_ips.txt"),
            unreachable_with_country: info_dir.join("unreachable_ips_with_country.txt"),
        }
    }
}

impl Default for PartitionOutputs {
    fn default() -> Self {
        Self::in_dirs(Path::new("ips"), Path::new("ips_with_country"))
    }
}

/// Bucket sizes of one partition run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionReport {
    pub allowed: usize,
    pub blocked: usize,
    pub unreachable: usize,
}

pub struct Partitioner;

impl Partitioner {
    /// Split records: allowed first, then unreachable (also blocked), then blocked
    pub fn partition<'a, I>(records: I, allow: &AllowList) -> Partition
    where
        I: IntoIterator<Item = &'a IpRecord>,
    {
        let mut partition = Partition::default();

        for record in records {
            if allow.contains(&record.status.to_string()) {
                partition.allowed.push(record.clone());
            } else if record.status.is_unreachable() {
                partition.blocked.push(record.clone());
                partition.unreachable.push(record.clone());
            } else {
                partition.blocked.push(record.clone());
            }
        }

        partition
    }

    /// Parse the classified file, keeping only lines with exactly one `#`
    pub fn read_classified(path: &Path) -> Result<Vec<IpRecord>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("classified file {} could not be read", path.display()))?;
        Ok(content
            .lines()
            .filter(|line| line.trim().matches('#').count() == 1)
            .filter_map(IpRecord::parse_line)
            .collect())
    }

    /// Partition `input` and write the six output files
    pub fn run(input: &Path, allow_path: &Path, outputs: &PartitionOutputs) -> Result<PartitionReport> {
        let allow = AllowList::load(allow_path)?;
        let records = Self::read_classified(input)?;
        let partition = Self::partition(&records, &allow);

        for (ips_path, info_path, bucket) in [
            (&outputs.allowed_ips, &outputs.allowed_with_country, &partition.allowed),
            (&outputs.blocked_ips, &outputs.blocked_with_country, &partition.blocked),
            (
                &outputs.unreachable_ips,
                &outputs.unreachable_with_country,
                &partition.unreachable,
            ),
        ] {
            ListFile::write_lines(ips_path, sorted_addresses(bucket))?;
            ListFile::write_records(info_path, sorted_by_status(bucket))?;
        }

        let report = PartitionReport {
            allowed: partition.allowed.len(),
            blocked: partition.blocked.len(),
            unreachable: partition.unreachable.len(),
        };
        info!(
            allowed = report.allowed,
            blocked = report.blocked,
            unreachable = report.unreachable,
            "Partition complete"
        );
        Ok(report)
    }
}

/// Write the sorted, deduplicated address column of a classified file
pub fn extract_addresses(input: &Path, output: &Path) -> Result<usize> {
    let records = ListFile::read_records(input)?;
    let addresses: BTreeSet<&str> = records.iter().map(|r| r.address.as_str()).collect();
    ListFile::write_lines(output, &addresses)?;
    info!(output = %output.display(), count = addresses.len(), "Addresses extracted");
    Ok(addresses.len())
}

fn sorted_addresses(records: &[IpRecord]) -> Vec<&str> {
    let mut addresses: Vec<&str> = records.iter().map(|r| r.address.as_str()).collect();
    addresses.sort_unstable();
    addresses
}

fn sorted_by_status(records: &[IpRecord]) -> Vec<&IpRecord> {
    let mut sorted: Vec<&IpRecord> = records.iter().collect();
    sorted.sort_by_cached_key(|r| r.status.to_string());
    sorted
}
