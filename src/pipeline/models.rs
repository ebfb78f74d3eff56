//! Pipeline data models

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Status text of an address that has not been classified yet
pub const UNRESOLVED_MARKER: &str = "unchecked";

/// Status text of an address that failed the reachability probe
pub const UNREACHABLE_MARKER: &str = "unreachable";

/// Status text of an address whose country could not be determined
pub const UNKNOWN_MARKER: &str = "unknown";

/// Classification state of a collected address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IpStatus {
    #[default]
    Unresolved,
    /// Country code plus its display name from the country directory
    Classified { code: String, name: String },
    Unreachable,
    Unknown,
}

impl IpStatus {
    pub fn classified(code: impl Into<String>, name: impl Into<String>) -> Self {
        IpStatus::Classified {
            code: code.into(),
            name: name.into(),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, IpStatus::Unresolved)
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, IpStatus::Unreachable)
    }
}

impl fmt::Display for IpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpStatus::Unresolved => write!(f, "{}", UNRESOLVED_MARKER),
            IpStatus::Classified { code, name } => write!(f, "{}{}", code, name),
            IpStatus::Unreachable => write!(f, "{}", UNREACHABLE_MARKER),
            IpStatus::Unknown => write!(f, "{}", UNKNOWN_MARKER),
        }
    }
}

impl FromStr for IpStatus {
    type Err = std::convert::Infallible;

    /// Parsing never fails: anything that is not a marker is a composite
    /// classification whose first two characters are the country code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            UNRESOLVED_MARKER => IpStatus::Unresolved,
            UNREACHABLE_MARKER => IpStatus::Unreachable,
            UNKNOWN_MARKER => IpStatus::Unknown,
            other => {
                let split = other
                    .char_indices()
                    .nth(2)
                    .map_or(other.len(), |(idx, _)| idx);
                let (code, name) = other.split_at(split);
                IpStatus::classified(code, name)
            }
        };
        Ok(status)
    }
}

/// A collected address and its classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRecord {
    pub address: String,
    pub status: IpStatus,
}

impl IpRecord {
    pub fn new(address: String, status: IpStatus) -> Self {
        Self { address, status }
    }

    /// A freshly collected, not yet classified address
    pub fn unresolved(address: String) -> Self {
        Self::new(address, IpStatus::Unresolved)
    }

    /// Parse an `address#status` line, splitting on the first `#`
    pub fn parse_line(line: &str) -> Option<Self> {
        let (address, status) = line.trim().split_once('#')?;
        if address.is_empty() {
            return None;
        }
        let status = status.parse().unwrap_or_default();
        Some(Self::new(address.to_string(), status))
    }

    /// Render as an `address#status` line (without newline)
    pub fn to_line(&self) -> String {
        format!("{}#{}", self.address, self.status)
    }
}

impl fmt::Display for IpRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.status)
    }
}

/// Insertion-ordered set of records keyed by address.
///
/// Inserting an address that is already present replaces its status but keeps
/// its original position.
#[derive(Debug, Clone, Default)]
pub struct IpRecordSet {
    records: Vec<IpRecord>,
    index: HashMap<String, usize>,
}

impl IpRecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: IpRecord) {
        match self.index.get(&record.address) {
            Some(&pos) => self.records[pos].status = record.status,
            None => {
                self.index.insert(record.address.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, address: &str) -> Option<&IpRecord> {
        self.index.get(address).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, address: &str) -> bool {
        self.index.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut IpRecord> {
        self.records.iter_mut()
    }

    /// Stable sort by rendered status; ties keep insertion order
    pub fn sort_by_status(&mut self) {
        self.records
            .sort_by_cached_key(|record| record.status.to_string());
        self.reindex();
    }

    pub fn sort_by_address(&mut self) {
        self.records.sort_by(|a, b| a.address.cmp(&b.address));
        self.reindex();
    }

    pub fn into_records(self) -> Vec<IpRecord> {
        self.records
    }

    fn reindex(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.address.clone(), pos))
            .collect();
    }
}

impl FromIterator<IpRecord> for IpRecordSet {
    fn from_iter<T: IntoIterator<Item = IpRecord>>(iter: T) -> Self {
        let mut set = IpRecordSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

/// One row of the bandwidth scanner's result file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub address: String,
    /// Download speed in MB/s
    pub download_speed: f64,
}

impl ScanResult {
    pub fn new(address: String, download_speed: f64) -> Self {
        Self {
            address,
            download_speed,
        }
    }
}

/// Final entry of the annotated proxy list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub address: String,
    pub speed: f64,
    pub country_code: String,
    pub country_name: String,
}

impl ProxyRecord {
    pub fn new(address: String, speed: f64, country_code: String, country_name: String) -> Self {
        Self {
            address,
            speed,
            country_code,
            country_name,
        }
    }

    /// Record for an address whose country lookup degraded to unknown
    pub fn unknown(address: String, speed: f64) -> Self {
        Self::new(address, speed, String::new(), UNKNOWN_MARKER.to_string())
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{:.2}(MB/s){}{}",
            self.address, self.speed, self.country_code, self.country_name
        )
    }
}
