//! IP classification pipeline
//!
//! This module provides functionality for:
//! - Collecting candidate addresses from a manual list and DNS A records
//! - Probing reachability and classifying addresses by country
//! - Splitting classified addresses by a country allow-list
//! - Handing the allowed addresses to an external bandwidth scanner
//! - Turning the scanner's results into a ranked, annotated proxy list

pub mod checker;
pub mod collector;
pub mod country;
pub mod geo;
pub mod models;
pub mod parser;
pub mod partition;
pub mod results;
pub mod runner;
pub mod scanner;

#[cfg(test)]
pub(crate) mod testing;

pub use checker::{ClassifyReport, IpClassifier, ProbeConfig, ReachabilityProbe, TcpProbe};
pub use collector::{CollectReport, DnsConfig, DnsResolver, DomainResolver, IpCollector};
pub use country::CountryDirectory;
pub use geo::{
    lookup_with_retry, GeoConfig, GeoError, GeoLookup, GeoOutcome, GeoProvider, IpInfoClient,
    MmdbLookup, RetryPolicy,
};
pub use models::{IpRecord, IpRecordSet, IpStatus, ProxyRecord, ScanResult};
pub use parser::ListFile;
pub use partition::{AllowList, Partition, PartitionOutputs, PartitionReport, Partitioner};
pub use results::{ProcessReport, ResultProcessor, ResultsConfig};
pub use runner::{Pipeline, RunOptions, RunSummary};
pub use scanner::{LaunchMode, ScannerBridge, ScannerConfig};
