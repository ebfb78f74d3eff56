//! Configuration for the geo-sift pipeline.
//!
//! Every field has a default, so an empty file (or none at all) reproduces
//! the classic working-directory layout.

use crate::logging::LoggingConfig;
use crate::pipeline::{
    DnsConfig, GeoConfig, PartitionOutputs, ProbeConfig, ResultsConfig, ScannerConfig,
};
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "geo-sift.yaml";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Input and output files.
    pub paths: PathsConfig,
    /// TCP reachability probe.
    pub probe: ProbeConfig,
    /// Geolocation backend and retry policy.
    pub geo: GeoConfig,
    /// Domain resolution.
    pub dns: DnsConfig,
    /// External bandwidth scanner.
    pub scanner: ScannerConfig,
    /// Scanner result post-processing.
    pub results: ResultsConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// File locations used by the stages.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// `code,name` country table.
    pub countries: PathBuf,
    /// Manually supplied addresses, one per line.
    pub manual_ips: PathBuf,
    /// Domains to resolve, one per line.
    pub domains: PathBuf,
    /// Allowed composite classifications, one per line.
    pub allowed_countries: PathBuf,
    /// Collected and classified `address#status` records.
    pub all_ips_with_country: PathBuf,
    /// Address column of the classified records.
    pub all_ips: PathBuf,
    /// The six partition outputs.
    pub partition: PartitionOutputs,
    /// Addresses that passed the speed filter.
    pub proxy_ips: PathBuf,
    /// Final annotated proxy list.
    pub proxy_with_country: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            countries: PathBuf::from("countries.txt"),
            manual_ips: PathBuf::from("Manual_input_IP.txt"),
            domains: PathBuf::from("domains.txt"),
            allowed_countries: PathBuf::from("allowed_countries.txt"),
            all_ips_with_country: PathBuf::from("ips_with_country/all_ips_with_country.txt"),
            all_ips: PathBuf::from("ips/all_ips.txt"),
            partition: PartitionOutputs::default(),
            proxy_ips: PathBuf::from("proxyip.txt"),
            proxy_with_country: PathBuf::from("proxyip_with_country.txt"),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("failed to parse configuration {}", path.display()))
    }

    /// Parse configuration from YAML text.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load `path` when given, else `geo-sift.yaml` if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => Ok(Self::default()),
        }
    }

    /// Default configuration rendered as YAML.
    pub fn example() -> String {
        serde_yaml::to_string(&Self::default()).unwrap_or_default()
    }
}
