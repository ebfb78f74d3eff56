//! Candidate address collection from a manual list and DNS A records

use crate::pipeline::models::{IpRecord, IpRecordSet};
use crate::pipeline::parser::ListFile;
use crate::Result;
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout of a single DNS query in seconds
const DEFAULT_DNS_TIMEOUT_SECS: u64 = 10;

/// Default bound on the whole resolution of one domain in seconds
const DEFAULT_DNS_LIFETIME_SECS: u64 = 15;

/// DNS settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Timeout of one query
    pub timeout_secs: u64,
    /// Bound on the total time spent resolving one domain
    pub lifetime_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_DNS_TIMEOUT_SECS,
            lifetime_secs: DEFAULT_DNS_LIFETIME_SECS,
        }
    }
}

impl DnsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }
}

/// Something that turns a domain name into IPv4 addresses.
#[async_trait]
pub trait DomainResolver: Send + Sync {
    async fn resolve_ipv4(&self, domain: &str) -> Result<Vec<String>>;
}

/// A-record resolver backed by hickory with its default upstream servers
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
    lifetime: Duration,
}

impl DnsResolver {
    pub fn new(config: &DnsConfig) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = config.timeout();

        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
            lifetime: config.lifetime(),
        }
    }
}

#[async_trait]
impl DomainResolver for DnsResolver {
    async fn resolve_ipv4(&self, domain: &str) -> Result<Vec<String>> {
        let lookup = tokio::time::timeout(self.lifetime, self.resolver.ipv4_lookup(domain))
            .await
            .map_err(|_| anyhow::anyhow!("resolution timed out after {:?}", self.lifetime))??;

        Ok(lookup.iter().map(|a| a.0.to_string()).collect())
    }
}

/// Counters of one collection run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub manual: usize,
    pub resolved: usize,
    pub failed_domains: Vec<String>,
    pub unique: usize,
    /// Addresses whose earlier classification was carried over
    pub preserved: usize,
}

/// Merges manual and resolved addresses into the `address#status` file
pub struct IpCollector {
    resolver: Arc<dyn DomainResolver>,
    preserve_existing: bool,
}

impl IpCollector {
    pub fn new(resolver: Arc<dyn DomainResolver>) -> Self {
        Self {
            resolver,
            preserve_existing: true,
        }
    }

    /// Keep classifications already present in the output file (default on)
    pub fn with_preserve_existing(mut self, preserve: bool) -> Self {
        self.preserve_existing = preserve;
        self
    }

    /// Resolve every domain; one domain failing never stops the others
    pub async fn resolve_domains(&self, domains: &[String]) -> (Vec<String>, Vec<String>) {
        let mut addresses = Vec::new();
        let mut failed = Vec::new();

        for domain in domains {
            info!(domain = %domain, "Resolving domain");
            match self.resolver.resolve_ipv4(domain).await {
                Ok(found) => {
                    debug!(domain = %domain, count = found.len(), "Domain resolved");
                    addresses.extend(found);
                }
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Domain resolution failed");
                    failed.push(domain.clone());
                }
            }
        }

        (addresses, failed)
    }

    /// Deduplicate and sort lexicographically
    pub fn merge(manual: &[String], resolved: &[String]) -> Vec<String> {
        manual
            .iter()
            .chain(resolved)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Collect from both (optional) input files and write `output`
    pub async fn collect(
        &self,
        manual_path: &Path,
        domains_path: &Path,
        output: &Path,
    ) -> Result<CollectReport> {
        let manual = ListFile::read_optional_values(manual_path)?;
        let domains = ListFile::read_optional_values(domains_path)?;

        let (resolved, failed_domains) = self.resolve_domains(&domains).await;
        let addresses = Self::merge(&manual, &resolved);

        let previous = if self.preserve_existing && output.exists() {
            ListFile::read_records(output)?
        } else {
            IpRecordSet::new()
        };

        let mut preserved = 0;
        let records: Vec<IpRecord> = addresses
            .into_iter()
            .map(|address| match previous.get(&address) {
                Some(existing) if !existing.status.is_unresolved() => {
                    preserved += 1;
                    existing.clone()
                }
                _ => IpRecord::unresolved(address),
            })
            .collect();

        ListFile::write_records(output, &records)?;

        let report = CollectReport {
            manual: manual.len(),
            resolved: resolved.len(),
            failed_domains,
            unique: records.len(),
            preserved,
        };
        info!(
            output = %output.display(),
            unique = report.unique,
            preserved = report.preserved,
            "Collected addresses saved"
        );
        Ok(report)
    }
}
