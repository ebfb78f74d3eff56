//! Reachability probing and country classification of collected addresses

use crate::pipeline::country::CountryDirectory;
use crate::pipeline::geo::{lookup_with_retry, GeoLookup, GeoOutcome, RetryPolicy};
use crate::pipeline::models::IpStatus;
use crate::pipeline::parser::ListFile;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Default port probed before any geo lookup
const DEFAULT_PROBE_PORT: u16 = 443;

/// Default timeout for the TCP probe in milliseconds
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;

/// Configuration for the reachability probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub port: u16,
    /// Connect timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PROBE_PORT,
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Decides whether an address is worth a geo lookup.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, ip: &str) -> bool;
}

/// Plain TCP connect on a fixed port
pub struct TcpProbe {
    config: ProbeConfig,
}

impl TcpProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self, ip: &str) -> bool {
        let connect = TcpStream::connect((ip, self.config.port));
        match tokio::time::timeout(self.config.timeout(), connect).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(ip, port = self.config.port, error = %e, "TCP probe refused");
                false
            }
            Err(_) => {
                debug!(ip, port = self.config.port, "TCP probe timed out");
                false
            }
        }
    }
}

/// Counters of one classification run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyReport {
    pub total: usize,
    pub classified: usize,
    pub unreachable: usize,
    pub unknown: usize,
    /// Records that already carried a status and were left alone
    pub skipped: usize,
}

/// Classifies addresses by probing them and looking up their country
pub struct IpClassifier {
    probe: Arc<dyn ReachabilityProbe>,
    geo: Arc<dyn GeoLookup>,
    countries: Arc<CountryDirectory>,
    retry: RetryPolicy,
}

impl IpClassifier {
    pub fn new(
        probe: Arc<dyn ReachabilityProbe>,
        geo: Arc<dyn GeoLookup>,
        countries: Arc<CountryDirectory>,
    ) -> Self {
        Self {
            probe,
            geo,
            countries,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Classify a single address; unreachable hosts never reach the geo backend
    pub async fn classify_ip(&self, ip: &str) -> IpStatus {
        if !self.probe.is_reachable(ip).await {
            info!(ip, "Address unreachable, skipping country lookup");
            return IpStatus::Unreachable;
        }

        match lookup_with_retry(self.geo.as_ref(), ip, &self.retry).await {
            GeoOutcome::Country(code) => {
                let name = self.countries.name(&code).to_string();
                info!(ip, country = %format!("{}{}", code, name), "Country detected");
                IpStatus::Classified { code, name }
            }
            GeoOutcome::Unknown => IpStatus::Unknown,
        }
    }

    /// Classify every unresolved record of `input` and write the whole set,
    /// sorted by status, to `output` (which may be the same file).
    pub async fn classify_file(&self, input: &Path, output: &Path) -> Result<ClassifyReport> {
        let mut records = ListFile::read_records(input)?;
        let mut report = ClassifyReport {
            total: records.len(),
            ..Default::default()
        };

        for record in records.iter_mut() {
            if !record.status.is_unresolved() {
                report.skipped += 1;
                continue;
            }

            record.status = self.classify_ip(&record.address).await;
            match record.status {
                IpStatus::Classified { .. } => report.classified += 1,
                IpStatus::Unreachable => report.unreachable += 1,
                IpStatus::Unknown => report.unknown += 1,
                IpStatus::Unresolved => {}
            }
        }

        records.sort_by_status();
        ListFile::write_records(output, records.iter())?;

        info!(
            output = %output.display(),
            classified = report.classified,
            unreachable = report.unreachable,
            unknown = report.unknown,
            skipped = report.skipped,
            "Country detection finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{ScriptedGeo, StaticProbe};
    use std::fs;
    use tokio::net::TcpListener;

    fn directory() -> Arc<CountryDirectory> {
        Arc::new(CountryDirectory::from_entries([
            ("US", "United States"),
            ("DE", "Germany"),
        ]))
    }

    fn classifier(probe: Arc<StaticProbe>, geo: Arc<ScriptedGeo>) -> IpClassifier {
        IpClassifier::new(probe, geo, directory()).with_retry(RetryPolicy::new(3, Duration::ZERO))
    }

    #[test]
    fn test_probe_config_default() {
        let config = ProbeConfig::default();
        assert_eq!(config.port, DEFAULT_PROBE_PORT);
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_probe_config_builder() {
        let config = ProbeConfig::new()
            .with_port(8443)
            .with_timeout(Duration::from_secs(2));
        assert_eq!(config.port, 8443);
        assert_eq!(config.timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_sub_second_probe_timeout() {
        let config = ProbeConfig::new().with_timeout(Duration::from_millis(500));
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.timeout(), Duration::from_millis(500));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::new(config.with_port(port));
        assert!(probe.is_reachable("127.0.0.1").await);
    }

    #[tokio::test]
    async fn test_tcp_probe_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::new(ProbeConfig::new().with_port(port));
        assert!(probe.is_reachable("127.0.0.1").await);

        drop(listener);
        assert!(!probe.is_reachable("127.0.0.1").await);
    }

    #[tokio::test]
    async fn test_unreachable_skips_geo_lookup() {
        let probe = Arc::new(StaticProbe::unreachable());
        let geo = Arc::new(ScriptedGeo::country("US"));
        let status = classifier(probe.clone(), geo.clone()).classify_ip("1.1.1.1").await;
        assert_eq!(status, IpStatus::Unreachable);
        assert_eq!(status.to_string(), "unreachable");
        assert_eq!(probe.calls(), 1);
        assert_eq!(geo.calls(), 0);
    }

    #[tokio::test]
    async fn test_classify_composes_directory_name() {
        let geo = Arc::new(ScriptedGeo::country("US"));
        let status = classifier(Arc::new(StaticProbe::reachable()), geo)
            .classify_ip("1.1.1.1")
            .await;
        assert_eq!(status.to_string(), "USUnitedStates");

        let geo = Arc::new(ScriptedGeo::country("FR"));
        let status = classifier(Arc::new(StaticProbe::reachable()), geo)
            .classify_ip("2.2.2.2")
            .await;
        assert_eq!(status.to_string(), "FRunknown");
    }

    #[tokio::test]
    async fn test_persistent_failure_is_unknown_after_max_attempts() {
        let geo = Arc::new(ScriptedGeo::always_timeout());
        let status = classifier(Arc::new(StaticProbe::reachable()), geo.clone())
            .classify_ip("1.1.1.1")
            .await;
        assert_eq!(status, IpStatus::Unknown);
        assert_eq!(geo.calls(), 3);
    }

    #[tokio::test]
    async fn test_classify_file_only_touches_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.txt");
        fs::write(
            &path,
            "1.1.1.1#unchecked\n2.2.2.2#DEGermany\n3.3.3.3#unchecked\n4.4.4.4#unchecked\n",
        )
        .unwrap();

        let probe = Arc::new(StaticProbe::reachable().except(&["3.3.3.3"]));
        let geo = Arc::new(ScriptedGeo::by_ip(&[("1.1.1.1", "US")]));
        let report = classifier(probe, geo.clone())
            .classify_file(&path, &path)
            .await
            .unwrap();

        assert_eq!(report.total, 4);
        assert_eq!(report.classified, 1);
        assert_eq!(report.unreachable, 1);
        assert_eq!(report.unknown, 1);
        assert_eq!(report.skipped, 1);
        // 2.2.2.2 was never looked up, 3.3.3.3 never probed past TCP
        assert_eq!(geo.calls(), 2);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "2.2.2.2#DEGermany\n1.1.1.1#USUnitedStates\n4.4.4.4#unknown\n3.3.3.3#unreachable\n"
        );
    }

    #[tokio::test]
    async fn test_classify_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.txt");
        fs::write(&path, "1.1.1.1#unchecked\n8.8.8.8#unchecked\n9.9.9.9#unchecked\n").unwrap();

        let geo = Arc::new(ScriptedGeo::by_ip(&[("1.1.1.1", "US"), ("9.9.9.9", "DE")]));
        let probe = Arc::new(StaticProbe::reachable());
        let classifier = classifier(probe, geo.clone());

        classifier.classify_file(&path, &path).await.unwrap();
        let first = fs::read(&path).unwrap();
        let calls = geo.calls();

        let report = classifier.classify_file(&path, &path).await.unwrap();
        assert_eq!(report.skipped, 3);
        assert_eq!(geo.calls(), calls);
        assert_eq!(fs::read(&path).unwrap(), first);
    }
}
