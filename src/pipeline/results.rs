//! Post-processing of the bandwidth scanner's CSV output

use crate::pipeline::country::CountryDirectory;
use crate::pipeline::geo::{lookup_with_retry, GeoLookup, GeoOutcome, RetryPolicy};
use crate::pipeline::models::{ProxyRecord, ScanResult};
use crate::pipeline::parser::ListFile;
use crate::Result;
use anyhow::{anyhow, bail, Context};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Default minimum download speed (exclusive) in MB/s
const DEFAULT_SPEED_THRESHOLD: f64 = 10.0;

/// Header of the address column written by the scanner
const DEFAULT_IP_COLUMN: &str = "IP Address";

/// Header of the download speed column written by the scanner
const DEFAULT_SPEED_COLUMN: &str = "Download Speed (MB/s)";

/// Settings for reading the scanner's result file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Rows must be strictly faster than this to survive
    pub speed_threshold: f64,
    pub ip_column: String,
    pub speed_column: String,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            speed_threshold: DEFAULT_SPEED_THRESHOLD,
            ip_column: DEFAULT_IP_COLUMN.to_string(),
            speed_column: DEFAULT_SPEED_COLUMN.to_string(),
        }
    }
}

impl ResultsConfig {
    pub fn with_speed_threshold(mut self, threshold: f64) -> Self {
        self.speed_threshold = threshold;
        self
    }
}

/// Tab when the header line contains one, comma otherwise
pub fn detect_delimiter(first_line: &str) -> u8 {
    if first_line.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

/// Counters of one post-processing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub rows: usize,
    pub skipped_rows: usize,
    pub fast: usize,
    pub unknown_country: usize,
}

/// Turns scanner output into the final, country-annotated proxy list
pub struct ResultProcessor {
    config: ResultsConfig,
    geo: Arc<dyn GeoLookup>,
    countries: Arc<CountryDirectory>,
    retry: RetryPolicy,
}

impl ResultProcessor {
    pub fn new(
        config: ResultsConfig,
        geo: Arc<dyn GeoLookup>,
        countries: Arc<CountryDirectory>,
    ) -> Self {
        Self {
            config,
            geo,
            countries,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Parse scanner rows. Rows whose speed does not parse, or that have no
    /// address, are skipped with a warning; the second value counts them.
    pub fn parse_scan_results(&self, content: &str) -> Result<(Vec<ScanResult>, usize)> {
        let first_line = content.lines().next().unwrap_or_default();
        let mut reader = ReaderBuilder::new()
            .delimiter(detect_delimiter(first_line))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = reader.headers().context("scanner result has no header")?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}') == name)
                .ok_or_else(|| anyhow!("scanner result has no '{}' column", name))
        };
        let ip_idx = column(&self.config.ip_column)?;
        let speed_idx = column(&self.config.speed_column)?;

        let mut results = Vec::new();
        let mut skipped = 0;
        for (line, row) in reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(row = line + 1, error = %e, "Unreadable scanner row");
                    skipped += 1;
                    continue;
                }
            };

            let address = row.get(ip_idx).unwrap_or_default();
            let speed = row.get(speed_idx).unwrap_or("0");
            match speed.parse::<f64>() {
                Ok(speed) if !address.is_empty() => {
                    results.push(ScanResult::new(address.to_string(), speed));
                }
                Ok(_) => {
                    warn!(row = line + 1, "Scanner row without address");
                    skipped += 1;
                }
                Err(e) => {
                    warn!(row = line + 1, speed, error = %e, "Invalid download speed");
                    skipped += 1;
                }
            }
        }

        Ok((results, skipped))
    }

    /// Keep rows strictly above the threshold, fastest first
    pub fn filter_fast(&self, results: Vec<ScanResult>) -> Vec<ScanResult> {
        let mut fast: Vec<ScanResult> = results
            .into_iter()
            .filter(|r| r.download_speed > self.config.speed_threshold)
            .collect();
        fast.sort_by(|a, b| b.download_speed.total_cmp(&a.download_speed));
        fast
    }

    /// Look up the country of a surviving address; no reachability probe,
    /// the scanner already reached it.
    pub async fn annotate(&self, result: &ScanResult) -> ProxyRecord {
        match lookup_with_retry(self.geo.as_ref(), &result.address, &self.retry).await {
            GeoOutcome::Country(code) => {
                let name = self.countries.name(&code).to_string();
                ProxyRecord::new(result.address.clone(), result.download_speed, code, name)
            }
            GeoOutcome::Unknown => {
                ProxyRecord::unknown(result.address.clone(), result.download_speed)
            }
        }
    }

    /// Read `input`, write surviving addresses to `proxy_ips` and the
    /// annotated list to `proxy_with_country`
    pub async fn process(
        &self,
        input: &Path,
        proxy_ips: &Path,
        proxy_with_country: &Path,
    ) -> Result<ProcessReport> {
        if !input.is_file() {
            bail!(
                "scanner result {} not found; did the scanner run?",
                input.display()
            );
        }
        let content = fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input.display()))?;

        let (results, skipped_rows) = self.parse_scan_results(&content)?;
        let rows = results.len() + skipped_rows;
        let fast = self.filter_fast(results);

        ListFile::write_lines(proxy_ips, fast.iter().map(|r| r.address.as_str()))?;
        info!(
            output = %proxy_ips.display(),
            count = fast.len(),
            threshold = self.config.speed_threshold,
            "Fast addresses saved"
        );

        let mut records = Vec::with_capacity(fast.len());
        for result in &fast {
            let record = self.annotate(result).await;
            info!(proxy = %record, "Proxy annotated");
            records.push(record);
        }
        let unknown_country = records
            .iter()
            .filter(|r| r.country_code.is_empty())
            .count();

        ListFile::write_lines(proxy_with_country, records.iter().map(ProxyRecord::to_string))?;
        info!(output = %proxy_with_country.display(), count = records.len(), "Proxy list saved");

        Ok(ProcessReport {
            rows,
            skipped_rows,
            fast: fast.len(),
            unknown_country,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedGeo;
    use std::time::Duration;

    fn processor(geo: Arc<ScriptedGeo>) -> ResultProcessor {
        let countries = Arc::new(CountryDirectory::from_entries([
            ("US", "United States"),
            ("JP", "Japan"),
        ]));
        ResultProcessor::new(ResultsConfig::default(), geo, countries)
            .with_retry(RetryPolicy::new(2, Duration::ZERO))
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("IP Address\tDownload Speed (MB/s)"), b'\t');
        assert_eq!(detect_delimiter("IP Address,Download Speed (MB/s)"), b',');
        assert_eq!(detect_delimiter(""), b',');
    }

    #[test]
    fn test_speed_threshold_is_exclusive() {
        let p = processor(Arc::new(ScriptedGeo::country("US")));
        let results = vec![
            ScanResult::new("1.1.1.1".into(), 5.0),
            ScanResult::new("2.2.2.2".into(), 10.01),
            ScanResult::new("3.3.3.3".into(), 15.0),
            ScanResult::new("4.4.4.4".into(), 10.0),
        ];
        let fast = p.filter_fast(results);
        let addresses: Vec<_> = fast.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(addresses, vec!["3.3.3.3", "2.2.2.2"]);
    }

    #[test]
    fn test_parse_tab_delimited_with_bad_rows() {
        let p = processor(Arc::new(ScriptedGeo::country("US")));
        let content = "IP Address\tSent\tDownload Speed (MB/s)\n\
                       1.1.1.1\t4\t12.5\n\
                       2.2.2.2\t4\tn/a\n\
                       \t4\t30\n\
                       3.3.3.3\t4\t 9.9 \n";
        let (results, skipped) = p.parse_scan_results(content).unwrap();
        assert_eq!(skipped, 2);
        assert_eq!(
            results,
            vec![
                ScanResult::new("1.1.1.1".into(), 12.5),
                ScanResult::new("3.3.3.3".into(), 9.9),
            ]
        );
    }

    #[test]
    fn test_parse_missing_column_is_error() {
        let p = processor(Arc::new(ScriptedGeo::country("US")));
        let err = p.parse_scan_results("IP,Speed\n1.1.1.1,20\n").unwrap_err();
        assert!(err.to_string().contains("IP Address"));
    }

    #[tokio::test]
    async fn test_process_pinned_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let input = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/result.csv");
        let proxy_ips = dir.path().join("proxyip.txt");
        let with_country = dir.path().join("proxyip_with_country.txt");

        let geo = Arc::new(ScriptedGeo::by_ip(&[
            ("104.16.1.10", "US"),
            ("172.64.2.20", "JP"),
        ]));
        let report = processor(geo.clone())
            .process(&input, &proxy_ips, &with_country)
            .await
            .unwrap();

        assert_eq!(report.rows, 5);
        assert_eq!(report.skipped_rows, 1);
        assert_eq!(report.fast, 3);
        assert_eq!(report.unknown_country, 1);
        assert_eq!(
            fs::read_to_string(&proxy_ips).unwrap(),
            "172.64.2.20\n104.16.3.30\n104.16.1.10\n"
        );
        assert_eq!(
            fs::read_to_string(&with_country).unwrap(),
            "172.64.2.20#25.31(MB/s)JPJapan\n\
             104.16.3.30#18.00(MB/s)unknown\n\
             104.16.1.10#12.46(MB/s)USUnitedStates\n"
        );
    }

    #[tokio::test]
    async fn test_process_missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let p = processor(Arc::new(ScriptedGeo::country("US")));
        let result = p
            .process(
                &dir.path().join("result.csv"),
                &dir.path().join("a.txt"),
                &dir.path().join("b.txt"),
            )
            .await;
        assert!(result.is_err());
    }
}
