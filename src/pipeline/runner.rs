//! Runs the stages in order, with their fatal and non-fatal failure modes

use crate::config::Config;
use crate::pipeline::checker::{ClassifyReport, IpClassifier, ReachabilityProbe, TcpProbe};
use crate::pipeline::collector::{CollectReport, DnsResolver, DomainResolver, IpCollector};
use crate::pipeline::country::CountryDirectory;
use crate::pipeline::geo::GeoLookup;
use crate::pipeline::partition::{extract_addresses, PartitionReport, Partitioner};
use crate::pipeline::results::{ProcessReport, ResultProcessor};
use crate::pipeline::scanner::{LaunchMode, ScannerBridge};
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Options of a full pipeline run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub mode: LaunchMode,
    /// Reset earlier classifications instead of keeping them
    pub fresh: bool,
}

/// What a full run produced
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub collect: CollectReport,
    pub classify: ClassifyReport,
    pub extracted: usize,
    /// `None` when the partition stage reported an error
    pub partition: Option<PartitionReport>,
    /// `None` in detached mode, and when the scanner was skipped
    pub process: Option<ProcessReport>,
}

/// The collection → classification → partition → scan → post-processing chain
pub struct Pipeline {
    config: Config,
    countries: Arc<CountryDirectory>,
    geo: Arc<dyn GeoLookup>,
    probe: Arc<dyn ReachabilityProbe>,
    resolver: Arc<dyn DomainResolver>,
}

impl Pipeline {
    /// Build a pipeline with the real network backends.
    ///
    /// Fails when the country table cannot be loaded.
    pub fn new(config: Config) -> Result<Self> {
        let countries = Arc::new(CountryDirectory::load(&config.paths.countries)?);
        info!(
            path = %config.paths.countries.display(),
            countries = countries.len(),
            "Country table loaded"
        );
        let geo = config.geo.build_lookup()?;
        let probe = Arc::new(TcpProbe::new(config.probe.clone()));
        let resolver = Arc::new(DnsResolver::new(&config.dns));
        Ok(Self::with_backends(config, countries, geo, probe, resolver))
    }

    pub fn with_backends(
        config: Config,
        countries: Arc<CountryDirectory>,
        geo: Arc<dyn GeoLookup>,
        probe: Arc<dyn ReachabilityProbe>,
        resolver: Arc<dyn DomainResolver>,
    ) -> Self {
        Self {
            config,
            countries,
            geo,
            probe,
            resolver,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn collect(&self, fresh: bool) -> Result<CollectReport> {
        let paths = &self.config.paths;
        IpCollector::new(self.resolver.clone())
            .with_preserve_existing(!fresh)
            .collect(&paths.manual_ips, &paths.domains, &paths.all_ips_with_country)
            .await
    }

    pub async fn classify(&self) -> Result<ClassifyReport> {
        let path = &self.config.paths.all_ips_with_country;
        IpClassifier::new(self.probe.clone(), self.geo.clone(), self.countries.clone())
            .with_retry(self.config.geo.retry.clone())
            .classify_file(path, path)
            .await
    }

    pub fn extract(&self) -> Result<usize> {
        let paths = &self.config.paths;
        extract_addresses(&paths.all_ips_with_country, &paths.all_ips)
    }

    /// Partition the classified file. Errors are reported, not propagated.
    pub fn partition(&self) -> Option<PartitionReport> {
        let paths = &self.config.paths;
        match Partitioner::run(
            &paths.all_ips_with_country,
            &paths.allowed_countries,
            &paths.partition,
        ) {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %format!("{:#}", e), "Partition failed");
                None
            }
        }
    }

    pub async fn scan(&self, mode: LaunchMode) -> Result<Option<PathBuf>> {
        ScannerBridge::new(self.config.scanner.clone())
            .run(&self.config.paths.partition.allowed_ips, mode)
            .await
    }

    pub async fn process(&self) -> Result<ProcessReport> {
        let paths = &self.config.paths;
        ResultProcessor::new(
            self.config.results.clone(),
            self.geo.clone(),
            self.countries.clone(),
        )
        .with_retry(self.config.geo.retry.clone())
        .process(
            &self.config.scanner.result_path(),
            &paths.proxy_ips,
            &paths.proxy_with_country,
        )
        .await
    }

    /// Run every stage in order
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary> {
        let collect = self.collect(options.fresh).await?;
        let classify = self.classify().await?;
        let extracted = self.extract()?;
        let partition = self.partition();

        // An allowed list left over from an earlier run must not be scanned
        let process = if partition.is_none() {
            warn!("Partition failed, scanner not started");
            None
        } else {
            match self.scan(options.mode).await? {
                Some(_) => Some(self.process().await?),
                None => None,
            }
        };

        Ok(RunSummary {
            collect,
            classify,
            extracted,
            partition,
            process,
        })
    }
}
