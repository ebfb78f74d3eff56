//! Geolocation lookups: the ipinfo.io JSON API or a local MaxMind database

use crate::Result;
use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default geo-IP endpoint; requests go to `<endpoint>/<ip>/json`
const DEFAULT_ENDPOINT: &str = "https://ipinfo.io";

/// Default timeout for a single geo-IP request in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of attempts for a lookup that keeps failing in transit
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default pause between two attempts in milliseconds
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Error from a geolocation backend.
#[derive(Debug)]
pub enum GeoError {
    /// Transport-level HTTP failure.
    Http(reqwest::Error),
    /// Request timed out.
    Timeout,
    /// The service answered with a status other than 200.
    Status(u16),
    /// The body could not be decoded.
    InvalidResponse(String),
    /// The answer carried no country code.
    MissingCountry,
    /// Local database failure.
    Database(String),
}

impl GeoError {
    /// Only transport failures are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, GeoError::Http(_) | GeoError::Timeout)
    }
}

impl std::fmt::Display for GeoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoError::Http(e) => write!(f, "HTTP error: {}", e),
            GeoError::Timeout => write!(f, "Request timed out"),
            GeoError::Status(code) => write!(f, "Unexpected HTTP status: {}", code),
            GeoError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            GeoError::MissingCountry => write!(f, "No country in response"),
            GeoError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for GeoError {}

impl From<reqwest::Error> for GeoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GeoError::Timeout
        } else {
            GeoError::Http(e)
        }
    }
}

/// A source of country codes for IP addresses.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// ISO 3166-1 alpha-2 country code of `ip`.
    async fn country_code(&self, ip: &str) -> std::result::Result<String, GeoError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Result of a lookup once the retry policy has run its course
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoOutcome {
    Country(String),
    Unknown,
}

/// Fixed-count, fixed-delay retry policy for transient lookup failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Query `lookup` for `ip`, retrying transient failures per `policy`.
///
/// A non-transient failure (bad status, undecodable body, no country) ends
/// the lookup at once; running out of attempts degrades to `Unknown` too.
pub async fn lookup_with_retry(
    lookup: &dyn GeoLookup,
    ip: &str,
    policy: &RetryPolicy,
) -> GeoOutcome {
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        match lookup.country_code(ip).await {
            Ok(code) => {
                debug!(ip, country = %code, provider = lookup.name(), "Geo lookup complete");
                return GeoOutcome::Country(code);
            }
            Err(e) if e.is_transient() => {
                warn!(ip, attempt, max_attempts = attempts, error = %e, "Geo lookup failed");
                if attempt < attempts {
                    tokio::time::sleep(policy.delay()).await;
                }
            }
            Err(e) => {
                warn!(ip, provider = lookup.name(), error = %e, "Geo lookup gave no country");
                return GeoOutcome::Unknown;
            }
        }
    }

    warn!(ip, attempts, "Geo lookup retries exhausted");
    GeoOutcome::Unknown
}

/// Which backend answers geo lookups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoProvider {
    #[default]
    Ipinfo,
    Mmdb,
}

/// Geolocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub provider: GeoProvider,
    /// Base URL of the JSON API
    pub endpoint: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// MaxMind database used by the `mmdb` provider
    pub mmdb_path: Option<PathBuf>,
    pub retry: RetryPolicy,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            provider: GeoProvider::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            mmdb_path: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl GeoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the configured backend
    pub fn build_lookup(&self) -> Result<Arc<dyn GeoLookup>> {
        match self.provider {
            GeoProvider::Ipinfo => Ok(Arc::new(IpInfoClient::new(&self.endpoint, self.timeout())?)),
            GeoProvider::Mmdb => {
                let path = self
                    .mmdb_path
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("geo.mmdb_path is required for the mmdb provider"))?;
                Ok(Arc::new(MmdbLookup::from_path(path)?))
            }
        }
    }
}

/// Relevant part of an ipinfo.io answer
#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    country: Option<String>,
}

/// Client for the ipinfo.io-style `GET <endpoint>/<ip>/json` API
pub struct IpInfoClient {
    client: Client,
    endpoint: String,
}

impl IpInfoClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Use an already configured HTTP client
    pub fn with_client(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, ip: &str) -> String {
        format!("{}/{}/json", self.endpoint, ip)
    }
}

#[async_trait]
impl GeoLookup for IpInfoClient {
    async fn country_code(&self, ip: &str) -> std::result::Result<String, GeoError> {
        let response = self.client.get(self.url(ip)).send().await?;

        if response.status() != StatusCode::OK {
            return Err(GeoError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let info: IpInfoResponse = serde_json::from_str(&body)
            .map_err(|e| GeoError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        info.country
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .ok_or(GeoError::MissingCountry)
    }

    fn name(&self) -> &str {
        "ipinfo"
    }
}

/// Offline lookups against a GeoIP2/GeoLite2 database
pub struct MmdbLookup {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MmdbLookup {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }
}

#[async_trait]
impl GeoLookup for MmdbLookup {
    async fn country_code(&self, ip: &str) -> std::result::Result<String, GeoError> {
        let addr: IpAddr = ip
            .parse()
            .map_err(|_| GeoError::InvalidResponse(format!("not an IP address: {}", ip)))?;

        let lookup_result = self
            .reader
            .lookup(addr)
            .map_err(|e| GeoError::Database(e.to_string()))?;
        let city: Option<geoip2::City> = lookup_result
            .decode()
            .map_err(|e| GeoError::Database(e.to_string()))?;

        city.and_then(|city| city.country.iso_code.map(String::from))
            .ok_or(GeoError::MissingCountry)
    }

    fn name(&self) -> &str {
        "mmdb"
    }
}
