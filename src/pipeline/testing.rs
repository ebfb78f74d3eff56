//! Stub collaborators shared by the unit tests

use crate::pipeline::checker::ReachabilityProbe;
use crate::pipeline::collector::DomainResolver;
use crate::pipeline::geo::{GeoError, GeoLookup};
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Geo backend that replays a script, then repeats a fallback answer
pub struct ScriptedGeo {
    script: Mutex<VecDeque<std::result::Result<String, GeoError>>>,
    fallback: fn() -> std::result::Result<String, GeoError>,
    per_ip: HashMap<String, String>,
    calls: AtomicUsize,
}

impl ScriptedGeo {
    pub fn new(script: Vec<std::result::Result<String, GeoError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: || Err(GeoError::Timeout),
            per_ip: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_timeout() -> Self {
        Self::new(Vec::new())
    }

    pub fn country(code: &'static str) -> Self {
        Self::by_ip(&[]).with_default(code)
    }

    /// Answer with a fixed country per address; unlisted addresses get 404
    pub fn by_ip(entries: &[(&str, &str)]) -> Self {
        let mut geo = Self::new(Vec::new());
        geo.fallback = || Err(GeoError::Status(404));
        geo.per_ip = entries
            .iter()
            .map(|(ip, code)| (ip.to_string(), code.to_string()))
            .collect();
        geo
    }

    fn with_default(mut self, code: &'static str) -> Self {
        self.per_ip.insert("*".to_string(), code.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeoLookup for ScriptedGeo {
    async fn country_code(&self, ip: &str) -> std::result::Result<String, GeoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        if let Some(code) = self.per_ip.get(ip).or_else(|| self.per_ip.get("*")) {
            return Ok(code.clone());
        }
        (self.fallback)()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Probe with a fixed answer for every address, except the listed ones
pub struct StaticProbe {
    reachable: bool,
    exceptions: Vec<String>,
    calls: AtomicUsize,
}

impl StaticProbe {
    pub fn reachable() -> Self {
        Self {
            reachable: true,
            exceptions: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::reachable()
        }
    }

    /// Flip the answer for the given addresses
    pub fn except(mut self, addresses: &[&str]) -> Self {
        self.exceptions = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn is_reachable(&self, ip: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reachable != self.exceptions.iter().any(|a| a == ip)
    }
}

/// Resolver answering from a fixed table; unlisted domains fail
pub struct StaticResolver {
    answers: HashMap<String, Vec<String>>,
}

impl StaticResolver {
    pub fn new(entries: &[(&str, &[&str])]) -> Self {
        let answers = entries
            .iter()
            .map(|(domain, ips)| {
                (
                    domain.to_string(),
                    ips.iter().map(|ip| ip.to_string()).collect(),
                )
            })
            .collect();
        Self { answers }
    }
}

#[async_trait]
impl DomainResolver for StaticResolver {
    async fn resolve_ipv4(&self, domain: &str) -> Result<Vec<String>> {
        self.answers
            .get(domain)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no record found for {}", domain))
    }
}

/// Serve one canned HTTP response to every connection; returns the base URL
pub async fn serve_http(status: u16, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut request = Vec::new();
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}
