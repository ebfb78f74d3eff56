//! Hand-off to the external bandwidth scanner

use crate::pipeline::parser::ensure_parent_dir;
use crate::Result;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{info, warn};

/// Default timeout for the scanner's result file in milliseconds
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 600_000;

/// Default interval between two checks for the result file in milliseconds
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default time a result file must stay unchanged while the scanner is
/// still running before it is taken as complete, in milliseconds
const DEFAULT_SETTLE_MS: u64 = 10_000;

/// Scanner location and invocation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Folder the scanner runs in
    pub dir: PathBuf,
    /// Executable file name, relative to `dir`
    pub executable: String,
    /// IP list the scanner reads, relative to `dir`
    pub ip_list: String,
    /// Result file the scanner writes, relative to `dir`
    pub result_file: String,
    /// Flag that carries the number of addresses to test
    pub count_flag: String,
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Quiet period after which a result written by a still running
    /// scanner is accepted
    pub settle_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("CloudflareScanner"),
            executable: default_executable().to_string(),
            ip_list: "ip.txt".to_string(),
            result_file: "result.csv".to_string(),
            count_flag: "-dn".to_string(),
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            settle_ms: DEFAULT_SETTLE_MS,
        }
    }
}

fn default_executable() -> &'static str {
    if cfg!(windows) {
        "CloudflareScanner.exe"
    } else {
        "CloudflareScanner"
    }
}

impl ScannerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_executable(mut self, executable: &str) -> Self {
        self.executable = executable.to_string();
        self
    }

    pub fn with_wait(mut self, timeout: Duration, interval: Duration) -> Self {
        self.wait_timeout_ms = timeout.as_millis() as u64;
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle_ms = settle.as_millis() as u64;
        self
    }

    pub fn executable_path(&self) -> PathBuf {
        self.dir.join(&self.executable)
    }

    pub fn ip_list_path(&self) -> PathBuf {
        self.dir.join(&self.ip_list)
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join(&self.result_file)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Whether the pipeline waits for the scanner's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchMode {
    /// Start the scanner and return immediately
    Detached,
    /// Start the scanner and poll for its result file
    #[default]
    Wait,
}

/// Stages the allowed list, starts the scanner and waits for its output
pub struct ScannerBridge {
    config: ScannerConfig,
}

impl ScannerBridge {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Copy the allowed list verbatim to where the scanner reads it
    pub fn stage_ip_list(&self, allowed: &Path) -> Result<PathBuf> {
        let target = self.config.ip_list_path();
        ensure_parent_dir(&target)?;
        fs::copy(allowed, &target).with_context(|| {
            format!(
                "failed to copy {} to {}",
                allowed.display(),
                target.display()
            )
        })?;
        info!(target = %target.display(), "IP list staged for the scanner");
        Ok(target)
    }

    /// Number of non-blank lines in an IP list
    pub fn count_ips(path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(content.lines().filter(|line| !line.trim().is_empty()).count())
    }

    /// Start the scanner without waiting for it.
    ///
    /// Both the executable and the staged list must exist.
    pub fn launch(&self) -> Result<Child> {
        let exe = self.config.executable_path();
        let ip_list = self.config.ip_list_path();
        if !exe.is_file() {
            bail!("scanner executable {} not found", exe.display());
        }
        if !ip_list.is_file() {
            bail!("scanner IP list {} not found", ip_list.display());
        }

        let count = Self::count_ips(&ip_list)?;
        // The working directory is the scanner folder, so the program path
        // must not be relative to ours.
        let program = fs::canonicalize(&exe)
            .with_context(|| format!("failed to resolve {}", exe.display()))?;

        let child = Command::new(&program)
            .arg(&self.config.count_flag)
            .arg(count.to_string())
            .current_dir(&self.config.dir)
            .spawn()
            .with_context(|| format!("failed to start {}", exe.display()))?;

        info!(
            exe = %exe.display(),
            flag = %self.config.count_flag,
            count,
            pid = child.id(),
            "Scanner started"
        );
        Ok(child)
    }

    /// Remove a result file left over from an earlier run
    pub fn clear_stale_result(&self) -> Result<()> {
        let result = self.config.result_path();
        if result.exists() {
            warn!(path = %result.display(), "Removing stale scanner result");
            fs::remove_file(&result)
                .with_context(|| format!("failed to remove {}", result.display()))?;
        }
        Ok(())
    }

    /// Poll until `scanner` is done with the result file.
    ///
    /// The result is complete once the scanner has exited, or once the file
    /// has stayed unchanged for the settle time while the scanner keeps
    /// running. Exiting without a result and running past the timeout are
    /// both fatal.
    pub async fn wait_for_result(&self, scanner: &mut Child) -> Result<PathBuf> {
        let result = self.config.result_path();
        let deadline = Instant::now() + self.config.wait_timeout();
        let mut unchanged_since: Option<(FileStamp, Instant)> = None;
        info!(path = %result.display(), "Waiting for scanner result");

        loop {
            let exited = scanner
                .try_wait()
                .context("failed to poll the scanner process")?;
            if let Some(status) = exited {
                if result.is_file() {
                    info!(path = %result.display(), %status, "Scanner finished");
                    return Ok(result);
                }
                bail!(
                    "scanner exited ({}) without writing {}",
                    status,
                    result.display()
                );
            }

            if let Some(stamp) = file_stamp(&result) {
                match unchanged_since {
                    Some((seen, since)) if seen == stamp => {
                        if since.elapsed() >= self.config.settle_time() {
                            info!(path = %result.display(), "Scanner result settled");
                            return Ok(result);
                        }
                    }
                    _ => unchanged_since = Some((stamp, Instant::now())),
                }
            }

            if Instant::now() >= deadline {
                if let Err(e) = scanner.kill() {
                    warn!(error = %e, "Failed to stop the scanner");
                }
                bail!(
                    "scanner result {} was not complete within {:?}",
                    result.display(),
                    self.config.wait_timeout()
                );
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Stage `allowed`, start the scanner and, in `Wait` mode, wait for its
    /// result. Returns the result path when waiting.
    pub async fn run(&self, allowed: &Path, mode: LaunchMode) -> Result<Option<PathBuf>> {
        if !allowed.is_file() {
            bail!("allowed IP list {} not found", allowed.display());
        }
        self.stage_ip_list(allowed)?;

        match mode {
            LaunchMode::Detached => {
                self.launch()?;
                Ok(None)
            }
            LaunchMode::Wait => {
                self.clear_stale_result()?;
                let mut scanner = self.launch()?;
                self.wait_for_result(&mut scanner).await.map(Some)
            }
        }
    }
}

/// Size and modification time of a file, if it exists
type FileStamp = (u64, Option<SystemTime>);

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = fs::metadata(path).ok()?;
    meta.is_file().then(|| (meta.len(), meta.modified().ok()))
}
