use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use crate::error::{HarnessError, Result};

pub const CONFIG_FILE: &str = "respcheck.toml";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// How the harness decides a freshly spawned server is ready.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessMode {
    /// Sleep for `readiness_delay_ms` and assume the server is listening.
    #[default]
    Delay,
    /// Probe the port every `poll_interval_ms` until it accepts or
    /// `readiness_delay_ms` elapses. Each probe opens and drops a
    /// connection, which single-accept servers may not survive.
    Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub readiness: ReadinessMode,
    pub readiness_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub command_pause_ms: u64,
    pub max_reply_bytes: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            readiness: ReadinessMode::Delay,
            readiness_delay_ms: 800,
            poll_interval_ms: 50,
            connect_timeout_ms: 2000,
            read_timeout_ms: 2000,
            stop_timeout_ms: 2000,
            command_pause_ms: 100,
            max_reply_bytes: 1024,
        }
    }
}

impl TimingConfig {
    pub fn readiness_delay(&self) -> Duration {
        Duration::from_millis(self.readiness_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn command_pause(&self) -> Duration {
        Duration::from_millis(self.command_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub source: PathBuf,
    pub command: Vec<String>,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("main.py"),
            command: vec!["python".to_string(), "main.py".to_string()],
        }
    }
}

/// Harness configuration, stored as TOML in `respcheck.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub server: ServerConfig,
    pub timing: TimingConfig,
    pub submission: SubmissionConfig,
}

impl HarnessConfig {
    /// Read and validate a config file.
    pub async fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Read `respcheck.toml` from `dir` if present, defaults otherwise.
    pub async fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::default());
        }
        Self::read(&path).await
    }

    pub fn validate(&self) -> Result<()> {
        if self.submission.command.is_empty() {
            return Err(HarnessError::Config("submission command is empty".into()));
        }
        if self.server.port == 0 {
            return Err(HarnessError::Config("server port must be non-zero".into()));
        }
        if self.server.host.trim().is_empty() {
            return Err(HarnessError::Config("server host is empty".into()));
        }
        if self.timing.connect_timeout_ms == 0 || self.timing.read_timeout_ms == 0 {
            return Err(HarnessError::Config(
                "connect and read timeouts must be non-zero".into(),
            ));
        }
        if self.timing.max_reply_bytes == 0 {
            return Err(HarnessError::Config("max_reply_bytes must be non-zero".into()));
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
