//! Configuration — TOML file with per-field defaults and env overrides

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::MeshError;

/// Environment variable holding a comma-separated `host:port` discovery list
pub const DISCOVERY_HOSTS_ENV: &str = "DISCOVERY_HOSTS";

/// Manifest fetches outside this range still work but are logged
const DISCOVERY_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 5..=10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// `host:port[,host:port...]`; empty means scan `default_host` on `default_ports`
    #[serde(default)]
    pub hosts: String,
    #[serde(default = "default_host")]
    pub default_host: String,
    #[serde(default = "default_ports")]
    pub default_ports: Vec<u16>,
    /// Port assumed for a host entry that doesn't name one
    #[serde(default = "default_agent_port")]
    pub default_agent_port: u16,
    #[serde(default = "default_discovery_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_ports() -> Vec<u16> {
    vec![8001, 8002, 8003]
}
fn default_agent_port() -> u16 {
    8000
}
fn default_discovery_timeout() -> u64 {
    10
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            hosts: String::new(),
            default_host: default_host(),
            default_ports: default_ports(),
            default_agent_port: default_agent_port(),
            timeout_secs: default_discovery_timeout(),
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base URLs for every entry in `hosts`, in order. Blank entries are skipped.
    pub fn host_urls(&self) -> Vec<String> {
        self.hosts
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((host, port)) => format!("http://{}:{}", host, port),
                None => format!("http://{}:{}", entry, self.default_agent_port),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_quick_timeout")]
    pub quick_timeout_secs: u64,
    #[serde(default = "default_heavy_timeout")]
    pub heavy_timeout_secs: u64,
    #[serde(default = "default_async_timeout")]
    pub async_timeout_secs: u64,
    /// Substrings that mark a query as trivial (matched case-insensitively)
    #[serde(default = "default_quick_phrases")]
    pub quick_phrases: Vec<String>,
}

fn default_quick_timeout() -> u64 {
    10
}
fn default_heavy_timeout() -> u64 {
    50
}
fn default_async_timeout() -> u64 {
    60
}
fn default_quick_phrases() -> Vec<String> {
    ["hello", "help", "what can you do", "capabilities"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            quick_timeout_secs: default_quick_timeout(),
            heavy_timeout_secs: default_heavy_timeout(),
            async_timeout_secs: default_async_timeout(),
            quick_phrases: default_quick_phrases(),
        }
    }
}

impl DispatchConfig {
    pub fn quick_timeout(&self) -> Duration {
        Duration::from_secs(self.quick_timeout_secs)
    }

    pub fn heavy_timeout(&self) -> Duration {
        Duration::from_secs(self.heavy_timeout_secs)
    }

    pub fn async_timeout(&self) -> Duration {
        Duration::from_secs(self.async_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_peer_timeout")]
    pub request_timeout_secs: u64,
}

fn default_peer_timeout() -> u64 {
    60
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_peer_timeout(),
        }
    }
}

impl PeerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// How long a finished task stays queryable
    #[serde(default = "default_task_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_task_capacity")]
    pub capacity: usize,
}

fn default_task_ttl() -> u64 {
    3600
}
fn default_task_capacity() -> usize {
    1024
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_task_ttl(),
            capacity: default_task_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Send dispatch spans to the tracing-backed sink
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_filter: default_log_filter(),
        }
    }
}

impl MeshConfig {
    /// Parse a TOML document. Missing sections and fields take their defaults.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse agentmesh config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::parse(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` as the environment.
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(hosts) = lookup(DISCOVERY_HOSTS_ENV) {
            debug!("Discovery hosts overridden from {}", DISCOVERY_HOSTS_ENV);
            self.discovery.hosts = hosts;
        }
        self
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        let dispatch = &self.dispatch;
        if dispatch.quick_timeout_secs == 0
            || dispatch.heavy_timeout_secs == 0
            || dispatch.async_timeout_secs == 0
        {
            return Err(MeshError::Config("dispatch timeouts must be non-zero".into()));
        }
        if self.tasks.capacity == 0 {
            return Err(MeshError::Config("tasks.capacity must be at least 1".into()));
        }
        if self.discovery.timeout_secs == 0 {
            return Err(MeshError::Config("discovery.timeout_secs must be non-zero".into()));
        }
        if self.peer.request_timeout_secs == 0 {
            return Err(MeshError::Config("peer.request_timeout_secs must be non-zero".into()));
        }
        if !DISCOVERY_TIMEOUT_RANGE.contains(&self.discovery.timeout_secs) {
            warn!(
                "discovery.timeout_secs = {} is outside the usual {}-{}s",
                self.discovery.timeout_secs,
                DISCOVERY_TIMEOUT_RANGE.start(),
                DISCOVERY_TIMEOUT_RANGE.end()
            );
        }
        Ok(())
    }
}
