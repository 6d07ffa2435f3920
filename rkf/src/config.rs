use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use libsupervisor::{BundleLayout, Identity};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub frontend: FrontendConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub layout: BundleLayout,
    #[serde(default)]
    pub identity: Identity,
}

/// Settings handed to the application front-end. Replaceable at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrontendConfig {
    pub base_url: String,
    pub wildcard_host: String,
    pub mail_url: Option<String>,
    pub ddp_url: Option<String>,
    #[serde(default)]
    pub allow_demo_accounts: bool,
    #[serde(default)]
    pub is_testing: bool,
    // 0 for development builds, which carry a buildstamp file instead
    #[serde(default)]
    pub build: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    // ip:port the database node listens on, also its replica set member name
    pub bind_address: SocketAddr,
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,
}

impl DatabaseConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_restart_interval_secs")]
    pub restart_interval_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_interval_secs: default_restart_interval_secs(),
        }
    }
}

impl SupervisorConfig {
    pub fn restart_interval(&self) -> Duration {
        Duration::from_secs(self.restart_interval_secs)
    }
}

fn default_settle_delay_secs() -> u64 {
    4
}

fn default_restart_interval_secs() -> u64 {
    10
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    serde_yaml::from_str(content).context("Failed to parse YAML config")
}
