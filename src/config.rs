//! Configuration file support for the MPC vote prover.
//!
//! Loaded from TOML. Every section is optional except `[[parties]]`, which a
//! usable configuration must list.

use crate::merkle::{DEFAULT_TREE_DEPTH, MAX_TREE_DEPTH};
use crate::orchestrator::{PollPolicy, DEFAULT_CIRCUIT, DEFAULT_MAX_POLL_ATTEMPTS};
use crate::sharing::REP3_PARTY_COUNT;
use crate::transport::DEFAULT_API_BASE_PATH;
use crate::types::{validate_parties, Party, Protocol};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable consulted when `[proof_service]` has no `api_key`.
pub const PROOF_SERVICE_API_KEY_ENV: &str = "MPC_PROOF_SERVICE_API_KEY";

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mpc: MpcConfig,
    #[serde(default)]
    pub parties: Vec<Party>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_service: Option<ProofServiceConfig>,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub tree: TreeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpcConfig {
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(default = "default_circuit")]
    pub circuit: String,
    #[serde(default = "default_api_base_path")]
    pub api_base_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofServiceConfig {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default = "default_tree_depth")]
    pub depth: usize,
}

impl TreeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 || self.depth > MAX_TREE_DEPTH {
            anyhow::bail!(
                "[tree] depth must be between 1 and {}, got {}",
                MAX_TREE_DEPTH,
                self.depth
            );
        }
        Ok(())
    }
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Rep3,
            circuit: DEFAULT_CIRCUIT.to_string(),
            api_base_path: DEFAULT_API_BASE_PATH.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_TREE_DEPTH,
        }
    }
}

fn default_protocol() -> Protocol {
    Protocol::Rep3
}

fn default_circuit() -> String {
    DEFAULT_CIRCUIT.to_string()
}

fn default_api_base_path() -> String {
    DEFAULT_API_BASE_PATH.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}

fn default_tree_depth() -> usize {
    DEFAULT_TREE_DEPTH
}

impl PollingConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.interval_ms),
            max_attempts: self.max_attempts,
        }
    }
}

impl ProofServiceConfig {
    /// The configured key, falling back to [`PROOF_SERVICE_API_KEY_ENV`].
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(PROOF_SERVICE_API_KEY_ENV).ok())
            .filter(|key| !key.is_empty())
    }
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Defaults apply only when the file is absent; a file that exists but
    /// cannot be read or parsed is an error.
    pub fn load_from_file_or_default(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Rejects configurations the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_parties(&self.parties).context("Invalid [[parties]] section")?;

        if self.mpc.protocol == Protocol::Rep3 && self.parties.len() != REP3_PARTY_COUNT {
            anyhow::bail!(
                "Protocol rep3 requires exactly {} parties, {} configured",
                REP3_PARTY_COUNT,
                self.parties.len()
            );
        }
        if self.mpc.circuit.trim().is_empty() {
            anyhow::bail!("[mpc] circuit must not be empty");
        }
        if self.mpc.request_timeout_secs == 0 {
            anyhow::bail!("[mpc] request_timeout_secs must be positive");
        }
        if self.polling.max_attempts == 0 {
            anyhow::bail!("[polling] max_attempts must be at least 1");
        }
        self.tree.validate()?;
        if let Some(service) = &self.proof_service {
            if service.address.trim().is_empty() {
                anyhow::bail!("[proof_service] address must not be empty");
            }
        }

        Ok(())
    }
}
