//! Configuration system for Radiomesh.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RADIOMESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/radiomesh/config.toml
//!   3. ~/.config/radiomesh/config.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::peer::PeerEncryption;
use crate::wire::{LinkClass, LINK_MESSAGE_MAX};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RadiomeshConfig {
    pub link: LinkConfig,
    pub mesh: MeshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Upper bound on the wait for one fragment's send confirmation.
    pub send_timeout_ms: u64,
    /// Largest message accepted by write(). Capped by the wire format.
    pub max_message_size: usize,
    /// Policy used when a write registers a peer the table does not know.
    pub encryption: PeerEncryption,
    /// Per-class inbound queue depths, in fragments.
    pub queue_capacity: QueueCapacities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueCapacities {
    pub debug: usize,
    pub control: usize,
    pub provision: usize,
    pub bulk: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Sender stalls while the radio reports less free memory than this.
    pub free_heap_min: usize,
    /// How many times a stalled sender re-checks memory before sending anyway.
    pub heap_retry_limit: u32,
    pub heap_retry_delay_ms: u64,
    pub dedup: DedupPolicy,
}

/// How retransmitted mesh messages are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Remember the last completed packet id per sending node.
    #[default]
    PerSender,
    /// Remember one last completed packet id across all senders.
    Global,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 1_000,
            max_message_size: 4 * 1024,
            encryption: PeerEncryption::Unencrypted,
            queue_capacity: QueueCapacities::default(),
        }
    }
}

impl Default for QueueCapacities {
    fn default() -> Self {
        Self {
            debug: 8,
            control: 8,
            provision: 8,
            bulk: 32,
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            free_heap_min: 8 * 1024,
            heap_retry_limit: 100,
            heap_retry_delay_ms: 10,
            dedup: DedupPolicy::PerSender,
        }
    }
}

impl QueueCapacities {
    pub fn for_class(&self, class: LinkClass) -> usize {
        let cap = match class {
            LinkClass::Debug => self.debug,
            LinkClass::Control => self.control,
            LinkClass::Provision => self.provision,
            LinkClass::Bulk => self.bulk,
        };
        cap.max(1)
    }
}

impl LinkConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn message_limit(&self) -> usize {
        self.max_message_size.min(LINK_MESSAGE_MAX)
    }
}

impl MeshConfig {
    pub fn heap_retry_delay(&self) -> Duration {
        Duration::from_millis(self.heap_retry_delay_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("radiomesh")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RadiomeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RadiomeshConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RADIOMESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RadiomeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply RADIOMESH_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RADIOMESH_LINK__SEND_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.link.send_timeout_ms = v;
        }
        if let Some(v) = lookup("RADIOMESH_LINK__MAX_MESSAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.link.max_message_size = v;
        }
        if let Some(v) = lookup("RADIOMESH_MESH__FREE_HEAP_MIN").and_then(|v| v.parse().ok()) {
            self.mesh.free_heap_min = v;
        }
        if let Some(v) = lookup("RADIOMESH_MESH__DEDUP") {
            match v.as_str() {
                "global" => self.mesh.dedup = DedupPolicy::Global,
                "per_sender" => self.mesh.dedup = DedupPolicy::PerSender,
                _ => {}
            }
        }
    }
}
