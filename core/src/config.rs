//! Configuration options.
//!
//! The server binary takes no flags; it reads a TOML configuration file when
//! one is present and otherwise runs on the defaults below. Every field has a
//! default, so a partial file only needs the keys it changes:
//!
//! ```toml
//! [server]
//!     port = 21569
//!     certificate = "a-32-byte-maximum-shared-token"
//!
//! [storage]
//!     default_backend = "file"
//!     data_dir = "./data"
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::storage::LABEL_LEN;

/// Loads a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RuntimeConfig> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: RuntimeConfig = toml::from_str(&config_str)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Returns the built-in default configuration.
pub fn default_config() -> RuntimeConfig {
    RuntimeConfig::default()
}

/* --------------------------------------------------------------------------------- */

/// Runtime configuration options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    /// Network and connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage engine settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl RuntimeConfig {
    /// Checks cross-field constraints a TOML file could violate.
    pub fn validate(&self) -> Result<()> {
        if self.server.certificate.len() > LABEL_LEN {
            bail!(
                "server.certificate must be at most {} bytes, got {}",
                LABEL_LEN,
                self.server.certificate.len()
            );
        }
        if self.storage.segment_capacity_default == 0
            || self.storage.segment_capacity_default > self.storage.segment_capacity_max
        {
            bail!(
                "storage.segment_capacity_default must be in 1..={}",
                self.storage.segment_capacity_max
            );
        }
        if self.storage.label_length != LABEL_LEN {
            bail!(
                "storage.label_length is fixed at {} by the wire format",
                LABEL_LEN
            );
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/* --------------------------------------------------------------------------------- */

/// Server settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    /// IPv4 address to bind. Defaults to `127.0.0.1`.
    #[serde(default = "default_address")]
    pub address: String,

    /// TCP port to bind. Defaults to `21569` (0x5441, "TA").
    #[serde(default = "default_port")]
    pub port: u16,

    /// Pre-shared authentication token, at most 32 bytes, NUL-padded on the
    /// wire. Defaults to a development-only value.
    #[serde(default = "default_certificate")]
    pub certificate: String,

    /// Maximum number of live series. Defaults to `1024`.
    #[serde(default = "default_catalog_capacity")]
    pub catalog_capacity: usize,

    /// Per-actor mailbox bound. Defaults to `1024`.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Worker threads draining actor mailboxes. `0` derives the count from
    /// available CPU parallelism. Defaults to `0`.
    #[serde(default = "default_actor_pool_size")]
    pub actor_pool_size: usize,
}

impl ServerConfig {
    /// The token as the fixed-width buffer compared at CONNECT.
    pub fn token(&self) -> [u8; LABEL_LEN] {
        let mut token = [0u8; LABEL_LEN];
        let raw = self.certificate.as_bytes();
        let len = raw.len().min(LABEL_LEN);
        token[..len].copy_from_slice(&raw[..len]);
        token
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: default_address(),
            port: default_port(),
            certificate: default_certificate(),
            catalog_capacity: default_catalog_capacity(),
            mailbox_capacity: default_mailbox_capacity(),
            actor_pool_size: default_actor_pool_size(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    21569
}

fn default_certificate() -> String {
    "tau-development-token".to_string()
}

fn default_catalog_capacity() -> usize {
    1024
}

fn default_mailbox_capacity() -> usize {
    1024
}

fn default_actor_pool_size() -> usize {
    0
}

/* --------------------------------------------------------------------------------- */

/// Which storage engine backs newly created series.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-memory segments; data does not survive a restart.
    Segment,
    /// Memory-mapped `.tau` files, durable per append.
    File,
}

/// Storage engine settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StorageConfig {
    /// Capacity of newly allocated segments. Defaults to `65536`.
    #[serde(default = "default_segment_capacity")]
    pub segment_capacity_default: usize,

    /// Hard cap on segment capacity. Defaults to `1048576`.
    #[serde(default = "default_segment_capacity_max")]
    pub segment_capacity_max: usize,

    /// Backend for newly created series. Defaults to `segment`.
    #[serde(default = "default_backend")]
    pub default_backend: Backend,

    /// Directory holding `.tau` files for the file backend. Defaults to
    /// `./data`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Routing label width in bytes. Part of the wire format; must be `32`.
    #[serde(default = "default_label_length")]
    pub label_length: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            segment_capacity_default: default_segment_capacity(),
            segment_capacity_max: default_segment_capacity_max(),
            default_backend: default_backend(),
            data_dir: default_data_dir(),
            label_length: default_label_length(),
        }
    }
}

fn default_segment_capacity() -> usize {
    65536
}

fn default_segment_capacity_max() -> usize {
    crate::storage::MAX_SEGMENT_CAPACITY
}

fn default_backend() -> Backend {
    Backend::Segment
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_label_length() -> usize {
    LABEL_LEN
}
