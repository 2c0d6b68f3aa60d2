//! Configuration handling for the mesh node.
//!
//! Settings come from the `mesh` section of a YAML file, then from
//! `PICO_MESH_*` environment variables. A missing or unreadable file falls
//! back to defaults.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use mesh_session::{SessionConfig, KEY_LEN};
use mesh_wire::DEFAULT_TTL;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const ENV_PREFIX: &str = "PICO_MESH_";

/// Mesh node configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    /// Whether the mesh runs at all
    pub enabled: bool,
    /// Link-layer pre-shared key
    pub secret: Option<[u8; KEY_LEN]>,
    /// TTL for originated frames
    pub ttl: u8,
    /// Neighbor table capacity
    pub max_neighbors: usize,
    /// Attach the neighbor table to HELLO_ACK
    pub share_neighbors: bool,
    /// Advertise gateway capability
    pub gateway: bool,
    /// Re-check period of a closed receive window
    pub rx_poll_interval: Duration,
    /// Lifetime of an incomplete chunk series
    pub reassembly_timeout: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            enabled: true,
            secret: None,
            ttl: DEFAULT_TTL,
            max_neighbors: session.max_neighbors,
            share_neighbors: session.share_neighbors,
            gateway: session.gateway,
            rx_poll_interval: session.rx_poll_interval,
            reassembly_timeout: session.reassembly_timeout,
        }
    }
}

/// Root of the YAML file
#[derive(Debug, Deserialize)]
struct RootConfig {
    mesh: Option<MeshSection>,
}

/// `mesh:` section, every key optional
#[derive(Debug, Default, Deserialize)]
struct MeshSection {
    enabled: Option<bool>,
    secret: Option<String>,
    ttl: Option<u8>,
    max_neighbors: Option<usize>,
    share_neighbors: Option<bool>,
    gateway: Option<bool>,
    rx_poll_interval: Option<String>,
    reassembly_timeout: Option<String>,
}

impl MeshConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = Self::default();

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root) => {
                    if let Some(section) = root.mesh {
                        config.apply_section(section)?;
                    }
                    info!("Loaded configuration from {:?}", path);
                }
                Err(e) => warn!("Failed to parse config file {:?} ({}), using defaults", path, e),
            },
            Err(_) => warn!("Config file {:?} not found, using defaults", path),
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;

        info!(
            "Mesh configuration: enabled={}, ttl={}, max_neighbors={}, share_neighbors={}, gateway={}, secured={}",
            config.enabled,
            config.ttl,
            config.max_neighbors,
            config.share_neighbors,
            config.gateway,
            config.secret.is_some()
        );
        Ok(config)
    }

    fn apply_section(&mut self, section: MeshSection) -> Result<()> {
        if let Some(enabled) = section.enabled {
            self.enabled = enabled;
        }
        if let Some(secret) = section.secret {
            self.secret = Some(decode_secret(&secret).context("mesh.secret")?);
        }
        if let Some(ttl) = section.ttl {
            self.ttl = ttl;
        }
        if let Some(max) = section.max_neighbors {
            if max == 0 {
                bail!("mesh.max_neighbors must be greater than zero");
            }
            self.max_neighbors = max;
        }
        if let Some(share) = section.share_neighbors {
            self.share_neighbors = share;
        }
        if let Some(gateway) = section.gateway {
            self.gateway = gateway;
        }
        if let Some(interval) = section.rx_poll_interval {
            self.rx_poll_interval =
                humantime::parse_duration(&interval).context("mesh.rx_poll_interval")?;
        }
        if let Some(timeout) = section.reassembly_timeout {
            self.reassembly_timeout =
                humantime::parse_duration(&timeout).context("mesh.reassembly_timeout")?;
        }
        Ok(())
    }

    /// Apply `PICO_MESH_*` overrides. Unparseable values are ignored with a
    /// warning, except the secret which must be valid.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = var("ENABLED") {
            override_parsed(&key, &value, &mut self.enabled, |v| v.parse::<bool>().ok());
        }
        if let Some((key, value)) = var("SECRET") {
            self.secret = Some(decode_secret(&value).with_context(|| key.clone())?);
            info!("Pre-shared key overridden by environment");
        }
        if let Some((key, value)) = var("TTL") {
            override_parsed(&key, &value, &mut self.ttl, |v| v.parse::<u8>().ok());
        }
        if let Some((key, value)) = var("MAX_NEIGHBORS") {
            override_parsed(&key, &value, &mut self.max_neighbors, |v| {
                v.parse::<usize>().ok().filter(|&n| n > 0)
            });
        }
        if let Some((key, value)) = var("SHARE_NEIGHBORS") {
            override_parsed(&key, &value, &mut self.share_neighbors, |v| {
                v.parse::<bool>().ok()
            });
        }
        if let Some((key, value)) = var("GATEWAY") {
            override_parsed(&key, &value, &mut self.gateway, |v| v.parse::<bool>().ok());
        }
        if let Some((key, value)) = var("RX_POLL_INTERVAL") {
            override_parsed(&key, &value, &mut self.rx_poll_interval, |v| {
                humantime::parse_duration(v).ok()
            });
        }
        if let Some((key, value)) = var("REASSEMBLY_TIMEOUT") {
            override_parsed(&key, &value, &mut self.reassembly_timeout, |v| {
                humantime::parse_duration(v).ok()
            });
        }
        Ok(())
    }

    /// Session configuration for one node
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            psk: self.secret.map(|key| Bytes::copy_from_slice(&key)),
            ttl: self.ttl,
            max_neighbors: self.max_neighbors,
            share_neighbors: self.share_neighbors,
            gateway: self.gateway,
            rx_poll_interval: self.rx_poll_interval,
            reassembly_timeout: self.reassembly_timeout,
            ..SessionConfig::default()
        }
    }
}

fn override_parsed<T, P>(key: &str, value: &str, slot: &mut T, parse: P)
where
    T: std::fmt::Debug,
    P: Fn(&str) -> Option<T>,
{
    match parse(value.trim()) {
        Some(parsed) => {
            info!("{} overridden by environment: {:?}", key, parsed);
            *slot = parsed;
        }
        None => warn!("Ignoring invalid {}={:?}", key, value),
    }
}

/// Decode a hex pre-shared key
pub fn decode_secret(text: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = hex::decode(text.trim()).context("secret is not valid hex")?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("secret must be {} bytes, got {}", KEY_LEN, len))
}
