//! Runtime constants and the startup configuration document.
//!
//! Tunable intervals that are not user-facing are collected here as constants.
//! Everything an operator sets (interface, listen address, port table) lives in
//! [`Settings`], loaded once from TOML and never hot-reloaded.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::AppError;

/// Interval at which the rate ticker recomputes per-service speeds (seconds).
pub const RATE_TICK_INTERVAL_SECS: u64 = 1;

/// How long shutdown waits for background tasks before giving up (seconds).
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// BPF filter applied to the capture handle.
pub const CAPTURE_FILTER: &str = "tcp or udp";

/// Smallest snap length that still reaches the transport ports of an
/// Ethernet + VLAN + IPv6 frame.
pub const MIN_SNAPLEN: i32 = 64;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/retroflow/config.toml";
pub const DEFAULT_INTERFACE: &str = "eth0";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:10308";
pub const DEFAULT_SNAPLEN: i32 = 1024;
pub const DEFAULT_READ_TIMEOUT_MS: i32 = 1000;
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 3;

/// Command-line arguments. Values given here override the config file.
#[derive(Debug, Parser)]
#[command(name = "retroflow", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "RETROFLOW_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Network interface to capture on.
    #[arg(long)]
    pub interface: Option<String>,

    /// Address the query endpoint listens on.
    #[arg(long)]
    pub listen: Option<SocketAddr>,
}

/// Startup configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub interface: String,
    pub listen: SocketAddr,
    /// Bytes captured per frame. Only headers are consulted.
    pub snaplen: i32,
    /// Bounded wait per capture read, so the loop can observe shutdown.
    pub read_timeout_ms: i32,
    pub discovery: DiscoverySettings,
    /// Host-network services, identified by the ports they listen on.
    pub services: Vec<ServiceEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverySettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

/// One `[[services]]` entry: a name and every port attributed to it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceEntry {
    pub name: String,
    pub ports: Vec<u16>,
}

impl ServiceEntry {
    fn new(name: &str, ports: &[u16]) -> Self {
        Self {
            name: name.to_string(),
            ports: ports.to_vec(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            listen: DEFAULT_LISTEN_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 10308))),
            snaplen: DEFAULT_SNAPLEN,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            discovery: DiscoverySettings::default(),
            services: vec![
                ServiceEntry::new("Emby (Media)", &[8096]),
                ServiceEntry::new("Emby (HTTPS)", &[8920]),
                ServiceEntry::new("RetroFlow", &[10308]),
                ServiceEntry::new("Nginx (Web)", &[80]),
                ServiceEntry::new("Nginx (SSL)", &[443]),
            ],
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_DISCOVERY_INTERVAL_SECS,
        }
    }
}

impl Settings {
    /// Resolve the effective settings: config file first, then CLI overrides.
    pub fn from_cli(cli: &Cli) -> Result<Self, AppError> {
        let mut settings = Self::load(&cli.config)?;
        if let Some(interface) = &cli.interface {
            settings.interface = interface.clone();
        }
        if let Some(listen) = cli.listen {
            settings.listen = listen;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Load from a TOML file. A missing file yields the defaults; an unreadable
    /// or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;

        tracing::info!(
            "Loaded configuration from {} ({} services)",
            path.display(),
            settings.services.len()
        );
        Ok(settings)
    }

    /// Reject configurations that would make attribution ambiguous or capture useless.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.interface.trim().is_empty() {
            return Err(AppError::Config("interface must not be empty".into()));
        }
        if self.snaplen < MIN_SNAPLEN {
            return Err(AppError::Config(format!(
                "snaplen {} is below the minimum of {MIN_SNAPLEN} bytes",
                self.snaplen
            )));
        }
        if self.read_timeout_ms <= 0 {
            return Err(AppError::Config("read_timeout_ms must be positive".into()));
        }
        if self.discovery.interval_secs == 0 {
            return Err(AppError::Config(
                "discovery.interval_secs must be positive".into(),
            ));
        }

        let mut claimed: HashMap<u16, &str> = HashMap::new();
        for entry in &self.services {
            if entry.name.trim().is_empty() {
                return Err(AppError::Config("service name must not be empty".into()));
            }
            for &port in &entry.ports {
                if port == 0 {
                    return Err(AppError::Config(format!(
                        "service {:?} lists port 0",
                        entry.name
                    )));
                }
                match claimed.insert(port, &entry.name) {
                    Some(previous) if previous != entry.name => {
                        return Err(AppError::Config(format!(
                            "port {port} is claimed by both {previous:?} and {:?}",
                            entry.name
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
