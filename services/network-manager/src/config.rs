//! Configuration for the network manager.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use trellis_id::Address;
use trellis_reconcile::ReconcileError;

use crate::reconciler::ReconcilerConfig;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required variable {0}")]
    Missing(&'static str),

    /// A variable is set to an unusable value.
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl From<ConfigError> for ReconcileError {
    fn from(err: ConfigError) -> Self {
        ReconcileError::Configuration(err.to_string())
    }
}

/// Network manager configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Network addresses to reconcile.
    pub networks: Vec<Address>,

    /// Cluster name embedded in generated unit configuration.
    pub cluster: String,

    /// Deadline for every fan-out stage.
    pub stage_timeout: Duration,

    /// Reconciler mailbox capacity.
    pub mailbox_size: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Topology document seeded into the local cluster at startup.
    pub topology_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let networks = parse_networks(
            &lookup("TRELLIS_NETWORKS").ok_or(ConfigError::Missing("TRELLIS_NETWORKS"))?,
        )?;

        let cluster = lookup("TRELLIS_CLUSTER").unwrap_or_else(|| "trellis".to_string());

        let stage_timeout_secs: u64 = parse_number(&lookup, "TRELLIS_STAGE_TIMEOUT_SECS", 60)?;
        if stage_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "TRELLIS_STAGE_TIMEOUT_SECS",
                reason: "must be positive".to_string(),
            });
        }

        let mailbox_size: usize = parse_number(&lookup, "TRELLIS_MAILBOX_SIZE", 256)?;
        if mailbox_size == 0 {
            return Err(ConfigError::Invalid {
                name: "TRELLIS_MAILBOX_SIZE",
                reason: "must be positive".to_string(),
            });
        }

        let log_level = lookup("TRELLIS_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let topology_file = lookup("TRELLIS_TOPOLOGY_FILE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            networks,
            cluster,
            stage_timeout: Duration::from_secs(stage_timeout_secs),
            mailbox_size,
            log_level,
            topology_file,
        })
    }

    /// Settings handed to every reconciler.
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            cluster: self.cluster.clone(),
            stage_timeout: self.stage_timeout,
        }
    }
}

fn parse_networks(raw: &str) -> Result<Vec<Address>, ConfigError> {
    let mut networks: Vec<Address> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let address = Address::parse(part).map_err(|e| ConfigError::Invalid {
            name: "TRELLIS_NETWORKS",
            reason: e.to_string(),
        })?;
        if networks.contains(&address) {
            return Err(ConfigError::Invalid {
                name: "TRELLIS_NETWORKS",
                reason: format!("'{}' listed twice", address),
            });
        }
        networks.push(address);
    }

    if networks.is_empty() {
        return Err(ConfigError::Missing("TRELLIS_NETWORKS"));
    }
    Ok(networks)
}

fn parse_number<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
