//! Node configuration.
//!
//! A [`NodeConfig`] is loaded from TOML, overridden by environment and CLI
//! flags in `main`, then resolved into the typed values the election crate
//! works with.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use replset_election::{
    ExecutorConfig, HostAndPort, MemberConfig, OpTime, ReplicaSetConfig, SufficiencyPolicy,
};
use serde::{Deserialize, Serialize};

/// Errors loading or resolving the node configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a replica set member needs to answer and run freshness checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Replica set name.
    pub set_name: String,
    pub config_version: u32,
    /// This member's address as it appears in `members`.
    pub self_host: String,
    /// Address the freshness listener binds to.
    pub bind: String,
    /// Last applied optime, `"secs:inc"`.
    pub last_applied: String,
    /// Per-peer command timeout in milliseconds.
    pub command_timeout_ms: u64,
    /// Finish a check as soon as one peer disqualifies us.
    pub stop_on_disqualify: bool,
    /// Member id of the known primary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<u32>,
    pub members: Vec<MemberConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            set_name: "rs0".into(),
            config_version: 1,
            self_host: "127.0.0.1:27017".into(),
            bind: "127.0.0.1:27017".into(),
            last_applied: "0:0".into(),
            command_timeout_ms: 30_000,
            stop_on_disqualify: false,
            primary: None,
            members: vec![MemberConfig::new(
                1,
                HostAndPort::new("127.0.0.1", replset_election::DEFAULT_PORT),
            )],
        }
    }
}

/// Typed view of a validated [`NodeConfig`].
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub replica_set: ReplicaSetConfig,
    pub self_index: usize,
    pub last_applied: OpTime,
    pub bind: SocketAddr,
    pub executor: ExecutorConfig,
    pub policy: SufficiencyPolicy,
    pub primary: Option<u32>,
}

impl NodeConfig {
    /// Loads a config from a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates the config and converts it to typed values.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let replica_set = ReplicaSetConfig::new(
            self.set_name.clone(),
            self.config_version,
            self.members.clone(),
        );
        replica_set
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let me: HostAndPort = self
            .self_host
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("self_host: {e}")))?;
        let self_index = replica_set.index_of(&me).ok_or_else(|| {
            ConfigError::Invalid(format!("self_host {me} is not a member of the set"))
        })?;

        let last_applied = self
            .last_applied
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("last_applied: {e}")))?;
        let bind = self
            .bind
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bind address '{}': {e}", self.bind)))?;

        if self.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "command_timeout_ms must be at least 1".into(),
            ));
        }
        if let Some(id) = self.primary {
            if replica_set.find_by_id(id).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "primary {id} is not a member of the set"
                )));
            }
        }

        let policy = if self.stop_on_disqualify {
            SufficiencyPolicy::StopOnDisqualify
        } else {
            SufficiencyPolicy::AllPeers
        };

        Ok(ResolvedConfig {
            replica_set,
            self_index,
            last_applied,
            bind,
            executor: ExecutorConfig {
                command_timeout: Duration::from_millis(self.command_timeout_ms),
            },
            policy,
            primary: self.primary,
        })
    }
}
