//! Replica set membership.
//!
//! Defines the structure of a replica set as seen by the election layer:
//! member addresses, their stable ids, and the versioned configuration
//! that owns them. A configuration is read-only for the duration of a
//! freshness round and is shared by reference.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ElectionError;

/// Port assumed when a member address omits one.
pub const DEFAULT_PORT: u16 = 27017;

/// Network address of a replica set member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostAndPort {
    host: String,
    port: u16,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAndPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty host address".into());
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(format!("missing host name in '{s}'"));
                }
                let port = port
                    .parse()
                    .map_err(|_| format!("invalid port in '{s}'"))?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

impl TryFrom<String> for HostAndPort {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HostAndPort> for String {
    fn from(h: HostAndPort) -> Self {
        h.to_string()
    }
}

fn default_priority() -> f64 {
    1.0
}

fn default_votes() -> u32 {
    1
}

/// One row of the replica set configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Stable numeric id, unique within the set.
    pub id: u32,
    /// Address other members use to reach this one.
    pub host: HostAndPort,
    /// Election priority. Zero means the member never stands for election.
    #[serde(default = "default_priority")]
    pub priority: f64,
    /// Number of votes this member casts. Zero makes it a non-voter.
    #[serde(default = "default_votes")]
    pub votes: u32,
}

impl MemberConfig {
    /// Creates a voting, electable member.
    pub fn new(id: u32, host: HostAndPort) -> Self {
        Self {
            id,
            host,
            priority: default_priority(),
            votes: default_votes(),
        }
    }

    pub fn is_voter(&self) -> bool {
        self.votes > 0
    }

    pub fn is_electable(&self) -> bool {
        self.priority > 0.0
    }
}

/// A versioned replica set configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    /// Replica set name.
    pub name: String,
    /// Monotonically increasing configuration version.
    pub version: u32,
    /// Members in configuration order. A member's position in this list
    /// is its config index.
    pub members: Vec<MemberConfig>,
}

impl ReplicaSetConfig {
    pub fn new(name: impl Into<String>, version: u32, members: Vec<MemberConfig>) -> Self {
        Self {
            name: name.into(),
            version,
            members,
        }
    }

    /// Checks the structural invariants of the configuration.
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.name.is_empty() {
            return Err(ElectionError::Configuration(
                "replica set name must not be empty".into(),
            ));
        }
        if self.version == 0 {
            return Err(ElectionError::Configuration(
                "config version must be at least 1".into(),
            ));
        }
        if self.members.is_empty() {
            return Err(ElectionError::Configuration(
                "replica set must have at least one member".into(),
            ));
        }

        let mut ids = HashSet::new();
        let mut hosts = HashSet::new();
        for m in &self.members {
            if !ids.insert(m.id) {
                return Err(ElectionError::Configuration(format!(
                    "duplicate member id {}",
                    m.id
                )));
            }
            if !hosts.insert(&m.host) {
                return Err(ElectionError::Configuration(format!(
                    "duplicate member host {}",
                    m.host
                )));
            }
            if m.priority.is_nan() || m.priority < 0.0 {
                return Err(ElectionError::Configuration(format!(
                    "member {} has invalid priority {}",
                    m.id, m.priority
                )));
            }
        }
        Ok(())
    }

    pub fn member_at(&self, index: usize) -> Option<&MemberConfig> {
        self.members.get(index)
    }

    pub fn find_by_id(&self, id: u32) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Returns the config index of the member at `host`.
    pub fn index_of(&self, host: &HostAndPort) -> Option<usize> {
        self.members.iter().position(|m| &m.host == host)
    }

    /// Addresses of every voting member other than the one at `self_index`,
    /// in configuration order.
    pub fn freshness_targets(&self, self_index: usize) -> Result<Vec<HostAndPort>, ElectionError> {
        if self_index >= self.members.len() {
            return Err(ElectionError::SelfIndexOutOfRange {
                index: self_index,
                members: self.members.len(),
            });
        }
        Ok(self
            .members
            .iter()
            .enumerate()
            .filter(|(i, m)| *i != self_index && m.is_voter())
            .map(|(_, m)| m.host.clone())
            .collect())
    }
}
