//! Freshness request and reply types.
//!
//! Outbound requests are built once per round and sent unchanged to every
//! peer. Inbound replies arrive as loosely typed [`WireReply`] documents and
//! are decoded at the boundary into a [`FreshnessReply`], so the tally only
//! ever pattern-matches on three explicit shapes: an answer, a transport
//! failure, or a reply whose position field has the wrong type.

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::{ElectionError, HostAndPort, OpTime, ReplicaSetConfig};

/// Command name of the freshness check on the wire.
pub const FRESHNESS_COMMAND: &str = "freshnessCheck";

/// The question a candidate asks every peer: are you fresher than me?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessRequest {
    /// Replica set name of the requester.
    pub set: String,
    /// Requester's last applied optime.
    pub position: OpTime,
    /// Requester's address.
    pub who: HostAndPort,
    /// Requester's configuration version.
    pub config_version: u32,
    /// Requester's member id.
    pub id: u32,
}

impl FreshnessRequest {
    /// Builds the request sent on behalf of the member at `self_index`.
    pub fn new(
        config: &ReplicaSetConfig,
        position: OpTime,
        self_index: usize,
    ) -> Result<Self, ElectionError> {
        let me = config
            .member_at(self_index)
            .ok_or(ElectionError::SelfIndexOutOfRange {
                index: self_index,
                members: config.members.len(),
            })?;
        Ok(Self {
            set: config.name.clone(),
            position,
            who: me.host.clone(),
            config_version: config.version,
            id: me.id,
        })
    }
}

/// An inbound command frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireCommand {
    #[serde(rename = "freshnessCheck")]
    FreshnessCheck(FreshnessRequest),
}

impl WireCommand {
    pub fn name(&self) -> &'static str {
        match self {
            WireCommand::FreshnessCheck(_) => FRESHNESS_COMMAND,
        }
    }
}

/// A dynamically typed document value.
///
/// Only the `position` field of a reply is dynamically typed; every other
/// type it may carry is a malformed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    OpTime(OpTime),
    Int(i64),
    Str(String),
    Bool(bool),
    Null,
}

impl WireValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            WireValue::OpTime(_) => "optime",
            WireValue::Int(_) => "int",
            WireValue::Str(_) => "string",
            WireValue::Bool(_) => "bool",
            WireValue::Null => "null",
        }
    }
}

/// A peer's reply document as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireReply {
    pub ok: bool,
    pub id: Option<u32>,
    pub set: Option<String>,
    pub who: Option<String>,
    pub config_version: Option<u32>,
    pub position: Option<WireValue>,
    pub fresher: Option<bool>,
    pub veto: Option<bool>,
    pub errmsg: Option<String>,
}

impl WireReply {
    /// A successful reply reporting `position` and nothing else.
    pub fn at(position: OpTime) -> Self {
        Self {
            ok: true,
            position: Some(WireValue::OpTime(position)),
            ..Self::default()
        }
    }

    /// A successful reply whose position field carries `value`.
    pub fn with_position_value(value: WireValue) -> Self {
        Self {
            ok: true,
            position: Some(value),
            ..Self::default()
        }
    }

    /// A command error reply.
    pub fn error(errmsg: impl Into<String>) -> Self {
        Self {
            ok: false,
            errmsg: Some(errmsg.into()),
            ..Self::default()
        }
    }

    pub fn fresher(mut self) -> Self {
        self.fresher = Some(true);
        self
    }

    pub fn veto(mut self, reason: Option<&str>) -> Self {
        self.veto = Some(true);
        self.errmsg = reason.map(str::to_owned);
        self
    }

    /// Fills in the identity fields a real peer sends back.
    pub fn identified_as(mut self, id: u32, set: &str, who: &HostAndPort, config_version: u32) -> Self {
        self.id = Some(id);
        self.set = Some(set.to_owned());
        self.who = Some(who.to_string());
        self.config_version = Some(config_version);
        self
    }
}

/// What a peer that answered claims about its freshness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerClaim {
    /// The peer refuses to let the requester stand for election.
    Veto { reason: Option<String> },
    /// The peer reports itself fresher, whatever position it also sent.
    Fresher,
    /// The peer's last applied optime.
    At(OpTime),
}

/// A decoded reply from one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshnessReply {
    /// The peer answered.
    Success(PeerClaim),
    /// Timeout, connection error, cancellation or command error.
    Failed(TransportError),
    /// The peer answered but its position field has the wrong type.
    Malformed { found: &'static str },
}

impl FreshnessReply {
    /// Decodes the outcome of one remote command.
    ///
    /// Precedence: a veto beats a fresher flag, and both beat the position
    /// field, which is only inspected when neither flag is set.
    pub fn decode(outcome: Result<WireReply, TransportError>) -> Self {
        match outcome {
            Ok(reply) => Self::from(reply),
            Err(e) => FreshnessReply::Failed(e),
        }
    }

    /// Returns true if this reply carries no peer data.
    pub fn is_failure(&self) -> bool {
        matches!(self, FreshnessReply::Failed(_))
    }
}

impl From<WireReply> for FreshnessReply {
    fn from(reply: WireReply) -> Self {
        if !reply.ok {
            let msg = reply.errmsg.unwrap_or_else(|| "unknown error".into());
            return FreshnessReply::Failed(TransportError::CommandFailed(msg));
        }
        if reply.veto == Some(true) {
            return FreshnessReply::Success(PeerClaim::Veto {
                reason: reply.errmsg,
            });
        }
        if reply.fresher == Some(true) {
            return FreshnessReply::Success(PeerClaim::Fresher);
        }
        match reply.position {
            Some(WireValue::OpTime(t)) => FreshnessReply::Success(PeerClaim::At(t)),
            Some(other) => FreshnessReply::Malformed {
                found: other.type_name(),
            },
            None => FreshnessReply::Malformed { found: "missing" },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemberConfig;

    fn config() -> ReplicaSetConfig {
        ReplicaSetConfig::new(
            "rs0",
            3,
            vec![
                MemberConfig::new(1, "h0".parse().unwrap()),
                MemberConfig::new(2, "h1".parse().unwrap()),
            ],
        )
    }

    #[test]
    fn request_carries_requester_identity() {
        let req = FreshnessRequest::new(&config(), OpTime::new(10, 0), 1).unwrap();
        assert_eq!(req.set, "rs0");
        assert_eq!(req.position, OpTime::new(10, 0));
        assert_eq!(req.who.to_string(), "h1:27017");
        assert_eq!(req.config_version, 3);
        assert_eq!(req.id, 2);
    }

    #[test]
    fn request_rejects_bad_index() {
        assert!(matches!(
            FreshnessRequest::new(&config(), OpTime::default(), 2),
            Err(ElectionError::SelfIndexOutOfRange { index: 2, members: 2 })
        ));
    }

    #[test]
    fn decode_position() {
        let reply = FreshnessReply::from(WireReply::at(OpTime::new(5, 1)));
        assert_eq!(reply, FreshnessReply::Success(PeerClaim::At(OpTime::new(5, 1))));
    }

    #[test]
    fn decode_fresher_overrides_position() {
        let reply = FreshnessReply::from(WireReply::at(OpTime::new(0, 0)).fresher());
        assert_eq!(reply, FreshnessReply::Success(PeerClaim::Fresher));
    }

    #[test]
    fn decode_veto_overrides_fresher() {
        let reply = FreshnessReply::from(
            WireReply::at(OpTime::new(0, 0))
                .fresher()
                .veto(Some("no")),
        );
        assert_eq!(
            reply,
            FreshnessReply::Success(PeerClaim::Veto {
                reason: Some("no".into())
            })
        );
    }

    #[test]
    fn decode_veto_without_position() {
        let reply = WireReply {
            ok: true,
            ..WireReply::default()
        }
        .veto(None);
        assert_eq!(
            FreshnessReply::from(reply),
            FreshnessReply::Success(PeerClaim::Veto { reason: None })
        );
    }

    #[test]
    fn decode_wrong_position_type() {
        let reply = FreshnessReply::from(WireReply::with_position_value(WireValue::Int(3)));
        assert_eq!(reply, FreshnessReply::Malformed { found: "int" });

        let reply = FreshnessReply::from(WireReply::with_position_value(WireValue::Str(
            "several minutes ago".into(),
        )));
        assert_eq!(reply, FreshnessReply::Malformed { found: "string" });
    }

    #[test]
    fn decode_missing_position() {
        let reply = WireReply {
            ok: true,
            ..WireReply::default()
        };
        assert_eq!(
            FreshnessReply::from(reply),
            FreshnessReply::Malformed { found: "missing" }
        );
    }

    #[test]
    fn decode_command_error_is_failure() {
        let reply = FreshnessReply::from(WireReply::error("unauthorized").fresher());
        assert_eq!(
            reply,
            FreshnessReply::Failed(TransportError::CommandFailed("unauthorized".into()))
        );
        assert!(reply.is_failure());
    }

    #[test]
    fn decode_transport_error() {
        let reply = FreshnessReply::decode(Err(TransportError::Cancelled));
        assert_eq!(reply, FreshnessReply::Failed(TransportError::Cancelled));
    }

    #[test]
    fn command_survives_bincode() {
        let req = FreshnessRequest::new(&config(), OpTime::new(1, 2), 0).unwrap();
        let cmd = WireCommand::FreshnessCheck(req);
        let bytes = bincode::serialize(&cmd).unwrap();
        let back: WireCommand = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, cmd);
        assert_eq!(back.name(), FRESHNESS_COMMAND);
    }
}
