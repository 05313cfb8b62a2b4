//! Peer side of the freshness check.
//!
//! A [`FreshnessResponder`] answers freshness requests on behalf of the
//! local member. It reports its own position, says whether it is fresher
//! than the requester, and vetoes requesters that must not become primary.

use std::sync::RwLock;

use tracing::{debug, info};

use crate::message::{FreshnessRequest, WireCommand, WireReply};
use crate::{ElectionError, MemberConfig, OpTime, ReplicaSetConfig};

/// What the local member knows about itself and its set.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMemberState {
    pub config: ReplicaSetConfig,
    /// Config index of the local member.
    pub self_index: usize,
    pub last_applied: OpTime,
    /// Member id of the current primary, if one is known.
    pub primary: Option<u32>,
}

impl LocalMemberState {
    /// Fails if `self_index` does not name a member of `config`.
    pub fn new(
        config: ReplicaSetConfig,
        self_index: usize,
        last_applied: OpTime,
    ) -> Result<Self, ElectionError> {
        if self_index >= config.members.len() {
            return Err(ElectionError::SelfIndexOutOfRange {
                index: self_index,
                members: config.members.len(),
            });
        }
        Ok(Self {
            config,
            self_index,
            last_applied,
            primary: None,
        })
    }

    fn me(&self) -> &MemberConfig {
        // checked in `new` and `FreshnessResponder::set_config`
        &self.config.members[self.self_index]
    }

    /// The reason to refuse `request`'s candidacy, if there is one.
    fn veto_reason(&self, request: &FreshnessRequest) -> Option<String> {
        let who = &request.who;
        let Some(hopeful) = self.config.find_by_id(request.id) else {
            return Some(format!("couldn't find member with id {}", request.id));
        };

        let me = self.me();
        if self.primary == Some(me.id) {
            return Some(format!(
                "I am already primary, {who} can try again once I've stepped down"
            ));
        }
        if let Some(primary) = self
            .primary
            .filter(|&id| id != hopeful.id)
            .and_then(|id| self.config.find_by_id(id))
        {
            return Some(format!(
                "{who} is trying to elect itself but {} is already primary",
                primary.host
            ));
        }
        if !hopeful.is_electable() {
            return Some(format!("{who} is not electable"));
        }
        None
    }
}

/// Answers freshness requests for the local member.
///
/// Local state can be updated while requests are being served.
#[derive(Debug)]
pub struct FreshnessResponder {
    state: RwLock<LocalMemberState>,
}

impl FreshnessResponder {
    pub fn new(state: LocalMemberState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn last_applied(&self) -> OpTime {
        self.read().last_applied
    }

    pub fn set_last_applied(&self, position: OpTime) {
        self.write().last_applied = position;
    }

    /// Records `id` as the current primary, or forgets the primary.
    pub fn set_primary(&self, id: Option<u32>) {
        self.write().primary = id;
    }

    /// Installs a new configuration. Leaves the old one in place on error.
    pub fn set_config(
        &self,
        config: ReplicaSetConfig,
        self_index: usize,
    ) -> Result<(), ElectionError> {
        if self_index >= config.members.len() {
            return Err(ElectionError::SelfIndexOutOfRange {
                index: self_index,
                members: config.members.len(),
            });
        }
        let mut state = self.write();
        state.config = config;
        state.self_index = self_index;
        Ok(())
    }

    /// Dispatches an inbound command.
    pub fn handle(&self, command: &WireCommand) -> WireReply {
        match command {
            WireCommand::FreshnessCheck(request) => self.respond(request),
        }
    }

    /// Builds the reply to one freshness request.
    pub fn respond(&self, request: &FreshnessRequest) -> WireReply {
        let state = self.read();
        if request.set != state.config.name {
            debug!(set = %request.set, who = %request.who, "freshness request for another set");
            return WireReply::error("wrong repl set name");
        }

        let me = state.me();
        let mut reply = WireReply::at(state.last_applied).identified_as(
            me.id,
            &state.config.name,
            &me.host,
            state.config.version,
        );

        let fresher = if state.config.version > request.config_version {
            debug!(
                who = %request.who,
                theirs = request.config_version,
                ours = state.config.version,
                "requester has a stale config"
            );
            true
        } else {
            request.position < state.last_applied
        };
        reply.fresher = Some(fresher);

        match state.veto_reason(request) {
            Some(reason) => {
                info!(who = %request.who, %reason, "vetoing freshness request");
                reply.veto = Some(true);
                reply.errmsg = Some(reason);
            }
            None => reply.veto = Some(false),
        }

        debug!(
            who = %request.who,
            theirs = %request.position,
            ours = %state.last_applied,
            fresher,
            "answered freshness request"
        );
        reply
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LocalMemberState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LocalMemberState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
