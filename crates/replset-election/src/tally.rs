//! Freshness tally: the decision engine of a freshness round.
//!
//! Before standing for election a candidate asks every other voting member
//! whether it is fresher. The tally ingests one reply per peer, in whatever
//! order they arrive, and maintains two flags:
//!
//! - `freshest` starts true and is cleared by any reply that disqualifies
//!   the candidate: a veto, an explicit `fresher` flag, a strictly greater
//!   optime, or a position field of the wrong type.
//! - `tied` starts false and is set by any peer reporting exactly the
//!   candidate's optime.
//!
//! A peer that could not be reached counts toward completion but never
//! disqualifies the candidate. The tally does no I/O and has no locking of
//! its own; callers serialize access.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::message::{FreshnessReply, PeerClaim};
use crate::{HostAndPort, OpTime, ReplicaSetConfig};

/// When a round has heard enough to deliver its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SufficiencyPolicy {
    /// Every targeted peer must answer, successfully or not.
    #[default]
    AllPeers,
    /// Stop as soon as the candidate is known not to be freshest.
    ///
    /// `freshest` is final at that point; `tied` only reflects the replies
    /// seen before the round stopped.
    StopOnDisqualify,
}

/// Running verdict for one freshness round.
///
/// Created when a round starts, mutated once per arriving reply, and
/// read-only once [`has_received_sufficient_responses`] returns true.
///
/// [`has_received_sufficient_responses`]: FreshnessTally::has_received_sufficient_responses
pub struct FreshnessTally {
    /// Candidate's last applied optime.
    last_applied: OpTime,
    /// Candidate's member id, for log context.
    self_id: Option<u32>,
    /// Peers that have not answered yet.
    pending: HashSet<HostAndPort>,
    /// Number of peers the round targets.
    expected: usize,
    /// Replies recorded so far, failures included.
    received: usize,
    freshest: bool,
    tied: bool,
    policy: SufficiencyPolicy,
    sink: Arc<dyn DiagnosticSink>,
}

impl FreshnessTally {
    /// Creates a tally for a round querying `targets`.
    ///
    /// `targets` must not contain the candidate itself, and a peer listed
    /// twice is only waited for once. A round with no targets is
    /// immediately sufficient, freshest and not tied.
    pub fn new(
        last_applied: OpTime,
        config: &ReplicaSetConfig,
        self_index: usize,
        targets: &[HostAndPort],
    ) -> Self {
        let pending: HashSet<HostAndPort> = targets.iter().cloned().collect();
        Self {
            last_applied,
            self_id: config.member_at(self_index).map(|m| m.id),
            expected: pending.len(),
            pending,
            received: 0,
            freshest: true,
            tied: false,
            policy: SufficiencyPolicy::default(),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_policy(mut self, policy: SufficiencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Routes disqualification diagnostics to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Records the reply from `target`.
    ///
    /// Must be called at most once per target per round. A second call for
    /// the same peer corrupts the completion count and is a caller bug.
    pub fn process_response(&mut self, target: &HostAndPort, reply: &FreshnessReply) {
        self.received += 1;
        let known = self.pending.remove(target);
        debug_assert!(known, "unexpected or duplicate freshness reply from {target}");
        debug!(
            %target,
            self_id = ?self.self_id,
            received = self.received,
            expected = self.expected,
            "freshness reply"
        );

        match reply {
            FreshnessReply::Failed(e) => {
                debug!(%target, error = %e, "no usable freshness reply");
            }
            FreshnessReply::Success(PeerClaim::Veto { reason }) => {
                self.freshest = false;
                match reason {
                    Some(reason) => self.sink.emit(&format!(
                        "not electing self, {target} would veto with '{reason}'"
                    )),
                    None => self
                        .sink
                        .emit(&format!("not electing self, {target} would veto")),
                }
            }
            FreshnessReply::Success(PeerClaim::Fresher) => {
                self.freshest = false;
                self.sink.emit(&format!(
                    "not electing self, we are not freshest: {target} reports itself fresher"
                ));
            }
            FreshnessReply::Malformed { found } => {
                self.freshest = false;
                self.sink.emit(&format!(
                    "wrong type for the freshness field in reply from {target}: {found}"
                ));
            }
            FreshnessReply::Success(PeerClaim::At(remote)) => {
                match remote.cmp(&self.last_applied) {
                    Ordering::Greater => {
                        self.freshest = false;
                        self.sink.emit(&format!(
                            "not electing self, we are not freshest: {target} is at {remote}, \
                             ahead of our {}",
                            self.last_applied
                        ));
                    }
                    Ordering::Equal => {
                        self.tied = true;
                        debug!(%target, optime = %remote, "tied for freshness");
                    }
                    Ordering::Less => {
                        debug!(%target, optime = %remote, "peer is behind us");
                    }
                }
            }
        }
    }

    /// Returns true once the round may deliver its verdict.
    pub fn has_received_sufficient_responses(&self) -> bool {
        if self.received >= self.expected {
            return true;
        }
        self.policy == SufficiencyPolicy::StopOnDisqualify && !self.freshest
    }

    /// Whether no peer has disqualified the candidate.
    pub fn is_freshest(&self) -> bool {
        self.freshest
    }

    /// Whether some peer reported exactly the candidate's optime.
    pub fn is_tied_for_freshest(&self) -> bool {
        self.tied
    }

    pub fn responses_received(&self) -> usize {
        self.received
    }

    pub fn expected_responses(&self) -> usize {
        self.expected
    }

    /// Peers that have not answered yet.
    pub fn outstanding(&self) -> impl Iterator<Item = &HostAndPort> {
        self.pending.iter()
    }
}
