//! Freshness checker: drives one freshness round over the executor.
//!
//! `start` validates the candidate's position in the config, builds a
//! single [`FreshnessRequest`], and fans it out to every target through the
//! [`ReplicationExecutor`]. Each completion callback feeds the shared
//! [`FreshnessTally`] under a mutex; whichever callback makes the tally
//! sufficient signals the round's [`EventHandle`]. Signaling is guarded by
//! an atomic flag so racing callbacks cannot finish the round twice.
//!
//! If the executor shuts down while requests are outstanding, the round is
//! still completed: it resolves as freshest and not tied, since a node that
//! is shutting down cannot go on to campaign anyway.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::error::TransportError;
use crate::executor::{
    CallbackHandle, EventHandle, RemoteCommandRequest, RemoteCommandResponse, ReplicationExecutor,
};
use crate::message::{FreshnessReply, FreshnessRequest, WireCommand};
use crate::tally::{FreshnessTally, SufficiencyPolicy};
use crate::{ElectionError, HostAndPort, OpTime, ReplicaSetConfig};

/// Why a candidate should not stand for election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Some peer is fresher, vetoed, or sent an unreadable position.
    FresherNodeFound,
    /// Some peer has exactly our optime.
    FreshnessTie,
}

/// Final verdict of a freshness round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessResults {
    pub freshest: bool,
    pub tied: bool,
}

impl FreshnessResults {
    pub fn abort_reason(&self) -> Option<AbortReason> {
        if !self.freshest {
            Some(AbortReason::FresherNodeFound)
        } else if self.tied {
            Some(AbortReason::FreshnessTie)
        } else {
            None
        }
    }
}

/// State shared between the checker and its in-flight callbacks.
struct Round {
    tally: Mutex<FreshnessTally>,
    finished: AtomicBool,
    /// Set when the round was cut short by executor shutdown.
    shutdown_resolved: AtomicBool,
    event: EventHandle,
    in_flight: Mutex<Vec<CallbackHandle>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Round {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Remembers a scheduled command, or cancels it if the round is over.
    fn track(&self, handle: CallbackHandle) {
        let mut in_flight = lock(&self.in_flight);
        if self.is_finished() {
            handle.cancel();
        } else {
            in_flight.push(handle);
        }
    }

    /// Runs under the tally lock from start to finish, so no reply can
    /// touch the tally once the round is over.
    fn on_reply(&self, response: RemoteCommandResponse, shutting_down: bool) {
        let mut tally = lock(&self.tally);
        if self.is_finished() {
            debug!(target = %response.request.target, "reply after round finished, ignoring");
            return;
        }

        debug!(
            target = %response.request.target,
            elapsed = ?response.elapsed,
            "freshness reply received"
        );
        if shutting_down && response.outcome.as_ref().is_err_and(TransportError::is_cancelled) {
            info!(
                outstanding = tally.expected_responses() - tally.responses_received(),
                "executor shutting down, resolving freshness round as freshest"
            );
            self.shutdown_resolved.store(true, Ordering::Release);
            self.finish();
            return;
        }

        let reply = FreshnessReply::decode(response.outcome);
        tally.process_response(&response.request.target, &reply);
        if tally.has_received_sufficient_responses() {
            info!(
                freshest = tally.is_freshest(),
                tied = tally.is_tied_for_freshest(),
                responses = tally.responses_received(),
                "freshness check finished"
            );
            self.finish();
        }
    }

    /// Marks the round finished, cancels what is still in flight, and
    /// signals completion. Only the first call has any effect.
    fn finish(&self) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        for handle in lock(&self.in_flight).drain(..) {
            if !handle.is_finished() {
                debug!(target = %handle.target(), "cancelling outstanding freshness request");
                handle.cancel();
            }
        }
        self.event.signal();
    }

    /// Tears the round down without signaling completion.
    fn abandon(&self) {
        self.finished.store(true, Ordering::Release);
        for handle in lock(&self.in_flight).drain(..) {
            handle.cancel();
        }
    }

    fn results(&self) -> FreshnessResults {
        if self.shutdown_resolved.load(Ordering::Acquire) {
            return FreshnessResults {
                freshest: true,
                tied: false,
            };
        }
        let tally = lock(&self.tally);
        FreshnessResults {
            freshest: tally.is_freshest(),
            tied: tally.is_tied_for_freshest(),
        }
    }
}

/// Runs freshness rounds for a candidate, one at a time.
pub struct FreshnessChecker {
    policy: SufficiencyPolicy,
    sink: Arc<dyn DiagnosticSink>,
    round: Option<Arc<Round>>,
}

impl std::fmt::Debug for FreshnessChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshnessChecker")
            .field("policy", &self.policy)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Default for FreshnessChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl FreshnessChecker {
    pub fn new() -> Self {
        Self {
            policy: SufficiencyPolicy::default(),
            sink: Arc::new(TracingSink),
            round: None,
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

    /// Returns true while a started round has not completed.
    pub fn is_running(&self) -> bool {
        self.round.as_ref().is_some_and(|r| !r.is_finished())
    }

    /// Starts a round asking every address in `targets` whether it is
    /// fresher than `last_applied`.
    ///
    /// Returns the event that is signaled exactly once when the round
    /// completes. Fails without scheduling anything if `self_index` is not
    /// in `config`, if the candidate's own address is among `targets`, if
    /// a peer is listed twice, if a round is still running, or if the
    /// executor is shutting down.
    pub fn start(
        &mut self,
        executor: &ReplicationExecutor,
        last_applied: OpTime,
        config: &ReplicaSetConfig,
        self_index: usize,
        targets: &[HostAndPort],
    ) -> Result<EventHandle, ElectionError> {
        if self.is_running() {
            return Err(ElectionError::RoundInProgress);
        }
        let request = FreshnessRequest::new(config, last_applied, self_index)?;
        if targets.contains(&request.who) {
            return Err(ElectionError::SelfInTargets(request.who));
        }
        let mut seen = HashSet::with_capacity(targets.len());
        if let Some(dup) = targets.iter().find(|t| !seen.insert(*t)) {
            return Err(ElectionError::DuplicateTarget(dup.clone()));
        }

        let tally = FreshnessTally::new(last_applied, config, self_index, targets)
            .with_policy(self.policy)
            .with_sink(Arc::clone(&self.sink));
        let event = executor.make_event()?;
        let round = Arc::new(Round {
            tally: Mutex::new(tally),
            finished: AtomicBool::new(false),
            shutdown_resolved: AtomicBool::new(false),
            event: event.clone(),
            in_flight: Mutex::new(Vec::with_capacity(targets.len())),
        });
        self.round = Some(Arc::clone(&round));

        info!(
            set = %config.name,
            optime = %last_applied,
            peers = targets.len(),
            "starting freshness check"
        );

        if targets.is_empty() {
            round.finish();
            return Ok(event);
        }

        let command = WireCommand::FreshnessCheck(request);
        for target in targets {
            let cb_round = Arc::clone(&round);
            let cb_executor = executor.clone();
            let scheduled = executor.schedule_remote_command(
                RemoteCommandRequest::new(target.clone(), command.clone()),
                move |response| cb_round.on_reply(response, cb_executor.is_shutting_down()),
            );
            match scheduled {
                Ok(handle) => round.track(handle),
                Err(e) => {
                    round.abandon();
                    self.round = None;
                    return Err(e.into());
                }
            }
        }

        Ok(event)
    }

    /// The verdict of the last round.
    ///
    /// Only available once the round's event has been signaled; returns the
    /// same values however often it is called.
    pub fn results(&self) -> Result<FreshnessResults, ElectionError> {
        match &self.round {
            Some(round) if round.event.is_signaled() => Ok(round.results()),
            _ => Err(ElectionError::RoundNotFinished),
        }
    }

    /// Runs a whole round: starts it, waits for completion, and returns
    /// the verdict.
    pub async fn check(
        &mut self,
        executor: &ReplicationExecutor,
        last_applied: OpTime,
        config: &ReplicaSetConfig,
        self_index: usize,
        targets: &[HostAndPort],
    ) -> Result<FreshnessResults, ElectionError> {
        let event = self.start(executor, last_applied, config, self_index, targets)?;
        executor.wait_for_event(&event).await;
        self.results()
    }
}

impl Drop for FreshnessChecker {
    fn drop(&mut self) {
        if let Some(round) = self.round.take() {
            if !round.is_finished() {
                round.abandon();
            }
        }
    }
}
