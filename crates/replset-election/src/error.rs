//! Error types for freshness checks.

use std::time::Duration;

use crate::HostAndPort;

/// Errors returned synchronously by the election layer.
#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    /// The candidate's own config index does not exist.
    #[error("self index {index} out of range for a {members}-member config")]
    SelfIndexOutOfRange { index: usize, members: usize },

    /// The candidate's own address was listed as a peer to query.
    #[error("own address {0} must not be among the freshness targets")]
    SelfInTargets(HostAndPort),

    /// A peer was listed more than once.
    #[error("freshness target {0} is listed more than once")]
    DuplicateTarget(HostAndPort),

    /// A round is already running on this checker.
    #[error("a freshness round is already in progress")]
    RoundInProgress,

    /// Results were requested before the round signaled completion.
    #[error("freshness round has not finished")]
    RoundNotFinished,

    /// The replica set configuration is invalid.
    #[error("invalid replica set configuration: {0}")]
    Configuration(String),

    /// The executor refused to schedule work.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Errors from the replication executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// `shutdown` has been called; no new work is accepted.
    #[error("executor is shutting down")]
    ShutdownInProgress,

    /// The executor was created outside a tokio runtime.
    #[error("no tokio runtime available to run remote commands")]
    NoRuntime,
}

/// Failure of a single remote command. Carries no peer data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer did not answer within the command timeout.
    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),

    /// The peer could not be reached.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// The command was cancelled before a reply arrived.
    #[error("remote command cancelled")]
    Cancelled,

    /// The peer answered with `ok: false`.
    #[error("command failed on peer: {0}")]
    CommandFailed(String),

    /// The reply could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Returns true if the command was cancelled rather than answered.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}
