//! replset-election: pre-election freshness checks for replica sets.
//!
//! Before a member stands for election it asks every voting peer whether
//! any of them has applied more of the operation log than it has. A single
//! fresher peer, a veto, or an unreadable reply is enough to stop the
//! candidacy; a peer at exactly the same position makes the round a tie.
//!
//! # Architecture
//!
//! - **Tally**: [`FreshnessTally`] folds peer replies into a verdict
//! - **Checker**: [`FreshnessChecker`] fans the question out and signals
//!   completion through an [`EventHandle`]
//! - **Executor**: [`ReplicationExecutor`] runs remote commands on tokio
//!   with timeouts and shutdown cancellation
//! - **Responder**: [`FreshnessResponder`] answers the question on the
//!   peer side
//! - **Transport**: [`TcpTransport`] and [`spawn_listener`] carry commands
//!   as length-prefixed bincode frames
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use replset_election::{
//!     ExecutorConfig, FreshnessChecker, OpTime, ReplicationExecutor, TcpTransport,
//! };
//!
//! let executor = ReplicationExecutor::new(Arc::new(TcpTransport::new()), ExecutorConfig::default())?;
//! let targets = config.freshness_targets(self_index)?;
//! let mut checker = FreshnessChecker::new();
//! let results = checker
//!     .check(&executor, OpTime::new(1700000000, 3), &config, self_index, &targets)
//!     .await?;
//! if let Some(reason) = results.abort_reason() {
//!     println!("not standing for election: {reason:?}");
//! }
//! ```

mod checker;
mod diagnostics;
mod error;
mod executor;
mod message;
#[cfg(any(test, feature = "test-util"))]
pub mod network_mock;
mod optime;
mod responder;
mod tally;
mod topology;
mod transport;

pub use checker::{AbortReason, FreshnessChecker, FreshnessResults};
pub use diagnostics::{CapturedLog, DiagnosticSink, TracingSink};
pub use error::{ElectionError, ExecutorError, TransportError};
pub use executor::{
    CallbackHandle, EventHandle, ExecutorConfig, RemoteCommandRequest, RemoteCommandResponse,
    ReplicationExecutor, Transport,
};
pub use message::{
    FreshnessReply, FreshnessRequest, PeerClaim, WireCommand, WireReply, WireValue,
    FRESHNESS_COMMAND,
};
pub use optime::OpTime;
pub use responder::{FreshnessResponder, LocalMemberState};
pub use tally::{FreshnessTally, SufficiencyPolicy};
pub use topology::{HostAndPort, MemberConfig, ReplicaSetConfig, DEFAULT_PORT};
pub use transport::{read_frame, spawn_listener, write_frame, TcpTransport, MAX_FRAME_SIZE};
