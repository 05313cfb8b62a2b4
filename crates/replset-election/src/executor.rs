//! The scheduling substrate freshness rounds run on.
//!
//! A [`ReplicationExecutor`] sends remote commands concurrently through a
//! [`Transport`] and hands each outcome to a completion callback. It also
//! provides one-shot completion events and a shutdown switch: once
//! [`shutdown`](ReplicationExecutor::shutdown) is called, new work is
//! refused and every outstanding command completes with
//! [`TransportError::Cancelled`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, Instrument};

use crate::error::{ExecutorError, TransportError};
use crate::message::{WireCommand, WireReply};
use crate::HostAndPort;

/// Sends one command to one peer and returns its reply document.
pub trait Transport: Send + Sync + 'static {
    fn call(&self, request: RemoteCommandRequest)
        -> BoxFuture<'static, Result<WireReply, TransportError>>;
}

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Applied to remote commands that do not carry their own timeout.
    pub command_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// A command addressed to one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCommandRequest {
    pub target: HostAndPort,
    pub command: WireCommand,
    /// Overrides [`ExecutorConfig::command_timeout`] when set.
    pub timeout: Option<Duration>,
}

impl RemoteCommandRequest {
    pub fn new(target: HostAndPort, command: WireCommand) -> Self {
        Self {
            target,
            command,
            timeout: None,
        }
    }
}

/// What a completion callback receives.
#[derive(Debug)]
pub struct RemoteCommandResponse {
    pub request: RemoteCommandRequest,
    pub outcome: Result<WireReply, TransportError>,
    pub elapsed: Duration,
}

/// Handle to a scheduled remote command.
#[derive(Debug)]
pub struct CallbackHandle {
    target: HostAndPort,
    abort: AbortHandle,
}

impl CallbackHandle {
    pub fn target(&self) -> &HostAndPort {
        &self.target
    }

    /// Cancels the command. Its callback will not run if it has not
    /// started yet.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// A one-shot completion event.
///
/// Clones refer to the same event. Signaling is idempotent: only the first
/// call has an effect.
#[derive(Debug, Clone)]
pub struct EventHandle {
    state: Arc<watch::Sender<bool>>,
}

impl EventHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Signals the event. Returns true if this call was the one that did.
    pub fn signal(&self) -> bool {
        self.state.send_if_modified(|signaled| {
            if *signaled {
                false
            } else {
                *signaled = true;
                true
            }
        })
    }

    pub fn is_signaled(&self) -> bool {
        *self.state.borrow()
    }

    /// Waits until the event is signaled.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|signaled| *signaled).await;
    }
}

struct ExecutorInner {
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
    shutdown_tx: watch::Sender<bool>,
    runtime: Handle,
}

/// Runs remote commands for freshness rounds.
///
/// Cheap to clone; clones share the transport and the shutdown state.
#[derive(Clone)]
pub struct ReplicationExecutor {
    inner: Arc<ExecutorInner>,
}

impl std::fmt::Debug for ReplicationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationExecutor")
            .field("config", &self.inner.config)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl ReplicationExecutor {
    /// Creates an executor that spawns its work on the current tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ExecutorConfig,
    ) -> Result<Self, ExecutorError> {
        let runtime = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(ExecutorInner {
                transport,
                config,
                shutdown_tx,
                runtime,
            }),
        })
    }

    /// Sends `request` concurrently and calls `on_reply` with the outcome.
    ///
    /// Fails synchronously if the executor is shutting down. Otherwise the
    /// callback runs exactly once, unless the returned handle is cancelled
    /// first: with the peer's reply, a transport error, a timeout, or
    /// [`TransportError::Cancelled`] if the executor shuts down meanwhile.
    pub fn schedule_remote_command<F>(
        &self,
        request: RemoteCommandRequest,
        on_reply: F,
    ) -> Result<CallbackHandle, ExecutorError>
    where
        F: FnOnce(RemoteCommandResponse) + Send + 'static,
    {
        if self.is_shutting_down() {
            return Err(ExecutorError::ShutdownInProgress);
        }

        let target = request.target.clone();
        let timeout = request.timeout.unwrap_or(self.inner.config.command_timeout);
        let call = self.inner.transport.call(request.clone());
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let span = tracing::debug_span!(
            "remote_command",
            target = %request.target,
            command = request.command.name()
        );

        let task = self.inner.runtime.spawn(
            async move {
                let started = Instant::now();
                let outcome = tokio::select! {
                    biased;
                    _ = shutdown_signaled(&mut shutdown_rx) => Err(TransportError::Cancelled),
                    res = tokio::time::timeout(timeout, call) => match res {
                        Ok(outcome) => outcome,
                        Err(_) => Err(TransportError::Timeout(timeout)),
                    },
                };
                let elapsed = started.elapsed();
                debug!(ok = outcome.is_ok(), ?elapsed, "remote command finished");
                on_reply(RemoteCommandResponse {
                    request,
                    outcome,
                    elapsed,
                });
            }
            .instrument(span),
        );

        Ok(CallbackHandle {
            target,
            abort: task.abort_handle(),
        })
    }

    /// Creates an unsignaled completion event.
    pub fn make_event(&self) -> Result<EventHandle, ExecutorError> {
        if self.is_shutting_down() {
            return Err(ExecutorError::ShutdownInProgress);
        }
        Ok(EventHandle::new())
    }

    pub fn signal_event(&self, event: &EventHandle) {
        event.signal();
    }

    pub async fn wait_for_event(&self, event: &EventHandle) {
        event.wait().await;
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Refuses new work and cancels every outstanding remote command.
    pub fn shutdown(&self) {
        let changed = self.inner.shutdown_tx.send_if_modified(|down| {
            let was = *down;
            *down = true;
            !was
        });
        if changed {
            debug!("replication executor shutting down");
        }
    }
}

async fn shutdown_signaled(rx: &mut watch::Receiver<bool>) {
    // a dropped executor counts as shut down
    let _ = rx.wait_for(|down| *down).await;
}
