//! Scriptable in-memory network for tests.
//!
//! Every remote command sent through a [`MockNetwork`] is queued as a
//! [`PendingRequest`]. A test pulls requests off the queue in the order
//! they were sent and answers or fails each one. A request the test keeps
//! but never answers models a silent peer; dropping it reports the peer as
//! unreachable.

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::TransportError;
use crate::executor::{RemoteCommandRequest, Transport};
use crate::message::{FreshnessRequest, WireCommand, WireReply};
use crate::HostAndPort;

type ReplySender = oneshot::Sender<Result<WireReply, TransportError>>;

/// A request that has been sent but not yet answered.
#[derive(Debug)]
pub struct PendingRequest {
    request: RemoteCommandRequest,
    reply_tx: ReplySender,
}

impl PendingRequest {
    pub fn target(&self) -> &HostAndPort {
        &self.request.target
    }

    /// The freshness question carried by this request.
    pub fn freshness_request(&self) -> &FreshnessRequest {
        match &self.request.command {
            WireCommand::FreshnessCheck(req) => req,
        }
    }

    /// Delivers `reply` as the peer's answer.
    pub fn respond(self, reply: WireReply) {
        let _ = self.reply_tx.send(Ok(reply));
    }

    /// Fails the command with `error`.
    pub fn fail(self, error: TransportError) {
        let _ = self.reply_tx.send(Err(error));
    }
}

/// An in-memory [`Transport`] driven by the test.
pub struct MockNetwork {
    requests_tx: mpsc::UnboundedSender<PendingRequest>,
    requests_rx: Mutex<mpsc::UnboundedReceiver<PendingRequest>>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        Self {
            requests_tx,
            requests_rx: Mutex::new(requests_rx),
        }
    }

    /// Waits for the next request sent through this network.
    pub async fn next_request(&self) -> Option<PendingRequest> {
        self.requests_rx.lock().await.recv().await
    }

    /// Returns the next request if one is already queued.
    pub fn try_next_request(&self) -> Option<PendingRequest> {
        self.requests_rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Transport for MockNetwork {
    fn call(
        &self,
        request: RemoteCommandRequest,
    ) -> BoxFuture<'static, Result<WireReply, TransportError>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let queued = self
            .requests_tx
            .send(PendingRequest { request, reply_tx })
            .is_ok();
        async move {
            if !queued {
                return Err(TransportError::Unreachable("mock network closed".into()));
            }
            match reply_rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Unreachable(
                    "request dropped without a reply".into(),
                )),
            }
        }
        .boxed()
    }
}
