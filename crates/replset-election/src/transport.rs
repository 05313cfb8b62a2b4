//! TCP transport for freshness commands.
//!
//! Length-prefixed framing: a 4-byte big-endian u32 length followed by a
//! bincode payload. A request is a single [`WireCommand`] frame and the
//! answer a single [`WireReply`] frame; each connection carries exactly
//! one exchange.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::executor::{RemoteCommandRequest, Transport};
use crate::message::{WireCommand, WireReply};
use crate::responder::FreshnessResponder;

/// Largest frame either side will accept (1 MiB). Freshness messages are a
/// few dozen bytes; anything near this size is garbage.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Writes a length-prefixed bincode frame to `w`.
pub async fn write_frame<W, T>(w: &mut W, msg: &T) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let data =
        bincode::serialize(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame size {} exceeds limit {MAX_FRAME_SIZE}", data.len()),
        ));
    }
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.put_u32(data.len() as u32);
    buf.put_slice(&data);
    w.write_all(&buf).await?;
    w.flush().await
}

/// Reads a length-prefixed bincode frame from `r`, rejecting oversized frames.
pub async fn read_frame<R, T>(r: &mut R) -> io::Result<T>
where
    R: AsyncReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let len = r.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame size {len} exceeds limit {MAX_FRAME_SIZE}"),
        ));
    }
    let mut data = BytesMut::zeroed(len);
    r.read_exact(&mut data).await?;
    bincode::deserialize(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Sends remote commands over short-lived TCP connections.
///
/// Timeouts are left to the executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }

    async fn exchange(request: RemoteCommandRequest) -> Result<WireReply, TransportError> {
        let target = &request.target;
        let mut stream = TcpStream::connect((target.host(), target.port()))
            .await
            .map_err(|e| TransportError::Unreachable(format!("{target}: {e}")))?;
        write_frame(&mut stream, &request.command)
            .await
            .map_err(io_to_transport)?;
        read_frame(&mut stream).await.map_err(io_to_transport)
    }
}

fn io_to_transport(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::InvalidData => TransportError::Protocol(e.to_string()),
        _ => TransportError::Unreachable(e.to_string()),
    }
}

impl Transport for TcpTransport {
    fn call(
        &self,
        request: RemoteCommandRequest,
    ) -> BoxFuture<'static, Result<WireReply, TransportError>> {
        Self::exchange(request).boxed()
    }
}

/// Binds `bind_addr` and spawns a task answering freshness requests on it.
///
/// Each connection reads one [`WireCommand`] frame, writes the responder's
/// reply, and closes. Returns the bound address, which differs from
/// `bind_addr` when port 0 was requested.
pub async fn spawn_listener(
    bind_addr: SocketAddr,
    responder: Arc<FreshnessResponder>,
) -> io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!("freshness listener on {local_addr}");

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("freshness accept error: {e}");
                    continue;
                }
            };

            let responder = Arc::clone(&responder);
            tokio::spawn(async move {
                let command: WireCommand = match read_frame(&mut stream).await {
                    Ok(c) => c,
                    Err(e) => {
                        debug!("freshness read error from {peer}: {e}");
                        return;
                    }
                };
                let reply = responder.handle(&command);
                if let Err(e) = write_frame(&mut stream, &reply).await {
                    debug!("freshness write error to {peer}: {e}");
                }
            });
        }
    });

    Ok((local_addr, handle))
}
