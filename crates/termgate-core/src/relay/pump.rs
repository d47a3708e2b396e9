//! Bidirectional pump between a client channel and its backend connection.
//!
//! Two forwarding tasks run per pairing, one per direction. They share a
//! [`CancellationToken`]: whichever task stops first cancels the other, and
//! each task closes the sink it owns on the way out, so both sockets are
//! closed whichever side went away.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on closing one sink during teardown.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One end of a pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Backend,
}

/// Summary of a finished pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingReport {
    /// Frames forwarded client → backend.
    pub client_to_backend: u64,
    /// Frames forwarded backend → client.
    pub backend_to_client: u64,
    /// Side whose connection ended the pairing; `None` when it was cancelled
    /// from outside.
    pub ended_by: Option<Side>,
}

/// Relay frames between `client` and `backend` until either side closes or
/// `shutdown` is cancelled.
///
/// Text and binary frames are forwarded verbatim; control frames are left to
/// the WebSocket layer. Returns once both forwarding tasks have stopped and
/// both sinks have been closed.
pub async fn pump<C, B>(client: C, backend: B, shutdown: &CancellationToken) -> PairingReport
where
    C: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
    B: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
{
    let (client_tx, client_rx) = client.split();
    let (backend_tx, backend_rx) = backend.split();
    let cancel = shutdown.child_token();
    let ended_by = Arc::new(OnceLock::new());

    let upstream = tokio::spawn(forward(
        Side::Client,
        Side::Backend,
        client_rx,
        backend_tx,
        cancel.clone(),
        ended_by.clone(),
    ));
    let downstream = tokio::spawn(forward(
        Side::Backend,
        Side::Client,
        backend_rx,
        client_tx,
        cancel.clone(),
        ended_by.clone(),
    ));

    let (upstream, downstream) = tokio::join!(upstream, downstream);
    let client_to_backend = upstream.unwrap_or_else(|e| {
        warn!(error = %e, "client → backend task failed");
        0
    });
    let backend_to_client = downstream.unwrap_or_else(|e| {
        warn!(error = %e, "backend → client task failed");
        0
    });

    PairingReport {
        client_to_backend,
        backend_to_client,
        ended_by: ended_by.get().copied(),
    }
}

/// Forward frames from `rx` to `tx` until the source ends, the sink fails or
/// the pairing is cancelled. Returns the number of frames forwarded.
async fn forward<R, W>(
    source: Side,
    sink: Side,
    mut rx: R,
    mut tx: W,
    cancel: CancellationToken,
    ended_by: Arc<OnceLock<Side>>,
) -> u64
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message, Error = WsError> + Unpin,
{
    let mut frames = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(?source, "forwarding cancelled");
                break;
            }
            next = rx.next() => {
                match next {
                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                        if let Err(e) = tx.send(msg).await {
                            debug!(?sink, error = %e, "forward write failed");
                            let _ = ended_by.set(sink);
                            break;
                        }
                        frames += 1;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(?source, "peer closed");
                        let _ = ended_by.set(source);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(?source, error = %e, "forward read failed");
                        let _ = ended_by.set(source);
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
    if tokio::time::timeout(CLOSE_GRACE, tx.close()).await.is_err() {
        warn!(?sink, "close timed out");
    }
    frames
}
