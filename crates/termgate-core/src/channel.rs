//! Outbound half of a client channel.
//!
//! Components never touch the socket directly: they push text frames into an
//! `mpsc` queue that the connection's writer task drains.

use crate::error::{GateError, GateResult};
use tokio::sync::mpsc;

/// Default depth of the outbound frame queue.
pub const OUTBOUND_QUEUE: usize = 64;

/// Cloneable sender of text frames to one client.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<String>,
}

impl Outbound {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Create an outbound queue with the default depth.
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        (Self::new(tx), rx)
    }

    /// Queue one text frame. Fails once the writer side has gone away.
    pub async fn send(&self, frame: impl Into<String>) -> GateResult<()> {
        self.tx
            .send(frame.into())
            .await
            .map_err(|_| GateError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
