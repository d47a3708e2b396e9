//! Relay forwarder: pairs each client channel with an external terminal
//! backend instead of executing commands locally.
//!
//! # Data Flow
//!
//! ```text
//! channel open (session key)
//!   → BackendLocator::locate      ✗ → error frame, channel closed
//!   → connect_async(backend url)  ✗ → error frame, channel closed
//!   → pump(client, backend)       → two forwarding tasks until either closes
//! ```

pub mod locator;
pub mod pump;

pub use locator::BackendLocator;
pub use pump::{pump, PairingReport, Side};

use crate::error::{GateError, GateResult};
use crate::frames;
use futures_util::{Sink, SinkExt, Stream};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default bound on establishing the backend connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Variant B gateway: every channel is relayed to its backend.
pub struct RelayGateway {
    locator: BackendLocator,
    connect_timeout: Duration,
    /// Cancelled when the server stops; tears down every pairing.
    shutdown: CancellationToken,
}

impl RelayGateway {
    pub fn new(locator: BackendLocator, connect_timeout: Duration) -> Self {
        Self {
            locator,
            connect_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Tie every pairing to `shutdown`.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Open the backend connection for `session_key`.
    ///
    /// # Errors
    ///
    /// [`GateError::UnknownSessionKey`] when the key has no backend, and
    /// [`GateError::BackendUnreachable`] when the connection cannot be made
    /// within the connect timeout. No retry is attempted.
    pub async fn connect(
        &self,
        session_key: &str,
    ) -> GateResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let url = self.locator.locate(session_key)?;
        match tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(GateError::BackendUnreachable(format!("{url}: {e}"))),
            Err(_) => Err(GateError::BackendUnreachable(format!(
                "{url}: connect timed out after {}s",
                self.connect_timeout.as_secs()
            ))),
        }
    }

    /// Relay `client` to its backend until either side closes.
    ///
    /// On a locate or connect failure the client receives one error frame and
    /// is closed, and the error is returned.
    pub async fn serve<C>(&self, session_key: &str, mut client: C) -> GateResult<PairingReport>
    where
        C: Stream<Item = Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Send
            + Unpin
            + 'static,
    {
        let backend = match self.connect(session_key).await {
            Ok(backend) => backend,
            Err(e) => {
                warn!(session_key = %session_key, error = %e, "backend unavailable");
                let _ = client.send(Message::text(frames::fatal(&e.to_string()))).await;
                let _ = client.close().await;
                return Err(e);
            }
        };

        info!(session_key = %session_key, "pairing established");
        let report = pump(client, backend, &self.shutdown).await;
        info!(
            session_key = %session_key,
            client_to_backend = report.client_to_backend,
            backend_to_client = report.backend_to_client,
            ended_by = ?report.ended_by,
            "pairing ended"
        );
        Ok(report)
    }
}
