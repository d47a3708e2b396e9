//! Local executor channel service.
//!
//! Serves one client channel end to end: registers the session, feeds each
//! inbound frame through the line editor, dispatches completed lines and
//! writes every reply to the channel's [`Outbound`] queue.

use crate::channel::Outbound;
use crate::error::{GateError, GateResult};
use crate::exec::Dispatcher;
use crate::frames;
use crate::session::{EditOutcome, LineEditor, SessionRegistry};
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Variant A gateway: commands are interpreted and executed on this host.
pub struct LocalGateway {
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
}

impl LocalGateway {
    pub fn new(registry: Arc<SessionRegistry>, dispatcher: Dispatcher) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Serve a channel until its inbound stream ends.
    ///
    /// The session is released on every exit path. A peer that goes away is
    /// a clean end; any other failure is reported on the channel with a
    /// best-effort notice and returned so the caller can close the socket.
    pub async fn serve<S>(&self, session_key: &str, mut inbound: S, out: Outbound) -> GateResult<()>
    where
        S: Stream<Item = GateResult<String>> + Unpin,
    {
        let handle = match self.registry.open(session_key).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(session_key = %session_key, error = %e, "session refused");
                let _ = out.send(frames::fatal(&e.to_string())).await;
                return Err(e);
            }
        };
        let active = self.registry.count().await;
        info!(
            session_key = %session_key,
            conn_id = handle.conn_id(),
            active,
            "channel active"
        );

        let editor = LineEditor::new(self.registry.clone(), handle.clone());
        let result = self.channel_loop(&editor, &mut inbound, &out).await;
        self.registry.close(&handle).await;

        match result {
            Ok(()) | Err(GateError::ChannelClosed) => {
                debug!(session_key = %session_key, "channel ended");
                Ok(())
            }
            Err(e) => {
                warn!(session_key = %session_key, error = %e, "channel failed");
                let _ = out.send(frames::fatal(&e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn channel_loop<S>(&self, editor: &LineEditor, inbound: &mut S, out: &Outbound) -> GateResult<()>
    where
        S: Stream<Item = GateResult<String>> + Unpin,
    {
        let session_key = editor.handle().key();
        while let Some(frame) = inbound.next().await {
            let frame = frame?;
            match editor.feed(&frame).await? {
                EditOutcome::Echo(echo) => out.send(echo).await?,
                EditOutcome::Submitted(command) => {
                    if let Some(command) = command {
                        self.dispatcher.dispatch(session_key, &command, out).await?;
                    }
                    out.send(frames::PROMPT).await?;
                }
            }
        }
        Ok(())
    }
}
