//! Channel endpoint: WebSocket upgrades on `/ws-shell/{sessionKey}`.
//!
//! The Origin check runs before the upgrade completes, so refused browsers
//! get a plain HTTP 403 and never reach a gateway.

use crate::server::GatewayServer;
use axum::extract::ws::{self, WebSocket};
use axum::extract::{ConnectInfo, Path, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

/// Browser origins allowed to open channels.
///
/// Requests without an `Origin` header come from non-browser clients and
/// are accepted. An empty allowlist accepts every origin.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.allowed.is_empty() => true,
            Some(origin) => self.allowed.iter().any(|a| a == origin),
        }
    }
}

/// `GET /ws-shell/{key}`: check the origin, then hand the upgraded socket
/// to the server.
pub async fn channel_upgrade(
    State(server): State<Arc<GatewayServer>>,
    Path(session_key): Path<String>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    // A header that is not valid UTF-8 is still an origin, just never an allowed one.
    let origin = headers
        .get(header::ORIGIN)
        .map(|v| v.to_str().unwrap_or_default());
    if !server.origins().allows(origin) {
        warn!(remote = %remote_addr, origin = ?origin, "channel upgrade refused: origin not allowed");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    if server.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    debug!(remote = %remote_addr, session_key = %session_key, "channel accepted");
    ws.on_upgrade(move |socket| server.accept_channel(socket, remote_addr, session_key))
}

/// A browser socket seen through tungstenite's message types, so the relay
/// pump can pair it with a backend connection.
pub struct BrowserSocket {
    inner: WebSocket,
}

impl BrowserSocket {
    pub fn new(inner: WebSocket) -> Self {
        Self { inner }
    }
}

impl Stream for BrowserSocket {
    type Item = Result<Message, WsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(self.inner.poll_next_unpin(cx));
        Poll::Ready(item.map(|msg| msg.map(to_tungstenite).map_err(transport_error)))
    }
}

impl Sink<Message> for BrowserSocket {
    type Error = WsError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        self.inner.poll_ready_unpin(cx).map_err(transport_error)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
        match from_tungstenite(item) {
            Some(msg) => self.inner.start_send_unpin(msg).map_err(transport_error),
            None => Ok(()),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        self.inner.poll_flush_unpin(cx).map_err(transport_error)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        self.inner.poll_close_unpin(cx).map_err(transport_error)
    }
}

fn transport_error(e: axum::Error) -> WsError {
    WsError::Io(std::io::Error::other(e))
}

fn to_tungstenite(msg: ws::Message) -> Message {
    match msg {
        ws::Message::Text(text) => Message::Text(text.to_string()),
        ws::Message::Binary(data) => Message::Binary(data.to_vec()),
        ws::Message::Ping(data) => Message::Ping(data.to_vec()),
        ws::Message::Pong(data) => Message::Pong(data.to_vec()),
        ws::Message::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: Cow::Owned(f.reason.to_string()),
        })),
    }
}

/// Raw frames have no axum counterpart and are dropped.
fn from_tungstenite(msg: Message) -> Option<ws::Message> {
    Some(match msg {
        Message::Text(text) => ws::Message::Text(text.into()),
        Message::Binary(data) => ws::Message::Binary(data.into()),
        Message::Ping(data) => ws::Message::Ping(data.into()),
        Message::Pong(data) => ws::Message::Pong(data.into()),
        Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: f.code.into(),
            reason: f.reason.into_owned().into(),
        })),
        Message::Frame(_) => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_policy() {
        let policy = OriginPolicy::new(vec!["http://localhost:3000".to_string()]);
        assert!(policy.allows(None));
        assert!(policy.allows(Some("http://localhost:3000")));
        assert!(!policy.allows(Some("http://evil.example")));
        assert!(!policy.allows(Some("")));
        assert!(OriginPolicy::default().allows(Some("http://evil.example")));
    }

    #[test]
    fn test_close_frame_survives_conversion() {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: Cow::Borrowed("bye"),
        }));
        let converted = from_tungstenite(close.clone()).unwrap();
        match &converted {
            ws::Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(to_tungstenite(converted), close);
    }

    #[test]
    fn test_text_and_binary_conversion() {
        assert_eq!(
            to_tungstenite(ws::Message::Text("ls".into())),
            Message::text("ls")
        );
        assert_eq!(
            from_tungstenite(Message::binary(vec![1u8, 2])),
            Some(ws::Message::Binary(vec![1u8, 2].into()))
        );
    }
}
