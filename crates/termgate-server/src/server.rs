//! Core server: accepts channels and serves each one locally or through the relay.
//!
//! Owns the selected service and the shutdown tokens. Every upgraded channel
//! runs on its own task; on shutdown the listener stops, open channels are
//! told and closed, and stragglers are aborted after [`SHUTDOWN_GRACE`].

use crate::config::{Mode, ServerConfig};
use crate::transport::{self, BrowserSocket, OriginPolicy};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{future, SinkExt, Stream, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use termgate_core::relay::pump::CLOSE_GRACE;
use termgate_core::{
    frames, BackendLocator, CommandPolicy, Dispatcher, GateError, GateResult, LocalGateway,
    Outbound, ProcessRunner, RelayGateway, SessionRegistry, ShellRunner,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Time open channels get to wind down after shutdown is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How accepted channels are served.
enum Service {
    Local(LocalGateway),
    Relay(RelayGateway),
}

/// The termgate server instance.
pub struct GatewayServer {
    config: ServerConfig,
    service: Service,
    origins: OriginPolicy,
    /// Cancelled once the listener stops taking new channels.
    shutdown: CancellationToken,
    /// Cancelled when the grace period runs out.
    abort: CancellationToken,
    channels: TaskTracker,
}

impl GatewayServer {
    /// Create a server, reading backend port overrides from the process environment.
    pub fn new(config: ServerConfig) -> GateResult<Self> {
        Self::with_backends(config, BackendLocator::from_env)
    }

    /// Create a server, passing the configured backend mapping through
    /// `overrides` first. Only relay mode builds a locator.
    pub fn with_backends(
        config: ServerConfig,
        overrides: impl FnOnce(BackendLocator) -> GateResult<BackendLocator>,
    ) -> GateResult<Self> {
        let shutdown = CancellationToken::new();
        let service = match config.mode {
            Mode::Local => {
                let registry = Arc::new(SessionRegistry::new(config.max_sessions));
                let policy = CommandPolicy::new(config.agent_commands.clone());
                let runner: Arc<dyn ProcessRunner> =
                    Arc::new(ShellRunner::new(config.exec.working_dir.clone()));
                let dispatcher = Dispatcher::new(policy, runner, config.exec.clone());
                Service::Local(LocalGateway::new(registry, dispatcher))
            }
            Mode::Relay => {
                let locator = overrides(config.locator())?;
                let relay = RelayGateway::new(locator, config.connect_timeout)
                    .with_shutdown(shutdown.clone());
                Service::Relay(relay)
            }
        };
        Ok(Self {
            origins: OriginPolicy::new(config.allowed_origins.clone()),
            config,
            service,
            shutdown,
            abort: CancellationToken::new(),
            channels: TaskTracker::new(),
        })
    }

    pub fn origins(&self) -> &OriginPolicy {
        &self.origins
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Bind the configured address and serve until `shutdown_signal` resolves.
    pub async fn run(
        self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> GateResult<()> {
        let bind_addr = self.config.bind_addr;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| GateError::Transport(format!("bind {bind_addr} failed: {e}")))?;
        self.serve(listener, shutdown_signal).await
    }

    /// Serve the status page and channels on `listener` until
    /// `shutdown_signal` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> GateResult<()> {
        let local_addr = listener.local_addr()?;
        let server = Arc::new(self);
        info!(
            addr = %local_addr,
            mode = ?server.config.mode,
            max_sessions = server.config.max_sessions,
            "termgate-server ready"
        );

        let app = transport::router(server.clone());
        let shutdown = server.shutdown.clone();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal.await;
            info!("received shutdown signal");
            shutdown.cancel();
        })
        .await
        .map_err(|e| GateError::Transport(format!("HTTP server error: {e}")))?;
        server.shutdown.cancel();

        if let Service::Local(gateway) = &server.service {
            for session in gateway.registry().list().await {
                debug!(
                    session_key = %session.key,
                    age_secs = session.age_secs,
                    buffered_chars = session.buffered_chars,
                    "session open at shutdown"
                );
            }
        }
        server.channels.close();
        info!(open = server.channels.len(), "closing open channels");
        if tokio::time::timeout(SHUTDOWN_GRACE, server.channels.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = server.channels.len(),
                "channels still open after grace period, aborting"
            );
            server.abort.cancel();
            server.channels.wait().await;
        }
        Ok(())
    }

    /// Serve an upgraded channel until it closes or the server aborts it.
    pub fn accept_channel(
        self: Arc<Self>,
        socket: WebSocket,
        remote_addr: SocketAddr,
        session_key: String,
    ) -> impl Future<Output = ()> + Send + 'static {
        let abort = self.abort.clone();
        self.channels.clone().track_future(async move {
            tokio::select! {
                _ = self.handle_channel(socket, remote_addr, &session_key) => {}
                _ = abort.cancelled() => {
                    warn!(remote = %remote_addr, session_key = %session_key, "channel aborted");
                }
            }
        })
    }

    async fn handle_channel(&self, socket: WebSocket, remote_addr: SocketAddr, session_key: &str) {
        info!(remote = %remote_addr, session_key = %session_key, "channel opened");

        let result = match &self.service {
            Service::Local(gateway) => self.serve_local(gateway, session_key, socket).await,
            Service::Relay(gateway) => gateway
                .serve(session_key, BrowserSocket::new(socket))
                .await
                .map(|_| ()),
        };
        match result {
            Ok(()) => info!(remote = %remote_addr, session_key = %session_key, "channel closed"),
            Err(e) => warn!(
                remote = %remote_addr,
                session_key = %session_key,
                error = %e,
                "channel closed with error"
            ),
        }
    }

    async fn serve_local(
        &self,
        gateway: &LocalGateway,
        session_key: &str,
        socket: WebSocket,
    ) -> GateResult<()> {
        let (mut sink, stream) = socket.split();
        let (out, mut out_rx) = Outbound::channel();

        // Writer task: drains the outbound queue into the socket.
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    debug!(error = %e, "channel write failed");
                    break;
                }
            }
            let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
        });

        let inbound =
            inbound_text(stream).take_until(Box::pin(self.shutdown.clone().cancelled_owned()));
        let result = gateway.serve(session_key, inbound, out.clone()).await;
        if self.shutdown.is_cancelled() {
            let _ = out.send(frames::fatal("server shutting down")).await;
        }
        drop(out);
        let _ = writer.await;
        result
    }
}

/// Text frames of a channel as command input.
///
/// Ends at a close frame or when the socket fails; binary and control
/// frames are skipped.
fn inbound_text<S>(stream: S) -> impl Stream<Item = GateResult<String>> + Unpin
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    stream
        .take_while(|msg| {
            future::ready(match msg {
                Ok(Message::Close(_)) => false,
                Ok(_) => true,
                Err(e) => {
                    debug!(error = %e, "channel read failed");
                    false
                }
            })
        })
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok::<_, GateError>(text.to_string())),
                Ok(Message::Binary(data)) => {
                    debug!(len = data.len(), "ignoring binary frame");
                    None
                }
                _ => None,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliOverrides;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::header::ORIGIN;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
    use tokio_tungstenite::WebSocketStream;

    type Client = WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

    fn test_config(mode: Mode) -> ServerConfig {
        let cli = CliOverrides {
            port: Some(0),
            bind: Some("127.0.0.1".into()),
            mode: Some(mode),
            ..Default::default()
        };
        ServerConfig::load(None, &cli).unwrap()
    }

    /// Start `config` on an ephemeral port; the sender stops it.
    async fn start(config: ServerConfig) -> (SocketAddr, oneshot::Sender<()>, JoinHandle<GateResult<()>>) {
        let listener = TcpListener::bind(config.bind_addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = GatewayServer::with_backends(config, Ok).unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(listener, async move {
            let _ = stop_rx.await;
        }));
        (addr, stop_tx, task)
    }

    async fn next_text(client: &mut Client) -> String {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("channel ended")
            .expect("channel error");
        match msg {
            WsMessage::Text(text) => text.to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Send a raw HTTP/1.1 request and read the whole response.
    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_local_channel_runs_pwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(Mode::Local);
        config.exec.working_dir = Some(dir.path().to_path_buf());
        let (addr, stop, task) = start(config).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/ws-shell/pm"))
            .await
            .unwrap();
        for key in ["p", "w", "d"] {
            client.send(WsMessage::text(key)).await.unwrap();
            assert_eq!(next_text(&mut client).await, key);
        }
        client.send(WsMessage::text("\r")).await.unwrap();
        assert_eq!(
            next_text(&mut client).await,
            format!("\r\n📁 {}\r\n", dir.path().display())
        );
        assert_eq!(next_text(&mut client).await, frames::PROMPT);

        client.close(None).await.unwrap();
        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_local_blocked_command() {
        let (addr, stop, task) = start(test_config(Mode::Local)).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/ws-shell/backend"))
            .await
            .unwrap();
        for key in ["r", "m"] {
            client.send(WsMessage::text(key)).await.unwrap();
            assert_eq!(next_text(&mut client).await, key);
        }
        client.send(WsMessage::text("\r")).await.unwrap();
        assert_eq!(next_text(&mut client).await, frames::blocked("rm"));
        assert!(next_text(&mut client).await.starts_with("💡 Try: "));
        assert_eq!(next_text(&mut client).await, frames::PROMPT);

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slow_command_does_not_stall_other_channels() {
        let (addr, stop, task) = start(test_config(Mode::Local)).await;

        let (mut slow, _) = connect_async(format!("ws://{addr}/ws-shell/pm"))
            .await
            .unwrap();
        let (mut quick, _) = connect_async(format!("ws://{addr}/ws-shell/backend"))
            .await
            .unwrap();

        slow.send(WsMessage::text("date; sleep 3")).await.unwrap();
        assert_eq!(next_text(&mut slow).await, "date; sleep 3");
        slow.send(WsMessage::text("\r")).await.unwrap();

        quick.send(WsMessage::text("help")).await.unwrap();
        assert_eq!(next_text(&mut quick).await, "help");
        let started = Instant::now();
        quick.send(WsMessage::text("\r")).await.unwrap();
        assert!(next_text(&mut quick)
            .await
            .starts_with("\r\n📋 Available Commands:\r\n"));
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "help waited on the other channel's command"
        );
        assert_eq!(next_text(&mut quick).await, frames::PROMPT);

        // The slow command still finishes on its own channel.
        let stdout = next_text(&mut slow).await;
        assert!(stdout.starts_with("\r\n") && stdout.trim().len() > 4);
        assert_eq!(next_text(&mut slow).await, frames::COMPLETED);
        assert_eq!(next_text(&mut slow).await, frames::PROMPT);

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_notifies_open_channels() {
        let (addr, stop, task) = start(test_config(Mode::Local)).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/ws-shell/pm"))
            .await
            .unwrap();
        client.send(WsMessage::text("l")).await.unwrap();
        assert_eq!(next_text(&mut client).await, "l");

        stop.send(()).unwrap();
        assert_eq!(
            next_text(&mut client).await,
            frames::fatal("server shutting down")
        );
        match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
            Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
            other => panic!("expected close, got {other:?}"),
        }
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_status_page_on_same_port() {
        let (addr, stop, task) = start(test_config(Mode::Local)).await;

        let response = http_get(addr, "/").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.to_ascii_lowercase().contains("content-type: text/html"));
        assert!(response.ends_with(transport::http::BANNER));

        let response = http_get(addr, "/status").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_upgrade_to_unknown_path_is_not_found() {
        let (addr, stop, task) = start(test_config(Mode::Local)).await;

        for path in ["/shell/pm", "/ws-shell/pm/extra"] {
            match connect_async(format!("ws://{addr}{path}")).await {
                Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 404),
                other => panic!("expected 404 for {path}, got {:?}", other.map(|_| ())),
            }
        }

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_foreign_origin_refused() {
        let mut config = test_config(Mode::Local);
        config.allowed_origins = vec!["http://localhost:3000".to_string()];
        let (addr, stop, task) = start(config).await;
        let url = format!("ws://{addr}/ws-shell/pm");

        let mut request = url.as_str().into_client_request().unwrap();
        request
            .headers_mut()
            .insert(ORIGIN, "http://evil.example".parse().unwrap());
        match connect_async(request).await {
            Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 403),
            other => panic!("expected 403, got {:?}", other.map(|_| ())),
        }

        let mut request = url.as_str().into_client_request().unwrap();
        request
            .headers_mut()
            .insert(ORIGIN, "http://localhost:3000".parse().unwrap());
        let (mut client, _) = connect_async(request).await.unwrap();
        client.send(WsMessage::text("x")).await.unwrap();
        assert_eq!(next_text(&mut client).await, "x");

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_relay_channel_reaches_backend() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_port = backend.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = backend.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() && ws.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let mut config = test_config(Mode::Relay);
        config.relay_host = "127.0.0.1".into();
        config.relay_backends = [("pm".to_string(), backend_port)].into_iter().collect();
        let (addr, stop, task) = start(config).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/ws-shell/pm"))
            .await
            .unwrap();
        client.send(WsMessage::text("ls\r")).await.unwrap();
        assert_eq!(next_text(&mut client).await, "ls\r");

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_relay_unknown_key_closes_channel() {
        let (addr, stop, task) = start(test_config(Mode::Relay)).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/ws-shell/nope"))
            .await
            .unwrap();
        assert_eq!(
            next_text(&mut client).await,
            frames::fatal("unknown session key: nope")
        );

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_backend_overrides_apply_only_in_relay_mode() {
        let mut config = test_config(Mode::Relay);
        config.relay_backends = [("pm".to_string(), 7681)].into_iter().collect();
        let bad = |locator: BackendLocator| {
            locator.with_env_overrides(vec![("TTYD_PM_PORT".to_string(), "x".to_string())])
        };
        assert!(matches!(
            GatewayServer::with_backends(config, bad),
            Err(GateError::Config(_))
        ));
        assert!(GatewayServer::with_backends(test_config(Mode::Local), bad).is_ok());
    }
}
