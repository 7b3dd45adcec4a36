#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use butterchat_session::ws::ConnectionState;
use butterchat_session::ws::config::{Config, ReconnectConfig};
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const WAIT: Duration = Duration::from_secs(2);

/// What the mock server does to every open connection.
#[derive(Debug, Clone)]
enum Control {
    /// Drop the TCP connection without a close frame
    Drop,
    /// Send a close frame with the given code
    Close(u16),
}

/// Mock WebSocket server.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast messages to ALL connected clients
    message_tx: broadcast::Sender<String>,
    control_tx: broadcast::Sender<Control>,
    /// Text frames received from clients
    received_rx: mpsc::UnboundedReceiver<String>,
    /// Close frames received from clients, as close codes
    closes_rx: mpsc::UnboundedReceiver<u16>,
    /// Request URIs of every completed handshake, in order
    uris: Arc<Mutex<Vec<String>>>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<String>(100);
        let (control_tx, _) = broadcast::channel::<Control>(16);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();
        let (closes_tx, closes_rx) = mpsc::unbounded_channel::<u16>();
        let uris = Arc::new(Mutex::new(Vec::new()));

        let broadcast_tx = message_tx.clone();
        let control = control_tx.clone();
        let handshakes = Arc::clone(&uris);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                // Subscribe before the handshake so nothing sent after the
                // client sees the connection open is lost.
                let mut msg_rx = broadcast_tx.subscribe();
                let mut control_rx = control.subscribe();
                let handshakes = Arc::clone(&handshakes);

                let callback = move |request: &Request, response: Response| {
                    handshakes.lock().unwrap().push(request.uri().to_string());
                    Ok::<Response, ErrorResponse>(response)
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();
                let closes_tx = closes_tx.clone();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(received_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(frame))) => {
                                        let code = frame.map_or(1005, |f| u16::from(f.code));
                                        drop(closes_tx.send(code));
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            msg = msg_rx.recv() => {
                                match msg {
                                    Ok(text) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                            control = control_rx.recv() => {
                                match control {
                                    Ok(Control::Close(code)) => {
                                        let frame = CloseFrame {
                                            code: CloseCode::from(code),
                                            reason: "server closing".into(),
                                        };
                                        drop(write.send(Message::Close(Some(frame))).await);
                                        break;
                                    }
                                    Ok(Control::Drop) | Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            message_tx,
            control_tx,
            received_rx,
            closes_rx,
            uris,
        }
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Send a text message to all connected clients.
    pub fn send(&self, message: &str) {
        drop(self.message_tx.send(message.to_owned()));
    }

    /// Drop every open connection without a close frame.
    pub fn disconnect_all(&self) {
        drop(self.control_tx.send(Control::Drop));
    }

    /// Close every open connection with `code`.
    pub fn close_all(&self, code: u16) {
        drop(self.control_tx.send(Control::Close(code)));
    }

    /// Number of completed handshakes so far.
    pub fn connection_count(&self) -> usize {
        self.uris.lock().unwrap().len()
    }

    /// Request URIs of every completed handshake.
    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().unwrap().clone()
    }

    /// Receive the next text frame sent by a client.
    pub async fn recv(&mut self) -> Option<String> {
        timeout(WAIT, self.received_rx.recv()).await.ok().flatten()
    }

    /// Receive the close code of the next client-initiated close.
    pub async fn recv_close(&mut self) -> Option<u16> {
        timeout(WAIT, self.closes_rx.recv()).await.ok().flatten()
    }
}

/// An endpoint nothing listens on.
pub async fn unreachable_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws/agent")
}

/// Short schedule so reconnection tests finish quickly.
pub fn fast_config(max_attempts: u32) -> Config {
    Config::builder()
        .reconnect(
            ReconnectConfig::builder()
                .base_delay(Duration::from_millis(50))
                .cap_delay(Duration::from_millis(200))
                .max_attempts(max_attempts)
                .build(),
        )
        .connect_timeout(Duration::from_secs(1))
        .build()
}

/// Wait until the watched state satisfies `predicate`.
pub async fn wait_for_state<F>(
    state_rx: &mut watch::Receiver<ConnectionState>,
    predicate: F,
) -> ConnectionState
where
    F: FnMut(&ConnectionState) -> bool,
{
    let state = timeout(WAIT, state_rx.wait_for(predicate))
        .await
        .expect("timed out waiting for connection state")
        .expect("state channel closed");
    *state
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}
