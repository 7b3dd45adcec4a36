#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt::{self, Debug};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::error::{ABNORMAL_CLOSURE, WsError};
use super::state::{AfterClose, ConnectionState, Initiate, SessionMachine};
use super::traits::MessageParser;
use crate::Result;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type FrameCallback<M> = Box<dyn Fn(M) + Send + Sync>;
type ExhaustedHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Broadcast channel capacity for incoming messages.
const BROADCAST_CAPACITY: usize = 1024;

/// Reference to one physical connection attempt.
///
/// Every open (and every automatic reconnection) produces a new handle with a
/// new [`id`](Self::id). A handle is invalidated as soon as its connection
/// closes, so callers should ask the manager for the current handle instead of
/// holding on to one across reconnects.
///
/// Text sent while the connection is still being established is queued and
/// written once it opens; it is dropped if that attempt fails.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    sender_tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    fn new(id: u64, closed: CancellationToken) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        (
            Self {
                id,
                sender_tx,
                closed,
            },
            sender_rx,
        )
    }

    /// Identity of the connection attempt behind this handle.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether the connection behind this handle is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender_tx.is_closed()
    }

    /// Serialize `request` to JSON and send it as a text frame.
    ///
    /// The payload shape is not validated.
    pub fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.send_text(json)
    }

    /// Send a raw text frame.
    pub fn send_text(&self, text: String) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(WsError::ConnectionClosed.into());
        }
        self.sender_tx
            .send(text)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    fn invalidate(&self) {
        self.closed.cancel();
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.sender_tx.same_channel(&other.sender_tx)
    }
}

impl Eq for ConnectionHandle {}

/// Owns one logical real-time session: a single WebSocket connection that is
/// re-established with capped exponential backoff after unexpected loss.
///
/// - [`initiate`](Self::initiate) starts the session, or returns the existing
///   handle if a connection is live or being established
/// - [`handle`](Self::handle) returns the open handle, if any
/// - [`teardown`](Self::teardown) stops the session and suppresses reconnection
///
/// Each manager has its own state; independent sessions (for instance an agent
/// inbox and a customer widget) use independent managers.
///
/// The connection itself is driven by a background task, so `initiate` must
/// be called from within a Tokio runtime.
///
/// # Type Parameters
///
/// - `M`: Message type produced by the parser
/// - `P`: Parser type that implements [`MessageParser<M>`]
///
/// # Example
///
/// ```ignore
/// let connection = ConnectionManager::new(
///     "wss://chat.example.com/ws/agent",
///     "token",
///     Config::default(),
///     FrameParser,
/// )?;
///
/// connection.initiate(token, |frame: Frame| {
///     println!("Received: {frame:?}");
/// })?;
/// ```
pub struct ConnectionManager<M, P>
where
    M: Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    inner: Arc<Inner<M, P>>,
}

impl<M, P> Clone for ConnectionManager<M, P>
where
    M: Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M, P> Debug for ConnectionManager<M, P>
where
    M: Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("host", &self.inner.endpoint.host_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct Inner<M, P> {
    /// Base endpoint; the credential is appended as a query parameter
    endpoint: Url,
    /// Name of the query parameter carrying the credential
    credential_param: String,
    config: Config,
    parser: P,
    shared: Mutex<Shared>,
    /// Watch channel sender for state changes
    state_tx: watch::Sender<ConnectionState>,
    /// Broadcast sender for incoming messages
    broadcast_tx: broadcast::Sender<M>,
}

/// Lifecycle state guarded by one lock so that `teardown` is atomic.
struct Shared {
    machine: SessionMachine,
    /// Handle of the current attempt (connecting or connected)
    handle: Option<ConnectionHandle>,
    /// Cancels the retry timer and the live connection of the current epoch
    cancel: Option<CancellationToken>,
    on_exhausted: Option<ExhaustedHook>,
}

/// What the background driver keeps for reuse across reconnections.
struct Session<M> {
    epoch: u64,
    credential: SecretString,
    on_frame: FrameCallback<M>,
    cancel: CancellationToken,
}

impl<M, P> ConnectionManager<M, P>
where
    M: Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    /// Create an idle connection manager.
    ///
    /// `endpoint` must be a `ws://` or `wss://` URL. The credential passed to
    /// [`initiate`](Self::initiate) is sent as the `credential_param` query
    /// parameter.
    pub fn new(endpoint: &str, credential_param: &str, config: Config, parser: P) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "endpoint scheme must be ws or wss, got {}",
                endpoint.scheme()
            )));
        }
        if credential_param.is_empty() {
            return Err(Error::validation("credential parameter name must not be empty"));
        }

        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let machine = SessionMachine::new(config.reconnect);

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint,
                credential_param: credential_param.to_owned(),
                config,
                parser,
                shared: Mutex::new(Shared {
                    machine,
                    handle: None,
                    cancel: None,
                    on_exhausted: None,
                }),
                state_tx,
                broadcast_tx,
            }),
        })
    }

    /// Start the session, or return the current handle if a connection is
    /// already live or being established.
    ///
    /// `credential` and `on_frame` are kept for every automatic reconnection
    /// of this session. `on_frame` is called once per parsed message, in
    /// arrival order; a panic inside it is caught and logged.
    ///
    /// Calling `initiate` after [`teardown`](Self::teardown), after retries
    /// were exhausted, or while waiting to retry starts a fresh session with
    /// the new credential and callback.
    pub fn initiate<F>(&self, credential: String, on_frame: F) -> Result<ConnectionHandle>
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        if credential.is_empty() {
            return Err(Error::validation("session credential must not be empty"));
        }

        let mut shared = self.inner.lock();
        let (epoch, handle_id) = match shared.machine.initiate() {
            Initiate::Active => {
                return shared.handle.clone().ok_or_else(|| WsError::NotConnected.into());
            }
            Initiate::Start { epoch, handle_id } => (epoch, handle_id),
        };

        if let Some(previous) = shared.cancel.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        let (handle, sender_rx) = ConnectionHandle::new(handle_id, cancel.child_token());
        shared.handle = Some(handle.clone());
        shared.cancel = Some(cancel.clone());
        self.inner.publish(shared.machine.state());
        drop(shared);

        #[cfg(feature = "tracing")]
        tracing::debug!(host = ?self.inner.endpoint.host_str(), epoch, "Starting session");

        let session = Session {
            epoch,
            credential: SecretString::from(credential),
            on_frame: Box::new(on_frame),
            cancel,
        };
        tokio::spawn(Self::connection_loop(
            Arc::clone(&self.inner),
            session,
            sender_rx,
        ));

        Ok(handle)
    }

    /// The live handle, or `None` unless the connection is open.
    #[must_use]
    pub fn handle(&self) -> Option<ConnectionHandle> {
        let shared = self.inner.lock();
        if shared.machine.state().is_connected() {
            shared.handle.clone()
        } else {
            None
        }
    }

    /// Stop the session.
    ///
    /// Cancels any pending retry, closes the live connection and resets the
    /// attempt counter. No reconnection happens until the next
    /// [`initiate`](Self::initiate).
    pub fn teardown(&self) {
        let mut shared = self.inner.lock();
        shared.machine.teardown();
        if let Some(cancel) = shared.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = shared.handle.take() {
            handle.invalidate();
        }
        self.inner.publish(shared.machine.state());

        #[cfg(feature = "tracing")]
        tracing::debug!(host = ?self.inner.endpoint.host_str(), "Session torn down");
    }

    /// Register a hook called with the number of retries made when the
    /// session gives up reconnecting.
    pub fn on_exhausted<F>(&self, hook: F)
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.inner.lock().on_exhausted = Some(Arc::new(hook));
    }

    /// Send a request over the open connection.
    pub fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        self.handle().ok_or(WsError::NotConnected)?.send(request)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Retries scheduled since the last successful open.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.lock().machine.attempt()
    }

    /// Subscribe to incoming messages.
    ///
    /// Each call returns a new independent receiver, fed alongside the
    /// callback given to [`initiate`](Self::initiate).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<M> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Background driver for one session epoch.
    async fn connection_loop(
        inner: Arc<Inner<M, P>>,
        session: Session<M>,
        mut sender_rx: mpsc::UnboundedReceiver<String>,
    ) {
        let url = inner.session_url(&session.credential);

        loop {
            let attempt = tokio::select! {
                biased;
                () = session.cancel.cancelled() => return,
                result = timeout(inner.config.connect_timeout, connect_async(url.as_str())) => result,
            };

            let outcome = match attempt {
                Ok(Ok((ws_stream, _))) => {
                    let Some(closed) = inner.opened(session.epoch) else {
                        return;
                    };
                    Self::handle_connection(&inner, &session, ws_stream, &mut sender_rx, &closed)
                        .await
                }
                Ok(Err(e)) => Err(WsError::Connection(e)),
                Err(_elapsed) => Err(WsError::ConnectTimeout(inner.config.connect_timeout)),
            };

            let error = match outcome {
                Ok(()) => return,
                Err(e) => e,
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(host = ?inner.endpoint.host_str(), error = %error, "Connection lost");
            #[cfg(not(feature = "tracing"))]
            let _: &WsError = &error;

            let Some(delay) = inner.closed(session.epoch) else {
                return;
            };

            tokio::select! {
                biased;
                () = session.cancel.cancelled() => return,
                () = sleep(delay) => {}
            }

            let Some(next_rx) = inner.retry_due(session.epoch, &session.cancel) else {
                return;
            };
            sender_rx = next_rx;
        }
    }

    /// Pump an open connection until it closes.
    ///
    /// Returns `Ok(())` when the session was cancelled and the error that
    /// ended the connection otherwise.
    async fn handle_connection(
        inner: &Inner<M, P>,
        session: &Session<M>,
        ws_stream: WsStream,
        sender_rx: &mut mpsc::UnboundedReceiver<String>,
        closed: &CancellationToken,
    ) -> std::result::Result<(), WsError> {
        let (mut write, mut read) = ws_stream.split();
        let idle_timeout = inner.config.idle_timeout;
        let mut last_activity = Instant::now();

        let result = loop {
            tokio::select! {
                biased;

                () = session.cancel.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "session closed".into(),
                    };
                    _ = write.send(Message::Close(Some(frame))).await;
                    break Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_activity = Instant::now();
                            inner.deliver(&session.on_frame, text.as_str());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map_or(ABNORMAL_CLOSURE, |f| u16::from(f.code));
                            break Err(WsError::ClosedByPeer { code });
                        }
                        Some(Ok(_)) => {
                            // Pings, pongs and binary frames only prove liveness.
                            last_activity = Instant::now();
                        }
                        Some(Err(e)) => break Err(WsError::Connection(e)),
                        None => break Err(WsError::ClosedByPeer { code: ABNORMAL_CLOSURE }),
                    }
                }

                Some(text) = sender_rx.recv() => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        break Err(WsError::Connection(e));
                    }
                }

                () = idle_deadline(idle_timeout, last_activity) => {
                    break Err(WsError::IdleTimeout(idle_timeout.unwrap_or_default()));
                }
            }
        };

        closed.cancel();
        result
    }
}

/// Resolves once `idle_timeout` has passed since `last_activity`; never
/// resolves when the watchdog is disabled.
async fn idle_deadline(idle_timeout: Option<Duration>, last_activity: Instant) {
    match idle_timeout {
        Some(after) => sleep_until(last_activity + after).await,
        None => std::future::pending().await,
    }
}

impl<M, P> Inner<M, P>
where
    M: Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    // The guarded state has no inconsistent intermediate states, so a poisoned
    // lock is safe to recover.
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn session_url(&self, credential: &SecretString) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(&self.credential_param, credential.expose_secret());
        url
    }

    /// Record a successful open and return the token that invalidates its
    /// handle, or `None` if the session moved on meanwhile.
    fn opened(&self, epoch: u64) -> Option<CancellationToken> {
        let mut shared = self.lock();
        if !shared.machine.opened(epoch) {
            return None;
        }
        let closed = shared.handle.as_ref()?.closed.clone();
        self.publish(shared.machine.state());

        #[cfg(feature = "tracing")]
        tracing::info!(host = ?self.endpoint.host_str(), "Connected");

        Some(closed)
    }

    /// Record a lost connection and return the delay before the next retry.
    fn closed(&self, epoch: u64) -> Option<Duration> {
        let mut shared = self.lock();
        let after = shared.machine.closed(epoch);
        if after == AfterClose::Stale {
            return None;
        }

        if let Some(handle) = shared.handle.take() {
            handle.invalidate();
        }
        self.publish(shared.machine.state());

        match after {
            AfterClose::Retry { attempt, delay } => {
                #[cfg(feature = "tracing")]
                tracing::info!(attempt, ?delay, "Scheduling reconnection");
                #[cfg(not(feature = "tracing"))]
                let _ = attempt;
                Some(delay)
            }
            AfterClose::Exhausted { attempts } => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    host = ?self.endpoint.host_str(),
                    attempts,
                    "Reconnection attempts exhausted, giving up"
                );

                let hook = shared.on_exhausted.clone();
                drop(shared);
                if let Some(hook) = hook
                    && catch_unwind(AssertUnwindSafe(|| hook(attempts))).is_err()
                {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Exhaustion hook panicked");
                }
                None
            }
            AfterClose::Stale => None,
        }
    }

    /// The retry timer fired: prepare the handle for the next attempt.
    fn retry_due(
        &self,
        epoch: u64,
        cancel: &CancellationToken,
    ) -> Option<mpsc::UnboundedReceiver<String>> {
        let mut shared = self.lock();
        let handle_id = shared.machine.retry_due(epoch)?;
        let (handle, sender_rx) = ConnectionHandle::new(handle_id, cancel.child_token());
        shared.handle = Some(handle);
        self.publish(shared.machine.state());
        Some(sender_rx)
    }

    /// Parse one transport message and hand every message to the callback
    /// and to subscribers, in order.
    fn deliver(&self, on_frame: &FrameCallback<M>, text: &str) {
        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Received WebSocket text message");

        for message in self.parser.parse(text) {
            #[cfg(feature = "tracing")]
            tracing::trace!(?message, "Parsed WebSocket message");

            if self.broadcast_tx.receiver_count() > 0 {
                _ = self.broadcast_tx.send(message.clone());
            }

            if catch_unwind(AssertUnwindSafe(|| on_frame(message))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!("Frame callback panicked, continuing with the next frame");
            }
        }
    }
}
