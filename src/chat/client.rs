use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use super::dispatch::{Dispatcher, EventHandler};
use super::types::request::Command;
use super::types::response::{Conversation, Event, EventType};
use crate::Result;
use crate::ws::config::Config;
use crate::ws::{ConnectionHandle, ConnectionManager, ConnectionState, Frame, FrameParser, WsError};

/// Which side of the helpdesk a session speaks for.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    /// Authenticated agent inbox, credential is the agent's access token
    Agent,
    /// Embedded customer widget, credential is the company id
    Customer,
}

impl Channel {
    /// Query parameter carrying the session credential.
    #[must_use]
    pub const fn credential_param(self) -> &'static str {
        match self {
            Self::Agent => "token",
            Self::Customer => "company_id",
        }
    }
}

/// Helpdesk chat client for one real-time session.
///
/// Wraps a [`ConnectionManager`] speaking the `{type, payload}` frame protocol
/// and routes inbound frames either to an [`EventHandler`] via
/// [`connect`](Self::connect) or to a typed stream via [`events`](Self::events).
///
/// Clones share the same session. Independent sessions, such as the agent
/// inbox and the customer widget, use separate clients.
///
/// # Examples
///
/// ```rust, no_run
/// use butterchat_session::chat::{ChatMessage, Client, EventHandler};
/// use butterchat_session::ws::config::Config;
///
/// struct Inbox;
///
/// impl EventHandler for Inbox {
///     fn message(&self, message: &ChatMessage) {
///         println!("{}", message.content);
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::agent("wss://chat.example.com/ws/agent", Config::default())?;
///     client.connect(std::env::var("BUTTERCHAT_TOKEN")?, Inbox)?;
///
///     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
///     client.disconnect();
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    channel: Channel,
    connection: ConnectionManager<Frame, FrameParser>,
}

impl Client {
    /// Create an idle client for `channel` at `endpoint`.
    pub fn new(endpoint: &str, channel: Channel, config: Config) -> Result<Self> {
        let connection =
            ConnectionManager::new(endpoint, channel.credential_param(), config, FrameParser)?;

        Ok(Self {
            channel,
            connection,
        })
    }

    /// Create an idle agent inbox client.
    pub fn agent(endpoint: &str, config: Config) -> Result<Self> {
        Self::new(endpoint, Channel::Agent, config)
    }

    /// Create an idle customer widget client.
    pub fn customer(endpoint: &str, config: Config) -> Result<Self> {
        Self::new(endpoint, Channel::Customer, config)
    }

    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// The underlying connection manager.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager<Frame, FrameParser> {
        &self.connection
    }

    /// Start the session and route every inbound frame to `handler`.
    ///
    /// If a connection is already live or being established, its handle is
    /// returned and `handler` is dropped unused.
    ///
    /// AI reply streams left unfinished by a lost connection are discarded
    /// once frames arrive over the reconnected one.
    pub fn connect<H: EventHandler>(
        &self,
        credential: String,
        handler: H,
    ) -> Result<ConnectionHandle> {
        let dispatcher = Arc::new(Dispatcher::new(handler));

        #[cfg(feature = "tracing")]
        tracing::debug!(channel = %self.channel, "Connecting chat session");

        // Frames are delivered after their connection is published as
        // connected, so the watched state names the connection they came from.
        let state = self.connection.state_receiver();
        self.connection.initiate(credential, move |frame| {
            if let ConnectionState::Connected { handle_id, .. } = *state.borrow() {
                dispatcher.bind_connection(handle_id);
            }
            dispatcher.dispatch(frame);
        })
    }

    /// Start the session with a raw frame callback instead of a handler.
    pub fn connect_with<F>(&self, credential: String, on_frame: F) -> Result<ConnectionHandle>
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        self.connection.initiate(credential, on_frame)
    }

    /// The live connection handle, if the session is open.
    #[must_use]
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.connection.handle()
    }

    /// Close the session; no reconnection happens until the next connect.
    pub fn disconnect(&self) {
        self.connection.teardown();
    }

    /// Send a command over the open connection.
    pub fn send(&self, command: &Command) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!(command = command.tag(), "Sending chat command");

        self.connection.send(command)
    }

    /// Post a chat message.
    pub fn send_message(&self, content: &str, company_id: &str) -> Result<()> {
        self.send(&Command::message(content, company_id))
    }

    /// Take a waiting conversation.
    pub fn accept_chat(&self, conversation: Conversation) -> Result<()> {
        self.send(&Command::accept_chat(conversation))
    }

    /// Close a conversation.
    pub fn end_chat(&self, conversation_id: &str) -> Result<()> {
        self.send(&Command::end_chat(conversation_id))
    }

    /// Stream of decoded events, alongside any handler given to
    /// [`connect`](Self::connect).
    ///
    /// Frames that are not chat events are skipped. The stream ends with a
    /// [`WsError::Lagged`] error if the consumer falls too far behind.
    pub fn events(&self) -> impl Stream<Item = Result<Event>> {
        let mut rx = self.connection.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if EventType::from_tag(&frame.kind).is_none() {
                            continue;
                        }
                        match Event::try_from(frame) {
                            Ok(event) => yield event,
                            Err(e) => {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(error = %e, "Skipping undecodable chat event");
                                #[cfg(not(feature = "tracing"))]
                                let _: &crate::error::Error = &e;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Chat event stream lagged, missed {n} frames");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_receiver()
    }

    /// Register a hook called when the session gives up reconnecting.
    pub fn on_exhausted<F>(&self, hook: F)
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.connection.on_exhausted(hook);
    }
}
