#![expect(
    clippy::module_name_repetitions,
    reason = "Re-exported names intentionally match their modules for API clarity"
)]

//! ButterChat helpdesk protocol on top of the [`ws`](crate::ws) session layer.
//!
//! # Inbound events
//!
//! | Tag | Event |
//! |---|---|
//! | `connection_established` | [`ConnectionEstablished`] |
//! | `transfer_chat` | [`ChatTransfer`] |
//! | `accept_chat` | [`Conversation`] |
//! | `message` | [`ChatMessage`] |
//! | `end_chat` | [`ChatEnded`] |
//! | `butter_typing_start` | [`StreamStart`] |
//! | `butter_stream` | [`StreamChunk`] |
//! | `butter_typing_end` | [`StreamEnd`] |
//!
//! # Example
//!
//! ```rust, no_run
//! use butterchat_session::chat::{Client, Event};
//! use butterchat_session::ws::config::Config;
//! use futures::StreamExt as _;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::customer("wss://chat.example.com/ws/widget", Config::default())?;
//!     let mut events = Box::pin(client.events());
//!     client.connect_with("acme".to_owned(), |_frame| {})?;
//!
//!     while let Some(event) = events.next().await {
//!         if let Event::Message(message) = event? {
//!             println!("{}", message.content);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod dispatch;
pub mod error;
pub mod types;

pub use client::{Channel, Client};
pub use dispatch::{Dispatcher, EventHandler, StreamRegistry};
pub use error::ChatError;
pub use types::request::{Command, EndChat, OutgoingMessage};
pub use types::response::{
    ChatEnded, ChatMessage, ChatTransfer, ConnectionEstablished, Conversation, ConversationStatus,
    Event, EventType, SenderKind, StreamChunk, StreamEnd, StreamStart,
};
