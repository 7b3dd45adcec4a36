//! Core WebSocket session infrastructure.
//!
//! This module provides a generic, reconnecting connection that can be
//! specialized for different message protocols through the [`MessageParser`]
//! trait.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Owns one logical session, reconnects with capped exponential backoff
//! - [`ConnectionHandle`]: Reference to the current physical connection, used to send frames
//! - [`MessageParser`]: Trait for parsing incoming WebSocket messages
//! - [`frame`]: Splitting of concatenated JSON frames
//!
//! # Example
//!
//! ```ignore
//! let connection = ConnectionManager::new(endpoint, "token", Config::default(), FrameParser)?;
//! let handle = connection.initiate(token, |frame: Frame| println!("{frame:?}"))?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod state;
pub mod traits;

pub use connection::{ConnectionHandle, ConnectionManager};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use frame::{Frame, FrameParser, parse_frames};
pub use state::{CloseReason, ConnectionState};
pub use traits::*;
