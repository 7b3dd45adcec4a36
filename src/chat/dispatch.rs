//! Routing of decoded frames to handler callbacks.
//!
//! [`Dispatcher`] turns each [`Frame`] into an [`Event`] and calls exactly one
//! [`EventHandler`] method for it. Frames with an unknown tag or a payload that
//! does not decode are logged and dropped; they never stop the session.
//!
//! The AI reply sub-channel (`butter_typing_start`, `butter_stream`,
//! `butter_typing_end`) is stateful. Text chunks are accumulated per stream id
//! in a [`StreamRegistry`], so several replies may be in flight at once and a
//! late chunk never lands in the wrong buffer. Streams are bound to the
//! connection they started on: when frames start arriving over a new
//! connection, every stream left open by the previous one is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;

use super::types::response::{
    ChatEnded, ChatMessage, ChatTransfer, ConnectionEstablished, Conversation, Event, EventType,
    StreamChunk, StreamEnd, StreamStart,
};
use crate::ws::Frame;

/// Callbacks for inbound chat events.
///
/// Every method has an empty default, so implementors only override the
/// events they care about. Methods are called from the connection's
/// background task, one frame at a time and in arrival order.
pub trait EventHandler: Send + Sync + 'static {
    fn connection_established(&self, _event: &ConnectionEstablished) {}

    fn chat_transferred(&self, _transfer: &ChatTransfer) {}

    fn chat_accepted(&self, _conversation: &Conversation) {}

    fn message(&self, _message: &ChatMessage) {}

    fn chat_ended(&self, _ended: &ChatEnded) {}

    /// The AI agent started a reply identified by `start.stream_id`.
    fn typing_started(&self, _start: &StreamStart) {}

    /// `chunk` was appended to stream `stream_id`; `buffer` is the text so far.
    fn stream_updated(&self, _stream_id: &str, _chunk: &str, _buffer: &str) {}

    /// Stream `stream_id` finished with the full reply `content`.
    fn typing_ended(&self, _stream_id: &str, _content: &str) {}
}

impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    fn connection_established(&self, event: &ConnectionEstablished) {
        (**self).connection_established(event);
    }

    fn chat_transferred(&self, transfer: &ChatTransfer) {
        (**self).chat_transferred(transfer);
    }

    fn chat_accepted(&self, conversation: &Conversation) {
        (**self).chat_accepted(conversation);
    }

    fn message(&self, message: &ChatMessage) {
        (**self).message(message);
    }

    fn chat_ended(&self, ended: &ChatEnded) {
        (**self).chat_ended(ended);
    }

    fn typing_started(&self, start: &StreamStart) {
        (**self).typing_started(start);
    }

    fn stream_updated(&self, stream_id: &str, chunk: &str, buffer: &str) {
        (**self).stream_updated(stream_id, chunk, buffer);
    }

    fn typing_ended(&self, stream_id: &str, content: &str) {
        (**self).typing_ended(stream_id, content);
    }
}

/// Open AI reply streams keyed by stream id.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    buffers: DashMap<String, String>,
    /// Most recently started stream, target of chunks that carry no id
    latest: RwLock<Option<String>>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `stream_id` with an empty buffer and make it the latest stream.
    ///
    /// Returns `true` when the id was already open; its buffer is discarded.
    pub fn start(&self, stream_id: &str) -> bool {
        let restarted = self
            .buffers
            .insert(stream_id.to_owned(), String::new())
            .is_some();
        // Recover from poisoning: Option<String> has no inconsistent intermediate state
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(stream_id.to_owned());
        restarted
    }

    /// Append `chunk` to `stream_id`, or to the latest stream when `None`.
    ///
    /// Returns the resolved id and the buffer after appending, or `None` when
    /// the target stream is not open.
    pub fn append(&self, stream_id: Option<&str>, chunk: &str) -> Option<(String, String)> {
        let stream_id = self.resolve(stream_id)?;
        let mut buffer = self.buffers.get_mut(&stream_id)?;
        buffer.push_str(chunk);
        let snapshot = buffer.clone();
        drop(buffer);
        Some((stream_id, snapshot))
    }

    /// Close `stream_id` (or the latest stream) and return its id and text.
    pub fn finish(&self, stream_id: Option<&str>) -> Option<(String, String)> {
        let stream_id = self.resolve(stream_id)?;
        let (stream_id, buffer) = self.buffers.remove(&stream_id)?;

        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        if latest.as_deref() == Some(stream_id.as_str()) {
            *latest = None;
        }
        drop(latest);

        Some((stream_id, buffer))
    }

    /// Text accumulated so far for an open stream.
    #[must_use]
    pub fn buffer(&self, stream_id: &str) -> Option<String> {
        self.buffers.get(stream_id).map(|buffer| buffer.clone())
    }

    #[must_use]
    pub fn is_open(&self, stream_id: &str) -> bool {
        self.buffers.contains_key(stream_id)
    }

    /// Number of open streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// The most recently started stream that is still open.
    #[must_use]
    pub fn latest(&self) -> Option<String> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop every open stream, e.g. after the connection was lost.
    pub fn clear(&self) {
        self.buffers.clear();
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn resolve(&self, stream_id: Option<&str>) -> Option<String> {
        stream_id.map(ToOwned::to_owned).or_else(|| self.latest())
    }
}

/// Routes frames to an [`EventHandler`].
#[derive(Debug)]
pub struct Dispatcher<H> {
    handler: H,
    streams: StreamRegistry,
    /// Id of the connection the open streams belong to
    connection: AtomicU64,
}

impl<H: EventHandler> Dispatcher<H> {
    #[must_use]
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            streams: StreamRegistry::new(),
            connection: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    #[must_use]
    pub const fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    /// Record that upcoming frames arrive over connection `handle_id`.
    ///
    /// Switching to a different connection drops every open AI stream; its
    /// remaining chunks were lost with the old connection.
    pub fn bind_connection(&self, handle_id: u64) {
        if self.connection.swap(handle_id, Ordering::AcqRel) == handle_id {
            return;
        }

        if !self.streams.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                open = self.streams.len(),
                handle_id,
                "Connection changed, dropping unfinished AI streams"
            );
            self.streams.clear();
        }
    }

    /// Decode `frame` and invoke its handler.
    ///
    /// Returns the event type that was handled, or `None` when the frame was
    /// dropped.
    pub fn dispatch(&self, frame: Frame) -> Option<EventType> {
        #[cfg(feature = "tracing")]
        let tag = frame.kind.clone();

        match Event::try_from(frame) {
            Ok(event) => {
                let event_type = event.event_type();
                self.handle(event);
                Some(event_type)
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(event = %tag, error = %e, "Dropping chat frame");
                #[cfg(not(feature = "tracing"))]
                let _: &crate::error::Error = &e;
                None
            }
        }
    }

    /// Invoke the handler for an already decoded event.
    pub fn handle(&self, event: Event) {
        match event {
            Event::ConnectionEstablished(established) => {
                self.handler.connection_established(&established);
            }
            Event::TransferChat(transfer) => self.handler.chat_transferred(&transfer),
            Event::AcceptChat(conversation) => self.handler.chat_accepted(&conversation),
            Event::Message(message) => self.handler.message(&message),
            Event::EndChat(ended) => self.handler.chat_ended(&ended),
            Event::ButterTypingStart(start) => self.stream_started(&start),
            Event::ButterStream(chunk) => self.stream_chunk(&chunk),
            Event::ButterTypingEnd(end) => self.stream_ended(end),
        }
    }

    fn stream_started(&self, start: &StreamStart) {
        if self.streams.start(&start.stream_id) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                stream_id = %start.stream_id,
                "AI stream restarted before it ended, discarding buffered text"
            );
        }
        self.handler.typing_started(start);
    }

    fn stream_chunk(&self, chunk: &StreamChunk) {
        match self.streams.append(chunk.stream_id.as_deref(), &chunk.content) {
            Some((stream_id, buffer)) => {
                self.handler
                    .stream_updated(&stream_id, &chunk.content, &buffer);
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    stream_id = ?chunk.stream_id,
                    "AI stream chunk for a stream that is not open, dropping"
                );
            }
        }
    }

    fn stream_ended(&self, end: StreamEnd) {
        match self.streams.finish(end.stream_id.as_deref()) {
            Some((stream_id, buffered)) => {
                let content = end.content.unwrap_or(buffered);
                self.handler.typing_ended(&stream_id, &content);
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    stream_id = ?end.stream_id,
                    "AI stream end for a stream that is not open, ignoring"
                );
            }
        }
    }
}
