use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chat::error::ChatError;
use crate::serde_helpers::deserialize_with_warnings;
use crate::ws::Frame;

/// Closed set of inbound frame tags.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    /// Server acknowledged the session
    ConnectionEstablished,
    /// A conversation was handed to another agent or department
    TransferChat,
    /// An agent took a waiting conversation
    AcceptChat,
    /// A chat message
    Message,
    /// A conversation was closed
    EndChat,
    /// The AI agent started composing a reply
    ButterTypingStart,
    /// A chunk of the AI agent's reply
    ButterStream,
    /// The AI agent finished its reply
    ButterTypingEnd,
}

impl EventType {
    /// Every known tag.
    pub const ALL: [Self; 8] = [
        Self::ConnectionEstablished,
        Self::TransferChat,
        Self::AcceptChat,
        Self::Message,
        Self::EndChat,
        Self::ButterTypingStart,
        Self::ButterStream,
        Self::ButterTypingEnd,
    ];

    /// Look up a wire tag; `None` for tags outside the protocol.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "connection_established" => Self::ConnectionEstablished,
            "transfer_chat" => Self::TransferChat,
            "accept_chat" => Self::AcceptChat,
            "message" => Self::Message,
            "end_chat" => Self::EndChat,
            "butter_typing_start" => Self::ButterTypingStart,
            "butter_stream" => Self::ButterStream,
            "butter_typing_end" => Self::ButterTypingEnd,
            _ => return None,
        })
    }

    /// Whether the tag belongs to the AI streaming sub-channel.
    #[must_use]
    pub const fn is_stream(self) -> bool {
        matches!(
            self,
            Self::ButterTypingStart | Self::ButterStream | Self::ButterTypingEnd
        )
    }
}

/// A decoded inbound frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ConnectionEstablished(ConnectionEstablished),
    TransferChat(ChatTransfer),
    AcceptChat(Conversation),
    Message(ChatMessage),
    EndChat(ChatEnded),
    ButterTypingStart(StreamStart),
    ButterStream(StreamChunk),
    ButterTypingEnd(StreamEnd),
}

impl Event {
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::ConnectionEstablished(_) => EventType::ConnectionEstablished,
            Self::TransferChat(_) => EventType::TransferChat,
            Self::AcceptChat(_) => EventType::AcceptChat,
            Self::Message(_) => EventType::Message,
            Self::EndChat(_) => EventType::EndChat,
            Self::ButterTypingStart(_) => EventType::ButterTypingStart,
            Self::ButterStream(_) => EventType::ButterStream,
            Self::ButterTypingEnd(_) => EventType::ButterTypingEnd,
        }
    }
}

impl TryFrom<Frame> for Event {
    type Error = crate::error::Error;

    fn try_from(frame: Frame) -> crate::Result<Self> {
        let Some(event_type) = EventType::from_tag(&frame.kind) else {
            return Err(ChatError::UnknownEventType(frame.kind).into());
        };
        let tag = frame.kind.as_str();
        // Frames without a payload decode like an empty object
        let payload = match frame.payload {
            Value::Null => Value::Object(Map::new()),
            payload => payload,
        };

        Ok(match event_type {
            EventType::ConnectionEstablished => {
                Self::ConnectionEstablished(deserialize_with_warnings(tag, payload)?)
            }
            EventType::TransferChat => Self::TransferChat(deserialize_with_warnings(tag, payload)?),
            EventType::AcceptChat => Self::AcceptChat(deserialize_with_warnings(tag, payload)?),
            EventType::Message => Self::Message(deserialize_with_warnings(tag, payload)?),
            EventType::EndChat => Self::EndChat(deserialize_with_warnings(tag, payload)?),
            EventType::ButterTypingStart => {
                Self::ButterTypingStart(deserialize_with_warnings(tag, payload)?)
            }
            EventType::ButterStream => Self::ButterStream(deserialize_with_warnings(tag, payload)?),
            EventType::ButterTypingEnd => {
                Self::ButterTypingEnd(deserialize_with_warnings(tag, payload)?)
            }
        })
    }
}

/// Payload of `connection_established`.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct ConnectionEstablished {
    /// Authenticated user, absent on the customer channel
    #[serde(default)]
    pub user_id: Option<String>,
    /// Company the session belongs to
    #[serde(default)]
    pub company_id: Option<String>,
    /// Server greeting
    #[serde(default)]
    pub message: Option<String>,
}

/// Lifecycle status of a conversation.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Waiting for an agent
    Pending,
    /// Being handled by an agent or the AI agent
    Active,
    /// Closed
    Ended,
    /// Unknown status from the server (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

/// A conversation between a customer and the helpdesk.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct Conversation {
    /// Conversation identifier
    #[builder(into)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Agent currently assigned, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Payload of `transfer_chat`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct ChatTransfer {
    /// Conversation being transferred
    #[builder(into)]
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_department_id: Option<String>,
    /// Free-text note left by the transferring agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Who wrote a message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Customer,
    Agent,
    /// The AI agent
    Bot,
    /// Unknown sender kind from the server (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

/// Payload of `message`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[builder(into)]
    pub content: String,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub sender: Option<SenderKind>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Payload of `end_chat`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct ChatEnded {
    #[builder(into)]
    pub conversation_id: String,
    /// Who closed the conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_by: Option<SenderKind>,
}

/// Payload of `butter_typing_start`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamStart {
    /// Identifier of the reply being streamed
    #[serde(alias = "id")]
    pub stream_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Payload of `butter_stream`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamChunk {
    /// Target stream; the most recently started one when absent
    #[serde(default, alias = "id")]
    pub stream_id: Option<String>,
    /// Text to append
    #[serde(alias = "chunk", alias = "delta")]
    pub content: String,
}

/// Payload of `butter_typing_end`.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamEnd {
    /// Stream being closed; the most recently started one when absent
    #[serde(default, alias = "id")]
    pub stream_id: Option<String>,
    /// Authoritative full reply, when the server sends one
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Kind;

    #[test]
    fn tags_round_trip_through_display() {
        for event_type in EventType::ALL {
            assert_eq!(
                EventType::from_tag(&event_type.to_string()),
                Some(event_type),
                "tag for {event_type:?} should parse back"
            );
        }
        assert_eq!(EventType::from_tag("typing"), None);
    }

    #[test]
    fn decode_message_event() {
        let frame = Frame::new(
            "message",
            json!({
                "id": "m-1",
                "conversation_id": "c-9",
                "content": "Where is my order?",
                "company_id": "acme",
                "sender": "customer",
                "created_at": "2026-03-02T10:15:00Z"
            }),
        );

        let Event::Message(message) = Event::try_from(frame).expect("decodes") else {
            panic!("expected a message event");
        };
        assert_eq!(message.content, "Where is my order?");
        assert_eq!(message.sender, Some(SenderKind::Customer));
        assert_eq!(
            message.created_at.map(|t| t.to_rfc3339()).as_deref(),
            Some("2026-03-02T10:15:00+00:00")
        );
    }

    #[test]
    fn decode_accept_chat_with_unknown_status() {
        let frame = Frame::new(
            "accept_chat",
            json!({"id": "c-1", "agent_id": "a-7", "status": "snoozed", "priority": 3}),
        );

        let event = Event::try_from(frame).expect("decodes");
        assert_eq!(event.event_type(), EventType::AcceptChat);
        let Event::AcceptChat(conversation) = event else {
            panic!("expected accept_chat");
        };
        assert_eq!(conversation.agent_id.as_deref(), Some("a-7"));
        assert_eq!(
            conversation.status,
            Some(ConversationStatus::Unknown("snoozed".to_owned()))
        );
    }

    #[test]
    fn decode_stream_events_with_aliases() {
        let start = Event::try_from(Frame::new("butter_typing_start", json!({"id": "s-1"})))
            .expect("decodes");
        let chunk = Event::try_from(Frame::new("butter_stream", json!({"chunk": "Hel"})))
            .expect("decodes");
        let end = Event::try_from(Frame::new("butter_typing_end", Value::Null)).expect("decodes");
        let bad = Event::try_from(Frame::new("butter_stream", json!({"stream_id": 7})));

        assert!(matches!(start, Event::ButterTypingStart(StreamStart { ref stream_id, .. }) if stream_id == "s-1"));
        assert!(matches!(chunk, Event::ButterStream(StreamChunk { stream_id: None, ref content }) if content == "Hel"));
        assert_eq!(end, Event::ButterTypingEnd(StreamEnd::default()));
        assert_eq!(bad.unwrap_err().kind(), Kind::Internal);
    }

    #[test]
    fn unknown_tag_is_protocol_error() {
        let error = Event::try_from(Frame::new("typing_indicator", json!({}))).unwrap_err();

        assert_eq!(error.kind(), Kind::Protocol);
        assert!(matches!(
            error.downcast_ref::<ChatError>(),
            Some(ChatError::UnknownEventType(tag)) if tag == "typing_indicator"
        ));
    }

    #[test]
    fn conversation_serializes_without_empty_fields() {
        let conversation = Conversation::builder().id("c-1").build();

        assert_eq!(
            serde_json::to_value(&conversation).expect("serializes"),
            json!({"id": "c-1"})
        );
    }
}
