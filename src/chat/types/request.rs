use bon::Builder;
use serde::Serialize;

use super::response::{ChatTransfer, Conversation};

/// Outbound frame, serialized as `{"type": ..., "payload": ...}`.
///
/// Payload shapes are not validated; the server is the authority on what it
/// accepts.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Command {
    /// Take a waiting conversation
    AcceptChat(Conversation),
    /// Post a chat message
    Message(OutgoingMessage),
    /// Hand a conversation to another agent or department
    TransferChat(ChatTransfer),
    /// Close a conversation
    EndChat(EndChat),
}

impl Command {
    /// Post `content` on behalf of `company_id`.
    #[must_use]
    pub fn message<C: Into<String>, I: Into<String>>(content: C, company_id: I) -> Self {
        Self::Message(OutgoingMessage {
            content: content.into(),
            company_id: company_id.into(),
            conversation_id: None,
        })
    }

    #[must_use]
    pub fn accept_chat(conversation: Conversation) -> Self {
        Self::AcceptChat(conversation)
    }

    #[must_use]
    pub fn transfer_chat(transfer: ChatTransfer) -> Self {
        Self::TransferChat(transfer)
    }

    #[must_use]
    pub fn end_chat<C: Into<String>>(conversation_id: C) -> Self {
        Self::EndChat(EndChat {
            conversation_id: conversation_id.into(),
        })
    }

    /// Wire tag of this command.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::AcceptChat(_) => "accept_chat",
            Self::Message(_) => "message",
            Self::TransferChat(_) => "transfer_chat",
            Self::EndChat(_) => "end_chat",
        }
    }
}

/// Payload of an outbound `message`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Builder)]
pub struct OutgoingMessage {
    #[builder(into)]
    pub content: String,
    #[builder(into)]
    pub company_id: String,
    /// Target conversation, needed on the agent channel
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub conversation_id: Option<String>,
}

/// Payload of an outbound `end_chat`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EndChat {
    pub conversation_id: String,
}
