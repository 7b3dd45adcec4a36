//! Agent inbox session.
//!
//! Connects as an agent, logs every chat event and the connection state, and
//! accepts every conversation that is offered.
//!
//! ```sh
//! BUTTERCHAT_ENDPOINT=wss://chat.example.com/ws/agent BUTTERCHAT_TOKEN=... \
//!     RUST_LOG=info,butterchat_session=debug cargo run --example agent_inbox
//! ```

use std::sync::Arc;
use std::time::Duration;

use butterchat_session::chat::{
    ChatEnded, ChatMessage, ChatTransfer, Client, Command, ConnectionEstablished, Conversation,
    EventHandler, StreamStart,
};
use butterchat_session::ws::config::{Config, ReconnectConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Inbox {
    accept_tx: mpsc::UnboundedSender<Conversation>,
}

impl EventHandler for Inbox {
    fn connection_established(&self, event: &ConnectionEstablished) {
        info!(user_id = ?event.user_id, company_id = ?event.company_id, "inbox ready");
    }

    fn chat_transferred(&self, transfer: &ChatTransfer) {
        info!(
            conversation_id = %transfer.conversation_id,
            to_agent = ?transfer.to_agent_id,
            "conversation transferred"
        );
    }

    fn chat_accepted(&self, conversation: &Conversation) {
        info!(conversation_id = %conversation.id, agent_id = ?conversation.agent_id, "conversation offered");
        if conversation.agent_id.is_none() {
            _ = self.accept_tx.send(conversation.clone());
        }
    }

    fn message(&self, message: &ChatMessage) {
        info!(
            conversation_id = ?message.conversation_id,
            sender = ?message.sender,
            content = %message.content,
            "message"
        );
    }

    fn chat_ended(&self, ended: &ChatEnded) {
        info!(conversation_id = %ended.conversation_id, "conversation ended");
    }

    fn typing_started(&self, start: &StreamStart) {
        info!(stream_id = %start.stream_id, "assistant typing");
    }

    fn typing_ended(&self, stream_id: &str, content: &str) {
        info!(%stream_id, %content, "assistant reply");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint = std::env::var("BUTTERCHAT_ENDPOINT")?;
    let token = std::env::var("BUTTERCHAT_TOKEN")?;

    let config = Config::builder()
        .reconnect(ReconnectConfig::builder().max_attempts(5).build())
        .idle_timeout(Duration::from_secs(90))
        .build();
    let client = Client::agent(&endpoint, config)?;
    client.on_exhausted(|attempts| warn!(attempts, "inbox offline, giving up"));

    let (accept_tx, mut accept_rx) = mpsc::unbounded_channel();
    client.connect(token, Arc::new(Inbox { accept_tx }))?;

    let mut state = client.state_receiver();
    let run_for = tokio::time::sleep(Duration::from_secs(300));
    tokio::pin!(run_for);

    loop {
        tokio::select! {
            () = &mut run_for => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                info!(state = ?*state.borrow_and_update(), "connection state");
            }
            Some(conversation) = accept_rx.recv() => {
                let id = conversation.id.clone();
                match client.send(&Command::accept_chat(conversation)) {
                    Ok(()) => info!(conversation_id = %id, "accepted"),
                    Err(e) => warn!(conversation_id = %id, error = %e, "accept failed"),
                }
            }
        }
    }

    client.disconnect();
    Ok(())
}
