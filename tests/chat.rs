#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::sync::Arc;

use butterchat_session::chat::{
    ChatMessage, ChatTransfer, Client, Command, Conversation, Event, EventHandler, SenderKind,
    StreamStart,
};
use butterchat_session::ws::ConnectionState;
use common::{MockWsServer, WAIT, fast_config, init_tracing, wait_for_state};
use futures::StreamExt as _;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Handler forwarding a short description of every callback.
struct Recorder {
    tx: mpsc::UnboundedSender<String>,
}

impl Recorder {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn record(&self, call: String) {
        drop(self.tx.send(call));
    }
}

impl EventHandler for Recorder {
    fn chat_transferred(&self, transfer: &ChatTransfer) {
        self.record(format!(
            "transfer:{}:{}",
            transfer.conversation_id,
            transfer.to_agent_id.as_deref().unwrap_or("-")
        ));
    }

    fn chat_accepted(&self, conversation: &Conversation) {
        self.record(format!("accept:{}", conversation.id));
    }

    fn message(&self, message: &ChatMessage) {
        let sender = match &message.sender {
            Some(SenderKind::Customer) => "customer",
            Some(SenderKind::Agent) => "agent",
            Some(SenderKind::Bot) => "bot",
            _ => "unknown",
        };
        self.record(format!("message:{sender}:{}", message.content));
    }

    fn typing_started(&self, start: &StreamStart) {
        self.record(format!("typing:{}", start.stream_id));
    }

    fn stream_updated(&self, stream_id: &str, _chunk: &str, buffer: &str) {
        self.record(format!("stream:{stream_id}:{buffer}"));
    }

    fn typing_ended(&self, stream_id: &str, content: &str) {
        self.record(format!("done:{stream_id}:{content}"));
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

async fn connected_agent(server: &MockWsServer) -> (Client, mpsc::UnboundedReceiver<String>) {
    let client = Client::agent(&server.ws_url("/ws/agent"), fast_config(5)).unwrap();
    let (recorder, calls) = Recorder::new();
    let mut state = client.state_receiver();

    client.connect("agent-token".to_owned(), recorder).unwrap();
    wait_for_state(&mut state, |s| s.is_connected()).await;

    (client, calls)
}

#[tokio::test]
async fn agent_receives_dispatched_events_in_order() {
    init_tracing();
    let server = MockWsServer::start().await;
    let (_client, mut calls) = connected_agent(&server).await;

    server.send(concat!(
        r#"{"type":"accept_chat","payload":{"id":"c-1","customer_id":"u-1"}}"#,
        r#"{"type":"message","payload":{"content":"Hi!","sender":"customer"}}"#,
        r#"{"type":"transfer_chat","payload":{"conversation_id":"c-1","to_agent_id":"a-2"}}"#,
    ));

    assert_eq!(next(&mut calls).await, "accept:c-1");
    assert_eq!(next(&mut calls).await, "message:customer:Hi!");
    assert_eq!(next(&mut calls).await, "transfer:c-1:a-2");
    assert_eq!(server.uris(), ["/ws/agent?token=agent-token"]);
}

#[tokio::test]
async fn unknown_event_types_are_skipped() {
    let server = MockWsServer::start().await;
    let (client, mut calls) = connected_agent(&server).await;

    server.send(r#"{"type":"presence","payload":{"online":true}}"#);
    server.send(r#"{"type":"message","payload":{"content":"still here"}}"#);

    assert_eq!(next(&mut calls).await, "message:unknown:still here");
    assert!(client.connection_state().is_connected());
}

#[tokio::test]
async fn ai_reply_is_assembled_from_stream_frames() {
    let server = MockWsServer::start().await;
    let (_client, mut calls) = connected_agent(&server).await;

    server.send(r#"{"type":"butter_typing_start","payload":{"stream_id":"s-9"}}"#);
    server.send(concat!(
        r#"{"type":"butter_stream","payload":{"content":"Your order "}}"#,
        r#"{"type":"butter_stream","payload":{"stream_id":"s-9","content":"shipped."}}"#,
    ));
    server.send(r#"{"type":"butter_typing_end","payload":{"stream_id":"s-9"}}"#);

    assert_eq!(next(&mut calls).await, "typing:s-9");
    assert_eq!(next(&mut calls).await, "stream:s-9:Your order ");
    assert_eq!(next(&mut calls).await, "stream:s-9:Your order shipped.");
    assert_eq!(next(&mut calls).await, "done:s-9:Your order shipped.");
}

#[tokio::test]
async fn unfinished_stream_is_dropped_after_reconnect() {
    let server = MockWsServer::start().await;
    let (client, mut calls) = connected_agent(&server).await;
    let mut state = client.state_receiver();
    let first_id = client.handle().unwrap().id();

    server.send(r#"{"type":"butter_typing_start","payload":{"stream_id":"s-1"}}"#);
    server.send(r#"{"type":"butter_stream","payload":{"content":"Half a "}}"#);
    assert_eq!(next(&mut calls).await, "typing:s-1");
    assert_eq!(next(&mut calls).await, "stream:s-1:Half a ");

    server.disconnect_all();
    wait_for_state(&mut state, |s| {
        matches!(s, ConnectionState::Connected { handle_id, .. } if *handle_id != first_id)
    })
    .await;

    server.send(concat!(
        r#"{"type":"butter_stream","payload":{"content":"reply"}}"#,
        r#"{"type":"butter_typing_end","payload":{"stream_id":"s-1"}}"#,
        r#"{"type":"message","payload":{"content":"fresh start"}}"#,
    ));

    assert_eq!(next(&mut calls).await, "message:unknown:fresh start");
}

#[tokio::test]
async fn commands_are_sent_as_type_payload_frames() {
    let mut server = MockWsServer::start().await;
    let (client, _calls) = connected_agent(&server).await;

    let conversation = Conversation::builder().id("c-1").build();
    client.accept_chat(conversation).unwrap();
    client.send_message("On my way", "acme").unwrap();
    client
        .send(&Command::transfer_chat(
            ChatTransfer::builder()
                .conversation_id("c-1")
                .to_agent_id("a-2".to_owned())
                .build(),
        ))
        .unwrap();

    let received: Vec<Value> = [
        server.recv().await.unwrap(),
        server.recv().await.unwrap(),
        server.recv().await.unwrap(),
    ]
    .iter()
    .map(|text| serde_json::from_str(text).unwrap())
    .collect();

    assert_eq!(
        received,
        [
            json!({"type": "accept_chat", "payload": {"id": "c-1"}}),
            json!({"type": "message", "payload": {"content": "On my way", "company_id": "acme"}}),
            json!({"type": "transfer_chat", "payload": {"conversation_id": "c-1", "to_agent_id": "a-2"}}),
        ]
    );
}

#[tokio::test]
async fn customer_widget_uses_company_id_and_event_stream() {
    let server = MockWsServer::start().await;
    let client = Client::customer(&server.ws_url("/ws/widget"), fast_config(5)).unwrap();
    let mut events = Box::pin(client.events());
    let mut state = client.state_receiver();

    client.connect_with("acme".to_owned(), |_| {}).unwrap();
    wait_for_state(&mut state, |s| s.is_connected()).await;

    server.send(concat!(
        r#"{"type":"connection_established","payload":{"company_id":"acme"}}"#,
        r#"{"type":"presence","payload":{}}"#,
        r#"{"type":"end_chat","payload":{"conversation_id":"c-3","ended_by":"agent"}}"#,
    ));

    let first = timeout(WAIT, events.next()).await.unwrap().unwrap().unwrap();
    let second = timeout(WAIT, events.next()).await.unwrap().unwrap().unwrap();

    assert!(matches!(
        first,
        Event::ConnectionEstablished(ref established) if established.company_id.as_deref() == Some("acme")
    ));
    assert!(matches!(
        second,
        Event::EndChat(ref ended) if ended.conversation_id == "c-3" && ended.ended_by == Some(SenderKind::Agent)
    ));
    assert_eq!(server.uris(), ["/ws/widget?company_id=acme"]);
}

#[tokio::test]
async fn separate_clients_do_not_share_sessions() {
    let server = MockWsServer::start().await;
    let agent = Client::agent(&server.ws_url("/ws/agent"), fast_config(5)).unwrap();
    let customer = Client::customer(&server.ws_url("/ws/widget"), fast_config(5)).unwrap();
    let mut agent_state = agent.state_receiver();
    let mut customer_state = customer.state_receiver();

    agent.connect_with("token".to_owned(), |_| {}).unwrap();
    customer.connect_with("acme".to_owned(), |_| {}).unwrap();
    wait_for_state(&mut agent_state, |s| s.is_connected()).await;
    wait_for_state(&mut customer_state, |s| s.is_connected()).await;

    agent.disconnect();

    assert!(agent.connection_state().is_terminal());
    assert!(customer.connection_state().is_connected());
    assert_eq!(server.connection_count(), 2);
}
