//! Customer widget session.
//!
//! Opens an unauthenticated widget session for a company, sends one message
//! and prints the replies, including streamed assistant output.
//!
//! ```sh
//! BUTTERCHAT_ENDPOINT=wss://chat.example.com/ws/widget BUTTERCHAT_COMPANY_ID=acme \
//!     RUST_LOG=info cargo run --example customer_widget
//! ```

use std::time::Duration;

use butterchat_session::chat::{Client, Event};
use butterchat_session::ws::config::Config;
use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint = std::env::var("BUTTERCHAT_ENDPOINT")?;
    let company_id = std::env::var("BUTTERCHAT_COMPANY_ID")?;

    let client = Client::customer(&endpoint, Config::default())?;
    let mut events = Box::pin(client.events());
    client.connect_with(company_id.clone(), |frame| debug!(kind = %frame.kind, "frame"))?;

    let mut sent = false;
    while let Ok(Some(event)) = timeout(Duration::from_secs(60), events.next()).await {
        match event? {
            Event::ConnectionEstablished(_) if !sent => {
                client.send_message("Hi, I need help with my order", &company_id)?;
                sent = true;
            }
            Event::Message(message) => info!(sender = ?message.sender, content = %message.content),
            Event::ButterStream(chunk) => info!(chunk = %chunk.content, "assistant typing"),
            Event::ButterTypingEnd(end) => info!(content = ?end.content, "assistant done"),
            Event::EndChat(_) => break,
            other => debug!(event = %other.event_type()),
        }
    }

    client.disconnect();
    Ok(())
}
