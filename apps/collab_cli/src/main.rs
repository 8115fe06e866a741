use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    load_settings, store::is_presence_snapshot, ClientEvent, CollaborationClient, SessionIdentity,
};
use serde_json::json;
use shared::{
    domain::{TenantId, UserId},
    protocol::{CollaborationMessage, MessageType},
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides `server_url` from collab.toml / COLLAB_SERVER_URL.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    user_id: i64,
    #[arg(long)]
    tenant_id: i64,
    #[arg(long, default_value = "dashboard")]
    session_type: String,
    #[arg(long)]
    entity_id: Option<i64>,
    /// Activity description to broadcast once connected.
    #[arg(long)]
    announce: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    let client = CollaborationClient::new(settings).context("invalid collaboration settings")?;

    let mut identity =
        SessionIdentity::new(UserId(args.user_id), TenantId(args.tenant_id), args.session_type);
    if let Some(entity_id) = args.entity_id {
        identity = identity.with_entity(entity_id);
    }
    let mut events = client.subscribe_events();
    client.bind(identity).await;

    let mut announcement = args.announce;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::Connection(state)) => {
                    println!("connection: {state}");
                    if state.is_open() {
                        if let Some(description) = announcement.take() {
                            client
                                .send_activity(
                                    "announced",
                                    &description,
                                    "workspace",
                                    None,
                                    Some(json!({ "source": "collab_cli" })),
                                )
                                .await;
                        }
                    }
                }
                Ok(ClientEvent::Message(message)) => print_message(&client, &message).await,
                Ok(ClientEvent::Error(err)) => warn!(%err, "inbound message dropped"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    info!("shutting down");
    client.dispose().await;
    Ok(())
}

async fn print_message(client: &CollaborationClient, message: &CollaborationMessage) {
    let state = client.state().await;
    match message.kind {
        _ if is_presence_snapshot(message) => println!(
            "presence: {} online, {} active sessions",
            state.active_users.len(),
            state.active_sessions.len()
        ),
        MessageType::Notification => println!(
            "notification from {}: {} ({}/{} unread)",
            message.user_id,
            message.data["message"].as_str().unwrap_or_default(),
            state.notifications.len(),
            state.notifications.capacity()
        ),
        kind => println!("{} from {}: {}", kind.as_str(), message.user_id, message.data),
    }
}
