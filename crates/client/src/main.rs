//! Chatwire client - command line entry point
//!
//! Connects with settings from the environment and logs every event until
//! interrupted. `CHATWIRE_USER_ID` and `CHATWIRE_TOKEN` supply credentials.

use std::sync::Arc;

use anyhow::Context;
use chatwire_client::stores::{
    attach, display_notice, MessageStore, NotificationStore, StatusTracker,
};
use chatwire_client::{init_tracing, ClientConfig, ConnectionManager, Event, EventKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("chatwire_client=debug");

    let config = ClientConfig::from_env().context("invalid client configuration")?;
    let user_id = std::env::var("CHATWIRE_USER_ID").unwrap_or_default();
    let token = std::env::var("CHATWIRE_TOKEN").context("CHATWIRE_TOKEN is not set")?;

    let manager = ConnectionManager::from_config(config);

    let status = Arc::new(StatusTracker::new());
    let messages = Arc::new(MessageStore::new());
    let _status_subs = attach(&status, &manager);
    let _message_subs = attach(&messages, &manager);
    let notifications = Arc::new(NotificationStore::new());
    let _notification_subs = attach(&notifications, &manager);
    let _shown = manager.on_fn(EventKind::Notification, |event| {
        if let Event::Notification(notice) = event {
            let (title, body) = display_notice(notice);
            tracing::info!(%title, "{}", body);
        }
    });

    let _logged: Vec<_> = EventKind::ALL
        .iter()
        .map(|&kind| {
            manager.on_fn(kind, |event| {
                tracing::info!(kind = %event.kind(), "{:?}", event);
            })
        })
        .collect();

    status.mark_connecting();
    manager
        .connect(&user_id, &token)
        .await
        .context("initial connection failed")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!(
        state = ?status.state(),
        unread = notifications.unread_count(),
        "Shutting down"
    );
    manager.shutdown();
    Ok(())
}
