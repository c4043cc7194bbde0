//! Client-side state folded from connection events.
//!
//! Each store owns its data behind a lock and knows which event kinds it
//! cares about. [`attach`] wires a store to a [`ConnectionManager`].

use std::sync::Arc;

use crate::ws::{ConnectionManager, Event, EventKind, Subscription};

pub mod messages;
pub mod notifications;
pub mod presence;
pub mod status;
pub mod typing;

pub use messages::{MessageStore, RoomMessages, StoredMessage};
pub use notifications::{display as display_notice, NotificationStore, StoredNotice};
pub use presence::{format_last_seen, ActivityTracker, PresenceStore, UserPresence};
pub use status::{ConnectionState, StatusTracker};
pub use typing::{TypingIndicator, TypingRoster};

/// A store that folds a fixed set of event kinds.
pub trait EventStore: Send + Sync + 'static {
    const KINDS: &'static [EventKind];

    fn apply(&self, event: &Event);
}

/// Subscribe `store` to every kind it folds. Unsubscribe the returned
/// handles to detach it again.
pub fn attach<S: EventStore>(store: &Arc<S>, manager: &ConnectionManager) -> Vec<Subscription> {
    S::KINDS
        .iter()
        .map(|&kind| {
            let store = store.clone();
            manager.on_fn(kind, move |event| store.apply(event))
        })
        .collect()
}
