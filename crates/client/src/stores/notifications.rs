//! Notifications pushed by the server, newest first, with an unread count.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chatwire_shared::{EntityId, Notice};
use chrono::{DateTime, Utc};

use super::EventStore;
use crate::ws::{Event, EventKind};

#[derive(Clone, PartialEq, Debug)]
pub struct StoredNotice {
    pub notice: Notice,
    pub read: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inbox {
    /// Newest first
    items: Vec<StoredNotice>,
    unread: usize,
}

#[derive(Debug, Default)]
pub struct NotificationStore {
    inbox: Mutex<Inbox>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inbox(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notifications(&self) -> Vec<StoredNotice> {
        self.inbox().items.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.inbox().unread
    }

    pub fn add(&self, notice: Notice) {
        let read = notice.read;
        let mut inbox = self.inbox();
        inbox.items.insert(
            0,
            StoredNotice {
                notice,
                read,
                received_at: Utc::now(),
            },
        );
        if !read {
            inbox.unread += 1;
        }
    }

    /// Returns false if no notification has this id.
    pub fn mark_as_read(&self, id: &EntityId) -> bool {
        let mut inbox = self.inbox();
        let Some(item) = inbox
            .items
            .iter_mut()
            .find(|n| n.notice.id.as_ref() == Some(id))
        else {
            return false;
        };
        let was_unread = !std::mem::replace(&mut item.read, true);
        if was_unread {
            inbox.unread = inbox.unread.saturating_sub(1);
        }
        true
    }

    pub fn mark_all_as_read(&self) {
        let mut inbox = self.inbox();
        for item in inbox.items.iter_mut() {
            item.read = true;
        }
        inbox.unread = 0;
    }

    /// Returns false if no notification has this id.
    pub fn delete(&self, id: &EntityId) -> bool {
        let mut inbox = self.inbox();
        let Some(pos) = inbox
            .items
            .iter()
            .position(|n| n.notice.id.as_ref() == Some(id))
        else {
            return false;
        };
        let removed = inbox.items.remove(pos);
        if !removed.read {
            inbox.unread = inbox.unread.saturating_sub(1);
        }
        true
    }
}

impl EventStore for NotificationStore {
    const KINDS: &'static [EventKind] = &[EventKind::Notification];

    fn apply(&self, event: &Event) {
        if let Event::Notification(notice) = event {
            crate::log_debug!("Notification {:?} of kind {:?}", notice.id, notice.kind);
            self.add(notice.clone());
        }
    }
}

/// Title and body to show for a notice, chosen by its kind.
pub fn display(notice: &Notice) -> (String, String) {
    let sender = notice
        .sender
        .as_ref()
        .and_then(|s| s.name.as_deref())
        .unwrap_or("Someone");
    let room = notice.room_name.as_deref().unwrap_or("a room");
    let message = notice.message.as_deref().unwrap_or_default();

    match notice.kind.as_deref() {
        Some("message") => {
            let title = notice
                .sender
                .as_ref()
                .and_then(|s| s.name.clone())
                .unwrap_or_else(|| "New Message".to_string());
            let body = match &notice.room_name {
                Some(room) => format!("in {}: {}", room, message),
                None => message.to_string(),
            };
            (title, body)
        }
        Some("room_invite") => (
            "Room Invitation".to_string(),
            format!("{} invited you to join {}", sender, room),
        ),
        Some("mention") => (
            "You were mentioned".to_string(),
            format!("{} mentioned you in {}", sender, room),
        ),
        Some("friend_request") => (
            "Friend Request".to_string(),
            format!("{} sent you a friend request", sender),
        ),
        _ => (
            notice
                .title
                .clone()
                .unwrap_or_else(|| "Notification".to_string()),
            notice
                .message
                .clone()
                .unwrap_or_else(|| "You have a new notification".to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatwire_shared::UserSummary;

    fn notice(id: i64, kind: &str) -> Notice {
        Notice {
            id: Some(id.into()),
            kind: Some(kind.to_string()),
            sender: Some(UserSummary {
                id: 7.into(),
                name: Some("ana".into()),
                avatar: None,
                status: None,
            }),
            room_name: Some("general".into()),
            message: Some("hello".into()),
            ..Default::default()
        }
    }

    fn ids(store: &NotificationStore) -> Vec<EntityId> {
        store
            .notifications()
            .iter()
            .filter_map(|n| n.notice.id.clone())
            .collect()
    }

    #[test]
    fn newest_first_and_counts_unread() {
        let store = NotificationStore::new();
        store.apply(&Event::Notification(notice(1, "message")));
        store.apply(&Event::Notification(notice(2, "mention")));
        store.add(Notice {
            read: true,
            ..notice(3, "message")
        });

        assert_eq!(ids(&store), vec![3.into(), 2.into(), 1.into()]);
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn marking_read_is_counted_once() {
        let store = NotificationStore::new();
        store.add(notice(1, "message"));
        store.add(notice(2, "message"));

        assert!(store.mark_as_read(&1.into()));
        assert!(store.mark_as_read(&1.into()));
        assert_eq!(store.unread_count(), 1);
        assert!(!store.mark_as_read(&99.into()));

        store.mark_all_as_read();
        assert_eq!(store.unread_count(), 0);
        assert!(store.notifications().iter().all(|n| n.read));
    }

    #[test]
    fn deleting_adjusts_unread_only_for_unread_items() {
        let store = NotificationStore::new();
        store.add(notice(1, "message"));
        store.add(notice(2, "message"));
        store.mark_as_read(&2.into());

        assert!(store.delete(&2.into()));
        assert_eq!(store.unread_count(), 1);
        assert!(store.delete(&1.into()));
        assert_eq!(store.unread_count(), 0);
        assert!(!store.delete(&1.into()));
        assert!(store.notifications().is_empty());
    }

    #[test]
    fn message_display() {
        assert_eq!(
            display(&notice(1, "message")),
            ("ana".to_string(), "in general: hello".to_string())
        );
        let bare = Notice {
            sender: None,
            room_name: None,
            ..notice(1, "message")
        };
        assert_eq!(
            display(&bare),
            ("New Message".to_string(), "hello".to_string())
        );
    }

    #[test]
    fn room_invite_display() {
        assert_eq!(
            display(&notice(1, "room_invite")),
            (
                "Room Invitation".to_string(),
                "ana invited you to join general".to_string()
            )
        );
    }

    #[test]
    fn mention_display() {
        assert_eq!(
            display(&notice(1, "mention")),
            (
                "You were mentioned".to_string(),
                "ana mentioned you in general".to_string()
            )
        );
    }

    #[test]
    fn friend_request_display() {
        assert_eq!(
            display(&notice(1, "friend_request")),
            (
                "Friend Request".to_string(),
                "ana sent you a friend request".to_string()
            )
        );
    }

    #[test]
    fn other_kinds_use_title_and_message() {
        let custom = Notice {
            title: Some("Maintenance".into()),
            ..notice(1, "system")
        };
        assert_eq!(
            display(&custom),
            ("Maintenance".to_string(), "hello".to_string())
        );
        assert_eq!(
            display(&Notice::default()),
            (
                "Notification".to_string(),
                "You have a new notification".to_string()
            )
        );
    }
}
