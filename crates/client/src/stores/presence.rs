//! Presence of other users, plus auto-away for the local user.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chatwire_shared::{EntityId, PresenceStatus};
use chrono::{DateTime, Utc};

use super::EventStore;
use crate::ws::{ConnectionManager, Event, EventKind, TimerSlot};

/// Idle time after which an online user is marked away.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserPresence {
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Cache of other users' presence, keyed by user id.
#[derive(Debug, Default)]
pub struct PresenceStore {
    users: Mutex<HashMap<EntityId, UserPresence>>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(&self) -> MutexGuard<'_, HashMap<EntityId, UserPresence>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Presence for a user, defaulting to offline if never seen.
    pub fn get(&self, user_id: &EntityId) -> UserPresence {
        self.users().get(user_id).cloned().unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &EntityId) -> bool {
        self.get(user_id).status == PresenceStatus::Online
    }

    /// The subset of `user_ids` currently online, in input order.
    pub fn online_users(&self, user_ids: &[EntityId]) -> Vec<EntityId> {
        let users = self.users();
        user_ids
            .iter()
            .filter(|id| users.get(*id).is_some_and(|p| p.status == PresenceStatus::Online))
            .cloned()
            .collect()
    }

    pub fn users_by_status(&self, status: PresenceStatus) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .users()
            .iter()
            .filter(|(_, presence)| presence.status == status)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn update(&self, user_id: &EntityId, status: PresenceStatus, last_seen: Option<DateTime<Utc>>) {
        let now = Utc::now();
        let mut users = self.users();
        let entry = users.entry(user_id.clone()).or_default();
        entry.status = status;
        entry.last_seen = last_seen;
        entry.updated_at = Some(now);
    }
}

impl EventStore for PresenceStore {
    const KINDS: &'static [EventKind] = &[
        EventKind::PresenceUpdate,
        EventKind::UserStatusChange,
        EventKind::UserJoined,
        EventKind::UserLeft,
    ];

    fn apply(&self, event: &Event) {
        match event {
            Event::PresenceUpdate(change) | Event::UserStatusChange(change) => {
                let last_seen = change.last_seen.as_ref().and_then(|t| t.to_datetime());
                self.update(&change.user_id, change.status, last_seen);
            }
            Event::UserJoined(member) => {
                self.update(&member.user_id, PresenceStatus::Online, Some(Utc::now()))
            }
            Event::UserLeft(member) => {
                self.update(&member.user_id, PresenceStatus::Offline, Some(Utc::now()))
            }
            _ => {}
        }
    }
}

/// Relative "last seen" text.
pub fn format_last_seen(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last_seen) = last_seen else {
        return "Never".to_string();
    };

    let minutes = (now - last_seen).num_minutes();
    if minutes < 1 {
        return "Just now".to_string();
    }
    if minutes < 60 {
        return format!("{} minutes ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{} hours ago", hours);
    }
    let days = hours / 24;
    if days < 7 {
        return format!("{} days ago", days);
    }
    last_seen.format("%Y-%m-%d").to_string()
}

struct Activity {
    status: PresenceStatus,
    active: bool,
    idle: TimerSlot,
}

/// Tracks the local user's activity and publishes presence changes through
/// the manager: idle while online goes away, activity while away comes back.
pub struct ActivityTracker {
    manager: ConnectionManager,
    idle_timeout: Duration,
    activity: Mutex<Activity>,
}

impl ActivityTracker {
    pub fn new(manager: ConnectionManager, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            manager,
            idle_timeout,
            activity: Mutex::new(Activity {
                status: PresenceStatus::Online,
                active: true,
                idle: TimerSlot::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> PresenceStatus {
        self.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Set and publish the local user's status.
    pub fn set_status(&self, status: PresenceStatus) {
        self.lock().status = status;
        self.manager.update_presence(status);
    }

    /// Input from the user. Must be called from within a tokio runtime.
    pub fn record_activity(self: &Arc<Self>) {
        let back_online = {
            let mut activity = self.lock();
            let was_idle = !std::mem::replace(&mut activity.active, true);
            let weak: Weak<Self> = Arc::downgrade(self);
            activity.idle.schedule(self.idle_timeout, move || {
                if let Some(tracker) = weak.upgrade() {
                    tracker.went_idle();
                }
            });
            was_idle && activity.status == PresenceStatus::Away
        };
        if back_online {
            self.set_status(PresenceStatus::Online);
        }
    }

    fn went_idle(&self) {
        let to_away = {
            let mut activity = self.lock();
            activity.active = false;
            activity.status == PresenceStatus::Online
        };
        if to_away {
            crate::log_debug!("No activity for {:?}, going away", self.idle_timeout);
            self.set_status(PresenceStatus::Away);
        }
    }

    /// The application window was hidden or shown.
    pub fn set_visible(self: &Arc<Self>, visible: bool) {
        let status = self.status();
        if visible {
            if status == PresenceStatus::Away {
                self.set_status(PresenceStatus::Online);
            }
            self.record_activity();
        } else if status == PresenceStatus::Online {
            self.set_status(PresenceStatus::Away);
        }
    }

    /// The application is exiting.
    pub fn go_offline(&self) {
        self.lock().idle.cancel();
        self.set_status(PresenceStatus::Offline);
    }
}
