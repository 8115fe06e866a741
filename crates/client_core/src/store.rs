use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::UserId,
    protocol::{ActiveSession, ActiveUser, CollaborationMessage, MessageType, PresenceSnapshot},
};
use tokio::sync::watch;
use tracing::{debug, warn};

pub const RECENT_ACTIVITY_CAPACITY: usize = 50;
pub const NOTIFICATION_CAPACITY: usize = 10;

/// Fixed-capacity newest-first feed. Pushing onto a full feed evicts the
/// oldest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedFeed<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedFeed<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push_newest(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_back()
        } else {
            None
        };
        self.entries.push_front(item);
        evicted
    }

    pub fn newest(&self) -> Option<&T> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollaborationState {
    pub is_connected: bool,
    pub active_users: Vec<ActiveUser>,
    pub active_sessions: Vec<ActiveSession>,
    pub recent_activity: BoundedFeed<CollaborationMessage>,
    pub notifications: BoundedFeed<CollaborationMessage>,
}

impl Default for CollaborationState {
    fn default() -> Self {
        Self::with_capacities(RECENT_ACTIVITY_CAPACITY, NOTIFICATION_CAPACITY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    PresenceReplaced { users: usize, sessions: usize },
    ActivityRecorded,
    NotificationRecorded,
    PassThrough,
    Rejected(String),
}

impl Applied {
    pub fn changed_state(&self) -> bool {
        matches!(
            self,
            Self::PresenceReplaced { .. } | Self::ActivityRecorded | Self::NotificationRecorded
        )
    }
}

impl CollaborationState {
    pub fn with_capacities(activity_capacity: usize, notification_capacity: usize) -> Self {
        Self {
            is_connected: false,
            active_users: Vec::new(),
            active_sessions: Vec::new(),
            recent_activity: BoundedFeed::with_capacity(activity_capacity),
            notifications: BoundedFeed::with_capacity(notification_capacity),
        }
    }

    pub fn apply(&mut self, message: &CollaborationMessage) -> Applied {
        match message.kind {
            MessageType::Presence => match presence_snapshot(&message.data) {
                Some(Ok(snapshot)) => self.replace_presence(snapshot),
                Some(Err(err)) => Applied::Rejected(format!("invalid presence snapshot: {err}")),
                None => {
                    self.recent_activity.push_newest(message.clone());
                    Applied::ActivityRecorded
                }
            },
            MessageType::Activity => {
                self.recent_activity.push_newest(message.clone());
                Applied::ActivityRecorded
            }
            MessageType::Notification => {
                self.notifications.push_newest(message.clone());
                Applied::NotificationRecorded
            }
            MessageType::Cursor | MessageType::Edit => Applied::PassThrough,
        }
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }

    fn replace_presence(&mut self, snapshot: PresenceSnapshot) -> Applied {
        self.active_users = unique_users(snapshot.active_users);
        self.active_sessions = latest_sessions(snapshot.active_sessions);
        Applied::PresenceReplaced {
            users: self.active_users.len(),
            sessions: self.active_sessions.len(),
        }
    }
}

// A presence message is a full snapshot only when it carries both lists.
/// True when a presence message carries both user and session lists and so
/// replaces presence instead of being recorded as activity.
pub fn is_presence_snapshot(message: &CollaborationMessage) -> bool {
    message.kind == MessageType::Presence && has_presence_lists(&message.data)
}

fn has_presence_lists(data: &Value) -> bool {
    data.get("activeUsers").is_some_and(Value::is_array)
        && data.get("activeSessions").is_some_and(Value::is_array)
}

fn presence_snapshot(data: &Value) -> Option<serde_json::Result<PresenceSnapshot>> {
    has_presence_lists(data).then(|| PresenceSnapshot::deserialize(data))
}

fn unique_users(users: Vec<ActiveUser>) -> Vec<ActiveUser> {
    let mut index: HashMap<UserId, usize> = HashMap::with_capacity(users.len());
    let mut unique: Vec<ActiveUser> = Vec::with_capacity(users.len());
    for user in users {
        match index.get(&user.id) {
            Some(&slot) => unique[slot] = user,
            None => {
                index.insert(user.id, unique.len());
                unique.push(user);
            }
        }
    }
    unique
}

fn latest_sessions(sessions: Vec<ActiveSession>) -> Vec<ActiveSession> {
    let mut index: HashMap<UserId, usize> = HashMap::with_capacity(sessions.len());
    let mut latest: Vec<ActiveSession> = Vec::with_capacity(sessions.len());
    for session in sessions {
        match index.get(&session.user_id) {
            Some(&slot) => {
                if session.last_activity.to_utc() >= latest[slot].last_activity.to_utc() {
                    latest[slot] = session;
                }
            }
            None => {
                index.insert(session.user_id, latest.len());
                latest.push(session);
            }
        }
    }
    latest
}

/// Observable handle over one binding's `CollaborationState`.
#[derive(Clone)]
pub struct StateStore {
    tx: Arc<watch::Sender<CollaborationState>>,
}

impl StateStore {
    pub fn new(activity_capacity: usize, notification_capacity: usize) -> Self {
        let (tx, _) = watch::channel(CollaborationState::with_capacities(
            activity_capacity,
            notification_capacity,
        ));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> CollaborationState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CollaborationState> {
        self.tx.subscribe()
    }

    pub fn apply(&self, message: &CollaborationMessage) -> Applied {
        let mut outcome = Applied::PassThrough;
        self.tx.send_if_modified(|state| {
            outcome = state.apply(message);
            outcome.changed_state()
        });
        match &outcome {
            Applied::Rejected(reason) => warn!(
                user_id = message.user_id.0,
                tenant_id = message.tenant_id.0,
                %reason,
                "collab: dropped inbound presence message"
            ),
            other => debug!(
                kind = message.kind.as_str(),
                outcome = ?other,
                "collab: applied inbound message"
            ),
        }
        outcome
    }

    pub fn set_connected(&self, connected: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.is_connected != connected;
            state.is_connected = connected;
            changed
        });
    }

    pub fn clear_notifications(&self) {
        self.tx.send_if_modified(|state| {
            let changed = !state.notifications.is_empty();
            state.clear_notifications();
            changed
        });
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
