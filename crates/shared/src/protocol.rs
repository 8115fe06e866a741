use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Presence,
    Activity,
    Cursor,
    Edit,
    Notification,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Presence => "presence",
            Self::Activity => "activity",
            Self::Cursor => "cursor",
            Self::Edit => "edit",
            Self::Notification => "notification",
        }
    }
}

/// Sender-assigned ordering hint. Peers emit either an ISO-8601 string or
/// epoch milliseconds; both are accepted and preserved as received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Iso(DateTime<Utc>),
    Naive(NaiveDateTime),
    EpochMillis(i64),
}

impl Timestamp {
    pub fn now() -> Self {
        Self::Iso(Utc::now())
    }

    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Iso(at) => Some(*at),
            Self::Naive(at) => Some(at.and_utc()),
            Self::EpochMillis(millis) => DateTime::from_timestamp_millis(*millis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub data: Value,
    pub timestamp: Timestamp,
}

impl CollaborationMessage {
    pub fn new(kind: MessageType, user_id: UserId, tenant_id: TenantId, data: Value) -> Self {
        Self {
            kind,
            user_id,
            tenant_id,
            data,
            timestamp: Timestamp::now(),
        }
    }

    pub fn payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub last_active_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub user_id: UserId,
    pub session_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation_id: Option<i64>,
    pub last_activity: Timestamp,
}

/// Payload of a server-wide `presence` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub active_users: Vec<ActiveUser>,
    pub active_sessions: Vec<ActiveSession>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPayload {
    pub action: String,
    pub description: String,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPayload {
    pub position: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditPayload {
    pub operation: Value,
}
