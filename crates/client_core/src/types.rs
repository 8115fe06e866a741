use std::fmt;

use shared::{
    domain::{TenantId, UserId},
    protocol::CollaborationMessage,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub session_type: String,
    pub entity_id: Option<i64>,
}

impl SessionIdentity {
    pub fn new(user_id: UserId, tenant_id: TenantId, session_type: impl Into<String>) -> Self {
        Self {
            user_id,
            tenant_id,
            session_type: session_type.into(),
            entity_id: None,
        }
    }

    pub fn with_entity(mut self, entity_id: i64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    ReconnectScheduled,
    Disposed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::ReconnectScheduled => "reconnect_scheduled",
            Self::Disposed => "disposed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connection(ConnectionState),
    Message(CollaborationMessage),
    Error(String),
}
