use serde::Serialize;
use serde_json::Value;
use shared::{
    domain::{TenantId, UserId},
    protocol::{
        ActivityPayload, CollaborationMessage, CursorPayload, EditPayload, MessageType,
        NotificationPayload,
    },
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::{codec, connection::Command, types::ConnectionState};

/// Best-effort outbound path: messages are stamped with the bound identity
/// and dropped without error whenever the connection is not open.
#[derive(Clone)]
pub struct Dispatcher {
    user_id: UserId,
    tenant_id: TenantId,
    commands: mpsc::UnboundedSender<Command>,
    connection: watch::Receiver<ConnectionState>,
}

impl Dispatcher {
    pub(crate) fn new(
        user_id: UserId,
        tenant_id: TenantId,
        commands: mpsc::UnboundedSender<Command>,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            user_id,
            tenant_id,
            commands,
            connection,
        }
    }

    pub fn send(&self, kind: MessageType, data: Value) -> bool {
        if !self.connection.borrow().is_open() {
            debug!(
                kind = kind.as_str(),
                "collab: not connected, dropping outbound message"
            );
            return false;
        }
        let message = CollaborationMessage::new(kind, self.user_id, self.tenant_id, data);
        let text = match codec::encode(&message) {
            Ok(text) => text,
            Err(err) => {
                warn!(kind = kind.as_str(), %err, "collab: dropping unencodable message");
                return false;
            }
        };
        self.commands.send(Command::Send(text)).is_ok()
    }

    pub fn send_activity(
        &self,
        action: &str,
        description: &str,
        entity_type: &str,
        entity_id: Option<i64>,
        metadata: Option<Value>,
    ) -> bool {
        self.send_payload(
            MessageType::Activity,
            &ActivityPayload {
                action: action.to_string(),
                description: description.to_string(),
                entity_type: entity_type.to_string(),
                entity_id,
                metadata,
            },
        )
    }

    pub fn send_notification(&self, message: &str, target_user_id: Option<UserId>) -> bool {
        self.send_payload(
            MessageType::Notification,
            &NotificationPayload {
                message: message.to_string(),
                target_user_id,
            },
        )
    }

    pub fn send_cursor(&self, position: Value) -> bool {
        self.send_payload(MessageType::Cursor, &CursorPayload { position })
    }

    pub fn send_edit(&self, operation: Value) -> bool {
        self.send_payload(MessageType::Edit, &EditPayload { operation })
    }

    fn send_payload<T: Serialize>(&self, kind: MessageType, payload: &T) -> bool {
        match serde_json::to_value(payload) {
            Ok(data) => self.send(kind, data),
            Err(err) => {
                warn!(kind = kind.as_str(), %err, "collab: dropping unencodable payload");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
