use std::sync::Arc;

use serde_json::Value;
use shared::{domain::UserId, protocol::MessageType};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};
use url::Url;

pub mod backoff;
pub mod codec;
pub mod config;
mod connection;
mod dispatcher;
pub mod error;
pub mod store;
pub mod transport;
pub mod types;

pub use config::{load_settings, ClientSettings};
pub use connection::ConnectionHandle;
pub use dispatcher::Dispatcher;
pub use error::{ClientError, TransportError};
pub use store::{CollaborationState, StateStore};
pub use transport::{Connector, WebSocketConnector};
pub use types::{ClientEvent, ConnectionState, SessionIdentity};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Real-time presence/activity client for one workspace member.
///
/// A client is bound to one `SessionIdentity` at a time. Binding a different
/// identity tears down the previous connection and starts over with an empty
/// `CollaborationState`; sessions are never shared across identities.
/// Transport and decode failures never surface as errors here, only through
/// `CollaborationState::is_connected` and `ClientEvent::Error`.
pub struct CollaborationClient {
    settings: ClientSettings,
    endpoint: Url,
    connector: Arc<dyn Connector>,
    events: broadcast::Sender<ClientEvent>,
    inner: Mutex<ClientInner>,
}

#[derive(Default)]
struct ClientInner {
    binding: Option<Binding>,
    disposed: bool,
}

struct Binding {
    identity: SessionIdentity,
    connection: ConnectionHandle,
    store: StateStore,
    dispatcher: Dispatcher,
}

impl CollaborationClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ClientError> {
        Self::with_connector(settings, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(
        settings: ClientSettings,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        let endpoint = settings.endpoint()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            settings,
            endpoint,
            connector,
            events,
            inner: Mutex::new(ClientInner::default()),
        })
    }

    /// Binds `identity` and starts connecting. Returns `false` when the
    /// identity is already bound or the client has been disposed.
    pub async fn bind(&self, identity: SessionIdentity) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.disposed {
            warn!(
                user_id = identity.user_id.0,
                "collab: ignoring bind on disposed client"
            );
            return false;
        }
        if inner
            .binding
            .as_ref()
            .is_some_and(|binding| binding.identity == identity)
        {
            return false;
        }
        if let Some(previous) = inner.binding.take() {
            info!(
                user_id = previous.identity.user_id.0,
                tenant_id = previous.identity.tenant_id.0,
                "collab: identity changed, releasing previous session"
            );
            previous.connection.dispose().await;
        }

        let store = StateStore::new(
            self.settings.activity_capacity,
            self.settings.notification_capacity,
        );
        let connection = ConnectionHandle::spawn(
            identity.clone(),
            config::collaboration_url(&self.endpoint, &identity),
            Arc::clone(&self.connector),
            self.settings.reconnect_policy(),
            store.clone(),
            self.events.clone(),
        );
        let dispatcher = Dispatcher::new(
            identity.user_id,
            identity.tenant_id,
            connection.commands(),
            connection.watch_state(),
        );
        connection.connect();
        inner.binding = Some(Binding {
            identity,
            connection,
            store,
            dispatcher,
        });
        true
    }

    pub async fn identity(&self) -> Option<SessionIdentity> {
        let inner = self.inner.lock().await;
        inner.binding.as_ref().map(|binding| binding.identity.clone())
    }

    pub async fn connect(&self) {
        if let Some(binding) = self.inner.lock().await.binding.as_ref() {
            binding.connection.connect();
        }
    }

    /// Manual escape hatch; also works after automatic reconnection gave up.
    pub async fn reconnect(&self) {
        if let Some(binding) = self.inner.lock().await.binding.as_ref() {
            binding.connection.reconnect();
        }
    }

    pub async fn dispatcher(&self) -> Option<Dispatcher> {
        let inner = self.inner.lock().await;
        inner.binding.as_ref().map(|binding| binding.dispatcher.clone())
    }

    pub async fn send(&self, kind: MessageType, data: Value) -> bool {
        match self.dispatcher().await {
            Some(dispatcher) => dispatcher.send(kind, data),
            None => false,
        }
    }

    pub async fn send_activity(
        &self,
        action: &str,
        description: &str,
        entity_type: &str,
        entity_id: Option<i64>,
        metadata: Option<Value>,
    ) -> bool {
        match self.dispatcher().await {
            Some(dispatcher) => {
                dispatcher.send_activity(action, description, entity_type, entity_id, metadata)
            }
            None => false,
        }
    }

    pub async fn send_notification(&self, message: &str, target_user_id: Option<UserId>) -> bool {
        match self.dispatcher().await {
            Some(dispatcher) => dispatcher.send_notification(message, target_user_id),
            None => false,
        }
    }

    pub async fn send_cursor(&self, position: Value) -> bool {
        match self.dispatcher().await {
            Some(dispatcher) => dispatcher.send_cursor(position),
            None => false,
        }
    }

    pub async fn send_edit(&self, operation: Value) -> bool {
        match self.dispatcher().await {
            Some(dispatcher) => dispatcher.send_edit(operation),
            None => false,
        }
    }

    pub async fn clear_notifications(&self) {
        if let Some(binding) = self.inner.lock().await.binding.as_ref() {
            binding.store.clear_notifications();
        }
    }

    pub async fn state(&self) -> CollaborationState {
        match self.inner.lock().await.binding.as_ref() {
            Some(binding) => binding.store.snapshot(),
            None => CollaborationState::with_capacities(
                self.settings.activity_capacity,
                self.settings.notification_capacity,
            ),
        }
    }

    /// Watches the state of the current binding. The receiver ends when that
    /// binding is released.
    pub async fn subscribe_state(&self) -> Option<watch::Receiver<CollaborationState>> {
        let inner = self.inner.lock().await;
        inner.binding.as_ref().map(|binding| binding.store.subscribe())
    }

    pub async fn connection_state(&self) -> ConnectionState {
        let inner = self.inner.lock().await;
        match inner.binding.as_ref() {
            Some(binding) => binding.connection.state(),
            None if inner.disposed => ConnectionState::Disposed,
            None => ConnectionState::Idle,
        }
    }

    pub async fn watch_connection(&self) -> Option<watch::Receiver<ConnectionState>> {
        let inner = self.inner.lock().await;
        inner
            .binding
            .as_ref()
            .map(|binding| binding.connection.watch_state())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Cancels any pending reconnect, closes the connection and discards the
    /// state. Terminal: the client ignores later binds.
    pub async fn dispose(&self) {
        let mut inner = self.inner.lock().await;
        inner.disposed = true;
        if let Some(binding) = inner.binding.take() {
            binding.connection.dispose().await;
        }
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
