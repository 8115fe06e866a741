use std::{pin::Pin, sync::Arc, time::Duration};

use futures::{future::BoxFuture, SinkExt, StreamExt};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::{sleep, timeout, Sleep},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    backoff::ReconnectPolicy,
    codec,
    error::TransportError,
    store::{Applied, StateStore},
    transport::{Connector, Frame, Transport, NORMAL_CLOSE_CODE},
    types::{ClientEvent, ConnectionState, SessionIdentity},
};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Reconnect,
    Send(String),
    Dispose,
}

enum Phase {
    Idle,
    Connecting(BoxFuture<'static, Result<Transport, TransportError>>),
    Open(Transport),
    Closed,
    ReconnectScheduled(Pin<Box<Sleep>>),
    Disposed,
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Idle,
            Self::Connecting(_) => ConnectionState::Connecting,
            Self::Open(_) => ConnectionState::Open,
            Self::Closed => ConnectionState::Closed,
            Self::ReconnectScheduled(_) => ConnectionState::ReconnectScheduled,
            Self::Disposed => ConnectionState::Disposed,
        }
    }
}

enum Step {
    Command(Option<Command>),
    Attempt(Result<Transport, TransportError>),
    Inbound(Option<Result<Frame, TransportError>>),
    TimerFired,
}

#[derive(Debug, PartialEq, Eq)]
enum Transmit {
    Done,
    Interrupted,
}

/// Owner-side handle of a connection manager task. Dropping every handle
/// (and dispatcher) tears the connection down.
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub(crate) fn spawn(
        identity: SessionIdentity,
        url: Url,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        store: StateStore,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = ConnectionManager {
            identity,
            url,
            connector,
            policy,
            attempt: 0,
            phase: Phase::Idle,
            commands: commands_rx,
            shutdown: shutdown_rx,
            state_tx,
            store,
            events,
        };
        let task = tokio::spawn(manager.run());
        Self {
            commands: commands_tx,
            shutdown: shutdown_tx,
            state: state_rx,
            task,
        }
    }

    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub(crate) fn commands(&self) -> mpsc::UnboundedSender<Command> {
        self.commands.clone()
    }

    /// Stops the manager and waits until it has released its connection.
    /// An outbound send stuck on a peer that stopped reading is abandoned.
    pub async fn dispose(self) {
        let _ = self.shutdown.send(true);
        let _ = self.commands.send(Command::Dispose);
        if let Err(err) = self.task.await {
            warn!(%err, "collab: connection task ended abnormally");
        }
    }
}

struct ConnectionManager {
    identity: SessionIdentity,
    url: Url,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    attempt: u32,
    phase: Phase,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: watch::Receiver<bool>,
    state_tx: watch::Sender<ConnectionState>,
    store: StateStore,
    events: broadcast::Sender<ClientEvent>,
}

impl ConnectionManager {
    async fn run(mut self) {
        loop {
            match self.next_step().await {
                Step::Command(Some(Command::Connect)) => self.request_connect("connect"),
                Step::Command(Some(Command::Reconnect)) => self.request_connect("reconnect"),
                Step::Command(Some(Command::Send(text))) => {
                    if self.transmit(text).await == Transmit::Interrupted {
                        self.teardown().await;
                        break;
                    }
                }
                Step::Command(Some(Command::Dispose)) | Step::Command(None) => {
                    self.teardown().await;
                    break;
                }
                Step::Attempt(Ok(transport)) => self.opened(transport),
                Step::Attempt(Err(err)) => self.connection_lost(&err.to_string()),
                Step::Inbound(Some(Ok(Frame::Payload(bytes)))) => self.receive(&bytes),
                Step::Inbound(Some(Ok(Frame::Close {
                    code: Some(NORMAL_CLOSE_CODE),
                }))) => self.closed_normally(),
                Step::Inbound(Some(Ok(Frame::Close { code }))) => {
                    self.connection_lost(&format!("server closed connection with code {code:?}"))
                }
                Step::Inbound(Some(Err(err))) => self.connection_lost(&err.to_string()),
                Step::Inbound(None) => {
                    self.connection_lost("connection ended without a close frame")
                }
                Step::TimerFired => self.begin_attempt(),
            }
        }
    }

    async fn next_step(&mut self) -> Step {
        let commands = &mut self.commands;
        match &mut self.phase {
            Phase::Connecting(attempt) => tokio::select! {
                biased;
                command = commands.recv() => Step::Command(command),
                result = attempt => Step::Attempt(result),
            },
            Phase::Open(transport) => tokio::select! {
                biased;
                command = commands.recv() => Step::Command(command),
                frame = transport.stream.next() => Step::Inbound(frame),
            },
            Phase::ReconnectScheduled(timer) => tokio::select! {
                biased;
                command = commands.recv() => Step::Command(command),
                () = timer.as_mut() => Step::TimerFired,
            },
            Phase::Idle | Phase::Closed | Phase::Disposed => Step::Command(commands.recv().await),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        let state = self.phase.state();
        let changed = self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        if changed {
            let _ = self.events.send(ClientEvent::Connection(state));
        }
    }

    fn request_connect(&mut self, origin: &'static str) {
        match self.phase {
            Phase::Open(_) | Phase::Connecting(_) => debug!(
                user_id = self.identity.user_id.0,
                origin, "collab: connection already active, ignoring request"
            ),
            _ => self.begin_attempt(),
        }
    }

    fn begin_attempt(&mut self) {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        debug!(
            user_id = self.identity.user_id.0,
            tenant_id = self.identity.tenant_id.0,
            attempt = self.attempt,
            "collab: opening connection"
        );
        self.set_phase(Phase::Connecting(Box::pin(async move {
            connector.connect(&url).await
        })));
    }

    fn opened(&mut self, transport: Transport) {
        self.attempt = 0;
        self.set_phase(Phase::Open(transport));
        self.store.set_connected(true);
        info!(
            user_id = self.identity.user_id.0,
            tenant_id = self.identity.tenant_id.0,
            session_type = %self.identity.session_type,
            "collab: connection open"
        );
    }

    fn connection_lost(&mut self, reason: &str) {
        self.store.set_connected(false);
        self.set_phase(Phase::Closed);
        let Some(delay) = self.policy.delay_for(self.attempt) else {
            warn!(
                user_id = self.identity.user_id.0,
                attempts = self.attempt,
                reason,
                "collab: reconnect attempts exhausted, staying disconnected"
            );
            return;
        };
        self.attempt += 1;
        warn!(
            user_id = self.identity.user_id.0,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            reason,
            "collab: connection lost, reconnect scheduled"
        );
        self.set_phase(Phase::ReconnectScheduled(Box::pin(sleep(delay))));
    }

    fn closed_normally(&mut self) {
        self.store.set_connected(false);
        self.set_phase(Phase::Closed);
        info!(
            user_id = self.identity.user_id.0,
            "collab: server closed connection normally"
        );
    }

    fn receive(&mut self, bytes: &[u8]) {
        let message = match codec::decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    user_id = self.identity.user_id.0,
                    %err,
                    "collab: dropped malformed inbound message"
                );
                let _ = self.events.send(ClientEvent::Error(err.to_string()));
                return;
            }
        };
        if message.tenant_id != self.identity.tenant_id {
            warn!(
                expected_tenant_id = self.identity.tenant_id.0,
                tenant_id = message.tenant_id.0,
                "collab: dropped inbound message for another tenant"
            );
            return;
        }
        if !matches!(self.store.apply(&message), Applied::Rejected(_)) {
            let _ = self.events.send(ClientEvent::Message(message));
        }
    }

    async fn transmit(&mut self, text: String) -> Transmit {
        let Phase::Open(transport) = &mut self.phase else {
            debug!("collab: dropped outbound message while disconnected");
            return Transmit::Done;
        };
        let shutdown = &mut self.shutdown;
        let outcome = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => return Transmit::Interrupted,
            outcome = timeout(SEND_TIMEOUT, transport.sink.send(text)) => outcome,
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "collab: dropped outbound message"),
            Err(_) => self.connection_lost("outbound send timed out"),
        }
        Transmit::Done
    }

    async fn teardown(&mut self) {
        if let Phase::Open(transport) = &mut self.phase {
            match timeout(CLOSE_TIMEOUT, transport.sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(%err, "collab: close handshake failed"),
                Err(_) => debug!("collab: close handshake timed out"),
            }
        }
        self.store.set_connected(false);
        self.set_phase(Phase::Disposed);
        info!(
            user_id = self.identity.user_id.0,
            tenant_id = self.identity.tenant_id.0,
            "collab: connection disposed"
        );
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
