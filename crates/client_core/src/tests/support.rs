use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::{
    channel::mpsc::{channel, unbounded, Receiver, UnboundedReceiver, UnboundedSender},
    stream, SinkExt,
};
use serde_json::{json, Value};
use tokio::{sync::mpsc, time::Instant};
use url::Url;

use crate::{
    error::TransportError,
    transport::{Connector, Frame, Transport},
};

/// Server side of an in-memory connection handed out by `ScriptedConnector`.
pub(crate) struct FakePeer {
    pub inbound: UnboundedSender<Result<Frame, TransportError>>,
    pub outbound: UnboundedReceiver<String>,
}

impl FakePeer {
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.inbound
            .unbounded_send(Ok(Frame::Payload(bytes.to_vec())))
            .expect("peer inbound open");
    }

    pub fn push_json(&self, value: &Value) {
        self.push_bytes(value.to_string().as_bytes());
    }

    pub fn close_with(&self, code: u16) {
        self.inbound
            .unbounded_send(Ok(Frame::Close { code: Some(code) }))
            .expect("peer inbound open");
    }
}

/// Connector whose attempts succeed or fail according to a script; once the
/// script runs out every attempt resolves to `fallback`.
pub(crate) struct ScriptedConnector {
    outcomes: Mutex<VecDeque<bool>>,
    fallback: bool,
    calls: Mutex<Vec<(Instant, Url)>>,
    peers: mpsc::UnboundedSender<FakePeer>,
}

impl ScriptedConnector {
    pub fn new(
        outcomes: impl IntoIterator<Item = bool>,
        fallback: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FakePeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
            peers,
        });
        (connector, peers_rx)
    }

    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<FakePeer>) {
        Self::new([], true)
    }

    pub fn refusing() -> (Arc<Self>, mpsc::UnboundedReceiver<FakePeer>) {
        Self::new([], false)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls").len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &Url) -> Result<Transport, TransportError> {
        self.calls
            .lock()
            .expect("calls")
            .push((Instant::now(), url.clone()));
        let accept = self
            .outcomes
            .lock()
            .expect("outcomes")
            .pop_front()
            .unwrap_or(self.fallback);
        if !accept {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (inbound_tx, inbound_rx) = unbounded();
        let (outbound_tx, outbound_rx) = unbounded::<String>();
        let _ = self.peers.send(FakePeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        });
        let sink = outbound_tx.sink_map_err(|err| TransportError::Send(err.to_string()));
        Ok(Transport::new(sink, inbound_rx))
    }
}

/// Connector whose connections accept one outbound frame and then never
/// drain, like a peer that stopped reading.
#[derive(Default)]
pub(crate) struct StalledConnector {
    readers: Mutex<Vec<Receiver<String>>>,
}

#[async_trait]
impl Connector for StalledConnector {
    async fn connect(&self, _url: &Url) -> Result<Transport, TransportError> {
        let (outbound_tx, outbound_rx) = channel::<String>(0);
        self.readers.lock().expect("readers").push(outbound_rx);
        let sink = outbound_tx.sink_map_err(|err| TransportError::Send(err.to_string()));
        Ok(Transport::new(
            sink,
            stream::pending::<Result<Frame, TransportError>>(),
        ))
    }
}

pub(crate) fn envelope(kind: &str, user_id: i64, tenant_id: i64, data: Value) -> Value {
    json!({
        "type": kind,
        "userId": user_id,
        "tenantId": tenant_id,
        "data": data,
        "timestamp": "2024-05-01T12:00:00Z",
    })
}
