use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::error::TransportError;

pub const NORMAL_CLOSE_CODE: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Payload(Vec<u8>),
    Close { code: Option<u16> },
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// One live bidirectional connection. Dropping it releases the underlying
/// socket.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<String, Error = TransportError> + Send + 'static,
        R: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Transport, TransportError>;
}

pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Transport, TransportError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect(format!("{url}: {err}")))?;
        let (ws_writer, ws_reader) = ws_stream.split();

        let sink = ws_writer
            .sink_map_err(|err| TransportError::Send(err.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text))));
        let stream = ws_reader.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Payload(text.into_bytes()))),
                Ok(Message::Binary(bytes)) => Some(Ok(Frame::Payload(bytes))),
                Ok(Message::Close(frame)) => Some(Ok(Frame::Close {
                    code: frame.map(|frame| u16::from(frame.code)),
                })),
                Ok(_) => None,
                Err(err) => Some(Err(TransportError::Receive(err.to_string()))),
            })
        });

        Ok(Transport::new(sink, stream))
    }
}
