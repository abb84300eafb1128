//! Realtime transport abstraction.
//!
//! A [`Connector`] opens one duplex connection per call. The interceptor
//! never talks to sockets directly, which keeps it testable with
//! [`crate::testing::MockConnector`].

use std::pin::Pin;

use futures::{
    FutureExt, Sink, SinkExt, StreamExt, TryStreamExt,
    future::{self, BoxFuture},
    stream::BoxStream,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::{error::TransportError, types::Frame};

/// Inbound half of a connection.
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Opens realtime connections.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        url: &str,
    ) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>>;
}

/// WebSocket connector backed by tokio-tungstenite.
///
/// Ping/pong is handled by the library; only text and binary messages reach
/// the frame stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(
        &self,
        url: &str,
    ) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>> {
        let url = url.to_string();
        async move {
            let (ws_stream, response) = connect_async(url.as_str())
                .await
                .map_err(|err| TransportError::Connect(err.to_string()))?;
            debug!(%url, status = %response.status(), "websocket handshake completed");

            let (write, read) = ws_stream.split();
            let sink: FrameSink = Box::pin(
                write
                    .sink_map_err(TransportError::from)
                    .with(|frame: Frame| future::ready(frame_to_message(frame))),
            );
            let stream: FrameStream = read
                .map_err(TransportError::from)
                .try_filter_map(|message| future::ready(Ok(message_to_frame(message))))
                .boxed();
            Ok((sink, stream))
        }
        .boxed()
    }
}

fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_string())),
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}

fn frame_to_message(frame: Frame) -> Result<Message, TransportError> {
    Ok(match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Json(value) => Message::Text(value.to_string().into()),
    })
}
