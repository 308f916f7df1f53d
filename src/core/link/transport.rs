//! Transport seam for links.
//!
//! A [`Connector`] produces a framed, split transport. Production code uses
//! [`WebSocketConnector`]; tests substitute an in-memory connector.

use std::pin::Pin;

use async_trait::async_trait;
use futures::future;
use futures::{Sink, Stream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use super::base::{Frame, LinkEndpoint, LinkError, LinkResult};

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = LinkError> + Send>>;

/// Inbound half of a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = LinkResult<Frame>> + Send>>;

/// An established, split transport.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Establishes transports for a link.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &LinkEndpoint) -> LinkResult<Transport>;
}

/// tokio-tungstenite backed connector.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        // Ignored when a provider is already installed by the host.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &LinkEndpoint) -> LinkResult<Transport> {
        let request = build_request(endpoint)?;

        let (ws_stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| LinkError::ConnectionFailed(e.to_string()))?;

        debug!(
            status = %response.status(),
            host = endpoint.url.host_str().unwrap_or_default(),
            "WebSocket handshake completed"
        );

        let (ws_sink, ws_read) = ws_stream.split();

        let sink = ws_sink
            .sink_map_err(|e| LinkError::Transport(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, LinkError>(frame_to_message(frame))));
        let stream = ws_read.filter_map(|message| future::ready(message_to_frame(message)));

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn build_request(endpoint: &LinkEndpoint) -> LinkResult<http::Request<()>> {
    let mut request = endpoint
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| LinkError::InvalidConfiguration(e.to_string()))?;

    if let Some(token) = &endpoint.auth_token {
        let value = HeaderValue::from_str(&format!("Token {token}"))
            .map_err(|e| LinkError::InvalidConfiguration(format!("invalid API key: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    Ok(request)
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Close(_) => Message::Close(None),
    }
}

/// Ping/pong and raw frames are handled inside tungstenite and never surface.
fn message_to_frame(message: Result<Message, tungstenite::Error>) -> Option<LinkResult<Frame>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
        Ok(Message::Close(close)) => Some(Ok(Frame::Close(
            close
                .map(|frame| frame.reason.as_str().to_owned())
                .filter(|reason| !reason.is_empty()),
        ))),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Err(e) => Some(Err(LinkError::Transport(e.to_string()))),
    }
}
