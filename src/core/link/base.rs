//! Shared types for agent and transcription links.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use url::Url;

use crate::core::protocol::{ClientMessage, ServerMessage};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on a link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// Connection to the server failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Transport failed after the connection was established
    #[error("Transport error: {0}")]
    Transport(String),

    /// Outbound message could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A pending open was superseded by close()
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

// =============================================================================
// Link Identity and State
// =============================================================================

/// Which of the two session links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// Control, conversation text and agent audio
    Agent,
    /// Standalone speech-to-text stream
    Transcription,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Agent => "agent",
            LinkKind::Transcription => "transcription",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Never opened
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// Transport established
    Open,
    /// Close requested, teardown in progress
    Closing,
    /// Closed cleanly or by the remote side
    Closed,
    /// Connect or transport failure
    Errored,
}

impl LinkState {
    /// Whether `open()` may start a new connection from this state.
    pub fn can_open(&self) -> bool {
        matches!(
            self,
            LinkState::Idle | LinkState::Closed | LinkState::Errored
        )
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => write!(f, "Idle"),
            LinkState::Connecting => write!(f, "Connecting"),
            LinkState::Open => write!(f, "Open"),
            LinkState::Closing => write!(f, "Closing"),
            LinkState::Closed => write!(f, "Closed"),
            LinkState::Errored => write!(f, "Errored"),
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called
    ClientRequested,
    /// The server sent a close frame or ended the stream
    RemoteClosed(Option<String>),
    /// The transport failed
    TransportError(String),
    /// The handshake never completed
    ConnectFailed(String),
    /// `close()` interrupted a pending handshake
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientRequested => write!(f, "closed by client"),
            CloseReason::RemoteClosed(Some(reason)) => write!(f, "closed by server: {reason}"),
            CloseReason::RemoteClosed(None) => write!(f, "closed by server"),
            CloseReason::TransportError(e) => write!(f, "transport error: {e}"),
            CloseReason::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            CloseReason::Cancelled => write!(f, "connect cancelled"),
        }
    }
}

// =============================================================================
// Frames and Events
// =============================================================================

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    /// Inbound only: the remote side closed, with an optional reason
    Close(Option<String>),
}

/// Notification emitted by a link to its subscribers.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Handshake started
    Connecting,
    /// Transport is open
    Connected {
        connection_id: u64,
        is_reconnection: bool,
    },
    /// Close requested; capture teardown has already run
    Closing,
    /// The connection is gone
    Closed(CloseReason),
    /// A structured server message
    Message(ServerMessage),
    /// An opaque binary payload (agent audio)
    Binary(Bytes),
    /// Transport-level failure; always followed by `Closed`
    Error(LinkError),
}

/// Handler registered through [`crate::core::link::LinkManager::subscribe`].
///
/// Handlers run on the emitting task and must not block; forward into a
/// channel for anything non-trivial.
pub type LinkEventHandler = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Synchronous hook run before a link's transport is closed.
pub type CloseHook = Arc<dyn Fn() + Send + Sync>;

// =============================================================================
// Options
// =============================================================================

/// Where and how to connect.
#[derive(Clone)]
pub struct LinkEndpoint {
    pub url: Url,
    /// Sent as `Authorization: Token <value>`
    pub auth_token: Option<String>,
}

impl fmt::Debug for LinkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEndpoint")
            .field("url", &self.url.as_str())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Idle keepalive settings.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    pub interval: Duration,
    pub frame: Frame,
}

impl KeepaliveConfig {
    /// `{"type":"KeepAlive"}` every `interval`.
    pub fn every(interval: Duration) -> Self {
        let text = ClientMessage::KeepAlive
            .to_json()
            .unwrap_or_else(|_| r#"{"type":"KeepAlive"}"#.to_string());
        Self {
            interval,
            frame: Frame::Text(text),
        }
    }
}

/// Per-link configuration.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub kind: LinkKind,
    pub endpoint: LinkEndpoint,
    pub keepalive: Option<KeepaliveConfig>,
    pub connect_timeout: Duration,
    /// Upper bound on waiting for the I/O task after `close()`
    pub close_timeout: Duration,
}

impl LinkOptions {
    pub fn new(kind: LinkKind, endpoint: LinkEndpoint) -> Self {
        Self {
            kind,
            endpoint,
            keepalive: Some(KeepaliveConfig::every(Duration::from_secs(5))),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_keepalive(mut self, keepalive: Option<KeepaliveConfig>) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(u64, LinkEventHandler)>>,
}

impl SubscriberRegistry {
    pub(crate) fn add(&self, handler: LinkEventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((id, handler));
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.handlers.write().retain(|(existing, _)| *existing != id);
    }

    pub(crate) fn emit(&self, event: LinkEvent) {
        // Snapshot so handlers may subscribe or unsubscribe re-entrantly.
        let handlers: Vec<LinkEventHandler> =
            self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(event.clone());
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.handlers.read().len()
    }
}

/// Handle returned by `subscribe`.
pub struct Subscription {
    id: u64,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub(crate) fn new(id: u64, registry: Weak<SubscriberRegistry>) -> Self {
        Self { id, registry }
    }

    /// Stops delivery to the handler. No-op once the link is gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
