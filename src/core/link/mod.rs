//! Streaming links to the voice agent service.
//!
//! The session runs two independent links: the **agent** link carries
//! control messages, conversation text and agent audio; the optional
//! **transcription** link carries a standalone speech-to-text stream.
//!
//! Each link is a [`LinkManager`] with its own state machine:
//!
//! ```text
//! Idle ──open()──▶ Connecting ──▶ Open ──close()──▶ Closing ──▶ Closed
//!                      │            │
//!                      └─▶ Errored ◀┘  (connect or transport failure)
//! ```
//!
//! `Errored` and `Closed` both allow a fresh `open()`. Nothing reconnects
//! automatically.

mod base;
mod demux;
mod manager;
mod transport;

pub use base::{
    CloseHook, CloseReason, Frame, KeepaliveConfig, LinkEndpoint, LinkError, LinkEvent,
    LinkEventHandler, LinkKind, LinkOptions, LinkResult, LinkState, Subscription,
};
pub use manager::LinkManager;
pub use transport::{Connector, FrameSink, FrameStream, Transport, WebSocketConnector};
