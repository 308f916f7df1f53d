//! Host-facing error taxonomy.
//!
//! Every error notification delivered to the host carries a stable
//! `(service, code, message)` triple. `service` and `code` serialize to
//! snake_case strings and never change between releases; `message` is
//! free-form and meant for humans.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::audio::AudioError;
use crate::core::link::{LinkError, LinkKind};

/// Subsystem that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Agent,
    Transcription,
    Audio,
    Functions,
    Configuration,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Agent => "agent",
            ServiceKind::Transcription => "transcription",
            ServiceKind::Audio => "audio",
            ServiceKind::Functions => "functions",
            ServiceKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LinkKind> for ServiceKind {
    fn from(kind: LinkKind) -> Self {
        match kind {
            LinkKind::Agent => ServiceKind::Agent,
            LinkKind::Transcription => ServiceKind::Transcription,
        }
    }
}

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Transport could not be established
    ConnectionFailed,
    /// Transport dropped while open
    ConnectionLost,
    /// Handshake did not finish in time
    ConnectionTimeout,
    /// Operation required an open link
    NotConnected,
    /// Outbound frame could not be queued or encoded
    SendFailed,
    /// The server reported an error message
    ServerError,
    /// The server refused an injected user message
    InjectionRefused,
    /// Settings or session setup was incomplete or invalid
    InvalidConfiguration,
    OpenFailed,
    CloseFailed,
    UserMessageFailed,
    InterruptFailed,
    CaptureStartFailed,
    CaptureStopFailed,
    PlaybackFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "connection_failed",
            ErrorCode::ConnectionLost => "connection_lost",
            ErrorCode::ConnectionTimeout => "connection_timeout",
            ErrorCode::NotConnected => "not_connected",
            ErrorCode::SendFailed => "send_failed",
            ErrorCode::ServerError => "server_error",
            ErrorCode::InjectionRefused => "injection_refused",
            ErrorCode::InvalidConfiguration => "invalid_configuration",
            ErrorCode::OpenFailed => "open_failed",
            ErrorCode::CloseFailed => "close_failed",
            ErrorCode::UserMessageFailed => "user_message_failed",
            ErrorCode::InterruptFailed => "interrupt_failed",
            ErrorCode::CaptureStartFailed => "capture_start_failed",
            ErrorCode::CaptureStopFailed => "capture_stop_failed",
            ErrorCode::PlaybackFailed => "playback_failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error notification delivered to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{service} error [{code}]: {message}")]
pub struct SessionError {
    pub service: ServiceKind,
    pub code: ErrorCode,
    pub message: String,
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    pub fn new(service: ServiceKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            service,
            code,
            message: message.into(),
        }
    }

    /// Shorthand for configuration problems detected before any I/O.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(
            ServiceKind::Configuration,
            ErrorCode::InvalidConfiguration,
            message,
        )
    }

    /// Maps a link failure onto the closest stable code.
    pub fn from_link(kind: LinkKind, err: &LinkError) -> Self {
        let code = match err {
            LinkError::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            LinkError::Timeout(_) => ErrorCode::ConnectionTimeout,
            LinkError::NotConnected | LinkError::Cancelled => ErrorCode::NotConnected,
            LinkError::Transport(_) => ErrorCode::ConnectionLost,
            LinkError::Serialization(_) => ErrorCode::SendFailed,
            LinkError::InvalidState(_) => ErrorCode::OpenFailed,
            LinkError::InvalidConfiguration(_) => ErrorCode::InvalidConfiguration,
        };
        Self::new(kind.into(), code, err.to_string())
    }

    pub fn from_audio(code: ErrorCode, err: &AudioError) -> Self {
        Self::new(ServiceKind::Audio, code, err.to_string())
    }
}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}
