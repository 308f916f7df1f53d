//! Device seams for microphone capture and speaker playback.
//!
//! Audio encoding and DSP live behind these traits; the session only manages
//! device lifetimes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from audio devices.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AudioError {
    /// Device missing or permission denied
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to start capture: {0}")]
    CaptureStartFailed(String),

    #[error("Failed to stop capture track: {0}")]
    CaptureStopFailed(String),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// One live input track of an opened capture device.
pub trait CaptureTrack: Send + Sync {
    fn id(&self) -> &str;

    fn is_live(&self) -> bool;

    /// Ends the track. Called at most once per track by the controller.
    fn stop(&self) -> AudioResult<()>;
}

/// Tracks plus the encoded frames they produce.
pub struct CaptureStream {
    pub tracks: Vec<Arc<dyn CaptureTrack>>,
    pub frames: mpsc::Receiver<Bytes>,
}

/// Microphone (or other input) factory.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self) -> AudioResult<CaptureStream>;
}

/// Ordered playback queue for agent audio.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Appends a chunk to the queue.
    async fn enqueue(&self, chunk: Bytes) -> AudioResult<()>;

    /// Drops everything queued or playing.
    fn abort(&self) -> AudioResult<()>;
}
