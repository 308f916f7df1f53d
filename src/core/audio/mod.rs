//! Microphone capture and agent audio playback.
//!
//! Devices are injected through [`CaptureDevice`] and [`PlaybackSink`]; the
//! [`AudioLifecycleController`] owns their lifetimes. Capture stop is
//! synchronous so it can run from link close hooks, ahead of the transport
//! close.
//!
//! ```rust,ignore
//! let audio = Arc::new(AudioLifecycleController::new(mic, speaker));
//! agent_link.on_before_close(audio.close_hook());
//! audio.start_capture().await?;
//! ```

mod base;
mod controller;

pub use base::{
    AudioError, AudioResult, CaptureDevice, CaptureStream, CaptureTrack, PlaybackSink,
};
pub use controller::{AudioDeviceHandle, AudioLifecycleController, CapturedFrameSink};
