//! Capture and playback lifecycle.
//!
//! Capture teardown is synchronous and idempotent: the device handle is
//! marked torn down before any track is stopped, so overlapping stop paths
//! (explicit stop, link closing hooks, session shutdown) converge on a single
//! teardown and never stop a track twice.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::base::{
    AudioError, AudioResult, CaptureDevice, CaptureStream, CaptureTrack, PlaybackSink,
};
use crate::core::link::CloseHook;

/// Receives captured audio frames.
pub type CapturedFrameSink = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Live tracks of one capture session.
pub struct AudioDeviceHandle {
    tracks: Vec<Arc<dyn CaptureTrack>>,
    torn_down: AtomicBool,
}

impl AudioDeviceHandle {
    fn new(tracks: Vec<Arc<dyn CaptureTrack>>) -> Self {
        Self {
            tracks,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn tracks_live(&self) -> bool {
        !self.is_torn_down() && self.tracks.iter().any(|t| t.is_live())
    }

    /// Stops every live track. Only the first call does anything; returns the
    /// number of tracks stopped.
    fn teardown(&self) -> usize {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let mut stopped = 0;
        for track in &self.tracks {
            if !track.is_live() {
                continue;
            }
            match track.stop() {
                Ok(()) => stopped += 1,
                Err(e) => warn!(track = track.id(), "Ignoring track stop failure: {}", e),
            }
        }
        stopped
    }
}

struct ActiveCapture {
    handle: Arc<AudioDeviceHandle>,
    forwarder: JoinHandle<()>,
}

/// Owns the capture device handle and the playback queue.
pub struct AudioLifecycleController {
    device: Arc<dyn CaptureDevice>,
    playback: Arc<dyn PlaybackSink>,
    active: Mutex<Option<ActiveCapture>>,
    /// Bumped by every stop; lets an in-flight start notice it was superseded
    stop_epoch: AtomicU64,
    start_lock: tokio::sync::Mutex<()>,
    frame_sink: RwLock<Option<CapturedFrameSink>>,
}

impl AudioLifecycleController {
    pub fn new(device: Arc<dyn CaptureDevice>, playback: Arc<dyn PlaybackSink>) -> Self {
        Self {
            device,
            playback,
            active: Mutex::new(None),
            stop_epoch: AtomicU64::new(0),
            start_lock: tokio::sync::Mutex::new(()),
            frame_sink: RwLock::new(None),
        }
    }

    /// Sets where captured frames go. Applies to captures started afterwards.
    pub fn set_frame_sink(&self, sink: CapturedFrameSink) {
        *self.frame_sink.write() = Some(sink);
    }

    pub fn is_capturing(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| !active.handle.is_torn_down())
    }

    /// Opens the capture device. No-op when capture is already running.
    pub async fn start_capture(&self) -> AudioResult<()> {
        let _guard = self.start_lock.lock().await;
        if self.is_capturing() {
            debug!("Capture already running");
            return Ok(());
        }

        let epoch = self.stop_epoch.load(Ordering::Acquire);
        let CaptureStream { tracks, frames } = self.device.open().await.map_err(|e| match e {
            AudioError::CaptureStartFailed(_) => e,
            other => AudioError::CaptureStartFailed(other.to_string()),
        })?;
        let handle = Arc::new(AudioDeviceHandle::new(tracks));

        let mut active = self.active.lock();
        if self.stop_epoch.load(Ordering::Acquire) != epoch {
            drop(active);
            debug!("Capture stopped while the device was opening");
            handle.teardown();
            return Ok(());
        }

        let sink = self.frame_sink.read().clone();
        let forwarder = tokio::spawn(forward_frames(frames, sink, Arc::downgrade(&handle)));
        info!(tracks = handle.tracks.len(), "Capture started");
        *active = Some(ActiveCapture { handle, forwarder });
        Ok(())
    }

    /// Stops capture. Idempotent and safe to call concurrently; never fails.
    /// Returns `true` when this call tore down a running capture.
    pub fn stop_capture(&self) -> bool {
        let taken = {
            let mut active = self.active.lock();
            self.stop_epoch.fetch_add(1, Ordering::AcqRel);
            active.take()
        };

        let Some(ActiveCapture { handle, forwarder }) = taken else {
            trace!("Capture already stopped");
            return false;
        };

        let stopped = handle.teardown();
        forwarder.abort();
        info!(tracks = stopped, "Capture stopped");
        true
    }

    /// Hook for links: stops capture before their transport closes.
    pub fn close_hook(self: &Arc<Self>) -> CloseHook {
        let controller = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(controller) = controller.upgrade() {
                controller.stop_capture();
            }
        })
    }

    pub async fn enqueue_playback(&self, chunk: Bytes) -> AudioResult<()> {
        self.playback.enqueue(chunk).await
    }

    /// Drops queued agent audio.
    pub fn abort_playback(&self) -> AudioResult<()> {
        debug!("Aborting playback");
        self.playback.abort()
    }
}

async fn forward_frames(
    mut frames: tokio::sync::mpsc::Receiver<Bytes>,
    sink: Option<CapturedFrameSink>,
    handle: Weak<AudioDeviceHandle>,
) {
    while let Some(frame) = frames.recv().await {
        match handle.upgrade() {
            Some(handle) if !handle.is_torn_down() => {}
            _ => break,
        }
        if let Some(sink) = &sink {
            sink(frame);
        }
    }
    trace!("Capture frame forwarder finished");
}
