//! In-memory doubles for link transports and audio devices.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Sink;
use futures::channel::mpsc as fmpsc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::core::audio::{
    AudioError, AudioResult, CaptureDevice, CaptureStream, CaptureTrack, PlaybackSink,
};
use crate::core::link::{
    Connector, Frame, LinkEndpoint, LinkError, LinkKind, LinkOptions, LinkResult, Transport,
};

/// Ordered record of side effects shared between doubles.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub(crate) fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Client-side sink that records when the transport is closed.
struct RecordingSink {
    tx: fmpsc::UnboundedSender<Frame>,
    log: EventLog,
    label: String,
    closed: bool,
}

impl Sink<Frame> for RecordingSink {
    type Error = LinkError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), LinkError>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), LinkError> {
        self.tx
            .unbounded_send(item)
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), LinkError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), LinkError>> {
        let this = self.get_mut();
        if !this.closed {
            this.closed = true;
            this.log.push(format!("{}_transport_closed", this.label));
            this.tx.close_channel();
        }
        Poll::Ready(Ok(()))
    }
}

/// Server side of one mock connection.
pub(crate) struct MockServer {
    pub(crate) to_client: fmpsc::UnboundedSender<LinkResult<Frame>>,
    pub(crate) from_client: fmpsc::UnboundedReceiver<Frame>,
}

impl MockServer {
    pub(crate) fn send_json(&self, value: Value) {
        let _ = self
            .to_client
            .unbounded_send(Ok(Frame::Text(value.to_string())));
    }

    pub(crate) fn send_frame(&self, frame: Frame) {
        let _ = self.to_client.unbounded_send(Ok(frame));
    }

    pub(crate) fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .unbounded_send(Err(LinkError::Transport(message.to_string())));
    }

    /// Ends the inbound stream as if the server hung up.
    pub(crate) fn hang_up(&self) {
        self.to_client.close_channel();
    }

    /// Next frame from the client, or `None` on timeout or client close.
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(5), self.from_client.next())
            .await
            .ok()
            .flatten()
    }

    /// Next text frame parsed as JSON, skipping keepalives.
    pub(crate) async fn next_json(&mut self) -> Option<Value> {
        loop {
            match self.next_frame().await? {
                Frame::Text(text) => {
                    let value: Value = serde_json::from_str(&text).ok()?;
                    if value["type"] == "KeepAlive" {
                        continue;
                    }
                    return Some(value);
                }
                _ => continue,
            }
        }
    }

    /// Waits briefly and reports whether any non-keepalive JSON arrived.
    pub(crate) async fn quiet_for(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.next_json())
            .await
            .map(|v| v.is_none())
            .unwrap_or(true)
    }
}

pub(crate) struct MockConnector {
    label: String,
    servers: mpsc::UnboundedSender<MockServer>,
    log: EventLog,
    refuse: AtomicBool,
    hang: AtomicBool,
    pub(crate) connects: AtomicUsize,
}

impl MockConnector {
    pub(crate) fn new(
        label: &str,
        log: EventLog,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            label: label.to_string(),
            servers: tx,
            log,
            refuse: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Next connect attempt fails.
    pub(crate) fn refuse_next(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Next connect attempt never completes.
    pub(crate) fn hang_next(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _endpoint: &LinkEndpoint) -> LinkResult<Transport> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.hang.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.refuse.swap(false, Ordering::SeqCst) {
            return Err(LinkError::ConnectionFailed("mock refused".to_string()));
        }

        let (client_tx, server_rx) = fmpsc::unbounded::<Frame>();
        let (server_tx, client_rx) = fmpsc::unbounded::<LinkResult<Frame>>();
        let _ = self.servers.send(MockServer {
            to_client: server_tx,
            from_client: server_rx,
        });

        Ok(Transport {
            sink: Box::pin(RecordingSink {
                tx: client_tx,
                log: self.log.clone(),
                label: self.label.clone(),
                closed: false,
            }),
            stream: Box::pin(client_rx),
        })
    }
}

pub(crate) fn test_link_options(kind: LinkKind) -> LinkOptions {
    let endpoint = LinkEndpoint {
        url: Url::parse("wss://agent.test/v1/agent").expect("static url"),
        auth_token: Some("test-key".to_string()),
    };
    LinkOptions::new(kind, endpoint)
        .with_keepalive(None)
        .with_connect_timeout(Duration::from_secs(1))
        .with_close_timeout(Duration::from_secs(1))
}

// =============================================================================
// Audio
// =============================================================================

pub(crate) struct MockTrack {
    id: String,
    live: AtomicBool,
    pub(crate) stops: AtomicUsize,
    log: EventLog,
}

impl CaptureTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&self) -> AudioResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
        self.log.push("track_stopped");
        Ok(())
    }
}

pub(crate) struct MockCaptureDevice {
    log: EventLog,
    pub(crate) tracks: Mutex<Vec<Arc<MockTrack>>>,
    pub(crate) frame_senders: Mutex<Vec<mpsc::Sender<Bytes>>>,
    fail: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
    pub(crate) opens: AtomicUsize,
}

impl MockCaptureDevice {
    pub(crate) fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            tracks: Mutex::new(Vec::new()),
            frame_senders: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            open_delay: Mutex::new(None),
            opens: AtomicUsize::new(0),
        })
    }

    pub(crate) fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn delay_open(&self, delay: Duration) {
        *self.open_delay.lock() = Some(delay);
    }

    pub(crate) fn live_tracks(&self) -> usize {
        self.tracks.lock().iter().filter(|t| t.is_live()).count()
    }

    pub(crate) fn total_stops(&self) -> usize {
        self.tracks
            .lock()
            .iter()
            .map(|t| t.stops.load(Ordering::SeqCst))
            .sum()
    }

    pub(crate) async fn push_frame(&self, data: Bytes) {
        let sender = self.frame_senders.lock().last().cloned();
        if let Some(sender) = sender {
            let _ = sender.send(data).await;
        }
    }
}

#[async_trait]
impl CaptureDevice for MockCaptureDevice {
    async fn open(&self) -> AudioResult<CaptureStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay = *self.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable("permission denied".to_string()));
        }

        let index = self.tracks.lock().len();
        let track = Arc::new(MockTrack {
            id: format!("mic-{index}"),
            live: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
            log: self.log.clone(),
        });
        self.tracks.lock().push(track.clone());

        let (tx, rx) = mpsc::channel(16);
        self.frame_senders.lock().push(tx);

        Ok(CaptureStream {
            tracks: vec![track as Arc<dyn CaptureTrack>],
            frames: rx,
        })
    }
}

#[derive(Default)]
pub(crate) struct MockPlayback {
    pub(crate) chunks: Mutex<Vec<Bytes>>,
    pub(crate) aborts: AtomicUsize,
    fail: AtomicBool,
}

impl MockPlayback {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlaybackSink for MockPlayback {
    async fn enqueue(&self, chunk: Bytes) -> AudioResult<()> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(AudioError::PlaybackFailed("output device lost".to_string()));
        }
        self.chunks.lock().push(chunk);
        Ok(())
    }

    fn abort(&self) -> AudioResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.chunks.lock().clear();
        Ok(())
    }
}
