//! Link lifecycle management.
//!
//! A [`LinkManager`] owns one logical link (agent or transcription) across
//! any number of connections. Each successful `open()` starts a connection
//! lifetime served by a dedicated I/O task:
//!
//! ```text
//! ┌──────────────┐  send()   ┌──────────────────────────────────┐
//! │ LinkManager  │──mpsc────▶│ I/O task (select! loop)          │
//! │  state, flags│           │  outbound → sink                 │
//! │  subscribers │◀─emit─────│  stream → demux → LinkEvent      │
//! │  close hooks │           │  idle timer → keepalive frame    │
//! └──────────────┘           │  shutdown token → flush + close  │
//!                            └──────────────────────────────────┘
//! ```
//!
//! Close ordering: the before-close hooks always run before the transport
//! sink is closed, for both client-requested and unsolicited closure.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::base::{
    CloseHook, CloseReason, Frame, KeepaliveConfig, LinkError, LinkEvent, LinkEventHandler,
    LinkKind, LinkOptions, LinkResult, LinkState, SubscriberRegistry, Subscription,
};
use super::demux;
use super::transport::{Connector, FrameSink, Transport};
use crate::core::protocol::ClientMessage;

/// Per-link state. Every flag here is scoped to this link instance.
#[derive(Default)]
struct LinkInner {
    state: LinkState,
    /// Set on the first successful open, never reset
    ever_connected_before: bool,
    /// Reset at the start of every connection lifetime
    settings_sent: bool,
    connection_id: u64,
    last_close_reason: Option<CloseReason>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    shutdown: Option<CancellationToken>,
    connect_cancel: Option<CancellationToken>,
    io_task: Option<JoinHandle<()>>,
}

struct LinkShared {
    kind: LinkKind,
    inner: Mutex<LinkInner>,
    subscribers: Arc<SubscriberRegistry>,
    close_hooks: RwLock<Vec<CloseHook>>,
}

impl LinkShared {
    fn emit(&self, event: LinkEvent) {
        self.subscribers.emit(event);
    }

    fn run_close_hooks(&self) {
        let hooks: Vec<CloseHook> = self.close_hooks.read().clone();
        trace!(link = %self.kind, hooks = hooks.len(), "Running before-close hooks");
        for hook in hooks {
            hook();
        }
    }

    /// Moves an open connection to `Closed`/`Errored` after the remote side
    /// went away. Returns `false` when the connection was already being torn
    /// down by `close()`.
    fn begin_remote_close(&self, connection_id: u64, failed: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.connection_id != connection_id || inner.state != LinkState::Open {
            return false;
        }
        inner.state = if failed {
            LinkState::Errored
        } else {
            LinkState::Closing
        };
        inner.outbound = None;
        inner.shutdown = None;
        inner.io_task = None;
        true
    }

    fn finish_close(&self, reason: CloseReason, final_state: LinkState) {
        {
            let mut inner = self.inner.lock();
            inner.state = final_state;
            inner.last_close_reason = Some(reason.clone());
        }
        self.emit(LinkEvent::Closed(reason));
    }
}

/// Manages one link across connections.
///
/// # Example
///
/// ```rust,ignore
/// use waav_agent_client::core::link::{LinkManager, LinkOptions, WebSocketConnector};
///
/// let link = LinkManager::new(options, Arc::new(WebSocketConnector::new()));
/// let subscription = link.subscribe(Arc::new(|event| println!("{event:?}")));
/// link.open().await?;
/// link.send_message(&ClientMessage::KeepAlive)?;
/// link.close().await;
/// subscription.unsubscribe();
/// ```
pub struct LinkManager {
    options: LinkOptions,
    connector: Arc<dyn Connector>,
    shared: Arc<LinkShared>,
    /// Serializes concurrent `open()` calls
    connect_lock: tokio::sync::Mutex<()>,
}

impl LinkManager {
    pub fn new(options: LinkOptions, connector: Arc<dyn Connector>) -> Self {
        let shared = Arc::new(LinkShared {
            kind: options.kind,
            inner: Mutex::new(LinkInner::default()),
            subscribers: Arc::new(SubscriberRegistry::default()),
            close_hooks: RwLock::new(Vec::new()),
        });

        Self {
            options,
            connector,
            shared,
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn kind(&self) -> LinkKind {
        self.shared.kind
    }

    pub fn state(&self) -> LinkState {
        self.shared.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    pub fn ever_connected_before(&self) -> bool {
        self.shared.inner.lock().ever_connected_before
    }

    /// Whether Settings went out on the current connection.
    pub fn settings_sent(&self) -> bool {
        self.shared.inner.lock().settings_sent
    }

    /// Id of the current (or most recent) connection; 0 before the first open.
    pub fn connection_id(&self) -> u64 {
        self.shared.inner.lock().connection_id
    }

    pub fn last_close_reason(&self) -> Option<CloseReason> {
        self.shared.inner.lock().last_close_reason.clone()
    }

    /// Registers an event handler.
    pub fn subscribe(&self, handler: LinkEventHandler) -> Subscription {
        let id = self.shared.subscribers.add(handler);
        Subscription::new(id, Arc::downgrade(&self.shared.subscribers))
    }

    /// Registers a hook that runs synchronously before the transport of any
    /// connection of this link is closed.
    pub fn on_before_close(&self, hook: CloseHook) {
        self.shared.close_hooks.write().push(hook);
    }

    /// Marks Settings as sent for `connection_id`.
    ///
    /// Returns `true` only for the first call on the live connection with that
    /// id; any later call, or a call for a stale connection, returns `false`.
    pub fn try_mark_settings_sent(&self, connection_id: u64) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.state != LinkState::Open
            || inner.connection_id != connection_id
            || inner.settings_sent
        {
            return false;
        }
        inner.settings_sent = true;
        true
    }

    /// Clears the Settings flag set by [`try_mark_settings_sent`] when the
    /// Settings frame could not be queued.
    ///
    /// [`try_mark_settings_sent`]: LinkManager::try_mark_settings_sent
    pub(crate) fn clear_settings_sent(&self, connection_id: u64) {
        let mut inner = self.shared.inner.lock();
        if inner.connection_id == connection_id {
            inner.settings_sent = false;
        }
    }

    /// Opens a new connection. No-op when already open.
    pub async fn open(&self) -> LinkResult<()> {
        let _guard = self.connect_lock.lock().await;
        let kind = self.kind();

        let cancel = {
            let mut inner = self.shared.inner.lock();
            let current = inner.state;
            if current == LinkState::Open {
                return Ok(());
            }
            if !current.can_open() {
                return Err(LinkError::InvalidState(format!(
                    "cannot open link while {current}"
                )));
            }
            inner.state = LinkState::Connecting;
            let token = CancellationToken::new();
            inner.connect_cancel = Some(token.clone());
            token
        };

        info!(link = %kind, url = %self.options.endpoint.url, "Opening link");
        self.shared.emit(LinkEvent::Connecting);

        let attempt = timeout(
            self.options.connect_timeout,
            self.connector.connect(&self.options.endpoint),
        );
        let outcome = tokio::select! {
            biased;

            _ = cancel.cancelled() => None,
            result = attempt => Some(result),
        };

        let transport = match outcome {
            None => {
                debug!(link = %kind, "Open cancelled by close()");
                return Err(LinkError::Cancelled);
            }
            Some(Err(_elapsed)) => {
                let err = LinkError::Timeout(format!(
                    "handshake did not complete within {:?}",
                    self.options.connect_timeout
                ));
                return Err(self.fail_connect(err));
            }
            Some(Ok(Err(err))) => {
                return Err(self.fail_connect(err));
            }
            Some(Ok(Ok(transport))) => transport,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let (connection_id, is_reconnection) = {
            let mut inner = self.shared.inner.lock();
            if inner.state != LinkState::Connecting {
                // close() won the race after the handshake finished; dropping
                // the transport closes it.
                return Err(LinkError::Cancelled);
            }
            inner.connect_cancel = None;
            inner.connection_id += 1;
            let is_reconnection = inner.ever_connected_before;
            inner.ever_connected_before = true;
            inner.settings_sent = false;
            inner.last_close_reason = None;
            inner.state = LinkState::Open;
            inner.outbound = Some(tx);
            inner.shutdown = Some(shutdown.clone());
            (inner.connection_id, is_reconnection)
        };

        info!(
            link = %kind,
            connection_id,
            is_reconnection,
            "Link open"
        );
        self.shared.emit(LinkEvent::Connected {
            connection_id,
            is_reconnection,
        });

        let handle = tokio::spawn(run_connection(
            self.shared.clone(),
            connection_id,
            transport,
            rx,
            shutdown,
            self.options.keepalive.clone(),
        ));

        let mut inner = self.shared.inner.lock();
        if inner.connection_id == connection_id && inner.state == LinkState::Open {
            inner.io_task = Some(handle);
        }

        Ok(())
    }

    /// Settles a failed connect attempt and returns the error `open()`
    /// reports. When `close()` already settled the attempt, nothing is
    /// emitted and the open resolves as cancelled.
    fn fail_connect(&self, err: LinkError) -> LinkError {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != LinkState::Connecting {
                debug!(link = %self.kind(), "Ignoring connect failure after close: {}", err);
                return LinkError::Cancelled;
            }
            inner.state = LinkState::Errored;
            inner.connect_cancel = None;
        }
        error!(link = %self.kind(), "Failed to open link: {}", err);
        self.shared.emit(LinkEvent::Error(err.clone()));
        self.shared.run_close_hooks();
        self.shared
            .finish_close(CloseReason::ConnectFailed(err.to_string()), LinkState::Errored);
        err
    }

    /// Closes the link. Never fails; no-op when nothing is open.
    ///
    /// A pending `open()` is cancelled and settles with
    /// [`LinkError::Cancelled`].
    pub async fn close(&self) {
        let kind = self.kind();

        let (io_task, shutdown) = {
            let mut inner = self.shared.inner.lock();
            let current = inner.state;
            match current {
                LinkState::Idle | LinkState::Closed | LinkState::Errored | LinkState::Closing => {
                    return;
                }
                LinkState::Connecting => {
                    if let Some(token) = inner.connect_cancel.take() {
                        token.cancel();
                    }
                    inner.state = LinkState::Closed;
                    inner.last_close_reason = Some(CloseReason::Cancelled);
                    drop(inner);
                    debug!(link = %kind, "Close requested while connecting");
                    self.shared.run_close_hooks();
                    self.shared.emit(LinkEvent::Closed(CloseReason::Cancelled));
                    return;
                }
                LinkState::Open => {
                    inner.state = LinkState::Closing;
                    inner.outbound = None;
                    (inner.io_task.take(), inner.shutdown.take())
                }
            }
        };

        info!(link = %kind, "Closing link");
        self.shared.emit(LinkEvent::Closing);
        self.shared.run_close_hooks();

        if let Some(token) = shutdown {
            token.cancel();
        }
        if let Some(handle) = io_task {
            let abort = handle.abort_handle();
            if timeout(self.options.close_timeout, handle).await.is_err() {
                warn!(link = %kind, "I/O task did not stop in time, aborting");
                abort.abort();
            }
        }

        self.shared
            .finish_close(CloseReason::ClientRequested, LinkState::Closed);
    }

    /// Queues a frame for the current connection.
    pub fn send(&self, frame: Frame) -> LinkResult<()> {
        let inner = self.shared.inner.lock();
        match (inner.state, inner.outbound.as_ref()) {
            (LinkState::Open, Some(tx)) => tx.send(frame).map_err(|_| LinkError::NotConnected),
            _ => Err(LinkError::NotConnected),
        }
    }

    /// Encodes and queues a client message as a text frame.
    pub fn send_message(&self, message: &ClientMessage) -> LinkResult<()> {
        let json = message
            .to_json()
            .map_err(|e| LinkError::Serialization(e.to_string()))?;
        trace!(link = %self.kind(), "Sending {}", message.message_type());
        self.send(Frame::Text(json))
    }

    /// Tears the link down without waiting, for owners that are going away.
    ///
    /// Close hooks run, a pending open is cancelled and the I/O task is told
    /// to flush and close the transport on its own. No events are emitted.
    pub(crate) fn abandon(&self) {
        let (was_active, connect_cancel, shutdown) = {
            let mut inner = self.shared.inner.lock();
            let was_active = matches!(inner.state, LinkState::Connecting | LinkState::Open);
            if was_active {
                inner.state = LinkState::Closed;
                inner.last_close_reason = Some(CloseReason::ClientRequested);
            }
            inner.outbound = None;
            inner.io_task = None;
            (was_active, inner.connect_cancel.take(), inner.shutdown.take())
        };
        if !was_active {
            return;
        }

        debug!(link = %self.kind(), "Abandoning link");
        self.shared.run_close_hooks();
        if let Some(token) = connect_cancel {
            token.cancel();
        }
        if let Some(token) = shutdown {
            token.cancel();
        }
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        self.abandon();
    }
}

// =============================================================================
// I/O Task
// =============================================================================

/// Upper bound used when keepalive is disabled so the timer never fires.
const IDLE_FOREVER: Duration = Duration::from_secs(60 * 60 * 24);

async fn run_connection(
    shared: Arc<LinkShared>,
    connection_id: u64,
    transport: Transport,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    shutdown: CancellationToken,
    keepalive: Option<KeepaliveConfig>,
) {
    let kind = shared.kind;
    let Transport {
        mut sink,
        mut stream,
    } = transport;

    let idle_interval = keepalive
        .as_ref()
        .map(|k| k.interval)
        .unwrap_or(IDLE_FOREVER);
    let idle = sleep(idle_interval);
    tokio::pin!(idle);

    let (reason, failure) = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                flush_and_close(kind, &mut sink, &mut outbound).await;
                return;
            }

            Some(frame) = outbound.recv() => {
                if let Err(e) = sink.send(frame).await {
                    break (CloseReason::TransportError(e.to_string()), Some(e));
                }
            }

            inbound = stream.next() => match inbound {
                Some(Ok(Frame::Close(reason))) => {
                    debug!(link = %kind, ?reason, "Remote close frame");
                    break (CloseReason::RemoteClosed(reason), None);
                }
                Some(Ok(frame)) => {
                    idle.as_mut().reset(Instant::now() + idle_interval);
                    if let Some(event) = demux::classify(kind, frame) {
                        shared.emit(event);
                    }
                }
                Some(Err(e)) => {
                    break (CloseReason::TransportError(e.to_string()), Some(e));
                }
                None => {
                    break (CloseReason::RemoteClosed(None), None);
                }
            },

            _ = &mut idle, if keepalive.is_some() => {
                if let Some(keepalive) = &keepalive {
                    trace!(link = %kind, "Sending keepalive");
                    if let Err(e) = sink.send(keepalive.frame.clone()).await {
                        break (CloseReason::TransportError(e.to_string()), Some(e));
                    }
                }
                idle.as_mut().reset(Instant::now() + idle_interval);
            }
        }
    };

    let failed = failure.is_some();
    if !shared.begin_remote_close(connection_id, failed) {
        return;
    }

    if failed {
        warn!(link = %kind, connection_id, "Link failed: {}", reason);
    } else {
        info!(link = %kind, connection_id, "Link closed: {}", reason);
        shared.emit(LinkEvent::Closing);
    }

    shared.run_close_hooks();
    if let Err(e) = sink.close().await {
        trace!(link = %kind, "Sink close after remote end: {}", e);
    }

    if let Some(err) = failure {
        shared.emit(LinkEvent::Error(err));
        shared.finish_close(reason, LinkState::Errored);
    } else {
        shared.finish_close(reason, LinkState::Closed);
    }
}

async fn flush_and_close(
    kind: LinkKind,
    sink: &mut FrameSink,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
) {
    while let Ok(frame) = outbound.try_recv() {
        if let Err(e) = sink.send(frame).await {
            debug!(link = %kind, "Dropping queued frames on close: {}", e);
            break;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(link = %kind, "Transport close failed: {}", e);
    }
}
