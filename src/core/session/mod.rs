//! Agent session wiring.
//!
//! An [`AgentSession`] owns the agent link, the optional transcription link,
//! the audio controller and the function call dispatcher, and connects them:
//!
//! - link events of both links are processed by one event loop, in arrival
//!   order per link
//! - Settings go out once per agent connection, built from the snapshot
//!   current at connection time
//! - capture stops before either link's transport closes
//! - snapshot changes are reconciled into link, capture and message actions
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_agent_client::{AgentSession, ClientConfig, SessionSnapshot};
//!
//! let session = AgentSession::builder(ClientConfig::from_env()?)
//!     .capture_device(mic)
//!     .playback(speaker)
//!     .build()?;
//!
//! session.on_conversation_text(Arc::new(|text| {
//!     Box::pin(async move { println!("{}: {}", text.role, text.content) })
//! }));
//!
//! let snapshot = SessionSnapshot::default()
//!     .with_connection(true, false)
//!     .with_capture(true);
//! session.apply(snapshot).await;
//! ```

mod callbacks;
mod events;
#[cfg(test)]
mod tests;

use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub use callbacks::HostCallback;
pub use events::{AgentActivity, ConnectionStateChange, ContextMissing, TranscriptEvent};

use crate::config::ClientConfig;
use crate::core::audio::{AudioLifecycleController, CaptureDevice, PlaybackSink};
use crate::core::functions::{FunctionCallDispatcher, FunctionCallHandler, ResponseSink};
use crate::core::link::{
    CloseReason, Connector, Frame, LinkError, LinkEvent, LinkKind, LinkManager, LinkResult,
    LinkState, Subscription, WebSocketConnector,
};
use crate::core::protocol::{
    ClientMessage, ConversationText, FunctionCallResponse, ServerMessage,
};
use crate::core::reconciler::{ConfigReconciler, ReconcileAction};
use crate::core::settings::{SettingsCoordinator, SettingsOutcome};
use crate::core::snapshot::{AgentContext, ContextMessage, SessionSnapshot};
use crate::core::vad::{SpeechEvent, SpeechEventRouter, SpeechNotification, SpeechState};
use crate::errors::{ErrorCode, ServiceKind, SessionError, SessionResult};
use callbacks::HostCallbacks;

// =============================================================================
// Builder
// =============================================================================

/// Builds an [`AgentSession`].
pub struct AgentSessionBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    transcription_connector: Option<Arc<dyn Connector>>,
    capture_device: Option<Arc<dyn CaptureDevice>>,
    playback: Option<Arc<dyn PlaybackSink>>,
    initial_snapshot: SessionSnapshot,
}

impl AgentSessionBuilder {
    /// Transport for both links. Defaults to [`WebSocketConnector`].
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Transport for the transcription link only.
    pub fn transcription_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.transcription_connector = Some(connector);
        self
    }

    pub fn capture_device(mut self, device: Arc<dyn CaptureDevice>) -> Self {
        self.capture_device = Some(device);
        self
    }

    pub fn playback(mut self, playback: Arc<dyn PlaybackSink>) -> Self {
        self.playback = Some(playback);
        self
    }

    /// Snapshot the first [`AgentSession::apply`] is diffed against. It is
    /// recorded without acting on it.
    pub fn initial_snapshot(mut self, snapshot: SessionSnapshot) -> Self {
        self.initial_snapshot = snapshot;
        self
    }

    /// Creates the session and starts its event loop. Must be called from
    /// within a tokio runtime.
    pub fn build(self) -> SessionResult<AgentSession> {
        self.config.validate()?;
        let capture_device = self
            .capture_device
            .ok_or_else(|| SessionError::configuration("capture device not provided"))?;
        let playback = self
            .playback
            .ok_or_else(|| SessionError::configuration("playback sink not provided"))?;

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WebSocketConnector::new()),
        };
        let transcription_connector = self
            .transcription_connector
            .unwrap_or_else(|| connector.clone());

        let agent = Arc::new(LinkManager::new(
            self.config.link_options(LinkKind::Agent)?,
            connector,
        ));
        let transcription = if self.config.has_transcription() {
            Some(Arc::new(LinkManager::new(
                self.config.link_options(LinkKind::Transcription)?,
                transcription_connector,
            )))
        } else {
            None
        };

        let audio = Arc::new(AudioLifecycleController::new(capture_device, playback));
        let links: Vec<&Arc<LinkManager>> = std::iter::once(&agent)
            .chain(transcription.iter())
            .collect();
        for link in &links {
            link.on_before_close(audio.close_hook());
        }

        let frame_targets: Vec<Weak<LinkManager>> =
            links.iter().map(|link| Arc::downgrade(link)).collect();
        audio.set_frame_sink(Arc::new(move |frame: Bytes| {
            for link in frame_targets.iter().filter_map(Weak::upgrade) {
                if link.is_open() {
                    let _ = link.send(Frame::Binary(frame.clone()));
                }
            }
        }));

        let dispatcher = FunctionCallDispatcher::new(
            Arc::new(AgentResponseSink {
                link: Arc::downgrade(&agent),
            }),
            self.config.function_call_timeout(),
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscriptions: Vec<Subscription> = links
            .iter()
            .map(|link| {
                let tx = events_tx.clone();
                let kind = link.kind();
                link.subscribe(Arc::new(move |event: LinkEvent| {
                    let _ = tx.send((kind, event));
                }))
            })
            .collect();

        let settings = SettingsCoordinator::new(self.config.audio.clone());
        let inner = Arc::new(SessionInner {
            id: uuid::Uuid::new_v4().to_string(),
            config: self.config,
            agent,
            transcription,
            audio,
            settings,
            dispatcher,
            speech: SpeechEventRouter::new(),
            reconciler: Mutex::new(ConfigReconciler::primed(self.initial_snapshot.clone())),
            snapshot: ArcSwap::from_pointee(self.initial_snapshot),
            history: Mutex::new(Vec::new()),
            callbacks: HostCallbacks::default(),
            subscriptions: Mutex::new(subscriptions),
        });

        info!(
            session_id = %inner.id,
            transcription = inner.transcription.is_some(),
            "Agent session created"
        );

        let event_task = tokio::spawn(run_event_loop(inner.clone(), events_rx));
        Ok(AgentSession { inner, event_task })
    }
}

/// Sends function call responses on the agent link.
struct AgentResponseSink {
    link: Weak<LinkManager>,
}

impl ResponseSink for AgentResponseSink {
    fn send_response(&self, response: FunctionCallResponse) -> LinkResult<()> {
        let link = self.link.upgrade().ok_or(LinkError::NotConnected)?;
        link.send_message(&ClientMessage::FunctionCallResponse(response))
    }
}

// =============================================================================
// Session
// =============================================================================

struct SessionInner {
    id: String,
    config: ClientConfig,
    agent: Arc<LinkManager>,
    transcription: Option<Arc<LinkManager>>,
    audio: Arc<AudioLifecycleController>,
    settings: SettingsCoordinator,
    dispatcher: FunctionCallDispatcher,
    speech: SpeechEventRouter,
    reconciler: Mutex<ConfigReconciler>,
    snapshot: ArcSwap<SessionSnapshot>,
    history: Mutex<Vec<ContextMessage>>,
    callbacks: HostCallbacks,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// A running voice agent session.
///
/// Dropping the session stops capture and the event loop and tears both
/// links down without waiting; call [`AgentSession::shutdown`] first to close
/// them cleanly.
pub struct AgentSession {
    inner: Arc<SessionInner>,
    event_task: JoinHandle<()>,
}

impl AgentSession {
    pub fn builder(config: ClientConfig) -> AgentSessionBuilder {
        AgentSessionBuilder {
            config,
            connector: None,
            transcription_connector: None,
            capture_device: None,
            playback: None,
            initial_snapshot: SessionSnapshot::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The snapshot most recently applied.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.inner.snapshot.load_full()
    }

    /// State of a link; `Idle` for a transcription link that is not
    /// configured.
    /// Current state of a link. A failed link reads as `Closed`; the failure
    /// itself is reported through [`on_error`](AgentSession::on_error).
    pub fn link_state(&self, kind: LinkKind) -> LinkState {
        let state = match kind {
            LinkKind::Agent => self.inner.agent.state(),
            LinkKind::Transcription => self
                .inner
                .transcription
                .as_ref()
                .map_or(LinkState::Idle, |link| link.state()),
        };
        host_visible(state)
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.audio.is_capturing()
    }

    pub fn speech_state(&self) -> SpeechState {
        self.inner.speech.state()
    }

    pub fn pending_function_calls(&self) -> usize {
        self.inner.dispatcher.pending_count()
    }

    /// Conversation turns seen so far, oldest first.
    pub fn conversation_history(&self) -> Vec<ContextMessage> {
        self.inner.history.lock().clone()
    }

    /// The conversation so far as context for the next connection.
    pub fn history_context(&self) -> AgentContext {
        AgentContext {
            messages: self.conversation_history(),
        }
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    /// Reconciles `snapshot` against the previous one and runs the resulting
    /// actions in order. Failed actions are reported through the error
    /// callback and do not stop the remaining ones.
    pub async fn apply(&self, snapshot: SessionSnapshot) -> Vec<ReconcileAction> {
        let actions = {
            let mut reconciler = self.inner.reconciler.lock();
            let actions = reconciler.reconcile(&snapshot);
            self.inner.snapshot.store(Arc::new(snapshot));
            actions
        };

        for action in &actions {
            debug!(session_id = %self.inner.id, action = %action, "Executing action");
            if let Err(err) = self.inner.execute(action).await {
                warn!(session_id = %self.inner.id, action = %action, "Action failed: {}", err);
                self.inner.callbacks.error.invoke(err).await;
            }
        }
        actions
    }

    /// Opens a link. Returns once connected; an open cancelled by a
    /// concurrent disconnect resolves `Ok`.
    pub async fn connect(&self, kind: LinkKind) -> SessionResult<()> {
        self.inner.execute(&ReconcileAction::OpenLink(kind)).await
    }

    pub async fn disconnect(&self, kind: LinkKind) -> SessionResult<()> {
        self.inner.execute(&ReconcileAction::CloseLink(kind)).await
    }

    /// Injects a user message into the agent conversation.
    pub async fn send_user_message(&self, content: impl Into<String>) -> SessionResult<()> {
        self.inner
            .execute(&ReconcileAction::SendUserMessage(content.into()))
            .await
    }

    /// Drops queued agent audio.
    pub async fn interrupt(&self) -> SessionResult<()> {
        self.inner.execute(&ReconcileAction::Interrupt).await
    }

    pub async fn start_capture(&self) -> SessionResult<()> {
        self.inner.execute(&ReconcileAction::StartCapture).await
    }

    /// Returns whether a running capture was stopped.
    pub fn stop_capture(&self) -> bool {
        self.inner.audio.stop_capture()
    }

    /// Sends an audio frame on every open link.
    pub fn send_audio(&self, frame: Bytes) -> SessionResult<()> {
        let mut sent = false;
        for link in self.inner.links() {
            if link.is_open() {
                link.send(Frame::Binary(frame.clone()))
                    .map_err(|e| SessionError::from_link(link.kind(), &e))?;
                sent = true;
            }
        }
        if !sent {
            return Err(SessionError::new(
                ServiceKind::Audio,
                ErrorCode::NotConnected,
                "no open link to send audio on",
            ));
        }
        Ok(())
    }

    /// Stops capture, closes both links and drops pending function calls.
    pub async fn shutdown(&self) {
        info!(session_id = %self.inner.id, "Shutting down agent session");
        self.inner.audio.stop_capture();
        if self.inner.transcription.is_some() {
            self.inner.close_link(LinkKind::Transcription).await;
        }
        self.inner.agent.close().await;
        self.inner.dispatcher.cancel_all();
        if let Err(e) = self.inner.audio.abort_playback() {
            debug!("Ignoring playback abort failure during shutdown: {}", e);
        }
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    pub fn on_connection_state(&self, callback: HostCallback<ConnectionStateChange>) {
        self.inner.callbacks.connection_state.set(callback);
    }

    pub fn on_settings_applied(&self, callback: HostCallback<()>) {
        self.inner.callbacks.settings_applied.set(callback);
    }

    pub fn on_context_missing(&self, callback: HostCallback<ContextMissing>) {
        self.inner.callbacks.context_missing.set(callback);
    }

    /// Registers the function call handler. Without one, every client-side
    /// call is answered with an error.
    pub fn on_function_call(&self, handler: FunctionCallHandler) {
        self.inner.dispatcher.set_handler(handler);
    }

    pub fn on_speech(&self, callback: HostCallback<SpeechNotification>) {
        self.inner.callbacks.speech.set(callback);
    }

    pub fn on_conversation_text(&self, callback: HostCallback<ConversationText>) {
        self.inner.callbacks.conversation_text.set(callback);
    }

    pub fn on_transcript(&self, callback: HostCallback<TranscriptEvent>) {
        self.inner.callbacks.transcript.set(callback);
    }

    pub fn on_agent_activity(&self, callback: HostCallback<AgentActivity>) {
        self.inner.callbacks.agent_activity.set(callback);
    }

    pub fn on_user_message_sent(&self, callback: HostCallback<String>) {
        self.inner.callbacks.user_message_sent.set(callback);
    }

    pub fn on_interrupted(&self, callback: HostCallback<()>) {
        self.inner.callbacks.interrupted.set(callback);
    }

    pub fn on_error(&self, callback: HostCallback<SessionError>) {
        self.inner.callbacks.error.set(callback);
    }

    /// Every decoded inbound message, before the session handles it.
    pub fn on_message(&self, callback: HostCallback<(LinkKind, ServerMessage)>) {
        self.inner.callbacks.message.set(callback);
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.inner.audio.stop_capture();
        for subscription in self.inner.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
        for link in self.inner.links() {
            link.abandon();
        }
        self.inner.dispatcher.cancel_all();
        self.event_task.abort();
    }
}

/// Hosts see a failed link as closed.
fn host_visible(state: LinkState) -> LinkState {
    match state {
        LinkState::Errored => LinkState::Closed,
        other => other,
    }
}

// =============================================================================
// Actions
// =============================================================================

impl SessionInner {
    fn links(&self) -> impl Iterator<Item = &Arc<LinkManager>> {
        std::iter::once(&self.agent).chain(self.transcription.iter())
    }

    fn link(&self, kind: LinkKind) -> SessionResult<&Arc<LinkManager>> {
        match kind {
            LinkKind::Agent => Ok(&self.agent),
            LinkKind::Transcription => self.transcription.as_ref().ok_or_else(|| {
                SessionError::configuration("transcription link requested but no transcription URL is configured")
            }),
        }
    }

    async fn execute(&self, action: &ReconcileAction) -> SessionResult<()> {
        match action {
            ReconcileAction::OpenLink(kind) => {
                let link = self.link(*kind)?;
                match link.open().await {
                    Ok(()) => {
                        // Settings must precede any action queued after the
                        // open; the event loop's copy becomes a no-op.
                        if *kind == LinkKind::Agent {
                            let connection_id = link.connection_id();
                            self.send_settings(connection_id, connection_id > 1).await;
                        }
                        Ok(())
                    }
                    Err(LinkError::Cancelled) => {
                        debug!(link = %kind, "Open superseded by close");
                        Ok(())
                    }
                    Err(e) => Err(SessionError::new(
                        (*kind).into(),
                        action.error_code(),
                        e.to_string(),
                    )),
                }
            }
            ReconcileAction::CloseLink(kind) => {
                if *kind == LinkKind::Transcription && self.transcription.is_none() {
                    return Ok(());
                }
                self.close_link(*kind).await;
                Ok(())
            }
            ReconcileAction::StartCapture => {
                if self.audio.is_capturing() {
                    return Ok(());
                }
                self.audio
                    .start_capture()
                    .await
                    .map_err(|e| SessionError::from_audio(action.error_code(), &e))
            }
            ReconcileAction::StopCapture => {
                self.audio.stop_capture();
                Ok(())
            }
            ReconcileAction::Interrupt => {
                self.audio
                    .abort_playback()
                    .map_err(|e| SessionError::from_audio(action.error_code(), &e))?;
                info!(session_id = %self.id, "Agent playback interrupted");
                self.callbacks.interrupted.invoke(()).await;
                Ok(())
            }
            ReconcileAction::SendUserMessage(content) => {
                let message = ClientMessage::InjectUserMessage {
                    content: content.clone(),
                };
                self.agent.send_message(&message).map_err(|e| {
                    SessionError::new(ServiceKind::Agent, action.error_code(), e.to_string())
                })?;
                debug!(session_id = %self.id, "User message sent");
                self.callbacks.user_message_sent.invoke(content.clone()).await;
                Ok(())
            }
        }
    }

    /// Closes a link. The transcription stream is asked to flush first; the
    /// close sends any queued frames before the transport goes away.
    async fn close_link(&self, kind: LinkKind) {
        let Ok(link) = self.link(kind) else {
            return;
        };
        if kind == LinkKind::Transcription
            && link.is_open()
            && let Err(e) = link.send_message(&ClientMessage::CloseStream)
        {
            debug!("Could not request transcription flush: {}", e);
        }
        link.close().await;
    }

    async fn report(&self, error: SessionError) {
        warn!(session_id = %self.id, service = %error.service, code = %error.code, "{}", error.message);
        self.callbacks.error.invoke(error).await;
    }
}

// =============================================================================
// Event loop
// =============================================================================

async fn run_event_loop(
    inner: Arc<SessionInner>,
    mut events: mpsc::UnboundedReceiver<(LinkKind, LinkEvent)>,
) {
    while let Some((kind, event)) = events.recv().await {
        inner.handle_link_event(kind, event).await;
    }
    debug!(session_id = %inner.id, "Session event loop finished");
}

impl SessionInner {
    async fn handle_link_event(&self, kind: LinkKind, event: LinkEvent) {
        match event {
            LinkEvent::Connecting => {
                self.notify_state(kind, LinkState::Connecting, None, None)
                    .await;
            }
            LinkEvent::Connected {
                connection_id,
                is_reconnection,
            } => {
                self.notify_state(kind, LinkState::Open, None, Some(is_reconnection))
                    .await;
                if kind == LinkKind::Agent {
                    self.send_settings(connection_id, is_reconnection).await;
                }
            }
            LinkEvent::Closing => {
                self.notify_state(kind, LinkState::Closing, None, None).await;
            }
            LinkEvent::Closed(reason) => {
                self.speech.reset();
                if kind == LinkKind::Agent {
                    self.dispatcher.cancel_all();
                    if let Err(e) = self.audio.abort_playback() {
                        debug!("Ignoring playback abort failure: {}", e);
                    }
                }
                // Failures arrive as a separate Error event.
                self.notify_state(kind, LinkState::Closed, Some(reason), None)
                    .await;
            }
            LinkEvent::Error(err) => {
                self.report(SessionError::from_link(kind, &err)).await;
            }
            LinkEvent::Binary(data) => {
                if kind != LinkKind::Agent {
                    trace!(link = %kind, bytes = data.len(), "Ignoring binary frame");
                    return;
                }
                if let Err(e) = self.audio.enqueue_playback(data).await {
                    self.report(SessionError::from_audio(ErrorCode::PlaybackFailed, &e))
                        .await;
                }
            }
            LinkEvent::Message(message) => self.handle_message(kind, message).await,
        }
    }

    async fn notify_state(
        &self,
        link: LinkKind,
        state: LinkState,
        reason: Option<CloseReason>,
        is_reconnection: Option<bool>,
    ) {
        self.callbacks
            .connection_state
            .invoke(ConnectionStateChange {
                link,
                state,
                reason,
                is_reconnection,
            })
            .await;
    }

    async fn send_settings(&self, connection_id: u64, is_reconnection: bool) {
        let snapshot = self.snapshot.load_full();
        match self
            .settings
            .on_connected(&self.agent, connection_id, is_reconnection, &snapshot.agent)
        {
            Ok(SettingsOutcome::Sent { context_missing }) => {
                if context_missing {
                    self.callbacks
                        .context_missing
                        .invoke(ContextMissing { connection_id })
                        .await;
                }
            }
            Ok(SettingsOutcome::AlreadySent) => {}
            Err(LinkError::NotConnected) => {
                debug!(connection_id, "Agent link closed before Settings could be sent");
            }
            Err(e) => {
                self.report(SessionError::new(
                    ServiceKind::Agent,
                    ErrorCode::SendFailed,
                    format!("failed to send Settings: {e}"),
                ))
                .await;
            }
        }
    }

    async fn handle_message(&self, kind: LinkKind, message: ServerMessage) {
        if self.callbacks.message.is_set() {
            self.callbacks.message.invoke((kind, message.clone())).await;
        }

        if let Some(notification) = self.speech.route(&message) {
            if kind == LinkKind::Agent
                && notification.event == SpeechEvent::UserStartedSpeaking
                && let Err(e) = self.audio.abort_playback()
            {
                debug!("Ignoring playback abort failure on barge-in: {}", e);
            }
            self.callbacks.speech.invoke(notification).await;
            return;
        }

        match message {
            ServerMessage::Welcome { request_id } => {
                info!(link = %kind, request_id = ?request_id, "Welcome received");
            }
            ServerMessage::SettingsApplied => {
                info!(session_id = %self.id, "Settings applied");
                self.callbacks.settings_applied.invoke(()).await;
            }
            ServerMessage::ConversationText(text) => {
                self.history.lock().push(ContextMessage {
                    role: text.role.clone(),
                    content: text.content.clone(),
                });
                self.callbacks.conversation_text.invoke(text).await;
            }
            ServerMessage::FunctionCallRequest(request) => {
                self.dispatcher.dispatch_all(&request.functions);
            }
            ServerMessage::AgentThinking { content } => {
                self.callbacks
                    .agent_activity
                    .invoke(AgentActivity::Thinking { content })
                    .await;
            }
            ServerMessage::AgentStartedSpeaking {
                total_latency,
                tts_latency,
                ttt_latency,
            } => {
                self.callbacks
                    .agent_activity
                    .invoke(AgentActivity::StartedSpeaking {
                        total_latency,
                        tts_latency,
                        ttt_latency,
                    })
                    .await;
            }
            ServerMessage::AgentAudioDone => {
                self.callbacks
                    .agent_activity
                    .invoke(AgentActivity::AudioDone)
                    .await;
            }
            ServerMessage::Results(results) => {
                self.callbacks
                    .transcript
                    .invoke(TranscriptEvent::from(&results))
                    .await;
            }
            ServerMessage::InjectionRefused { message } => {
                self.report(SessionError::new(
                    ServiceKind::Agent,
                    ErrorCode::InjectionRefused,
                    message.unwrap_or_else(|| "user message refused by agent".to_string()),
                ))
                .await;
            }
            ServerMessage::Error { description, code } => {
                let message = match code {
                    Some(code) => format!("{description} ({code})"),
                    None => description,
                };
                self.report(SessionError::new(kind.into(), ErrorCode::ServerError, message))
                    .await;
            }
            ServerMessage::Warning { description, code } => {
                warn!(link = %kind, code = ?code, "Server warning: {}", description);
            }
            ServerMessage::Malformed {
                message_type,
                reason,
            } => {
                warn!(link = %kind, message_type = %message_type, "Dropping malformed message: {}", reason);
            }
            ServerMessage::Unknown { message_type } => {
                debug!(link = %kind, message_type = %message_type, "Ignoring unknown message type");
            }
            other => {
                trace!(link = %kind, message_type = other.message_type(), "Message needs no handling");
            }
        }
    }
}
