//! Host callback slots.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

use super::events::{AgentActivity, ConnectionStateChange, ContextMissing, TranscriptEvent};
use crate::core::link::LinkKind;
use crate::core::protocol::{ConversationText, ServerMessage};
use crate::core::vad::SpeechNotification;
use crate::errors::SessionError;

/// Async host callback. The session awaits it before handling the next
/// event, so long-running work should be spawned by the host.
pub type HostCallback<T> =
    Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One optional callback.
pub(crate) struct CallbackSlot<T>(RwLock<Option<HostCallback<T>>>);

impl<T> Default for CallbackSlot<T> {
    fn default() -> Self {
        Self(RwLock::new(None))
    }
}

impl<T: Send + 'static> CallbackSlot<T> {
    pub(crate) fn set(&self, callback: HostCallback<T>) {
        *self.0.write() = Some(callback);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.read().is_some()
    }

    /// Invokes the callback if one is registered. The lock is released before
    /// awaiting.
    pub(crate) async fn invoke(&self, value: T) {
        let callback = self.0.read().clone();
        if let Some(callback) = callback {
            callback(value).await;
        }
    }
}

/// All host callbacks of a session.
#[derive(Default)]
pub(crate) struct HostCallbacks {
    pub(crate) connection_state: CallbackSlot<ConnectionStateChange>,
    pub(crate) settings_applied: CallbackSlot<()>,
    pub(crate) context_missing: CallbackSlot<ContextMissing>,
    pub(crate) speech: CallbackSlot<SpeechNotification>,
    pub(crate) conversation_text: CallbackSlot<ConversationText>,
    pub(crate) transcript: CallbackSlot<TranscriptEvent>,
    pub(crate) agent_activity: CallbackSlot<AgentActivity>,
    pub(crate) user_message_sent: CallbackSlot<String>,
    pub(crate) interrupted: CallbackSlot<()>,
    pub(crate) error: CallbackSlot<SessionError>,
    /// Every decoded inbound message, before session handling
    pub(crate) message: CallbackSlot<(LinkKind, ServerMessage)>,
}
