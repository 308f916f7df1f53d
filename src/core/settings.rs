//! Exactly-once Settings per agent connection.

use tracing::{debug, info, warn};

use crate::config::AudioFormatConfig;
use crate::core::link::{LinkError, LinkManager, LinkResult};
use crate::core::protocol::{ClientMessage, SettingsMessage};
use crate::core::snapshot::AgentOptions;

/// What happened when a connection opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsOutcome {
    /// Settings went out on this connection
    Sent {
        /// Reconnected without any prior turns in the context
        context_missing: bool,
    },
    /// Settings were already sent for this connection
    AlreadySent,
}

/// Sends Settings on each new agent connection.
///
/// The sent flag lives on the link itself, so two sessions (or two links)
/// never interfere with each other.
#[derive(Debug, Clone)]
pub struct SettingsCoordinator {
    audio: AudioFormatConfig,
}

impl SettingsCoordinator {
    pub fn new(audio: AudioFormatConfig) -> Self {
        Self { audio }
    }

    /// Handles a `Connected` event for `connection_id`.
    ///
    /// `options` must be the agent options of the snapshot current at the
    /// time of the call; later changes wait for the next connection.
    pub fn on_connected(
        &self,
        link: &LinkManager,
        connection_id: u64,
        is_reconnection: bool,
        options: &AgentOptions,
    ) -> LinkResult<SettingsOutcome> {
        if !link.is_open() {
            return Err(LinkError::NotConnected);
        }
        if !link.try_mark_settings_sent(connection_id) {
            debug!(connection_id, "Settings already sent on this connection");
            return Ok(SettingsOutcome::AlreadySent);
        }

        // The flag is claimed before sending so concurrent callers cannot both
        // send; a failed send gives it back.
        let message = ClientMessage::Settings(SettingsMessage::build(options, &self.audio));
        if let Err(e) = link.send_message(&message) {
            link.clear_settings_sent(connection_id);
            return Err(e);
        }

        let context_missing = is_reconnection && options.context_message_count() == 0;
        if context_missing {
            warn!(
                connection_id,
                "Reconnected without conversation context; the agent starts from a blank history"
            );
        }

        info!(
            connection_id,
            is_reconnection,
            functions = options.functions.len(),
            context_messages = options.context_message_count(),
            "Settings sent"
        );

        Ok(SettingsOutcome::Sent { context_missing })
    }
}
