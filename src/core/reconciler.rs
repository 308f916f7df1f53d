//! Snapshot diffing.
//!
//! [`ConfigReconciler`] turns the difference between the previous and the
//! next [`SessionSnapshot`] into an ordered list of [`ReconcileAction`]s.
//! It keeps only the previous snapshot; there is no other hidden state.

use std::fmt;

use tracing::{debug, trace};

use crate::core::link::LinkKind;
use crate::core::snapshot::SessionSnapshot;
use crate::errors::ErrorCode;

/// One imperative step derived from a snapshot change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    StopCapture,
    CloseLink(LinkKind),
    OpenLink(LinkKind),
    StartCapture,
    Interrupt,
    SendUserMessage(String),
}

impl ReconcileAction {
    /// Code reported to the host when this action fails.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ReconcileAction::StopCapture => ErrorCode::CaptureStopFailed,
            ReconcileAction::CloseLink(_) => ErrorCode::CloseFailed,
            ReconcileAction::OpenLink(_) => ErrorCode::OpenFailed,
            ReconcileAction::StartCapture => ErrorCode::CaptureStartFailed,
            ReconcileAction::Interrupt => ErrorCode::InterruptFailed,
            ReconcileAction::SendUserMessage(_) => ErrorCode::UserMessageFailed,
        }
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAction::StopCapture => write!(f, "stop_capture"),
            ReconcileAction::CloseLink(kind) => write!(f, "close_{kind}"),
            ReconcileAction::OpenLink(kind) => write!(f, "open_{kind}"),
            ReconcileAction::StartCapture => write!(f, "start_capture"),
            ReconcileAction::Interrupt => write!(f, "interrupt"),
            ReconcileAction::SendUserMessage(_) => write!(f, "send_user_message"),
        }
    }
}

/// Diffs consecutive snapshots.
#[derive(Debug, Default)]
pub struct ConfigReconciler {
    previous: Option<SessionSnapshot>,
}

impl ConfigReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reconciler whose next pass is diffed against `snapshot`.
    pub fn primed(snapshot: SessionSnapshot) -> Self {
        Self {
            previous: Some(snapshot),
        }
    }

    pub fn previous(&self) -> Option<&SessionSnapshot> {
        self.previous.as_ref()
    }

    /// Records `next` and returns the actions needed to get there.
    ///
    /// The first pass only records the snapshot. Agent option changes never
    /// produce actions; they take effect through Settings on the next
    /// connection.
    pub fn reconcile(&mut self, next: &SessionSnapshot) -> Vec<ReconcileAction> {
        let Some(previous) = self.previous.replace(next.clone()) else {
            debug!("First reconcile pass, recording snapshot only");
            return Vec::new();
        };

        if previous == *next {
            trace!("Snapshot unchanged");
            return Vec::new();
        }

        let mut actions = Vec::new();
        let from = previous.connection;
        let to = next.connection;

        if previous.capture && !next.capture {
            actions.push(ReconcileAction::StopCapture);
        }
        if from.transcription && !to.transcription {
            actions.push(ReconcileAction::CloseLink(LinkKind::Transcription));
        }
        if from.agent && !to.agent {
            actions.push(ReconcileAction::CloseLink(LinkKind::Agent));
        }
        if !from.agent && to.agent {
            actions.push(ReconcileAction::OpenLink(LinkKind::Agent));
        }
        if !from.transcription && to.transcription {
            actions.push(ReconcileAction::OpenLink(LinkKind::Transcription));
        }
        if !previous.capture && next.capture {
            actions.push(ReconcileAction::StartCapture);
        }
        if !previous.interrupt && next.interrupt {
            actions.push(ReconcileAction::Interrupt);
        }
        if let Some(message) = &next.pending_user_message
            && previous.pending_user_message.as_ref() != Some(message)
        {
            actions.push(ReconcileAction::SendUserMessage(message.clone()));
        }

        debug!(actions = actions.len(), "Snapshot reconciled");
        actions
    }
}
