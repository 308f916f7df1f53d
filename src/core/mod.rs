pub mod audio;
pub mod functions;
pub mod link;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod settings;
pub mod snapshot;
pub mod vad;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types for convenience
pub use link::{
    CloseReason, Connector, Frame, LinkEndpoint, LinkError, LinkEvent, LinkKind, LinkManager,
    LinkOptions, LinkResult, LinkState, WebSocketConnector,
};

pub use audio::{
    AudioError, AudioLifecycleController, AudioResult, CaptureDevice, CaptureStream, CaptureTrack,
    PlaybackSink,
};

pub use functions::{
    FunctionCallDispatcher, FunctionCallHandler, FunctionCallRequest, FunctionResponder,
    HandlerFuture,
};

pub use protocol::{ClientMessage, ConversationText, ServerMessage};

pub use reconciler::{ConfigReconciler, ReconcileAction};
pub use settings::{SettingsCoordinator, SettingsOutcome};

pub use snapshot::{
    AgentContext, AgentOptions, ContextMessage, FunctionDefinition, FunctionEndpoint,
    ProviderOptions, SessionSnapshot,
};

pub use session::{
    AgentActivity, AgentSession, AgentSessionBuilder, ConnectionStateChange, ContextMissing,
    HostCallback, TranscriptEvent,
};

pub use vad::{SpeechEvent, SpeechEventRouter, SpeechNotification, SpeechState};
