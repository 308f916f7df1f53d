use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::core::functions::DEFAULT_NO_RESPONSE_ERROR;
use crate::core::snapshot::AgentOptions;
use crate::core::test_support::{
    EventLog, MockCaptureDevice, MockConnector, MockPlayback, MockServer,
};

struct Harness {
    session: AgentSession,
    log: EventLog,
    agent: Arc<MockConnector>,
    agent_servers: UnboundedReceiver<MockServer>,
    transcription_servers: UnboundedReceiver<MockServer>,
    device: Arc<MockCaptureDevice>,
    playback: Arc<MockPlayback>,
}

fn test_config(with_transcription: bool) -> ClientConfig {
    let mut config = ClientConfig::new("test-key");
    config.keepalive_interval_ms = 0;
    config.connect_timeout_ms = 1_000;
    config.close_timeout_ms = 1_000;
    config.function_call_timeout_ms = 2_000;
    if with_transcription {
        config.transcription_url = Some("wss://stt.test/v1/listen".to_string());
    }
    config
}

fn harness(with_transcription: bool) -> Harness {
    let log = EventLog::default();
    let (agent, agent_servers) = MockConnector::new("agent", log.clone());
    let (transcription, transcription_servers) = MockConnector::new("transcription", log.clone());
    let device = MockCaptureDevice::new(log.clone());
    let playback = MockPlayback::new();

    let session = AgentSession::builder(test_config(with_transcription))
        .connector(agent.clone())
        .transcription_connector(transcription)
        .capture_device(device.clone())
        .playback(playback.clone())
        .build()
        .unwrap();

    Harness {
        session,
        log,
        agent,
        agent_servers,
        transcription_servers,
        device,
        playback,
    }
}

/// Callback that records every payload it receives.
fn recorder<T: Send + 'static>() -> (HostCallback<T>, Arc<Mutex<Vec<T>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: HostCallback<T> = Arc::new(move |value: T| {
        sink.lock().push(value);
        Box::pin(async {})
    });
    (callback, seen)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn connected(agent: bool, transcription: bool) -> SessionSnapshot {
    SessionSnapshot::default().with_connection(agent, transcription)
}

async fn expect_settings(server: &mut MockServer) -> Value {
    let settings = server.next_json().await.unwrap();
    assert_eq!(settings["type"], "Settings");
    settings
}

// =============================================================================
// Settings
// =============================================================================

#[tokio::test]
async fn test_settings_sent_once_per_connection() {
    let mut h = harness(false);

    let actions = h.session.apply(connected(true, false)).await;
    assert_eq!(actions, vec![ReconcileAction::OpenLink(LinkKind::Agent)]);

    let mut server = h.agent_servers.recv().await.unwrap();
    let settings = expect_settings(&mut server).await;
    assert!(settings["agent"]["think"].get("functions").is_none());

    // Option changes take effect on the next connection only.
    let changed = connected(true, false).with_agent(AgentOptions {
        instructions: Some("Answer in French.".to_string()),
        ..Default::default()
    });
    assert!(h.session.apply(changed).await.is_empty());
    assert!(server.quiet_for(Duration::from_millis(100)).await);
    assert_eq!(h.agent.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_context_missing_on_reconnection_without_context() {
    let mut h = harness(false);
    let (callback, warnings) = recorder::<ContextMissing>();
    h.session.on_context_missing(callback);

    h.session.apply(connected(true, false)).await;
    let mut first = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut first).await;

    h.session.apply(connected(false, false)).await;
    h.session.apply(connected(true, false)).await;
    let mut second = h.agent_servers.recv().await.unwrap();
    let settings = expect_settings(&mut second).await;
    assert!(settings["agent"].get("context").is_none());

    eventually(|| warnings.lock().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let warnings = warnings.lock();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].connection_id, 2);
}

#[tokio::test]
async fn test_reconnection_with_history_context_has_no_warning() {
    let mut h = harness(false);
    let (callback, warnings) = recorder::<ContextMissing>();
    h.session.on_context_missing(callback);

    h.session.apply(connected(true, false)).await;
    let mut first = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut first).await;
    first.send_json(json!({"type": "ConversationText", "role": "user", "content": "Book a table"}));
    eventually(|| h.session.conversation_history().len() == 1).await;

    h.session.apply(connected(false, false)).await;
    let with_context = connected(true, false).with_agent(AgentOptions {
        context: Some(h.session.history_context()),
        ..Default::default()
    });
    h.session.apply(with_context).await;

    let mut second = h.agent_servers.recv().await.unwrap();
    let settings = expect_settings(&mut second).await;
    assert_eq!(
        settings["agent"]["context"]["messages"][0]["content"],
        "Book a table"
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(warnings.lock().is_empty());
}

#[tokio::test]
async fn test_settings_applied_callback() {
    let mut h = harness(false);
    let (callback, applied) = recorder::<()>();
    h.session.on_settings_applied(callback);

    h.session.apply(connected(true, false)).await;
    let mut server = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut server).await;
    server.send_json(json!({"type": "SettingsApplied"}));

    eventually(|| applied.lock().len() == 1).await;
}

// =============================================================================
// Function calls
// =============================================================================

#[tokio::test]
async fn test_function_call_without_response_gets_default_error() {
    let mut h = harness(false);
    h.session
        .on_function_call(Arc::new(|_request, _responder| Box::pin(async move { Ok(None) })));

    h.session.apply(connected(true, false)).await;
    let mut server = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut server).await;

    server.send_json(json!({
        "type": "FunctionCallRequest",
        "functions": [{"id": "c1", "name": "f", "arguments": "{}", "client_side": true}]
    }));

    let response = server.next_json().await.unwrap();
    assert_eq!(response["type"], "FunctionCallResponse");
    assert_eq!(response["id"], "c1");
    assert_eq!(response["name"], "f");
    let content: Value = serde_json::from_str(response["content"].as_str().unwrap()).unwrap();
    assert_eq!(content, json!({"error": DEFAULT_NO_RESPONSE_ERROR}));

    assert!(server.quiet_for(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_function_call_result_round_trip() {
    let mut h = harness(false);
    h.session.on_function_call(Arc::new(|request, responder| {
        Box::pin(async move {
            responder.respond_ok(json!({"echo": request.arguments["city"]}));
            Ok(None)
        })
    }));

    h.session.apply(connected(true, false)).await;
    let mut server = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut server).await;

    server.send_json(json!({
        "type": "FunctionCallRequest",
        "functions": [{"id": "c2", "name": "weather", "arguments": "{\"city\":\"Oslo\"}", "client_side": true}]
    }));

    let response = server.next_json().await.unwrap();
    let content: Value = serde_json::from_str(response["content"].as_str().unwrap()).unwrap();
    assert_eq!(content, json!({"result": {"echo": "Oslo"}}));
    assert!(server.quiet_for(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_server_side_function_call_not_dispatched() {
    let mut h = harness(false);
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = invoked.clone();
    h.session.on_function_call(Arc::new(move |_request, _responder| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(Some(json!("nope"))) })
    }));

    h.session.apply(connected(true, false)).await;
    let mut server = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut server).await;

    server.send_json(json!({
        "type": "FunctionCallRequest",
        "functions": [{"id": "s1", "name": "lookup", "arguments": "{}", "client_side": false}]
    }));

    assert!(server.quiet_for(Duration::from_millis(100)).await);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Audio
// =============================================================================

#[tokio::test]
async fn test_disconnect_stops_capture_before_transport_close() {
    let mut h = harness(false);

    let actions = h
        .session
        .apply(connected(true, false).with_capture(true))
        .await;
    assert_eq!(
        actions,
        vec![
            ReconcileAction::OpenLink(LinkKind::Agent),
            ReconcileAction::StartCapture
        ]
    );
    let _server = h.agent_servers.recv().await.unwrap();
    assert!(h.session.is_capturing());

    // Only the link target changes; the close hook still stops capture.
    h.session.apply(connected(false, false).with_capture(true)).await;

    let track = h.log.position("track_stopped").unwrap();
    let transport = h.log.position("agent_transport_closed").unwrap();
    assert!(track < transport, "log: {:?}", h.log.entries());
    assert_eq!(h.device.live_tracks(), 0);
    assert_eq!(h.log.count("track_stopped"), 1);
}

#[tokio::test]
async fn test_remote_close_stops_capture() {
    let mut h = harness(false);
    let (callback, states) = recorder::<ConnectionStateChange>();
    h.session.on_connection_state(callback);

    h.session
        .apply(connected(true, false).with_capture(true))
        .await;
    let server = h.agent_servers.recv().await.unwrap();

    server.hang_up();
    eventually(|| !h.session.is_capturing()).await;
    eventually(|| h.session.link_state(LinkKind::Agent) == LinkState::Closed).await;

    assert_eq!(h.device.live_tracks(), 0);
    let track = h.log.position("track_stopped").unwrap();
    let transport = h.log.position("agent_transport_closed").unwrap();
    assert!(track < transport);

    eventually(|| {
        states
            .lock()
            .iter()
            .any(|change| change.state == LinkState::Closed)
    })
    .await;
}

#[tokio::test]
async fn test_transport_error_reports_and_stops_capture() {
    let mut h = harness(false);
    let (callback, errors) = recorder::<SessionError>();
    h.session.on_error(callback);
    let (callback, states) = recorder::<ConnectionStateChange>();
    h.session.on_connection_state(callback);

    h.session
        .apply(connected(true, false).with_capture(true))
        .await;
    let server = h.agent_servers.recv().await.unwrap();

    server.fail("connection reset");
    eventually(|| !errors.lock().is_empty()).await;
    eventually(|| {
        states
            .lock()
            .iter()
            .any(|change| change.state == LinkState::Closed)
    })
    .await;

    assert!(!h.session.is_capturing());
    assert_eq!(h.session.link_state(LinkKind::Agent), LinkState::Closed);
    {
        let errors = errors.lock();
        assert_eq!(errors[0].service, ServiceKind::Agent);
        assert_eq!(errors[0].code, ErrorCode::ConnectionLost);
    }

    let states = states.lock();
    assert!(states.iter().all(|change| change.state != LinkState::Errored));
    let closed = states
        .iter()
        .find(|change| change.state == LinkState::Closed)
        .unwrap();
    assert!(matches!(
        closed.reason,
        Some(CloseReason::TransportError(_))
    ));
}

#[tokio::test]
async fn test_close_while_connecting_stops_capture() {
    let mut h = harness(true);

    h.session
        .apply(connected(false, true).with_capture(true))
        .await;
    let _transcription = h.transcription_servers.recv().await.unwrap();
    assert!(h.session.is_capturing());

    h.agent.hang_next();
    let session = Arc::new(h.session);
    let opener = session.clone();
    let open = tokio::spawn(async move { opener.connect(LinkKind::Agent).await });
    eventually(|| session.link_state(LinkKind::Agent) == LinkState::Connecting).await;

    session.disconnect(LinkKind::Agent).await.unwrap();
    assert!(open.await.unwrap().is_ok());

    assert_eq!(session.link_state(LinkKind::Agent), LinkState::Closed);
    assert!(!session.is_capturing());
    assert_eq!(h.device.live_tracks(), 0);
}

#[tokio::test]
async fn test_connect_failure_stops_capture() {
    let mut h = harness(true);

    h.session
        .apply(connected(false, true).with_capture(true))
        .await;
    let _transcription = h.transcription_servers.recv().await.unwrap();
    assert!(h.session.is_capturing());

    h.agent.refuse_next();
    let result = h.session.connect(LinkKind::Agent).await;

    assert_eq!(result.unwrap_err().code, ErrorCode::OpenFailed);
    assert_eq!(h.session.link_state(LinkKind::Agent), LinkState::Closed);
    assert!(!h.session.is_capturing());
    assert_eq!(h.device.live_tracks(), 0);
}

#[tokio::test]
async fn test_captured_audio_forwarded_to_open_links() {
    let mut h = harness(true);

    h.session
        .apply(connected(true, true).with_capture(true))
        .await;
    let mut agent = h.agent_servers.recv().await.unwrap();
    let mut transcription = h.transcription_servers.recv().await.unwrap();
    expect_settings(&mut agent).await;

    h.device.push_frame(Bytes::from_static(&[1, 2, 3])).await;

    assert_eq!(
        agent.next_frame().await,
        Some(Frame::Binary(Bytes::from_static(&[1, 2, 3])))
    );
    assert_eq!(
        transcription.next_frame().await,
        Some(Frame::Binary(Bytes::from_static(&[1, 2, 3])))
    );
}

#[tokio::test]
async fn test_agent_audio_enqueued_for_playback() {
    let mut h = harness(false);

    h.session.apply(connected(true, false)).await;
    let mut server = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut server).await;

    server.send_frame(Frame::Binary(Bytes::from_static(&[0, 1, 0, 1])));
    let playback = h.playback.clone();
    eventually(move || playback.chunks.lock().len() == 1).await;
}

#[tokio::test]
async fn test_user_started_speaking_aborts_playback() {
    let mut h = harness(false);
    let (callback, speech) = recorder::<SpeechNotification>();
    h.session.on_speech(callback);

    h.session.apply(connected(true, false)).await;
    let mut server = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut server).await;

    server.send_json(json!({"type": "UserStartedSpeaking"}));
    eventually(|| speech.lock().len() == 1).await;

    assert_eq!(h.playback.aborts.load(Ordering::SeqCst), 1);
    assert!(h.session.speech_state().is_user_speaking);
}

#[tokio::test]
async fn test_capture_start_failure_reported() {
    let h = harness(false);
    let (callback, errors) = recorder::<SessionError>();
    h.session.on_error(callback);
    h.device.fail_next();

    h.session
        .apply(SessionSnapshot::default().with_capture(true))
        .await;

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].service, ServiceKind::Audio);
    assert_eq!(errors[0].code, ErrorCode::CaptureStartFailed);
    assert_eq!(h.session.link_state(LinkKind::Agent), LinkState::Idle);
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_same_snapshot_twice_is_idempotent() {
    let mut h = harness(false);
    let snapshot = connected(true, false)
        .with_capture(true)
        .with_user_message(Some("hello"));

    assert_eq!(h.session.apply(snapshot.clone()).await.len(), 3);
    assert!(h.session.apply(snapshot).await.is_empty());

    let mut server = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut server).await;
    let injected = server.next_json().await.unwrap();
    assert_eq!(injected["type"], "InjectUserMessage");
    assert_eq!(injected["content"], "hello");

    assert!(server.quiet_for(Duration::from_millis(100)).await);
    assert_eq!(h.agent.connects.load(Ordering::SeqCst), 1);
    assert_eq!(h.device.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_initial_snapshot_is_not_acted_on() {
    let log = EventLog::default();
    let (agent, _servers) = MockConnector::new("agent", log.clone());
    let device = MockCaptureDevice::new(log);
    let initial = connected(true, false).with_capture(true);

    let session = AgentSession::builder(test_config(false))
        .connector(agent.clone())
        .capture_device(device.clone())
        .playback(MockPlayback::new())
        .initial_snapshot(initial.clone())
        .build()
        .unwrap();

    assert!(session.apply(initial).await.is_empty());
    assert_eq!(agent.connects.load(Ordering::SeqCst), 0);
    assert_eq!(device.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_user_message_cleared_sends_nothing() {
    let mut h = harness(false);
    let (callback, sent) = recorder::<String>();
    h.session.on_user_message_sent(callback);

    h.session.apply(connected(true, false)).await;
    let mut server = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut server).await;

    h.session
        .apply(connected(true, false).with_user_message(Some("first")))
        .await;
    h.session
        .apply(connected(true, false).with_user_message(None::<String>))
        .await;

    let injected = server.next_json().await.unwrap();
    assert_eq!(injected["content"], "first");
    assert!(server.quiet_for(Duration::from_millis(100)).await);
    assert_eq!(*sent.lock(), vec!["first".to_string()]);
}

#[tokio::test]
async fn test_interrupt_aborts_playback_and_notifies() {
    let h = harness(false);
    let (callback, interrupted) = recorder::<()>();
    h.session.on_interrupted(callback);

    let actions = h
        .session
        .apply(SessionSnapshot::default().with_interrupt(true))
        .await;
    assert_eq!(actions, vec![ReconcileAction::Interrupt]);
    assert_eq!(h.playback.aborts.load(Ordering::SeqCst), 1);
    assert_eq!(interrupted.lock().len(), 1);

    assert!(
        h.session
            .apply(SessionSnapshot::default().with_interrupt(false))
            .await
            .is_empty()
    );
    assert_eq!(h.playback.aborts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_open_failure_reported_with_action_code() {
    let h = harness(false);
    let (callback, errors) = recorder::<SessionError>();
    h.session.on_error(callback);
    h.agent.refuse_next();

    h.session.apply(connected(true, false)).await;

    eventually(|| {
        errors
            .lock()
            .iter()
            .any(|e| e.code == ErrorCode::OpenFailed)
    })
    .await;
    assert_eq!(h.session.link_state(LinkKind::Agent), LinkState::Closed);
}

#[tokio::test]
async fn test_user_message_without_agent_link_fails() {
    let h = harness(false);
    let (callback, errors) = recorder::<SessionError>();
    h.session.on_error(callback);

    h.session
        .apply(SessionSnapshot::default().with_user_message(Some("hello?")))
        .await;

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::UserMessageFailed);
}

#[tokio::test]
async fn test_transcription_without_url_is_configuration_error() {
    let h = harness(false);
    let (callback, errors) = recorder::<SessionError>();
    h.session.on_error(callback);

    h.session.apply(connected(false, true)).await;
    {
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].service, ServiceKind::Configuration);
        assert_eq!(errors[0].code, ErrorCode::InvalidConfiguration);
    }

    let direct = h.session.connect(LinkKind::Transcription).await;
    assert_eq!(direct.unwrap_err().code, ErrorCode::InvalidConfiguration);
    assert_eq!(h.agent.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disconnect_while_connecting_is_not_an_error() {
    let h = harness(false);
    let (callback, errors) = recorder::<SessionError>();
    h.session.on_error(callback);
    h.agent.hang_next();

    let session = Arc::new(h.session);
    let opener = session.clone();
    let open = tokio::spawn(async move { opener.connect(LinkKind::Agent).await });

    eventually(|| session.link_state(LinkKind::Agent) == LinkState::Connecting).await;
    session.disconnect(LinkKind::Agent).await.unwrap();

    assert!(open.await.unwrap().is_ok());
    assert_eq!(session.link_state(LinkKind::Agent), LinkState::Closed);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(errors.lock().is_empty());
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_transcripts_and_agent_activity_delivered() {
    let mut h = harness(true);
    let (transcript_cb, transcripts) = recorder::<TranscriptEvent>();
    let (activity_cb, activity) = recorder::<AgentActivity>();
    h.session.on_transcript(transcript_cb);
    h.session.on_agent_activity(activity_cb);

    h.session.apply(connected(true, true)).await;
    let mut agent = h.agent_servers.recv().await.unwrap();
    let transcription = h.transcription_servers.recv().await.unwrap();
    expect_settings(&mut agent).await;

    transcription.send_json(json!({
        "type": "Results",
        "is_final": true,
        "speech_final": true,
        "start": 0.0,
        "duration": 1.2,
        "channel": {"alternatives": [{"transcript": "hello there", "confidence": 0.98}]}
    }));
    agent.send_json(json!({"type": "AgentThinking", "content": "checking"}));
    agent.send_json(json!({"type": "AgentAudioDone"}));

    eventually(|| transcripts.lock().len() == 1 && activity.lock().len() == 2).await;
    assert_eq!(transcripts.lock()[0].transcript, "hello there");
    assert!(transcripts.lock()[0].is_final);
    assert_eq!(
        activity.lock()[0],
        AgentActivity::Thinking {
            content: Some("checking".to_string())
        }
    );
    assert_eq!(activity.lock()[1], AgentActivity::AudioDone);
}

#[tokio::test]
async fn test_server_error_message_reported() {
    let mut h = harness(false);
    let (callback, errors) = recorder::<SessionError>();
    h.session.on_error(callback);

    h.session.apply(connected(true, false)).await;
    let mut server = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut server).await;

    server.send_json(json!({"type": "Error", "description": "bad settings", "code": "INVALID"}));
    server.send_json(json!({"type": "InjectionRefused", "message": "agent is speaking"}));

    eventually(|| errors.lock().len() == 2).await;
    let errors = errors.lock();
    assert_eq!(errors[0].code, ErrorCode::ServerError);
    assert_eq!(errors[0].message, "bad settings (INVALID)");
    assert_eq!(errors[1].code, ErrorCode::InjectionRefused);
}

#[tokio::test]
async fn test_shutdown_leaves_no_live_tracks() {
    let mut h = harness(true);

    h.session
        .apply(connected(true, true).with_capture(true))
        .await;
    let _agent = h.agent_servers.recv().await.unwrap();
    let _transcription = h.transcription_servers.recv().await.unwrap();
    assert!(h.session.is_capturing());

    h.session.shutdown().await;

    assert!(!h.session.is_capturing());
    assert_eq!(h.device.live_tracks(), 0);
    assert_eq!(h.device.total_stops(), 1);
    assert_eq!(h.session.link_state(LinkKind::Agent), LinkState::Closed);
    assert_eq!(
        h.session.link_state(LinkKind::Transcription),
        LinkState::Closed
    );
}

#[tokio::test]
async fn test_dropped_session_closes_links() {
    let mut h = harness(false);

    h.session
        .apply(connected(true, false).with_capture(true))
        .await;
    let mut server = h.agent_servers.recv().await.unwrap();
    expect_settings(&mut server).await;

    drop(h.session);

    assert!(server.next_frame().await.is_none());
    assert_eq!(h.log.count("agent_transport_closed"), 1);
    assert_eq!(h.device.live_tracks(), 0);
}

#[tokio::test]
async fn test_transcription_close_requests_flush() {
    let mut h = harness(true);

    h.session.apply(connected(false, true)).await;
    let mut server = h.transcription_servers.recv().await.unwrap();

    h.session.apply(connected(false, false)).await;

    let value = server.next_json().await.unwrap();
    assert_eq!(value["type"], "CloseStream");
    assert!(server.next_frame().await.is_none());
    assert_eq!(
        h.session.link_state(LinkKind::Transcription),
        LinkState::Closed
    );
}

#[tokio::test]
async fn test_build_requires_devices() {
    let result = AgentSession::builder(test_config(false)).build();
    let err = result.err().unwrap();
    assert_eq!(err.code, ErrorCode::InvalidConfiguration);

    let result = AgentSession::builder(ClientConfig::new(""))
        .capture_device(MockCaptureDevice::new(EventLog::default()))
        .playback(MockPlayback::new())
        .build();
    assert_eq!(result.err().unwrap().service, ServiceKind::Configuration);
}
