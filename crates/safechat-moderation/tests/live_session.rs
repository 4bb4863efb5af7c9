use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use safechat_moderation::{
    CaptureEngine, CaptureError, CaptureEvent, CaptureProvider, CaptureSession, SessionConfig,
    SessionHandle, SessionNotice, SessionState, spawn_session,
};
use safechat_transport::TransportConfig;
use safechat_types::events::ModerationCommand;
use safechat_types::{StreamId, UserId};

const WAIT: Duration = Duration::from_secs(5);

struct ScriptEngine {
    events: mpsc::UnboundedSender<CaptureEvent>,
    starts: Arc<AtomicUsize>,
}

impl CaptureEngine for ScriptEngine {
    fn start(&mut self) -> Result<(), CaptureError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(CaptureEvent::Started);
        Ok(())
    }

    fn stop(&mut self) {
        let _ = self.events.send(CaptureEvent::Ended);
    }
}

#[derive(Default)]
struct ScriptProvider {
    feed: Mutex<Option<mpsc::UnboundedSender<CaptureEvent>>>,
    starts: Arc<AtomicUsize>,
    unavailable: bool,
}

impl ScriptProvider {
    fn say(&self, text: &str) {
        let feed = self.feed.lock().unwrap();
        feed.as_ref()
            .unwrap()
            .send(CaptureEvent::Result {
                transcript: text.into(),
                is_final: true,
            })
            .unwrap();
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl CaptureProvider for ScriptProvider {
    fn open(&self) -> Result<CaptureSession, CaptureError> {
        if self.unavailable {
            return Err(CaptureError::Unavailable("no recognizer".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock().unwrap() = Some(tx.clone());
        Ok(CaptureSession {
            engine: Box::new(ScriptEngine {
                events: tx,
                starts: self.starts.clone(),
            }),
            events: rx,
        })
    }
}

async fn listener() -> (TcpListener, TransportConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = TransportConfig {
        server_url: format!("ws://{}", listener.local_addr().unwrap()),
        reconnect_delay: Duration::from_millis(50),
    };
    (listener, config)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (tcp, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    tokio_tungstenite::accept_async(tcp).await.unwrap()
}

async fn send(server: &mut WebSocketStream<TcpStream>, json: &str) {
    server.send(Message::Text(json.into())).await.unwrap();
}

async fn notice_matching<F>(handle: &mut SessionHandle, pred: F) -> SessionNotice
where
    F: Fn(&SessionNotice) -> bool,
{
    timeout(WAIT, async {
        loop {
            let notice = handle.recv_notice().await.unwrap();
            if pred(&notice) {
                return notice;
            }
        }
    })
    .await
    .unwrap()
}

async fn wait_state(handle: &SessionHandle, state: SessionState) {
    let mut status = handle.watch_status();
    timeout(WAIT, status.wait_for(|s| s.state == state))
        .await
        .unwrap()
        .unwrap();
}

/// Block until the session has seen a server frame, so the socket is open.
async fn sync_open(server: &mut WebSocketStream<TcpStream>, handle: &mut SessionHandle) {
    send(server, r#"{"type":"speech_clean","transcript":"sync"}"#).await;
    notice_matching(handle, |n| matches!(n, SessionNotice::TranscriptClean(_))).await;
}

#[tokio::test]
async fn transcript_reaches_server_until_termination() {
    let (listener, config) = listener().await;
    let provider = ScriptProvider::default();
    let mut handle =
        spawn_session(&config, SessionConfig::default(), StreamId(4), UserId(8), &provider).unwrap();

    let mut server = accept(&listener).await;
    wait_state(&handle, SessionState::Listening).await;
    sync_open(&mut server, &mut handle).await;

    provider.say("hello moderators");
    let frame = timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame");
    };
    let ModerationCommand::SpeechTranscript {
        transcript,
        user_id,
        stream_id,
        ..
    } = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(transcript, "hello moderators");
    assert_eq!(user_id, UserId(8));
    assert_eq!(stream_id, StreamId(4));

    send(&mut server, r#"{"type":"stream_stopped","reason":"Too many violations"}"#).await;
    let notice = notice_matching(&mut handle, |n| matches!(n, SessionNotice::Terminated { .. })).await;
    assert_eq!(
        notice,
        SessionNotice::Terminated {
            reason: Some("Too many violations".into()),
        }
    );
    wait_state(&handle, SessionState::Stopped).await;

    // The session closes its socket and does not come back.
    timeout(WAIT, async { while handle.recv_notice().await.is_some() {} })
        .await
        .unwrap();
    assert!(timeout(Duration::from_millis(300), listener.accept()).await.is_err());
    assert_eq!(provider.starts(), 1);
}

#[tokio::test]
async fn server_timeout_mutes_then_resumes() {
    let (listener, config) = listener().await;
    let provider = ScriptProvider::default();
    let mut handle =
        spawn_session(&config, SessionConfig::default(), StreamId(4), UserId(8), &provider).unwrap();

    let mut server = accept(&listener).await;
    sync_open(&mut server, &mut handle).await;

    send(
        &mut server,
        r#"{"type":"speech_timeout","warning_number":2,"timeout_duration":1,"message":"muted"}"#,
    )
    .await;
    wait_state(&handle, SessionState::Muted).await;
    assert_eq!(handle.status().warning_count, 2);

    wait_state(&handle, SessionState::Listening).await;
    assert_eq!(provider.starts(), 2);

    // Late expiry from the server is a no-op.
    send(&mut server, r#"{"type":"timeout_expired","stream_id":"4","user_id":"8"}"#).await;
    sync_open(&mut server, &mut handle).await;
    assert_eq!(provider.starts(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn speaking_can_pause_without_ending_session() {
    let (listener, config) = listener().await;
    let provider = ScriptProvider::default();
    let handle =
        spawn_session(&config, SessionConfig::default(), StreamId(1), UserId(2), &provider).unwrap();
    let _server = accept(&listener).await;

    wait_state(&handle, SessionState::Listening).await;
    handle.stop_speaking();
    wait_state(&handle, SessionState::Idle).await;
    handle.start_speaking();
    wait_state(&handle, SessionState::Listening).await;

    assert_eq!(provider.starts(), 2);
    assert!(!handle.is_finished());

    handle.stop();
    handle.stop();
    handle.shutdown().await;
}

#[tokio::test]
async fn unavailable_capture_opens_nothing() {
    let (listener, config) = listener().await;
    let provider = ScriptProvider {
        unavailable: true,
        ..ScriptProvider::default()
    };

    let err = spawn_session(&config, SessionConfig::default(), StreamId(1), UserId(2), &provider)
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::Unavailable(_)));
    assert!(timeout(Duration::from_millis(200), listener.accept()).await.is_err());
}
