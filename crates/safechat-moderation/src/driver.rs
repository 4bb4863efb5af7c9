use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use safechat_transport::{SocketEvent, SocketHandle, SocketLink, TransportConfig, spawn_socket};
use safechat_types::endpoints::speech_url;
use safechat_types::events::ModerationEvent;
use safechat_types::{StreamId, UserId};

use crate::capture::{CaptureEngine, CaptureError, CaptureEvent, CaptureProvider};
use crate::session::{ModerationSession, SessionConfig, SessionNotice, SessionState, SessionStatus};

type LiveSession = ModerationSession<Box<dyn CaptureEngine>, SocketLink>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Speak,
    Silence,
}

/// Handle to a running moderation session. Dropping it ends the session.
pub struct SessionHandle {
    stream_id: StreamId,
    user_id: UserId,
    status: watch::Receiver<SessionStatus>,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    control: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Open the moderation socket for (stream, user), create a capture engine and
/// start listening.
///
/// Fails without opening anything if the provider has no capture engine.
pub fn spawn_session(
    transport: &TransportConfig,
    config: SessionConfig,
    stream_id: StreamId,
    user_id: UserId,
    provider: &dyn CaptureProvider,
) -> Result<SessionHandle, CaptureError> {
    let capture = provider.open()?;

    let (socket_tx, socket_rx) = mpsc::unbounded_channel();
    let url = speech_url(&transport.server_url, stream_id, user_id);
    let socket = spawn_socket::<ModerationEvent, _>(url, transport, move |event| {
        let _ = socket_tx.send(event);
    });

    let session = ModerationSession::new(stream_id, user_id, capture.engine, socket.link(), config);
    let (status_tx, status) = watch::channel(session.status());
    let (notice_tx, notices) = mpsc::unbounded_channel();
    let (control, control_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run_session(Driver {
        session,
        socket,
        socket_rx,
        capture_rx: capture.events,
        control_rx,
        status_tx,
        notice_tx,
        cancel: cancel.clone(),
    }));

    Ok(SessionHandle {
        stream_id,
        user_id,
        status,
        notices,
        control,
        cancel,
        task: Some(task),
    })
}

impl SessionHandle {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Next notice from the session; `None` once it has finished.
    pub async fn recv_notice(&mut self) -> Option<SessionNotice> {
        self.notices.recv().await
    }

    /// Resume listening after `stop_speaking`.
    pub fn start_speaking(&self) {
        let _ = self.control.send(Control::Speak);
    }

    /// Stop capture but keep the moderation socket open.
    pub fn stop_speaking(&self) {
        let _ = self.control.send(Control::Silence);
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// End the session and close its socket. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!("stopping speech session {}/{}", self.stream_id, self.user_id);
            self.cancel.cancel();
        }
    }

    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Driver {
    session: LiveSession,
    socket: SocketHandle,
    socket_rx: mpsc::UnboundedReceiver<SocketEvent<ModerationEvent>>,
    capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    status_tx: watch::Sender<SessionStatus>,
    notice_tx: mpsc::UnboundedSender<SessionNotice>,
    cancel: CancellationToken,
}

impl Driver {
    fn publish(&mut self) {
        let status = self.session.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        for notice in self.session.drain_notices() {
            let _ = self.notice_tx.send(notice);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

async fn run_session(mut d: Driver) {
    d.session.begin(Instant::now());
    d.publish();

    let mut capture_open = true;

    loop {
        let deadline = d.session.next_deadline();

        tokio::select! {
            _ = d.cancel.cancelled() => {
                d.session.end();
                d.publish();
                break;
            }

            event = d.socket_rx.recv() => {
                match event {
                    Some(SocketEvent::Opened) => d.session.on_link_open(Instant::now()),
                    Some(SocketEvent::Closed) => d.session.on_link_closed(),
                    Some(SocketEvent::Event(event)) => d.session.on_moderation(event, Instant::now()),
                    None => {
                        warn!("moderation socket task ended");
                        d.session.end();
                        d.publish();
                        break;
                    }
                }
            }

            event = d.capture_rx.recv(), if capture_open => {
                match event {
                    Some(event) => d.session.on_capture(event, Instant::now()),
                    None => {
                        warn!("capture engine event stream closed");
                        capture_open = false;
                    }
                }
            }

            Some(control) = d.control_rx.recv() => {
                match control {
                    Control::Speak => d.session.begin(Instant::now()),
                    Control::Silence => d.session.end(),
                }
            }

            _ = sleep_until(deadline) => d.session.on_timer(Instant::now()),
        }

        d.publish();

        if d.session.state() == SessionState::Stopped {
            info!("speech session {} stopped by server", d.socket.url());
            break;
        }
    }

    d.socket.shutdown().await;
}
