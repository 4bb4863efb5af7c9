use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Fixed delay between an unexpected close and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8000";

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket base URL, e.g. `ws://127.0.0.1:8000`.
    pub server_url: String,
    pub reconnect_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    /// Disposed; no further reconnects.
    Closed,
}

/// What a socket reports to its handler, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent<E> {
    Opened,
    Closed,
    Event(E),
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Shared {
    url: String,
    /// Present only while a socket is open.
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
    status: watch::Sender<ConnectionStatus>,
    cancel: CancellationToken,
}

impl Shared {
    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<String>>) {
        *self.outbound.write().unwrap_or_else(PoisonError::into_inner) = tx;
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    fn send_json<T: Serialize>(&self, payload: &T) -> Result<(), TransportError> {
        let guard = self.outbound.read().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(TransportError::NotConnected)?;
        let text = serde_json::to_string(payload)?;
        tx.send(text).map_err(|_| TransportError::NotConnected)
    }

    fn is_open(&self) -> bool {
        self.outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Owning handle for one reconnecting socket. Dropping it disposes the socket.
pub struct SocketHandle {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

/// Non-owning send side of a socket; cannot dispose it.
#[derive(Clone)]
pub struct SocketLink {
    shared: Arc<Shared>,
}

impl SocketHandle {
    pub fn link(&self) -> SocketLink {
        SocketLink {
            shared: self.shared.clone(),
        }
    }

    pub fn send_json<T: Serialize>(&self, payload: &T) -> Result<(), TransportError> {
        self.shared.send_json(payload)
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Cancel any pending reconnect and close the socket. Idempotent.
    pub fn dispose(&self) {
        if !self.shared.cancel.is_cancelled() {
            debug!("disposing socket {}", self.shared.url);
            self.shared.cancel.cancel();
        }
    }

    /// Dispose and wait for the connection task to finish.
    pub async fn shutdown(mut self) {
        self.dispose();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl SocketLink {
    pub fn send_json<T: Serialize>(&self, payload: &T) -> Result<(), TransportError> {
        self.shared.send_json(payload)
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }
}

/// Open a socket to `url` that reconnects after every unexpected close until
/// disposed. Decoded frames and open/close transitions are passed to
/// `on_event` in arrival order; frames that fail to decode are logged and
/// skipped.
pub fn spawn_socket<E, F>(url: String, config: &TransportConfig, on_event: F) -> SocketHandle
where
    E: DeserializeOwned + Send + 'static,
    F: FnMut(SocketEvent<E>) + Send + 'static,
{
    let (status, _) = watch::channel(ConnectionStatus::Connecting);
    let shared = Arc::new(Shared {
        url,
        outbound: RwLock::new(None),
        status,
        cancel: CancellationToken::new(),
    });

    let task = tokio::spawn(run_socket(shared.clone(), config.reconnect_delay, on_event));

    SocketHandle {
        shared,
        task: Some(task),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Disposed,
    Dropped,
}

async fn run_socket<E, F>(shared: Arc<Shared>, reconnect_delay: Duration, mut on_event: F)
where
    E: DeserializeOwned,
    F: FnMut(SocketEvent<E>),
{
    loop {
        shared.set_status(ConnectionStatus::Connecting);

        let attempt = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            result = tokio_tungstenite::connect_async(shared.url.as_str()) => result,
        };

        match attempt {
            Ok((ws, _)) => {
                info!("connected to {}", shared.url);
                let (tx, rx) = mpsc::unbounded_channel();
                shared.set_outbound(Some(tx));
                shared.set_status(ConnectionStatus::Connected);
                on_event(SocketEvent::Opened);

                let exit = pump(ws, rx, &shared, &mut on_event).await;

                shared.set_outbound(None);
                shared.set_status(ConnectionStatus::Disconnected);
                on_event(SocketEvent::Closed);
                info!("disconnected from {}", shared.url);

                if exit == Exit::Disposed {
                    break;
                }
            }
            Err(e) => {
                warn!("connect to {} failed: {}", shared.url, e);
                shared.set_status(ConnectionStatus::Disconnected);
            }
        }

        // Exactly one attempt per close, after a fixed delay.
        debug!("reconnecting to {} in {:?}", shared.url, reconnect_delay);
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    shared.set_outbound(None);
    shared.set_status(ConnectionStatus::Closed);
}

/// Relay frames both ways until the socket drops or the handle is disposed.
async fn pump<E, F>(
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shared: &Shared,
    on_event: &mut F,
) -> Exit
where
    E: DeserializeOwned,
    F: FnMut(SocketEvent<E>),
{
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Exit::Disposed;
            }
            text = outbound.recv() => {
                let Some(text) = text else {
                    return Exit::Dropped;
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!("write to {} failed: {}", shared.url, e);
                    return Exit::Dropped;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<E>(text.as_str()) {
                            Ok(event) => on_event(SocketEvent::Event(event)),
                            Err(e) => {
                                let raw: String = text.chars().take(200).collect();
                                warn!("{} bad event: {} -- raw: {}", shared.url, e, raw);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Exit::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("read from {} failed: {}", shared.url, e);
                        return Exit::Dropped;
                    }
                }
            }
        }
    }
}
