use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use safechat_transport::{
    ChannelEvent, ChatTransport, ConnectionStatus, SocketEvent, TransportConfig, TransportError,
};
use safechat_types::events::{ChatCommand, ChatEvent};
use safechat_types::{ChannelId, StreamId, UserId};

const WAIT: Duration = Duration::from_secs(5);

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (tcp, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    tokio_tungstenite::accept_async(tcp).await.unwrap()
}

fn transport(url: String) -> ChatTransport {
    ChatTransport::new(TransportConfig {
        server_url: url,
        reconnect_delay: Duration::from_millis(50),
    })
}

async fn next(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

async fn wait_open(handle: &safechat_transport::ChannelHandle) {
    let mut status = handle.watch_status();
    timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Connected))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn delivers_history_then_relays_send() {
    let (listener, url) = listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = transport(url).connect(ChannelId::Global, tx);

    let mut server = accept(&listener).await;
    server
        .send(Message::Text(r#"{"type":"message_history","messages":[]}"#.into()))
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await.event, SocketEvent::Opened);
    let history = next(&mut rx).await;
    assert_eq!(history.channel, ChannelId::Global);
    assert_eq!(
        history.event,
        SocketEvent::Event(ChatEvent::MessageHistory { messages: vec![] })
    );

    wait_open(&handle).await;
    handle.send(UserId(3), "alice", "hello").unwrap();

    let frame = timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame");
    };
    let cmd: ChatCommand = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(
        cmd,
        ChatCommand::ChatMessage {
            username: "alice".into(),
            user_id: UserId(3),
            message: "hello".into(),
        }
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn send_without_socket_fails_fast() {
    // Nothing listens on this port once the listener is dropped.
    let (listener, url) = listener().await;
    drop(listener);

    let (tx, _rx) = mpsc::unbounded_channel();
    let handle = transport(url).connect(ChannelId::Global, tx);

    let err = handle.send(UserId(1), "bob", "anyone?").unwrap_err();
    assert!(matches!(err, TransportError::NotConnected));

    handle.shutdown().await;
}

#[tokio::test]
async fn reconnects_after_server_close() {
    let (listener, url) = listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let stream = ChannelId::Stream(StreamId(9));
    let handle = transport(url).connect(stream, tx);

    let mut first = accept(&listener).await;
    assert_eq!(next(&mut rx).await.event, SocketEvent::Opened);
    first.close(None).await.unwrap();
    assert_eq!(next(&mut rx).await.event, SocketEvent::Closed);

    let _second = accept(&listener).await;
    let reopened = next(&mut rx).await;
    assert_eq!(reopened.channel, stream);
    assert_eq!(reopened.event, SocketEvent::Opened);

    handle.shutdown().await;
}

#[tokio::test]
async fn dispose_stops_reconnecting() {
    let (listener, url) = listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = transport(url).connect(ChannelId::Global, tx);

    let _server = accept(&listener).await;
    assert_eq!(next(&mut rx).await.event, SocketEvent::Opened);

    handle.dispose();
    handle.dispose();
    assert_eq!(next(&mut rx).await.event, SocketEvent::Closed);

    let mut status = handle.watch_status();
    timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Closed))
        .await
        .unwrap()
        .unwrap();

    // No further connection attempt arrives.
    assert!(timeout(Duration::from_millis(300), listener.accept()).await.is_err());
    handle.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let (listener, url) = listener().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = transport(url).connect(ChannelId::Global, tx);

    let mut server = accept(&listener).await;
    server.send(Message::Text("not json".into())).await.unwrap();
    server
        .send(Message::Text(r#"{"type":"stream_update","stream":{}}"#.into()))
        .await
        .unwrap();
    server
        .send(Message::Text(
            r#"{"type":"restriction","message":"You have been restricted"}"#.into(),
        ))
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await.event, SocketEvent::Opened);
    assert_eq!(
        next(&mut rx).await.event,
        SocketEvent::Event(ChatEvent::Restriction {
            message: "You have been restricted".into(),
            user_id: None,
        })
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn stream_teardown_leaves_global_open() {
    let (listener, url) = listener().await;
    let chat = transport(url);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let global = chat.connect(ChannelId::Global, tx.clone());
    let _global_server = accept(&listener).await;
    wait_open(&global).await;

    let stream = chat.connect(ChannelId::Stream(StreamId(2)), tx);
    let _stream_server = accept(&listener).await;
    wait_open(&stream).await;

    stream.shutdown().await;
    assert!(global.is_open());

    // Drain: global saw only its own open.
    let mut global_events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.channel == ChannelId::Global {
            global_events.push(event.event);
        }
    }
    assert_eq!(global_events, vec![SocketEvent::Opened]);

    global.shutdown().await;
}
