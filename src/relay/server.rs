//! WebSocket relay server

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::trace::TraceLayer;

use super::protocol::{MessageType, WireMessage};
use super::session::{GroupRegistry, RelayMessage, Session, SessionControl};
use crate::config::RelayConfig;
use crate::error::{MarionetteError, ProtocolError, Result};

/// Close code for protocol violations (RFC 6455 policy violation)
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Longest close reason a control frame can carry
const MAX_CLOSE_REASON: usize = 123;

pub struct RelayServer {
    config: RelayConfig,
    registry: GroupRegistry,
}

impl RelayServer {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            config: config.clone(),
            registry: GroupRegistry::new(),
        }
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    /// Route path, always with a leading slash.
    pub fn route_path(&self) -> String {
        format!("/{}", self.config.path.trim_start_matches('/'))
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.route_path(), get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.registry.clone())
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        Ok(listener)
    }

    /// Serve on an already bound listener until shutdown is signalled.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let addr: SocketAddr = listener.local_addr()?;
        tracing::info!("Relay listening on ws://{}{}", addr, self.route_path());

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Relay shutting down");
            })
            .await
            .map_err(MarionetteError::from)
    }

    pub async fn serve(self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve_on(listener, shutdown).await
    }
}

async fn ws_handler(State(registry): State<GroupRegistry>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: GroupRegistry) {
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut pending) = mpsc::unbounded_channel::<RelayMessage>();

    let connection = registry.next_connection_id();
    tracing::debug!("Connection {} opened", connection);

    // Forwarded frames go out as a token/payload pair from this task only,
    // so pairs from different suppliers never interleave.
    let writer = tokio::spawn(async move {
        while let Some(message) = pending.recv().await {
            let sent = match message {
                RelayMessage::Data(frame) => {
                    let token = Message::Text(MessageType::Data.as_str().to_string());
                    match sender.send(token).await {
                        Ok(()) => sender.send(Message::Binary(frame)).await,
                        Err(e) => Err(e),
                    }
                }
                RelayMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: Cow::Owned(reason),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            };
            if sent.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(connection, outbox.clone());
    while let Some(Ok(message)) = receiver.next().await {
        let message = match message {
            Message::Text(text) => WireMessage::Text(text),
            Message::Binary(bytes) => WireMessage::Binary(bytes),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if let SessionControl::Close(e) = session.handle(&registry, message) {
            tracing::error!("Closing connection {}: {}", connection, e);
            let _ = outbox.send(close_message(&e));
            break;
        }
    }

    session.disconnect(&registry);
    drop(outbox);
    let _ = writer.await;
}

fn close_message(error: &ProtocolError) -> RelayMessage {
    let mut reason = error.to_string();
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    RelayMessage::Close {
        code: CLOSE_POLICY_VIOLATION,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::codec::FrameCodec;
    use crate::relay::protocol::{data_messages, init_messages, make_supplier_messages};
    use crate::tracking::{Landmark, LandmarkObservation, LandmarkSchema};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message as TMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type TestSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start() -> (String, GroupRegistry, broadcast::Sender<()>) {
        let config = RelayConfig {
            port: 0,
            ..RelayConfig::default()
        };
        let server = RelayServer::new(&config);
        let listener = server.bind().await.unwrap();
        let url = format!("ws://{}/multi-cam-pose", listener.local_addr().unwrap());
        let registry = server.registry().clone();
        let (tx, rx) = broadcast::channel(1);
        tokio::spawn(server.serve_on(listener, rx));
        (url, registry, tx)
    }

    async fn connect(url: &str) -> TestSocket {
        connect_async(url).await.unwrap().0
    }

    async fn send(socket: &mut TestSocket, messages: [WireMessage; 2]) {
        for message in messages {
            let message = match message {
                WireMessage::Text(text) => TMessage::Text(text),
                WireMessage::Binary(bytes) => TMessage::Binary(bytes),
            };
            socket.send(message).await.unwrap();
        }
    }

    async fn recv(socket: &mut TestSocket) -> TMessage {
        tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    async fn wait_until(registry: &GroupRegistry, client_id: &str, present: bool) {
        for _ in 0..200 {
            if registry.contains(client_id) == present {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("group {} never became present={}", client_id, present);
    }

    async fn expect_policy_close(socket: &mut TestSocket, reason: &str) {
        match recv(socket).await {
            TMessage::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Policy);
                assert!(frame.reason.contains(reason), "reason {:?}", frame.reason);
            }
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[test]
    fn test_route_path_normalized() {
        let config = RelayConfig::default();
        assert_eq!(RelayServer::new(&config).route_path(), "/multi-cam-pose");

        let config = RelayConfig {
            path: "/pose".to_string(),
            ..RelayConfig::default()
        };
        assert_eq!(RelayServer::new(&config).route_path(), "/pose");
    }

    #[test]
    fn test_close_reason_is_truncated() {
        let error = ProtocolError::UnknownLeader("é".repeat(100));
        let RelayMessage::Close { code, reason } = close_message(&error) else {
            panic!("expected close");
        };
        assert_eq!(code, CLOSE_POLICY_VIOLATION);
        assert!(reason.len() <= MAX_CLOSE_REASON);
        assert!(reason.starts_with("No group registered"));
    }

    #[tokio::test]
    async fn test_serve_rejects_plain_http_and_shuts_down() {
        let config = RelayConfig {
            port: 0,
            ..RelayConfig::default()
        };
        let server = RelayServer::new(&config);
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(server.serve_on(listener, rx));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /multi-cam-pose HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(!response.starts_with("HTTP/1.1 101"));
        assert!(!response.starts_with("HTTP/1.1 404"));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_relayed_frame_arrives_as_token_then_payload() {
        let (url, registry, _shutdown) = start().await;

        let mut leader = connect(&url).await;
        send(&mut leader, init_messages("front", LandmarkSchema::Coco).unwrap()).await;
        wait_until(&registry, "front", true).await;

        let mut supplier = connect(&url).await;
        send(&mut supplier, init_messages("side", LandmarkSchema::Coco).unwrap()).await;
        send(&mut supplier, make_supplier_messages("front")).await;
        wait_until(&registry, "side", false).await;

        let frame = FrameCodec::new("side", LandmarkSchema::Coco)
            .unwrap()
            .encode(&[LandmarkObservation::new(Landmark::Nose, 1.0, 2.0)])
            .unwrap();
        send(&mut supplier, data_messages(frame.clone())).await;
        send(&mut supplier, data_messages(frame.clone())).await;

        for _ in 0..2 {
            assert_eq!(recv(&mut leader).await, TMessage::Text("data".to_string()));
            assert_eq!(recv(&mut leader).await, TMessage::Binary(frame.clone()));
        }
    }

    #[tokio::test]
    async fn test_unknown_leader_closes_with_policy_code() {
        let (url, _registry, _shutdown) = start().await;

        let mut client = connect(&url).await;
        send(&mut client, init_messages("side", LandmarkSchema::Coco).unwrap()).await;
        send(&mut client, make_supplier_messages("nobody")).await;

        expect_policy_close(&mut client, "nobody").await;
    }

    #[tokio::test]
    async fn test_schema_mismatch_closes_with_policy_code() {
        let (url, registry, _shutdown) = start().await;

        let mut leader = connect(&url).await;
        send(&mut leader, init_messages("front", LandmarkSchema::BlazePose).unwrap()).await;
        wait_until(&registry, "front", true).await;

        let mut supplier = connect(&url).await;
        send(&mut supplier, init_messages("side", LandmarkSchema::Coco).unwrap()).await;
        send(&mut supplier, make_supplier_messages("front")).await;

        expect_policy_close(&mut supplier, "BlazePose").await;
        assert!(registry.contains("front"));
    }

    #[tokio::test]
    async fn test_unknown_token_keeps_connection_open() {
        let (url, registry, _shutdown) = start().await;

        let mut client = connect(&url).await;
        client.send(TMessage::Text("hello".to_string())).await.unwrap();
        send(&mut client, init_messages("late", LandmarkSchema::Coco).unwrap()).await;

        wait_until(&registry, "late", true).await;

        client.close(None).await.unwrap();
        wait_until(&registry, "late", false).await;
    }
}
