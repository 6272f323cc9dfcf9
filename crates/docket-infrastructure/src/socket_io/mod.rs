//! Socket.IO transport for the live notification server.
//!
//! Speaks Engine.IO v4 directly over a WebSocket, without the long-polling
//! upgrade dance. The user id travels in the handshake query and the path of
//! the endpoint URL names the Socket.IO namespace, so
//! `http://host:3001/chat` for user 7 dials
//! `ws://host:3001/socket.io/?EIO=4&transport=websocket&user_id=7` and joins `/chat`.

mod codec;

pub use codec::{Frame, Handshake, Packet};

use async_trait::async_trait;
use docket_core::event::RawEvent;
use docket_core::transport::{ConnectRequest, Connection, ConnectionParts, Connector};
use docket_core::{DocketError, Result};
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ENGINE_PATH: &str = "/socket.io/";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SendRequest = (String, oneshot::Sender<Result<()>>);

/// Builds the WebSocket handshake URL and the namespace for `request`.
pub fn handshake_url(request: &ConnectRequest) -> Result<(Url, String)> {
    let mut url = Url::parse(&request.url)
        .map_err(|e| DocketError::config(format!("invalid endpoint URL '{}': {}", request.url, e)))?;

    let namespace = match url.path().trim_end_matches('/') {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(DocketError::config(format!(
                "unsupported endpoint scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| DocketError::config(format!("cannot dial '{}' over {}", request.url, scheme)))?;
    url.set_path(ENGINE_PATH);
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket")
        .append_pair("user_id", &request.user_id);

    Ok((url, namespace))
}

/// Connects to a Socket.IO server.
#[derive(Debug, Clone, Default)]
pub struct SocketIoConnector;

impl SocketIoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<ConnectionParts> {
        let (url, namespace) = handshake_url(request)?;
        debug!("[SocketIo] Dialing {}", url);

        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(ws_error)?;
        let handshake = open_namespace(&mut ws, &namespace).await?;
        info!(
            "[SocketIo] Joined {} as {} (user {})",
            namespace, handshake.sid, request.user_id
        );

        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive(Driver {
            ws,
            namespace: namespace.clone(),
            outbound: outbound_rx,
            inbound: inbound_tx,
            connected: connected.clone(),
            shutdown: shutdown.clone(),
            liveness: handshake.liveness(),
        }));

        Ok(ConnectionParts {
            connection: Arc::new(SocketIoConnection {
                namespace,
                sid: handshake.sid,
                connected,
                outbound: outbound_tx,
                shutdown,
            }),
            inbound: inbound_rx,
        })
    }
}

/// Engine.IO open, then the namespace connect.
async fn open_namespace(ws: &mut WsStream, namespace: &str) -> Result<Handshake> {
    let handshake = match codec::decode(&next_text(ws).await?)? {
        Frame::Open(handshake) => handshake,
        other => {
            return Err(DocketError::transport(format!(
                "expected Engine.IO open, got {other:?}"
            )));
        }
    };

    send_text(ws, codec::encode_connect(namespace)).await?;
    loop {
        match codec::decode(&next_text(ws).await?)? {
            Frame::Ping => send_text(ws, codec::PONG.to_string()).await?,
            Frame::Message(Packet::Connect { namespace: joined }) if joined == namespace => {
                return Ok(handshake);
            }
            Frame::Message(Packet::ConnectError {
                namespace: refused,
                message,
            }) if refused == namespace => {
                return Err(DocketError::transport(format!(
                    "namespace {namespace} refused: {message}"
                )));
            }
            Frame::Close => {
                return Err(DocketError::transport("server closed during handshake"));
            }
            other => debug!("[SocketIo] Ignoring {:?} during handshake", other),
        }
    }
}

async fn next_text(ws: &mut WsStream) -> Result<String> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(DocketError::transport("connection closed during handshake"));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ws_error(e)),
        }
    }
}

async fn send_text(ws: &mut WsStream, text: String) -> Result<()> {
    ws.send(Message::Text(text)).await.map_err(ws_error)
}

fn ws_error(err: tokio_tungstenite::tungstenite::Error) -> DocketError {
    DocketError::transport(format!("websocket: {err}"))
}

struct Driver {
    ws: WsStream,
    namespace: String,
    outbound: mpsc::UnboundedReceiver<SendRequest>,
    inbound: mpsc::UnboundedSender<RawEvent>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    liveness: Duration,
}

/// Owns the socket: answers pings, forwards namespace events in order, writes
/// outbound packets. Exits on close, error, server silence or shutdown.
async fn drive(driver: Driver) {
    let Driver {
        mut ws,
        namespace,
        mut outbound,
        inbound,
        connected,
        shutdown,
        liveness,
    } = driver;
    let mut last_heard = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                let _ = send_text(&mut ws, codec::encode_disconnect(&namespace)).await;
                let _ = ws.close(None).await;
                break;
            }
            Some((text, reply)) = outbound.recv() => {
                let result = send_text(&mut ws, text).await;
                let failed = result.is_err();
                let _ = reply.send(result);
                if failed {
                    break;
                }
            }
            frame = ws.next() => {
                last_heard = Instant::now();
                match frame {
                    Some(Ok(Message::Text(text))) => match codec::decode(&text) {
                        Ok(Frame::Ping) => {
                            if send_text(&mut ws, codec::PONG.to_string()).await.is_err() {
                                break;
                            }
                        }
                        Ok(Frame::Message(Packet::Event { namespace: from, event })) if from == namespace => {
                            if inbound.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(Frame::Message(Packet::Disconnect { namespace: from })) if from == namespace => {
                            info!("[SocketIo] Server left {}", namespace);
                            break;
                        }
                        Ok(Frame::Close) => break,
                        Ok(other) => debug!("[SocketIo] Ignoring {:?}", other),
                        Err(e) => warn!("[SocketIo] Discarding frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("[SocketIo] Server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("[SocketIo] Read failed: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(last_heard + liveness) => {
                warn!("[SocketIo] Server silent for {:?}", liveness);
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
    debug!("[SocketIo] Connection on {} ended", namespace);
}

struct SocketIoConnection {
    namespace: String,
    sid: String,
    connected: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<SendRequest>,
    shutdown: CancellationToken,
}

#[async_trait]
impl Connection for SocketIoConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send(&self, event: RawEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(DocketError::NotConnected);
        }
        let text = codec::encode_event(&self.namespace, &event)?;
        let (reply, written) = oneshot::channel();
        self.outbound
            .send((text, reply))
            .map_err(|_| DocketError::NotConnected)?;
        written.await.map_err(|_| {
            DocketError::transport(format!("send of '{}' interrupted", event.name))
        })?
    }

    async fn close(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("[SocketIo] Closing {}", self.sid);
        }
        self.connected.store(false, Ordering::Release);
        self.shutdown.cancel();
    }
}

impl Drop for SocketIoConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    const OPEN: &str = r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

    type ServerWs = WebSocketStream<TcpStream>;

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/chat", listener.local_addr().unwrap());
        (listener, url)
    }

    /// Accepts one client, remembering the request URI.
    async fn accept(listener: &TcpListener, uri: Arc<Mutex<Option<String>>>) -> ServerWs {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_hdr_async(
            stream,
            move |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
                *uri.lock().unwrap() = Some(request.uri().to_string());
                Ok(response)
            },
        )
        .await
        .unwrap()
    }

    async fn recv_text(ws: &mut ServerWs) -> String {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return text,
                _ => continue,
            }
        }
    }

    async fn say(ws: &mut ServerWs, text: &str) {
        ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    fn request(url: &str) -> ConnectRequest {
        ConnectRequest {
            url: url.to_string(),
            user_id: "7".to_string(),
        }
    }

    #[test]
    fn test_handshake_url() {
        let (url, namespace) = handshake_url(&request("http://localhost:3001/chat")).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:3001/socket.io/?EIO=4&transport=websocket&user_id=7"
        );
        assert_eq!(namespace, "/chat");

        let (url, namespace) = handshake_url(&ConnectRequest {
            url: "https://api.example.com/".to_string(),
            user_id: "a b".to_string(),
        })
        .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.example.com/socket.io/?EIO=4&transport=websocket&user_id=a+b"
        );
        assert_eq!(namespace, "/");
    }

    #[test]
    fn test_handshake_url_rejects_bad_endpoints() {
        assert!(handshake_url(&request("not a url")).unwrap_err().is_config());
        assert!(handshake_url(&request("ftp://files.example.com/chat")).unwrap_err().is_config());
    }

    #[tokio::test]
    async fn test_events_pings_and_emits() {
        let (listener, url) = listen().await;
        let uri = Arc::new(Mutex::new(None));
        let seen_uri = uri.clone();
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener, seen_uri).await;
            say(&mut ws, OPEN).await;
            assert_eq!(recv_text(&mut ws).await, "40/chat,");
            say(&mut ws, r#"40/chat,{"sid":"sio-1"}"#).await;

            say(&mut ws, "2").await;
            assert_eq!(recv_text(&mut ws).await, "3");
            say(&mut ws, r#"42/chat,["email_count_update",{"unread_count":4}]"#).await;
            say(&mut ws, r#"42["elsewhere",{}]"#).await;

            let emitted = recv_text(&mut ws).await;
            let farewell = recv_text(&mut ws).await;
            (emitted, farewell)
        });

        let parts = SocketIoConnector::new().connect(&request(&url)).await.unwrap();
        let mut inbound = parts.inbound;
        assert!(parts.connection.is_connected());

        let event = inbound.recv().await.unwrap();
        assert_eq!(event, RawEvent::new("email_count_update", json!({ "unread_count": 4 })));

        parts
            .connection
            .send(RawEvent::new("request_email_count", json!({ "user_id": "7" })))
            .await
            .unwrap();
        parts.connection.close().await;

        let (emitted, farewell) = server.await.unwrap();
        assert_eq!(emitted, r#"42/chat,["request_email_count",{"user_id":"7"}]"#);
        assert_eq!(farewell, "41/chat,");
        assert!(!parts.connection.is_connected());
        // Events of other namespaces never reach the pipeline
        assert!(inbound.recv().await.is_none());

        let uri = uri.lock().unwrap().clone().unwrap();
        assert_eq!(uri, "/socket.io/?EIO=4&transport=websocket&user_id=7");
    }

    #[tokio::test]
    async fn test_refused_namespace() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener, Arc::new(Mutex::new(None))).await;
            say(&mut ws, OPEN).await;
            recv_text(&mut ws).await;
            say(&mut ws, r#"44/chat,{"message":"unknown user"}"#).await;
        });

        let err = SocketIoConnector::new()
            .connect(&request(&url))
            .await
            .err()
            .unwrap();
        assert!(err.is_transport());
        assert!(err.to_string().contains("unknown user"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_drop_ends_connection() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener, Arc::new(Mutex::new(None))).await;
            say(&mut ws, OPEN).await;
            recv_text(&mut ws).await;
            say(&mut ws, r#"40/chat,{"sid":"sio-1"}"#).await;
            ws.close(None).await.unwrap();
        });

        let parts = SocketIoConnector::new().connect(&request(&url)).await.unwrap();
        let mut inbound = parts.inbound;
        assert!(inbound.recv().await.is_none());
        assert!(!parts.connection.is_connected());

        let err = parts
            .connection
            .send(RawEvent::new("request_email_count", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, DocketError::NotConnected);
        server.await.unwrap();
    }
}
