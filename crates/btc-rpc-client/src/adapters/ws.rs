//! WebSocket transport (btcd `/ws`, or any bitcoind-compatible proxy).
//!
//! One socket carries every call in both directions; replies arrive in
//! any order and interleave with notifications.

use crate::adapters::auth_header_value;
use crate::domain::config::AuthConfig;
use crate::domain::error::TransportError;
use crate::ports::Transport;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport {
    url: String,
    auth: AuthConfig,
    writer: Mutex<Option<SplitSink<WsStream, Message>>>,
    reader: Mutex<Option<SplitStream<WsStream>>>,
    closed: watch::Sender<bool>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, auth: AuthConfig) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            url: url.into(),
            auth,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            closed,
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn send_control(&self, message: Message) {
        if let Some(sink) = self.writer.lock().await.as_mut() {
            if let Err(e) = sink.send(message).await {
                debug!(error = %e, "Failed to send control frame");
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if let Some(value) = auth_header_value(&self.auth) {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| TransportError::Connect(format!("invalid auth header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "WebSocket connected");

        let (sink, stream) = stream.split();
        *self.writer.lock().await = Some(sink);
        *self.reader.lock().await = Some(stream);
        Ok(())
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let text = String::from_utf8(payload).map_err(|e| TransportError::Send(e.to_string()))?;

        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    TransportError::Closed
                }
                other => TransportError::Send(other.to_string()),
            })
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut reader = self.reader.lock().await;
        let stream = reader.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            let next = tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => return Ok(None),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Ping(data))) => self.send_control(Message::Pong(data)).await,
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket closed by node");
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read failed");
                    return Err(TransportError::Receive(e.to_string()));
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[tokio::test]
    async fn test_authenticated_exchange_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (auth_tx, auth_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_hdr_async(
                socket,
                |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let auth = req
                        .headers()
                        .get(AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let _ = auth_tx.send(auth);
                    Ok(resp)
                },
            )
            .await
            .unwrap();

            let Some(Ok(Message::Text(text))) = ws.next().await else {
                panic!("expected a text frame");
            };
            let request: Value = serde_json::from_str(text.as_str()).unwrap();
            let reply = json!({"result": 12345, "error": null, "id": request["id"]});
            ws.send(Message::Text(reply.to_string().into())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let transport = WsTransport::new(format!("ws://{addr}"), AuthConfig::basic("user", "pass"));
        transport.connect().await.unwrap();
        assert_eq!(
            auth_rx.await.unwrap().as_deref(),
            Some("Basic dXNlcjpwYXNz")
        );

        transport
            .send(br#"{"jsonrpc":"1.0","id":1,"method":"getblockcount","params":[]}"#.to_vec())
            .await
            .unwrap();
        let reply: Value =
            serde_json::from_slice(&transport.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["result"], 12345);
        assert_eq!(reply["id"], 1);

        assert_eq!(transport.receive().await, Ok(None));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let transport = WsTransport::new("ws://127.0.0.1:1", AuthConfig::None);
        assert_eq!(
            transport.send(b"{}".to_vec()).await,
            Err(TransportError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let transport = WsTransport::new("ws://127.0.0.1:1", AuthConfig::None);
        transport.close().await;
        assert_eq!(
            transport.send(b"{}".to_vec()).await,
            Err(TransportError::Closed)
        );
    }
}
