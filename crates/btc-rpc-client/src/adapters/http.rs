//! HTTP POST transport (bitcoind's native RPC server).
//!
//! Each `send` is one request/response exchange. The response body is
//! queued and handed to the dispatcher through `receive`, so correlation
//! works the same as on a streaming transport.

use crate::domain::config::AuthConfig;
use crate::domain::error::TransportError;
use crate::ports::{Transport, TransportKind};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

/// Longest error body kept in a [`TransportError::Http`]
const MAX_ERROR_BODY: usize = 256;

pub struct HttpTransport {
    url: String,
    auth: AuthConfig,
    connect_timeout: Duration,
    client: OnceLock<reqwest::Client>,
    replies_tx: mpsc::UnboundedSender<Vec<u8>>,
    replies_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: watch::Sender<bool>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, auth: AuthConfig, connect_timeout: Duration) -> Self {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            url: url.into(),
            auth,
            connect_timeout,
            client: OnceLock::new(),
            replies_tx,
            replies_rx: Mutex::new(replies_rx),
            closed,
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.client.get().is_some() {
            return Ok(());
        }
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let _ = self.client.set(client);
        debug!(url = %self.url, "HTTP transport ready");
        Ok(())
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let client = self.client.get().ok_or(TransportError::NotConnected)?;

        let request = client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        let request = match &self.auth {
            AuthConfig::None => request,
            AuthConfig::Basic { username, password } => request.basic_auth(username, Some(password)),
            AuthConfig::Token { token } => request.bearer_auth(token),
        };

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Receive(e.to_string()))?;

        // bitcoind reports RPC errors as HTTP 500 with a JSON envelope
        if status.is_success() || is_json_object(&body) {
            return self
                .replies_tx
                .send(body.to_vec())
                .map_err(|_| TransportError::Closed);
        }

        let mut text = String::from_utf8_lossy(&body).into_owned();
        if text.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        Err(TransportError::Http {
            status: status.as_u16(),
            body: text,
        })
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut replies = self.replies_rx.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Ok(None),
            reply = replies.recv() => Ok(reply),
        }
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }

    fn kind(&self) -> TransportKind {
        TransportKind::RequestResponse
    }
}

fn is_json_object(body: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(body).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// One-shot HTTP server; yields the raw request it received
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });
        (format!("http://{addr}/"), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn test_reply_is_queued_for_receive() {
        let (url, server) = serve_once("200 OK", r#"{"result":12345,"error":null,"id":1}"#).await;
        let transport = HttpTransport::new(url, AuthConfig::basic("user", "pass"), Duration::from_secs(5));
        transport.connect().await.unwrap();

        transport
            .send(br#"{"jsonrpc":"1.0","id":1,"method":"getblockcount","params":[]}"#.to_vec())
            .await
            .unwrap();

        let reply: Value =
            serde_json::from_slice(&transport.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["result"], 12345);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST / HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: basic "));
        assert!(request.contains("dXNlcjpwYXNz"));
        assert!(request.contains(r#""method":"getblockcount""#));
    }

    #[tokio::test]
    async fn test_json_error_status_is_a_reply() {
        let (url, _server) = serve_once(
            "500 Internal Server Error",
            r#"{"result":null,"error":{"code":-8,"message":"Block height out of range"},"id":2}"#,
        )
        .await;
        let transport = HttpTransport::new(url, AuthConfig::None, Duration::from_secs(5));
        transport.connect().await.unwrap();

        transport.send(b"{}".to_vec()).await.unwrap();
        let reply: Value =
            serde_json::from_slice(&transport.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["error"]["code"], -8);
    }

    #[tokio::test]
    async fn test_plain_error_status_fails_send() {
        let (url, _server) = serve_once("503 Service Unavailable", "Work queue depth exceeded").await;
        let transport = HttpTransport::new(url, AuthConfig::None, Duration::from_secs(5));
        transport.connect().await.unwrap();

        let err = transport.send(b"{}".to_vec()).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Http {
                status: 503,
                body: "Work queue depth exceeded".into()
            }
        );
        assert!(!err.is_connection_loss());
    }

    #[tokio::test]
    async fn test_lifecycle_guards() {
        let transport = HttpTransport::new("http://127.0.0.1:1/", AuthConfig::None, Duration::from_secs(1));
        assert_eq!(
            transport.send(b"{}".to_vec()).await,
            Err(TransportError::NotConnected)
        );
        assert_eq!(transport.kind(), TransportKind::RequestResponse);

        transport.connect().await.unwrap();
        transport.close().await;
        assert_eq!(transport.receive().await, Ok(None));
        assert_eq!(
            transport.send(b"{}".to_vec()).await,
            Err(TransportError::Closed)
        );
    }
}
