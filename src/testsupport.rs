//! One-connection-at-a-time HTTP responder for exercising the gateway in
//! tests without a real backend. Each exchange answers exactly one request
//! and the raw request text is captured for assertions.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::auth::session::epoch_now;
use crate::auth::{MemorySessionStore, Session, SessionStore as _};
use crate::config::Config;
use crate::Client;

/// Client over an in-memory store against the given backend
pub(crate) fn client_against(base_url: &str) -> (Client, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let config = Config::new(base_url, "anon-key");
    let client = Client::with_store(config, store.clone()).expect("client");
    (client, store)
}

/// Seed a far-from-expiry session so authenticated calls skip the refresh
pub(crate) fn seed_session(store: &MemorySessionStore) {
    let session: Session = serde_json::from_value(serde_json::json!({
        "access_token": "a1",
        "refresh_token": "r1",
        "token_type": "bearer",
        "expires_at": epoch_now() + 3600,
        "user": {"id": "u1", "email": "carer@example.com"}
    }))
    .expect("seed session");
    store.save(&session).expect("seed save");
}

pub(crate) struct Exchange {
    pub status: u16,
    pub body: String,
}

impl Exchange {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }
}

/// Bind a local listener, serve the given exchanges in order, and return
/// the base URL plus a handle resolving to the captured raw requests.
pub(crate) async fn serve(exchanges: Vec<Exchange>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let base_url = format!("http://{}", listener.local_addr().expect("local addr"));

    let handle = tokio::spawn(async move {
        let mut captured = Vec::new();
        for exchange in exchanges {
            let (mut stream, _) = listener.accept().await.expect("accept");
            captured.push(read_request(&mut stream).await);
            let response = format!(
                "HTTP/1.1 {} Mock\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                exchange.status,
                exchange.body.len(),
                exchange.body,
            );
            stream
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            stream.shutdown().await.ok();
        }
        captured
    });

    (base_url, handle)
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.expect("read headers");
        if n == 0 {
            break buf.len();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.expect("read body");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&buf).to_string()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
