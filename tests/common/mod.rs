//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use directip_mux::protocol::{Message, SessionHeader};

/// One request as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// A running mock backend.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}/sbd", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

type BoxedStatus = Pin<Box<dyn Future<Output = u16> + Send>>;
type Responder = Arc<dyn Fn() -> BoxedStatus + Send + Sync>;

#[derive(Clone)]
struct BackendState {
    requests: Arc<Mutex<Vec<Recorded>>>,
    respond: Responder,
}

async fn record(State(state): State<BackendState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    state.requests.lock().unwrap().push(Recorded { headers, body });
    let status = (state.respond)().await;
    StatusCode::from_u16(status).unwrap()
}

/// Start a mock backend on an ephemeral port answering with a fixed status.
pub async fn start_backend(status: u16) -> MockBackend {
    start_programmable_backend(move || async move { status }).await
}

/// Start a mock backend whose status comes from `f`, awaited per request.
pub async fn start_programmable_backend<F, Fut>(f: F) -> MockBackend
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = u16> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = BackendState {
        requests: requests.clone(),
        respond: Arc::new(move || -> BoxedStatus { Box::pin(f()) }),
    };

    let app = Router::new().fallback(record).with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockBackend { addr, requests }
}

/// A message from `imei` carrying `payload`.
pub fn message(imei: &str, payload: &[u8]) -> Message {
    Message::new()
        .with_session(SessionHeader::for_imei(imei))
        .with_payload(payload.to_vec())
}

/// Write `prefix` and raw `bytes` to a DirectIP receiver and return its whole reply.
pub async fn exchange(addr: SocketAddr, prefix: &[u8], bytes: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(prefix).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    reply
}

/// Send `message` and return the reply bytes.
pub async fn send(addr: SocketAddr, message: &Message) -> Vec<u8> {
    exchange(addr, &[], &message.encode().unwrap()).await
}
