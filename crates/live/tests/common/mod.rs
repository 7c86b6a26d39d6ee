//! In-memory transport used to drive the connection manager in tests.
//!
//! [`FakeTransport`] records every open attempt and, unless it is set
//! to refuse, hands the test a [`ServerSide`] for each accepted
//! connection so frames can be pushed and the peer can hang up.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use datacure_core::endpoints::EndpointResolver;
use datacure_core::types::JobId;
use datacure_live::{ConnectionState, ServerEvent, Transport, TransportConnection, TransportError};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Generous bound for waits; under a paused clock it also has to
/// outlast the longest backoff delay.
pub const WAIT: Duration = Duration::from_secs(120);

pub fn job_id() -> JobId {
    JobId::parse("job-42").unwrap()
}

pub fn endpoints() -> EndpointResolver {
    EndpointResolver::new("ws://fake.local", "http://fake.local", "v1").unwrap()
}

#[derive(Default)]
struct FakeState {
    attempts: Vec<(Instant, String)>,
    refusing: bool,
}

#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    servers: mpsc::UnboundedSender<ServerSide>,
}

/// Receives the server half of every accepted connection.
pub struct Servers {
    rx: mpsc::UnboundedReceiver<ServerSide>,
}

impl Servers {
    pub async fn accept(&mut self) -> ServerSide {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("transport dropped")
    }

    pub fn try_accept(&mut self) -> Option<ServerSide> {
        self.rx.try_recv().ok()
    }
}

impl FakeTransport {
    pub fn new() -> (Self, Servers) {
        let (servers, rx) = mpsc::unbounded_channel();
        let transport = Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            servers,
        };
        (transport, Servers { rx })
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.state.lock().unwrap().refusing = refusing;
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().attempts.iter().map(|(t, _)| *t).collect()
    }

    pub fn endpoints_opened(&self) -> Vec<String> {
        self.state.lock().unwrap().attempts.iter().map(|(_, e)| e.clone()).collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn TransportConnection>, TransportError> {
        let refusing = {
            let mut state = self.state.lock().unwrap();
            state.attempts.push((Instant::now(), endpoint.to_string()));
            state.refusing
        };
        if refusing {
            return Err(TransportError::Connection("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.servers.send(ServerSide {
            tx: Some(tx),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(FakeConnection {
            inbound: rx,
            sent,
            closed,
        }))
    }
}

struct FakeConnection {
    inbound: mpsc::UnboundedReceiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportConnection for FakeConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The "server" end of one accepted fake connection.
pub struct ServerSide {
    tx: Option<mpsc::UnboundedSender<String>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl ServerSide {
    pub fn push_raw(&self, text: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(text.to_string());
        }
    }

    pub fn push(&self, event: &ServerEvent) {
        self.push_raw(&serde_json::to_string(event).unwrap());
    }

    /// Simulate the peer hanging up.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Frames the client transmitted on this connection.
    pub fn received(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Whether the client closed this connection.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target}"))
        .expect("state channel closed");
}

/// Poll `cond` until it holds, yielding to the runtime in between.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
