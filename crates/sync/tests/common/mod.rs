//! Fakes for driving a `JobSynchronizer` end to end.
//!
//! [`FakeJobSource`] hands every fetch to the test as a [`PendingFetch`]
//! so the test decides when (and how) the pull side answers.
//! [`FakeTransport`] does the same for stream connections.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use datacure_core::config::ClientConfig;
use datacure_core::job::{JobSnapshot, JobStatus};
use datacure_core::types::JobId;
use datacure_live::{ServerEvent, Transport, TransportConnection, TransportError};
use datacure_sync::{FetchError, JobSource, JobViewState, SyncDeps};
use tokio::sync::{mpsc, oneshot, watch};

pub const WAIT: Duration = Duration::from_secs(120);

pub fn job_id() -> JobId {
    JobId::parse("job-42").unwrap()
}

pub fn config() -> ClientConfig {
    ClientConfig::from_lookup(|key| match key {
        "DATACURE_WS_URL" => Some("ws://fake.local".into()),
        "DATACURE_API_URL" => Some("http://fake.local".into()),
        _ => None,
    })
    .unwrap()
}

pub fn snapshot(status: JobStatus, progress: f64) -> JobSnapshot {
    JobSnapshot {
        id: job_id(),
        name: "Supplier master".into(),
        filename: "suppliers.csv".into(),
        status,
        progress,
        completed_records: progress as u64,
        total_records: 100,
        created_at: "2026-10-01T08:00:00".into(),
        auto_approved_percent: None,
        manual_review_percent: None,
        rejected_percent: None,
        eta_remaining: Some("4m".into()),
    }
}

pub struct Harness {
    pub deps: SyncDeps,
    pub transport: FakeTransport,
    pub servers: Servers,
    pub fetches: Fetches,
}

pub fn harness() -> Harness {
    let (source, fetches) = FakeJobSource::new();
    let (transport, servers) = FakeTransport::new();
    let deps = SyncDeps {
        source: Arc::new(source),
        transport: Arc::new(transport.clone()),
        config: config(),
    };
    Harness {
        deps,
        transport,
        servers,
        fetches,
    }
}

// ---------------------------------------------------------------------------
// Pull side
// ---------------------------------------------------------------------------

pub struct FakeJobSource {
    requests: mpsc::UnboundedSender<PendingFetch>,
}

/// One fetch waiting for the test to answer it.
pub struct PendingFetch {
    pub job_id: JobId,
    reply: oneshot::Sender<Result<JobSnapshot, FetchError>>,
}

impl PendingFetch {
    /// Answer the fetch. Returns `false` if nobody was waiting any more.
    pub fn respond(self, result: Result<JobSnapshot, FetchError>) -> bool {
        self.reply.send(result).is_ok()
    }
}

pub struct Fetches {
    rx: mpsc::UnboundedReceiver<PendingFetch>,
}

impl Fetches {
    pub async fn next(&mut self) -> PendingFetch {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a fetch")
            .expect("job source dropped")
    }

    pub fn try_next(&mut self) -> Option<PendingFetch> {
        self.rx.try_recv().ok()
    }
}

impl FakeJobSource {
    pub fn new() -> (Self, Fetches) {
        let (requests, rx) = mpsc::unbounded_channel();
        (Self { requests }, Fetches { rx })
    }
}

#[async_trait]
impl JobSource for FakeJobSource {
    async fn fetch_job(&self, job_id: &JobId) -> Result<JobSnapshot, FetchError> {
        let (reply, answer) = oneshot::channel();
        let _ = self.requests.send(PendingFetch {
            job_id: job_id.clone(),
            reply,
        });
        answer.await.unwrap_or_else(|_| {
            Err(FetchError::Api {
                status: 503,
                body: "fetch abandoned".into(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Stream side
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FakeTransport {
    refusing: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
    servers: mpsc::UnboundedSender<ServerSide>,
}

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
}

impl FakeTransport {
    pub fn new() -> (Self, Servers) {
        let (servers, rx) = mpsc::unbounded_channel();
        let transport = Self {
            refusing: Arc::new(AtomicBool::new(false)),
            opens: Arc::new(AtomicUsize::new(0)),
            servers,
        };
        (transport, Servers { rx })
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _endpoint: &str) -> Result<Box<dyn TransportConnection>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.servers.send(ServerSide {
            tx: Mutex::new(Some(tx)),
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(FakeConnection { inbound: rx, closed }))
    }
}

struct FakeConnection {
    inbound: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportConnection for FakeConnection {
    async fn send_text(&mut self, _text: String) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct ServerSide {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    closed: Arc<AtomicBool>,
}

impl ServerSide {
    pub fn push(&self, event: &ServerEvent) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(serde_json::to_string(event).unwrap());
        }
    }

    pub fn hang_up(&self) {
        self.tx.lock().unwrap().take();
    }

    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Waiting helpers
// ---------------------------------------------------------------------------

/// Wait until the published state satisfies `pred`, returning a copy.
pub async fn wait_for_view(
    rx: &mut watch::Receiver<JobViewState>,
    pred: impl FnMut(&JobViewState) -> bool,
) -> JobViewState {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for job view")
        .expect("job view channel closed")
        .clone()
}

pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
