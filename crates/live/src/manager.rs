//! Per-job event stream connection manager.
//!
//! [`ConnectionManager`] owns at most one live connection to a job's
//! event stream. [`connect`](ConnectionManager::connect) spawns a
//! connection task (connect -> process frames -> back off -> reconnect)
//! that decodes inbound frames and fans them out through an
//! [`EventChannel`].
//!
//! The current [`ConnectionState`] is published on a
//! [`tokio::sync::watch`] channel. Call
//! [`ConnectionManager::watch_state`] to observe it; reaching
//! [`ConnectionState::Exhausted`] is how a consumer learns that live
//! updates are gone for good.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use datacure_core::endpoints::EndpointResolver;
use datacure_core::types::JobId;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{EventChannel, Subscription, Unsubscribe};
use crate::messages::{decode_frame, ServerEvent};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Transport, TransportConnection};

/// How long [`ConnectionManager::shutdown`] waits for the connection
/// task to finish closing the transport.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of a manager's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, `connect()` not called yet.
    Idle,
    /// A transport connection is being opened.
    Connecting,
    /// Connected; frames are being delivered.
    Open,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Reconnect attempts used up. No further attempts are made.
    Exhausted,
    /// Explicitly disconnected. Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Exhausted => "exhausted",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Errors that can occur when interacting with the manager.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// `connect()` was called after `disconnect()`.
    #[error("Connection manager for job {0} was disconnected and cannot be reused")]
    Disconnected(JobId),

    /// The outbound payload could not be serialized.
    #[error("Failed to encode outbound payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Manages the event stream connection for a single job.
///
/// Not reusable: after [`disconnect`](Self::disconnect) a new manager
/// must be constructed. Dropping the manager disconnects it.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    job_id: JobId,
    endpoint: String,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    channel: EventChannel,
    state_tx: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    control: Mutex<Control>,
    /// Cancelled by `disconnect()`; stops the connection task and any
    /// pending reconnect timer.
    cancel: CancellationToken,
}

#[derive(Default)]
struct Control {
    task: Option<JoinHandle<()>>,
    /// Present only while a connection is open.
    outbound: Option<mpsc::UnboundedSender<String>>,
    disconnected: bool,
}

/// Why a connected session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Dropped,
}

impl ConnectionManager {
    /// Create a manager for `job_id`. Nothing is opened until
    /// [`connect`](Self::connect) is called.
    pub fn new(
        job_id: JobId,
        endpoints: &EndpointResolver,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
    ) -> Self {
        let endpoint = endpoints.job_stream(&job_id);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(Inner {
                job_id,
                endpoint,
                transport,
                policy,
                channel: EventChannel::new(),
                state_tx,
                attempts: AtomicU32::new(0),
                control: Mutex::new(Control::default()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.inner.job_id
    }

    /// Resolved stream address for this job.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// The channel decoded events are published on.
    pub fn channel(&self) -> &EventChannel {
        &self.inner.channel
    }

    /// Register a queue subscriber for decoded events.
    pub fn subscribe(&self) -> Subscription {
        self.inner.channel.subscribe()
    }

    /// Register a callback for decoded events; see [`EventChannel::on`].
    pub fn on<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.channel.on(callback)
    }

    /// Start the connection task.
    ///
    /// No-op while connecting, open, or waiting to reconnect. From
    /// `Idle` or `Exhausted` a fresh cycle starts with the attempt
    /// counter reset. Must be called from within a Tokio runtime.
    pub fn connect(&self) -> Result<(), LiveError> {
        let mut control = self.inner.control();
        if control.disconnected {
            return Err(LiveError::Disconnected(self.inner.job_id.clone()));
        }

        let state = self.state();
        if matches!(
            state,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Reconnecting
        ) {
            tracing::debug!(job_id = %self.inner.job_id, %state, "Already connected, ignoring connect");
            return Ok(());
        }

        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.transition(ConnectionState::Connecting);

        let inner = Arc::clone(&self.inner);
        control.task = Some(tokio::spawn(async move {
            tracing::info!(job_id = %inner.job_id, endpoint = %inner.endpoint, "Starting event stream task");
            run_connection_loop(&inner).await;
            tracing::info!(job_id = %inner.job_id, "Event stream task exited");
        }));
        Ok(())
    }

    /// Serialize and transmit `payload` if the connection is open.
    ///
    /// Returns `Ok(false)` when not connected: the payload is dropped
    /// with a warning. Nothing is queued across disconnects.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<bool, LiveError> {
        let text = serde_json::to_string(payload)?;

        let control = self.inner.control();
        let sent = match (&control.outbound, self.state()) {
            (Some(tx), ConnectionState::Open) => tx.send(text).is_ok(),
            _ => false,
        };
        if !sent {
            tracing::warn!(job_id = %self.inner.job_id, state = %self.state(), "Event stream not connected, dropping outbound message");
        }
        Ok(sent)
    }

    /// Close the connection, detach every subscriber, and cancel any
    /// pending reconnect.
    ///
    /// Terminal and idempotent. The transport is closed by the
    /// connection task shortly after; use [`shutdown`](Self::shutdown)
    /// to wait for that.
    pub fn disconnect(&self) {
        {
            let mut control = self.inner.control();
            if control.disconnected {
                return;
            }
            control.disconnected = true;
            control.outbound = None;
        }

        self.inner.channel.close();
        self.inner.cancel.cancel();
        self.inner.transition(ConnectionState::Closed);
        tracing::info!(job_id = %self.inner.job_id, "Event stream disconnected");
    }

    /// Disconnect and wait (bounded) for the connection task to exit.
    pub async fn shutdown(&self) {
        self.disconnect();
        let task = self.inner.control().task.take();
        if let Some(task) = task {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!(job_id = %self.inner.job_id, "Event stream task did not exit in time");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next` unless the manager is already closed.
    fn transition(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                return false;
            }
            tracing::debug!(job_id = %self.job_id, from = %state, to = %next, "Connection state change");
            *state = next;
            true
        });
    }

    /// Decode one text frame and fan it out.
    fn dispatch(&self, text: &str) {
        match decode_frame(text) {
            Ok(event) => {
                let delivered = self.channel.publish(&event);
                tracing::trace!(job_id = %self.job_id, event = event.kind(), delivered, "Event delivered");
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    error = %e,
                    raw_message = %text,
                    "Discarding malformed event frame",
                );
            }
        }
    }
}

/// Core connection loop: connect -> process frames -> reconnect.
///
/// Runs until cancelled or until the reconnect policy is exhausted.
async fn run_connection_loop(inner: &Inner) {
    loop {
        inner.transition(ConnectionState::Connecting);

        let opened = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return,
            result = inner.transport.open(&inner.endpoint) => result,
        };

        match opened {
            Ok(conn) => {
                let conn_id = uuid::Uuid::new_v4();
                let (tx, rx) = mpsc::unbounded_channel();
                let registered = {
                    let mut control = inner.control();
                    if control.disconnected {
                        false
                    } else {
                        control.outbound = Some(tx);
                        true
                    }
                };
                if !registered {
                    close_quietly(conn).await;
                    return;
                }

                inner.attempts.store(0, Ordering::SeqCst);
                inner.transition(ConnectionState::Open);
                tracing::info!(job_id = %inner.job_id, %conn_id, "Event stream connected");

                let end = run_session(inner, conn, rx).await;
                inner.control().outbound = None;

                if end == SessionEnd::Cancelled {
                    return;
                }
                tracing::warn!(job_id = %inner.job_id, %conn_id, "Event stream closed unexpectedly");
            }
            Err(e) => {
                tracing::warn!(job_id = %inner.job_id, error = %e, "Event stream connection failed");
            }
        }

        if inner.cancel.is_cancelled() {
            return;
        }

        let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(delay) = inner.policy.delay_for(attempt) else {
            tracing::error!(
                job_id = %inner.job_id,
                max_attempts = inner.policy.max_attempts,
                "Reconnect attempts exhausted, live updates unavailable",
            );
            inner.transition(ConnectionState::Exhausted);
            return;
        };

        inner.transition(ConnectionState::Reconnecting);
        tracing::info!(
            job_id = %inner.job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect",
        );

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Pump one open connection until it drops or the manager is cancelled.
async fn run_session(
    inner: &Inner,
    mut conn: Box<dyn TransportConnection>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> SessionEnd {
    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => {
                close_quietly(conn).await;
                return SessionEnd::Cancelled;
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = conn.send_text(text).await {
                    tracing::warn!(job_id = %inner.job_id, error = %e, "Failed to send on event stream");
                    close_quietly(conn).await;
                    return SessionEnd::Dropped;
                }
            }
            frame = conn.next_text() => match frame {
                Some(Ok(text)) => {
                    // Checked again so a frame racing `disconnect()` is dropped.
                    if inner.cancel.is_cancelled() {
                        close_quietly(conn).await;
                        return SessionEnd::Cancelled;
                    }
                    inner.dispatch(&text);
                }
                Some(Err(e)) => {
                    tracing::warn!(job_id = %inner.job_id, error = %e, "Event stream receive error");
                    close_quietly(conn).await;
                    return SessionEnd::Dropped;
                }
                None => {
                    tracing::info!(job_id = %inner.job_id, "Event stream closed by peer");
                    return SessionEnd::Dropped;
                }
            }
        }
    }
}

async fn close_quietly(mut conn: Box<dyn TransportConnection>) {
    conn.close().await;
}
