//! Job View Synchronizer.
//!
//! [`JobSynchronizer::mount`] fetches the job's snapshot and, at the
//! same time, opens a [`ConnectionManager`] for the job's event stream.
//! A driver task folds stream events into the [`JobView`] and publishes
//! every change on a [`watch`] channel as a [`JobViewState`].
//!
//! Events that arrive before the snapshot are buffered and applied in
//! order once it resolves. A failed fetch is reported as
//! [`Lifecycle::Error`]; an exhausted connection only degrades the view
//! to [`Lifecycle::Stale`], since the last folded state is still valid.
//!
//! [`JobSynchronizer::teardown`] (also run on drop) disconnects the
//! manager and stops the driver. Nothing is published after teardown: a
//! late fetch response or a late frame is discarded.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use datacure_core::config::ClientConfig;
use datacure_core::job::JobSnapshot;
use datacure_core::types::JobId;
use datacure_live::{
    ConnectionManager, ConnectionState, LiveError, ReconnectPolicy, ServerEvent, Subscription,
    Transport,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{FetchError, JobSource};
use crate::view::JobView;

/// How long [`JobSynchronizer::shutdown`] waits for the driver task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Coarse state of the view, for the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    /// Waiting for the initial snapshot.
    Loading,
    /// Snapshot loaded and the event stream is (or may still become) live.
    Live,
    /// Live updates are gone; the view shows the last known state.
    Stale,
    /// The initial snapshot could not be fetched. No view exists.
    Error { message: String },
}

/// What a consumer observes.
#[derive(Debug, Clone, PartialEq)]
pub struct JobViewState {
    pub lifecycle: Lifecycle,
    pub view: Option<JobView>,
}

impl JobViewState {
    fn loading() -> Self {
        Self {
            lifecycle: Lifecycle::Loading,
            view: None,
        }
    }
}

/// Collaborators needed to mount a synchronizer.
#[derive(Clone)]
pub struct SyncDeps {
    pub source: Arc<dyn JobSource>,
    pub transport: Arc<dyn Transport>,
    pub config: ClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The job's connection manager refused to start.
    #[error("Failed to start event stream: {0}")]
    Connect(#[from] LiveError),
}

/// Keeps one job's view in sync for the lifetime of a mount.
pub struct JobSynchronizer {
    job_id: JobId,
    manager: Arc<ConnectionManager>,
    state_tx: Arc<watch::Sender<JobViewState>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobSynchronizer {
    /// Start fetching the snapshot and connect to the event stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(job_id: JobId, deps: SyncDeps) -> Result<Self, SyncError> {
        let SyncDeps {
            source,
            transport,
            config,
        } = deps;

        let manager = Arc::new(ConnectionManager::new(
            job_id.clone(),
            &config.endpoints,
            transport,
            ReconnectPolicy::from_config(&config),
        ));
        // Subscribe before connecting so no event can slip past.
        let events = manager.subscribe();
        let conn_state = manager.watch_state();

        let (state_tx, _) = watch::channel(JobViewState::loading());
        let state_tx = Arc::new(state_tx);
        let cancel = CancellationToken::new();

        manager.connect()?;
        tracing::info!(%job_id, endpoint = manager.endpoint(), "Mounting job view");

        let driver = Driver {
            job_id: job_id.clone(),
            source,
            manager: Arc::clone(&manager),
            events,
            conn_state,
            publisher: Publisher {
                tx: Arc::clone(&state_tx),
                cancel: cancel.clone(),
            },
            log_capacity: config.log_capacity,
        };
        let task = tokio::spawn(driver.run(cancel.clone()));

        Ok(Self {
            job_id,
            manager,
            state_tx,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Observe the view. The receiver starts at the current state.
    pub fn watch(&self) -> watch::Receiver<JobViewState> {
        self.state_tx.subscribe()
    }

    /// Latest published state.
    pub fn current(&self) -> JobViewState {
        self.state_tx.borrow().clone()
    }

    /// State of the underlying event stream connection.
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Stop synchronizing: detach from the event stream, disconnect,
    /// and discard anything still buffered or in flight. Idempotent.
    pub fn teardown(&self) {
        let mut first = false;
        // Cancelling under the state lock orders teardown after any
        // publish already in progress and before every later one.
        self.state_tx.send_if_modified(|_| {
            if !self.cancel.is_cancelled() {
                self.cancel.cancel();
                first = true;
            }
            false
        });
        if !first {
            return;
        }

        self.manager.disconnect();
        tracing::info!(job_id = %self.job_id, "Job view torn down");
    }

    /// Tear down and wait (bounded) for the driver and connection tasks.
    pub async fn shutdown(&self) {
        self.teardown();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!(job_id = %self.job_id, "Job view driver did not exit in time");
            }
        }
        self.manager.shutdown().await;
    }
}

impl Drop for JobSynchronizer {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Publishes state unless the synchronizer was torn down.
struct Publisher {
    tx: Arc<watch::Sender<JobViewState>>,
    cancel: CancellationToken,
}

impl Publisher {
    fn publish(&self, lifecycle: Lifecycle, view: Option<&JobView>) {
        self.tx.send_if_modified(|state| {
            if self.cancel.is_cancelled() {
                return false;
            }
            *state = JobViewState {
                lifecycle,
                view: view.cloned(),
            };
            true
        });
    }
}

type Fetch = BoxFuture<'static, Result<JobSnapshot, FetchError>>;

fn fetch(source: &Arc<dyn JobSource>, job_id: &JobId) -> Fetch {
    let source = Arc::clone(source);
    let job_id = job_id.clone();
    async move { source.fetch_job(&job_id).await }.boxed()
}

/// Await the future in `slot`, or never resolve if it is empty.
async fn await_slot<T>(slot: &mut Option<BoxFuture<'static, T>>) -> T {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

struct Driver {
    job_id: JobId,
    source: Arc<dyn JobSource>,
    manager: Arc<ConnectionManager>,
    events: Subscription,
    conn_state: watch::Receiver<ConnectionState>,
    publisher: Publisher,
    log_capacity: usize,
}

impl Driver {
    async fn run(mut self, cancel: CancellationToken) {
        let mut initial = Some(fetch(&self.source, &self.job_id));
        let mut refresh: Option<Fetch> = None;
        let mut refreshed = false;
        let mut pending: Vec<ServerEvent> = Vec::new();
        let mut view: Option<JobView> = None;
        let mut stale = false;
        let mut events_open = true;
        let mut conn_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,

                result = await_slot(&mut initial), if initial.is_some() => {
                    initial = None;
                    match result {
                        Ok(snapshot) => {
                            let mut loaded = JobView::from_snapshot(snapshot, self.log_capacity);
                            let buffered = pending.len();
                            for event in pending.drain(..) {
                                if loaded.apply(&event) && matches!(event, ServerEvent::JobCompleted(_)) && !refreshed {
                                    refresh = Some(fetch(&self.source, &self.job_id));
                                    refreshed = true;
                                }
                            }
                            tracing::info!(
                                job_id = %self.job_id,
                                status = loaded.status.as_str(),
                                progress = loaded.progress,
                                buffered,
                                "Job snapshot loaded",
                            );
                            self.publisher.publish(lifecycle(stale), Some(&loaded));
                            view = Some(loaded);
                        }
                        Err(e) => {
                            tracing::error!(job_id = %self.job_id, error = %e, "Failed to fetch job snapshot");
                            self.publisher.publish(Lifecycle::Error { message: e.to_string() }, None);
                            self.manager.disconnect();
                            break;
                        }
                    }
                }

                event = self.events.recv(), if events_open => match event {
                    Some(event) => match view.as_mut() {
                        None => {
                            tracing::debug!(job_id = %self.job_id, event = event.kind(), "Buffering event until snapshot loads");
                            pending.push(event);
                        }
                        Some(current) => {
                            if current.apply(&event) {
                                if matches!(event, ServerEvent::JobCompleted(_)) && !refreshed {
                                    refresh = Some(fetch(&self.source, &self.job_id));
                                    refreshed = true;
                                }
                                self.publisher.publish(lifecycle(stale), Some(current));
                            }
                        }
                    },
                    None => events_open = false,
                },

                changed = self.conn_state.changed(), if conn_open => {
                    if changed.is_err() {
                        conn_open = false;
                        continue;
                    }
                    let state = *self.conn_state.borrow_and_update();
                    if state == ConnectionState::Exhausted && !stale {
                        stale = true;
                        tracing::warn!(job_id = %self.job_id, "Live updates unavailable, showing last known state");
                        if let Some(current) = view.as_ref() {
                            self.publisher.publish(Lifecycle::Stale, Some(current));
                        }
                    }
                }

                result = await_slot(&mut refresh), if refresh.is_some() => {
                    refresh = None;
                    match (result, view.as_mut()) {
                        (Ok(snapshot), Some(current)) => {
                            current.merge_refresh(&snapshot);
                            self.publisher.publish(lifecycle(stale), Some(current));
                        }
                        (Ok(_), None) => {}
                        (Err(e), _) => {
                            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to refresh completed job");
                        }
                    }
                }
            }
        }

        if !pending.is_empty() {
            tracing::debug!(job_id = %self.job_id, discarded = pending.len(), "Discarding buffered events");
        }
        tracing::debug!(job_id = %self.job_id, "Job view driver exited");
    }
}

fn lifecycle(stale: bool) -> Lifecycle {
    if stale {
        Lifecycle::Stale
    } else {
        Lifecycle::Live
    }
}
