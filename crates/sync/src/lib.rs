//! Job view synchronization.
//!
//! Combines one pull-side fetch of a job's state with the job's live
//! event stream into a single, continuously-updated [`JobView`] that a
//! consumer observes through a [`tokio::sync::watch`] channel.

pub mod api;
pub mod synchronizer;
pub mod view;

pub use api::{FetchError, HttpJobSource, JobSource};
pub use synchronizer::{JobSynchronizer, JobViewState, Lifecycle, SyncDeps, SyncError};
pub use view::{JobView, LogLine, RecordUpdate};
