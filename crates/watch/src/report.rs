//! Turning job view updates into terminal output.

use datacure_sync::{JobViewState, Lifecycle};

/// Why the watcher stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    /// The snapshot could not be loaded.
    Unavailable(String),
}

/// One-line summary of the current state, or `None` while loading.
pub fn summarize(state: &JobViewState) -> Option<String> {
    let view = state.view.as_ref()?;
    let mut line = format!(
        "{} [{}] {:.1}% ({}/{} records)",
        view.name,
        view.status.as_str(),
        view.progress,
        view.completed_records,
        view.total_records,
    );
    if let Some(eta) = &view.eta_remaining {
        line.push_str(&format!(", eta {eta}"));
    }
    if state.lifecycle == Lifecycle::Stale {
        line.push_str(" (stale: live updates unavailable)");
    }
    Some(line)
}

/// Whether watching can stop.
pub fn outcome(state: &JobViewState) -> Option<Outcome> {
    if let Lifecycle::Error { message } = &state.lifecycle {
        return Some(Outcome::Unavailable(message.clone()));
    }
    let view = state.view.as_ref()?;
    match view.status {
        datacure_core::job::JobStatus::Completed => Some(Outcome::Completed),
        datacure_core::job::JobStatus::Failed => Some(Outcome::Failed(
            view.error.clone().unwrap_or_else(|| "unknown error".into()),
        )),
        _ => None,
    }
}
