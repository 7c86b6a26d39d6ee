//! `datacure-watch` -- follow one validation job from the terminal.
//!
//! Loads the job's current state from the REST API, subscribes to its
//! live event stream, and prints a line whenever the view changes.
//! Exits once the job completes or fails, the job cannot be loaded, or
//! Ctrl-C is pressed.
//!
//! # Usage
//!
//! ```text
//! datacure-watch <job-id>
//! ```
//!
//! Connection settings come from the environment (or a `.env` file);
//! see `ClientConfig::from_env` for the full list. `RUST_LOG` controls
//! log verbosity.

use std::sync::Arc;

use anyhow::Context;
use datacure_core::config::ClientConfig;
use datacure_core::types::JobId;
use datacure_live::WsTransport;
use datacure_sync::{HttpJobSource, JobSynchronizer, SyncDeps};
use datacure_watch::report::{self, Outcome};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "datacure_watch=info,datacure_live=info,datacure_sync=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let raw_id = std::env::args()
        .nth(1)
        .context("usage: datacure-watch <job-id>")?;
    let job_id = JobId::parse(raw_id).context("invalid job id")?;
    let config = ClientConfig::from_env().context("invalid configuration")?;

    tracing::info!(
        %job_id,
        ws_base = config.endpoints.ws_base(),
        api_base = config.endpoints.api_base(),
        "Starting datacure-watch",
    );

    let deps = SyncDeps {
        source: Arc::new(HttpJobSource::new(&config).context("failed to build HTTP client")?),
        transport: Arc::new(WsTransport::new()),
        config,
    };
    let sync = JobSynchronizer::mount(job_id, deps)?;
    let mut rx = sync.watch();

    let outcome = loop {
        let state = rx.borrow_and_update().clone();
        if let Some(line) = report::summarize(&state) {
            tracing::info!("{line}");
        }
        if let Some(outcome) = report::outcome(&state) {
            break Some(outcome);
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break None;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break None;
                }
            }
        }
    };

    sync.shutdown().await;

    match outcome {
        Some(Outcome::Completed) => {
            tracing::info!("Job completed");
            Ok(())
        }
        Some(Outcome::Failed(error)) => anyhow::bail!("job failed: {error}"),
        Some(Outcome::Unavailable(error)) => anyhow::bail!("could not load job: {error}"),
        None => Ok(()),
    }
}
