//! # records-tasks
//!
//! Persisted, resumable task orchestration for records management backends.
//!
//! A task is one unit of work owned by a process (a case or file workflow)
//! and split into items. Tasks are stored in SQLite, admitted per job kind
//! within a concurrency budget, and their items are handed to a registered
//! handler with a bounded number in flight. Tasks survive restarts: work that
//! was waiting is picked up again, work that was interrupted mid-run is
//! reported as failed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use records_tasks::{Config, NewTask, Payload, Registry, TaskEngine};
//! use records_tasks::jobs::format_verification;
//! # use std::sync::Arc;
//! # async fn example(
//! #     documents: Arc<dyn format_verification::PrimaryDocumentStore>,
//! #     hooks: Arc<dyn format_verification::VerificationHooks>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//!
//! let mut registry = Registry::new();
//! let analyzer = Arc::new(format_verification::HttpFormatAnalyzer::new(
//!     &config.jobs.format_verification,
//! )?);
//! format_verification::register(&mut registry, documents, analyzer, hooks)?;
//!
//! let engine = TaskEngine::new(config, registry).await?;
//!
//! // Subscribe to events
//! let mut events = engine.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let task = NewTask::new("process-1", format_verification::JOB_KIND)
//!     .with_item("letter.pdf", Payload::encode(&"letter.pdf")?);
//! engine.run(task).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Task engine: registry, scheduler, controller and recovery
pub mod engine;
/// Error types
pub mod error;
/// Job kinds built on the engine
pub mod jobs;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use engine::{
    HandlerFactory, INTERRUPTED_BY_RESTART, ItemContext, ItemHandler, Options, Registry,
    TaskEngine,
};
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, Result, TaskError, ToHttpStatus};
pub use types::{
    Event, ItemState, NewTask, NewTaskItem, Payload, Progress, Task, TaskAction, TaskCounts,
    TaskDetail, TaskId, TaskItem, TaskState,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Waits for a termination signal and then calls the engine's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use records_tasks::{Config, Registry, TaskEngine, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = TaskEngine::new(Config::default(), Registry::new()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: TaskEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
