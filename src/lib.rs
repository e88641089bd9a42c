//! # CognitionFlow
//!
//! CognitionFlow runs unattended multi-agent coding tasks: a small fixed cast of LLM-backed
//! roles takes turns writing code, executing it and reviewing the result until a reviewer
//! signals completion or a round cap is reached. Whatever files the run leaves in its
//! working directory are reported back as artifacts.
//!
//! The crate provides:
//!
//! * **Conversation driver**: [`Orchestrator`] owns the round loop, the termination rules
//!   and the partial-failure policy.
//! * **Pure building blocks**: the [`classifier`] tags turns and extracts fenced code, the
//!   [`router`] picks the next speaker, and the [`artifacts`] scanner lists produced files.
//! * **Seams**: [`ClientWrapper`] (completion provider), [`executor::CodeExecutor`] (code
//!   sandbox), [`run_store::RunStore`] (history) and [`event::EventSink`] (live progress).
//! * **HTTP service** (feature `server`): an axum router publishing runs, server-sent
//!   progress events and artifact downloads.
//!
//! ## Running a task
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cognitionflow::clients::client_from_config;
//! use cognitionflow::config::LlmConfig;
//! use cognitionflow::event::LogSink;
//! use cognitionflow::executor::LocalCodeExecutor;
//! use cognitionflow::{Orchestrator, RunRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     cognitionflow::init_logger();
//!
//!     let client = client_from_config(&LlmConfig::from_env()?)?;
//!     let outcome = Orchestrator::new(client, Arc::new(LocalCodeExecutor::new()))
//!         .with_event_sink(Arc::new(LogSink))
//!         .run(RunRequest::new(
//!             "Generate a report.md summarising 100 random numbers and a chart.png histogram",
//!             "project_workspace/demo",
//!         ))
//!         .await?;
//!
//!     println!("status: {}", outcome.status);
//!     for artifact in &outcome.artifacts {
//!         println!("  {} ({} bytes)", artifact.name, artifact.size_bytes);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Termination
//!
//! A run ends when the reviewing role replies with the completion token
//! (`PIPELINE_COMPLETE`) and no code fence, when the turn cap is reached, or when the
//! completion provider fails. In the last two cases the run still counts as completed,
//! with a warning, if the working directory holds artifacts.

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Call it from binaries and tests; repeated calls are harmless. Verbosity follows
/// `RUST_LOG`.
///
/// ```rust
/// cognitionflow::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `cognitionflow` module.
pub mod cognitionflow;

// Re-exporting key items for easier external access.
pub use cognitionflow::artifacts;
pub use cognitionflow::catalog;
pub use cognitionflow::classifier;
pub use cognitionflow::client_wrapper;
pub use cognitionflow::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
pub use cognitionflow::clients;
pub use cognitionflow::config;
pub use cognitionflow::config::{CognitionFlowConfig, LlmConfig};
pub use cognitionflow::event;
pub use cognitionflow::executor;
pub use cognitionflow::orchestration;
pub use cognitionflow::orchestration::{Orchestrator, RunOutcome, RunRequest, RunStatus, Turn};
pub use cognitionflow::registry;
pub use cognitionflow::role;
pub use cognitionflow::router;
pub use cognitionflow::run_store;
#[cfg(feature = "server")]
pub use cognitionflow::server;
