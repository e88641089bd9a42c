// src/cognitionflow/mod.rs

pub mod artifacts;
pub mod catalog;
pub mod classifier;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod event;
pub mod executor;
pub mod orchestration;
pub mod registry;
pub mod role;
pub mod router;
pub mod run_store;
#[cfg(feature = "server")]
pub mod server;

pub use orchestration::{Orchestrator, RunOutcome, RunRequest, RunStatus, Turn};
