//! Run progress events.
//!
//! The orchestrator reports progress through a single [`EventRelay`] per run. The relay
//! forwards structured [`RunEvent`]s to at most one [`EventSink`]:
//!
//! - one [`RunEvent::Phase`] before the first reply,
//! - one [`RunEvent::Turn`] per finalized turn, minus duplicates,
//! - one [`RunEvent::Done`] after termination.
//!
//! Duplicates are detected on `(producing role, first 80 characters of content)` and
//! dropped silently. Delivery is best-effort: a failing sink is logged and ignored so it
//! can never stop a conversation.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use cognitionflow::event::{EventSink, RunEvent};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventSink for Printer {
//!     async fn deliver(
//!         &self,
//!         event: &RunEvent,
//!     ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         println!("{}", serde_json::to_string(event)?);
//!         Ok(())
//!     }
//! }
//! ```

use crate::cognitionflow::artifacts::Artifact;
use crate::cognitionflow::orchestration::{RunStatus, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Number of leading characters used in the de-duplication key.
pub const DEDUP_PREFIX_CHARS: usize = 80;

/// Phase name emitted once before the first reply.
pub const PHASE_INITIALIZING: &str = "initializing";

/// Structured progress event for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Phase {
        run_id: String,
        phase: String,
    },
    Turn {
        run_id: String,
        /// Position of the turn in the transcript (the seed is 0).
        index: usize,
        turn: Turn,
    },
    Done {
        run_id: String,
        status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        warning: Option<String>,
        artifacts: Vec<Artifact>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::Phase { run_id, .. }
            | RunEvent::Turn { run_id, .. }
            | RunEvent::Done { run_id, .. } => run_id,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, RunEvent::Done { .. })
    }
}

/// Receiver of run events.
///
/// Returning an error never affects the run; the relay logs it and carries on.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &RunEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Per-run forwarding point between the orchestrator and an optional sink.
pub struct EventRelay {
    run_id: String,
    sink: Option<Arc<dyn EventSink>>,
    seen: HashSet<(String, String)>,
    phase_sent: bool,
    done_sent: bool,
    delivered: usize,
}

impl EventRelay {
    pub fn new(run_id: impl Into<String>, sink: Option<Arc<dyn EventSink>>) -> Self {
        Self {
            run_id: run_id.into(),
            sink,
            seen: HashSet::new(),
            phase_sent: false,
            done_sent: false,
            delivered: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Number of events handed to the sink so far, including ones it rejected.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Emit a phase event. Only the first call per run has any effect.
    pub async fn phase(&mut self, phase: &str) {
        if self.phase_sent {
            return;
        }
        self.phase_sent = true;
        let event = RunEvent::Phase {
            run_id: self.run_id.clone(),
            phase: phase.to_string(),
        };
        self.send(event).await;
    }

    /// Forward a finalized turn. Returns `false` if it was dropped as a duplicate.
    pub async fn turn(&mut self, index: usize, turn: &Turn) -> bool {
        let key = (
            turn.producer.clone(),
            turn.content.chars().take(DEDUP_PREFIX_CHARS).collect::<String>(),
        );
        if !self.seen.insert(key) {
            log::debug!(
                "run {}: dropping duplicate turn from {}",
                self.run_id,
                turn.producer
            );
            return false;
        }
        let event = RunEvent::Turn {
            run_id: self.run_id.clone(),
            index,
            turn: turn.clone(),
        };
        self.send(event).await;
        true
    }

    /// Emit the final status. Only the first call per run has any effect.
    pub async fn done(
        &mut self,
        status: RunStatus,
        error: Option<String>,
        warning: Option<String>,
        artifacts: Vec<Artifact>,
    ) {
        if self.done_sent {
            return;
        }
        self.done_sent = true;
        let event = RunEvent::Done {
            run_id: self.run_id.clone(),
            status,
            error,
            warning,
            artifacts,
        };
        self.send(event).await;
    }

    async fn send(&mut self, event: RunEvent) {
        let Some(sink) = &self.sink else {
            return;
        };
        self.delivered += 1;
        if let Err(e) = sink.deliver(&event).await {
            log::warn!("run {}: event sink rejected event: {}", self.run_id, e);
        }
    }
}

/// Broadcasts events over a tokio channel.
///
/// Having no subscribers is not an error: events are simply not retained.
#[derive(Clone)]
pub struct ChannelSink {
    sender: broadcast::Sender<RunEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn from_sender(sender: broadcast::Sender<RunEvent>) -> Self {
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<RunEvent> {
        self.sender.clone()
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn deliver(&self, event: &RunEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Writes a one-line summary of each event through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn deliver(&self, event: &RunEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        match event {
            RunEvent::Phase { run_id, phase } => log::info!("[{}] phase: {}", run_id, phase),
            RunEvent::Turn { run_id, index, turn } => log::info!(
                "[{}] #{} {} -> {} ({}, {} chars)",
                run_id,
                index,
                turn.producer,
                turn.receiver,
                turn.classification.as_str(),
                turn.content.len()
            ),
            RunEvent::Done {
                run_id,
                status,
                artifacts,
                ..
            } => log::info!(
                "[{}] done: {} with {} artifact(s)",
                run_id,
                status.as_str(),
                artifacts.len()
            ),
        }
        Ok(())
    }
}
