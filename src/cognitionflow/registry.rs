//! In-flight run registry.
//!
//! The HTTP service creates one [`RunRegistry`] at start-up and shares it between request
//! handlers. Each entry tracks the live status of a run plus the events emitted so far, so
//! a progress stream opened mid-run first replays history and then follows new events.
//! Entries are removed once a run finishes; finished runs are looked up in the run store.

use crate::cognitionflow::event::{EventSink, RunEvent};
use crate::cognitionflow::orchestration::RunStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

struct RunEntry {
    status: RunStatus,
    started_at: DateTime<Utc>,
    history: Vec<RunEvent>,
    sender: broadcast::Sender<RunEvent>,
}

/// Snapshot of an in-flight run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub events: usize,
}

#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl RunRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a pending run and return the sink its orchestrator should report to.
    ///
    /// Returns `None` when the id is already registered.
    pub fn register(self: &Arc<Self>, run_id: &str) -> Option<RegistrySink> {
        let mut runs = self.runs.lock().ok()?;
        if runs.contains_key(run_id) {
            return None;
        }
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        runs.insert(
            run_id.to_string(),
            RunEntry {
                status: RunStatus::Pending,
                started_at: Utc::now(),
                history: Vec::new(),
                sender,
            },
        );
        Some(RegistrySink {
            registry: Arc::clone(self),
            run_id: run_id.to_string(),
        })
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.runs
            .lock()
            .map(|runs| runs.contains_key(run_id))
            .unwrap_or(false)
    }

    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.runs.lock().ok()?.get(run_id).map(|e| e.status)
    }

    pub fn summary(&self, run_id: &str) -> Option<RunSummary> {
        let runs = self.runs.lock().ok()?;
        runs.get(run_id).map(|e| RunSummary {
            run_id: run_id.to_string(),
            status: e.status,
            started_at: e.started_at,
            events: e.history.len(),
        })
    }

    /// Runs currently registered.
    pub fn active_runs(&self) -> usize {
        self.runs.lock().map(|runs| runs.len()).unwrap_or(0)
    }

    /// Events so far plus a receiver for the rest, taken atomically so nothing is missed
    /// or seen twice.
    pub fn subscribe(&self, run_id: &str) -> Option<(Vec<RunEvent>, broadcast::Receiver<RunEvent>)> {
        let runs = self.runs.lock().ok()?;
        runs.get(run_id)
            .map(|e| (e.history.clone(), e.sender.subscribe()))
    }

    /// Record an event for `run_id`, updating its status and notifying subscribers.
    pub fn record(&self, run_id: &str, event: &RunEvent) -> Result<(), RegistryError> {
        let mut runs = self.runs.lock().map_err(|_| RegistryError::Poisoned)?;
        let entry = runs
            .get_mut(run_id)
            .ok_or_else(|| RegistryError::UnknownRun(run_id.to_string()))?;

        match event {
            RunEvent::Phase { .. } if entry.status == RunStatus::Pending => {
                entry.status = RunStatus::Running;
            }
            RunEvent::Done { status, .. } if entry.status.can_transition_to(*status) => {
                entry.status = *status;
            }
            _ => {}
        }
        entry.history.push(event.clone());
        // No subscribers is fine; history keeps the event for later streams.
        let _ = entry.sender.send(event.clone());
        Ok(())
    }

    /// Drop a finished run. Open streams still receive everything already sent.
    pub fn remove(&self, run_id: &str) -> bool {
        self.runs
            .lock()
            .map(|mut runs| runs.remove(run_id).is_some())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    UnknownRun(String),
    Poisoned,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownRun(id) => write!(f, "Run not registered: {}", id),
            RegistryError::Poisoned => write!(f, "Run registry lock poisoned"),
        }
    }
}

impl Error for RegistryError {}

/// [`EventSink`] feeding one run's events into the registry.
pub struct RegistrySink {
    registry: Arc<RunRegistry>,
    run_id: String,
}

impl RegistrySink {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

#[async_trait]
impl EventSink for RegistrySink {
    async fn deliver(&self, event: &RunEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.registry.record(&self.run_id, event)?;
        Ok(())
    }
}
