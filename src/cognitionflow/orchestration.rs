//! Conversation driver.
//!
//! An [`Orchestrator`] runs one task to completion with a fixed cast of roles. The loop:
//!
//! ```text
//! Idle -> Seeding -> AwaitingReply(role) -> Routing -> Terminated(completed | failed | round_cap)
//!                         ^                    |
//!                         +--------------------+
//! ```
//!
//! - **Seeding** provisions the working directory and records the task as the first turn,
//!   credited to the variant's entry role and addressed to its first speaker.
//! - **AwaitingReply** gets the next turn's content. A role that can execute code and whose
//!   incoming turn carries fragments runs them through the [`CodeExecutor`]; every other
//!   reply is an LLM completion over the transcript.
//! - **Routing** stops on the variant's completion predicate or on the round cap, and
//!   otherwise asks [`next_role`] who speaks next.
//!
//! A provider failure ends the loop without failing the call: the working directory is still
//! scanned, and if artifacts exist the run is reported as completed with the error attached
//! as a warning. Execution failures never end the loop; they become execution-output turns
//! the reviewing role can react to.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cognitionflow::clients::openai::OpenAIClient;
//! use cognitionflow::executor::LocalCodeExecutor;
//! use cognitionflow::orchestration::{Orchestrator, RunRequest};
//! use cognitionflow::router::ConversationVariant;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = Arc::new(OpenAIClient::new_with_model_string(&std::env::var("OPENAI_API_KEY")?, "gpt-4o")?);
//! let orchestrator = Orchestrator::new(client, Arc::new(LocalCodeExecutor::new()))
//!     .with_variant(ConversationVariant::ThreeRole)
//!     .with_max_rounds(8);
//!
//! let outcome = orchestrator
//!     .run(RunRequest::new("Write hello.md containing a greeting", "/tmp/cf-demo"))
//!     .await?;
//! println!("{} after {} turns", outcome.status, outcome.transcript.len());
//! for artifact in &outcome.artifacts {
//!     println!("  {} ({})", artifact.name, artifact.kind.as_str());
//! }
//! # Ok(())
//! # }
//! ```

use crate::cognitionflow::artifacts::{scan_artifacts, Artifact};
use crate::cognitionflow::classifier::{Classification, ClassifiedMessage, CodeFragment, MessageClassifier};
use crate::cognitionflow::client_wrapper::{ClientWrapper, Message, Role};
use crate::cognitionflow::event::{EventRelay, EventSink, PHASE_INITIALIZING};
use crate::cognitionflow::executor::{format_report, CodeExecutor};
use crate::cognitionflow::role::{three_role_cast, two_role_cast, AgentMode, AgentRole, RoleId};
use crate::cognitionflow::router::{next_role, ConversationVariant};
use crate::cognitionflow::run_store::{RunRecord, RunStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Receiver name for turns addressed to every participant.
pub const BROADCAST: &str = "broadcast";

/// One utterance in a run's transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Display name of the producing role.
    pub producer: String,
    /// Stable id of the producing role, when it belongs to the cast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_role: Option<RoleId>,
    /// Display name of the addressed role, or [`BROADCAST`].
    pub receiver: String,
    pub content: String,
    pub classification: Classification,
    pub fragments: Vec<CodeFragment>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        producer: &AgentRole,
        receiver: impl Into<String>,
        content: impl Into<String>,
        classifier: &MessageClassifier,
    ) -> Self {
        let content = content.into();
        let ClassifiedMessage {
            classification,
            fragments,
        } = classifier.classify(&content);
        Self {
            producer: producer.name.clone(),
            producer_role: Some(producer.id),
            receiver: receiver.into(),
            content,
            classification,
            fragments,
            timestamp: Utc::now(),
        }
    }

    /// Recompute classification and fragments from the content.
    pub fn reclassify(&mut self, classifier: &MessageClassifier) {
        let classified = classifier.classify(&self.content);
        self.classification = classified.classification;
        self.fragments = classified.fragments;
    }

    pub fn classified(&self) -> ClassifiedMessage {
        ClassifiedMessage {
            classification: self.classification,
            fragments: self.fragments.clone(),
        }
    }
}

/// Lifecycle of a run. Each status is entered at most once, in declaration order, and a
/// run ends in exactly one of `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the conversation loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Completed,
    RoundCap,
    ProviderError,
}

/// Input for a single run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Generated (UUID v4) when absent.
    pub run_id: Option<String>,
    pub task: String,
    /// Exclusively owned by this run; created if missing.
    pub work_dir: PathBuf,
}

impl RunRequest {
    pub fn new(task: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: None,
            task: task.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub termination: Termination,
    pub transcript: Vec<Turn>,
    pub artifacts: Vec<Artifact>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
    pub warning: Option<String>,
    /// Replies produced after the seed turn, i.e. `transcript.len() - 1`.
    pub rounds: usize,
    /// Sum of provider-reported tokens; zero when the client does not report usage.
    pub total_tokens_used: usize,
}

/// Errors that prevent a run from starting.
///
/// Once a run has started every failure is reported through [`RunOutcome`] instead.
#[derive(Debug)]
pub enum OrchestrationError {
    /// The working directory could not be created.
    WorkDir { path: PathBuf, source: std::io::Error },
    /// The configured cast lacks a role the variant needs.
    InvalidRoles(String),
    /// A status change that would move a run backwards or re-enter a status.
    InvalidTransition { from: RunStatus, to: RunStatus },
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationError::WorkDir { path, source } => {
                write!(f, "Cannot create working directory {}: {}", path.display(), source)
            }
            OrchestrationError::InvalidRoles(msg) => write!(f, "Invalid roles: {}", msg),
            OrchestrationError::InvalidTransition { from, to } => {
                write!(f, "Invalid status transition: {} -> {}", from, to)
            }
        }
    }
}

impl Error for OrchestrationError {}

/// Drives one conversation per [`run`](Orchestrator::run) call.
///
/// The orchestrator holds no per-run state; the same instance can run several tasks
/// one after another or concurrently.
pub struct Orchestrator {
    client: Arc<dyn ClientWrapper>,
    executor: Arc<dyn CodeExecutor>,
    variant: ConversationVariant,
    agent_mode: AgentMode,
    roles: Option<Vec<AgentRole>>,
    max_rounds: Option<usize>,
    event_sink: Option<Arc<dyn EventSink>>,
    run_store: Option<Arc<dyn RunStore>>,
    classifier: MessageClassifier,
    metadata: Map<String, Value>,
}

/// Smallest accepted round cap: the seed turn plus one reply.
pub const MIN_ROUND_CAP: usize = 2;

impl Orchestrator {
    /// Orchestrator for the default three-role variant, with no event sink and no run store.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use cognitionflow::clients::openai::OpenAIClient;
    /// use cognitionflow::executor::LocalCodeExecutor;
    /// use cognitionflow::orchestration::Orchestrator;
    /// use std::sync::Arc;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    /// let client = Arc::new(OpenAIClient::new_with_model_string("sk-...", "gpt-4o")?);
    /// let orchestrator = Orchestrator::new(client, Arc::new(LocalCodeExecutor::new()));
    /// assert_eq!(orchestrator.max_rounds(), 12);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(client: Arc<dyn ClientWrapper>, executor: Arc<dyn CodeExecutor>) -> Self {
        Self {
            client,
            executor,
            variant: ConversationVariant::default(),
            agent_mode: AgentMode::default(),
            roles: None,
            max_rounds: None,
            event_sink: None,
            run_store: None,
            classifier: MessageClassifier::default(),
            metadata: Map::new(),
        }
    }

    /// Conversation shape: generator/executor/reviewer or coordinator/executor.
    pub fn with_variant(mut self, variant: ConversationVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Verbosity preset for the default cast. Ignored when [`with_roles`](Self::with_roles)
    /// supplies the cast.
    pub fn with_agent_mode(mut self, mode: AgentMode) -> Self {
        self.agent_mode = mode;
        self
    }

    /// Cap on the total number of turns in the transcript, seed turn included. Defaults to
    /// the variant's cap.
    ///
    /// Values below [`MIN_ROUND_CAP`] are raised to it, so a run always gets at least one
    /// reply. Callers taking the cap from untrusted input should reject such values instead.
    ///
    /// ```rust,no_run
    /// # use cognitionflow::orchestration::{Orchestrator, MIN_ROUND_CAP};
    /// # fn demo(orchestrator: Orchestrator) {
    /// let orchestrator = orchestrator.with_max_rounds(0);
    /// assert_eq!(orchestrator.max_rounds(), MIN_ROUND_CAP);
    /// # }
    /// ```
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = Some(max_rounds.max(MIN_ROUND_CAP));
        self
    }

    /// Receives progress events (turns, status changes, the final summary) as the run goes.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Where the run record is persisted at start and on completion. Persistence failures
    /// are logged and do not stop the run.
    pub fn with_run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(store);
        self
    }

    /// Replace the completion sentinel (`PIPELINE_COMPLETE` by default).
    pub fn with_completion_token(mut self, token: impl Into<String>) -> Self {
        self.classifier = self.classifier.with_completion_token(token);
        self
    }

    /// Replace the default cast. Must contain every role the variant uses.
    pub fn with_roles(mut self, roles: Vec<AgentRole>) -> Self {
        self.roles = Some(roles);
        self
    }

    /// Extra key recorded in the run's stored configuration.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn variant(&self) -> ConversationVariant {
        self.variant
    }

    /// Effective turn cap: the explicit one, else the variant's default.
    pub fn max_rounds(&self) -> usize {
        self.max_rounds
            .unwrap_or_else(|| self.variant.default_round_cap())
    }

    fn cast(&self) -> Result<Vec<AgentRole>, OrchestrationError> {
        let cast = match &self.roles {
            Some(roles) => roles.clone(),
            None => match self.variant {
                ConversationVariant::ThreeRole => three_role_cast(self.agent_mode),
                ConversationVariant::TwoRole => two_role_cast(self.agent_mode),
            },
        };
        for needed in self.variant.roles() {
            if !cast.iter().any(|r| r.id == *needed) {
                return Err(OrchestrationError::InvalidRoles(format!(
                    "{} variant requires a {} role",
                    self.variant.as_str(),
                    needed.as_str()
                )));
            }
        }
        Ok(cast)
    }

    fn run_config(&self) -> Value {
        let mut config = json!({
            "model": self.client.model_name(),
            "variant": self.variant.as_str(),
            "agent_mode": self.agent_mode.as_str(),
            "max_rounds": self.max_rounds(),
        });
        if let Value::Object(map) = &mut config {
            for (k, v) in &self.metadata {
                map.insert(k.clone(), v.clone());
            }
        }
        config
    }

    async fn persist(&self, record: &RunRecord) {
        if let Some(store) = &self.run_store {
            if let Err(e) = store.save(record).await {
                log::warn!(
                    "run {}: failed to persist status {}: {}",
                    record.id,
                    record.status,
                    e
                );
            }
        }
    }

    async fn advance(&self, record: &mut RunRecord, to: RunStatus) {
        match record.advance(to) {
            Ok(()) => self.persist(record).await,
            Err(e) => log::error!("run {}: {}", record.id, e),
        }
    }

    /// Rebuild the provider message list for `role` from the transcript.
    ///
    /// The role's own turns are replayed as assistant messages; everyone else's arrive as
    /// user messages prefixed with the speaker's name.
    fn messages_for(&self, role: &AgentRole, transcript: &[Turn]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(Message::new(Role::System, role.system_instruction.clone()));
        for turn in transcript {
            if turn.producer_role == Some(role.id) && turn.producer == role.name {
                messages.push(Message::new(Role::Assistant, turn.content.clone()));
            } else {
                messages.push(Message::new(
                    Role::User,
                    format!("[{}]: {}", turn.producer, turn.content),
                ));
            }
        }
        messages
    }

    /// Run a task to termination.
    ///
    /// Returns `Err` only when the run cannot start (invalid cast, uncreatable working
    /// directory). Provider failures and the round cap are reported in the outcome.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, OrchestrationError> {
        let cast = self.cast()?;
        let role_of = |id: RoleId| cast.iter().find(|r| r.id == id);

        let mut current = self.variant.first_speaker();
        let (Some(entry_role), Some(first_role)) =
            (role_of(self.variant.entry_role()), role_of(current))
        else {
            return Err(OrchestrationError::InvalidRoles(
                "entry role or first speaker missing".to_string(),
            ));
        };

        tokio::fs::create_dir_all(&request.work_dir)
            .await
            .map_err(|source| OrchestrationError::WorkDir {
                path: request.work_dir.clone(),
                source,
            })?;
        let work_dir = tokio::fs::canonicalize(&request.work_dir)
            .await
            .unwrap_or_else(|_| request.work_dir.clone());

        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let max_rounds = self.max_rounds();

        let mut record = RunRecord::new(&run_id, &request.task, &work_dir, self.run_config());
        let started_at = record.started_at;
        self.persist(&record).await;
        self.advance(&mut record, RunStatus::Running).await;

        log::info!(
            "run {}: starting {} conversation (cap {}) in {}",
            run_id,
            self.variant.as_str(),
            max_rounds,
            work_dir.display()
        );

        let mut relay = EventRelay::new(&run_id, self.event_sink.clone());
        relay.phase(PHASE_INITIALIZING).await;

        let mut transcript = vec![Turn::new(
            entry_role,
            first_role.name.clone(),
            request.task.clone(),
            &self.classifier,
        )];
        relay.turn(0, &transcript[0]).await;

        let mut rounds = 0usize;
        let mut total_tokens = 0usize;
        let mut provider_error: Option<String> = None;

        let termination = loop {
            let Some(role) = role_of(current) else {
                break Termination::ProviderError;
            };

            let incoming_fragments = transcript
                .last()
                .map(|t| t.fragments.clone())
                .unwrap_or_default();

            let content = if role.can_execute_code && !incoming_fragments.is_empty() {
                log::debug!(
                    "run {}: {} executing {} fragment(s)",
                    run_id,
                    role.name,
                    incoming_fragments.len()
                );
                match self.executor.execute(&incoming_fragments, &work_dir).await {
                    Ok(report) => report,
                    Err(e) => {
                        log::warn!("run {}: execution error: {}", run_id, e);
                        format_report(-1, &e.to_string())
                    }
                }
            } else {
                let messages = self.messages_for(role, &transcript);
                match self.client.send_message(&messages).await {
                    Ok(reply) => {
                        if let Some(usage) = self.client.get_last_usage() {
                            total_tokens += usage.total_tokens;
                        }
                        reply.content
                    }
                    Err(e) => {
                        log::error!("run {}: {} failed to reply: {}", run_id, role.name, e);
                        provider_error = Some(e.to_string());
                        break Termination::ProviderError;
                    }
                }
            };

            rounds += 1;

            let classified = self.classifier.classify(&content);
            let next = next_role(
                self.variant,
                Some(current),
                classified.classification,
                transcript.len(),
            );
            let receiver = role_of(next)
                .map(|r| r.name.clone())
                .unwrap_or_else(|| BROADCAST.to_string());

            let turn = Turn::new(role, receiver, content, &self.classifier);
            transcript.push(turn);
            let index = transcript.len() - 1;
            relay.turn(index, &transcript[index]).await;

            if self.variant.is_terminal(current, &classified) {
                break Termination::Completed;
            }
            if transcript.len() >= max_rounds {
                log::warn!("run {}: round cap of {} turns reached", run_id, max_rounds);
                break Termination::RoundCap;
            }
            current = next;
        };

        let artifacts = scan_artifacts(&work_dir);
        let (status, error, warning) = settle(termination, provider_error, max_rounds, &artifacts);

        record.finish(
            termination,
            error.clone(),
            warning.clone(),
            artifacts.clone(),
            rounds,
        );
        if let Err(e) = record.advance(status) {
            log::error!("run {}: {}", run_id, e);
        }
        self.persist(&record).await;

        relay
            .done(status, error.clone(), warning.clone(), artifacts.clone())
            .await;

        log::info!(
            "run {}: {} ({:?}) after {} replies, {} artifact(s)",
            run_id,
            status,
            termination,
            rounds,
            artifacts.len()
        );

        Ok(RunOutcome {
            run_id,
            status,
            termination,
            transcript,
            artifacts,
            started_at,
            finished_at: record.completed_at.unwrap_or_else(Utc::now),
            error,
            warning,
            rounds,
            total_tokens_used: total_tokens,
        })
    }
}

/// Apply the salvage rule: deliverables on disk outweigh an unclean stop.
fn settle(
    termination: Termination,
    provider_error: Option<String>,
    max_rounds: usize,
    artifacts: &[Artifact],
) -> (RunStatus, Option<String>, Option<String>) {
    let problem = match termination {
        Termination::Completed => return (RunStatus::Completed, None, None),
        Termination::RoundCap => format!("round cap of {} turns reached", max_rounds),
        Termination::ProviderError => {
            provider_error.unwrap_or_else(|| "conversation stopped unexpectedly".to_string())
        }
    };
    if artifacts.is_empty() {
        (RunStatus::Failed, Some(problem), None)
    } else {
        (RunStatus::Completed, None, Some(problem))
    }
}
