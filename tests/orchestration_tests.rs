use async_trait::async_trait;
use cognitionflow::artifacts::ArtifactKind;
use cognitionflow::classifier::{Classification, CodeFragment};
use cognitionflow::client_wrapper::{ClientError, ClientWrapper, Message, Role, TokenUsage};
use cognitionflow::event::{EventSink, RunEvent};
use cognitionflow::executor::{CodeExecutor, ExecutionError};
use cognitionflow::orchestration::{
    OrchestrationError, Orchestrator, RunRequest, RunStatus, Termination, MIN_ROUND_CAP,
};
use cognitionflow::role::{AgentMode, AgentRole};
use cognitionflow::router::ConversationVariant;
use cognitionflow::run_store::{InMemoryRunStore, RunMetrics, RunRecord, RunStore, StoreError};
use std::collections::VecDeque;
use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};

const CODE_REPLY: &str = "Here is the script:\n```python\nopen('report.md', 'w').write('# Report')\n```";

/// Replays scripted replies in order, then repeats `fallback`.
struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: String,
    calls: Mutex<Vec<Vec<Message>>>,
    usage: Mutex<Option<TokenUsage>>,
}

impl ScriptedClient {
    fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            fallback: "Still thinking about the approach.".to_string(),
            calls: Mutex::new(Vec::new()),
            usage: Mutex::new(None),
        })
    }

    fn always(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: reply.to_string(),
            calls: Mutex::new(Vec::new()),
            usage: Mutex::new(None),
        })
    }

    fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    async fn send_message(&self, messages: &[Message]) -> Result<Message, ClientError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        *self.usage.lock().unwrap() = Some(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        });
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(Message::new(Role::Assistant, text)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(Message::new(Role::Assistant, self.fallback.clone())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

/// Pretends to run the code: writes a report and a chart and reports success.
#[derive(Default)]
struct ArtifactWritingExecutor {
    runs: Mutex<usize>,
}

#[async_trait]
impl CodeExecutor for ArtifactWritingExecutor {
    async fn execute(
        &self,
        fragments: &[CodeFragment],
        work_dir: &Path,
    ) -> Result<String, ExecutionError> {
        *self.runs.lock().unwrap() += 1;
        assert!(!fragments.is_empty());
        std::fs::write(work_dir.join("report.md"), "# Report\nAll good.")?;
        std::fs::write(work_dir.join("chart.png"), [0x89, b'P', b'N', b'G'])?;
        Ok("exitcode: 0 (execution succeeded)\nCode output: wrote report.md and chart.png".to_string())
    }
}

struct TimingOutExecutor;

#[async_trait]
impl CodeExecutor for TimingOutExecutor {
    async fn execute(&self, _: &[CodeFragment], _: &Path) -> Result<String, ExecutionError> {
        Err(ExecutionError::Timeout("script exceeded 1 second timeout".to_string()))
    }
}

#[derive(Default)]
struct CollectingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectingSink {
    fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn deliver(&self, event: &RunEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct BrokenStore;

#[async_trait]
impl RunStore for BrokenStore {
    async fn save(&self, _: &RunRecord) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }
    async fn get(&self, _: &str) -> Result<Option<RunRecord>, StoreError> {
        Ok(None)
    }
    async fn history(&self, _: usize, _: usize) -> Result<Vec<RunRecord>, StoreError> {
        Ok(Vec::new())
    }
    async fn metrics(&self) -> Result<RunMetrics, StoreError> {
        Ok(RunMetrics::from_records(std::iter::empty::<&RunRecord>()))
    }
}

#[tokio::test]
async fn test_end_to_end_report_and_chart() {
    let dir = tempfile::tempdir().unwrap();
    let work_dir = dir.path().join("run-e2e");

    let client = ScriptedClient::new(vec![Ok(CODE_REPLY), Ok("Both files exist.\nPIPELINE_COMPLETE")]);
    let executor = Arc::new(ArtifactWritingExecutor::default());
    let sink = Arc::new(CollectingSink::default());
    let store = Arc::new(InMemoryRunStore::new());

    let outcome = Orchestrator::new(client.clone(), executor.clone())
        .with_event_sink(sink.clone())
        .with_run_store(store.clone())
        .run(RunRequest::new("generate a report and a chart", &work_dir).with_run_id("e2e"))
        .await
        .unwrap();

    assert_eq!(outcome.run_id, "e2e");
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.transcript.len(), 4);
    assert_eq!(outcome.rounds, 3);
    assert!(outcome.error.is_none());
    assert!(outcome.warning.is_none());
    assert_eq!(*executor.runs.lock().unwrap(), 1);

    let producers: Vec<&str> = outcome.transcript.iter().map(|t| t.producer.as_str()).collect();
    assert_eq!(producers, vec!["Executor", "Engineer", "Executor", "Reviewer"]);
    assert_eq!(outcome.transcript[0].receiver, "Engineer");
    assert_eq!(outcome.transcript[1].classification, Classification::CodeBearing);
    assert_eq!(outcome.transcript[2].classification, Classification::ExecutionOutput);
    assert_eq!(outcome.transcript[3].classification, Classification::Completion);

    let names: Vec<(&str, ArtifactKind)> = outcome
        .artifacts
        .iter()
        .map(|a| (a.name.as_str(), a.kind))
        .collect();
    assert_eq!(
        names,
        vec![("chart.png", ArtifactKind::Image), ("report.md", ArtifactKind::Markdown)]
    );
    assert!(outcome.artifacts.iter().all(|a| a.path.is_absolute()));

    // Two LLM calls at 15 tokens each; the executor turn costs nothing.
    assert_eq!(outcome.total_tokens_used, 30);

    let events = sink.events();
    assert_eq!(events.len(), 6);
    assert!(matches!(&events[0], RunEvent::Phase { phase, .. } if phase == "initializing"));
    assert!(matches!(
        &events[5],
        RunEvent::Done { status: RunStatus::Completed, artifacts, .. } if artifacts.len() == 2
    ));

    let record = store.get("e2e").await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.rounds, 3);
    assert_eq!(record.config["model"], "scripted");
    assert!(record.duration_ms.is_some());
}

#[tokio::test]
async fn test_reviewer_sees_transcript_with_speaker_prefixes() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![Ok(CODE_REPLY), Ok("PIPELINE_COMPLETE")]);

    Orchestrator::new(client.clone(), Arc::new(ArtifactWritingExecutor::default()))
        .run(RunRequest::new("task text", dir.path()))
        .await
        .unwrap();

    let calls = client.calls();
    assert_eq!(calls.len(), 2);

    let generator_call = &calls[0];
    assert_eq!(generator_call[0].role, Role::System);
    assert!(generator_call[0].content.contains("principal software engineer"));
    assert_eq!(generator_call[1].content, "[Executor]: task text");

    let reviewer_call = &calls[1];
    assert!(reviewer_call[0].content.contains("PIPELINE_COMPLETE"));
    assert_eq!(reviewer_call.len(), 4);
    assert!(reviewer_call[2].content.starts_with("[Engineer]: "));
    assert!(reviewer_call[3].content.starts_with("[Executor]: exitcode: 0"));
}

#[tokio::test]
async fn test_round_cap_without_artifacts_fails() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::always("Let me reconsider the requirements.");

    let outcome = Orchestrator::new(client, Arc::new(ArtifactWritingExecutor::default()))
        .with_max_rounds(5)
        .run(RunRequest::new("never finishes", dir.path().join("cap")))
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::RoundCap);
    // The cap counts every turn, the seed included.
    assert_eq!(outcome.transcript.len(), 5);
    assert_eq!(outcome.rounds, 4);
    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.error.unwrap().contains("round cap"));
    assert!(outcome.artifacts.is_empty());
}

#[tokio::test]
async fn test_round_cap_with_artifacts_completes_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "partial").unwrap();

    let outcome = Orchestrator::new(
        ScriptedClient::always("Still reviewing."),
        Arc::new(ArtifactWritingExecutor::default()),
    )
    .with_max_rounds(3)
    .run(RunRequest::new("task", dir.path()))
    .await
    .unwrap();

    assert_eq!(outcome.termination, Termination::RoundCap);
    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.error.is_none());
    assert!(outcome.warning.unwrap().contains("round cap"));
    assert_eq!(outcome.artifacts.len(), 1);
}

#[tokio::test]
async fn test_default_round_cap_for_three_role_variant() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = Orchestrator::new(
        ScriptedClient::always("Hmm."),
        Arc::new(ArtifactWritingExecutor::default()),
    )
    .run(RunRequest::new("task", dir.path()))
    .await
    .unwrap();

    assert_eq!(outcome.termination, Termination::RoundCap);
    assert_eq!(outcome.transcript.len(), 12);
    assert_eq!(outcome.rounds, 11);
    assert!(outcome.error.unwrap().contains("round cap of 12 turns"));
}

#[tokio::test]
async fn test_round_cap_below_minimum_still_allows_one_reply() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::always("Thinking.");

    let orchestrator = Orchestrator::new(client.clone(), Arc::new(ArtifactWritingExecutor::default()))
        .with_max_rounds(0);
    assert_eq!(orchestrator.max_rounds(), MIN_ROUND_CAP);

    let outcome = orchestrator
        .run(RunRequest::new("task", dir.path()))
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::RoundCap);
    assert_eq!(outcome.transcript.len(), 2);
    assert_eq!(client.calls().len(), 1);
}

#[tokio::test]
async fn test_provider_error_after_artifacts_is_upgraded() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![Ok(CODE_REPLY), Err("rate limit exceeded")]);
    let sink = Arc::new(CollectingSink::default());

    let outcome = Orchestrator::new(client, Arc::new(ArtifactWritingExecutor::default()))
        .with_event_sink(sink.clone())
        .run(RunRequest::new("task", dir.path()))
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::ProviderError);
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.warning.as_deref(), Some("rate limit exceeded"));
    assert!(outcome.error.is_none());
    assert_eq!(outcome.transcript.len(), 3);
    assert_eq!(outcome.artifacts.len(), 2);

    let done = sink.events().into_iter().last().unwrap();
    assert!(matches!(done, RunEvent::Done { status: RunStatus::Completed, warning: Some(_), .. }));
}

#[tokio::test]
async fn test_provider_error_without_artifacts_fails() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![Err("invalid api key")]);
    let store = Arc::new(InMemoryRunStore::new());

    let outcome = Orchestrator::new(client, Arc::new(ArtifactWritingExecutor::default()))
        .with_run_store(store.clone())
        .run(RunRequest::new("task", dir.path()).with_run_id("bad-key"))
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("invalid api key"));
    assert_eq!(outcome.transcript.len(), 1);
    assert_eq!(outcome.rounds, 0);

    let record = store.get("bad-key").await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.termination, Some(Termination::ProviderError));
}

#[tokio::test]
async fn test_execution_error_becomes_execution_output_turn() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![
        Ok(CODE_REPLY),
        Ok("The script timed out; make it faster."),
        Ok(CODE_REPLY),
        Ok("Accepting with notes.\nPIPELINE_COMPLETE"),
    ]);

    let outcome = Orchestrator::new(client, Arc::new(TimingOutExecutor))
        .run(RunRequest::new("task", dir.path()))
        .await
        .unwrap();

    let executor_turn = &outcome.transcript[2];
    assert_eq!(executor_turn.producer, "Executor");
    assert_eq!(executor_turn.classification, Classification::ExecutionOutput);
    assert!(executor_turn.content.starts_with("exitcode: -1 (execution failed)"));
    assert!(executor_turn.content.contains("timeout"));

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.transcript.len(), 7);
    // Completed by the reviewer even though nothing was written.
    assert_eq!(outcome.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_fenced_completion_token_does_not_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![
        Ok(CODE_REPLY),
        Ok("Print this:\n```text\nPIPELINE_COMPLETE\n```"),
        Ok(CODE_REPLY),
        Ok("PIPELINE_COMPLETE"),
    ]);

    let outcome = Orchestrator::new(client, Arc::new(ArtifactWritingExecutor::default()))
        .run(RunRequest::new("task", dir.path()))
        .await
        .unwrap();

    assert_eq!(outcome.transcript[3].classification, Classification::CodeBearing);
    assert_eq!(outcome.transcript.len(), 7);
    assert_eq!(outcome.termination, Termination::Completed);
}

#[tokio::test]
async fn test_generator_completion_token_does_not_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![Ok("PIPELINE_COMPLETE"), Ok("Noted."), Ok("PIPELINE_COMPLETE")]);

    let outcome = Orchestrator::new(client, Arc::new(ArtifactWritingExecutor::default()))
        .run(RunRequest::new("task", dir.path()))
        .await
        .unwrap();

    // Engineer, Executor (status note), Reviewer.
    assert_eq!(outcome.transcript.len(), 4);
    assert_eq!(outcome.transcript[3].producer, "Reviewer");
    assert_eq!(outcome.termination, Termination::Completed);
}

#[tokio::test]
async fn test_two_role_variant_alternates() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![
        Ok(CODE_REPLY),
        Ok("The files are written."),
        Ok("Everything is delivered. PIPELINE_COMPLETE"),
    ]);
    let executor = Arc::new(ArtifactWritingExecutor::default());

    let outcome = Orchestrator::new(client, executor.clone())
        .with_variant(ConversationVariant::TwoRole)
        .with_agent_mode(AgentMode::Concise)
        .run(RunRequest::new("task", dir.path()))
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.transcript.len(), 5);
    for pair in outcome.transcript.windows(2) {
        assert_ne!(pair[0].producer, pair[1].producer);
    }
    assert_eq!(outcome.transcript[0].producer, "ProductManager");
    assert_eq!(outcome.transcript[2].classification, Classification::ExecutionOutput);
    assert_eq!(*executor.runs.lock().unwrap(), 1);
    assert_eq!(outcome.artifacts.len(), 2);
}

#[tokio::test]
async fn test_two_role_default_cap() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = Orchestrator::new(
        ScriptedClient::always("Working."),
        Arc::new(ArtifactWritingExecutor::default()),
    )
    .with_variant(ConversationVariant::TwoRole)
    .run(RunRequest::new("task", dir.path()))
    .await
    .unwrap();

    assert_eq!(outcome.transcript.len(), 20);
    assert_eq!(outcome.rounds, 19);
    assert_eq!(outcome.termination, Termination::RoundCap);
}

#[tokio::test]
async fn test_custom_completion_token() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![
        Ok(CODE_REPLY),
        Ok("PIPELINE_COMPLETE"),
        Ok(CODE_REPLY),
        Ok("TERMINATE"),
    ]);

    let outcome = Orchestrator::new(client, Arc::new(ArtifactWritingExecutor::default()))
        .with_completion_token("TERMINATE")
        .run(RunRequest::new("task", dir.path()))
        .await
        .unwrap();

    // The default token is plain text now; the run ends on the second review.
    assert_eq!(outcome.transcript.len(), 7);
    assert!(outcome.transcript[6].content.contains("TERMINATE"));
}

#[tokio::test]
async fn test_missing_role_is_rejected_before_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryRunStore::new());

    let result = Orchestrator::new(
        ScriptedClient::always("x"),
        Arc::new(ArtifactWritingExecutor::default()),
    )
    .with_roles(vec![AgentRole::generator(AgentMode::Standard), AgentRole::reviewer()])
    .with_run_store(store.clone())
    .run(RunRequest::new("task", dir.path()))
    .await;

    assert!(matches!(result, Err(OrchestrationError::InvalidRoles(_))));
    assert_eq!(store.metrics().await.unwrap().total_runs, 0);
}

#[tokio::test]
async fn test_uncreatable_work_dir_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, "not a directory").unwrap();

    let result = Orchestrator::new(
        ScriptedClient::always("x"),
        Arc::new(ArtifactWritingExecutor::default()),
    )
    .run(RunRequest::new("task", blocker.join("sub")))
    .await;

    assert!(matches!(result, Err(OrchestrationError::WorkDir { .. })));
}

#[tokio::test]
async fn test_store_failures_do_not_affect_run() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new(vec![Ok(CODE_REPLY), Ok("PIPELINE_COMPLETE")]);

    let outcome = Orchestrator::new(client, Arc::new(ArtifactWritingExecutor::default()))
        .with_run_store(Arc::new(BrokenStore))
        .run(RunRequest::new("task", dir.path()))
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_generated_run_ids_are_unique() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        ScriptedClient::always("PIPELINE_COMPLETE"),
        Arc::new(ArtifactWritingExecutor::default()),
    );

    let a = orchestrator
        .run(RunRequest::new("task", dir.path().join("a")))
        .await
        .unwrap();
    let b = orchestrator
        .run(RunRequest::new("task", dir.path().join("b")))
        .await
        .unwrap();

    assert_ne!(a.run_id, b.run_id);
    assert!(uuid::Uuid::parse_str(&a.run_id).is_ok());
}
