//! Conversation participants.
//!
//! A run is carried out by a small fixed cast of [`AgentRole`]s. Each role has a stable
//! [`RoleId`] used by the turn router, a display name that appears in the transcript, a
//! behavioral [`AgentMode`], a flag saying whether it may run code, and its system
//! instruction. Roles are plain values: once a run starts its roles are never mutated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identity of a participant, independent of its display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleId {
    /// Runs code it receives; otherwise gives a short status note.
    Executor,
    /// Writes the code that solves the task.
    Generator,
    /// Inspects execution results and decides whether the run is finished.
    Reviewer,
    /// Hands out the task and judges completion in the two-role variant.
    Coordinator,
}

impl RoleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleId::Executor => "executor",
            RoleId::Generator => "generator",
            RoleId::Reviewer => "reviewer",
            RoleId::Coordinator => "coordinator",
        }
    }
}

/// Verbosity preset applied to the generator's instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    #[default]
    Standard,
    Detailed,
    Concise,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Standard => "standard",
            AgentMode::Detailed => "detailed",
            AgentMode::Concise => "concise",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(AgentMode::Standard),
            "detailed" => Ok(AgentMode::Detailed),
            "concise" => Ok(AgentMode::Concise),
            other => Err(format!("unknown agent mode: {}", other)),
        }
    }
}

/// One participant of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRole {
    pub id: RoleId,
    pub name: String,
    pub mode: AgentMode,
    pub can_execute_code: bool,
    pub system_instruction: String,
}

impl AgentRole {
    pub fn new(id: RoleId, name: impl Into<String>, system_instruction: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            mode: AgentMode::Standard,
            can_execute_code: false,
            system_instruction: system_instruction.into(),
        }
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_code_execution(mut self, enabled: bool) -> Self {
        self.can_execute_code = enabled;
        self
    }

    pub fn executor() -> Self {
        Self::new(RoleId::Executor, "Executor", EXECUTOR_INSTRUCTION).with_code_execution(true)
    }

    pub fn generator(mode: AgentMode) -> Self {
        Self::new(RoleId::Generator, "Engineer", generator_instruction(mode)).with_mode(mode)
    }

    pub fn reviewer() -> Self {
        Self::new(RoleId::Reviewer, "Reviewer", REVIEWER_INSTRUCTION)
    }

    pub fn coordinator() -> Self {
        Self::new(RoleId::Coordinator, "ProductManager", COORDINATOR_INSTRUCTION)
            .with_code_execution(true)
    }
}

/// Executor, Engineer and Reviewer for the review-loop variant.
pub fn three_role_cast(mode: AgentMode) -> Vec<AgentRole> {
    vec![
        AgentRole::executor(),
        AgentRole::generator(mode),
        AgentRole::reviewer(),
    ]
}

/// ProductManager and Engineer for the alternating variant.
pub fn two_role_cast(mode: AgentMode) -> Vec<AgentRole> {
    vec![AgentRole::coordinator(), AgentRole::generator(mode)]
}

pub fn generator_instruction(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Standard => GENERATOR_STANDARD,
        AgentMode::Detailed => GENERATOR_DETAILED,
        AgentMode::Concise => GENERATOR_CONCISE,
    }
}

const GENERATOR_STANDARD: &str = "You are a principal software engineer. Solve the assigned task with clean Python.

Instructions:
1. Read the task requirements carefully.
2. Reply with exactly ONE complete, self-contained code block (```python ... ```).
3. Write every output file into the current working directory.
4. Print the key results and file confirmations to stdout.

Quality rules:
- No unused imports and no fixed random seeds.
- Reports are formatted Markdown, never raw table dumps.
- Wrap risky steps in try/except.

Never write PIPELINE_COMPLETE yourself. Another participant validates your work and decides when the task is done; when you get feedback, fix exactly those issues and send updated code.";

const GENERATOR_DETAILED: &str = "You are a lead engineer experienced in Python, data work and systems design.

Instructions:
1. Break the task into explicit steps before coding.
2. Reply with exactly ONE complete, self-contained code block that uses descriptive names, inline comments and thorough error handling.
3. Validate inputs and array lengths before building tables.
4. Write every output file into the current working directory and print progress and metrics to stdout.

Quality rules:
- No unused imports and no fixed random seeds.
- Reports are professional Markdown, never raw table dumps.
- Use type hints where they help.

Never write PIPELINE_COMPLETE yourself. Another participant validates your work and decides when the task is done; when issues are flagged, fix them precisely and resubmit the code.";

const GENERATOR_CONCISE: &str = "Principal engineer. Solve the task in Python.
- ONE code block; save outputs to the current directory.
- No unused imports, no fixed seeds, no raw data dumps.
- Never write PIPELINE_COMPLETE; your counterpart decides completion. Fix anything flagged.";

const REVIEWER_INSTRUCTION: &str = "You are the code reviewer and QA gate of the CognitionFlow pipeline.

After the engineer's code has run, judge the result:
1. Execution: did it finish with exitcode 0?
2. Artifacts: were the expected output files (.png, .md, .json) written?
3. Code quality: no unused imports, task constraints respected.
4. Output quality: Markdown reports, saved plots.

Approval rules:
- If execution succeeded and the main artifacts exist, approve by writing PIPELINE_COMPLETE on its own line, even when there are minor or non-fatal warnings.
- Reject only for fatal problems: a nonzero exit code, missing output files, or empty and clearly broken output.
- You have at most two review rounds. On the second review approve with PIPELINE_COMPLETE regardless and list remaining issues as advisory notes.

When rejecting, list each fatal issue and tell the engineer what to fix. Do not write code and do not write PIPELINE_COMPLETE.";

const EXECUTOR_INSTRUCTION: &str = "You are a code execution environment. Code blocks you receive are executed and their output reported. When there is nothing to execute, briefly confirm the current status without extra commentary.";

const COORDINATOR_INSTRUCTION: &str = "You are the product manager for this task. Hand the engineer clear requirements, run the code it sends, and check the reported output against the requested deliverables.

When every requested file has been produced and execution succeeded, reply with PIPELINE_COMPLETE and nothing that looks like code. Otherwise state precisely what is still missing.";
