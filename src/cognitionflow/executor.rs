//! Code execution sandbox.
//!
//! Execution-capable roles hand the code fragments of their incoming turn to a
//! [`CodeExecutor`]. The executor reports back in plain text, starting with an `exitcode:`
//! marker; a failing script is *not* an error, the nonzero code is simply part of the
//! report. Errors are reserved for the sandbox itself breaking (spawn failures, timeouts,
//! I/O).
//!
//! [`LocalCodeExecutor`] runs fragments as child processes inside the run's working
//! directory:
//!
//! ```rust,no_run
//! use cognitionflow::classifier::CodeFragment;
//! use cognitionflow::executor::{CodeExecutor, LocalCodeExecutor};
//! use std::path::Path;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = LocalCodeExecutor::new().with_timeout(30);
//! let report = executor
//!     .execute(
//!         &[CodeFragment { language: Some("bash".into()), code: "echo hello".into() }],
//!         Path::new("/tmp"),
//!     )
//!     .await?;
//! assert!(report.starts_with("exitcode: 0"));
//! # Ok(())
//! # }
//! ```

use crate::cognitionflow::classifier::CodeFragment;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Hidden subdirectory holding the script files, kept out of artifact scans.
pub const SCRIPT_DIR: &str = ".scripts";

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub enum ExecutionError {
    Timeout(String),
    SpawnFailed(String),
    IoError(std::io::Error),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Timeout(msg) => write!(f, "Execution timeout: {}", msg),
            ExecutionError::SpawnFailed(msg) => write!(f, "Failed to start interpreter: {}", msg),
            ExecutionError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<std::io::Error> for ExecutionError {
    fn from(e: std::io::Error) -> Self {
        ExecutionError::IoError(e)
    }
}

/// Runs extracted code and reports what happened.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Execute `fragments` in order inside `work_dir`.
    ///
    /// Returns `exitcode: <n> (execution succeeded|failed)\nCode output: <output>`.
    async fn execute(&self, fragments: &[CodeFragment], work_dir: &Path)
        -> Result<String, ExecutionError>;
}

/// Build the textual execution report.
pub fn format_report(exit_code: i32, output: &str) -> String {
    let outcome = if exit_code == 0 {
        "execution succeeded"
    } else {
        "execution failed"
    };
    format!("exitcode: {} ({})\nCode output: {}", exit_code, outcome, output)
}

/// Interpreter selected for a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguage {
    Python,
    Shell,
}

impl ScriptLanguage {
    /// Untagged fragments are treated as Python.
    pub fn from_tag(tag: Option<&str>) -> Option<Self> {
        match tag.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("python") | Some("py") | Some("python3") => {
                Some(ScriptLanguage::Python)
            }
            Some("bash") | Some("sh") | Some("shell") | Some("console") => {
                Some(ScriptLanguage::Shell)
            }
            _ => None,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ScriptLanguage::Python => "py",
            ScriptLanguage::Shell => "sh",
        }
    }
}

/// Executes fragments as local child processes.
///
/// This is not an isolation boundary: code runs with the privileges of the service.
#[derive(Debug, Clone)]
pub struct LocalCodeExecutor {
    python: String,
    shell: String,
    timeout_secs: u64,
    max_output_bytes: usize,
}

impl Default for LocalCodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCodeExecutor {
    /// Executor using `python3` and `bash` from `PATH`, with the default timeout and
    /// output limit.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cognitionflow::executor::LocalCodeExecutor;
    ///
    /// let executor = LocalCodeExecutor::new()
    ///     .with_timeout(30)
    ///     .with_python("/usr/local/bin/python3.12")
    ///     .with_max_output_bytes(16 * 1024);
    /// assert_eq!(executor.timeout_secs(), 30);
    /// ```
    pub fn new() -> Self {
        Self {
            python: "python3".to_string(),
            shell: "bash".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Wall-clock limit per fragment. A fragment that runs longer is killed and reported
    /// as a timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Interpreter for `python` and untagged fences.
    pub fn with_python(mut self, interpreter: impl Into<String>) -> Self {
        self.python = interpreter.into();
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    async fn write_script(
        &self,
        work_dir: &Path,
        index: usize,
        language: ScriptLanguage,
        code: &str,
    ) -> Result<PathBuf, ExecutionError> {
        let dir = work_dir.join(SCRIPT_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!(
            "fragment_{}_{}.{}",
            index,
            uuid::Uuid::new_v4().simple(),
            language.extension()
        ));
        tokio::fs::write(&path, code).await?;
        Ok(path)
    }

    async fn run_script(
        &self,
        language: ScriptLanguage,
        script: &Path,
        work_dir: &Path,
    ) -> Result<(i32, String), ExecutionError> {
        let program = match language {
            ScriptLanguage::Python => &self.python,
            ScriptLanguage::Shell => &self.shell,
        };

        let child = Command::new(program)
            .arg(script)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", program, e)))?;

        let timeout = Duration::from_secs(self.timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExecutionError::Timeout(format!(
                    "script exceeded {} second timeout",
                    self.timeout_secs
                )))
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.code().unwrap_or(-1), combined))
    }

    fn truncate(&self, mut output: String) -> String {
        if output.len() > self.max_output_bytes {
            let mut cut = self.max_output_bytes;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
            output.push_str("\n...[output truncated]");
        }
        output
    }
}

#[async_trait]
impl CodeExecutor for LocalCodeExecutor {
    async fn execute(
        &self,
        fragments: &[CodeFragment],
        work_dir: &Path,
    ) -> Result<String, ExecutionError> {
        let started = Instant::now();
        let mut output = String::new();
        let mut exit_code = 0;

        for (index, fragment) in fragments.iter().enumerate() {
            let Some(language) = ScriptLanguage::from_tag(fragment.language.as_deref()) else {
                exit_code = 1;
                output.push_str(&format!(
                    "unknown language {}",
                    fragment.language.as_deref().unwrap_or_default()
                ));
                break;
            };

            let script = self
                .write_script(work_dir, index, language, &fragment.code)
                .await?;
            let (code, text) = self.run_script(language, &script, work_dir).await?;
            output.push_str(&text);
            if code != 0 {
                exit_code = code;
                break;
            }
        }

        log::debug!(
            "executed {} fragment(s) in {} ms, exit code {}",
            fragments.len(),
            started.elapsed().as_millis(),
            exit_code
        );

        Ok(format_report(exit_code, &self.truncate(output)))
    }
}
