//! Configuration for CognitionFlow.
//!
//! Two plain structs cover everything the service needs:
//!
//! - [`LlmConfig`]: which OpenAI-compatible endpoint to call, with which key, model,
//!   temperature and timeout.
//! - [`CognitionFlowConfig`]: where runs write their artifacts, where run history is
//!   persisted, how many runs may execute at once and where the HTTP service binds.
//!
//! Both can be built by hand or read from the environment. `from_env` first loads a `.env`
//! file from the working directory (if any) through `dotenvy`, without overriding variables
//! already set, then reads process variables. `from_lookup` accepts any key lookup so tests
//! never touch the real environment; [`read_env_file`] turns a `.env` file into such a lookup.
//!
//! # Example
//!
//! ```rust
//! use cognitionflow::config::{LlmConfig, LlmProvider};
//!
//! let vars = [("GROQ_API_KEY", "gsk-test")];
//! let cfg = LlmConfig::from_lookup(|key| {
//!     vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
//! })
//! .unwrap();
//!
//! assert_eq!(cfg.provider, LlmProvider::Groq);
//! assert_eq!(cfg.base_url, "https://api.groq.com/openai/v1");
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Errors raised while building configuration.
///
/// These are fatal before any run starts: no partial run is created when the
/// completion provider cannot be configured.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Neither `GROQ_API_KEY` nor `OPENAI_API_KEY` is set.
    MissingCredentials,
    /// A variable was present but could not be parsed.
    InvalidValue { key: String, value: String },
    /// A `.env` file could not be read or contains a malformed line.
    EnvFile(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingCredentials => {
                write!(f, "Set GROQ_API_KEY or OPENAI_API_KEY in environment or .env")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value for {}: {:?}", key, value)
            }
            ConfigError::EnvFile(msg) => write!(f, "Could not load env file: {}", msg),
        }
    }
}

impl Error for ConfigError {}

/// Load `.env` from the working directory into the process environment.
///
/// Variables that are already set keep their value; a missing file is not an error.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        log::debug!("loaded environment from {}", path.display());
    }
}

/// Parse a `.env` file into a key/value map without touching the process environment.
///
/// # Example
///
/// ```rust,no_run
/// use cognitionflow::config::{read_env_file, LlmConfig};
///
/// let vars = read_env_file(".env.staging").unwrap();
/// let cfg = LlmConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
/// println!("using {}", cfg.model);
/// ```
pub fn read_env_file(path: impl AsRef<Path>) -> Result<HashMap<String, String>, ConfigError> {
    let path = path.as_ref();
    let entries = dotenvy::from_path_iter(path)
        .map_err(|e| ConfigError::EnvFile(format!("{}: {}", path.display(), e)))?;

    let mut vars = HashMap::new();
    for entry in entries {
        let (key, value) =
            entry.map_err(|e| ConfigError::EnvFile(format!("{}: {}", path.display(), e)))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// Which hosted API the credentials belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Groq,
    OpenAI,
}

/// Connection settings for the completion provider.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub model: String,
    /// Base URL including the version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Build the config from the process environment.
    ///
    /// Prefers `GROQ_API_KEY` (Groq); falls back to `OPENAI_API_KEY` (OpenAI). A `.env`
    /// file in the working directory is loaded first.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(api_key) = get("GROQ_API_KEY") {
            return Ok(Self {
                provider: LlmProvider::Groq,
                api_key,
                model: get("GROQ_MODEL").unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string()),
                base_url: GROQ_BASE_URL.to_string(),
                temperature: parse_or("GROQ_TEMPERATURE", get("GROQ_TEMPERATURE"), DEFAULT_TEMPERATURE)?,
                timeout_secs: parse_or("GROQ_TIMEOUT", get("GROQ_TIMEOUT"), DEFAULT_TIMEOUT_SECS)?,
            });
        }

        if let Some(api_key) = get("OPENAI_API_KEY") {
            return Ok(Self {
                provider: LlmProvider::OpenAI,
                api_key,
                model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                temperature: parse_or(
                    "OPENAI_TEMPERATURE",
                    get("OPENAI_TEMPERATURE"),
                    DEFAULT_TEMPERATURE,
                )?,
                timeout_secs: parse_or("OPENAI_TIMEOUT", get("OPENAI_TIMEOUT"), DEFAULT_TIMEOUT_SECS)?,
            });
        }

        Err(ConfigError::MissingCredentials)
    }

    /// Apply per-run overrides chosen by the caller (builder pattern).
    ///
    /// ```rust
    /// use cognitionflow::config::{LlmConfig, LlmProvider};
    ///
    /// let cfg = LlmConfig {
    ///     provider: LlmProvider::OpenAI,
    ///     api_key: "sk".into(),
    ///     model: "gpt-4o".into(),
    ///     base_url: "https://api.openai.com/v1".into(),
    ///     temperature: 0.1,
    ///     timeout_secs: 600,
    /// }
    /// .with_overrides(Some("gpt-4.1-mini"), Some(0.7));
    ///
    /// assert_eq!(cfg.model, "gpt-4.1-mini");
    /// assert_eq!(cfg.temperature, 0.7);
    /// ```
    pub fn with_overrides(mut self, model: Option<&str>, temperature: Option<f32>) -> Self {
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.model = model.to_string();
        }
        if let Some(temperature) = temperature {
            self.temperature = temperature;
        }
        self
    }
}

/// Service-level settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CognitionFlowConfig {
    /// Parent directory; every run gets `<workspace_dir>/<run_id>`.
    pub workspace_dir: PathBuf,
    /// JSONL file holding run history.
    pub run_store_path: PathBuf,
    /// Upper bound on concurrently executing runs.
    pub max_concurrent_runs: usize,
    /// Socket address for the HTTP service.
    pub bind_addr: String,
}

impl Default for CognitionFlowConfig {
    /// Defaults: `project_workspace`, `data/runs.jsonl`, two concurrent runs, port 8000.
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("project_workspace"),
            run_store_path: PathBuf::from("data/runs.jsonl"),
            max_concurrent_runs: 2,
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl CognitionFlowConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_concurrent_runs = parse_or(
            "COGNITIONFLOW_MAX_CONCURRENT",
            get("COGNITIONFLOW_MAX_CONCURRENT"),
            defaults.max_concurrent_runs,
        )?;
        if max_concurrent_runs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "COGNITIONFLOW_MAX_CONCURRENT".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Self {
            workspace_dir: get("COGNITIONFLOW_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_dir),
            run_store_path: get("COGNITIONFLOW_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.run_store_path),
            max_concurrent_runs,
            bind_addr: get("COGNITIONFLOW_BIND").unwrap_or(defaults.bind_addr),
        })
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
    }
}
