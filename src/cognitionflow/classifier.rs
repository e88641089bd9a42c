//! Message classification.
//!
//! Every turn produced during a run is tagged with a [`Classification`] and, when it carries
//! fenced code, the extracted [`CodeFragment`]s. Classification is a pure function of the
//! text: the same content always yields the same result, so a stored turn can be reclassified
//! at any time.
//!
//! Precedence, highest first:
//!
//! 1. **completion**: the completion token appears and the text holds no fence delimiter.
//! 2. **execution output**: a sandbox marker such as `exitcode:` appears (case-insensitive).
//! 3. **code-bearing**: at least one complete fenced block was extracted.
//! 4. **plain**: everything else.
//!
//! ```rust
//! use cognitionflow::classifier::{classify, Classification};
//!
//! let msg = classify("```python\nprint('hi')\n```");
//! assert_eq!(msg.classification, Classification::CodeBearing);
//! assert_eq!(msg.fragments[0].language.as_deref(), Some("python"));
//! assert_eq!(msg.fragments[0].code, "print('hi')");
//!
//! // A completion token next to code does not terminate the conversation.
//! let msg = classify("PIPELINE_COMPLETE\n```python\nx = 1\n```");
//! assert_eq!(msg.classification, Classification::CodeBearing);
//! ```

use serde::{Deserialize, Serialize};

/// Reserved token a reviewer emits to end the conversation.
pub const DEFAULT_COMPLETION_TOKEN: &str = "PIPELINE_COMPLETE";

/// Markers produced by the execution sandbox at the start of its report.
pub const DEFAULT_EXECUTION_MARKERS: &[&str] = &["exitcode:", "exit code:"];

const FENCE: &str = "```";

/// Category of a turn's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Plain,
    CodeBearing,
    ExecutionOutput,
    Completion,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Plain => "plain",
            Classification::CodeBearing => "code_bearing",
            Classification::ExecutionOutput => "execution_output",
            Classification::Completion => "completion",
        }
    }
}

/// A contiguous block of code taken from a fenced region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFragment {
    /// Language tag following the opening fence, if any (`python`, `bash`, ...).
    pub language: Option<String>,
    /// Lines between the fences, joined with `\n` and otherwise untouched.
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedMessage {
    pub classification: Classification,
    pub fragments: Vec<CodeFragment>,
}

/// Configurable classifier. Use [`classify`] for the default token and markers.
#[derive(Debug, Clone)]
pub struct MessageClassifier {
    completion_token: String,
    execution_markers: Vec<String>,
}

impl Default for MessageClassifier {
    fn default() -> Self {
        Self {
            completion_token: DEFAULT_COMPLETION_TOKEN.to_string(),
            execution_markers: DEFAULT_EXECUTION_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl MessageClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion_token(mut self, token: impl Into<String>) -> Self {
        self.completion_token = token.into();
        self
    }

    /// Replace the execution markers. Matching is case-insensitive.
    pub fn with_execution_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execution_markers = markers
            .into_iter()
            .map(|m| m.into().to_lowercase())
            .collect();
        self
    }

    pub fn completion_token(&self) -> &str {
        &self.completion_token
    }

    pub fn classify(&self, text: &str) -> ClassifiedMessage {
        let fragments = extract_fragments(text);

        let classification = if self.is_completion(text) {
            Classification::Completion
        } else if self.is_execution_output(text) {
            Classification::ExecutionOutput
        } else if !fragments.is_empty() {
            Classification::CodeBearing
        } else {
            Classification::Plain
        };

        ClassifiedMessage {
            classification,
            fragments,
        }
    }

    /// True when the text carries the completion token and no fence delimiter at all.
    pub fn is_completion(&self, text: &str) -> bool {
        !self.completion_token.is_empty()
            && text.contains(&self.completion_token)
            && !text.contains(FENCE)
    }

    fn is_execution_output(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.execution_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
    }
}

/// Classify with the default completion token and execution markers.
pub fn classify(text: &str) -> ClassifiedMessage {
    MessageClassifier::default().classify(text)
}

/// Extract every terminated fenced block from `text`.
///
/// An opening fence is a line whose trimmed-start form begins with three backticks; the rest
/// of that line is the language tag. The block closes on the next line that is exactly three
/// backticks after trimming. A block left open at end of input yields nothing.
pub fn extract_fragments(text: &str) -> Vec<CodeFragment> {
    let mut fragments = Vec::new();
    let mut open: Option<(Option<String>, Vec<&str>)> = None;

    for line in text.lines() {
        match open.take() {
            None => {
                if let Some(rest) = line.trim_start().strip_prefix(FENCE) {
                    let tag = rest.trim();
                    let language = if tag.is_empty() {
                        None
                    } else {
                        Some(tag.to_string())
                    };
                    open = Some((language, Vec::new()));
                }
            }
            Some((language, mut lines)) => {
                if line.trim() == FENCE {
                    fragments.push(CodeFragment {
                        language,
                        code: lines.join("\n"),
                    });
                } else {
                    lines.push(line);
                    open = Some((language, lines));
                }
            }
        }
    }

    fragments
}
