//! Artifact discovery.
//!
//! Runs communicate results by dropping files into their working directory. The scanner
//! lists those files (one level deep, regular files only) and tags each with an
//! [`ArtifactKind`] derived from its extension. It keeps no state between scans.
//!
//! ```rust
//! use cognitionflow::artifacts::{scan_artifacts, ArtifactKind};
//!
//! let dir = tempfile::tempdir().unwrap();
//! std::fs::write(dir.path().join("report.md"), "# Report").unwrap();
//! std::fs::write(dir.path().join("chart.png"), [0x89, b'P', b'N', b'G']).unwrap();
//!
//! let found = scan_artifacts(dir.path());
//! assert_eq!(found.len(), 2);
//! assert_eq!(found[0].name, "chart.png");
//! assert_eq!(found[0].kind, ArtifactKind::Image);
//! assert_eq!(found[1].kind, ArtifactKind::Markdown);
//!
//! assert!(scan_artifacts(dir.path().join("missing")).is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Type tag derived from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Markdown,
    Json,
    Code,
    Text,
    Tabular,
    Html,
    /// Anything not in the extension table.
    #[serde(rename = "file")]
    Generic,
}

impl ArtifactKind {
    /// Map a file extension (without the dot, any case) to its kind.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "bmp" => ArtifactKind::Image,
            "md" | "markdown" => ArtifactKind::Markdown,
            "json" => ArtifactKind::Json,
            "py" | "rs" | "js" | "ts" | "sh" | "bash" | "r" | "sql" | "java" | "go" | "c"
            | "cpp" | "h" => ArtifactKind::Code,
            "txt" | "log" => ArtifactKind::Text,
            "csv" | "tsv" | "xlsx" | "xls" | "parquet" => ArtifactKind::Tabular,
            "html" | "htm" => ArtifactKind::Html,
            _ => ArtifactKind::Generic,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(ArtifactKind::Generic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Markdown => "markdown",
            ArtifactKind::Json => "json",
            ArtifactKind::Code => "code",
            ArtifactKind::Text => "text",
            ArtifactKind::Tabular => "tabular",
            ArtifactKind::Html => "html",
            ArtifactKind::Generic => "file",
        }
    }

    /// MIME type used when serving an artifact of this kind.
    pub fn content_type(&self, path: &Path) -> &'static str {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match self {
            ArtifactKind::Image => match ext.as_str() {
                "jpg" | "jpeg" => "image/jpeg",
                "gif" => "image/gif",
                "svg" => "image/svg+xml",
                "webp" => "image/webp",
                "bmp" => "image/bmp",
                _ => "image/png",
            },
            ArtifactKind::Markdown => "text/markdown; charset=utf-8",
            ArtifactKind::Json => "application/json",
            ArtifactKind::Html => "text/html; charset=utf-8",
            ArtifactKind::Tabular if ext == "csv" => "text/csv; charset=utf-8",
            ArtifactKind::Code | ArtifactKind::Text => "text/plain; charset=utf-8",
            ArtifactKind::Tabular | ArtifactKind::Generic => "application/octet-stream",
        }
    }
}

/// A file found in a run's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Base file name.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub size_bytes: u64,
}

/// List regular files directly inside `dir`, sorted by name.
///
/// Never fails: a missing or unreadable directory yields an empty list and entries that
/// cannot be inspected are skipped.
pub fn scan_artifacts(dir: impl AsRef<Path>) -> Vec<Artifact> {
    let dir = dir.as_ref();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("artifact scan skipped for {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let base = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());

    let mut artifacts: Vec<Artifact> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            // file_type() does not follow symlinks; metadata() below does.
            let metadata = fs::metadata(entry.path()).ok()?;
            if !metadata.is_file() {
                return None;
            }
            let name = entry.file_name().to_str()?.to_string();
            let path = base.join(&name);
            Some(Artifact {
                kind: ArtifactKind::from_path(&path),
                path,
                name,
                size_bytes: metadata.len(),
            })
        })
        .collect();

    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    artifacts
}

/// Resolve `name` to a file directly inside `dir`, rejecting anything that would escape it.
pub fn resolve_artifact(dir: impl AsRef<Path>, name: &str) -> Option<Artifact> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".."
    {
        return None;
    }
    scan_artifacts(dir).into_iter().find(|a| a.name == name)
}
