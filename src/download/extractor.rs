//! Invocation of the external media extraction tool.
//!
//! [`ExtractionInvoker`] runs the tool with a preferred-quality format
//! selector and, only when the tool reports that format as unavailable, once
//! more with a permissive one. Each strategy is retried independently by the
//! configured [`RetryPolicy`].
//!
//! The tool is abstracted behind [`MediaTool`] so tests can substitute a fake.
//! [`YtDlpTool`] is the production implementation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::error::ExtractionError;
use super::retry::RetryPolicy;

/// Default extraction tool binary.
pub const DEFAULT_TOOL_PROGRAM: &str = "yt-dlp";

/// File name fragments that mark a download still in progress.
pub const PARTIAL_MARKERS: &[&str] = &[".part", ".ytdl", ".temp", ".tmp"];

/// Format selection strategy for one extraction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStrategy {
    /// Best quality up to 720p, preferring free formats.
    Preferred,
    /// Anything the source offers.
    Fallback,
}

impl FormatStrategy {
    /// Format selector passed to the tool's `-f` flag.
    #[must_use]
    pub fn selector(self) -> &'static str {
        match self {
            Self::Preferred => "bv*[height<=720]+ba/b[height<=720]",
            Self::Fallback => "bv*+ba/b/bv*/ba*",
        }
    }

    /// Extra flags that accompany the selector.
    #[must_use]
    pub fn extra_args(self) -> &'static [&'static str] {
        match self {
            Self::Preferred => &["--prefer-free-formats"],
            Self::Fallback => &[],
        }
    }

    /// Returns the strategy as a short label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preferred => "preferred",
            Self::Fallback => "fallback",
        }
    }
}

/// One request to the extraction tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Source URL.
    pub url: String,
    /// Directory the tool writes into.
    pub output_dir: PathBuf,
    /// Unique per-request file name prefix.
    pub prefix: String,
    /// Format selection for this pass.
    pub strategy: FormatStrategy,
}

impl ToolInvocation {
    /// Output template: `<dir>/<prefix>.<ext>`.
    #[must_use]
    pub fn output_template(&self) -> PathBuf {
        self.output_dir.join(format!("{}.%(ext)s", self.prefix))
    }
}

/// What the tool reported on success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Media title, when the tool printed one.
    pub title: Option<String>,
}

/// An external program that downloads media to disk.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Runs one extraction pass.
    ///
    /// Implementations must leave the artifact in `invocation.output_dir`
    /// with a name starting with `invocation.prefix`, and must stop any child
    /// work when the returned future is dropped.
    async fn fetch(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ExtractionError>;
}

/// `yt-dlp` run as a subprocess.
#[derive(Debug, Clone)]
pub struct YtDlpTool {
    program: String,
}

impl Default for YtDlpTool {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_PROGRAM)
    }
}

impl YtDlpTool {
    /// Uses `program` as the tool binary (a name on `PATH` or a path).
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Returns the configured binary.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn args(invocation: &ToolInvocation) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            invocation.strategy.selector().to_string(),
        ];
        args.extend(
            invocation
                .strategy
                .extra_args()
                .iter()
                .map(|a| (*a).to_string()),
        );
        args.extend(
            [
                "--no-playlist",
                "--no-warnings",
                "--restrict-filenames",
                "--no-simulate",
                "--print",
                "after_move:title",
                "-o",
            ]
            .iter()
            .map(|a| (*a).to_string()),
        );
        args.push(invocation.output_template().to_string_lossy().into_owned());
        args.push("--".to_string());
        args.push(invocation.url.clone());
        args
    }
}

#[async_trait]
impl MediaTool for YtDlpTool {
    #[instrument(skip(self, invocation), fields(program = %self.program, strategy = invocation.strategy.as_str()))]
    async fn fetch(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ExtractionError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(Self::args(invocation))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|source| ExtractionError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::from_tool_output(
                output.status.code(),
                &stderr,
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let title = stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(str::to_string);
        Ok(ToolOutput { title })
    }
}

/// A finished artifact located on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Path to the artifact.
    pub path: PathBuf,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Media title reported by the tool.
    pub title: Option<String>,
}

/// Runs the extraction tool with retry and format fallback.
#[derive(Clone)]
pub struct ExtractionInvoker {
    tool: Arc<dyn MediaTool>,
    retry: RetryPolicy,
    output_dir: PathBuf,
}

impl std::fmt::Debug for ExtractionInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionInvoker")
            .field("retry", &self.retry)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl ExtractionInvoker {
    /// Creates an invoker writing into `output_dir`.
    #[must_use]
    pub fn new(tool: Arc<dyn MediaTool>, retry: RetryPolicy, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            retry,
            output_dir: output_dir.into(),
        }
    }

    /// Returns the directory artifacts are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Extracts `url` into a file named with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns the last [`ExtractionError`] when both strategies fail (or the
    /// preferred one fails for a reason other than format availability), and
    /// [`ExtractionError::ArtifactMissing`] when the tool succeeded but left
    /// no finished file behind.
    #[instrument(skip(self), fields(output_dir = %self.output_dir.display()))]
    pub async fn invoke(&self, url: &str, prefix: &str) -> Result<ExtractedFile, ExtractionError> {
        let output = match self.attempt(url, prefix, FormatStrategy::Preferred).await {
            Ok(output) => output,
            Err(e) if e.is_format_unavailable() => {
                warn!(error = %e, "preferred format unavailable, falling back");
                self.attempt(url, prefix, FormatStrategy::Fallback).await?
            }
            Err(e) => return Err(e),
        };

        let path = locate_artifact(&self.output_dir, prefix).await?;
        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ExtractionError::io(&path, e))?
            .len();

        info!(path = %path.display(), size_bytes, "extraction finished");
        Ok(ExtractedFile {
            path,
            size_bytes,
            title: output.title,
        })
    }

    async fn attempt(
        &self,
        url: &str,
        prefix: &str,
        strategy: FormatStrategy,
    ) -> Result<ToolOutput, ExtractionError> {
        let invocation = ToolInvocation {
            url: url.to_string(),
            output_dir: self.output_dir.clone(),
            prefix: prefix.to_string(),
            strategy,
        };
        debug!(strategy = strategy.as_str(), "running extraction tool");

        self.retry
            .run_with(
                |_| self.tool.fetch(&invocation),
                ExtractionError::is_retryable,
            )
            .await
            .map_err(ExtractionError::from)
    }
}

/// Returns true when `name` looks like an in-progress download.
#[must_use]
pub fn is_partial_file(name: &str) -> bool {
    PARTIAL_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Finds the finished file in `dir` whose name starts with `prefix`.
///
/// # Errors
///
/// Returns [`ExtractionError::ArtifactMissing`] if no such file exists and
/// [`ExtractionError::Io`] if the directory cannot be read.
pub async fn locate_artifact(dir: &Path, prefix: &str) -> Result<PathBuf, ExtractionError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ExtractionError::io(dir, e))?;

    let mut found: Option<PathBuf> = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ExtractionError::io(dir, e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(prefix) || is_partial_file(name) {
            continue;
        }
        if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
            continue;
        }
        // Deterministic pick if the tool left more than one finished file.
        let path = entry.path();
        if found.as_ref().is_none_or(|current| path < *current) {
            found = Some(path);
        }
    }

    found.ok_or_else(|| ExtractionError::ArtifactMissing {
        dir: dir.to_path_buf(),
        prefix: prefix.to_string(),
    })
}
