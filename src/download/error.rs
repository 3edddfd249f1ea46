//! Error types for the download module.
//!
//! [`ExtractionError`] describes what went wrong talking to the external
//! extraction tool. [`FetchError`] is the request-level taxonomy the
//! orchestrator reports; each variant maps to one HTTP status.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::gate::GateError;
use super::retry::RetryError;

/// Stderr fragments the extraction tool prints when the requested format
/// selector matched nothing.
const FORMAT_UNAVAILABLE_MARKERS: &[&str] = &[
    "requested format is not available",
    "requested format not available",
    "no video formats found",
];

/// Stderr fragments that mean retrying cannot help.
const PERMANENT_FAILURE_MARKERS: &[&str] = &[
    "unsupported url",
    "private video",
    "video unavailable",
    "this video is not available",
    "has been removed",
    "sign in to confirm your age",
    "is not a valid url",
];

/// Stderr fragments that point at the network rather than the content.
const NETWORK_FAILURE_MARKERS: &[&str] = &[
    "network",
    "connection",
    "timed out",
    "temporary failure in name resolution",
    "name or service not known",
    "getaddrinfo",
    "unable to download webpage",
    "econnreset",
    "http error 502",
    "http error 503",
    "http error 504",
];

/// Errors that can occur while running the extraction tool.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The tool could not satisfy the format selector.
    #[error("requested format not available: {message}")]
    FormatUnavailable {
        /// Last line the tool printed to stderr.
        message: String,
    },

    /// The tool exited unsuccessfully.
    #[error("extraction tool failed (exit code {code:?}): {message}")]
    ToolFailed {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Last line the tool printed to stderr.
        message: String,
    },

    /// The tool binary could not be started.
    #[error("failed to start extraction tool {program}: {source}")]
    Spawn {
        /// Program that was executed.
        program: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Every attempt ran past the per-attempt timeout.
    #[error("extraction timed out after {attempts} attempt(s) of {timeout:?}")]
    Timeout {
        /// Attempts made.
        attempts: u32,
        /// Per-attempt timeout.
        timeout: Duration,
    },

    /// The tool reported success but no finished artifact was found.
    #[error("no artifact with prefix {prefix} found in {}", .dir.display())]
    ArtifactMissing {
        /// Directory that was scanned.
        dir: PathBuf,
        /// Unique request prefix that was searched for.
        prefix: String,
    },

    /// File system error while locating or inspecting the artifact.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ExtractionError {
    /// Builds the right variant from a failed tool run's stderr.
    #[must_use]
    pub fn from_tool_output(code: Option<i32>, stderr: &str) -> Self {
        let message = last_error_line(stderr);
        let lowered = stderr.to_lowercase();
        if FORMAT_UNAVAILABLE_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            Self::FormatUnavailable { message }
        } else {
            Self::ToolFailed { code, message }
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true when the format selector was the problem.
    #[must_use]
    pub fn is_format_unavailable(&self) -> bool {
        matches!(self, Self::FormatUnavailable { .. })
    }

    /// Whether another attempt with the same arguments could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ToolFailed { message, .. } => !contains_any(message, PERMANENT_FAILURE_MARKERS),
            Self::Timeout { .. } => true,
            Self::FormatUnavailable { .. }
            | Self::Spawn { .. }
            | Self::ArtifactMissing { .. }
            | Self::Io { .. } => false,
        }
    }

    /// Whether the failure message reads like a network problem.
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            Self::ToolFailed { message, .. } => contains_any(message, NETWORK_FAILURE_MARKERS),
            _ => false,
        }
    }
}

impl From<RetryError<ExtractionError>> for ExtractionError {
    fn from(error: RetryError<ExtractionError>) -> Self {
        match error {
            RetryError::TimedOut { attempts, timeout } => Self::Timeout { attempts, timeout },
            RetryError::Failed { error, .. } => error,
        }
    }
}

fn contains_any(message: &str, markers: &[&str]) -> bool {
    let lowered = message.to_lowercase();
    markers.iter().any(|marker| lowered.contains(marker))
}

/// Picks the most useful line from tool stderr: the last `ERROR:` line if
/// any, otherwise the last non-empty line.
fn last_error_line(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|l| l.trim_start_matches("ERROR:").trim().to_string())
        .unwrap_or_else(|| "no output".to_string())
}

/// Request-level failures reported by the orchestrator.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP method is not the download method.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Missing or malformed URL, or unreadable request body.
    #[error("{0}")]
    InvalidRequest(String),

    /// The URL's host is not on the allow-list.
    #[error("Domain not allowed: {host}")]
    DomainNotAllowed {
        /// Host that was rejected.
        host: String,
    },

    /// The client exhausted its rate window.
    #[error("Too many requests. Please try again in {retry_after_secs} seconds.")]
    RateLimited {
        /// Whole seconds until the window resets.
        retry_after_secs: u64,
    },

    /// Every slot stayed taken for the whole admission wait.
    #[error("Server is busy. Please try again shortly.")]
    Busy {
        /// Slots in use.
        active: usize,
        /// Configured slot count.
        max_concurrent: usize,
    },

    /// Extraction ran past its per-attempt timeout on every attempt.
    #[error("Download timed out. The media may be too long or the source too slow.")]
    ExtractionTimeout,

    /// The extraction tool failed after retries and fallback.
    #[error("Failed to download media. It may be private, removed, or unavailable.")]
    ExtractionFailed,

    /// The artifact exceeds the hard size ceiling.
    #[error("File too large ({size_bytes} bytes, limit {max_bytes} bytes)")]
    ArtifactTooLarge {
        /// Size of the produced artifact.
        size_bytes: u64,
        /// Configured ceiling.
        max_bytes: u64,
    },

    /// The tool failed in a way that looks like a network problem.
    #[error("Network error while fetching media. Please try again.")]
    Network,

    /// Anything unclassified.
    #[error("Internal server error")]
    Internal(String),
}

impl FetchError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MethodNotAllowed => 405,
            Self::InvalidRequest(_) | Self::DomainNotAllowed { .. } => 400,
            Self::RateLimited { .. } => 429,
            Self::Busy { .. } | Self::Network => 503,
            Self::ExtractionTimeout => 408,
            Self::ArtifactTooLarge { .. } => 413,
            Self::ExtractionFailed | Self::Internal(_) => 500,
        }
    }

    /// Seconds the client should wait before retrying, when known.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::Busy { .. } => Some(5),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed => "method_not_allowed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::DomainNotAllowed { .. } => "domain_not_allowed",
            Self::RateLimited { .. } => "rate_limited",
            Self::Busy { .. } => "busy",
            Self::ExtractionTimeout => "extraction_timeout",
            Self::ExtractionFailed => "extraction_failed",
            Self::ArtifactTooLarge { .. } => "artifact_too_large",
            Self::Network => "network",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<GateError> for FetchError {
    fn from(error: GateError) -> Self {
        match error {
            GateError::Busy {
                active,
                max_concurrent,
            } => Self::Busy {
                active,
                max_concurrent,
            },
        }
    }
}

impl From<ExtractionError> for FetchError {
    fn from(error: ExtractionError) -> Self {
        match error {
            ExtractionError::Timeout { .. } => Self::ExtractionTimeout,
            ref e if e.is_network() => Self::Network,
            ExtractionError::FormatUnavailable { .. }
            | ExtractionError::ToolFailed { .. }
            | ExtractionError::ArtifactMissing { .. } => Self::ExtractionFailed,
            ExtractionError::Spawn { .. } | ExtractionError::Io { .. } => {
                Self::Internal(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tool_output_detects_format_unavailable() {
        let stderr = "[youtube] abc: Downloading webpage\nERROR: [youtube] abc: Requested format is not available. Use --list-formats\n";
        let err = ExtractionError::from_tool_output(Some(1), stderr);
        assert!(err.is_format_unavailable());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_tool_output_keeps_last_error_line() {
        let stderr = "WARNING: something\nERROR: [generic] Unsupported URL: https://x\n";
        match ExtractionError::from_tool_output(Some(1), stderr) {
            ExtractionError::ToolFailed { code, message } => {
                assert_eq!(code, Some(1));
                assert_eq!(message, "[generic] Unsupported URL: https://x");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_from_tool_output_empty_stderr() {
        match ExtractionError::from_tool_output(None, "") {
            ExtractionError::ToolFailed { message, .. } => assert_eq!(message, "no output"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_permanent_tool_failure_not_retryable() {
        let err = ExtractionError::ToolFailed {
            code: Some(1),
            message: "[youtube] abc: Private video. Sign in if you've been granted access"
                .to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_tool_failure_retryable() {
        let err = ExtractionError::ToolFailed {
            code: Some(1),
            message: "Unable to download webpage: <urlopen error timed out>".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.is_network());
    }

    #[test]
    fn test_fetch_error_status_codes() {
        assert_eq!(FetchError::MethodNotAllowed.status_code(), 405);
        assert_eq!(FetchError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(
            FetchError::DomainNotAllowed {
                host: "evil.test".into()
            }
            .status_code(),
            400
        );
        assert_eq!(
            FetchError::RateLimited {
                retry_after_secs: 3
            }
            .status_code(),
            429
        );
        assert_eq!(
            FetchError::Busy {
                active: 3,
                max_concurrent: 3
            }
            .status_code(),
            503
        );
        assert_eq!(FetchError::ExtractionTimeout.status_code(), 408);
        assert_eq!(FetchError::ExtractionFailed.status_code(), 500);
        assert_eq!(
            FetchError::ArtifactTooLarge {
                size_bytes: 2,
                max_bytes: 1
            }
            .status_code(),
            413
        );
        assert_eq!(FetchError::Network.status_code(), 503);
        assert_eq!(FetchError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_extraction_error_classification() {
        let timeout = ExtractionError::Timeout {
            attempts: 3,
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            FetchError::from(timeout),
            FetchError::ExtractionTimeout
        ));

        let network = ExtractionError::ToolFailed {
            code: Some(1),
            message: "Temporary failure in name resolution".into(),
        };
        assert!(matches!(FetchError::from(network), FetchError::Network));

        let failed = ExtractionError::ToolFailed {
            code: Some(1),
            message: "Video unavailable".into(),
        };
        assert!(matches!(
            FetchError::from(failed),
            FetchError::ExtractionFailed
        ));

        let spawn = ExtractionError::Spawn {
            program: "yt-dlp".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(matches!(FetchError::from(spawn), FetchError::Internal(_)));
    }

    #[test]
    fn test_retry_error_unwraps_into_extraction_error() {
        let err: ExtractionError = RetryError::TimedOut {
            attempts: 2,
            timeout: Duration::from_secs(5),
        }
        .into();
        assert!(matches!(err, ExtractionError::Timeout { attempts: 2, .. }));
    }
}
