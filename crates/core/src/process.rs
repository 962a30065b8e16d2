//! Bounded execution of external tools.
//!
//! Every external process (yt-dlp, ffmpeg, ffprobe) runs through
//! [`run_bounded`], which captures output and kills the child when the
//! timeout expires so a stalled tool never holds a worker indefinitely.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Maximum number of stderr lines kept in an excerpt.
const EXCERPT_LINES: usize = 20;

/// Maximum number of characters kept in an excerpt.
const EXCERPT_CHARS: usize = 2000;

/// Errors from spawning or waiting on an external process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Executable not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to run {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} timed out after {timeout_secs} seconds")]
    TimedOut { path: PathBuf, timeout_secs: u64 },
}

/// Structured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, `None` if terminated by a signal.
    pub status_code: Option<i32>,
    pub stdout: String,
    /// Full stderr text.
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    /// Tail of stderr, suitable for logs and failure reports.
    pub fn stderr_excerpt(&self) -> String {
        excerpt(&self.stderr)
    }
}

/// Runs `program args...` to completion or until `limit` expires.
pub async fn run_bounded<I, S>(
    program: &Path,
    args: I,
    limit: Duration,
) -> Result<ProcessOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let start = Instant::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    // Dropping the future on timeout drops the child, which kills it.
    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ProcessOutput {
            status_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
        }),
        Ok(Err(e)) => Err(ProcessError::Spawn {
            path: program.to_path_buf(),
            source: e,
        }),
        Err(_) => Err(ProcessError::TimedOut {
            path: program.to_path_buf(),
            timeout_secs: limit.as_secs(),
        }),
    }
}

/// Checks that an executable can be started (`<program> -version`-style probe).
pub async fn check_executable(program: &Path, version_arg: &str) -> Result<(), ProcessError> {
    let output = run_bounded(program, [version_arg], Duration::from_secs(30)).await?;
    if output.status_code.is_none() {
        return Err(ProcessError::Spawn {
            path: program.to_path_buf(),
            source: std::io::Error::other("terminated by signal"),
        });
    }
    Ok(())
}

fn spawn_error(program: &Path, e: std::io::Error) -> ProcessError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ProcessError::NotFound {
            path: program.to_path_buf(),
        }
    } else {
        ProcessError::Spawn {
            path: program.to_path_buf(),
            source: e,
        }
    }
}

/// Last [`EXCERPT_LINES`] non-empty lines, capped at [`EXCERPT_CHARS`].
pub fn excerpt(text: &str) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = &lines[lines.len().saturating_sub(EXCERPT_LINES)..];
    let joined = tail.join("\n");
    if joined.chars().count() <= EXCERPT_CHARS {
        return joined;
    }
    let skip = joined.chars().count() - EXCERPT_CHARS;
    joined.chars().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_keeps_tail() {
        let text: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let ex = excerpt(&text);
        assert!(ex.starts_with("line 30"));
        assert!(ex.ends_with("line 49"));
    }

    #[test]
    fn test_excerpt_caps_length() {
        let text = "x".repeat(10_000);
        assert_eq!(excerpt(&text).len(), EXCERPT_CHARS);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let result = run_bounded(
            Path::new("/nonexistent/definitely-not-a-binary"),
            ["-version"],
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProcessError::NotFound { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_exit_status() {
        let output = run_bounded(
            Path::new("sh"),
            ["-c", "echo out; echo err >&2; exit 3"],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(output.status_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr_excerpt(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let result = run_bounded(
            Path::new("sh"),
            ["-c", "sleep 5"],
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(result, Err(ProcessError::TimedOut { .. })));
    }
}
