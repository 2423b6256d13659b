use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{MediaError, MediaResult};

/// Runs an external tool bounded by a timeout. A timed-out invocation is
/// reported as [`MediaError::Timeout`] so callers can treat it like any
/// other per-attempt failure instead of hanging the job.
pub async fn run_tool(tool: &str, command: &mut Command, limit: Duration) -> MediaResult<Output> {
    debug!(target: "media", tool, "invoking external tool");
    let child = command
        .kill_on_drop(true)
        .output();
    match timeout(limit, child).await {
        Ok(result) => result.map_err(|source| MediaError::io(tool, source)),
        Err(_) => Err(MediaError::Timeout {
            tool: tool.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

/// Collapses a non-zero exit into an error message carrying the tail of
/// stderr, which is where ffmpeg and friends put the useful part.
pub fn status_error(tool: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: String = stderr
        .lines()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join(" | ");
    format!(
        "{tool} exited with {}: {}",
        output
            .status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string()),
        tail
    )
}
