//! External tool delegation (nmap, traceroute, dig)
//!
//! Tools run as subprocesses under an overall deadline and the operation's
//! cancellation token. Their stdout is parsed line by line; a missing binary
//! is `ToolUnavailable` so callers can degrade to built-in strategies.

pub mod dig;
pub mod nmap;
pub mod traceroute;

pub use dig::Dig;
pub use nmap::NmapScanner;
pub use traceroute::{TraceHop, Traceroute};

use crate::ScanError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Captured output of one tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Run `program args...`, returning `Ok(None)` if cancelled first.
///
/// The child is killed when the deadline elapses or the token fires.
pub async fn run_tool(
    program: &str,
    args: &[String],
    deadline: Duration,
    cancel: &CancellationToken,
) -> crate::Result<Option<ToolOutput>> {
    log::debug!("Executing {} with args: {:?}", program, args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ScanError::ToolUnavailable(program.to_string()),
        _ => ScanError::ProbeExecution(format!("failed to start {}: {}", program, e)),
    })?;

    tokio::select! {
        _ = cancel.cancelled() => {
            log::info!("{} cancelled", program);
            Ok(None)
        }
        waited = tokio::time::timeout(deadline, child.wait_with_output()) => match waited {
            Ok(Ok(output)) => Ok(Some(ToolOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                success: output.status.success(),
            })),
            Ok(Err(e)) => Err(ScanError::ProbeExecution(format!("{}: {}", program, e))),
            Err(_) => Err(ScanError::TimeoutError(format!("{} exceeded {:?}", program, deadline))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool() {
        let result = run_tool("/nonexistent/tool", &[], Duration::from_secs(1), &CancellationToken::new()).await;
        assert!(matches!(result, Err(ScanError::ToolUnavailable(_))));
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let args = vec!["-c".to_string(), "echo hop".to_string()];
        let output = run_tool("sh", &args, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hop");
    }

    #[tokio::test]
    async fn test_deadline_and_cancel() {
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let result = run_tool("sh", &args, Duration::from_millis(100), &CancellationToken::new()).await;
        assert!(matches!(result, Err(ScanError::TimeoutError(_))));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_tool("sh", &args, Duration::from_secs(10), &cancel).await.unwrap();
        assert!(result.is_none());
    }
}
