//! Shared subprocess mechanics for CLI-backed agents.
//!
//! Commands are always spawned in argv form, never through a shell.
//! Each invocation carries its own deadline; hitting it kills only that
//! child and is reported as a failure kind, not a panic or `Err` that
//! could unwind across a stage boundary.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::response::ErrorKind;

/// Output of a completed CLI invocation.
#[derive(Debug)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Classified failure of a CLI invocation.
#[derive(Debug)]
pub struct CliFailure {
    pub kind: ErrorKind,
    pub detail: String,
}

impl CliFailure {
    fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Run a CLI tool to completion under a deadline.
///
/// `stdin` is written to the child when provided (tools that take the
/// prompt on stdin); otherwise stdin is closed immediately. A non-zero
/// exit status is a failure with the stderr tail as detail.
pub async fn run_cli(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<CliOutput, CliFailure> {
    debug!(program, ?args, "spawning agent CLI");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            CliFailure::new(ErrorKind::CliNotFound, format!("{} not found on PATH", program))
        } else {
            CliFailure::new(ErrorKind::Unknown, format!("failed to spawn {}: {}", program, err))
        }
    })?;

    // The deadline covers stdin delivery too: a child that never drains
    // a prompt larger than the pipe buffer must still time out.
    let mut stdin_pipe = child.stdin.take();
    let waited = tokio::time::timeout(timeout, async move {
        match (stdin, stdin_pipe.take()) {
            (Some(input), Some(mut handle)) => {
                // Child may exit before reading all of stdin; that is not a failure.
                let _ = handle.write_all(input.as_bytes()).await;
                let _ = handle.shutdown().await;
            }
            (_, handle) => drop(handle),
        }
        child.wait_with_output().await
    })
    .await;
    let output = match waited {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Err(CliFailure::new(
                ErrorKind::Unknown,
                format!("{} failed: {}", program, err),
            ))
        }
        Err(_) => {
            return Err(CliFailure::new(
                ErrorKind::Timeout,
                format!("{} timed out after {}s", program, timeout.as_secs()),
            ))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let exit_code = output.status.code();

    if !output.status.success() {
        let tail: String = stderr.chars().rev().take(400).collect::<Vec<_>>().into_iter().rev().collect();
        return Err(CliFailure::new(
            ErrorKind::NonZeroExit,
            format!(
                "{} exited with status {}: {}",
                program,
                exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                tail.trim()
            ),
        ));
    }

    Ok(CliOutput {
        stdout,
        stderr,
        exit_code,
    })
}

/// Probe a tool's availability: version flag, bounded deadline, success
/// is a zero exit status.
pub async fn probe_version(program: &str, timeout: Duration) -> bool {
    run_cli(program, &["--version".to_string()], None, timeout)
        .await
        .is_ok()
}
