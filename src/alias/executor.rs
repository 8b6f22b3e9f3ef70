//! Shell executor for alias calls.
//!
//! Each call runs `<command> <args...>` through a login shell in its own
//! process group, with the host workspace as the working directory. Stdout
//! and stderr are streamed into an ordered chunk list; a per-call timeout
//! terminates the whole group (SIGTERM, short pause, SIGKILL).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::alias::entry::AliasEntry;
use crate::error::AliasError;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(600);

const TERM_GRACE: Duration = Duration::from_millis(500);

/// Which stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One streamed chunk of call output.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub text: String,
}

/// Result of a completed call.
#[derive(Debug)]
pub struct CallOutput {
    pub exit_code: i64,
    pub chunks: Vec<OutputChunk>,
}

/// Runs alias calls on the host.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    workdir: PathBuf,
    timeout: Duration,
}

impl ShellExecutor {
    /// Create an executor rooted at the host workspace.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate arguments and run the entry's command to completion.
    pub async fn execute(
        &self,
        entry: &AliasEntry,
        args: &[String],
    ) -> Result<CallOutput, AliasError> {
        entry.validate_args(args)?;

        let command_line = entry.command_line(args);
        tracing::debug!(call = entry.name, command = command_line, "running alias call");

        let mut command = Command::new("sh");
        command
            .arg("-lc")
            .arg(&command_line)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| AliasError::ExecutionFailed {
            reason: format!("spawn failed: {e}"),
        })?;
        let pid = child.id();

        let stdout = child.stdout.take().ok_or_else(|| AliasError::ExecutionFailed {
            reason: "stdout pipe unavailable".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| AliasError::ExecutionFailed {
            reason: "stderr pipe unavailable".to_string(),
        })?;

        // Both readers append to one ordered list; the mutex is the only
        // shared mutable state in a call.
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = tokio::spawn(collect_chunks(stdout, StreamKind::Stdout, chunks.clone()));
        let stderr_task = tokio::spawn(collect_chunks(stderr, StreamKind::Stderr, chunks.clone()));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(AliasError::ExecutionFailed {
                    reason: format!("wait failed: {e}"),
                });
            }
            Err(_) => {
                terminate_group(pid, &mut child).await;
                return Err(AliasError::Timeout(self.timeout));
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let exit_code = exit_code_of(&status);
        let chunks = std::mem::take(&mut *chunks.lock().expect("chunk lock"));

        Ok(CallOutput { exit_code, chunks })
    }

    pub fn workdir(&self) -> &std::path::Path {
        &self.workdir
    }
}

async fn collect_chunks(
    mut reader: impl AsyncRead + Unpin,
    stream: StreamKind,
    chunks: Arc<Mutex<Vec<OutputChunk>>>,
) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                chunks.lock().expect("chunk lock").push(OutputChunk { stream, text });
            }
        }
    }
}

/// SIGTERM the call's process group, give it a moment, then SIGKILL.
async fn terminate_group(pid: Option<u32>, child: &mut tokio::process::Child) {
    if let Some(pid) = pid {
        // SAFETY: signalling a process group we created.
        unsafe {
            libc::killpg(pid as i32, libc::SIGTERM);
        }
        tokio::time::sleep(TERM_GRACE).await;
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
}

fn exit_code_of(status: &std::process::ExitStatus) -> i64 {
    use std::os::unix::process::ExitStatusExt;

    match status.code() {
        Some(code) => code as i64,
        None => 128 + status.signal().unwrap_or(0) as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CallSpec;
    use tokio_test::assert_ok;

    fn entry(command: &str, allowed_args: Option<&str>) -> AliasEntry {
        AliasEntry::from_call(&CallSpec {
            name: "test-call".to_string(),
            description: String::new(),
            command: command.to_string(),
            allowed_args: allowed_args.map(str::to_string),
        })
        .expect("entry builds")
    }

    fn executor() -> ShellExecutor {
        ShellExecutor::new(std::env::temp_dir())
    }

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let output = assert_ok!(
            executor()
                .execute(&entry("/bin/echo hi", Some("^.*$")), &["there".to_string()])
                .await
        );
        assert_eq!(output.exit_code, 0);
        let stdout: String = output
            .chunks
            .iter()
            .filter(|c| c.stream == StreamKind::Stdout)
            .map(|c| c.text.as_str())
            .collect();
        assert!(stdout.starts_with("hi there"));
    }

    #[tokio::test]
    async fn test_execute_captures_stderr() {
        let output = executor()
            .execute(&entry("echo oops >&2", None), &[])
            .await
            .unwrap();
        assert_eq!(output.exit_code, 0);
        assert!(
            output
                .chunks
                .iter()
                .any(|c| c.stream == StreamKind::Stderr && c.text.contains("oops"))
        );
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit_code() {
        let output = executor().execute(&entry("exit 3", None), &[]).await.unwrap();
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_rejected_args_do_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let witness = dir.path().join("ran");
        let command = format!("touch {}", witness.display());
        let err = executor()
            .execute(&entry(&command, Some("--msg=[a-z]+")), &["--msg=Bad".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AliasError::ArgumentsRejected { .. }));
        assert!(!witness.exists());
    }

    #[tokio::test]
    async fn test_timeout_terminates_call() {
        let executor = executor().with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = executor
            .execute(&entry("sleep 30", None), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AliasError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellExecutor::new(dir.path());
        let output = executor.execute(&entry("pwd", None), &[]).await.unwrap();
        let stdout: String = output.chunks.iter().map(|c| c.text.as_str()).collect();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(stdout.trim_end().ends_with(&canonical.display().to_string()));
    }
}
