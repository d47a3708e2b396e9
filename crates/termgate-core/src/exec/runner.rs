//! Process runner: the only place that spawns host processes.
//!
//! Everything above this layer talks to [`ProcessRunner`], so policy and
//! dispatch can be exercised against scripted runners without a host shell.

use crate::error::{GateError, GateResult};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
}

/// Runs a command line through the platform shell with a wall-clock bound.
pub trait ProcessRunner: Send + Sync {
    /// Run `command` and capture its output.
    ///
    /// A non-zero exit is a normal result. Implementations must return
    /// [`GateError::ExecutionTimeout`] once `timeout` elapses and must have
    /// terminated and reaped the process by then; spawn and pipe failures are
    /// [`GateError::ExecutionFailure`].
    fn run<'a>(
        &'a self,
        command: &'a str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = GateResult<ProcessOutput>> + Send + 'a>>;
}

/// [`ProcessRunner`] backed by `tokio::process` and `sh -c` (`cmd /C` on Windows).
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    working_dir: Option<PathBuf>,
}

impl ShellRunner {
    pub fn new(working_dir: Option<PathBuf>) -> Self {
        Self { working_dir }
    }

    async fn run_shell(&self, command: &str, timeout: Duration) -> GateResult<ProcessOutput> {
        let mut cmd = shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        // The shell leads its own group so everything it forks can be killed together.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| GateError::ExecutionFailure(e.to_string()))?;
        let pid = child.id();
        let _group = GroupGuard(pid);
        debug!(pid, command = %command, "spawned process");

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let outcome = tokio::time::timeout(timeout, async {
            let (stdout, stderr, status) = tokio::join!(
                read_pipe(stdout_pipe),
                read_pipe(stderr_pipe),
                child.wait()
            );
            Ok::<_, std::io::Error>((stdout?, stderr?, status?))
        })
        .await;

        match outcome {
            Ok(Ok((stdout, stderr, status))) => {
                debug!(pid, exit_code = ?status.code(), "process finished");
                Ok(ProcessOutput {
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    exit_code: status.code(),
                })
            }
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                Err(GateError::ExecutionFailure(e.to_string()))
            }
            Err(_) => {
                warn!(pid, command = %command, timeout_secs = timeout.as_secs(), "process timed out");
                terminate(&mut child, pid).await;
                Err(GateError::ExecutionTimeout(timeout))
            }
        }
    }
}

impl ProcessRunner for ShellRunner {
    fn run<'a>(
        &'a self,
        command: &'a str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = GateResult<ProcessOutput>> + Send + 'a>> {
        Box::pin(self.run_shell(command, timeout))
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Kills the shell's process group when a run ends, however it ends.
///
/// Covers background jobs left behind by a finished shell and runs whose
/// future is dropped before completion.
struct GroupGuard(Option<u32>);

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.0 {
            kill_group(pid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Kill the child's group, then the child itself, and wait for it so no
/// zombie is left behind.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_group(pid);
    }
    match child.try_wait() {
        Ok(Some(_)) => {}
        _ => {
            if let Err(e) = child.kill().await {
                warn!(pid, error = %e, "failed to kill process");
            } else {
                debug!(pid, "process killed");
            }
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let runner = ShellRunner::default();
        let output = runner
            .run("printf out; printf err >&2", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let runner = ShellRunner::default();
        let output = runner.run("exit 3", Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(Some(dir.path().to_path_buf()));
        let output = runner.run("pwd", Duration::from_secs(5)).await.unwrap();
        let reported = std::fs::canonicalize(output.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_spawn_failure() {
        let runner = ShellRunner::new(Some(PathBuf::from("/definitely/not/a/dir")));
        let result = runner.run("true", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(GateError::ExecutionFailure(_))));
    }

    /// Whether `pid` names a live process. Zombies count as dead: they are
    /// waiting on a parent we may not control.
    fn process_alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }

    async fn wait_for_exit(pid: &str) -> bool {
        for _ in 0..40 {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_timeout_terminates_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let runner = ShellRunner::default();
        let command = format!("echo $$ > {}; exec sleep 30", pid_file.display());

        let started = Instant::now();
        let result = runner.run(&command, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(GateError::ExecutionTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        assert!(!pid.is_empty());
        #[cfg(target_os = "linux")]
        assert!(wait_for_exit(pid).await, "process {pid} still alive after timeout");
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let runner = ShellRunner::default();
        // The shell stays the parent; `sleep` is a separate, non-exec'd child.
        let command = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

        let started = Instant::now();
        let result = runner.run(&command, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(GateError::ExecutionTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        assert!(!pid.is_empty());
        #[cfg(target_os = "linux")]
        assert!(wait_for_exit(pid).await, "background child {pid} outlived the timeout");
    }
}
