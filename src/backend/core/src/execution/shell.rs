//! Shell (and Script) execution through the OS shell.
//!
//! The child runs in its own process group so cancellation and timeout can
//! kill the whole tree, not just the immediate shell.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

use super::ExecutionStrategy;
use crate::runner::ExecutionContext;
use crate::task::{TaskResult, TaskStatus};

/// Poll cadence for the cancel/deadline watchdog while the child runs.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ShellStrategy;

impl ShellStrategy {
    #[cfg(unix)]
    fn kill_group(child: &tokio::process::Child) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                warn!(pid, error = %e, "killpg failed");
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_group(_child: &tokio::process::Child) {}

    async fn drain(reader: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
        let mut out = String::new();
        if let Some(mut r) = reader {
            let _ = r.read_to_string(&mut out).await;
        }
        out
    }
}

#[async_trait]
impl ExecutionStrategy for ShellStrategy {
    async fn execute(&self, ctx: &ExecutionContext<'_>) -> TaskResult {
        let cfg = ctx.cfg;
        let start = Instant::now();

        if cfg.exec_command.is_empty() {
            return ctx.fail("empty shell command");
        }
        if ctx.is_canceled() {
            return ctx.canceled("canceled before shell execution");
        }
        if ctx.is_timeout() {
            return ctx.timeout("timeout before shell execution");
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&cfg.exec_command);
        if let Some(cwd) = cfg.param("cwd") {
            cmd.current_dir(cwd);
        }
        for (key, value) in &cfg.exec_params {
            if let Some(name) = key.strip_prefix("env.") {
                cmd.env(name, value);
            }
        }
        if cfg.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ctx.fail(format!("failed to spawn shell: {e}")),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(Self::drain(stdout));
        let stderr_task = tokio::spawn(Self::drain(stderr));

        // Watchdog loop: wait for exit, killing the group the moment the
        // cancel flag or the deadline fires.
        let mut interrupted: Option<TaskStatus> = None;
        let exit = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    if interrupted.is_none() {
                        if ctx.is_canceled() {
                            interrupted = Some(TaskStatus::Canceled);
                            Self::kill_group(&child);
                        } else if ctx.is_timeout() {
                            interrupted = Some(TaskStatus::Timeout);
                            Self::kill_group(&child);
                        }
                    }
                }
            }
        };

        let mut r = TaskResult::default();
        if cfg.capture_output {
            r.stdout = stdout_task.await.unwrap_or_default();
            r.stderr = stderr_task.await.unwrap_or_default();
        } else {
            stdout_task.abort();
            stderr_task.abort();
        }

        match (interrupted, exit) {
            (Some(TaskStatus::Canceled), _) => {
                r.status = TaskStatus::Canceled;
                r.message = "canceled during shell execution".into();
            }
            (Some(TaskStatus::Timeout), _) => {
                r.status = TaskStatus::Timeout;
                r.message = "shell command timed out".into();
            }
            (_, Ok(status)) => {
                r.exit_code = status.code().unwrap_or(-1);
                if status.success() {
                    r.status = TaskStatus::Success;
                } else {
                    r.status = TaskStatus::Failed;
                    r.message = format!("shell exit code {}", r.exit_code);
                }
            }
            (_, Err(e)) => {
                r.status = TaskStatus::Failed;
                r.message = format!("failed to wait for shell: {e}");
            }
        }

        r.duration_ms = start.elapsed().as_millis() as i64;
        info!(task = %cfg.id, status = r.status.as_str(), exit_code = r.exit_code, "shell finished");
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CancelToken;
    use crate::task::TaskConfig;

    fn shell_cfg(cmd: &str) -> TaskConfig {
        let mut cfg = TaskConfig::new("sh-test");
        cfg.exec_command = cmd.to_string();
        cfg
    }

    #[tokio::test]
    async fn exit_zero_is_success() {
        let cfg = shell_cfg("true");
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), None);
        let r = ShellStrategy.execute(&ctx).await;
        assert!(r.ok());
        assert_eq!(r.exit_code, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed_with_code() {
        let cfg = shell_cfg("exit 3");
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), None);
        let r = ShellStrategy.execute(&ctx).await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert_eq!(r.exit_code, 3);
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let cfg = shell_cfg("echo out; echo err 1>&2");
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), None);
        let r = ShellStrategy.execute(&ctx).await;
        assert_eq!(r.stdout.trim(), "out");
        assert_eq!(r.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn deadline_kills_long_running_child() {
        let cfg = shell_cfg("sleep 30");
        let deadline = Instant::now() + Duration::from_millis(150);
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), Some(deadline));

        let started = Instant::now();
        let r = ShellStrategy.execute(&ctx).await;
        assert_eq!(r.status, TaskStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancel_kills_child() {
        let cfg = shell_cfg("sleep 30");
        let token = CancelToken::new();
        let ctx = ExecutionContext::new(&cfg, token.clone(), None);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let r = ShellStrategy.execute(&ctx).await;
        assert_eq!(r.status, TaskStatus::Canceled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
