//! Shell command execution.

use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use queuectl_core::ExecutionResult;

/// Runs a job's command and reports the outcome.
///
/// Execution failures (non-zero exit, launch errors) are results, not errors:
/// they feed the retry policy.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> ExecutionResult;
}

/// Executes commands through the platform shell (`sh -c` / `cmd /C`).
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    flag: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        if cfg!(windows) {
            Self::new("cmd", "/C")
        } else {
            Self::new("sh", "-c")
        }
    }
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            flag: flag.into(),
        }
    }

    fn process_output(result: std::io::Result<Output>) -> ExecutionResult {
        match result {
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));

                if output.status.success() {
                    ExecutionResult::success(combined.trim())
                } else {
                    combined.push_str(&format!("\ncommand exited with {}", output.status));
                    ExecutionResult::failure(combined.trim())
                }
            }
            Err(e) => ExecutionResult::failure(format!("failed to launch command: {e}")),
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> ExecutionResult {
        debug!(shell = %self.shell, command, "executing command");

        let mut cmd = Command::new(&self.shell);
        cmd.arg(&self.flag)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Terminal signals (Ctrl-C) go to the worker's group only; the job
        // runs to completion and the worker stops afterwards.
        #[cfg(unix)]
        cmd.process_group(0);

        let result = cmd.output().await;

        Self::process_output(result)
    }
}

#[async_trait]
impl<T: CommandExecutor + ?Sized> CommandExecutor for std::sync::Arc<T> {
    async fn execute(&self, command: &str) -> ExecutionResult {
        (**self).execute(command).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let result = ShellExecutor::default().execute("echo hi").await;
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn stdout_and_stderr_are_concatenated() {
        let result = ShellExecutor::default()
            .execute("echo out; echo err 1>&2")
            .await;
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("out\nerr"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure_with_description() {
        let result = ShellExecutor::default().execute("echo partial; exit 3").await;
        assert!(!result.success);
        let output = result.output.unwrap();
        assert!(output.starts_with("partial"));
        assert!(output.contains("exit status: 3"), "{output}");
    }

    #[cfg(target_os = "linux")]
    fn process_group_of(stat: &str) -> String {
        // Fields after the parenthesised command name: state, ppid, pgrp.
        let rest = &stat[stat.rfind(')').unwrap() + 1..];
        rest.split_whitespace().nth(2).unwrap().to_string()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn command_runs_in_its_own_process_group() {
        let worker_pgid = process_group_of(&std::fs::read_to_string("/proc/self/stat").unwrap());

        let result = ShellExecutor::default()
            .execute("echo $$; cat /proc/$$/stat")
            .await;
        assert!(result.success);
        let output = result.output.unwrap();
        let (shell_pid, shell_stat) = output.split_once('\n').unwrap();
        let job_pgid = process_group_of(shell_stat);

        assert_eq!(job_pgid, shell_pid.trim());
        assert_ne!(job_pgid, worker_pgid);
    }

    #[tokio::test]
    async fn launch_failure_is_folded_into_result() {
        let executor = ShellExecutor::new("/nonexistent/shell", "-c");
        let result = executor.execute("true").await;
        assert!(!result.success);
        assert!(result.output.unwrap().starts_with("failed to launch command"));
    }
}
