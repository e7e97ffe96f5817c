//! Process supervision for external check commands.

use crate::category::Command;
use crate::interrupt::Interrupt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound for tear-down commands issued after an interrupt.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Exited with the expected code.
    Success,

    /// Ran and exited with another code (-1 when killed by a signal).
    Failure { exit_code: i32 },

    /// Could not be started at all.
    LaunchError { cause: String },

    /// Killed after exceeding its timeout.
    TimedOut { after_secs: u64 },

    /// Killed because the run was interrupted.
    Interrupted,
}

impl ExecutionResult {
    /// Whether the command succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success)
    }
}

/// Runs external commands and normalizes their outcome.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Run a command to completion, passing its output through.
    async fn run(
        &self,
        command: &Command,
        working_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> ExecutionResult;

    /// Run a tear-down command; ignores the run interrupt.
    async fn cleanup(&self, command: &Command, working_dir: &Path) -> ExecutionResult;

    /// Whether `program` can be launched at all.
    async fn is_available(&self, program: &str) -> bool;
}

/// Supervisor spawning real processes on the host.
#[derive(Debug, Clone)]
pub struct TokioSupervisor {
    interrupt: Interrupt,
}

impl TokioSupervisor {
    /// Create a supervisor that kills its children when `interrupt` fires.
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Interrupted,
}

#[async_trait]
impl ProcessSupervisor for TokioSupervisor {
    async fn run(
        &self,
        command: &Command,
        working_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        if self.interrupt.is_triggered() {
            return ExecutionResult::Interrupted;
        }
        let timeout = (command.timeout_secs > 0).then(|| Duration::from_secs(command.timeout_secs));
        execute(command, working_dir, env, timeout, Some(self.interrupt.clone())).await
    }

    async fn cleanup(&self, command: &Command, working_dir: &Path) -> ExecutionResult {
        execute(
            command,
            working_dir,
            &BTreeMap::new(),
            Some(CLEANUP_TIMEOUT),
            None,
        )
        .await
    }

    async fn is_available(&self, program: &str) -> bool {
        tokio::process::Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

async fn execute(
    command: &Command,
    working_dir: &Path,
    env: &BTreeMap<String, String>,
    timeout: Option<Duration>,
    interrupt: Option<Interrupt>,
) -> ExecutionResult {
    info!("Running `{}` in {:?}", command, working_dir);
    if !env.is_empty() {
        debug!(vars = ?env.keys().collect::<Vec<_>>(), "Extra environment");
    }

    let mut child = match tokio::process::Command::new(&command.program)
        .args(&command.args)
        .current_dir(working_dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("Could not launch `{}`: {}", command.program, e);
            return ExecutionResult::LaunchError {
                cause: format!("{}: {}", command.program, e),
            };
        }
    };

    let waited = {
        let timed_out = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        let interrupted = async {
            match interrupt {
                Some(mut interrupt) => interrupt.triggered().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = timed_out => Waited::TimedOut,
            _ = interrupted => Waited::Interrupted,
        }
    };

    match waited {
        Waited::Exited(Ok(status)) => {
            let exit_code = status.code().unwrap_or(-1);
            if exit_code == command.expected_code {
                ExecutionResult::Success
            } else {
                ExecutionResult::Failure { exit_code }
            }
        }
        Waited::Exited(Err(e)) => ExecutionResult::LaunchError {
            cause: format!("failed waiting on {}: {}", command.program, e),
        },
        Waited::TimedOut => {
            let after_secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
            warn!("`{}` timed out after {}s, killing it", command, after_secs);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill `{}`: {}", command.program, e);
            }
            ExecutionResult::TimedOut { after_secs }
        }
        Waited::Interrupted => {
            warn!("Interrupted while running `{}`, killing it", command);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill `{}`: {}", command.program, e);
            }
            ExecutionResult::Interrupted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_success_is_success() {
        assert!(ExecutionResult::Success.is_success());
        assert!(!ExecutionResult::Failure { exit_code: 1 }.is_success());
        assert!(!ExecutionResult::LaunchError {
            cause: "missing".to_string()
        }
        .is_success());
        assert!(!ExecutionResult::TimedOut { after_secs: 5 }.is_success());
        assert!(!ExecutionResult::Interrupted.is_success());
    }

    #[test]
    fn test_result_serializes_with_kind_tag() {
        let value = serde_json::to_value(ExecutionResult::Failure { exit_code: 101 }).unwrap();
        assert_eq!(value["kind"], "failure");
        assert_eq!(value["exit_code"], 101);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use tempfile::tempdir;

        fn supervisor() -> TokioSupervisor {
            TokioSupervisor::new(Interrupt::never())
        }

        async fn run(command: Command) -> ExecutionResult {
            supervisor()
                .run(&command, Path::new("."), &BTreeMap::new())
                .await
        }

        #[tokio::test]
        async fn test_successful_command() {
            assert_eq!(run(Command::new("true", Vec::<String>::new())).await, ExecutionResult::Success);
        }

        #[tokio::test]
        async fn test_failing_command_reports_code() {
            assert_eq!(
                run(Command::new("false", Vec::<String>::new())).await,
                ExecutionResult::Failure { exit_code: 1 }
            );
        }

        #[tokio::test]
        async fn test_expected_code_counts_as_success() {
            let command = Command::new("sh", ["-c", "exit 3"]).expecting(3);
            assert_eq!(run(command).await, ExecutionResult::Success);

            let command = Command::new("sh", ["-c", "exit 0"]).expecting(3);
            assert_eq!(run(command).await, ExecutionResult::Failure { exit_code: 0 });
        }

        #[tokio::test]
        async fn test_missing_binary_is_launch_error() {
            let result = run(Command::new("levelcheck-no-such-tool", ["--check"])).await;
            match result {
                ExecutionResult::LaunchError { cause } => {
                    assert!(cause.contains("levelcheck-no-such-tool"))
                }
                other => panic!("expected launch error, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_env_and_working_dir_are_applied() {
            let dir = tempdir().unwrap();
            std::fs::write(dir.path().join("marker"), "").unwrap();
            let mut env = BTreeMap::new();
            env.insert("LEVELCHECK_PROBE".to_string(), "yes".to_string());

            let command = Command::new("sh", ["-c", "test -f marker && test \"$LEVELCHECK_PROBE\" = yes"]);
            let result = supervisor().run(&command, dir.path(), &env).await;
            assert_eq!(result, ExecutionResult::Success);
        }

        #[tokio::test]
        async fn test_timeout_kills_child() {
            let command = Command::new("sleep", ["30"]).with_timeout(1);
            assert_eq!(run(command).await, ExecutionResult::TimedOut { after_secs: 1 });
        }

        #[tokio::test]
        async fn test_interrupt_kills_child() {
            let (handle, interrupt) = Interrupt::channel();
            let supervisor = TokioSupervisor::new(interrupt);

            let running = tokio::spawn(async move {
                supervisor
                    .run(&Command::new("sleep", ["30"]), Path::new("."), &BTreeMap::new())
                    .await
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.trigger();

            let result = tokio::time::timeout(Duration::from_secs(10), running)
                .await
                .expect("child was not killed")
                .unwrap();
            assert_eq!(result, ExecutionResult::Interrupted);
        }

        #[tokio::test]
        async fn test_cleanup_ignores_interrupt() {
            let (handle, interrupt) = Interrupt::channel();
            handle.trigger();
            let supervisor = TokioSupervisor::new(interrupt);
            let command = Command::new("true", Vec::<String>::new());

            assert_eq!(
                supervisor.run(&command, Path::new("."), &BTreeMap::new()).await,
                ExecutionResult::Interrupted
            );
            assert_eq!(
                supervisor.cleanup(&command, Path::new(".")).await,
                ExecutionResult::Success
            );
        }

        #[tokio::test]
        async fn test_is_available() {
            let supervisor = supervisor();
            assert!(supervisor.is_available(env!("CARGO")).await);
            assert!(!supervisor.is_available("levelcheck-no-such-tool").await);
        }
    }
}
