//! Run reports and the aggregated final result.

use crate::category::CheckCategory;
use crate::level::TestLevel;
use crate::supervisor::ExecutionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a single work item ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkOutcome {
    /// Every command succeeded.
    Passed,

    /// A command ran and reported problems.
    Findings { command: String, exit_code: i32 },

    /// A command could not be started.
    LaunchFailed { command: String, cause: String },

    /// A command exceeded its timeout.
    TimedOut { command: String, after_secs: u64 },

    /// The item's environment could not be built.
    BuildFailed { cause: String },

    /// The run was interrupted while this item was in flight.
    Interrupted,
}

/// Failure category shown in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Findings,
    Launch,
    Timeout,
    Build,
    Interrupted,
}

impl FailureKind {
    pub fn name(&self) -> &'static str {
        match self {
            FailureKind::Findings => "findings",
            FailureKind::Launch => "launch",
            FailureKind::Timeout => "timeout",
            FailureKind::Build => "build",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl WorkOutcome {
    /// Outcome of a command that did not succeed. `None` for success.
    pub fn from_execution(command: &str, result: ExecutionResult) -> Option<Self> {
        match result {
            ExecutionResult::Success => None,
            ExecutionResult::Failure { exit_code } => Some(WorkOutcome::Findings {
                command: command.to_string(),
                exit_code,
            }),
            ExecutionResult::LaunchError { cause } => Some(WorkOutcome::LaunchFailed {
                command: command.to_string(),
                cause,
            }),
            ExecutionResult::TimedOut { after_secs } => Some(WorkOutcome::TimedOut {
                command: command.to_string(),
                after_secs,
            }),
            ExecutionResult::Interrupted => Some(WorkOutcome::Interrupted),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, WorkOutcome::Passed)
    }

    /// Failure category, `None` when passed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            WorkOutcome::Passed => None,
            WorkOutcome::Findings { .. } => Some(FailureKind::Findings),
            WorkOutcome::LaunchFailed { .. } => Some(FailureKind::Launch),
            WorkOutcome::TimedOut { .. } => Some(FailureKind::Timeout),
            WorkOutcome::BuildFailed { .. } => Some(FailureKind::Build),
            WorkOutcome::Interrupted => Some(FailureKind::Interrupted),
        }
    }

    /// Human-readable cause, empty when passed.
    pub fn cause(&self) -> String {
        match self {
            WorkOutcome::Passed => String::new(),
            WorkOutcome::Findings { command, exit_code } => {
                format!("`{}` exited with code {}", command, exit_code)
            }
            WorkOutcome::LaunchFailed { command, cause } => {
                format!("`{}` could not be launched: {}", command, cause)
            }
            WorkOutcome::TimedOut {
                command,
                after_secs,
            } => format!("`{}` timed out after {}s", command, after_secs),
            WorkOutcome::BuildFailed { cause } => cause.clone(),
            WorkOutcome::Interrupted => "run interrupted".to_string(),
        }
    }
}

/// Result of one attempted work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    /// `"<category>@<scope>"`.
    pub label: String,

    pub category: CheckCategory,

    /// Target name for target-scoped items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Number of commands that were started.
    pub commands_run: usize,

    pub outcome: WorkOutcome,

    pub duration_ms: u64,
}

impl ItemReport {
    pub fn passed(&self) -> bool {
        self.outcome.passed()
    }
}

/// One failing work item in the final result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub label: String,
    pub kind: FailureKind,
    pub cause: String,
}

/// Aggregated verdict of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FinalResult {
    Success,
    Failure {
        failures: Vec<FailureEntry>,
        interrupted: bool,
    },
}

impl FinalResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FinalResult::Success)
    }

    /// Process exit code for this result.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: String,

    /// Requested level.
    pub level: TestLevel,

    /// Digest of the ordered work-item labels.
    pub plan_digest: String,

    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Attempted items in expansion order.
    pub items: Vec<ItemReport>,

    /// Labels of items skipped because of an interrupt.
    pub not_attempted: Vec<String>,

    /// Whether the run observed an interrupt.
    pub interrupted: bool,
}

impl RunReport {
    /// Number of items that passed.
    pub fn passed_count(&self) -> usize {
        self.items.iter().filter(|i| i.passed()).count()
    }

    /// Number of items that failed.
    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|i| !i.passed()).count()
    }

    /// Failing items in expansion order.
    pub fn failures(&self) -> Vec<FailureEntry> {
        self.items
            .iter()
            .filter_map(|item| {
                item.outcome.failure_kind().map(|kind| FailureEntry {
                    label: item.label.clone(),
                    kind,
                    cause: item.outcome.cause(),
                })
            })
            .collect()
    }

    /// Success iff every attempted item passed and the run was not interrupted.
    pub fn final_result(&self) -> FinalResult {
        let failures = self.failures();
        let interrupted = self.interrupted
            || !self.not_attempted.is_empty()
            || failures.iter().any(|f| f.kind == FailureKind::Interrupted);

        if failures.is_empty() && !interrupted {
            FinalResult::Success
        } else {
            FinalResult::Failure {
                failures,
                interrupted,
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.final_result().exit_code()
    }

    /// One line per attempted item, then a totals line.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .items
            .iter()
            .map(|item| {
                let seconds = item.duration_ms as f64 / 1000.0;
                if item.passed() {
                    format!("✓ {} ({:.1}s)", item.label, seconds)
                } else {
                    let kind = item
                        .outcome
                        .failure_kind()
                        .map(|k| k.name())
                        .unwrap_or_default();
                    format!(
                        "✗ {} ({:.1}s) [{}] {}",
                        item.label,
                        seconds,
                        kind,
                        item.outcome.cause()
                    )
                }
            })
            .collect();

        for label in &self.not_attempted {
            lines.push(format!("- {} (not attempted)", label));
        }

        let verdict = match self.final_result() {
            FinalResult::Success => "PASSED".to_string(),
            FinalResult::Failure {
                interrupted: true, ..
            } => "INTERRUPTED".to_string(),
            FinalResult::Failure { failures, .. } => {
                format!("FAILED ({} failing)", failures.len())
            }
        };
        lines.push(format!(
            "{}: level {}, {} passed, {} failed, {} not attempted in {:.1}s",
            verdict,
            self.level,
            self.passed_count(),
            self.failed_count(),
            self.not_attempted.len(),
            self.duration_ms as f64 / 1000.0
        ));
        lines
    }

    /// Pretty JSON rendering of the report.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
