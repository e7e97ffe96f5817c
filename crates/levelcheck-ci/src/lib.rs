//! levelcheck CI - level-driven check orchestration
//!
//! Provides an orchestrator that:
//! - Expands a test level (0-3) into style, functionality, host and cross checks
//! - Runs host checks through a supervised process layer
//! - Builds one isolated container environment per cross target
//! - Aggregates every work item into a single pass/fail result

pub mod category;
pub mod config;
pub mod environment;
pub mod error;
pub mod fakes;
pub mod interrupt;
pub mod level;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod supervisor;
pub mod telemetry;

// Re-export key types
pub use category::{categories_for_level, commands_for, commands_for_target, CheckCategory, Command};
pub use config::{Configuration, Defaults, TargetDescriptor, DEFAULT_CONFIG_FILE};
pub use environment::{ContainerBuilder, EnvironmentBuilder, EnvironmentHandle};
pub use error::{BuildError, ConfigError, FatalError, LevelError, SetupError};
pub use interrupt::{Interrupt, InterruptHandle};
pub use level::{LevelGate, LevelPolicy, TestLevel};
pub use orchestrator::{Orchestrator, Phase, RunOutcome, RunRequest};
pub use plan::{expand, plan_digest, Scope, WorkItem};
pub use report::{FailureEntry, FailureKind, FinalResult, ItemReport, RunReport, WorkOutcome};
pub use supervisor::{ExecutionResult, ProcessSupervisor, TokioSupervisor};
pub use telemetry::init_tracing;
