//! Level orchestration: load, expand, check setup, execute, aggregate.

use crate::category::{commands_for, commands_for_target, Command};
use crate::config::Configuration;
use crate::environment::{ContainerBuilder, EnvironmentBuilder};
use crate::error::{BuildError, FatalError, SetupError};
use crate::interrupt::Interrupt;
use crate::level::{LevelGate, LevelPolicy, TestLevel};
use crate::plan::{expand, plan_digest, Scope, WorkItem};
use crate::report::{ItemReport, RunReport, WorkOutcome};
use crate::supervisor::ProcessSupervisor;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use levelcheck_env::short_hash;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of one orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Loading,
    Expanding,
    Executing,
    Aggregating,
    Done,
}

/// What to run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Requested level.
    pub level: TestLevel,

    /// Configuration file to load.
    pub config_path: PathBuf,

    /// Overrides `defaults.level_gate`.
    pub gate: Option<LevelGate>,

    /// Overrides `defaults.level_ceiling`.
    pub ceiling: Option<TestLevel>,

    /// Run niche targets too.
    pub include_niche: bool,

    /// Cross items allowed in flight at once (1 = sequential).
    pub jobs: usize,
}

impl RunRequest {
    /// Sequential run of `level` against the configuration at `config_path`.
    pub fn new(level: TestLevel, config_path: impl Into<PathBuf>) -> Self {
        Self {
            level,
            config_path: config_path.into(),
            gate: None,
            ceiling: None,
            include_niche: false,
            jobs: 1,
        }
    }

    /// Allow up to `jobs` cross items in flight.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Include or skip niche targets.
    pub fn with_niche(mut self, include_niche: bool) -> Self {
        self.include_niche = include_niche;
        self
    }

    /// Override the configured level gate.
    pub fn with_gate(mut self, gate: LevelGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Override the configured level ceiling.
    pub fn with_ceiling(mut self, ceiling: TestLevel) -> Self {
        self.ceiling = Some(ceiling);
        self
    }

    fn policy(&self, configured: LevelPolicy) -> LevelPolicy {
        LevelPolicy {
            gate: self.gate.unwrap_or(configured.gate),
            ceiling: self.ceiling.unwrap_or(configured.ceiling),
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Work items ran (possibly none, possibly interrupted).
    Completed(RunReport),

    /// Nothing ran.
    Aborted(FatalError),
}

impl RunOutcome {
    /// Process exit code: 0 only for a fully successful run.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed(report) => report.exit_code(),
            RunOutcome::Aborted(_) => 1,
        }
    }

    /// The report, unless the run aborted before executing anything.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            RunOutcome::Aborted(_) => None,
        }
    }
}

/// Drives one run from configuration to final result.
pub struct Orchestrator {
    supervisor: Arc<dyn ProcessSupervisor>,
    builder: Option<Arc<dyn EnvironmentBuilder>>,
    interrupt: Interrupt,
    phase: Phase,
}

impl Orchestrator {
    /// Orchestrator that builds container environments through `supervisor`.
    pub fn new(supervisor: Arc<dyn ProcessSupervisor>, interrupt: Interrupt) -> Self {
        Self {
            supervisor,
            builder: None,
            interrupt,
            phase: Phase::Idle,
        }
    }

    /// Use `builder` for cross items instead of a `ContainerBuilder`.
    pub fn with_builder(mut self, builder: Arc<dyn EnvironmentBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!("Phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn abort(&mut self, err: FatalError) -> RunOutcome {
        error!("Run aborted: {}", err);
        self.enter(Phase::Done);
        RunOutcome::Aborted(err)
    }

    /// Load the requested configuration and run it.
    pub async fn run(&mut self, request: &RunRequest) -> RunOutcome {
        self.enter(Phase::Loading);
        match Configuration::load(&request.config_path) {
            Ok(config) => self.run_with_config(&config, request).await,
            Err(e) => self.abort(e.into()),
        }
    }

    /// Run an already loaded configuration. `request.config_path` is ignored.
    pub async fn run_with_config(
        &mut self,
        config: &Configuration,
        request: &RunRequest,
    ) -> RunOutcome {
        self.enter(Phase::Expanding);
        let policy = request.policy(config.defaults.level_policy);
        let items = match expand(request.level, &policy, config, request.include_niche) {
            Ok(items) => items,
            Err(e) => return self.abort(e.into()),
        };
        let digest = plan_digest(&items);

        if let Err(e) = self.check_setup(config, &items).await {
            return self.abort(e.into());
        }

        self.enter(Phase::Executing);
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            run_id = %run_id,
            level = %request.level,
            plan = %short_hash(&digest),
            "Starting run with {} work item(s)",
            items.len()
        );

        let builder: Arc<dyn EnvironmentBuilder> = match &self.builder {
            Some(builder) => builder.clone(),
            None => Arc::new(ContainerBuilder::new(self.supervisor.clone(), config)),
        };
        let (reports, not_attempted) = self
            .execute(config, builder.as_ref(), items, request.jobs.max(1))
            .await;

        let interrupted = self.interrupt.is_triggered();
        if interrupted {
            warn!(
                run_id = %run_id,
                "Interrupted; {} item(s) not attempted",
                not_attempted.len()
            );
            builder.cleanup().await;
        }

        self.enter(Phase::Aggregating);
        let report = RunReport {
            run_id,
            level: request.level,
            plan_digest: digest,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            items: reports,
            not_attempted,
            interrupted,
        };
        for line in report.summary_lines() {
            debug!("{}", line);
        }

        self.enter(Phase::Done);
        RunOutcome::Completed(report)
    }

    /// Every host-side program, plus the engine when cross items exist, must be launchable.
    async fn check_setup(
        &self,
        config: &Configuration,
        items: &[WorkItem],
    ) -> Result<(), SetupError> {
        let mut programs: Vec<String> = Vec::new();
        for item in items {
            let needed: Vec<String> = match &item.scope {
                Scope::Host => commands_for(item.category)
                    .into_iter()
                    .map(|c| c.program)
                    .collect(),
                Scope::Target(_) => vec![config.defaults.engine.clone()],
            };
            for program in needed {
                if !programs.contains(&program) {
                    programs.push(program);
                }
            }
        }

        for program in programs {
            if !self.supervisor.is_available(&program).await {
                return Err(SetupError::ToolMissing(program));
            }
            debug!(program = %program, "Tool available");
        }
        Ok(())
    }

    /// Host items run one after another, then cross items with up to `jobs`
    /// in flight. Reports keep expansion order.
    async fn execute(
        &self,
        config: &Configuration,
        builder: &dyn EnvironmentBuilder,
        items: Vec<WorkItem>,
        jobs: usize,
    ) -> (Vec<ItemReport>, Vec<String>) {
        let (host, cross): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| item.scope == Scope::Host);

        let mut attempted = Vec::new();
        for item in &host {
            attempted.push((item.label(), self.attempt(config, builder, item).await));
        }

        let cross_results: Vec<Option<ItemReport>> = stream::iter(cross.iter())
            .map(|item| self.attempt(config, builder, item))
            .buffered(jobs)
            .collect()
            .await;
        attempted.extend(cross.iter().map(WorkItem::label).zip(cross_results));

        let mut reports = Vec::new();
        let mut not_attempted = Vec::new();
        for (label, report) in attempted {
            match report {
                Some(report) => reports.push(report),
                None => not_attempted.push(label),
            }
        }
        (reports, not_attempted)
    }

    /// Run one item unless the interrupt has already been observed.
    async fn attempt(
        &self,
        config: &Configuration,
        builder: &dyn EnvironmentBuilder,
        item: &WorkItem,
    ) -> Option<ItemReport> {
        if self.interrupt.is_triggered() {
            debug!(item = %item.label(), "Not attempted after interrupt");
            return None;
        }

        let label = item.label();
        info!(item = %label, "Running work item");
        let start = Instant::now();

        let (commands_run, outcome) = match &item.scope {
            Scope::Host => self.run_on_host(config, item).await,
            Scope::Target(target) => match builder.ensure(target).await {
                Ok(handle) => {
                    let env = merged_env(&config.defaults.env, &target.env);
                    let commands = prepare(commands_for_target(target), config);
                    let mut run = 0;
                    let mut outcome = WorkOutcome::Passed;
                    for command in &commands {
                        run += 1;
                        let result = builder.run_in_environment(&handle, command, &env).await;
                        if let Some(failed) = WorkOutcome::from_execution(&command.to_string(), result) {
                            outcome = failed;
                            break;
                        }
                    }
                    (run, outcome)
                }
                Err(BuildError::Interrupted { .. }) => (0, WorkOutcome::Interrupted),
                Err(e) => (
                    0,
                    WorkOutcome::BuildFailed {
                        cause: e.to_string(),
                    },
                ),
            },
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        if outcome.passed() {
            info!(item = %label, duration_ms, "Work item passed");
        } else {
            warn!(item = %label, duration_ms, "Work item failed: {}", outcome.cause());
        }

        Some(ItemReport {
            label,
            category: item.category,
            target: item.target_descriptor().map(|t| t.name.clone()),
            commands_run,
            outcome,
            duration_ms,
        })
    }

    /// Commands run in order; the first failing one ends the item.
    async fn run_on_host(&self, config: &Configuration, item: &WorkItem) -> (usize, WorkOutcome) {
        let commands = prepare(commands_for(item.category), config);
        let mut run = 0;
        for command in &commands {
            run += 1;
            let result = self
                .supervisor
                .run(command, &config.workspace, &config.defaults.env)
                .await;
            if let Some(failed) = WorkOutcome::from_execution(&command.to_string(), result) {
                return (run, failed);
            }
        }
        (run, WorkOutcome::Passed)
    }
}

/// Apply the configured default timeout to commands without their own.
fn prepare(commands: Vec<Command>, config: &Configuration) -> Vec<Command> {
    commands
        .into_iter()
        .map(|command| {
            if command.timeout_secs == 0 {
                command.with_timeout(config.defaults.timeout_secs)
            } else {
                command
            }
        })
        .collect()
}

/// Target variables override the defaults.
fn merged_env(
    defaults: &BTreeMap<String, String>,
    target: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = defaults.clone();
    env.extend(target.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedBuilder, ScriptedSupervisor};
    use crate::supervisor::ExecutionResult;
    use std::path::Path;

    const CONFIG: &str = r#"
        [defaults]
        timeout_secs = 120
        env = { CARGO_TERM_COLOR = "never", PROFILE = "ci" }

        [recipes.base]
        dockerfile = "Dockerfile"

        [[targets]]
        name = "ubuntu"
        recipe = "base"
        env = { PROFILE = "cross" }
    "#;

    fn config() -> Configuration {
        Configuration::from_toml_str(CONFIG, Path::new("/repo")).unwrap()
    }

    fn orchestrator(
        supervisor: &Arc<ScriptedSupervisor>,
        builder: &Arc<ScriptedBuilder>,
    ) -> Orchestrator {
        Orchestrator::new(supervisor.clone(), Interrupt::never()).with_builder(builder.clone())
    }

    #[tokio::test]
    async fn test_phases_end_in_done() {
        let supervisor = Arc::new(ScriptedSupervisor::new());
        let builder = Arc::new(ScriptedBuilder::new());
        let mut orchestrator = orchestrator(&supervisor, &builder);
        assert_eq!(orchestrator.phase(), Phase::Idle);

        let request = RunRequest::new(TestLevel::Style, "unused.toml");
        let outcome = orchestrator.run_with_config(&config(), &request).await;

        assert_eq!(orchestrator.phase(), Phase::Done);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_first_failing_command_ends_item() {
        let supervisor = Arc::new(ScriptedSupervisor::new());
        supervisor.script("cargo fmt", ExecutionResult::Failure { exit_code: 1 });
        let builder = Arc::new(ScriptedBuilder::new());
        let mut orchestrator = orchestrator(&supervisor, &builder);

        let outcome = orchestrator
            .run_with_config(&config(), &RunRequest::new(TestLevel::Functionality, "x"))
            .await;
        let report = outcome.report().unwrap();

        assert_eq!(report.items[0].commands_run, 1);
        assert!(!report.items[0].passed());
        assert!(report.items[1].passed());
        // fmt, then both functionality commands; clippy never ran
        assert_eq!(supervisor.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_defaults_apply_to_host_and_target_commands() {
        let supervisor = Arc::new(ScriptedSupervisor::new());
        let builder = Arc::new(ScriptedBuilder::new());
        let mut orchestrator = orchestrator(&supervisor, &builder);

        orchestrator
            .run_with_config(&config(), &RunRequest::new(TestLevel::Cross, "x"))
            .await;

        let call = &supervisor.calls()[0];
        assert_eq!(call.command.timeout_secs, 120);
        assert_eq!(call.working_dir, PathBuf::from("/repo"));
        assert_eq!(call.env["PROFILE"], "ci");

        let runs = builder.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].0, "ubuntu");
        assert_eq!(runs[0].1.timeout_secs, 120);
    }

    #[tokio::test]
    async fn test_ceiling_override_aborts() {
        let supervisor = Arc::new(ScriptedSupervisor::new());
        let builder = Arc::new(ScriptedBuilder::new());
        let mut orchestrator = orchestrator(&supervisor, &builder);

        let request = RunRequest::new(TestLevel::Host, "x").with_ceiling(TestLevel::Style);
        let outcome = orchestrator.run_with_config(&config(), &request).await;

        assert!(matches!(outcome, RunOutcome::Aborted(FatalError::Level(_))));
        assert_eq!(outcome.exit_code(), 1);
        assert!(supervisor.calls().is_empty());
        assert!(supervisor.probes().is_empty());
    }

    #[tokio::test]
    async fn test_setup_probes_each_program_once() {
        let supervisor = Arc::new(ScriptedSupervisor::new());
        let builder = Arc::new(ScriptedBuilder::new());
        let mut orchestrator = orchestrator(&supervisor, &builder);

        orchestrator
            .run_with_config(&config(), &RunRequest::new(TestLevel::Cross, "x"))
            .await;

        assert_eq!(supervisor.probes(), vec!["cargo", "docker"]);
    }
}
