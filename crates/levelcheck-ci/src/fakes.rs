//! Scripted fakes for the process and environment seams (testing only)
//!
//! `ScriptedSupervisor` and `ScriptedBuilder` never spawn anything. They
//! record every call and answer from a script, falling back to success.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::category::Command;
use crate::config::TargetDescriptor;
use crate::environment::{EnvironmentBuilder, EnvironmentHandle};
use crate::error::BuildError;
use crate::interrupt::InterruptHandle;
use crate::supervisor::{ExecutionResult, ProcessSupervisor};

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Rule {
    pattern: String,
    result: ExecutionResult,
    once: bool,
}

/// Ordered match rules; one-shot rules are consumed when they answer.
#[derive(Debug, Default)]
struct Script {
    rules: Vec<Rule>,
}

impl Script {
    fn push(&mut self, pattern: &str, result: ExecutionResult, once: bool) {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            result,
            once,
        });
    }

    fn answer(&mut self, line: &str) -> ExecutionResult {
        let Some(index) = self.rules.iter().position(|r| line.contains(&r.pattern)) else {
            return ExecutionResult::Success;
        };
        if self.rules[index].once {
            self.rules.remove(index).result
        } else {
            self.rules[index].result.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedSupervisor
// ---------------------------------------------------------------------------

/// One recorded `run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: Command,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct SupervisorState {
    script: Script,
    missing: BTreeSet<String>,
    calls: Vec<RecordedCall>,
    cleanups: Vec<Command>,
    probes: Vec<String>,
    interrupt_after: Option<(usize, InterruptHandle)>,
}

/// Process supervisor answering from a script.
///
/// Rules match when the rendered command line contains the rule's pattern.
/// The first matching rule answers; unmatched commands succeed.
#[derive(Debug, Default)]
pub struct ScriptedSupervisor {
    state: Mutex<SupervisorState>,
}

impl ScriptedSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next matching command with `result`.
    pub fn script_next(&self, pattern: &str, result: ExecutionResult) {
        self.state.lock().unwrap().script.push(pattern, result, true);
    }

    /// Answer every matching command with `result`.
    pub fn script(&self, pattern: &str, result: ExecutionResult) {
        self.state.lock().unwrap().script.push(pattern, result, false);
    }

    /// Report `program` as not installed.
    pub fn mark_missing(&self, program: &str) {
        self.state.lock().unwrap().missing.insert(program.to_string());
    }

    /// Fire `handle` once `count` commands have finished.
    pub fn interrupt_after(&self, count: usize, handle: InterruptHandle) {
        self.state.lock().unwrap().interrupt_after = Some((count, handle));
    }

    /// Every `run` call so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Every `cleanup` call so far, in order.
    pub fn cleanup_calls(&self) -> Vec<Command> {
        self.state.lock().unwrap().cleanups.clone()
    }

    /// Programs probed with `is_available`.
    pub fn probes(&self) -> Vec<String> {
        self.state.lock().unwrap().probes.clone()
    }
}

#[async_trait]
impl ProcessSupervisor for ScriptedSupervisor {
    async fn run(
        &self,
        command: &Command,
        working_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall {
            command: command.clone(),
            working_dir: working_dir.to_path_buf(),
            env: env.clone(),
        });
        let result = state.script.answer(&command.to_string());

        let done = state.calls.len();
        if let Some((count, handle)) = &state.interrupt_after {
            if done >= *count {
                handle.trigger();
            }
        }
        result
    }

    async fn cleanup(&self, command: &Command, _working_dir: &Path) -> ExecutionResult {
        self.state.lock().unwrap().cleanups.push(command.clone());
        ExecutionResult::Success
    }

    async fn is_available(&self, program: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state.probes.push(program.to_string());
        !state.missing.contains(program)
    }
}

// ---------------------------------------------------------------------------
// ScriptedBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BuilderState {
    failing: HashMap<String, BuildError>,
    scripts: HashMap<String, Script>,
    built: BTreeSet<String>,
    builds: Vec<String>,
    runs: Vec<(String, Command)>,
    cleanups: usize,
}

/// Environment builder answering from per-target scripts.
///
/// Successful builds are memoised per target the way a real builder does,
/// so `builds()` counts actual builds rather than `ensure` calls.
#[derive(Debug, Default)]
pub struct ScriptedBuilder {
    state: Mutex<BuilderState>,
}

impl ScriptedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every build for `target` fail with `error`.
    pub fn fail_build(&self, target: &str, error: BuildError) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(target.to_string(), error);
    }

    /// Answer every command in `target` whose line contains `pattern` with `result`.
    pub fn script(&self, target: &str, pattern: &str, result: ExecutionResult) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(target.to_string())
            .or_default()
            .push(pattern, result, false);
    }

    /// Targets built so far, in build order.
    pub fn builds(&self) -> Vec<String> {
        self.state.lock().unwrap().builds.clone()
    }

    /// Commands run inside environments, with their target.
    pub fn runs(&self) -> Vec<(String, Command)> {
        self.state.lock().unwrap().runs.clone()
    }

    /// Number of `cleanup` calls.
    pub fn cleanup_count(&self) -> usize {
        self.state.lock().unwrap().cleanups
    }
}

#[async_trait]
impl EnvironmentBuilder for ScriptedBuilder {
    async fn ensure(&self, target: &TargetDescriptor) -> Result<EnvironmentHandle, BuildError> {
        let mut state = self.state.lock().unwrap();
        let handle = EnvironmentHandle {
            target: target.name.clone(),
            artifact: format!("levelcheck:{}", target.name),
            recipe_fingerprint: format!("fake-{}", target.recipe),
        };
        if state.built.contains(&target.name) {
            return Ok(handle);
        }

        state.builds.push(target.name.clone());
        if let Some(error) = state.failing.get(&target.name) {
            return Err(error.clone());
        }
        state.built.insert(target.name.clone());
        Ok(handle)
    }

    async fn run_in_environment(
        &self,
        handle: &EnvironmentHandle,
        command: &Command,
        _env: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        let mut state = self.state.lock().unwrap();
        state.runs.push((handle.target.clone(), command.clone()));
        match state.scripts.get_mut(&handle.target) {
            Some(script) => script.answer(&command.to_string()),
            None => ExecutionResult::Success,
        }
    }

    async fn cleanup(&self) {
        self.state.lock().unwrap().cleanups += 1;
    }
}
