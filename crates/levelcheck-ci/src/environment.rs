//! Isolated environments for cross-target work items.
//!
//! `ContainerBuilder` builds one image per target through a docker-compatible
//! engine and runs check commands in throwaway containers of that image with
//! the workspace mounted at the same path. Builds are memoised for the
//! duration of a run; layer caching across runs is left to the engine.

use crate::category::Command;
use crate::config::{Configuration, TargetDescriptor};
use crate::error::BuildError;
use crate::supervisor::{ExecutionResult, ProcessSupervisor};
use async_trait::async_trait;
use levelcheck_env::{artifact_name, container_name, fingerprint, ContainerEngine, Recipe, RunSpec};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Exit codes the engine itself uses for "could not run the command".
const ENGINE_LAUNCH_CODES: [i32; 3] = [125, 126, 127];

/// Reference to a built environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentHandle {
    /// Target the environment was built for.
    pub target: String,

    /// Name of the built artifact.
    pub artifact: String,

    /// Fingerprint of the recipe it was built from.
    pub recipe_fingerprint: String,
}

/// Produces environments for targets and runs commands inside them.
#[async_trait]
pub trait EnvironmentBuilder: Send + Sync {
    /// Build, or reuse, the environment for `target`.
    async fn ensure(&self, target: &TargetDescriptor) -> Result<EnvironmentHandle, BuildError>;

    /// Run `command` as though on the handle's target.
    async fn run_in_environment(
        &self,
        handle: &EnvironmentHandle,
        command: &Command,
        env: &BTreeMap<String, String>,
    ) -> ExecutionResult;

    /// Tear down anything still running.
    async fn cleanup(&self);
}

/// Container-engine backed environment builder.
pub struct ContainerBuilder {
    supervisor: Arc<dyn ProcessSupervisor>,
    engine: ContainerEngine,
    image_prefix: String,
    workspace: PathBuf,
    recipes: BTreeMap<String, Recipe>,
    build_timeout_secs: u64,
    run_nonce: String,
    built: Mutex<HashMap<String, EnvironmentHandle>>,
    running: Mutex<BTreeSet<String>>,
}

impl ContainerBuilder {
    /// Create a builder for the recipes and defaults of `config`.
    pub fn new(supervisor: Arc<dyn ProcessSupervisor>, config: &Configuration) -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self {
            supervisor,
            engine: ContainerEngine::new(config.defaults.engine.clone()),
            image_prefix: config.defaults.image_prefix.clone(),
            workspace: config.workspace.clone(),
            recipes: config.recipes.clone(),
            build_timeout_secs: config.defaults.timeout_secs,
            run_nonce: nonce[..8].to_string(),
            built: Mutex::new(HashMap::new()),
            running: Mutex::new(BTreeSet::new()),
        }
    }

    async fn build(&self, target: &TargetDescriptor) -> Result<EnvironmentHandle, BuildError> {
        let recipe = self
            .recipes
            .get(&target.recipe)
            .ok_or_else(|| BuildError::UnknownRecipe {
                target: target.name.clone(),
                recipe: target.recipe.clone(),
            })?;

        let unusable = |e: levelcheck_env::EnvError| BuildError::Unusable {
            target: target.name.clone(),
            cause: e.to_string(),
        };
        let artifact = artifact_name(&self.image_prefix, &target.name).map_err(unusable)?;
        let recipe_fingerprint = fingerprint(recipe).map_err(unusable)?;

        info!(
            target = %target.name,
            recipe = %recipe.id,
            "Building environment {} ({})",
            artifact,
            recipe_fingerprint.short()
        );

        let command = Command::new(
            self.engine.program.clone(),
            self.engine.build_args(&artifact, recipe, &recipe_fingerprint),
        )
        .with_timeout(self.build_timeout_secs);

        match self
            .supervisor
            .run(&command, &self.workspace, &BTreeMap::new())
            .await
        {
            ExecutionResult::Success => Ok(EnvironmentHandle {
                target: target.name.clone(),
                artifact,
                recipe_fingerprint: recipe_fingerprint.0,
            }),
            ExecutionResult::Failure { exit_code } => Err(BuildError::Failed {
                target: target.name.clone(),
                exit_code,
            }),
            ExecutionResult::LaunchError { cause } => Err(BuildError::Launch {
                target: target.name.clone(),
                cause,
            }),
            ExecutionResult::TimedOut { after_secs } => Err(BuildError::TimedOut {
                target: target.name.clone(),
                after_secs,
            }),
            ExecutionResult::Interrupted => Err(BuildError::Interrupted {
                target: target.name.clone(),
            }),
        }
    }

    async fn remove_container(&self, container: &str) {
        let command = Command::new(self.engine.program.clone(), self.engine.remove_args(container));
        let result = self.supervisor.cleanup(&command, &self.workspace).await;
        if !result.is_success() {
            warn!(container, "Container removal returned {:?}", result);
        }
    }
}

#[async_trait]
impl EnvironmentBuilder for ContainerBuilder {
    async fn ensure(&self, target: &TargetDescriptor) -> Result<EnvironmentHandle, BuildError> {
        if let Some(handle) = self.built.lock().await.get(&target.name) {
            debug!(target = %target.name, "Reusing environment {}", handle.artifact);
            return Ok(handle.clone());
        }

        let handle = self.build(target).await?;
        self.built
            .lock()
            .await
            .insert(target.name.clone(), handle.clone());
        Ok(handle)
    }

    async fn run_in_environment(
        &self,
        handle: &EnvironmentHandle,
        command: &Command,
        env: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        let container = match container_name(&handle.target, &self.run_nonce) {
            Ok(name) => name,
            Err(e) => {
                return ExecutionResult::LaunchError {
                    cause: e.to_string(),
                }
            }
        };

        let engine_command = Command {
            program: self.engine.program.clone(),
            args: self.engine.run_args(&RunSpec {
                artifact: &handle.artifact,
                container: &container,
                workspace: &self.workspace,
                env,
                program: &command.program,
                args: &command.args,
            }),
            expected_code: command.expected_code,
            timeout_secs: command.timeout_secs,
        };

        self.running.lock().await.insert(container.clone());
        let result = self
            .supervisor
            .run(&engine_command, &self.workspace, &BTreeMap::new())
            .await;
        self.running.lock().await.remove(&container);

        match result {
            ExecutionResult::Failure { exit_code } if ENGINE_LAUNCH_CODES.contains(&exit_code) => {
                ExecutionResult::LaunchError {
                    cause: format!(
                        "{} could not start `{}` in {} (exit code {})",
                        self.engine.program, command.program, handle.artifact, exit_code
                    ),
                }
            }
            ExecutionResult::Interrupted | ExecutionResult::TimedOut { .. } => {
                // Killing the engine client leaves the container running
                self.remove_container(&container).await;
                result
            }
            other => other,
        }
    }

    async fn cleanup(&self) {
        let leftovers: Vec<String> = std::mem::take(&mut *self.running.lock().await)
            .into_iter()
            .collect();
        for container in leftovers {
            info!(container = %container, "Removing leftover container");
            self.remove_container(&container).await;
        }
    }
}
