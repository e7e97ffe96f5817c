//! Container engine command lines
//!
//! Only builds argument vectors; spawning them is the caller's business.
//! Any engine with a docker-compatible CLI works (`docker`, `podman`).

use crate::recipe::{Recipe, RecipeFingerprint};
use std::collections::BTreeMap;
use std::path::Path;

/// Image label carrying the recipe fingerprint
pub const RECIPE_LABEL: &str = "levelcheck.recipe";

/// A docker-compatible container engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEngine {
    /// Engine executable
    pub program: String,
}

impl Default for ContainerEngine {
    fn default() -> Self {
        ContainerEngine::new("docker")
    }
}

/// What to run inside a built artifact
#[derive(Debug, Clone)]
pub struct RunSpec<'a> {
    pub artifact: &'a str,
    pub container: &'a str,
    /// Mounted at the same path and used as the working directory
    pub workspace: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub program: &'a str,
    pub args: &'a [String],
}

impl ContainerEngine {
    /// Create an engine handle for the given executable
    pub fn new(program: impl Into<String>) -> Self {
        ContainerEngine {
            program: program.into(),
        }
    }

    /// `build --tag <artifact> --file <dockerfile> --label ... [--build-arg K=V]... <context>`
    pub fn build_args(
        &self,
        artifact: &str,
        recipe: &Recipe,
        fingerprint: &RecipeFingerprint,
    ) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--tag".to_string(),
            artifact.to_string(),
            "--file".to_string(),
            recipe.dockerfile.to_string_lossy().into_owned(),
            "--label".to_string(),
            format!("{}={}", RECIPE_LABEL, fingerprint),
        ];
        for (key, value) in &recipe.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(recipe.context.to_string_lossy().into_owned());
        args
    }

    /// `run --rm --name <container> --volume <ws>:<ws> --workdir <ws> [--env K=V]... <artifact> <program> <args>...`
    pub fn run_args(&self, run: &RunSpec<'_>) -> Vec<String> {
        let workspace = run.workspace.to_string_lossy();
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            run.container.to_string(),
            "--volume".to_string(),
            format!("{0}:{0}", workspace),
            "--workdir".to_string(),
            workspace.into_owned(),
        ];
        for (key, value) in run.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(run.artifact.to_string());
        args.push(run.program.to_string());
        args.extend(run.args.iter().cloned());
        args
    }

    /// `rm --force <container>`
    pub fn remove_args(&self, container: &str) -> Vec<String> {
        vec!["rm".to_string(), "--force".to_string(), container.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_build_args() {
        let recipe = Recipe::new(
            "alpine",
            PathBuf::from("/repo/ci/alpine.Dockerfile"),
            PathBuf::from("/repo"),
        )
        .with_build_arg("TOOLCHAIN", "stable");
        let fp = RecipeFingerprint("ab".repeat(32));

        let args = ContainerEngine::default().build_args("levelcheck:alpine", &recipe, &fp);

        assert_eq!(&args[..5], ["build", "--tag", "levelcheck:alpine", "--file", "/repo/ci/alpine.Dockerfile"]);
        assert!(args.contains(&format!("levelcheck.recipe={}", fp)));
        assert!(args.contains(&"TOOLCHAIN=stable".to_string()));
        assert_eq!(args.last().unwrap(), "/repo");
    }

    #[test]
    fn test_run_args_mount_workspace_and_pass_env() {
        let mut env = BTreeMap::new();
        env.insert("RUST_BACKTRACE".to_string(), "1".to_string());
        let cargo_args = vec!["test".to_string(), "--workspace".to_string()];

        let args = ContainerEngine::new("podman").run_args(&RunSpec {
            artifact: "levelcheck:ubuntu",
            container: "levelcheck-ubuntu-0011",
            workspace: Path::new("/src/project"),
            env: &env,
            program: "cargo",
            args: &cargo_args,
        });

        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "--name",
                "levelcheck-ubuntu-0011",
                "--volume",
                "/src/project:/src/project",
                "--workdir",
                "/src/project",
                "--env",
                "RUST_BACKTRACE=1",
                "levelcheck:ubuntu",
                "cargo",
                "test",
                "--workspace",
            ]
        );
    }

    #[test]
    fn test_remove_args() {
        assert_eq!(
            ContainerEngine::default().remove_args("levelcheck-alpine-01"),
            vec!["rm", "--force", "levelcheck-alpine-01"]
        );
    }
}
