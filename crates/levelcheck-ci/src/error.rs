//! Error types for levelcheck orchestration
//!
//! `ConfigError`, `LevelError` and `SetupError` are fatal: they stop a run
//! before any work item executes. `BuildError` is recorded against a single
//! cross work item and never aborts its siblings.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed or missing configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read configuration {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{owner} is missing required field `{field}`")]
    MissingField { owner: String, field: &'static str },

    #[error("duplicate target name '{0}'")]
    DuplicateTarget(String),

    #[error("targets '{first}' and '{second}' both map to image tag '{tag}'")]
    TagCollision {
        first: String,
        second: String,
        tag: String,
    },

    #[error("target '{target}' references unknown recipe '{recipe}'")]
    UnknownRecipe { target: String, recipe: String },

    #[error("target '{target}' has an empty command at commands[{index}]")]
    EmptyCommand { target: String, index: usize },

    #[error("invalid value for defaults.{key}: {reason}")]
    InvalidDefault { key: &'static str, reason: String },
}

/// Requested level cannot be run under the active policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LevelError {
    #[error("unknown test level '{0}' (expected 0-3, style, functionality, host, cross or full)")]
    Unknown(String),

    #[error("level {requested} is above the configured ceiling {ceiling}")]
    AboveCeiling { requested: u8, ceiling: u8 },
}

/// A required external tool is absent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("required tool '{0}' is not installed or not in PATH")]
    ToolMissing(String),
}

/// Environment construction for one target failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("target '{target}' references unknown recipe '{recipe}'")]
    UnknownRecipe { target: String, recipe: String },

    #[error("environment for target '{target}' cannot be prepared: {cause}")]
    Unusable { target: String, cause: String },

    #[error("could not launch image build for '{target}': {cause}")]
    Launch { target: String, cause: String },

    #[error("image build for '{target}' exited with code {exit_code}")]
    Failed { target: String, exit_code: i32 },

    #[error("image build for '{target}' timed out after {after_secs}s")]
    TimedOut { target: String, after_secs: u64 },

    #[error("image build for '{target}' was interrupted")]
    Interrupted { target: String },
}

/// Errors that abort a run before any work item executes
#[derive(Error, Debug)]
pub enum FatalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Level(#[from] LevelError),

    #[error(transparent)]
    Setup(#[from] SetupError),
}
