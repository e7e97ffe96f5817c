//! levelcheck-env: isolated environments for cross-target checks
//!
//! This crate holds the environment layer of levelcheck. It knows how a
//! target's image is described (recipes), how built artifacts and running
//! containers are named, and which engine command lines build and run them.
//! It never spawns processes itself; the orchestrator feeds these command
//! lines to its process supervisor.

pub mod engine;
pub mod error;
pub mod naming;
pub mod recipe;

pub use engine::{ContainerEngine, RunSpec, RECIPE_LABEL};
pub use error::EnvError;
pub use naming::{artifact_name, container_name, sanitize_tag};
pub use recipe::{fingerprint, resolve_path, short_hash, Recipe, RecipeFingerprint};

/// Result type for environment operations
pub type Result<T> = std::result::Result<T, EnvError>;
