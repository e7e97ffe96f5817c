//! Error types for levelcheck-env

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while preparing an isolated environment
#[derive(Error, Debug)]
pub enum EnvError {
    /// The recipe's Dockerfile could not be read
    #[error("Recipe '{recipe}' Dockerfile {path:?} is unreadable: {source}")]
    RecipeUnreadable {
        recipe: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A target name has no characters usable in an image tag
    #[error("Target name '{0}' cannot be turned into an image tag")]
    UnusableName(String),
}
