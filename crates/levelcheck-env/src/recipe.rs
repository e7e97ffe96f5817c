//! Environment recipes and their fingerprints
//!
//! A recipe names the image definition a target is built from. The
//! fingerprint is a content hash of that definition, attached to the built
//! image as a label so a rebuild from an unchanged recipe is recognisable
//! in the engine's own cache.

use crate::error::EnvError;
use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An image definition that environments are built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    /// Identifier targets refer to
    pub id: String,
    /// Path to the Dockerfile (absolute once loaded)
    pub dockerfile: PathBuf,
    /// Build context directory (absolute once loaded)
    pub context: PathBuf,
    /// `--build-arg` values, sorted by key
    pub build_args: BTreeMap<String, String>,
}

impl Recipe {
    /// Create a recipe with no build arguments
    pub fn new(id: impl Into<String>, dockerfile: PathBuf, context: PathBuf) -> Self {
        Recipe {
            id: id.into(),
            dockerfile,
            context,
            build_args: BTreeMap::new(),
        }
    }

    /// Add a build argument
    pub fn with_build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.insert(key.into(), value.into());
        self
    }
}

/// Content hash of a recipe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RecipeFingerprint(pub String);

/// Hex digits kept when a digest is shown to people
pub const SHORT_HASH_LEN: usize = 12;

/// Leading `SHORT_HASH_LEN` characters of a hex digest, or all of a shorter one
pub fn short_hash(digest: &str) -> &str {
    digest.get(..SHORT_HASH_LEN).unwrap_or(digest)
}

impl RecipeFingerprint {
    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        short_hash(&self.0)
    }
}

impl std::fmt::Display for RecipeFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fingerprint a recipe from its Dockerfile bytes and build arguments
pub fn fingerprint(recipe: &Recipe) -> Result<RecipeFingerprint> {
    let content =
        std::fs::read(&recipe.dockerfile).map_err(|source| EnvError::RecipeUnreadable {
            recipe: recipe.id.clone(),
            path: recipe.dockerfile.clone(),
            source,
        })?;

    let fingerprint = fingerprint_bytes(&content, &recipe.build_args);
    debug!(recipe = %recipe.id, "Recipe fingerprint: {}", fingerprint.short());
    Ok(fingerprint)
}

fn fingerprint_bytes(dockerfile: &[u8], build_args: &BTreeMap<String, String>) -> RecipeFingerprint {
    let mut hasher = Sha256::new();

    // Normalize line endings so checkouts on different platforms agree
    let normalized: Vec<u8> = dockerfile.iter().copied().filter(|b| *b != b'\r').collect();
    hasher.update(&normalized);
    hasher.update(b"\0");

    for (key, value) in build_args {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\0");
    }

    RecipeFingerprint(hex::encode(hasher.finalize()))
}

/// Resolve a possibly relative path against a base directory
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let dir = tempdir().unwrap();
        let dockerfile = dir.path().join("ubuntu.Dockerfile");
        std::fs::write(&dockerfile, "FROM rust:1-bookworm\n").unwrap();

        let recipe = Recipe::new("ubuntu", dockerfile, dir.path().to_path_buf());
        let fp = fingerprint(&recipe).unwrap();

        assert_eq!(fp.0.len(), 64);
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn test_short_hash_of_short_input() {
        assert_eq!(short_hash("abc123"), "abc123");
        assert_eq!(short_hash("0123456789abcdef"), "0123456789ab");
    }

    #[test]
    fn test_changing_dockerfile_changes_fingerprint() {
        let dir = tempdir().unwrap();
        let dockerfile = dir.path().join("Dockerfile");
        let recipe = Recipe::new("alpine", dockerfile.clone(), dir.path().to_path_buf());

        std::fs::write(&dockerfile, "FROM rust:1-alpine3.19\n").unwrap();
        let fp1 = fingerprint(&recipe).unwrap();

        std::fs::write(&dockerfile, "FROM rust:1-alpine3.20\n").unwrap();
        let fp2 = fingerprint(&recipe).unwrap();

        assert_ne!(fp1, fp2);
    }

    #[test]
    fn test_build_args_change_fingerprint() {
        let plain = fingerprint_bytes(b"FROM scratch", &BTreeMap::new());
        let mut args = BTreeMap::new();
        args.insert("TOOLCHAIN".to_string(), "nightly".to_string());
        let with_args = fingerprint_bytes(b"FROM scratch", &args);

        assert_ne!(plain, with_args);
    }

    #[test]
    fn test_line_endings_do_not_change_fingerprint() {
        let unix = fingerprint_bytes(b"FROM scratch\nRUN true\n", &BTreeMap::new());
        let windows = fingerprint_bytes(b"FROM scratch\r\nRUN true\r\n", &BTreeMap::new());

        assert_eq!(unix, windows);
    }

    #[test]
    fn test_missing_dockerfile_is_unreadable() {
        let dir = tempdir().unwrap();
        let recipe = Recipe::new(
            "ghost",
            dir.path().join("missing.Dockerfile"),
            dir.path().to_path_buf(),
        );

        let err = fingerprint(&recipe).unwrap_err();
        assert!(matches!(err, EnvError::RecipeUnreadable { ref recipe, .. } if recipe == "ghost"));
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/work/repo");
        assert_eq!(
            resolve_path(base, Path::new("ci/Dockerfile")),
            PathBuf::from("/work/repo/ci/Dockerfile")
        );
        assert_eq!(
            resolve_path(base, Path::new("/etc/Dockerfile")),
            PathBuf::from("/etc/Dockerfile")
        );
    }
}
