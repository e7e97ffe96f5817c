//! Stable names for built artifacts and running containers
//!
//! The artifact name depends only on the image prefix and the target name,
//! so rebuilding a target always lands on the same tag.

use crate::error::EnvError;
use crate::Result;

/// Longest tag the engines accept
const MAX_TAG_LEN: usize = 128;

/// Turn a target name into a valid image tag
///
/// Lowercases, replaces anything outside `[a-z0-9_.-]` with `-`, strips
/// leading `.`/`-` and truncates to the engine limit.
pub fn sanitize_tag(name: &str) -> Result<String> {
    let mapped: String = name
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = mapped.trim_start_matches(|c: char| c == '.' || c == '-');
    let tag: String = trimmed.chars().take(MAX_TAG_LEN).collect();

    if tag.is_empty() {
        return Err(EnvError::UnusableName(name.to_string()));
    }
    Ok(tag)
}

/// Name of the image built for a target: `<prefix>:<tag>`
pub fn artifact_name(image_prefix: &str, target: &str) -> Result<String> {
    Ok(format!("{}:{}", image_prefix, sanitize_tag(target)?))
}

/// Name of a container running checks for a target during one run
pub fn container_name(target: &str, run_nonce: &str) -> Result<String> {
    Ok(format!("levelcheck-{}-{}", sanitize_tag(target)?, run_nonce))
}
