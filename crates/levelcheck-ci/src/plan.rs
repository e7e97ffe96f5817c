//! Expansion of a level into ordered work items.

use crate::category::{categories_for_level, CheckCategory};
use crate::config::{Configuration, TargetDescriptor};
use crate::error::LevelError;
use crate::level::{LevelPolicy, TestLevel};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Where a work item runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Directly on the current machine.
    Host,

    /// Inside the named target's environment.
    Target(TargetDescriptor),
}

/// One (category, scope) pair to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub category: CheckCategory,
    pub scope: Scope,
}

impl WorkItem {
    /// Host-scoped item.
    pub fn host(category: CheckCategory) -> Self {
        Self {
            category,
            scope: Scope::Host,
        }
    }

    /// Target-scoped item.
    pub fn target(category: CheckCategory, target: TargetDescriptor) -> Self {
        Self {
            category,
            scope: Scope::Target(target),
        }
    }

    /// `"<category>@host"` or `"<category>@<target>"`.
    pub fn label(&self) -> String {
        match &self.scope {
            Scope::Host => format!("{}@host", self.category),
            Scope::Target(target) => format!("{}@{}", self.category, target.name),
        }
    }

    /// The target, for target-scoped items.
    pub fn target_descriptor(&self) -> Option<&TargetDescriptor> {
        match &self.scope {
            Scope::Host => None,
            Scope::Target(target) => Some(target),
        }
    }
}

/// Expand `level` into work items in execution order.
///
/// Host-scoped categories yield one item each. Environment categories yield
/// one item per target in file order, skipping niche targets unless
/// `include_niche` is set.
pub fn expand(
    level: TestLevel,
    policy: &LevelPolicy,
    config: &Configuration,
    include_niche: bool,
) -> Result<Vec<WorkItem>, LevelError> {
    let categories = categories_for_level(level, policy)?;

    let mut items = Vec::new();
    for category in categories {
        if !category.requires_environment() {
            items.push(WorkItem::host(category));
            continue;
        }

        for target in &config.targets {
            if target.niche && !include_niche {
                debug!(target = %target.name, "Skipping niche target");
                continue;
            }
            items.push(WorkItem::target(category, target.clone()));
        }
    }

    info!(level = %level, items = items.len(), "Expanded test plan");
    Ok(items)
}

/// Deterministic digest of the ordered item labels.
pub fn plan_digest(items: &[WorkItem]) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.label().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
