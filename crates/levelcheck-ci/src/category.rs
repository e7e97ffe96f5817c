//! Check categories and the fixed commands behind them.

use crate::config::TargetDescriptor;
use crate::error::LevelError;
use crate::level::{LevelPolicy, TestLevel};
use serde::{Deserialize, Serialize};

/// Class of validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    /// rustfmt and clippy
    Style,

    /// unit and doc tests
    Functionality,

    /// full build and test pass on the current host
    Host,

    /// functionality tests inside each target's isolated environment
    Cross,
}

impl CheckCategory {
    /// All categories in execution order.
    pub const ALL: [CheckCategory; 4] = [
        CheckCategory::Style,
        CheckCategory::Functionality,
        CheckCategory::Host,
        CheckCategory::Cross,
    ];

    /// Get the category name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            CheckCategory::Style => "style",
            CheckCategory::Functionality => "functionality",
            CheckCategory::Host => "host",
            CheckCategory::Cross => "cross",
        }
    }

    /// Lowest level that includes this category under the inclusive gate.
    pub fn rank(&self) -> u8 {
        match self {
            CheckCategory::Style => 0,
            CheckCategory::Functionality => 1,
            CheckCategory::Host => 2,
            CheckCategory::Cross => 3,
        }
    }

    /// Whether each target needs its own built environment.
    pub fn requires_environment(&self) -> bool {
        matches!(self, CheckCategory::Cross)
    }
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One external command invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    /// Executable name or path.
    pub program: String,

    /// Arguments, in order.
    pub args: Vec<String>,

    /// Exit code that counts as success.
    pub expected_code: i32,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

impl Command {
    /// Create a command expecting exit code 0 with no timeout.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            expected_code: 0,
            timeout_secs: 0,
        }
    }

    /// Build a command from an argv vector (first element is the executable).
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the exit code that counts as success.
    pub fn expecting(mut self, code: i32) -> Self {
        self.expected_code = code;
        self
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Categories a level expands to, in execution order.
pub fn categories_for_level(
    level: TestLevel,
    policy: &LevelPolicy,
) -> Result<Vec<CheckCategory>, LevelError> {
    policy.check(level)?;
    Ok(CheckCategory::ALL
        .into_iter()
        .filter(|category| policy.gate.admits(level, category.rank()))
        .collect())
}

/// Commands behind a category, before any target adaptation.
pub fn commands_for(category: CheckCategory) -> Vec<Command> {
    match category {
        CheckCategory::Style => vec![
            Command::new("cargo", ["fmt", "--all", "--", "--check"]),
            Command::new(
                "cargo",
                ["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
            ),
        ],
        CheckCategory::Functionality | CheckCategory::Cross => vec![
            Command::new("cargo", ["test", "--workspace", "--tests"]),
            Command::new("cargo", ["test", "--workspace", "--doc"]),
        ],
        CheckCategory::Host => vec![
            Command::new("cargo", ["build", "--workspace", "--all-targets"]),
            Command::new(
                "cargo",
                ["test", "--workspace", "--all-targets", "--", "--include-ignored"],
            ),
        ],
    }
}

/// Commands run inside a target's environment.
///
/// A target's own `commands` replace the defaults verbatim. Otherwise the
/// cross defaults get the target's triple and feature flags.
pub fn commands_for_target(target: &TargetDescriptor) -> Vec<Command> {
    if let Some(overrides) = &target.commands {
        return overrides.clone();
    }

    commands_for(CheckCategory::Cross)
        .into_iter()
        .map(|command| adapt_cargo_for_target(command, target))
        .collect()
}

fn adapt_cargo_for_target(mut command: Command, target: &TargetDescriptor) -> Command {
    if command.program != "cargo" {
        return command;
    }

    let mut flags = Vec::new();
    if let Some(triple) = &target.triple {
        flags.push("--target".to_string());
        flags.push(triple.clone());
    }
    if !target.features.is_empty() {
        flags.push("--features".to_string());
        flags.push(target.features.join(","));
    }
    if target.no_default_features {
        flags.push("--no-default-features".to_string());
    }

    // Cargo flags must precede the `--` that starts the test binary's args
    let at = command
        .args
        .iter()
        .position(|arg| arg == "--")
        .unwrap_or(command.args.len());
    for (offset, flag) in flags.into_iter().enumerate() {
        command.args.insert(at + offset, flag);
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LevelGate;
    use std::collections::BTreeMap;

    fn target(name: &str) -> TargetDescriptor {
        TargetDescriptor {
            name: name.to_string(),
            recipe: "ubuntu".to_string(),
            triple: None,
            features: Vec::new(),
            no_default_features: false,
            niche: false,
            env: BTreeMap::new(),
            commands: None,
        }
    }

    #[test]
    fn test_category_names() {
        assert_eq!(CheckCategory::Style.name(), "style");
        assert_eq!(CheckCategory::Functionality.name(), "functionality");
        assert_eq!(CheckCategory::Host.name(), "host");
        assert_eq!(CheckCategory::Cross.name(), "cross");
    }

    #[test]
    fn test_only_cross_requires_environment() {
        for category in CheckCategory::ALL {
            assert_eq!(
                category.requires_environment(),
                category == CheckCategory::Cross
            );
        }
    }

    #[test]
    fn test_inclusive_levels() {
        let policy = LevelPolicy::default();
        assert_eq!(
            categories_for_level(TestLevel::Style, &policy).unwrap(),
            vec![CheckCategory::Style]
        );
        assert_eq!(
            categories_for_level(TestLevel::Functionality, &policy).unwrap(),
            vec![CheckCategory::Style, CheckCategory::Functionality]
        );
        assert_eq!(
            categories_for_level(TestLevel::Host, &policy).unwrap(),
            vec![
                CheckCategory::Style,
                CheckCategory::Functionality,
                CheckCategory::Host
            ]
        );
        assert_eq!(
            categories_for_level(TestLevel::Cross, &policy).unwrap(),
            CheckCategory::ALL.to_vec()
        );
    }

    #[test]
    fn test_exclusive_levels_cap_at_host() {
        let policy = LevelPolicy {
            gate: LevelGate::Exclusive,
            ceiling: TestLevel::Cross,
        };
        assert_eq!(
            categories_for_level(TestLevel::Functionality, &policy).unwrap(),
            vec![CheckCategory::Style]
        );
        assert_eq!(
            categories_for_level(TestLevel::Cross, &policy).unwrap(),
            vec![
                CheckCategory::Style,
                CheckCategory::Functionality,
                CheckCategory::Host
            ]
        );
    }

    #[test]
    fn test_levels_are_cumulative_under_every_gate() {
        for gate in [LevelGate::Inclusive, LevelGate::Exclusive] {
            let policy = LevelPolicy {
                gate,
                ceiling: TestLevel::Cross,
            };
            for low in TestLevel::ALL {
                for high in TestLevel::ALL.into_iter().filter(|l| *l > low) {
                    let lower = categories_for_level(low, &policy).unwrap();
                    let higher = categories_for_level(high, &policy).unwrap();
                    assert!(
                        lower.iter().all(|c| higher.contains(c)),
                        "{:?}: {:?} not contained in {:?}",
                        gate,
                        lower,
                        higher
                    );
                    assert_eq!(&higher[..lower.len()], &lower[..]);
                }
            }
        }
    }

    #[test]
    fn test_level_above_ceiling_is_rejected() {
        let policy = LevelPolicy {
            gate: LevelGate::Inclusive,
            ceiling: TestLevel::Host,
        };
        assert!(matches!(
            categories_for_level(TestLevel::Cross, &policy),
            Err(LevelError::AboveCeiling { .. })
        ));
    }

    #[test]
    fn test_style_commands() {
        let commands = commands_for(CheckCategory::Style);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].to_string(), "cargo fmt --all -- --check");
        assert!(commands.iter().all(|c| c.expected_code == 0));
    }

    #[test]
    fn test_cross_defaults_get_target_flags() {
        let mut t = target("musl");
        t.triple = Some("x86_64-unknown-linux-musl".to_string());
        t.features = vec!["x11".to_string(), "wayland".to_string()];
        t.no_default_features = true;

        let commands = commands_for_target(&t);
        assert_eq!(
            commands[0].to_string(),
            "cargo test --workspace --tests --target x86_64-unknown-linux-musl \
             --features x11,wayland --no-default-features"
        );
    }

    #[test]
    fn test_target_flags_go_before_double_dash() {
        let t = TargetDescriptor {
            triple: Some("aarch64-unknown-linux-gnu".to_string()),
            ..target("arm")
        };
        let adapted = adapt_cargo_for_target(
            Command::new("cargo", ["test", "--", "--include-ignored"]),
            &t,
        );
        assert_eq!(
            adapted.args,
            vec![
                "test",
                "--target",
                "aarch64-unknown-linux-gnu",
                "--",
                "--include-ignored"
            ]
        );
    }

    #[test]
    fn test_target_overrides_replace_defaults() {
        let t = TargetDescriptor {
            commands: Some(vec![Command::new("make", ["check"])]),
            features: vec!["ignored".to_string()],
            ..target("custom")
        };
        assert_eq!(commands_for_target(&t), vec![Command::new("make", ["check"])]);
    }

    #[test]
    fn test_command_display_quotes_spaces() {
        let command = Command::new("sh", ["-c", "exit 3"]);
        assert_eq!(command.to_string(), "sh -c 'exit 3'");
    }

    #[test]
    fn test_command_from_argv() {
        let argv = vec!["cargo".to_string(), "nextest".to_string(), "run".to_string()];
        let command = Command::from_argv(&argv).unwrap();
        assert_eq!(command.program, "cargo");
        assert_eq!(command.args, vec!["nextest", "run"]);
        assert!(Command::from_argv(&[]).is_none());
    }
}
