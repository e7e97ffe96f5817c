//! Configuration document: targets, recipes and global defaults.
//!
//! The document is TOML. Unknown keys are ignored so older binaries keep
//! reading newer files. Required fields are checked after parsing so the
//! error can name the owning target or recipe.
//!
//! ```toml
//! [defaults]
//! engine = "docker"
//! image_prefix = "ghcr.io/acme/levelcheck"
//!
//! [recipes.ubuntu]
//! dockerfile = "ci/ubuntu.Dockerfile"
//!
//! [[targets]]
//! name = "ubuntu"
//! recipe = "ubuntu"
//! triple = "x86_64-unknown-linux-gnu"
//! ```

use crate::category::Command;
use crate::error::ConfigError;
use crate::level::{LevelGate, LevelPolicy, TestLevel};
use levelcheck_env::{resolve_path, sanitize_tag, Recipe};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default container engine executable.
pub const DEFAULT_ENGINE: &str = "docker";

/// Default repository part of built artifact names.
pub const DEFAULT_IMAGE_PREFIX: &str = "levelcheck";

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "levelcheck.toml";

/// Result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// One platform to validate against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Unique name, also the source of the artifact tag.
    pub name: String,

    /// Identifier of the recipe the environment is built from.
    pub recipe: String,

    /// Target triple passed to cargo as `--target`.
    pub triple: Option<String>,

    /// Cargo features to enable.
    pub features: Vec<String>,

    /// Pass `--no-default-features` to cargo.
    pub no_default_features: bool,

    /// Skipped unless the run opts into niche targets.
    pub niche: bool,

    /// Environment variables set inside the environment.
    pub env: BTreeMap<String, String>,

    /// Replaces the default cross commands when present.
    pub commands: Option<Vec<Command>>,
}

/// Global settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    /// Container engine executable.
    pub engine: String,

    /// Repository part of artifact names.
    pub image_prefix: String,

    /// Per-command timeout in seconds (0 = none).
    pub timeout_secs: u64,

    /// Variables applied to every command.
    pub env: BTreeMap<String, String>,

    /// Level interpretation.
    pub level_policy: LevelPolicy,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            engine: DEFAULT_ENGINE.to_string(),
            image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
            timeout_secs: 0,
            env: BTreeMap::new(),
            level_policy: LevelPolicy::default(),
        }
    }
}

/// A loaded test plan. Never mutated after loading.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// File the configuration was read from.
    pub source: PathBuf,

    /// Directory the checks run in.
    pub workspace: PathBuf,

    /// Global settings.
    pub defaults: Defaults,

    /// Declared recipes by identifier.
    pub recipes: BTreeMap<String, Recipe>,

    /// Targets in file order.
    pub targets: Vec<TargetDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default)]
    defaults: RawDefaults,
    #[serde(default)]
    recipes: BTreeMap<String, RawRecipe>,
    #[serde(default)]
    targets: Vec<RawTarget>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDefaults {
    workspace: Option<PathBuf>,
    engine: Option<String>,
    image_prefix: Option<String>,
    timeout_secs: Option<u64>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    level_gate: Option<String>,
    level_ceiling: Option<toml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawRecipe {
    dockerfile: Option<PathBuf>,
    context: Option<PathBuf>,
    #[serde(default)]
    build_args: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    name: Option<String>,
    recipe: Option<String>,
    triple: Option<String>,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    no_default_features: bool,
    #[serde(default)]
    niche: bool,
    #[serde(default)]
    env: BTreeMap<String, String>,
    commands: Option<Vec<Vec<String>>>,
}

impl Configuration {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from {:?}", path);

        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base_dir = absolutize(&base_dir).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&text, path, &base_dir)
    }

    /// Validate a configuration held in memory; relative paths resolve against `base_dir`.
    pub fn from_toml_str(text: &str, base_dir: &Path) -> Result<Self> {
        Self::parse(text, &base_dir.join(DEFAULT_CONFIG_FILE), base_dir)
    }

    fn parse(text: &str, source: &Path, base_dir: &Path) -> Result<Self> {
        let raw: RawDocument = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: source.to_path_buf(),
            source: e,
        })?;

        let workspace = raw
            .defaults
            .workspace
            .as_deref()
            .map(|ws| resolve_path(base_dir, ws))
            .unwrap_or_else(|| base_dir.to_path_buf());

        let defaults = validate_defaults(raw.defaults)?;

        let mut recipes = BTreeMap::new();
        for (id, raw_recipe) in raw.recipes {
            let dockerfile = raw_recipe.dockerfile.ok_or_else(|| ConfigError::MissingField {
                owner: format!("recipe '{}'", id),
                field: "dockerfile",
            })?;
            let context = raw_recipe.context.unwrap_or_else(|| PathBuf::from("."));
            let recipe = Recipe {
                id: id.clone(),
                dockerfile: resolve_path(&workspace, &dockerfile),
                context: resolve_path(&workspace, &context),
                build_args: raw_recipe.build_args,
            };
            recipes.insert(id, recipe);
        }

        let mut seen = HashSet::new();
        let mut tags: HashMap<String, String> = HashMap::new();
        let mut targets = Vec::with_capacity(raw.targets.len());
        for (index, raw_target) in raw.targets.into_iter().enumerate() {
            let target = validate_target(index, raw_target, &recipes)?;
            if !seen.insert(target.name.clone()) {
                return Err(ConfigError::DuplicateTarget(target.name));
            }
            // Unusable names surface later as a build error on their own item
            if let Ok(tag) = sanitize_tag(&target.name) {
                if let Some(first) = tags.get(&tag) {
                    return Err(ConfigError::TagCollision {
                        first: first.clone(),
                        second: target.name,
                        tag,
                    });
                }
                tags.insert(tag, target.name.clone());
            }
            targets.push(target);
        }

        debug!(
            recipes = recipes.len(),
            targets = targets.len(),
            "Configuration validated"
        );

        Ok(Configuration {
            source: source.to_path_buf(),
            workspace,
            defaults,
            recipes,
            targets,
        })
    }

    /// Look up a target by name.
    pub fn target(&self, name: &str) -> Option<&TargetDescriptor> {
        self.targets.iter().find(|t| t.name == name)
    }
}

fn validate_defaults(raw: RawDefaults) -> Result<Defaults> {
    let fallback = Defaults::default();

    let engine = non_empty("engine", raw.engine)?.unwrap_or(fallback.engine);
    let image_prefix = non_empty("image_prefix", raw.image_prefix)?.unwrap_or(fallback.image_prefix);

    let gate = match raw.level_gate {
        Some(gate) => gate
            .parse::<LevelGate>()
            .map_err(|reason| ConfigError::InvalidDefault {
                key: "level_gate",
                reason,
            })?,
        None => fallback.level_policy.gate,
    };

    let ceiling = match raw.level_ceiling {
        None => fallback.level_policy.ceiling,
        Some(toml::Value::Integer(n)) => u8::try_from(n)
            .ok()
            .and_then(|n| TestLevel::from_u8(n).ok())
            .ok_or_else(|| ConfigError::InvalidDefault {
                key: "level_ceiling",
                reason: format!("{} is not a level between 0 and 3", n),
            })?,
        Some(toml::Value::String(s)) => {
            s.parse::<TestLevel>()
                .map_err(|e| ConfigError::InvalidDefault {
                    key: "level_ceiling",
                    reason: e.to_string(),
                })?
        }
        Some(other) => {
            return Err(ConfigError::InvalidDefault {
                key: "level_ceiling",
                reason: format!("expected an integer or level name, got {}", other.type_str()),
            })
        }
    };

    Ok(Defaults {
        engine,
        image_prefix,
        timeout_secs: raw.timeout_secs.unwrap_or(fallback.timeout_secs),
        env: raw.env,
        level_policy: LevelPolicy { gate, ceiling },
    })
}

fn non_empty(key: &'static str, value: Option<String>) -> Result<Option<String>> {
    match value {
        Some(v) if v.trim().is_empty() => Err(ConfigError::InvalidDefault {
            key,
            reason: "must not be empty".to_string(),
        }),
        other => Ok(other),
    }
}

fn validate_target(
    index: usize,
    raw: RawTarget,
    recipes: &BTreeMap<String, Recipe>,
) -> Result<TargetDescriptor> {
    let name = raw.name.ok_or_else(|| ConfigError::MissingField {
        owner: format!("targets[{}]", index),
        field: "name",
    })?;
    let recipe = raw.recipe.ok_or_else(|| ConfigError::MissingField {
        owner: format!("target '{}'", name),
        field: "recipe",
    })?;

    if !recipes.contains_key(&recipe) {
        return Err(ConfigError::UnknownRecipe {
            target: name,
            recipe,
        });
    }

    let commands = match raw.commands {
        Some(argvs) => {
            let mut commands = Vec::with_capacity(argvs.len());
            for (i, argv) in argvs.iter().enumerate() {
                let command = Command::from_argv(argv).ok_or_else(|| ConfigError::EmptyCommand {
                    target: name.clone(),
                    index: i,
                })?;
                commands.push(command);
            }
            Some(commands)
        }
        None => None,
    };

    Ok(TargetDescriptor {
        name,
        recipe,
        triple: raw.triple,
        features: raw.features,
        no_default_features: raw.no_default_features,
        niche: raw.niche,
        env: raw.env,
        commands,
    })
}

fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
