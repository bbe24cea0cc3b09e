//! Daemon configuration: JSON file model, validation, option resolution.
//!
//! Per-origin options resolve through three tiers: the sync entry itself,
//! then `settings.defaults`, then builtin defaults. Validation happens once
//! at load; the pipeline only ever sees fully-resolved values.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use mirrorsync_types::{CollapseTable, ConfigError, ConfigResult};

/// Builtin default debounce, applied when neither the entry nor the
/// defaults tier sets one.
pub const DEFAULT_DELAY_MS: u64 = 1000;
/// Builtin default per-origin concurrent child cap.
pub const DEFAULT_MAX_PROCESSES: usize = 1;
/// Builtin default per-tick invocation cap.
pub const DEFAULT_MAX_ACTIONS: usize = 1;

/// Verbosity levels accepted for the `loglevel` setting, exact spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Normal,
    Verbose,
    Error,
}

impl LogLevel {
    /// The tracing filter directive this level maps onto.
    pub fn env_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Normal => "info",
            LogLevel::Verbose => "debug",
            LogLevel::Debug => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(LogLevel::Debug),
            "NORMAL" => Ok(LogLevel::Normal),
            "VERBOSE" => Ok(LogLevel::Verbose),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!(
                "unknown loglevel '{other}' (expected DEBUG, NORMAL, VERBOSE or ERROR)"
            )),
        }
    }
}

/// An external command template.
///
/// Arguments may contain the placeholders `{source}`, `{target}`,
/// `{source2}`, `{target2}`, `{event}` and `{path}`, substituted per
/// invocation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Render the argument list with `{placeholder}` substitution.
    pub fn render_args(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                let mut rendered = arg.clone();
                for (key, value) in vars {
                    rendered = rendered.replace(&format!("{{{key}}}"), value);
                }
                rendered
            })
            .collect()
    }
}

/// The per-origin options that may also appear in the defaults tier.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncDefaults {
    pub delay_ms: Option<u64>,
    pub max_processes: Option<usize>,
    pub max_actions: Option<usize>,
    #[serde(rename = "move")]
    pub move_handler: Option<bool>,
    pub collapse: Option<HashMap<String, HashMap<String, String>>>,
    pub action: Option<CommandSpec>,
    pub startup: Option<CommandSpec>,
}

/// One `sync` entry: a source tree bound to a target identifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncEntry {
    pub source: PathBuf,
    /// Opaque target identifier, passed through to commands as-is.
    /// Conventionally ends with `/` so relative paths append cleanly.
    pub target: String,
    pub delay_ms: Option<u64>,
    pub max_processes: Option<usize>,
    pub max_actions: Option<usize>,
    #[serde(rename = "move")]
    pub move_handler: Option<bool>,
    pub collapse: Option<HashMap<String, HashMap<String, String>>>,
    pub action: Option<CommandSpec>,
    pub startup: Option<CommandSpec>,
}

/// What to do when the watch backend's event queue overflows.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Log and terminate; the mirror can no longer be trusted
    #[default]
    Exit,
    /// Log and keep going, accepting that events were lost
    Ignore,
}

/// Process-wide settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub loglevel: Option<String>,
    pub statusfile: Option<PathBuf>,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Fallbacks for per-origin options not set on an entry
    #[serde(default)]
    pub defaults: SyncDefaults,
}

/// The whole config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub sync: Vec<SyncEntry>,
}

/// One sync entry with every option resolved to its final value.
#[derive(Debug, Clone)]
pub struct ResolvedSync {
    pub source: PathBuf,
    pub target: String,
    pub delay: Duration,
    pub max_processes: usize,
    pub max_actions: usize,
    pub move_handler: bool,
    pub collapse: CollapseTable,
    pub action: CommandSpec,
    pub startup: Option<CommandSpec>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Parsed `loglevel`, when one is set.
    pub fn loglevel(&self) -> ConfigResult<Option<LogLevel>> {
        self.settings
            .loglevel
            .as_deref()
            .map(|s| {
                s.parse()
                    .map_err(|reason: String| ConfigError::invalid_value("loglevel", reason))
            })
            .transpose()
    }

    /// Validate setting values: loglevel spelling, non-zero caps, and that
    /// there is anything to sync at all.
    pub fn validate(&self) -> ConfigResult<()> {
        self.loglevel()?;

        if self.sync.is_empty() {
            return Err(ConfigError::NothingToWatch);
        }

        let defaults = &self.settings.defaults;
        check_caps("settings.defaults", defaults.max_processes, defaults.max_actions)?;
        for entry in &self.sync {
            check_caps(
                &format!("sync[{}]", entry.target),
                entry.max_processes,
                entry.max_actions,
            )?;
        }
        Ok(())
    }

    /// Validate, then resolve every sync entry through the three option
    /// tiers.
    pub fn resolve(&self) -> ConfigResult<Vec<ResolvedSync>> {
        self.validate()?;

        let defaults = &self.settings.defaults;
        let mut resolved = Vec::with_capacity(self.sync.len());
        for entry in &self.sync {
            let collapse_spec = entry.collapse.as_ref().or(defaults.collapse.as_ref());
            let collapse = match collapse_spec {
                Some(spec) => CollapseTable::with_overrides(spec)
                    .map_err(|reason| ConfigError::invalid_value("collapse", reason))?,
                None => CollapseTable::default(),
            };

            let action = entry
                .action
                .clone()
                .or_else(|| defaults.action.clone())
                .ok_or_else(|| ConfigError::MissingParameter {
                    key: format!("sync[{}].action", entry.target),
                })?;

            resolved.push(ResolvedSync {
                source: entry.source.clone(),
                target: entry.target.clone(),
                delay: Duration::from_millis(
                    entry.delay_ms.or(defaults.delay_ms).unwrap_or(DEFAULT_DELAY_MS),
                ),
                max_processes: entry
                    .max_processes
                    .or(defaults.max_processes)
                    .unwrap_or(DEFAULT_MAX_PROCESSES),
                max_actions: entry
                    .max_actions
                    .or(defaults.max_actions)
                    .unwrap_or(DEFAULT_MAX_ACTIONS),
                move_handler: entry
                    .move_handler
                    .or(defaults.move_handler)
                    .unwrap_or(false),
                collapse,
                action,
                startup: entry.startup.clone().or_else(|| defaults.startup.clone()),
            });
        }
        Ok(resolved)
    }
}

fn check_caps(
    context: &str,
    max_processes: Option<usize>,
    max_actions: Option<usize>,
) -> ConfigResult<()> {
    if max_processes == Some(0) {
        return Err(ConfigError::invalid_value(
            format!("{context}.max_processes"),
            "must be at least 1",
        ));
    }
    if max_actions == Some(0) {
        return Err(ConfigError::invalid_value(
            format!("{context}.max_actions"),
            "must be at least 1",
        ));
    }
    Ok(())
}
