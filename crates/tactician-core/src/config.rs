//! Configuration loading and typed config structures for the decision core.
//!
//! The canonical configuration lives in `tactician-config.yaml` next to the
//! binary. Every field has a default, so a partial (or empty) file is
//! valid. A handful of environment variables override the file after it
//! is parsed:
//!
//! - `TACTICIAN_LISTEN_ADDR` overrides `bridge.listen_addr`
//! - `TACTICIAN_FALLBACK_MODE` overrides `decision.fallback_mode`
//! - `TACTICIAN_ENGINE` overrides `decision.engine`
//! - `TACTICIAN_BUDGET_MS` overrides `tick.budget_ms`
//!
//! The loaded value is passed explicitly into the engine and processor
//! constructors; there is no process-wide config.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tactician_types::FallbackMode;

use crate::coordinator::CoordinatorSlot;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is not acceptable.
    #[error("invalid config value for {field}: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    /// Decision engine settings.
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Tick processor settings.
    #[serde(default)]
    pub tick: TickConfig,

    /// Host IPC listener settings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, apply environment
    /// overrides, and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the process
    /// environment).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if an override cannot be parsed.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("TACTICIAN_LISTEN_ADDR") {
            self.bridge.listen_addr = addr;
        }
        if let Some(mode) = lookup("TACTICIAN_FALLBACK_MODE") {
            self.decision.fallback_mode =
                FallbackMode::from_str(&mode).map_err(|e| ConfigError::Invalid {
                    field: "decision.fallback_mode",
                    message: e.to_string(),
                })?;
        }
        if let Some(engine) = lookup("TACTICIAN_ENGINE") {
            self.decision.engine = EngineKind::from_str(&engine)?;
        }
        if let Some(budget) = lookup("TACTICIAN_BUDGET_MS") {
            self.tick.budget_ms = budget.trim().parse().map_err(|e| ConfigError::Invalid {
                field: "tick.budget_ms",
                message: format!("{e}"),
            })?;
        }
        Ok(())
    }

    /// Reject values the core cannot honor.
    ///
    /// `defensive` is reserved for the failure path, so it cannot be the
    /// configured success-path fallback mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decision.fallback_mode == FallbackMode::Defensive {
            return Err(ConfigError::Invalid {
                field: "decision.fallback_mode",
                message: "defensive is reserved for failed ticks; use cpu or idle".to_owned(),
            });
        }
        if self.tick.history_size == 0 {
            return Err(ConfigError::Invalid {
                field: "tick.history_size",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.bridge.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "bridge.max_frame_bytes",
                message: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Which decision engine the processor runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Coordinator-backed engine.
    #[default]
    Full,
    /// Engine that never proposes anything.
    Stub,
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "stub" => Ok(Self::Stub),
            other => Err(ConfigError::Invalid {
                field: "decision.engine",
                message: format!("unknown engine kind: {other}"),
            }),
        }
    }
}

/// Decision engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DecisionConfig {
    /// Fallback mode reported on successful ticks.
    #[serde(default)]
    pub fallback_mode: FallbackMode,

    /// Engine implementation.
    #[serde(default)]
    pub engine: EngineKind,

    /// Per-coordinator enable flags.
    #[serde(default)]
    pub coordinators: CoordinatorToggles,

    /// A single coordinator call slower than this is logged (never
    /// cancelled).
    #[serde(default = "default_coordinator_slice_ms")]
    pub coordinator_slice_ms: u64,
}

impl DecisionConfig {
    /// The slow-coordinator threshold as a [`Duration`].
    pub const fn coordinator_slice(&self) -> Duration {
        Duration::from_millis(self.coordinator_slice_ms)
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            fallback_mode: FallbackMode::default(),
            engine: EngineKind::default(),
            coordinators: CoordinatorToggles::default(),
            coordinator_slice_ms: default_coordinator_slice_ms(),
        }
    }
}

/// Enable flags, one per coordinator slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CoordinatorToggles {
    /// Combat coordinator.
    #[serde(default = "default_true")]
    pub combat: bool,
    /// Social coordination coordinator.
    #[serde(default = "default_true")]
    pub social: bool,
    /// Economy coordinator.
    #[serde(default = "default_true")]
    pub economy: bool,
    /// NPC interaction coordinator.
    #[serde(default = "default_true")]
    pub npc: bool,
    /// Character progression coordinator.
    #[serde(default = "default_true")]
    pub progression: bool,
}

impl CoordinatorToggles {
    /// Everything disabled.
    pub const fn none() -> Self {
        Self {
            combat: false,
            social: false,
            economy: false,
            npc: false,
            progression: false,
        }
    }

    /// Whether `slot` is enabled.
    pub const fn is_enabled(&self, slot: CoordinatorSlot) -> bool {
        match slot {
            CoordinatorSlot::Combat => self.combat,
            CoordinatorSlot::Social => self.social,
            CoordinatorSlot::Economy => self.economy,
            CoordinatorSlot::Npc => self.npc,
            CoordinatorSlot::Progression => self.progression,
        }
    }

    /// Set the flag for `slot`.
    #[must_use]
    pub const fn with(mut self, slot: CoordinatorSlot, enabled: bool) -> Self {
        match slot {
            CoordinatorSlot::Combat => self.combat = enabled,
            CoordinatorSlot::Social => self.social = enabled,
            CoordinatorSlot::Economy => self.economy = enabled,
            CoordinatorSlot::Npc => self.npc = enabled,
            CoordinatorSlot::Progression => self.progression = enabled,
        }
        self
    }
}

impl Default for CoordinatorToggles {
    fn default() -> Self {
        Self {
            combat: true,
            social: true,
            economy: true,
            npc: true,
            progression: true,
        }
    }
}

/// Tick processor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TickConfig {
    /// Soft processing budget per tick in milliseconds.
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,

    /// Number of snapshots kept in the history ring.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl TickConfig {
    /// The soft budget as a [`Duration`].
    pub const fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            budget_ms: default_budget_ms(),
            history_size: default_history_size(),
        }
    }
}

/// Host IPC listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeConfig {
    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Frames longer than this are rejected with `frame_too_large`.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_coordinator_slice_ms() -> u64 {
    25
}

const fn default_budget_ms() -> u64 {
    50
}

const fn default_history_size() -> usize {
    100
}

fn default_listen_addr() -> String {
    "127.0.0.1:5555".to_owned()
}

const fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn parse_without_env(yaml: &str) -> Result<AgentConfig, ConfigError> {
        let mut config: AgentConfig = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.decision.fallback_mode, FallbackMode::Cpu);
        assert_eq!(config.decision.engine, EngineKind::Full);
        assert_eq!(config.tick.budget_ms, 50);
        assert_eq!(config.tick.history_size, 100);
        assert_eq!(config.bridge.listen_addr, "127.0.0.1:5555");
        for slot in CoordinatorSlot::ALL {
            assert!(config.decision.coordinators.is_enabled(slot));
        }
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
decision:
  fallback_mode: idle
  engine: stub
  coordinators:
    combat: true
    social: false
    economy: false
    npc: true
    progression: false
  coordinator_slice_ms: 10

tick:
  budget_ms: 80
  history_size: 16

bridge:
  listen_addr: "0.0.0.0:6000"
  max_frame_bytes: 4096

logging:
  level: debug
  json: true
"#;
        let config = parse_without_env(yaml).unwrap();
        assert_eq!(config.decision.fallback_mode, FallbackMode::Idle);
        assert_eq!(config.decision.engine, EngineKind::Stub);
        assert!(config.decision.coordinators.combat);
        assert!(!config.decision.coordinators.social);
        assert_eq!(config.decision.coordinator_slice(), Duration::from_millis(10));
        assert_eq!(config.tick.budget(), Duration::from_millis(80));
        assert_eq!(config.tick.history_size, 16);
        assert_eq!(config.bridge.max_frame_bytes, 4096);
        assert!(config.logging.json);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = parse_without_env("tick:\n  budget_ms: 5\n").unwrap();
        assert_eq!(config.tick.budget_ms, 5);
        assert_eq!(config.tick.history_size, 100);
        assert!(config.decision.coordinators.progression);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(AgentConfig::parse("").is_ok());
    }

    #[test]
    fn shipped_config_file_matches_defaults() {
        let yaml = include_str!("../../../tactician-config.yaml");
        assert_eq!(parse_without_env(yaml).unwrap(), AgentConfig::default());
    }

    #[test]
    fn defensive_fallback_mode_is_rejected() {
        let err = parse_without_env("decision:\n  fallback_mode: defensive\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "decision.fallback_mode",
                ..
            }
        ));
    }

    #[test]
    fn zero_history_is_rejected() {
        assert!(parse_without_env("tick:\n  history_size: 0\n").is_err());
    }

    #[test]
    fn unknown_engine_kind_fails_to_parse() {
        assert!(matches!(
            parse_without_env("decision:\n  engine: turbo\n"),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: BTreeMap<&str, &str> = [
            ("TACTICIAN_LISTEN_ADDR", "127.0.0.1:7000"),
            ("TACTICIAN_FALLBACK_MODE", "idle"),
            ("TACTICIAN_ENGINE", "stub"),
            ("TACTICIAN_BUDGET_MS", "120"),
        ]
        .into_iter()
        .collect();

        let mut config = AgentConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| (*v).to_owned()))
            .unwrap();

        assert_eq!(config.bridge.listen_addr, "127.0.0.1:7000");
        assert_eq!(config.decision.fallback_mode, FallbackMode::Idle);
        assert_eq!(config.decision.engine, EngineKind::Stub);
        assert_eq!(config.tick.budget_ms, 120);
    }

    #[test]
    fn bad_override_is_reported() {
        let mut config = AgentConfig::default();
        let err = config
            .apply_overrides(|name| (name == "TACTICIAN_BUDGET_MS").then(|| "soon".to_owned()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "tick.budget_ms",
                ..
            }
        ));
    }

    #[test]
    fn toggles_with_updates_one_slot() {
        let toggles = CoordinatorToggles::none().with(CoordinatorSlot::Npc, true);
        assert!(toggles.is_enabled(CoordinatorSlot::Npc));
        assert!(!toggles.is_enabled(CoordinatorSlot::Combat));
    }
}
