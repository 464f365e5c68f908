//! Configuration loading for the bridge.
//!
//! Raw TOML structs (all `Option`, all `#[serde(default)]`) stay private to
//! this crate. [`BridgeConfig`] is the resolved form: durations are
//! `Duration`s, the unbounded wait is `None`, and environment overrides have
//! already been applied.
//!
//! ```toml
//! [gate]
//! decision_timeout_ms = 25000
//!
//! [dispatcher]
//! drain_budget = 64
//!
//! [background]
//! store_path = "${HOME}/.herald/handles.json"
//!
//! [log]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

pub const ENV_DECISION_TIMEOUT_MS: &str = "HERALD_DECISION_TIMEOUT_MS";
pub const ENV_LOG: &str = "HERALD_LOG";

const DEFAULT_DRAIN_BUDGET: usize = 64;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    gate: RawGate,
    dispatcher: RawDispatcher,
    background: RawBackground,
    log: RawLog,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGate {
    /// Absent or zero: wait forever.
    decision_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDispatcher {
    drain_budget: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBackground {
    store_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLog {
    level: Option<String>,
}

/// Resolved bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    decision_timeout: Option<Duration>,
    drain_budget: usize,
    store_path: Option<PathBuf>,
    log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            decision_timeout: None,
            drain_budget: DEFAULT_DRAIN_BUDGET,
            store_path: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl From<RawConfig> for BridgeConfig {
    fn from(raw: RawConfig) -> Self {
        Self {
            decision_timeout: raw
                .gate
                .decision_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            drain_budget: raw
                .dispatcher
                .drain_budget
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_DRAIN_BUDGET),
            store_path: raw
                .background
                .store_path
                .map(|p| PathBuf::from(expand_env_vars(&p))),
            log_level: raw
                .log
                .level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML document. Environment overrides are not applied.
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(raw.into())
    }

    /// Read, parse, and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let mut config = Self::from_toml_str(&content, path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Like [`BridgeConfig::load`], but a missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load(path);
        }
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|var| env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup(ENV_DECISION_TIMEOUT_MS) {
            self.decision_timeout = parse_timeout(&raw).ok_or(ConfigError::InvalidEnv {
                var: ENV_DECISION_TIMEOUT_MS,
                value: raw.clone(),
            })?;
        }
        if let Some(level) = lookup(ENV_LOG).filter(|l| !l.trim().is_empty()) {
            self.log_level = level;
        }
        Ok(())
    }

    #[must_use]
    pub fn with_decision_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.decision_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// `None` means a blocked producer waits until resolved.
    #[must_use]
    pub fn decision_timeout(&self) -> Option<Duration> {
        self.decision_timeout
    }

    #[must_use]
    pub fn drain_budget(&self) -> usize {
        self.drain_budget
    }

    #[must_use]
    pub fn store_path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    #[must_use]
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// `Some(None)` is the unbounded wait (`0` or `never`); `None` is unparseable.
fn parse_timeout(raw: &str) -> Option<Option<Duration>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("never") {
        return Some(None);
    }
    let ms: u64 = raw.parse().ok()?;
    Some((ms > 0).then(|| Duration::from_millis(ms)))
}

/// Replace `${VAR}` with the variable's value; unset variables become empty.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
