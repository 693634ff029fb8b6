//! Runtime Configuration
//!
//! A small, process-wide configuration that controls how the runtime reacts
//! to programmer errors and how a few internal knobs are tuned.
//!
//! # Sources
//!
//! 1. `RuntimeConfig::default()`: strict in debug builds, lenient in release.
//! 2. `RuntimeConfig::from_env()`: defaults overlaid with `RILL_*` variables.
//! 3. Any serde-compatible config file the host application already loads,
//!    since `RuntimeConfig` is `Deserialize` with per-field defaults.
//!
//! Call [`RuntimeConfig::install`] once at startup to make a configuration
//! process-wide. Tests that need a different strictness should use
//! [`with_strictness`], which only affects the current thread.

use std::cell::Cell;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ENV_STRICTNESS: &str = "RILL_STRICTNESS";
const ENV_SCOPE_SWEEP_INTERVAL: &str = "RILL_SCOPE_SWEEP_INTERVAL";
const ENV_TEST_TIMEOUT_MS: &str = "RILL_TEST_TIMEOUT_MS";

/// How programmer errors are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Panic at the point of misuse.
    Strict,
    /// Log at `error` level and continue with a no-op.
    Lenient,
}

impl Default for Strictness {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

impl FromStr for Strictness {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(Error::InvalidConfig {
                key: ENV_STRICTNESS,
                reason: format!("unknown level `{other}`"),
            }),
        }
    }
}

/// Process-wide runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Reaction to programmer errors.
    pub strictness: Strictness,

    /// Scoped-store cache insertions between sweeps of released children.
    pub scope_sweep_interval: usize,

    /// Default wait budget for `TestStore` assertions, in milliseconds.
    pub test_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::default(),
            scope_sweep_interval: 64,
            test_timeout_ms: 1_000,
        }
    }
}

static CONFIG: OnceLock<RwLock<RuntimeConfig>> = OnceLock::new();

fn global() -> &'static RwLock<RuntimeConfig> {
    CONFIG.get_or_init(|| RwLock::new(RuntimeConfig::default()))
}

thread_local! {
    static STRICTNESS_OVERRIDE: Cell<Option<Strictness>> = const { Cell::new(None) };
}

impl RuntimeConfig {
    /// Defaults overlaid with any `RILL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_STRICTNESS) {
            config.strictness = value.parse()?;
        }

        if let Some(value) = lookup(ENV_SCOPE_SWEEP_INTERVAL) {
            config.scope_sweep_interval =
                value.trim().parse().map_err(|e| Error::InvalidConfig {
                    key: ENV_SCOPE_SWEEP_INTERVAL,
                    reason: format!("{e}"),
                })?;
        }

        if let Some(value) = lookup(ENV_TEST_TIMEOUT_MS) {
            config.test_timeout_ms = value.trim().parse().map_err(|e| Error::InvalidConfig {
                key: ENV_TEST_TIMEOUT_MS,
                reason: format!("{e}"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.scope_sweep_interval == 0 {
            return Err(Error::InvalidConfig {
                key: ENV_SCOPE_SWEEP_INTERVAL,
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Make this configuration process-wide.
    pub fn install(self) -> Result<()> {
        self.validate()?;
        tracing::debug!(config = ?self, "installing runtime config");
        *global().write() = self;
        Ok(())
    }

    /// The installed configuration.
    pub fn current() -> RuntimeConfig {
        global().read().clone()
    }

    /// Default `TestStore` timeout as a `Duration`.
    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }
}

/// Strictness in effect on this thread.
pub fn strictness() -> Strictness {
    STRICTNESS_OVERRIDE
        .with(Cell::get)
        .unwrap_or_else(|| global().read().strictness)
}

/// Run `f` with `level` as this thread's strictness.
pub fn with_strictness<R>(level: Strictness, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Strictness>);

    impl Drop for Restore {
        fn drop(&mut self) {
            STRICTNESS_OVERRIDE.with(|cell| cell.set(self.0));
        }
    }

    let _restore = Restore(STRICTNESS_OVERRIDE.with(|cell| cell.replace(Some(level))));
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("RILL_STRICTNESS", "Lenient"),
            ("RILL_SCOPE_SWEEP_INTERVAL", "8"),
            ("RILL_TEST_TIMEOUT_MS", " 250 "),
        ]))
        .unwrap();

        assert_eq!(config.strictness, Strictness::Lenient);
        assert_eq!(config.scope_sweep_interval, 8);
        assert_eq!(config.test_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn missing_env_keeps_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = RuntimeConfig::from_lookup(lookup(&[("RILL_STRICTNESS", "loud")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { key: "RILL_STRICTNESS", .. }));

        let err =
            RuntimeConfig::from_lookup(lookup(&[("RILL_SCOPE_SWEEP_INTERVAL", "0")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { key: "RILL_SCOPE_SWEEP_INTERVAL", .. }));

        let err = RuntimeConfig::from_lookup(lookup(&[("RILL_TEST_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { key: "RILL_TEST_TIMEOUT_MS", .. }));
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{ "strictness": "lenient" }"#).unwrap();
        assert_eq!(config.strictness, Strictness::Lenient);
        assert_eq!(config.scope_sweep_interval, 64);
    }

    #[test]
    fn thread_override_is_scoped() {
        let before = strictness();
        let inside = with_strictness(Strictness::Lenient, || {
            with_strictness(Strictness::Strict, strictness);
            strictness()
        });
        assert_eq!(inside, Strictness::Lenient);
        assert_eq!(strictness(), before);
    }
}
