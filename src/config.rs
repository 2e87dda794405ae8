//! Configuration for the context runtime pieces.
//!
//! The only tunable resource is the timer service that enforces deadlines.
//! Configuration is layered with precedence, lowest first:
//!
//! 1. Built-in defaults
//! 2. Environment variables (`KIE_CONTEXT_*`)
//! 3. Programmatic overrides
//!
//! ```
//! use kie_context::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .override_value("KIE_CONTEXT_TIMER_CAPACITY", "128")
//!     .load()
//!     .unwrap();
//! assert_eq!(config.timer.capacity, 128);
//! ```

use std::collections::BTreeMap;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "KIE_CONTEXT_";

const DEFAULT_TIMER_CAPACITY: usize = 65_536;
const DEFAULT_TIMER_THREAD_NAME: &str = "kie-context-timer";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextConfig {
    /// Settings for the wall-clock timer service.
    pub timer: TimerConfig,
}

impl ContextConfig {
    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timer.validate()
    }
}

/// Timer service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Maximum number of pending deadline timers. Registrations beyond this
    /// fail with `ErrorKind::TimerExhausted`.
    pub capacity: usize,
    /// Name given to the background timer thread.
    pub thread_name: String,
}

impl TimerConfig {
    /// Validates the timer settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidTimerCapacity);
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidThreadName);
        }
        Ok(())
    }

    /// Returns a copy with a different capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_TIMER_CAPACITY,
            thread_name: DEFAULT_TIMER_THREAD_NAME.to_string(),
        }
    }
}

/// Layered configuration loader.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    overrides: BTreeMap<String, String>,
}

impl ConfigLoader {
    /// Creates a loader starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a programmatic override (highest precedence).
    #[must_use]
    pub fn override_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Loads configuration from defaults, the process environment, and overrides.
    pub fn load(&self) -> Result<ContextConfig, ConfigError> {
        self.load_from_vars(std::env::vars())
    }

    /// Loads configuration using `vars` in place of the process environment.
    pub fn load_from_vars<I>(&self, vars: I) -> Result<ContextConfig, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = ContextConfig::default();

        let env: BTreeMap<String, String> = vars
            .into_iter()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        apply_overrides(&mut config, &env)?;
        apply_overrides(&mut config, &self.overrides)?;

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Timer capacity must be positive.
    #[error("timer capacity must be > 0")]
    InvalidTimerCapacity,
    /// Timer thread name must not be blank.
    #[error("timer thread name must not be empty")]
    InvalidThreadName,
    /// Unknown override key.
    #[error("invalid override: {0}")]
    InvalidOverride(String),
}

fn apply_overrides(
    config: &mut ContextConfig,
    overrides: &BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    for (key, value) in overrides {
        apply_override(config, key, value)?;
    }
    Ok(())
}

fn apply_override(config: &mut ContextConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "KIE_CONTEXT_TIMER_CAPACITY" => {
            config.timer.capacity = parse_usize(value, key)?;
        }
        "KIE_CONTEXT_TIMER_THREAD_NAME" => {
            config.timer.thread_name = value.to_string();
        }
        _ => return Err(ConfigError::InvalidOverride(key.to_string())),
    }
    Ok(())
}

fn parse_usize(value: &str, key: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::Parse(format!("invalid usize for {key}: {value}")))
}
