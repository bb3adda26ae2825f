//! Configuration for access revalidation.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. TOML file, when one is given
//! 3. Environment variables (`SIRIUS_*`)
//!
//! Each layer overrides the previous. [`AccessConfig::validate`] runs last.
//!
//! ```toml
//! [access]
//! required_group_id = "3f1c0a"
//! acceptable_group_names = ["SIRIUS Users"]
//! enforce = true
//!
//! [validation]
//! check_interval = "5m"
//! min_focus_interval = "30s"
//!
//! [channel]
//! mode = "push"
//! max_reconnect_attempts = 5
//! idle_timeout = "90s"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::policy::RequiredAccessDescriptor;

/// Helper macro for parsing boolean environment variables.
macro_rules! parse_env_bool {
    ($lookup:expr, $field:expr, $var:literal) => {
        if let Some(val) = $lookup($var) {
            $field = parse_bool(&val)
                .ok_or_else(|| ConfigError::invalid_env_var($var, "expected bool"))?;
        }
    };
}

/// Helper macro for parsing millisecond durations from environment variables.
macro_rules! parse_env_ms {
    ($lookup:expr, $field:expr, $var:literal) => {
        if let Some(val) = $lookup($var) {
            let ms: u64 = val
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_env_var($var, "expected milliseconds"))?;
            $field = Duration::from_millis(ms);
        }
    };
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Which group grants access
    pub access: RequiredAccessDescriptor,
    /// Pull scheduler timing and trigger switches
    pub validation: ValidationConfig,
    /// Push/pull selection and push reconnection
    pub channel: ChannelConfig,
}

/// Timing and trigger switches for the pull scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Period of the background check
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Inactivity gap after which interaction counts as "came back"
    #[serde(with = "humantime_serde")]
    pub idle_threshold: Duration,
    /// Minimum time since the last check for focus/visibility triggers
    #[serde(with = "humantime_serde")]
    pub min_focus_interval: Duration,
    /// Minimum time since the last check for activity triggers
    #[serde(with = "humantime_serde")]
    pub min_activity_interval: Duration,
    /// Upper bound on the session lookup and on a single group fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Attach focus and visibility triggers
    pub focus_checks: bool,
    /// Attach activity-after-idle triggers
    pub activity_checks: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5 * 60),
            idle_threshold: Duration::from_secs(5 * 60),
            min_focus_interval: Duration::from_secs(30),
            min_activity_interval: Duration::from_secs(2 * 60),
            fetch_timeout: Duration::from_secs(15),
            focus_checks: true,
            activity_checks: true,
        }
    }
}

/// Notification strategy, fixed for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Client-initiated periodic and event-triggered checks
    #[default]
    Pull,
    /// Server-initiated membership events, falling back to pull
    Push,
}

/// Push/pull selection and push reconnection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Strategy selection
    pub mode: ChannelMode,
    /// Consecutive failed reconnects before falling back to pull
    pub max_reconnect_attempts: u32,
    /// Delay between reconnect attempts
    pub backoff: BackoffConfig,
    /// Upper bound on a single connection attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Longest silence tolerated on a connected stream before reconnecting
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mode: ChannelMode::Pull,
            max_reconnect_attempts: 5,
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Exponential reconnect backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnect
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay for a given attempt number (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

impl AccessConfig {
    /// Parses a TOML document. Missing sections and fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseToml`] on invalid TOML or field types.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Loads defaults, then `path` if given, then `SIRIUS_*` variables, then validates.
    ///
    /// # Errors
    ///
    /// Any read, parse, environment or validation failure.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::read_file(path, e))?;
                debug!(path = %path.display(), "loaded access config file");
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `SIRIUS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvVar`] for unparseable values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvVar`] for unparseable values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let v = &mut self.validation;
        parse_env_ms!(lookup, v.check_interval, "SIRIUS_CHECK_INTERVAL_MS");
        parse_env_ms!(lookup, v.idle_threshold, "SIRIUS_IDLE_THRESHOLD_MS");
        parse_env_ms!(lookup, v.min_focus_interval, "SIRIUS_MIN_FOCUS_INTERVAL_MS");
        parse_env_ms!(lookup, v.min_activity_interval, "SIRIUS_MIN_ACTIVITY_INTERVAL_MS");
        parse_env_ms!(lookup, v.fetch_timeout, "SIRIUS_FETCH_TIMEOUT_MS");
        parse_env_bool!(lookup, v.focus_checks, "SIRIUS_FOCUS_CHECKS");
        parse_env_bool!(lookup, v.activity_checks, "SIRIUS_ACTIVITY_CHECKS");
        parse_env_bool!(lookup, self.access.enforce, "SIRIUS_ENFORCE_ACCESS");
        let c = &mut self.channel;
        parse_env_ms!(lookup, c.connect_timeout, "SIRIUS_CONNECT_TIMEOUT_MS");
        parse_env_ms!(lookup, c.idle_timeout, "SIRIUS_STREAM_IDLE_TIMEOUT_MS");

        if let Some(id) = lookup("SIRIUS_REQUIRED_GROUP_ID") {
            self.access.required_group_id = id.trim().to_string();
        }
        if let Some(names) = lookup("SIRIUS_ACCEPTABLE_GROUP_NAMES") {
            self.access.acceptable_group_names = names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(mode) = lookup("SIRIUS_CHANNEL") {
            self.channel.mode = match mode.trim().to_ascii_lowercase().as_str() {
                "push" => ChannelMode::Push,
                "pull" => ChannelMode::Pull,
                _ => {
                    return Err(ConfigError::invalid_env_var(
                        "SIRIUS_CHANNEL",
                        "expected 'push' or 'pull'",
                    ));
                }
            };
        }
        Ok(())
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.validation;
        if v.check_interval.is_zero() {
            return Err(ConfigError::Invalid("check_interval must be non-zero".into()));
        }
        if v.fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid("fetch_timeout must be non-zero".into()));
        }
        if self.access.enforce
            && self.access.required_group_id.is_empty()
            && self.access.acceptable_group_names.is_empty()
        {
            return Err(ConfigError::Invalid(
                "enforcement is on but no required group id or acceptable name is set".into(),
            ));
        }
        let c = &self.channel;
        if c.connect_timeout.is_zero() || c.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "channel connect_timeout and idle_timeout must be non-zero".into(),
            ));
        }
        let b = &c.backoff;
        if b.multiplier < 1.0 {
            return Err(ConfigError::Invalid("backoff multiplier must be >= 1.0".into()));
        }
        if b.initial_delay > b.max_delay {
            return Err(ConfigError::Invalid(
                "backoff initial_delay exceeds max_delay".into(),
            ));
        }
        if v.min_activity_interval < v.min_focus_interval {
            tracing::warn!(
                min_activity_interval = ?v.min_activity_interval,
                min_focus_interval = ?v.min_focus_interval,
                "activity throttle is shorter than focus throttle"
            );
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
