// File: src/config.rs

use std::str::FromStr;
use std::time::Duration;

use tracing::debug;
use tunebot_common::models::Volume;

use crate::Error;

/// Runtime settings for the playback core.
///
/// Loaded from the process environment (after an optional `.env` file);
/// the server binary may override individual values from the command line.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Volume every new session starts with.
    pub default_volume: Volume,
    /// Maximum number of entries a single chat queue may hold.
    pub max_queue_size: usize,
    /// How many finished tracks each session remembers.
    pub max_history_size: usize,
    /// Tracks longer than this are rejected.
    pub duration_limit: Duration,
    /// An Idle session untouched for this long is evicted by the sweeper.
    pub idle_timeout: Duration,
    /// How often the idle sweeper runs.
    pub sweep_interval: Duration,
    /// Keep the queue when the bot is kicked from the voice chat instead of
    /// tearing the session down.
    pub preserve_queue_on_disconnect: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            default_volume: Volume::DEFAULT,
            max_queue_size: 100,
            max_history_size: 50,
            duration_limit: Duration::from_secs(180 * 60),
            idle_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
            preserve_queue_on_disconnect: false,
        }
    }
}

impl BotConfig {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self, Error> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment overrides from {:?}", path);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Missing keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let volume: i64 = parse_var(&lookup, "DEFAULT_VOLUME", defaults.default_volume.level() as i64)?;
        let default_volume = Volume::new(volume)
            .map_err(|_| Error::Config(format!("DEFAULT_VOLUME must be within 0-200, got {}", volume)))?;

        let max_queue_size = parse_var(&lookup, "MAX_QUEUE_SIZE", defaults.max_queue_size)?;
        if max_queue_size == 0 {
            return Err(Error::Config("MAX_QUEUE_SIZE must be at least 1".into()));
        }

        let max_history_size = parse_var(&lookup, "MAX_HISTORY_SIZE", defaults.max_history_size)?;
        let duration_limit_minutes: u64 =
            parse_var(&lookup, "DURATION_LIMIT", defaults.duration_limit.as_secs() / 60)?;
        let duration_limit_secs = duration_limit_minutes.checked_mul(60).ok_or_else(|| {
            Error::Config(format!("DURATION_LIMIT={} minutes is too large", duration_limit_minutes))
        })?;
        let idle_timeout_secs: u64 =
            parse_var(&lookup, "IDLE_TIMEOUT_SECS", defaults.idle_timeout.as_secs())?;
        let sweep_interval_secs: u64 =
            parse_var(&lookup, "SWEEP_INTERVAL_SECS", defaults.sweep_interval.as_secs())?;
        if sweep_interval_secs == 0 {
            return Err(Error::Config("SWEEP_INTERVAL_SECS must be at least 1".into()));
        }

        let preserve_queue_on_disconnect = match lookup("PRESERVE_QUEUE_ON_DISCONNECT") {
            Some(raw) => parse_bool("PRESERVE_QUEUE_ON_DISCONNECT", &raw)?,
            None => defaults.preserve_queue_on_disconnect,
        };

        Ok(Self {
            default_volume,
            max_queue_size,
            max_history_size,
            duration_limit: Duration::from_secs(duration_limit_secs),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            preserve_queue_on_disconnect,
        })
    }

    /// Duration limit in whole minutes, for user-facing messages.
    pub fn duration_limit_minutes(&self) -> u64 {
        self.duration_limit.as_secs() / 60
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| Error::Config(format!("{}='{}': {}", key, raw, e))),
        _ => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config(format!("{}='{}' is not a boolean", key, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = BotConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.default_volume, Volume::DEFAULT);
        assert_eq!(cfg.max_queue_size, 100);
        assert_eq!(cfg.max_history_size, 50);
        assert_eq!(cfg.duration_limit_minutes(), 180);
        assert_eq!(cfg.idle_timeout, Duration::from_secs(10));
        assert!(!cfg.preserve_queue_on_disconnect);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = BotConfig::from_lookup(lookup_from(&[
            ("DEFAULT_VOLUME", "150"),
            ("MAX_QUEUE_SIZE", "5"),
            ("DURATION_LIMIT", "10"),
            ("IDLE_TIMEOUT_SECS", "300"),
            ("PRESERVE_QUEUE_ON_DISCONNECT", "yes"),
        ]))
        .unwrap();
        assert_eq!(cfg.default_volume.level(), 150);
        assert_eq!(cfg.max_queue_size, 5);
        assert_eq!(cfg.duration_limit, Duration::from_secs(600));
        assert_eq!(cfg.idle_timeout, Duration::from_secs(300));
        assert!(cfg.preserve_queue_on_disconnect);
    }

    #[test]
    fn out_of_range_volume_is_a_config_error() {
        let err = BotConfig::from_lookup(lookup_from(&[("DEFAULT_VOLUME", "300")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn garbage_values_are_rejected() {
        assert!(BotConfig::from_lookup(lookup_from(&[("MAX_QUEUE_SIZE", "lots")])).is_err());
        assert!(BotConfig::from_lookup(lookup_from(&[("MAX_QUEUE_SIZE", "0")])).is_err());
        assert!(BotConfig::from_lookup(lookup_from(&[("PRESERVE_QUEUE_ON_DISCONNECT", "maybe")])).is_err());
    }

    #[test]
    fn huge_duration_limit_is_a_config_error() {
        let huge = u64::MAX.to_string();
        let err = BotConfig::from_lookup(lookup_from(&[("DURATION_LIMIT", huge.as_str())])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let cfg = BotConfig::from_lookup(lookup_from(&[("DURATION_LIMIT", "0")])).unwrap();
        assert_eq!(cfg.duration_limit, Duration::ZERO);
    }
}
