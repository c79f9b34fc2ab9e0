use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::sra::DEFAULT_KEYGEN_ATTEMPTS;

pub const PRIME_BITS_VAR: &str = "MENTAL_POKER_PRIME_BITS";
pub const KEYGEN_ATTEMPTS_VAR: &str = "MENTAL_POKER_KEYGEN_ATTEMPTS";
pub const TURN_TIMEOUT_VAR: &str = "MENTAL_POKER_TURN_TIMEOUT_MS";

pub const DEFAULT_PRIME_BITS: u64 = 256;
pub const DEFAULT_TURN_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid value")]
    Invalid { var: &'static str, value: String },
}

/// Knobs shared by every participant process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Size of the shared prime the dealer publishes.
    pub prime_bits: u64,
    /// Retry budget when drawing an SRA exponent.
    pub keygen_attempts: usize,
    /// How long a driver waits for the next expected move before forfeiting.
    pub turn_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prime_bits: DEFAULT_PRIME_BITS,
            keygen_attempts: DEFAULT_KEYGEN_ATTEMPTS,
            turn_timeout_ms: DEFAULT_TURN_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the process environment, after loading `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            prime_bits: parse(&lookup, PRIME_BITS_VAR)?.unwrap_or(defaults.prime_bits),
            keygen_attempts: parse(&lookup, KEYGEN_ATTEMPTS_VAR)?
                .unwrap_or(defaults.keygen_attempts),
            turn_timeout_ms: parse(&lookup, TURN_TIMEOUT_VAR)?
                .unwrap_or(defaults.turn_timeout_ms),
        })
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.turn_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn variables_override_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            (PRIME_BITS_VAR, "128"),
            (TURN_TIMEOUT_VAR, " 250 "),
        ]))
        .unwrap();
        assert_eq!(config.prime_bits, 128);
        assert_eq!(config.keygen_attempts, DEFAULT_KEYGEN_ATTEMPTS);
        assert_eq!(config.turn_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn garbage_is_reported_with_the_variable_name() {
        let err = EngineConfig::from_lookup(lookup(&[(KEYGEN_ATTEMPTS_VAR, "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: KEYGEN_ATTEMPTS_VAR,
                value: "lots".into()
            }
        );
    }
}
