//! Environment-backed configuration for `roomsync-demo`.

use std::{env, error::Error, fmt};

use roomsync_core::{
    RuntimeConfig,
    backfill::{DEFAULT_BACKFILL_LIMIT, DEFAULT_SERVER_LIMIT_CAP},
};

const DEFAULT_LOCAL_USER: &str = "@me:example.org";
const DEFAULT_COMMAND_BUFFER: usize = 128;
const DEFAULT_EVENT_BUFFER: usize = 512;

/// Demo configuration resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoConfig {
    /// Logged-in user; excluded when naming rooms after their members.
    pub local_user_id: String,
    /// Events requested per backfill.
    pub backfill_limit: u16,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl DemoConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let local_user_id = optional_trimmed_env("ROOMSYNC_LOCAL_USER", &mut lookup)
            .unwrap_or_else(|| DEFAULT_LOCAL_USER.to_owned());
        let backfill_limit =
            parse_with_default("ROOMSYNC_BACKFILL_LIMIT", DEFAULT_BACKFILL_LIMIT, &mut lookup)?;
        let command_buffer =
            parse_with_default("ROOMSYNC_COMMAND_BUFFER", DEFAULT_COMMAND_BUFFER, &mut lookup)?;
        let event_buffer =
            parse_with_default("ROOMSYNC_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        if backfill_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ROOMSYNC_BACKFILL_LIMIT",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            local_user_id,
            backfill_limit,
            command_buffer,
            event_buffer,
        })
    }

    /// Runtime-facing subset of this configuration.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            local_user_id: Some(self.local_user_id.clone()),
            backfill_limit: self.backfill_limit,
            server_limit_cap: DEFAULT_SERVER_LIMIT_CAP,
            command_buffer: self.command_buffer,
            event_buffer: self.event_buffer,
        }
    }
}

/// Errors produced while parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_with_default<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}
