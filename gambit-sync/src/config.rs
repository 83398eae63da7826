//! Server configuration.
//!
//! Defaults match the original deployment (all interfaces, port 4000).
//! `from_env` overrides them from the process environment:
//!
//! | variable                  | field                  |
//! |---------------------------|------------------------|
//! | `PORT`                    | port of `bind_addr`    |
//! | `GAMBIT_HOST`             | host of `bind_addr`    |
//! | `GAMBIT_MAX_MEMBERS`      | `max_members_per_room` |
//! | `GAMBIT_MAX_ROOM_KEY_LEN` | `max_room_key_len`     |
//! | `GAMBIT_OUTBOX_CAPACITY`  | `outbox_capacity`      |
//! | `GAMBIT_MAX_MESSAGE_SIZE` | `max_message_size`     |

use std::num::ParseIntError;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Connections allowed in one room, players and observers alike
    pub max_members_per_room: usize,
    /// Longest accepted room identifier, in bytes
    pub max_room_key_len: usize,
    /// Messages buffered per connection before fan-out starts dropping
    pub outbox_capacity: usize,
    /// Largest accepted WebSocket message, in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
            max_members_per_room: 100,
            max_room_key_len: 64,
            outbox_capacity: 256,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {source}")]
    InvalidNumber {
        key: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

impl ServerConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let host = lookup("GAMBIT_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port: u16 = number(&lookup, "PORT", DEFAULT_PORT)?;

        Ok(Self {
            bind_addr: format!("{host}:{port}"),
            max_members_per_room: number(
                &lookup,
                "GAMBIT_MAX_MEMBERS",
                defaults.max_members_per_room,
            )?,
            max_room_key_len: number(&lookup, "GAMBIT_MAX_ROOM_KEY_LEN", defaults.max_room_key_len)?,
            outbox_capacity: number(&lookup, "GAMBIT_OUTBOX_CAPACITY", defaults.outbox_capacity)?,
            max_message_size: number(&lookup, "GAMBIT_MAX_MESSAGE_SIZE", defaults.max_message_size)?,
        })
    }
}

fn number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr<Err = ParseIntError>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidNumber { key, value, source }),
    }
}
