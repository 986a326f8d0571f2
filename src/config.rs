//! Server configuration.
//!
//! Layered with figment: built-in defaults, then an optional TOML file
//! (`SLOTGATE_CONFIG`, default `slotgate.toml`), then `SLOTGATE_`-prefixed
//! environment variables with `__` separating sections, e.g.
//! `SLOTGATE_SERVER__PORT=6543`.

use std::path::PathBuf;

use chrono::NaiveTime;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::calendar::{BusinessCalendar, CalendarError};
use crate::limits::{MAX_DAILY_LIMIT, MIN_DAILY_LIMIT};
use crate::model::Role;

pub const CONFIG_PATH_ENV: &str = "SLOTGATE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "slotgate.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Seed entries for the user directory.
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            password: "slotgate".into(),
            max_connections: 256,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
        }
    }
}

impl StorageConfig {
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotgate.wal")
    }
}

/// Business hours as `HH:MM` strings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalendarConfig {
    pub opens: String,
    pub closes: String,
    pub lunch_start: Option<String>,
    pub lunch_end: Option<String>,
    pub slot_minutes: u32,
    pub fallback_capacity: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            opens: "09:00".into(),
            closes: "18:00".into(),
            lunch_start: Some("12:00".into()),
            lunch_end: Some("13:00".into()),
            slot_minutes: 30,
            fallback_capacity: 1,
        }
    }
}

impl CalendarConfig {
    pub fn build(&self) -> Result<BusinessCalendar, ConfigError> {
        let opens = parse_hhmm("calendar.opens", &self.opens)?;
        let closes = parse_hhmm("calendar.closes", &self.closes)?;
        let lunch = match (&self.lunch_start, &self.lunch_end) {
            (None, None) => None,
            (Some(start), Some(end)) => Some((
                parse_hhmm("calendar.lunch_start", start)?,
                parse_hhmm("calendar.lunch_end", end)?,
            )),
            _ => return Err(invalid("calendar.lunch_start", "set both lunch_start and lunch_end, or neither")),
        };
        Ok(BusinessCalendar::new(
            opens,
            closes,
            lunch,
            self.slot_minutes,
            self.fallback_capacity,
        )?)
    }
}

fn parse_hhmm(field: &'static str, s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|e| invalid(field, format!("{s:?}: {e}")))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Daily limit in force until an administrator sets a policy.
    pub default_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { default_limit: 2 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserSeed {
    pub id: Ulid,
    pub role: Role,
}

impl Config {
    /// Load from the file named by `SLOTGATE_CONFIG` (or `slotgate.toml`) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(path)
    }

    /// A missing file is not an error; defaults and env still apply.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.into()))
            .merge(Env::prefixed("SLOTGATE_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.password.is_empty() {
            return Err(invalid("server.password", "must not be empty"));
        }
        if self.server.max_connections == 0 {
            return Err(invalid("server.max_connections", "must be at least 1"));
        }
        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            return Err(invalid("server.tls_cert", "set both tls_cert and tls_key, or neither"));
        }
        if !(MIN_DAILY_LIMIT..=MAX_DAILY_LIMIT).contains(&self.quota.default_limit) {
            return Err(invalid(
                "quota.default_limit",
                format!("must be between {MIN_DAILY_LIMIT} and {MAX_DAILY_LIMIT}"),
            ));
        }
        self.calendar.build()?;
        Ok(())
    }
}
