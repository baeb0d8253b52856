use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Hard ceiling on seats per hold; bounds the cost of the hold script.
pub const MAX_SEATS_PER_HOLD: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub holds: HoldConfig,
    pub bookings: BookingConfig,
    pub waitlist: WaitlistConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_secs: u64,
    /// Server-side `statement_timeout`; a timed-out booking transaction rolls back.
    pub statement_timeout_ms: u64,
}

// Настройки Redis (хранилище холдов)
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoldConfig {
    pub default_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub max_seats: usize,
}

impl HoldConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 600,
            max_ttl_secs: 1800,
            max_seats: MAX_SEATS_PER_HOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub max_quantity: i32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self { max_quantity: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitlistConfig {
    pub notify_queue_capacity: usize,
}

impl Default for WaitlistConfig {
    fn default() -> Self {
        Self {
            notify_queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and reads the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let holds = HoldConfig {
            default_ttl_secs: parsed(&lookup, "HOLD_TTL_SECS", 600)?,
            max_ttl_secs: parsed(&lookup, "HOLD_MAX_TTL_SECS", 1800)?,
            max_seats: parsed(&lookup, "HOLD_MAX_SEATS", MAX_SEATS_PER_HOLD)?,
        };
        if holds.max_seats == 0 || holds.max_seats > MAX_SEATS_PER_HOLD {
            return Err(ConfigError::Invalid {
                name: "HOLD_MAX_SEATS",
                value: holds.max_seats.to_string(),
            });
        }
        if holds.default_ttl_secs == 0 || holds.default_ttl_secs > holds.max_ttl_secs {
            return Err(ConfigError::Invalid {
                name: "HOLD_TTL_SECS",
                value: holds.default_ttl_secs.to_string(),
            });
        }

        Ok(Config {
            app: AppConfig {
                environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
                rust_log: lookup("RUST_LOG")
                    .unwrap_or_else(|| "seat_reservation=debug".to_string()),
                log_format: parsed(&lookup, "LOG_FORMAT", LogFormat::Text)?,
            },
            database: DatabaseConfig {
                url: required(&lookup, "DATABASE_URL")?,
                pool_size: parsed(&lookup, "DB_POOL_SIZE", 20)?,
                acquire_timeout_secs: parsed(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 5)?,
                statement_timeout_ms: parsed(&lookup, "DB_STATEMENT_TIMEOUT_MS", 5000)?,
            },
            redis: RedisConfig {
                url: required(&lookup, "REDIS_URL")?,
                key_prefix: lookup("REDIS_KEY_PREFIX").unwrap_or_default(),
            },
            holds,
            bookings: BookingConfig {
                max_quantity: parsed(&lookup, "BOOKING_MAX_QUANTITY", 10)?,
            },
            waitlist: WaitlistConfig {
                notify_queue_capacity: parsed(&lookup, "WAITLIST_QUEUE_CAPACITY", 1024)?,
            },
        })
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parsed<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
