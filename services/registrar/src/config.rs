use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::api::tokens::SESSION_LIFETIME_HOURS;
use crate::db::DbConfig;
use crate::notify::DEFAULT_QUEUE_CAPACITY;
use crate::reminders::DEFAULT_REMINDER_INTERVAL_SECS;

/// Which persistence backend serves events and identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres,
}

impl StoreKind {
    fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => bail!("CAMPUS_STORE must be 'memory' or 'postgres', got '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store: StoreKind,
    pub database: DbConfig,
    /// Webhook for outbound notifications; logged only when unset.
    pub notify_webhook_url: Option<String>,
    pub notify_queue_capacity: usize,
    pub reminder_interval: Duration,
    pub session_ttl: chrono::Duration,
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(v) => v.parse().with_context(|| format!("invalid {name}: '{v}'")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("CAMPUS_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid CAMPUS_LISTEN_ADDR")?;

        let log_level = std::env::var("CAMPUS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("CAMPUS_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let store = match std::env::var("CAMPUS_STORE") {
            Ok(v) => StoreKind::parse(&v)?,
            Err(_) => StoreKind::Memory,
        };

        let database = DbConfig::from_env();

        let notify_webhook_url = std::env::var("CAMPUS_NOTIFY_WEBHOOK_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let notify_queue_capacity = env_number("CAMPUS_NOTIFY_QUEUE", DEFAULT_QUEUE_CAPACITY)?;
        if notify_queue_capacity == 0 {
            bail!("CAMPUS_NOTIFY_QUEUE must be greater than zero");
        }

        let reminder_interval = Duration::from_secs(env_number(
            "CAMPUS_REMINDER_INTERVAL_SECS",
            DEFAULT_REMINDER_INTERVAL_SECS,
        )?);
        if reminder_interval.is_zero() {
            bail!("CAMPUS_REMINDER_INTERVAL_SECS must be greater than zero");
        }

        let ttl_hours: i64 = env_number("CAMPUS_SESSION_TTL_HOURS", SESSION_LIFETIME_HOURS)?;
        if ttl_hours <= 0 {
            bail!("CAMPUS_SESSION_TTL_HOURS must be greater than zero");
        }

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            database,
            notify_webhook_url,
            notify_queue_capacity,
            reminder_interval,
            session_ttl: chrono::Duration::hours(ttl_hours),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_kind_parse() {
        assert_eq!(StoreKind::parse("memory").unwrap(), StoreKind::Memory);
        assert_eq!(StoreKind::parse("Postgres").unwrap(), StoreKind::Postgres);
        assert!(StoreKind::parse("sqlite").is_err());
    }
}
