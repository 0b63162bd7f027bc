use crate::conversation::{ConversationConfig, DEFAULT_REPLY_DELAY};
use crate::manager::DEFAULT_IDLE_TIMEOUT;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: PathBuf,
    pub conversation: ConversationConfig,
    /// Used for the theme when the visitor has no stored preference.
    pub prefers_dark: bool,
    /// Chat sessions and contact forms untouched this long are evicted.
    pub idle_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = parse_or(&lookup, "SOFTSELL_PORT", 3000)?;

        // We use ~/.softsell/softsell.db unless told otherwise
        let database_path = match lookup("SOFTSELL_DB") {
            Some(path) => PathBuf::from(path),
            None => {
                let home_dir = lookup("HOME").unwrap_or_else(|| ".".into());
                PathBuf::from(home_dir).join(".softsell").join("softsell.db")
            }
        };

        let delay_ms = parse_or(
            &lookup,
            "CHAT_REPLY_DELAY_MS",
            DEFAULT_REPLY_DELAY.as_millis() as u64,
        )?;
        let cancel_on_close = parse_or(&lookup, "CHAT_CANCEL_ON_CLOSE", false)?;
        let prefers_dark = parse_or(&lookup, "SOFTSELL_PREFERS_DARK", false)?;
        let idle_secs = parse_or(
            &lookup,
            "SESSION_IDLE_TIMEOUT_SECS",
            DEFAULT_IDLE_TIMEOUT.as_secs(),
        )?;

        Ok(Self {
            port,
            database_path,
            conversation: ConversationConfig {
                reply_delay: Duration::from_millis(delay_ms),
                cancel_on_close,
            },
            prefers_dark,
            idle_timeout: Duration::from_secs(idle_secs),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}
