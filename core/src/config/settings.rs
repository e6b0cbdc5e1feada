//! Process settings: listen address, worker pool, limits, bus behaviour.
//!
//! Defaults are overridden by `GATOR_*` environment variables, which the
//! command line overrides in turn.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::script::DEFAULT_STEP_LIMIT;


pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOG_FILTER: &str = "info";


#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen: SocketAddr,
    pub workers: usize,
    pub body_limit: usize,
    pub script_step_limit: u64,
    /// Upper bound on waiting for broker acknowledgements of one write's publishes.
    pub publish_timeout: Duration,
    /// Skip publishing a bus-originated write back to the mapping it came from.
    pub suppress_echo: bool,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            workers: DEFAULT_WORKERS,
            body_limit: DEFAULT_BODY_LIMIT,
            script_step_limit: DEFAULT_STEP_LIMIT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            suppress_echo: false,
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl Settings {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        let mut s = Settings::default();
        s.apply_env(|key| std::env::var(key).ok())?;
        Ok(s)
    }

    /// Apply `GATOR_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GATOR_LISTEN") {
            self.listen = parse_listen(&v)?;
        }
        if let Some(v) = lookup("GATOR_WORKERS") {
            self.workers = parse_number("GATOR_WORKERS", &v)?;
        }
        if let Some(v) = lookup("GATOR_BODY_LIMIT") {
            self.body_limit = parse_number("GATOR_BODY_LIMIT", &v)?;
        }
        if let Some(v) = lookup("GATOR_SCRIPT_STEP_LIMIT") {
            self.script_step_limit = parse_number("GATOR_SCRIPT_STEP_LIMIT", &v)?;
        }
        if let Some(v) = lookup("GATOR_PUBLISH_TIMEOUT_MS") {
            self.publish_timeout = Duration::from_millis(parse_number("GATOR_PUBLISH_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("GATOR_SUPPRESS_ECHO") {
            self.suppress_echo = parse_bool("GATOR_SUPPRESS_ECHO", &v)?;
        }
        if let Some(v) = lookup("RUST_LOG") {
            self.log_filter = v;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.body_limit == 0 {
            return Err(Error::Config("body limit must be positive".into()));
        }
        if self.script_step_limit == 0 {
            return Err(Error::Config("script step limit must be positive".into()));
        }
        Ok(())
    }
}

pub fn parse_listen(v: &str) -> Result<SocketAddr> {
    v.trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid listen address '{}': {}", v, e)))
}

fn parse_number<T: std::str::FromStr>(key: &str, v: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    v.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}: invalid number '{}': {}", key, v, e)))
}

fn parse_bool(key: &str, v: &str) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config(format!("{}: invalid boolean '{}'", key, other))),
    }
}
