//! Startup configuration.

use crate::codec::{DataFile, Format};
use crate::error::{Result, StoreError};
use crate::scheduler::FlushPolicy;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Default flush interval in seconds.
pub const DEFAULT_FLUSH_SECONDS: i64 = 60;

/// Default time allowed for open connections to finish at shutdown.
pub const DEFAULT_DRAIN_SECONDS: u64 = 10;

/// Persistent user store served over HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "userdb")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Address to listen on. A bare ":port" binds every interface.
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub host: String,

    /// Path to the data file
    #[arg(long, default_value = "data.json")]
    pub db: PathBuf,

    /// Flush policy: -1 = manual only, 0 = after every change,
    /// N > 0 = every N seconds
    #[arg(long, default_value_t = DEFAULT_FLUSH_SECONDS, allow_negative_numbers = true)]
    pub flush: i64,

    /// On-disk encoding (json or msgpack)
    #[arg(long, default_value_t = Format::Json)]
    pub format: Format,

    /// Seconds to wait for open connections at shutdown before exiting
    #[arg(long, default_value_t = DEFAULT_DRAIN_SECONDS)]
    pub drain_timeout: u64,
}

/// Validated configuration for one process.
#[derive(Clone, Debug)]
pub struct Config {
    /// Data file location.
    pub path: PathBuf,

    /// When to flush.
    pub flush: FlushPolicy,

    /// Encoding of the data file.
    pub format: Format,

    /// Listen address, always in `host:port` form.
    pub host: String,

    /// Upper bound on waiting for in-flight requests at shutdown.
    pub drain_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data.json"),
            flush: FlushPolicy::Interval(Duration::from_secs(DEFAULT_FLUSH_SECONDS as u64)),
            format: Format::Json,
            host: "0.0.0.0:8000".to_string(),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_SECONDS),
        }
    }
}

impl Config {
    /// The data file described by this configuration.
    pub fn data_file(&self) -> DataFile {
        DataFile::new(&self.path, self.format)
    }
}

impl TryFrom<Args> for Config {
    type Error = StoreError;

    fn try_from(args: Args) -> Result<Self> {
        if args.db.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig("data file path is empty".into()));
        }

        Ok(Self {
            path: args.db,
            flush: FlushPolicy::from_seconds(args.flush)?,
            format: args.format,
            host: normalize_host(&args.host)?,
            drain_timeout: Duration::from_secs(args.drain_timeout),
        })
    }
}

/// Turn `":8000"` into `"0.0.0.0:8000"`; leave full addresses alone.
fn normalize_host(host: &str) -> Result<String> {
    let host = host.trim();
    if host.is_empty() {
        return Err(StoreError::InvalidConfig("listen address is empty".into()));
    }
    if let Some(port) = host.strip_prefix(':') {
        port.parse::<u16>().map_err(|_| {
            StoreError::InvalidConfig(format!("invalid port in listen address '{}'", host))
        })?;
        return Ok(format!("0.0.0.0:{}", port));
    }
    Ok(host.to_string())
}
