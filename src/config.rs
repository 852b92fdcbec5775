//! Server configuration.
//!
//! Values come from three layers, later ones winning:
//!
//! 1. built-in defaults,
//! 2. a YAML file named by `PREFORK_CONFIG`,
//! 3. the environment variables `ADDRESS`, `PORT`, `WORKERS`, `VERBOSE`,
//!    `MAX_CLIENTS` and `DOC_ROOT`.
//!
//! ```yaml
//! server:
//!   port: 9000
//!   workers: 4
//! http:
//!   document_root: /srv/www
//! verbose: 1
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::Level;

pub const MAX_WORKERS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("worker count must be between 1 and 10, got {0}")]
    Workers(usize),
    #[error("max_clients must be at least 1")]
    MaxClients,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub http: HttpConfig,
    /// 0 logs at INFO, 1 at DEBUG, anything higher at TRACE.
    pub verbose: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: IpAddr,
    pub port: u16,
    pub workers: usize,
    /// Capacity of the dispatcher's slot table.
    pub max_clients: usize,
    /// How long a handed-off connection may stay unreported before its slot
    /// is reclaimed.
    pub handoff_timeout_ms: u64,
    pub reap_interval_ms: u64,
    /// Upper bound on how long the dispatcher sleeps in `poll`.
    pub tick_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub document_root: PathBuf,
    /// File served for a directory request.
    pub index: String,
    /// MIME key used when the request path has no extension.
    pub default_mime: String,
    /// Value of the `Server` response header.
    pub server_name: String,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            workers: 3,
            max_clients: 16,
            handoff_timeout_ms: 30_000,
            reap_interval_ms: 200,
            tick_ms: 250,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            document_root: PathBuf::from("./public"),
            index: "index.html".to_string(),
            default_mime: "html".to_string(),
            server_name: "prefork".to_string(),
            read_timeout_ms: 3_000,
            write_timeout_ms: 3_000,
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = match lookup("PREFORK_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(v) = lookup("ADDRESS") {
            cfg.server.address = parse("ADDRESS", v)?;
        }
        if let Some(v) = lookup("PORT") {
            cfg.server.port = parse("PORT", v)?;
        }
        if let Some(v) = lookup("WORKERS") {
            cfg.server.workers = parse("WORKERS", v)?;
        }
        if let Some(v) = lookup("VERBOSE") {
            cfg.verbose = parse("VERBOSE", v)?;
        }
        if let Some(v) = lookup("MAX_CLIENTS") {
            cfg.server.max_clients = parse("MAX_CLIENTS", v)?;
        }
        if let Some(v) = lookup("DOC_ROOT") {
            cfg.http.document_root = PathBuf::from(v);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WORKERS).contains(&self.server.workers) {
            return Err(ConfigError::Workers(self.server.workers));
        }
        if self.server.max_clients == 0 {
            return Err(ConfigError::MaxClients);
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.address, self.server.port)
    }

    pub fn max_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

impl ServerConfig {
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl HttpConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}
