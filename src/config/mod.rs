use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Environment variable naming a TOML config file. When unset, configuration
/// is read from individual environment variables.
pub const CONFIG_PATH_ENV: &str = "SCHEDULE_DISPATCH_CONFIG";

/// Complete service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Address the HTTP trigger endpoint binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Largest accepted trigger body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    pub store: StoreConfig,
    pub bus: BusConfig,
}

/// Schedule store access. Neither field has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// `https://<project>.supabase.co` style PostgREST host, or `sqlite://<path>`
    pub endpoint: String,
    /// Project API key, sent as `apikey` and as fallback bearer token
    pub key: String,
}

/// Message bus access
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// `mqtt://host:port` or `nats://host:port`. No default.
    pub url: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// JetStream stream capturing device schedule subjects (NATS only)
    #[serde(default = "default_nats_stream")]
    pub nats_stream: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_keep_alive_secs() -> u64 {
    5
}

fn default_nats_stream() -> String {
    "DEVICE_SCHEDULES".to_string()
}

impl ServiceConfig {
    /// Loads from the file named by `SCHEDULE_DISPATCH_CONFIG`, or from the
    /// process environment when it is unset.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => load_config(&path),
            Err(_) => Self::from_lookup(|name| std::env::var(name).ok()),
        }
    }

    /// Builds the config from environment-style lookups.
    ///
    /// Required: `STORE_URL`, `STORE_KEY`, `BUS_URL`.
    /// Optional: `LISTEN_ADDR`, `MAX_BODY_BYTES`, `BUS_KEEP_ALIVE_SECS`,
    /// `NATS_STREAM_NAME`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("{} is required", name))
        };

        let config = Self {
            listen_addr: lookup("LISTEN_ADDR").unwrap_or_else(default_listen_addr),
            max_body_bytes: match lookup("MAX_BODY_BYTES") {
                Some(v) => v.parse().context("MAX_BODY_BYTES must be a byte count")?,
                None => default_max_body_bytes(),
            },
            store: StoreConfig {
                endpoint: required("STORE_URL")?,
                key: required("STORE_KEY")?,
            },
            bus: BusConfig {
                url: required("BUS_URL")?,
                keep_alive_secs: match lookup("BUS_KEEP_ALIVE_SECS") {
                    Some(v) => v
                        .parse()
                        .context("BUS_KEEP_ALIVE_SECS must be a number of seconds")?,
                    None => default_keep_alive_secs(),
                },
                nats_stream: lookup("NATS_STREAM_NAME").unwrap_or_else(default_nats_stream),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects blank required values.
    pub fn validate(&self) -> Result<()> {
        if self.store.endpoint.trim().is_empty() {
            bail!("store.endpoint must not be empty");
        }
        if self.store.key.trim().is_empty() {
            bail!("store.key must not be empty");
        }
        if self.bus.url.trim().is_empty() {
            bail!("bus.url must not be empty");
        }
        if self.bus.keep_alive_secs == 0 {
            bail!("bus.keep_alive_secs must be at least 1");
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<ServiceConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: ServiceConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    config.validate()?;
    Ok(config)
}
