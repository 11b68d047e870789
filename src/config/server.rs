use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_TOKEN_TTL_SECS: u64 = 12 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct SomaConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub log: LogConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Read-only mode: every mutating request is refused.
    #[serde(default)]
    pub observer: bool,
    /// When set, only the repository with this name is served.
    #[serde(default)]
    pub repository_pin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Directory for `soma.log`. Logs go to stdout when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivationMode {
    Ldap,
    MailToken,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Seed mixed into every issued token salt.
    #[serde(default)]
    pub token_seed: String,
    /// Process-wide HMAC key for bearer tokens.
    pub token_key: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_credential_ttl_days")]
    pub credential_ttl_days: u32,
    #[serde(default = "default_activation")]
    pub activation: ActivationMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Capacity of every worker input queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Additional commit attempts before a tree-keeper declares itself broken.
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Period of the workflow sweep that re-applies failed events and
    /// promotes configurations left in awaiting computation.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/soma.db")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

fn default_credential_ttl_days() -> u32 {
    365
}

fn default_activation() -> ActivationMode {
    ActivationMode::MailToken
}

fn default_queue_depth() -> usize {
    64
}

fn default_commit_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_sweep_interval_ms() -> u64 {
    30_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            commit_retries: default_commit_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn with_key(token_key: impl Into<String>) -> Self {
        Self {
            token_seed: String::new(),
            token_key: token_key.into(),
            token_ttl_secs: default_token_ttl_secs(),
            credential_ttl_days: default_credential_ttl_days(),
            activation: default_activation(),
        }
    }
}

impl SomaConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: SomaConfig =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration used by tests and embedded setups.
    #[must_use]
    pub fn for_database(path: PathBuf, token_key: &str) -> Self {
        Self {
            database: DatabaseConfig { path },
            daemon: DaemonConfig::default(),
            log: LogConfig::default(),
            auth: AuthConfig::with_key(token_key),
            engine: EngineConfig::default(),
            observer: false,
            repository_pin: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.token_key.is_empty() {
            return Err(Error::Config("auth.token_key must not be empty".into()));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(Error::Config("auth.token_ttl_secs must be positive".into()));
        }
        if self.engine.queue_depth == 0 {
            return Err(Error::Config("engine.queue_depth must be positive".into()));
        }
        if self.daemon.tls_cert.is_some() || self.daemon.tls_key.is_some() {
            return Err(Error::Config(
                "TLS termination is not built in; terminate TLS at a reverse proxy".into(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.daemon.host, self.daemon.port).parse()
    }

    /// Directory holding the database; bootstrap secrets are written here.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.database
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = SomaConfig::parse(
            r#"
            [auth]
            token_key = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.daemon.port, 8888);
        assert_eq!(config.auth.token_ttl_secs, DEFAULT_TOKEN_TTL_SECS);
        assert_eq!(config.auth.activation, ActivationMode::MailToken);
        assert_eq!(config.engine.commit_retries, 2);
        assert_eq!(config.engine.sweep_interval_ms, 30_000);
        assert!(!config.observer);
        assert!(config.repository_pin.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = SomaConfig::parse(
            r#"
            observer = true
            repository_pin = "staging-ops"

            [database]
            path = "/var/lib/soma/soma.db"

            [daemon]
            host = "0.0.0.0"
            port = 9000

            [log]
            path = "/var/log/soma"

            [auth]
            token_seed = "seed"
            token_key = "key"
            token_ttl_secs = 60
            credential_ttl_days = 30
            activation = "ldap"

            [engine]
            queue_depth = 8
            sweep_interval_ms = 500
            "#,
        )
        .unwrap();

        assert!(config.observer);
        assert_eq!(config.repository_pin.as_deref(), Some("staging-ops"));
        assert_eq!(config.auth.activation, ActivationMode::Ldap);
        assert_eq!(config.engine.queue_depth, 8);
        assert_eq!(config.engine.sweep_interval_ms, 500);
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/soma"));
        assert_eq!(config.socket_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_missing_token_key_is_rejected() {
        assert!(SomaConfig::parse("[auth]\ntoken_key = \"\"\n").is_err());
        assert!(SomaConfig::parse("observer = false\n").is_err());
    }

    #[test]
    fn test_tls_paths_are_rejected() {
        let result = SomaConfig::parse(
            r#"
            [daemon]
            tls_cert = "/etc/soma/cert.pem"
            tls_key = "/etc/soma/key.pem"

            [auth]
            token_key = "key"
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
