//! Daemon configuration loading and validation.
//!
//! Loads the daemon configuration from an optional TOML file (`--config` or
//! `$TETHER_CONFIG_PATH`). Environment variables override file values; file
//! values override defaults. Command-line flags are applied last by the
//! binary.
//!
//! Precedence: CLI flags > env vars > config file > defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::authorizer::AuthorizerOptions;
use crate::executor::process::DEFAULT_SHELL;
use crate::executor::ExecOptions;
use crate::server::HandlerSettings;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 9000;

// ── Top-level config ────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Listener settings (`[server]`).
    pub server: ListenConfig,
    /// Certificate paths (`[tls]`).
    pub tls: TlsConfig,
    /// ACL source (`[acl]`).
    pub acl: AclConfig,
    /// Process execution (`[exec]`).
    pub exec: ExecConfig,
    /// Logging (`[logging]`).
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// `path` falls back to `$TETHER_CONFIG_PATH`. With neither, only
    /// defaults and env overrides apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is missing, unreadable, or invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load using a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// Same as [`DaemonConfig::load`].
    pub fn load_with(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env("TETHER_CONFIG_PATH").map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config at {}", path.display()))?;
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(env);
        Ok(config)
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid TOML or unknown keys.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: DaemonConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("TETHER_BIND") {
            match v.parse() {
                Ok(addr) => self.server.bind = addr,
                Err(_) => tracing::warn!(var = "TETHER_BIND", value = %v, "ignoring invalid env override"),
            }
        }
        if let Some(v) = env("TETHER_PORT") {
            match v.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(var = "TETHER_PORT", value = %v, "ignoring invalid env override"),
            }
        }

        if let Some(v) = env("TETHER_SERVER_CERTIFICATE") {
            self.tls.server_certificate = Some(PathBuf::from(v));
        }
        if let Some(v) = env("TETHER_SERVER_KEY") {
            self.tls.server_key = Some(PathBuf::from(v));
        }
        if let Some(v) = env("TETHER_CLIENT_CA") {
            self.tls.client_ca = Some(PathBuf::from(v));
        }

        if let Some(v) = env("TETHER_ACL_PATH") {
            self.acl.path = Some(PathBuf::from(v));
        }

        if let Some(v) = env("TETHER_EXEC_TIMEOUT_SECS") {
            match v.parse() {
                Ok(secs) => self.exec.timeout_secs = secs,
                Err(_) => tracing::warn!(
                    var = "TETHER_EXEC_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        if let Some(v) = env("TETHER_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
    }

    /// Check that everything `serve` needs is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the server certificate or client CA is missing,
    /// or the port is zero.
    pub fn validate(&self) -> Result<()> {
        if self.tls.server_certificate.is_none() {
            bail!("missing server certificate (--server-certificate or [tls].server_certificate)");
        }
        if self.tls.client_ca.is_none() {
            bail!("missing client CA bundle (--client-certificate or [tls].client_ca)");
        }
        if self.server.port == 0 {
            bail!("port must be non-zero");
        }
        Ok(())
    }

    /// Socket address to listen on.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind, self.server.port)
    }

    /// Per-request settings derived from `[exec]`.
    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            shell: self.exec.shell.clone(),
            exec: ExecOptions {
                timeout: self.exec.timeout(),
            },
            authorizer: AuthorizerOptions {
                legacy_world_readable: self.exec.legacy_world_readable,
            },
        }
    }
}

// ── Listener config ─────────────────────────────────────────────

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenConfig {
    /// Bind address. All interfaces by default.
    pub bind: IpAddr,
    /// Bind port.
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

// ── TLS config ──────────────────────────────────────────────────

/// Certificate paths.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    /// PEM with the server certificate chain (and key, unless `server_key`).
    pub server_certificate: Option<PathBuf>,
    /// PEM with the server private key.
    pub server_key: Option<PathBuf>,
    /// PEM bundle of CAs trusted to issue client certificates.
    pub client_ca: Option<PathBuf>,
}

// ── ACL config ──────────────────────────────────────────────────

/// ACL source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AclConfig {
    /// ACL file. Absent means an empty ACL (deny all).
    pub path: Option<PathBuf>,
}

// ── Exec config ─────────────────────────────────────────────────

/// Process execution settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecConfig {
    /// Shell interpreter for shell requests.
    pub shell: PathBuf,
    /// Kill children after this many seconds. 0 disables the limit.
    pub timeout_secs: u64,
    /// Require read targets to be world-readable.
    pub legacy_world_readable: bool,
}

impl ExecConfig {
    /// Execution time limit, if enabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
            timeout_secs: 0,
            legacy_world_readable: false,
        }
    }
}

// ── Logging config ──────────────────────────────────────────────

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rotated JSON logs. Console only when absent.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
        }
    }
}
