//! Server configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, a JSON
//! file, `BERTLET_*` environment variables, and builder setters.
//!
//! # Example
//!
//! ```
//! use bertlet::ServerConfig;
//!
//! let config = ServerConfig::parse(r#"{ "port": 9999, "gzip_threshold": 512 }"#).unwrap();
//! assert_eq!(config.host, "127.0.0.1");
//! assert_eq!(config.port, 9999);
//! assert!(config.tls.is_none());
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BertletError, Result};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 2133;

/// Default size, in encoded bytes, at which responses are compressed.
pub const DEFAULT_GZIP_THRESHOLD: usize = 2048;

/// Default time a client gets to complete the TLS handshake.
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Listener and protocol settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host or address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind. 0 picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Certificate and key for TLS. Plain TCP when absent.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Encoded response size at which gzip kicks in, once negotiated.
    #[serde(default = "default_gzip_threshold")]
    pub gzip_threshold: usize,

    /// Largest accepted frame payload, also the decompression limit.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,

    /// Upper bound on a single invocation, in milliseconds.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,

    /// Time allowed for a TLS handshake, in milliseconds.
    #[serde(default = "default_tls_handshake_timeout_ms")]
    pub tls_handshake_timeout_ms: u64,
}

/// PEM files for the TLS listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Certificate chain, leaf first.
    pub cert_path: PathBuf,
    /// Private key (PKCS#8, PKCS#1 or SEC1).
    pub key_path: PathBuf,
}

impl TlsConfig {
    /// Create from certificate and key paths.
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_gzip_threshold() -> usize {
    DEFAULT_GZIP_THRESHOLD
}

const fn default_max_frame_size() -> u32 {
    DEFAULT_MAX_FRAME_SIZE
}

const fn default_tls_handshake_timeout_ms() -> u64 {
    DEFAULT_TLS_HANDSHAKE_TIMEOUT_MS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: None,
            gzip_threshold: default_gzip_threshold(),
            max_frame_size: default_max_frame_size(),
            call_timeout_ms: None,
            tls_handshake_timeout_ms: default_tls_handshake_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `BERTLET_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    /// Load a JSON file, then apply environment overrides.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BertletError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&content)?.merge_env(|key| std::env::var(key).ok())
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn parse(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognized keys: `BERTLET_HOST`, `BERTLET_PORT`, `BERTLET_TLS_CERT`,
    /// `BERTLET_TLS_KEY`, `BERTLET_GZIP_THRESHOLD`, `BERTLET_MAX_FRAME_SIZE`,
    /// `BERTLET_CALL_TIMEOUT_MS`, `BERTLET_TLS_HANDSHAKE_TIMEOUT_MS`. Certificate and key must be set together.
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("BERTLET_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("BERTLET_PORT") {
            self.port = parse_var("BERTLET_PORT", &port)?;
        }
        if let Some(threshold) = lookup("BERTLET_GZIP_THRESHOLD") {
            self.gzip_threshold = parse_var("BERTLET_GZIP_THRESHOLD", &threshold)?;
        }
        if let Some(max) = lookup("BERTLET_MAX_FRAME_SIZE") {
            self.max_frame_size = parse_var("BERTLET_MAX_FRAME_SIZE", &max)?;
        }
        if let Some(ms) = lookup("BERTLET_CALL_TIMEOUT_MS") {
            self.call_timeout_ms = Some(parse_var("BERTLET_CALL_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = lookup("BERTLET_TLS_HANDSHAKE_TIMEOUT_MS") {
            self.tls_handshake_timeout_ms = parse_var("BERTLET_TLS_HANDSHAKE_TIMEOUT_MS", &ms)?;
        }

        match (lookup("BERTLET_TLS_CERT"), lookup("BERTLET_TLS_KEY")) {
            (Some(cert), Some(key)) => self.tls = Some(TlsConfig::new(cert, key)),
            (None, None) => {}
            _ => {
                return Err(BertletError::Config(
                    "BERTLET_TLS_CERT and BERTLET_TLS_KEY must be set together".into(),
                ))
            }
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(BertletError::Config("host must not be empty".into()));
        }
        if self.max_frame_size == 0 {
            return Err(BertletError::Config("max_frame_size must be positive".into()));
        }
        if self.call_timeout_ms == Some(0) {
            return Err(BertletError::Config("call_timeout_ms must be positive".into()));
        }
        if self.tls_handshake_timeout_ms == 0 {
            return Err(BertletError::Config(
                "tls_handshake_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Invocation bound as a duration.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// TLS handshake bound as a duration.
    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.tls_handshake_timeout_ms)
    }

    /// Set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable TLS.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the gzip threshold.
    pub fn with_gzip_threshold(mut self, bytes: usize) -> Self {
        self.gzip_threshold = bytes;
        self
    }

    /// Set the maximum frame size.
    pub fn with_max_frame_size(mut self, bytes: u32) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Set or clear the call timeout.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout_ms = timeout.map(|d| d.as_millis().max(1) as u64);
        self
    }

    /// Set the TLS handshake timeout.
    pub fn with_tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.tls_handshake_timeout_ms = timeout.as_millis().max(1) as u64;
        self
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BertletError::Config(format!("invalid value for {key}: {value:?}")))
}
