//! WolfVault Configuration
//!
//! Loaded once at startup and shared read-only with the admission gate,
//! the file store and the TLS layer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main WolfVault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfVaultConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Server key material and client trust anchors
    pub tls: TlsConfig,

    /// File store configuration
    pub store: StoreConfig,

    /// Audit sink configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTPS bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Maximum request body size for uploads, in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Server certificate chain (PEM)
    pub cert: PathBuf,

    /// Server private key (PEM)
    pub key: PathBuf,

    /// CA bundle that client certificates must chain to (PEM)
    pub ca_cert: PathBuf,

    /// Refuse the handshake when the client presents no certificate.
    /// When false, anonymous connections reach the admission gate and are
    /// rejected there per operation.
    #[serde(default = "default_true")]
    pub require_client_cert: bool,
}

/// File store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Flat directory holding every stored object
    pub root_dir: PathBuf,
}

/// Audit configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditConfig {
    /// Append-only JSON lines file (optional, audit always goes to the log)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_max_upload_mb() -> u64 {
    512
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfVaultConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfVaultConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.bind_address.is_empty() {
            return Err(crate::Error::Config("server.bind_address cannot be empty".into()));
        }

        if self.server.max_upload_mb == 0 {
            return Err(crate::Error::Config("server.max_upload_mb must be positive".into()));
        }

        for (field, path) in [
            ("tls.cert", &self.tls.cert),
            ("tls.key", &self.tls.key),
            ("tls.ca_cert", &self.tls.ca_cert),
        ] {
            if path.as_os_str().is_empty() {
                return Err(crate::Error::Config(format!("{} cannot be empty", field)));
            }
        }

        if self.store.root_dir.as_os_str().is_empty() {
            return Err(crate::Error::Config("store.root_dir cannot be empty".into()));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(crate::Error::Config(format!(
                    "logging.format must be \"pretty\" or \"json\", got {:?}",
                    other
                )))
            }
        }

        Ok(())
    }

    /// Get the store root directory
    pub fn root_dir(&self) -> &Path {
        &self.store.root_dir
    }

    /// Commented starter configuration written by `wolfvault init`
    pub fn init_template(root_dir: &Path) -> String {
        // Encoded by toml so quotes and backslashes in the path stay valid
        let root = toml::Value::String(root_dir.display().to_string());
        format!(
            r#"# WolfVault Configuration
# Generated configuration file

[server]
bind_address = "0.0.0.0:8443"
max_upload_mb = 512

[tls]
cert = "/etc/wolfvault/server.crt"
key = "/etc/wolfvault/server.key"
ca_cert = "/etc/wolfvault/ca.crt"
# Set to false to let certificate-less clients connect; the gate still
# rejects every custody operation they attempt.
require_client_cert = true

[store]
root_dir = {root}

[audit]
# file = "/var/log/wolfvault/audit.jsonl"

[logging]
level = "info"
format = "pretty"
"#,
            root = root
        )
    }

    /// Upload body limit in bytes
    pub fn max_upload_bytes(&self) -> usize {
        (self.server.max_upload_mb as usize).saturating_mul(1024 * 1024)
    }
}
