//! Client configuration via `shardgate.toml`
//!
//! Only the blocking bridge needs configuration: the size of the runtime
//! it drives calls on, the default deadline for contexts it hands out, and
//! the tablet role stamped on queries it builds.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shardgate_core::{Error, Result, TabletRole};

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "shardgate.toml";

/// Blocking client configuration.
///
/// # Example
///
/// ```toml
/// worker_threads = 2
/// thread_name = "shardgate-worker"
/// default_timeout_ms = 30000
/// default_role = "replica"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Worker threads of the bridge runtime, at least 1.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Name given to the bridge runtime's threads.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Deadline of contexts from `BlockingConn::context`, none when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
    /// Role of queries built by `BlockingConn::query`:
    /// `"primary"`, `"replica"` or `"rdonly"`.
    #[serde(default = "default_role_str")]
    pub default_role: String,
}

fn default_worker_threads() -> usize {
    2
}

fn default_thread_name() -> String {
    "shardgate-worker".to_string()
}

fn default_role_str() -> String {
    TabletRole::default().as_str().to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
            default_timeout_ms: None,
            default_role: default_role_str(),
        }
    }
}

impl ClientConfig {
    /// Parse the role string.
    ///
    /// # Errors
    ///
    /// Returns a caller error for an unknown role.
    pub fn role(&self) -> Result<TabletRole> {
        TabletRole::from_str(&self.default_role)
    }

    /// Default deadline as a duration.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    /// Check every field.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::caller("worker_threads must be at least 1"));
        }
        if self.thread_name.trim().is_empty() {
            return Err(Error::caller("thread_name must not be empty"));
        }
        self.role()?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Shardgate client configuration
#
# Worker threads of the runtime the blocking client drives calls on (default: 2)
worker_threads = 2

# Thread name prefix of that runtime
thread_name = "shardgate-worker"

# Deadline applied to contexts handed out by the blocking client, in milliseconds.
# Unset means no deadline.
# default_timeout_ms = 30000

# Tablet role for queries built by the blocking client: "primary", "replica" or "rdonly"
default_role = "primary"
"#
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| Error::caller(format!("Failed to parse client config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::caller(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            Error::caller(format!("Invalid config file '{}': {}", path.display(), e))
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::internal(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardgate_core::ErrorKind;

    #[test]
    fn test_default_toml_parses_to_default() {
        let config = ClientConfig::from_toml_str(ClientConfig::default_toml()).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.role().unwrap(), TabletRole::Primary);
        assert!(config.default_timeout().is_none());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = ClientConfig::from_toml_str("worker_threads = 0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Caller);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let err = ClientConfig::from_toml_str("default_role = \"leader\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Caller);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ClientConfig::from_toml_str("pool_size = 4").is_err());
    }
}
