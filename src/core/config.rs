//! Runtime configuration: defaults, TOML file layer, validation.
//!
//! Flags win over the config file, the config file wins over the built-in
//! defaults. Validation collects every problem before reporting, so a bad
//! invocation prints the full list instead of one error per run.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::errors::{BeaconError, Result};

/// Default coordination endpoint.
pub const DEFAULT_ENDPOINT: &str = "localhost:2181";
/// Default session timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
/// Default delay between heartbeat iterations, in seconds. The per-iteration
/// execution timeout is the same value.
pub const DEFAULT_DELAY_S: u64 = 5;
/// Default capture buffer for the executed program's output (1 MiB).
pub const DEFAULT_BUFFER_BYTES: usize = 1 << 20;

/// Optional TOML config file. Every field can also be given as a flag.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileConfig {
    pub endpoint: Option<String>,
    pub path: Option<String>,
    pub exec: Option<PathBuf>,
    pub delay_in_s: Option<u64>,
    pub timeout_in_ms: Option<u64>,
    pub buffer_bytes: Option<usize>,
    /// Bound each run by wall clock instead of re-arming per readiness wait.
    pub strict_deadline: Option<bool>,
}

impl FileConfig {
    /// Load a config file, failing with a dedicated error when it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BeaconError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|source| BeaconError::io(path, source))?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Fully resolved send-mode settings.
#[derive(Debug, Clone)]
pub struct SendSettings {
    pub endpoint: String,
    pub path: String,
    pub exec: PathBuf,
    pub args: Vec<String>,
    pub delay: Duration,
    pub session_timeout: Duration,
    pub buffer_bytes: usize,
    pub strict_deadline: bool,
}

impl SendSettings {
    /// Check the same conditions the agent has always refused to start with.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.endpoint.is_empty() {
            problems.push("endpoint must not be empty".to_string());
        }
        if let Err(problem) = validate_node_path(&self.path) {
            problems.push(problem);
        }
        if self.exec.as_os_str().is_empty() {
            problems.push("exec must not be empty".to_string());
        }
        if self.session_timeout.is_zero() {
            problems.push("timeout must be > 0".to_string());
        }
        if self.buffer_bytes == 0 {
            problems.push("buffer must be > 0".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(BeaconError::InvalidConfig {
                details: problems.join("; "),
            })
        }
    }
}

/// Fully resolved recv-mode settings.
#[derive(Debug, Clone)]
pub struct RecvSettings {
    pub endpoint: String,
    pub path: String,
    pub session_timeout: Duration,
}

impl RecvSettings {
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.endpoint.is_empty() {
            problems.push("endpoint must not be empty".to_string());
        }
        if let Err(problem) = validate_node_path(&self.path) {
            problems.push(problem);
        }
        if self.session_timeout.is_zero() {
            problems.push("timeout must be > 0".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(BeaconError::InvalidConfig {
                details: problems.join("; "),
            })
        }
    }
}

fn validate_node_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Err("path must not be empty".to_string());
    }
    if !path.starts_with('/') {
        return Err(format!("path must be absolute, got {path:?}"));
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(format!("path must not end with a slash, got {path:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{FileConfig, SendSettings};
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    fn settings() -> SendSettings {
        SendSettings {
            endpoint: "localhost:2181".to_string(),
            path: "/services/web".to_string(),
            exec: PathBuf::from("/bin/true"),
            args: Vec::new(),
            delay: Duration::from_secs(5),
            session_timeout: Duration::from_millis(5000),
            buffer_bytes: 1 << 20,
            strict_deadline: false,
        }
    }

    #[test]
    fn default_settings_validate() {
        settings().validate().expect("defaults should validate");
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut bad = settings();
        bad.endpoint.clear();
        bad.path = "services/web".to_string();
        bad.session_timeout = Duration::ZERO;
        let err = bad.validate().expect_err("must be rejected");
        let message = err.to_string();
        assert!(message.contains("endpoint"), "missing endpoint problem: {message}");
        assert!(message.contains("absolute"), "missing path problem: {message}");
        assert!(message.contains("timeout"), "missing timeout problem: {message}");
    }

    #[test]
    fn relative_node_path_is_rejected() {
        let mut bad = settings();
        bad.path = "web".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn file_config_round_trips_from_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "endpoint = \"zk1:2181,zk2:2181\"\npath = \"/services/web\"\ndelay_in_s = 10"
        )
        .expect("write config");
        let config = FileConfig::load(file.path()).expect("load should succeed");
        assert_eq!(config.endpoint.as_deref(), Some("zk1:2181,zk2:2181"));
        assert_eq!(config.delay_in_s, Some(10));
        assert!(config.exec.is_none());
    }

    #[test]
    fn missing_config_file_is_a_dedicated_error() {
        let err = FileConfig::load(std::path::Path::new("/nonexistent/zkbeacon.toml"))
            .expect_err("must fail");
        assert_eq!(err.code(), "ZKB-1002");
    }
}
