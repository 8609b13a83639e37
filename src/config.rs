//! Client configuration
//!
//! Defaults can be overridden by an optional TOML file:
//!
//! ```toml
//! trust_dir = "/home/me/.local/share/gemini/known_hosts"
//! on_key_mismatch = "error"   # or "ignore", "replace"
//! timeout_secs = 30           # 0 disables socket timeouts
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::tofu::MismatchPolicy;

/// Directory name under the platform config dir
pub const APP_NAME: &str = "gemini-tofu";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `<config dir>/gemini-tofu`, or `./.gemini-tofu` where the platform has none
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{APP_NAME}")))
}

pub fn default_config_file() -> PathBuf {
    default_config_dir().join("config.toml")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Directory holding one trust record per address
    pub trust_dir: PathBuf,
    pub on_key_mismatch: MismatchPolicy,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            trust_dir: default_config_dir().join("known_hosts"),
            on_key_mismatch: MismatchPolicy::default(),
            connect_timeout: Some(DEFAULT_TIMEOUT),
            read_timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    trust_dir: Option<PathBuf>,
    on_key_mismatch: Option<MismatchPolicy>,
    timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Defaults overlaid with the TOML file at `path`, which must exist
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(path, &text)
    }

    /// Like [`load`](Self::load), but a missing file gives the defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(path, &text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!("{}: {}", path.display(), e))),
        }
    }

    fn parse(path: &Path, text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::default();
        if let Some(dir) = file.trust_dir {
            // Relative paths are taken from the config file's directory
            config.trust_dir = match path.parent() {
                Some(parent) if dir.is_relative() => parent.join(dir),
                _ => dir,
            };
        }
        if let Some(policy) = file.on_key_mismatch {
            config.on_key_mismatch = policy;
        }
        if let Some(secs) = file.timeout_secs {
            config = config.with_timeout(secs_to_timeout(secs));
        }
        Ok(config)
    }

    pub fn with_trust_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trust_dir = dir.into();
        self
    }

    pub fn with_mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.on_key_mismatch = policy;
        self
    }

    /// Set both connect and read timeouts; `None` blocks indefinitely
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self.read_timeout = timeout;
        self
    }
}

/// Zero seconds means no timeout
pub fn secs_to_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_default_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_or_default(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.on_key_mismatch, MismatchPolicy::Error);
        assert!(config.trust_dir.ends_with("known_hosts"));
    }

    #[test]
    fn test_missing_explicit_file_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        match ClientConfig::load(&path) {
            Err(Error::Config(msg)) => assert!(msg.contains("config.toml")),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_file_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            "trust_dir = \"hosts\"\non_key_mismatch = \"replace\"\ntimeout_secs = 0\n",
        )
        .unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.trust_dir, tmp.path().join("hosts"));
        assert_eq!(ClientConfig::load_or_default(&path).unwrap(), config);
        assert_eq!(config.on_key_mismatch, MismatchPolicy::Replace);
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.read_timeout, None);
    }

    #[test]
    fn test_bad_file_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");

        fs::write(&path, "on_key_mismatch = \"trust\"\n").unwrap();
        assert!(matches!(ClientConfig::load(&path), Err(Error::Config(_))));

        fs::write(&path, "unknown_key = 1\n").unwrap();
        assert!(matches!(ClientConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_builders() {
        let config = ClientConfig::default()
            .with_trust_dir("/tmp/hosts")
            .with_mismatch_policy(MismatchPolicy::Ignore)
            .with_timeout(secs_to_timeout(5));
        assert_eq!(config.trust_dir, PathBuf::from("/tmp/hosts"));
        assert_eq!(config.on_key_mismatch, MismatchPolicy::Ignore);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
    }
}
