//! `~/.cordlink/config.toml` loading.
//!
//! Every section is optional and every field has a default, so an absent
//! file and an empty file load the same configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

/// Fallback for `discord.token`.
pub const TOKEN_ENV: &str = "CORDLINK_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CordlinkConfig {
    pub discord: DiscordConfig,
    pub subprocess: SubprocessConfig,
    pub cache: CacheConfig,
    pub polling: PollingConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub app_id: Option<String>,
    pub token: Option<String>,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("app_id", &self.app_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl DiscordConfig {
    #[must_use]
    pub fn app_id(&self) -> Option<String> {
        self.app_id
            .as_deref()
            .map(expand_env_vars)
            .filter(|id| !id.is_empty())
    }

    /// Configured token with `${VAR}` expanded, else `CORDLINK_TOKEN`.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token
            .as_deref()
            .map(expand_env_vars)
            .filter(|token| !token.is_empty())
            .or_else(|| env::var(TOKEN_ENV).ok().filter(|token| !token.is_empty()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
    pub binary: Option<PathBuf>,
    pub args: Vec<String>,
    pub sdk_dir: Option<PathBuf>,
    pub shutdown_grace_ms: u64,
    pub timeouts: TimeoutsConfig,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            binary: None,
            args: Vec::new(),
            sdk_dir: None,
            shutdown_grace_ms: 1000,
            timeouts: TimeoutsConfig::default(),
        }
    }
}

impl SubprocessConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub interactive_secs: u64,
    pub lobby_creation_secs: u64,
    pub status_query_secs: u64,
    pub default_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            interactive_secs: 60,
            lobby_creation_secs: 20,
            status_query_secs: 5,
            default_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub lobby_ids_ttl_secs: u64,
    pub friends_ttl_secs: u64,
    pub channels_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lobby_ids_ttl_secs: 5,
            friends_ttl_secs: 60,
            channels_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub event_queue_interval_ms: u64,
    pub relay_interval_ms: u64,
    pub dm_interval_ms: u64,
    pub dm_enabled: bool,
    pub dm_history_limit: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            event_queue_interval_ms: 1000,
            relay_interval_ms: 2000,
            dm_interval_ms: 5000,
            dm_enabled: false,
            dm_history_limit: 20,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay polling is off without a base URL.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 10,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.base_url
            .as_deref()
            .map(expand_env_vars)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: Option<String>,
    /// Demote per-cycle poll logging to warnings.
    pub quiet_polling: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            quiet_polling: true,
        }
    }
}

/// Replace each `${VAR}` with its value; unset variables become empty.
///
/// An unclosed `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("${") {
        let Some(close) = rest[open + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let name = &rest[open + 2..open + 2 + close];
        if !name.is_empty() {
            out.push_str(&env::var(name).unwrap_or_default());
        }
        rest = &rest[open + 2 + close + 1..];
    }
    out.push_str(rest);
    out
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cordlink").join("config.toml"))
}

impl CordlinkConfig {
    /// Load from the default location. Defaults when there is no file or no
    /// home directory.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                tracing::warn!("Failed to read config at {}: {err}", path.display());
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        toml::from_str(&content).map_err(|err| {
            tracing::warn!("Failed to parse config at {}: {err}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source: err,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CordlinkConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.subprocess.shutdown_grace_ms, 1000);
        assert_eq!(config.subprocess.timeouts.lobby_creation_secs, 20);
        assert_eq!(config.cache.friends_ttl_secs, 60);
        assert_eq!(config.polling.relay_interval_ms, 2000);
        assert!(!config.polling.dm_enabled);
        assert!(config.logging.quiet_polling);
        assert!(config.relay.base_url().is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
[subprocess]
binary = "/opt/bin/discord-subprocess"
args = ["--verbose"]

[subprocess.timeouts]
status_query_secs = 2

[polling]
dm_enabled = true

[relay]
base_url = "https://relay.example/api"

[logging]
quiet_polling = false
"#,
        );
        let config = CordlinkConfig::load_from(&path).unwrap();
        assert_eq!(
            config.subprocess.binary.as_deref(),
            Some(Path::new("/opt/bin/discord-subprocess"))
        );
        assert_eq!(config.subprocess.args, vec!["--verbose".to_string()]);
        assert_eq!(config.subprocess.timeouts.status_query_secs, 2);
        assert_eq!(config.subprocess.timeouts.interactive_secs, 60);
        assert!(config.polling.dm_enabled);
        assert_eq!(config.polling.dm_history_limit, 20);
        assert_eq!(
            config.relay.base_url().as_deref(),
            Some("https://relay.example/api")
        );
        assert!(!config.logging.quiet_polling);
    }

    #[test]
    fn parse_error_carries_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[polling\nrelay_interval_ms = 1");
        let err = CordlinkConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), path.as_path());
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    #[cfg(unix)]
    fn unreadable_path_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CordlinkConfig::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn token_expands_env_reference() {
        unsafe {
            env::set_var("CORDLINK_TEST_TOKEN_REF", "secret-value");
        }
        let discord = DiscordConfig {
            app_id: Some("1234".to_string()),
            token: Some("${CORDLINK_TEST_TOKEN_REF}".to_string()),
        };
        assert_eq!(discord.token().as_deref(), Some("secret-value"));
        assert_eq!(discord.app_id().as_deref(), Some("1234"));
        assert!(!format!("{discord:?}").contains("secret"));
        unsafe {
            env::remove_var("CORDLINK_TEST_TOKEN_REF");
        }
    }

    #[test]
    fn expand_env_vars_substitutes_and_blanks() {
        unsafe {
            env::set_var("CORDLINK_TEST_A", "x");
            env::set_var("CORDLINK_TEST_B", "ü");
        }
        assert_eq!(expand_env_vars("plain"), "plain");
        assert_eq!(expand_env_vars("${CORDLINK_TEST_A}${CORDLINK_TEST_B}!"), "xü!");
        assert_eq!(expand_env_vars("a ${CORDLINK_TEST_UNSET_VAR} b"), "a  b");
        assert_eq!(expand_env_vars("keep ${} gap"), "keep  gap");
        assert_eq!(expand_env_vars("open ${CORDLINK_TEST_A"), "open ${CORDLINK_TEST_A");
        unsafe {
            env::remove_var("CORDLINK_TEST_A");
            env::remove_var("CORDLINK_TEST_B");
        }
    }
}
