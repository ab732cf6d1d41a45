//! Configuration management module.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::UDP_PORT;
use crate::sign::Signer;

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub account: AccountConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

/// 352 cloud account used to list devices.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub phone: String,
    pub password: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Hex-encoded PKCS#8 DER RSA key used to sign API requests.
    #[serde(default)]
    pub sign_key: String,
}

/// LAN protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// UDP port for both the local bind and the broadcast target (default: 11530).
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: IpAddr,
    /// How long to listen for a state reply (default: 5).
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
    /// Delay before closing the socket after a fire-and-forget send (default: 100).
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
}

/// State polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_base_url() -> String {
    "https://352.yunext.com".to_string()
}

fn default_port() -> u16 {
    UDP_PORT
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_broadcast_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::BROADCAST)
}

fn default_reply_timeout_secs() -> u64 {
    5
}

fn default_send_delay_ms() -> u64 {
    100
}

fn default_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    1
}

impl AppConfig {
    /// Get config file path: next to the executable if present there, otherwise
    /// the platform config directory.
    pub fn default_path() -> PathBuf {
        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.join("config.toml")));

        match beside_exe {
            Some(path) if path.exists() => path,
            _ => ProjectDirs::from("com", "352", "air352")
                .map(|dirs| dirs.config_dir().join("config.toml"))
                .unwrap_or_else(|| PathBuf::from("config.toml")),
        }
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => ConfigLoadResult::Loaded(config),
                Err(e) => ConfigLoadResult::Invalid(e),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Parse and validate TOML content.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config = toml::from_str::<AppConfig>(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.account.validate()?;

        if self.network.port == 0 {
            return Err(ConfigError::Validation("UDP port must be greater than 0".to_string()));
        }
        if self.network.reply_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "Reply timeout must be at least 1 second".to_string(),
            ));
        }
        if self.poll.interval_secs < 5 {
            return Err(ConfigError::Validation(
                "Poll interval must be at least 5 seconds".to_string(),
            ));
        }
        if self.poll.max_attempts < 1 {
            return Err(ConfigError::Validation("Poll attempts must be at least 1".to_string()));
        }
        if self.poll.max_attempts > 10 {
            return Err(ConfigError::Validation("Poll attempts cannot exceed 10".to_string()));
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl AccountConfig {
    /// Validate credentials, API URL and signing key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.phone.trim().is_empty() {
            return Err(ConfigError::Validation("Account phone cannot be empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Validation("Account password cannot be empty".to_string()));
        }
        if !self.base_url.starts_with("http") {
            return Err(ConfigError::Validation(
                "API base URL must start with http:// or https://".to_string(),
            ));
        }
        Signer::from_hex(&self.sign_key)
            .map_err(|e| ConfigError::Validation(format!("Account sign_key is unusable: {e}")))?;
        Ok(())
    }
}

// Credentials stay out of logs.
impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("phone", &self.phone)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl NetworkConfig {
    /// Local address the UDP socket binds to.
    pub fn bind_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Broadcast destination for command frames.
    pub fn broadcast_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_addr, self.port)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            phone: String::new(),
            password: String::new(),
            base_url: default_base_url(),
            sign_key: String::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_addr: default_bind_addr(),
            broadcast_addr: default_broadcast_addr(),
            reply_timeout_secs: default_reply_timeout_secs(),
            send_delay_ms: default_send_delay_ms(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::tests::TEST_KEY_HEX;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.account.phone = "13800000000".to_string();
        config.account.password = "secret".to_string();
        config.account.sign_key = TEST_KEY_HEX.trim().to_string();
        config
    }

    fn account_toml(sign_key: Option<&str>) -> String {
        let mut toml = "[account]\nphone = \"13800000000\"\npassword = \"secret\"\n".to_string();
        if let Some(key) = sign_key {
            toml.push_str(&format!("sign_key = \"{key}\"\n"));
        }
        toml
    }

    #[test]
    fn test_default_config_requires_credentials() {
        assert!(AppConfig::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_network_addresses() {
        let network = NetworkConfig::default();
        assert_eq!(network.bind_socket_addr().to_string(), "0.0.0.0:11530");
        assert_eq!(network.broadcast_socket_addr().to_string(), "255.255.255.255:11530");
        assert_eq!(network.reply_timeout(), Duration::from_secs(5));
        assert_eq!(network.send_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_minimal_uses_defaults() {
        let config = AppConfig::parse(&account_toml(Some(TEST_KEY_HEX.trim()))).unwrap();

        assert_eq!(config.account.base_url, "https://352.yunext.com");
        assert_eq!(config.network.port, 11530);
        assert_eq!(config.poll.interval(), Duration::from_secs(60));
        assert_eq!(config.poll.max_attempts, 3);
        assert_eq!(config.poll.backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_overrides() {
        let content = account_toml(Some(TEST_KEY_HEX.trim()))
            + r#"
            [network]
            broadcast_addr = "192.168.1.255"
            reply_timeout_secs = 2

            [poll]
            interval_secs = 30
            max_attempts = 5
            "#;
        let config = AppConfig::parse(&content).unwrap();

        assert_eq!(config.account.sign_key, TEST_KEY_HEX.trim());
        assert_eq!(config.network.broadcast_socket_addr().to_string(), "192.168.1.255:11530");
        assert_eq!(config.network.reply_timeout_secs, 2);
        assert_eq!(config.poll.interval_secs, 30);
        assert_eq!(config.poll.max_attempts, 5);
    }

    #[test]
    fn test_validation_rejects_missing_or_bad_sign_key() {
        assert!(matches!(
            AppConfig::parse(&account_toml(None)),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            AppConfig::parse(&account_toml(Some("3082"))),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            AppConfig::parse(&account_toml(Some("not hex"))),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_invalid_base_url() {
        let mut config = valid_config();
        config.account.base_url = "ftp://invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_poll_attempt_bounds() {
        let mut config = valid_config();

        config.poll.max_attempts = 0;
        assert!(config.validate().is_err());

        config.poll.max_attempts = 11;
        assert!(config.validate().is_err());

        config.poll.max_attempts = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_poll_interval() {
        let mut config = valid_config();
        config.poll.interval_secs = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let config = valid_config();
        let rendered = format!("{:?}", config.account);
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("air352-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        valid_config().save(&path).unwrap();

        match AppConfig::try_load(&path) {
            ConfigLoadResult::Loaded(config) => assert_eq!(config.account.phone, "13800000000"),
            other => panic!("unexpected load result: {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&dir);
        assert!(matches!(AppConfig::try_load(&path), ConfigLoadResult::Missing));
    }
}
