//! TOML configuration for the resilient MQTT client
//!
//! The file has three sections: `[mqtt]` for the broker session, `[reconnect]`
//! for the backoff policy and `[callbacks]` for the optional callback worker
//! pool. Every field has a default, so an empty file is a valid configuration
//! pointing at a local broker.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::supervisor::ReconnectPolicy;

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub callbacks: CallbackSection,
}

/// Broker session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `tcp://`, `mqtt://`, `ssl://` or `mqtts://`
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Client identifier (must match [a-zA-Z0-9._-]+); random when absent
    #[serde(default)]
    pub client_id: Option<String>,
    /// Literal username
    #[serde(default)]
    pub username: Option<String>,
    /// Literal password
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable containing the username, wins over `username`
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing the password, wins over `password`
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long `connect()` waits for the broker's ConnAck
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Topic filters subscribed at startup in addition to the router's patterns
    #[serde(default)]
    pub topics: Vec<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            client_id: None,
            username: None,
            password: None,
            username_env: None,
            password_env: None,
            clean_session: true,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            topics: Vec::new(),
        }
    }
}

/// Reconnect policy settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Maximum reconnect attempts per outage; unbounded when absent
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_true")]
    pub auto_retry_initial_connect: bool,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            auto_retry_initial_connect: true,
        }
    }
}

/// Callback execution settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CallbackSection {
    /// Run observer and router callbacks on a bounded worker pool instead of
    /// inline on the transport's event loop
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

fn default_broker_url() -> String {
    "tcp://127.0.0.1:1883".to_string()
}

fn default_true() -> bool {
    true
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_initial_delay_ms() -> u64 {
    5000
}

fn default_backoff_factor() -> f64 {
    1.5
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration back to TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_url.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.broker_url must not be empty".to_string(),
            ));
        }

        if let Some(client_id) = &self.mqtt.client_id {
            validate_client_id(client_id)?;
        }

        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.topics.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::InvalidConfig(
                "mqtt.topics must not contain empty filters".to_string(),
            ));
        }

        if self.reconnect.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be greater than 0 (omit it for unbounded)"
                    .to_string(),
            ));
        }

        if !self.reconnect.backoff_factor.is_finite() || self.reconnect.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "reconnect.backoff_factor must be >= 1.0, got {}",
                self.reconnect.backoff_factor
            )));
        }

        if self.callbacks.max_concurrency == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "callbacks.max_concurrency must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Reconnect policy described by the `[reconnect]` section
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            backoff_factor: self.reconnect.backoff_factor,
            auto_retry_initial_connect: self.reconnect.auto_retry_initial_connect,
        }
    }

    /// Configured client id, or a random one
    pub fn effective_client_id(&self) -> String {
        match &self.mqtt.client_id {
            Some(id) => id.clone(),
            None => format!("resilient-mqtt-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    /// Username from the environment variable if set, else the literal
    pub fn mqtt_username(&self) -> Option<String> {
        get_env_var_optional(self.mqtt.username_env.as_ref()).or_else(|| self.mqtt.username.clone())
    }

    /// Password from the environment variable if set, else the literal
    pub fn mqtt_password(&self) -> Option<String> {
        get_env_var_optional(self.mqtt.password_env.as_ref()).or_else(|| self.mqtt.password.clone())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt.connect_timeout_secs)
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Client ids are restricted to [a-zA-Z0-9._-]+
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[mqtt]
broker_url = "ssl://broker.example.com:8883"
client_id = "plant-7.gateway"
username = "root"
password_env = "RESILIENT_MQTT_TEST_UNSET_PASSWORD"
clean_session = false
keep_alive_secs = 30
connect_timeout_secs = 10
topics = ["devices/+/status", "alarms/#"]

[reconnect]
max_attempts = 10
initial_delay_ms = 250
backoff_factor = 2.0
auto_retry_initial_connect = false

[callbacks]
max_concurrency = 4
"#;

        let config = ClientConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.mqtt.broker_url, "ssl://broker.example.com:8883");
        assert_eq!(config.effective_client_id(), "plant-7.gateway");
        assert_eq!(config.mqtt_username(), Some("root".to_string()));
        assert_eq!(config.mqtt_password(), None);
        assert!(!config.mqtt.clean_session);
        assert_eq!(config.keep_alive(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.mqtt.topics.len(), 2);
        assert_eq!(config.callbacks.max_concurrency, Some(4));

        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts, Some(10));
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.backoff_factor, 2.0);
        assert!(!policy.auto_retry_initial_connect);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.mqtt.broker_url, "tcp://127.0.0.1:1883");
        assert!(config.mqtt.clean_session);

        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.initial_delay, Duration::from_millis(5000));
        assert_eq!(policy.backoff_factor, 1.5);
        assert!(policy.auto_retry_initial_connect);
    }

    #[test]
    fn test_random_client_id_when_absent() {
        let config = ClientConfig::default();
        let a = config.effective_client_id();
        let b = config.effective_client_id();
        assert!(a.starts_with("resilient-mqtt-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_env_credentials_win_over_literal() {
        let var = "RESILIENT_MQTT_TEST_USERNAME_OVERRIDE";
        std::env::set_var(var, "from-env");

        let mut config = ClientConfig::default();
        config.mqtt.username = Some("literal".to_string());
        config.mqtt.username_env = Some(var.to_string());
        assert_eq!(config.mqtt_username(), Some("from-env".to_string()));

        std::env::remove_var(var);
        assert_eq!(config.mqtt_username(), Some("literal".to_string()));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            "[mqtt]\nbroker_url = \"\"",
            "[mqtt]\nclient_id = \"bad id!\"",
            "[mqtt]\nkeep_alive_secs = 0",
            "[mqtt]\ntopics = [\"\"]",
            "[reconnect]\nmax_attempts = 0",
            "[reconnect]\nbackoff_factor = 0.5",
            "[callbacks]\nmax_concurrency = 0",
        ];

        for case in cases {
            assert!(
                ClientConfig::from_toml_str(case).is_err(),
                "expected rejection for {case:?}"
            );
        }
    }

    #[test]
    fn test_invalid_client_id() {
        assert!(validate_client_id("invalid@client").is_err());
        assert!(validate_client_id("").is_err());
        assert!(validate_client_id("valid-client_123.test").is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[mqtt]\nbroker_url = \"mqtt://localhost:1883\"\n\n[reconnect]\nmax_attempts = 3"
        )
        .unwrap();

        let config = ClientConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1883");
        assert_eq!(config.reconnect.max_attempts, Some(3));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ClientConfig::load_from_file(Path::new("/nonexistent/resilient-mqtt.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }

    #[test]
    fn test_toml_round_trip_for_show() {
        let mut config = ClientConfig::default();
        config.mqtt.topics.push("a/+/b".to_string());
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[mqtt]"));
        assert!(rendered.contains("a/+/b"));
        assert_eq!(ClientConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
