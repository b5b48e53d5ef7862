use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_SCHEMA: &str = include_str!("../../../config/config.schema.json");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

/// How intents are handed to Home Assistant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleType {
    /// Fire an event on `/api/events/<event_type>`.
    #[default]
    Event,
    /// Call `/api/intent/handle` and speak the response.
    Intent,
}

impl FromStr for HandleType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Self::Event),
            "intent" => Ok(Self::Intent),
            other => Err(ConfigError::UnsupportedConfig(format!(
                "handle_type={other} is not implemented; supported: event, intent"
            ))),
        }
    }
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Event => "event",
            Self::Intent => "intent",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub home_assistant: HomeAssistant,
    #[serde(default)]
    pub mqtt: Mqtt,
    #[serde(default)]
    pub site_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistant {
    pub url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub api_password: Option<String>,
    #[serde(default)]
    pub handle_type: HandleType,
    #[serde(default = "default_event_type_format")]
    pub event_type_format: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub tls: Tls,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tls {
    /// Client certificate (PEM) presented for mutual TLS.
    #[serde(default)]
    pub certfile: Option<String>,
    /// Private key for `certfile`; when unset the key is read from `certfile`.
    #[serde(default)]
    pub keyfile: Option<String>,
    /// CA bundle (PEM) used to verify the server certificate.
    #[serde(default)]
    pub verify_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mqtt {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for Mqtt {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Config {
    /// Config with every optional setting at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            home_assistant: HomeAssistant {
                url: url.into(),
                access_token: None,
                api_password: None,
                handle_type: HandleType::default(),
                event_type_format: default_event_type_format(),
                timeout_ms: default_timeout_ms(),
                tls: Tls::default(),
            },
            mqtt: Mqtt::default(),
            site_ids: Vec::new(),
        }
    }
}

fn default_event_type_format() -> String {
    "rhasspy_{0}".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

/// Checks that hold regardless of where the config came from (file or flags).
pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    let ha = &cfg.home_assistant;
    if !(ha.url.starts_with("http://") || ha.url.starts_with("https://")) {
        return Err(ConfigError::UnsupportedConfig(format!(
            "home_assistant.url={} must start with http:// or https://",
            ha.url
        )));
    }
    if ha.event_type_format.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "home_assistant.event_type_format must not be empty".to_string(),
        ));
    }
    if ha.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "home_assistant.timeout_ms must be >= 1".to_string(),
        ));
    }
    if ha.tls.keyfile.is_some() && ha.tls.certfile.is_none() {
        return Err(ConfigError::UnsupportedConfig(
            "home_assistant.tls.keyfile requires home_assistant.tls.certfile".to_string(),
        ));
    }
    if cfg.mqtt.port == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "mqtt.port must be >= 1".to_string(),
        ));
    }
    if cfg.mqtt.keep_alive_secs < 5 {
        return Err(ConfigError::UnsupportedConfig(
            "mqtt.keep_alive_secs must be >= 5".to_string(),
        ));
    }
    if cfg.mqtt.password.is_some() && cfg.mqtt.username.is_none() {
        return Err(ConfigError::UnsupportedConfig(
            "mqtt.password requires mqtt.username".to_string(),
        ));
    }
    if cfg.site_ids.iter().any(|v| v.trim().is_empty()) {
        return Err(ConfigError::UnsupportedConfig(
            "site_ids must not contain empty entries".to_string(),
        ));
    }
    Ok(())
}
