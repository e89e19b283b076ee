//! Application configuration

use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::TrackerError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Spot state is kept in memory when no database is configured
    pub database: Option<DatabaseConfig>,
    /// Optional uplink subscription, in addition to the HTTP endpoint
    pub mqtt: Option<MqttConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topics: Vec<String>,
    #[serde(default = "default_true")]
    pub tls: bool,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("PARKING")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("mqtt.topics"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), TrackerError> {
        if let Some(database) = &self.database {
            database.validate()?;
        }
        if let Some(mqtt) = &self.mqtt {
            mqtt.validate()?;
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.url.trim().is_empty() {
            return Err(TrackerError::ConfigurationError {
                message: "Database URL cannot be empty".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(TrackerError::ConfigurationError {
                message: "Database max_connections must be greater than zero".to_string(),
            });
        }
        if self.acquire_timeout.is_zero() {
            return Err(TrackerError::ConfigurationError {
                message: "Database acquire_timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl MqttConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.host.trim().is_empty() {
            return Err(TrackerError::ConfigurationError {
                message: "MQTT host cannot be empty".to_string(),
            });
        }
        if self.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(TrackerError::ConfigurationError {
                message: "At least one MQTT topic is required".to_string(),
            });
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(TrackerError::ConfigurationError {
                message: "MQTT username and password must be set together".to_string(),
            });
        }
        Ok(())
    }
}
