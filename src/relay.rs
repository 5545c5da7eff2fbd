//! Client for the device relay.
//!
//! The relay is a small key-value service holding the device's latest reading
//! and the pending control command. The monitor reads the former and writes
//! the latter; it keeps no other state there.

use crate::device::DeviceReading;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Command asking the device to begin a measurement window.
pub const START_COMMAND: &str = "START";

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL, e.g. `http://127.0.0.1:8787`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RelayConfig {
    /// Create a new relay configuration.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Get the latest-sample endpoint URL.
    pub fn latest_url(&self) -> String {
        format!("{}/api/latest", self.base_url)
    }

    /// Get the control-command endpoint URL.
    pub fn command_url(&self) -> String {
        format!("{}/api/command", self.base_url)
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

/// Relay client error types.
#[derive(Debug)]
pub enum RelayError {
    /// Client could not be built
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Relay returned an error response
    Server { status: u16, message: String },
    /// Body could not be decoded
    Serialization(String),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::Config(msg) => write!(f, "Relay config error: {msg}"),
            RelayError::Network(msg) => write!(f, "Relay network error: {msg}"),
            RelayError::Server { status, message } => {
                write!(f, "Relay server error ({status}): {message}")
            }
            RelayError::Serialization(msg) => write!(f, "Relay serialization error: {msg}"),
        }
    }
}

impl std::error::Error for RelayError {}

/// Body of a control-command write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command: String,
}

impl ControlCommand {
    pub fn start() -> Self {
        Self {
            command: START_COMMAND.to_string(),
        }
    }
}

/// HTTP client for the relay.
#[derive(Debug, Clone)]
pub struct RelayClient {
    config: RelayConfig,
    client: reqwest::Client,
}

impl RelayClient {
    /// Create a new relay client.
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Relay configuration in use.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Test connection to the relay.
    pub async fn test_connection(&self) -> Result<bool, RelayError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Fetch the device's latest reading.
    pub async fn fetch_latest(&self) -> Result<DeviceReading, RelayError> {
        let response = self
            .client
            .get(self.config.latest_url())
            .send()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<DeviceReading>()
            .await
            .map_err(|e| RelayError::Serialization(e.to_string()))
    }

    /// Post a control command for the device to pick up.
    pub async fn post_command(&self, command: &ControlCommand) -> Result<(), RelayError> {
        let response = self
            .client
            .post(self.config.command_url())
            .header("Content-Type", "application/json")
            .json(command)
            .send()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}
