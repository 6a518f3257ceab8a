//! Configuration file for the murmur CLI.

use murmur_core::{Capability, ConnectionConfig, KeyPair, capability};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

/// murmur configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionSection {
    /// Shared secret (hex, 32 bytes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Identity seed (hex, 32 bytes); a fresh identity when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Capability names to declare
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Keep writing after the remote closed
    #[serde(default)]
    pub allow_half_open: bool,
    /// Keep entries in the logs after they were read or uploaded
    #[serde(default)]
    pub preserve: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn decode_key(value: &str, name: &str) -> anyhow::Result<Zeroizing<[u8; 32]>> {
    let bytes = Zeroizing::new(
        hex::decode(value.trim()).map_err(|e| anyhow::anyhow!("{name} is not valid hex: {e}"))?,
    );
    let key: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("{name} must be 32 bytes, got {}", bytes.len()))?;
    Ok(Zeroizing::new(key))
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Override file values with command-line flags
    pub fn apply_flags(&mut self, secret: Option<String>, capabilities: Vec<String>) {
        if secret.is_some() {
            self.connection.secret = secret;
        }
        if !capabilities.is_empty() {
            self.connection.capabilities = capabilities;
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(secret) = &self.connection.secret {
            decode_key(secret, "secret")?;
        }
        if let Some(identity) = &self.connection.identity {
            decode_key(identity, "identity seed")?;
        }
        for name in &self.connection.capabilities {
            capability(name)?;
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Shared secret, required to connect
    ///
    /// # Errors
    ///
    /// Returns an error if no secret is configured or it is malformed.
    pub fn secret(&self) -> anyhow::Result<Zeroizing<[u8; 32]>> {
        let secret = self
            .connection
            .secret
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no shared secret (use --secret or the config file)"))?;
        decode_key(secret, "secret")
    }

    /// Build the connection configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the identity seed or a capability is malformed.
    pub fn connection_config(&self) -> anyhow::Result<ConnectionConfig> {
        let identity = match &self.connection.identity {
            Some(seed) => Some(KeyPair::from_seed(&*decode_key(seed, "identity seed")?)),
            None => None,
        };
        let capabilities = self
            .connection
            .capabilities
            .iter()
            .map(|name| capability(name))
            .collect::<Result<Vec<Capability>, _>>()?;

        Ok(ConnectionConfig {
            identity,
            capabilities,
            preserve_receiver: self.connection.preserve,
            preserve_sender: self.connection.preserve,
            allow_half_open: self.connection.allow_half_open,
            ..Default::default()
        })
    }
}
