//! Configuration management

use crate::connection::ConnectParams;
use crate::hook::ScriptConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Bouncer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Process-wide settings
    #[serde(default)]
    pub bouncer: BouncerConfig,
    /// Configured users
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BouncerConfig {
    /// Capacity of each user's delivery queue
    pub delivery_buffer: usize,
    /// Longest outbound message body sent as a single line, in bytes
    pub max_line_length: usize,
    /// Reason sent with QUIT on graceful disconnects
    pub quit_message: String,
    /// Directory holding the message logs
    pub data_dir: PathBuf,
    /// Write the configuration back after script edits
    pub autosave: bool,
    /// Ident responder
    pub ident: IdentConfig,
    /// Link previews
    pub preview: PreviewConfig,
}

/// Ident (RFC 1413) responder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentConfig {
    /// Whether to run the responder
    pub enabled: bool,
    /// Address to bind
    pub bind: String,
    /// Port to bind
    pub port: u16,
}

/// Link preview settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Whether to fetch previews at all
    pub enabled: bool,
    /// Per-request timeout
    pub timeout_seconds: u64,
    /// Largest response body inspected
    pub max_bytes: usize,
}

/// One bouncer user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Login name, also the ident reply and store key
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// Scripts run on every network of the user
    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

/// One network a user stays connected to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Name the user refers to the network by
    pub name: String,
    pub nick: String,
    pub user: String,
    pub realname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub address: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    /// Connect when the bouncer starts
    #[serde(default = "default_true")]
    pub autoconnect: bool,
    /// Channels joined after registration
    #[serde(default)]
    pub channels: Vec<String>,
    /// Scripts run on this network only
    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,
}

fn default_irc_port() -> u16 {
    6667
}

fn default_true() -> bool {
    true
}

impl Default for BouncerConfig {
    fn default() -> Self {
        Self {
            delivery_buffer: 128,
            max_line_length: 400,
            quit_message: "ircbnc".to_string(),
            data_dir: PathBuf::from("data"),
            autosave: true,
            ident: IdentConfig::default(),
            preview: PreviewConfig::default(),
        }
    }
}

impl Default for IdentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "0.0.0.0".to_string(),
            port: 113,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_seconds: 5,
            max_bytes: 256 * 1024,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bouncer: BouncerConfig::default(),
            users: vec![UserConfig {
                name: "admin".to_string(),
                email: "admin@localhost".to_string(),
                scripts: Vec::new(),
                networks: vec![NetworkConfig {
                    name: "libera".to_string(),
                    nick: "ircbnc".to_string(),
                    user: "ircbnc".to_string(),
                    realname: "ircbnc user".to_string(),
                    password: None,
                    address: "irc.libera.chat".to_string(),
                    port: 6697,
                    tls: true,
                    autoconnect: false,
                    channels: vec!["#ircbnc".to_string()],
                    scripts: Vec::new(),
                }],
            }],
        }
    }
}

impl NetworkConfig {
    /// Connection parameters for this network
    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            address: self.address.clone(),
            port: self.port,
            tls: self.tls,
            nick: self.nick.clone(),
            user: self.user.clone(),
            realname: self.realname.clone(),
            password: self.password.clone(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bouncer.delivery_buffer == 0 {
            return Err(Error::Config("Delivery buffer must be greater than 0".to_string()));
        }

        if self.bouncer.max_line_length < 64 {
            return Err(Error::Config("Max line length must be at least 64 bytes".to_string()));
        }

        if self.bouncer.ident.enabled && self.bouncer.ident.port == 0 {
            return Err(Error::Config("Ident port cannot be 0".to_string()));
        }

        let mut seen_users = HashSet::new();
        for user in &self.users {
            if user.name.is_empty() {
                return Err(Error::Config("User name cannot be empty".to_string()));
            }
            if !seen_users.insert(user.name.as_str()) {
                return Err(Error::Config(format!("Duplicate user {} in configuration", user.name)));
            }
            Self::validate_scripts(&user.name, &user.scripts)?;
            Self::validate_networks(user)?;
        }

        Ok(())
    }

    fn validate_networks(user: &UserConfig) -> Result<()> {
        let mut seen = HashSet::new();
        for network in &user.networks {
            let context = format!("{}/{}", user.name, network.name);
            if network.name.is_empty() {
                return Err(Error::Config(format!("User {} has a network without a name", user.name)));
            }
            if !seen.insert(network.name.to_lowercase()) {
                return Err(Error::Config(format!("Duplicate network {}", context)));
            }
            if network.address.is_empty() {
                return Err(Error::Config(format!("Network {} has no address", context)));
            }
            if network.port == 0 {
                return Err(Error::Config(format!("Network {} port cannot be 0", context)));
            }
            if network.nick.is_empty() || network.user.is_empty() {
                return Err(Error::Config(format!("Network {} needs a nick and a user name", context)));
            }
            Self::validate_scripts(&context, &network.scripts)?;
        }
        Ok(())
    }

    fn validate_scripts(context: &str, scripts: &[ScriptConfig]) -> Result<()> {
        let mut seen = HashSet::new();
        for script in scripts {
            if script.name.is_empty() || script.kind.is_empty() {
                return Err(Error::Config(format!("Script in {} needs a name and a type", context)));
            }
            if !seen.insert(script.name.as_str()) {
                return Err(Error::Config(format!("Duplicate script {} in {}", script.name, context)));
            }
        }
        Ok(())
    }

    /// Find a user by name
    pub fn user(&self, name: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
[bouncer]
max_line_length = 300
data_dir = "/var/lib/ircbnc"

[bouncer.ident]
enabled = true

[[users]]
name = "alice"

[[users.scripts]]
name = "quiet"
type = "ignore"
settings = { masks = ["spam*"] }

[[users.networks]]
name = "libera"
nick = "alice"
user = "alice"
realname = "Alice"
address = "irc.libera.chat"
port = 6697
tls = true
channels = ["#rust", "#ircbnc"]
"##;

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.bouncer.max_line_length, 300);
        assert_eq!(config.bouncer.delivery_buffer, 128);
        assert_eq!(config.bouncer.ident.port, 113);
        assert!(config.bouncer.ident.enabled);

        let alice = config.user("alice").unwrap();
        assert_eq!(alice.scripts[0].kind, "ignore");
        let libera = &alice.networks[0];
        assert!(libera.autoconnect);
        assert_eq!(libera.channels, vec!["#rust", "#ircbnc"]);
        assert_eq!(libera.connect_params().port, 6697);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ircbnc.toml");
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.to_file(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.bouncer.max_line_length = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        let user = config.users[0].clone();
        config.users.push(user);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        let network = config.users[0].networks[0].clone();
        let mut dup = network.clone();
        dup.name = "LIBERA".to_string();
        config.users[0].networks.push(dup);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.users[0].networks[0].port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.users[0].scripts.push(ScriptConfig::new("a", "ignore"));
        config.users[0].scripts.push(ScriptConfig::new("a", "rules"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(Config::from_file("/nonexistent/ircbnc.toml"), Err(Error::Config(_))));
    }
}
