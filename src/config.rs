//! Channel configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::codec::MAX_LABEL_LEN;
use crate::session::{MAX_LOCAL_ID, MIN_LOCAL_ID};

/// Main channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Recursive resolver queries are dispatched to
    pub resolver: SocketAddr,

    /// Address the capture source binds on
    #[serde(default = "default_capture_bind")]
    pub capture_bind: SocketAddr,

    /// Numeric participant id (1-99); random when omitted
    #[serde(default)]
    pub local_id: Option<u32>,

    /// Domain suffix appended to every query name
    pub domain_suffix: String,

    /// Maximum characters per chunk label
    #[serde(default = "default_char_limit")]
    pub char_limit: usize,

    /// Path to the base64 key material blob
    pub key_file: PathBuf,

    /// Session passphrase
    #[serde(default)]
    pub passphrase: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            resolver: "8.8.8.8:53".parse().unwrap(),
            capture_bind: default_capture_bind(),
            local_id: None,
            domain_suffix: String::new(),
            char_limit: default_char_limit(),
            key_file: PathBuf::from("channel.key"),
            passphrase: String::new(),
        }
    }
}

fn default_capture_bind() -> SocketAddr {
    "0.0.0.0:53".parse().unwrap()
}

fn default_char_limit() -> usize {
    MAX_LABEL_LEN
}

impl ChannelConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.domain_suffix.is_empty() {
            return Err("Domain suffix must be set".to_string());
        }

        if self.domain_suffix.len() > 200 {
            return Err("Domain suffix leaves no room for payload labels".to_string());
        }

        if self
            .domain_suffix
            .split('.')
            .any(|label| label.is_empty() || label.len() > MAX_LABEL_LEN)
        {
            return Err("Domain suffix has an empty or oversize label".to_string());
        }

        if let Some(id) = self.local_id {
            if !(MIN_LOCAL_ID..=MAX_LOCAL_ID).contains(&id) {
                return Err("Participant id must be between 1 and 99".to_string());
            }
        }

        if self.char_limit == 0 || self.char_limit > MAX_LABEL_LEN {
            return Err("Char limit must be between 1 and 63".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ChannelConfig {
        ChannelConfig {
            domain_suffix: "chat.example.com".to_string(),
            ..ChannelConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.char_limit, MAX_LABEL_LEN);
        assert_eq!(config.capture_bind.port(), 53);
        assert!(config.local_id.is_none());
    }

    #[test]
    fn test_config_validation() {
        // should fail without a domain suffix
        assert!(ChannelConfig::default().validate().is_err());

        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_id_range_validation() {
        let mut config = valid_config();

        config.local_id = Some(0);
        assert!(config.validate().is_err());

        config.local_id = Some(100);
        assert!(config.validate().is_err());

        config.local_id = Some(42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_char_limit_validation() {
        let mut config = valid_config();

        config.char_limit = 0;
        assert!(config.validate().is_err());

        config.char_limit = 64;
        assert!(config.validate().is_err());

        config.char_limit = 40;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_suffix_label_validation() {
        let mut config = valid_config();

        config.domain_suffix = format!("{}.com", "a".repeat(64));
        assert!(config.validate().is_err());

        config.domain_suffix = "double..dot.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = valid_config();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: ChannelConfig = toml::from_str(&text).unwrap();

        assert_eq!(parsed.domain_suffix, config.domain_suffix);
        assert_eq!(parsed.resolver, config.resolver);
        assert_eq!(parsed.char_limit, config.char_limit);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let parsed: ChannelConfig = toml::from_str(
            r#"
resolver = "1.1.1.1:53"
domain_suffix = "chat.example.com"
key_file = "channel.key"
"#,
        )
        .unwrap();

        assert_eq!(parsed.char_limit, MAX_LABEL_LEN);
        assert_eq!(parsed.capture_bind.port(), 53);
        assert!(parsed.passphrase.is_empty());
    }
}
