//! Instance-level configuration (not persisted with federation preferences).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Agent configuration supplied at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Public base address of this instance (e.g. "https://app.example.com").
    /// Also the default relay state.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Assertion Consumer Service path, appended to `base_url`.
    #[serde(default = "default_acs_path")]
    pub acs_path: String,

    /// SP metadata path, appended to `base_url`; doubles as the SP entity ID.
    #[serde(default = "default_metadata_path")]
    pub metadata_path: String,

    /// Whether the deployment is licensed for federated login.
    #[serde(default)]
    pub licensed: bool,

    /// Create local users on first federated login.
    #[serde(default)]
    pub jit_provisioning: bool,

    /// Timeout for fetching IdP metadata by URL.
    #[serde(default = "default_fetch_timeout")]
    pub metadata_fetch_timeout_secs: u64,

    /// Clock skew tolerance in seconds for assertion conditions.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,

    /// Settings database (redb file).
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,

    /// User directory database (redb file).
    #[serde(default = "default_users_path")]
    pub users_path: PathBuf,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_acs_path() -> String {
    "/saml/acs".to_string()
}

fn default_metadata_path() -> String {
    "/saml/metadata".to_string()
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_clock_skew() -> i64 {
    300 // 5 minutes
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("/var/lib/federated-sso/settings.redb")
}

fn default_users_path() -> PathBuf {
    PathBuf::from("/var/lib/federated-sso/users.redb")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            acs_path: default_acs_path(),
            metadata_path: default_metadata_path(),
            licensed: false,
            jit_provisioning: false,
            metadata_fetch_timeout_secs: default_fetch_timeout(),
            clock_skew_secs: default_clock_skew(),
            settings_path: default_settings_path(),
            users_path: default_users_path(),
        }
    }
}

impl AgentConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_url.starts_with("https://") && !self.base_url.starts_with("http://") {
            return Err("base_url must be a valid HTTP(S) URL".to_string());
        }
        if !self.acs_path.starts_with('/') || !self.metadata_path.starts_with('/') {
            return Err("acs_path and metadata_path must start with '/'".to_string());
        }
        if self.metadata_fetch_timeout_secs == 0 {
            return Err("metadata_fetch_timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Full ACS URL.
    pub fn acs_url(&self) -> String {
        format!("{}{}", self.base(), self.acs_path)
    }

    /// SP entity ID (the SP metadata URL).
    pub fn sp_entity_id(&self) -> String {
        format!("{}{}", self.base(), self.metadata_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert!(!config.licensed);
        assert!(!config.jit_provisioning);
        assert_eq!(config.metadata_fetch_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_urls() {
        let config = AgentConfig {
            base_url: "https://app.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.acs_url(), "https://app.example.com/saml/acs");
        assert_eq!(config.sp_entity_id(), "https://app.example.com/saml/metadata");
    }

    #[test]
    fn test_validation() {
        let mut config = AgentConfig::default();
        config.base_url = "app.example.com".to_string();
        assert!(config.validate().is_err());

        config.base_url = "https://app.example.com".to_string();
        config.acs_path = "saml/acs".to_string();
        assert!(config.validate().is_err());

        config.acs_path = "/saml/acs".to_string();
        config.metadata_fetch_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
