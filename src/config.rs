//! Client configuration management.
//!
//! This module handles loading and saving the client configuration, which
//! includes the backend base URL, the static API key, and an optional demo
//! identity override for presentation deployments.
//!
//! Configuration is stored at `~/.config/star-client/config.json`.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "star-client";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Cosmetic identity substituted into loaded sessions on demo deployments.
/// Only display fields are replaced; tokens are never touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoIdentity {
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backend base URL, e.g. `https://project.example.co`
    pub base_url: String,
    /// Static API key sent with every request
    pub anon_key: String,
    /// Last email used to sign in, for prefilling login forms
    pub last_email: Option<String>,
    /// When set, loaded sessions report this identity instead of the real one
    #[serde(default)]
    pub demo_identity: Option<DemoIdentity>,
}

impl Config {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            last_email: None,
            demo_identity: None,
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted session file
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_roundtrip_json() {
        let mut config = Config::new("https://project.example.co", "anon-key");
        config.last_email = Some("carer@example.com".to_string());
        config.demo_identity = Some(DemoIdentity {
            email: "demo@example.com".to_string(),
            display_name: "Jon Doe Star".to_string(),
        });

        let json = serde_json::to_string(&config).expect("serialize config");
        let parsed: Config = serde_json::from_str(&json).expect("parse config");
        assert_eq!(parsed.base_url, "https://project.example.co");
        assert_eq!(parsed.anon_key, "anon-key");
        assert_eq!(parsed.last_email.as_deref(), Some("carer@example.com"));
        assert_eq!(
            parsed.demo_identity.as_ref().map(|d| d.display_name.as_str()),
            Some("Jon Doe Star")
        );
    }

    #[test]
    fn test_config_defaults_tolerate_missing_fields() {
        let parsed: Config =
            serde_json::from_str(r#"{"base_url":"https://x.example","anon_key":"k"}"#)
                .expect("parse minimal config");
        assert!(parsed.last_email.is_none());
        assert!(parsed.demo_identity.is_none());
    }
}
