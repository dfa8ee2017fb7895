//! REST endpoint configuration.
//!
//! Stored as JSON next to the transfer tunables:
//! - Linux: `$XDG_CONFIG_HOME/commons-client/client.json`, else `~/.config/...`
//! - macOS: `~/.config/commons-client/client.json`
//! - Windows: `%APPDATA%/commons-client/client.json`
//!
//! `COMMONS_BASE_URL`, `COMMONS_FILE_ENDPOINT` and `COMMONS_AUTH_TOKEN`
//! override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://repo-prod.prod.sagebase.org/repo/v1";
const DEFAULT_FILE_ENDPOINT: &str = "https://repo-prod.prod.sagebase.org/file/v1";

/// Where the service lives and how to authenticate against it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub base_url: String,
    /// Root of the file-service endpoints (multipart upload, file handles).
    pub file_endpoint: String,
    /// Bearer token. Anonymous when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            file_endpoint: DEFAULT_FILE_ENDPOINT.into(),
            auth_token: None,
        }
    }
}

// Keeps the token out of logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("file_endpoint", &self.file_endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ClientConfig {
    /// Loads the config file if present, then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes the config to `path`, readable only by the owner on Unix.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "client configuration saved");
        Ok(())
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty("COMMONS_BASE_URL") {
            self.base_url = url;
        }
        if let Some(url) = non_empty("COMMONS_FILE_ENDPOINT") {
            self.file_endpoint = url;
        }
        if let Some(token) = non_empty("COMMONS_AUTH_TOKEN") {
            self.auth_token = Some(token);
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    commons_transfer::config_dir().map(|d| d.join("client.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_fields_take_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"fileEndpoint":"http://localhost:8080/file/v1"}"#).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.file_endpoint, "http://localhost:8080/file/v1");
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("COMMONS_AUTH_TOKEN", "tok"),
            ("COMMONS_BASE_URL", "  "),
        ]
        .into_iter()
        .collect();
        let mut config = ClientConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.auth_token.as_deref(), Some("tok"));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn debug_redacts_token() {
        let config = ClientConfig {
            auth_token: Some("secret".into()),
            ..ClientConfig::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/client.json");
        let config = ClientConfig {
            auth_token: Some("tok".into()),
            ..ClientConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ClientConfig::from_file(&path).unwrap(), config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
