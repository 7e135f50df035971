//! Settings model and loader.
//!
//! The settings file is an `appsettings.json`-shaped document with PascalCase
//! keys. Every key is optional and falls back to its default.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default local-stream endpoint name.
pub const DEFAULT_PIPE_NAME: &str = "FiendFriend_IPC";
/// Default HTTP host.
pub const DEFAULT_WEB_HOST: &str = "localhost";
/// Default HTTP port.
pub const DEFAULT_WEB_PORT: u16 = 8080;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Whole settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AppSettings {
    pub fiend_friend: WidgetSettings,
    pub communication: CommunicationSettings,
}

impl AppSettings {
    /// Load settings from a JSON file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not valid settings JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse settings from JSON text.
    ///
    /// # Errors
    /// Returns error if the text is not valid settings JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Widget settings consumed by the sprite library and rotation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct WidgetSettings {
    pub sprite_path: PathBuf,
    pub image_change_interval_minutes: u64,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            sprite_path: PathBuf::from("sprites"),
            image_change_interval_minutes: 5,
        }
    }
}

impl WidgetSettings {
    /// Rotation interval, `None` when rotation is disabled.
    #[must_use]
    pub const fn rotation_interval(&self) -> Option<Duration> {
        match self.image_change_interval_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(minutes.saturating_mul(60))),
        }
    }
}

/// Which transports to open and where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CommunicationSettings {
    pub named_pipe: NamedPipeSettings,
    pub web_server: WebServerSettings,
}

/// Local-stream transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct NamedPipeSettings {
    pub enabled: bool,
    pub pipe_name: String,
}

impl Default for NamedPipeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct WebServerSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for WebServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: DEFAULT_WEB_HOST.to_string(),
            port: DEFAULT_WEB_PORT,
        }
    }
}

impl WebServerSettings {
    /// Host to bind. `*` and `+` mean every interface.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        match self.host.trim() {
            "*" | "+" => "0.0.0.0",
            "" => DEFAULT_WEB_HOST,
            host => host,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio_test::assert_err;

    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = AppSettings::from_json("{}").unwrap();
        let comm = &settings.communication;

        assert!(comm.named_pipe.enabled);
        assert_eq!(comm.named_pipe.pipe_name, DEFAULT_PIPE_NAME);
        assert!(!comm.web_server.enabled);
        assert_eq!(comm.web_server.host, "localhost");
        assert_eq!(comm.web_server.port, 8080);
        assert_eq!(settings.fiend_friend.image_change_interval_minutes, 5);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let json = r#"{"Communication":{"WebServer":{"Enabled":true,"Port":9000}}}"#;
        let settings = AppSettings::from_json(json).unwrap();
        let web = &settings.communication.web_server;

        assert!(web.enabled);
        assert_eq!(web.port, 9000);
        assert_eq!(web.host, "localhost");
        assert!(settings.communication.named_pipe.enabled);
    }

    #[test]
    fn test_wildcard_host_binds_everywhere() {
        let mut web = WebServerSettings::default();
        assert_eq!(web.bind_host(), "localhost");
        web.host = "*".into();
        assert_eq!(web.bind_host(), "0.0.0.0");
        web.host = "+".into();
        assert_eq!(web.bind_host(), "0.0.0.0");
    }

    #[test]
    fn test_zero_interval_disables_rotation() {
        let mut widget = WidgetSettings::default();
        assert_eq!(widget.rotation_interval(), Some(Duration::from_secs(300)));
        widget.image_change_interval_minutes = 0;
        assert_eq!(widget.rotation_interval(), None);
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"FiendFriend":{{"SpritePath":"/srv/sprites"}},"Communication":{{"NamedPipe":{{"PipeName":"Custom"}}}}}}"#
        )
        .unwrap();

        let settings = AppSettings::load(file.path()).unwrap();
        assert_eq!(settings.fiend_friend.sprite_path, PathBuf::from("/srv/sprites"));
        assert_eq!(settings.communication.named_pipe.pipe_name, "Custom");
    }

    #[test]
    fn test_load_reports_missing_and_malformed_files() {
        let missing = AppSettings::load("/definitely/not/here/appsettings.json");
        assert!(matches!(assert_err!(missing), ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let malformed = AppSettings::load(file.path());
        assert!(matches!(assert_err!(malformed), ConfigError::Parse { .. }));
    }
}
