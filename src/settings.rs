use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::identity::IdentityPolicy;
use crate::state_machine::SessionPolicy;
use crate::upload::UploadConfig;

const APP_DIR_NAME: &str = "interview-session";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("Failed to create config directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Write temp settings {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Rename temp settings to {path:?}: {source}")]
    Rename {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Start every session with the year-of-birth check.
    pub requires_identity_gate: bool,

    /// Ask for a PDF CV after the identity check.
    pub requires_cv_upload: bool,

    /// Leave the question intro as soon as the prompt video ends, without
    /// waiting for the candidate to confirm.
    pub auto_advance_on_video_end: bool,

    pub identity: IdentityPolicy,

    /// Length of one countdown second in milliseconds. Only shortened for demos.
    pub tick_ms: u64,

    pub upload: UploadConfig,

    /// Flow to run when none is given on the command line.
    pub flow_path: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            requires_identity_gate: true,
            requires_cv_upload: false,
            auto_advance_on_video_end: false,
            identity: IdentityPolicy::default(),
            tick_ms: 1000,
            upload: UploadConfig::default(),
            flow_path: None,
        }
    }
}

impl SessionSettings {
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            requires_identity_gate: self.requires_identity_gate,
            requires_cv_upload: self.requires_cv_upload,
            auto_advance_on_video_end: self.auto_advance_on_video_end,
            identity: self.identity.clone(),
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

pub fn settings_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Load settings from the user config directory, falling back to defaults.
pub fn load_settings() -> SessionSettings {
    match settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            log::warn!("Settings: {}", e);
            SessionSettings::default()
        }
    }
}

pub fn load_settings_from(path: &Path) -> SessionSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<SessionSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                SessionSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            SessionSettings::default()
        }
    }
}

pub fn save_settings(settings: &SessionSettings) -> Result<(), SettingsError> {
    save_settings_to(&settings_path()?, settings)
}

pub fn save_settings_to(path: &Path, settings: &SessionSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SettingsError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let contents = serde_json::to_string_pretty(settings)?;

    // Write to a sibling temp file, then rename over the destination.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents).map_err(|source| SettingsError::Write {
        path: tmp_path.clone(),
        source,
    })?;

    // rename does not replace an existing file on Windows
    if cfg!(windows) && path.exists() {
        if let Err(source) = std::fs::remove_file(path) {
            if source.kind() != std::io::ErrorKind::NotFound {
                return Err(SettingsError::Rename {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(|source| SettingsError::Rename {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("Settings saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(&dir.path().join("settings.json"));
        assert_eq!(settings, SessionSettings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"auto_advance_on_video_end": true, "upload": {"tick_ms": 50}}"#)
            .unwrap();

        let settings = load_settings_from(&path);
        assert!(settings.auto_advance_on_video_end);
        assert!(settings.requires_identity_gate);
        assert_eq!(settings.upload.tick_ms, 50);
        assert_eq!(settings.upload.min_increment, 2.0);
        assert_eq!(settings.identity, IdentityPolicy::default());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_settings_from(&path), SessionSettings::default());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = SessionSettings {
            requires_identity_gate: false,
            requires_cv_upload: true,
            tick_ms: 100,
            flow_path: Some(PathBuf::from("/tmp/flow.json")),
            ..SessionSettings::default()
        };

        save_settings_to(&path, &settings).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load_settings_from(&path), settings);
    }

    #[test]
    fn policy_mirrors_flags() {
        let settings = SessionSettings {
            requires_identity_gate: false,
            auto_advance_on_video_end: true,
            ..SessionSettings::default()
        };
        let policy = settings.policy();
        assert!(!policy.requires_identity_gate);
        assert!(policy.auto_advance_on_video_end);
        assert_eq!(settings.tick_period(), Duration::from_millis(1000));
    }
}
