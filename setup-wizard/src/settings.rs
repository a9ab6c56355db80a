// Runtime settings for the wizard itself (not the server being configured).
//
// Sources, lowest precedence first: built-in defaults, an optional
// `setup-wizard.toml`, then `SETUP_WIZARD_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::tools::probe::ToolKind;

pub const SETTINGS_FILE_NAME: &str = "setup-wizard.toml";
pub const ENV_PREFIX: &str = "SETUP_WIZARD";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load wizard settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("unknown tool '{0}' in optional_tools")]
    UnknownTool(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardSettings {
    /// Directory holding persistence*.toml. Resolved per platform when unset.
    pub properties_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub db_probe_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    pub office_startup_timeout_ms: u64,
    pub office_port: u16,
    /// Tool names (imagemagick, ffmpeg, sox, office) that only warn.
    pub optional_tools: Vec<String>,
    /// Program run by the install step; receives the configuration on stdin.
    pub installer_command: Option<String>,
    pub log_to_stdout: bool,
}

impl Default for WizardSettings {
    fn default() -> Self {
        Self {
            properties_dir: None,
            poll_interval_ms: 1000,
            db_probe_timeout_ms: 3000,
            tool_timeout_ms: 30_000,
            office_startup_timeout_ms: 20_000,
            office_port: 2002,
            optional_tools: Vec::new(),
            installer_command: None,
            log_to_stdout: true,
        }
    }
}

impl WizardSettings {
    /// Load from `dir/setup-wizard.toml` (if present) and the environment.
    pub fn load(dir: &Path) -> Result<Self, SettingsError> {
        Self::load_from(&dir.join(SETTINGS_FILE_NAME))
    }

    pub fn load_from(file: &Path) -> Result<Self, SettingsError> {
        let settings: WizardSettings = config::Config::builder()
            .add_source(config::File::from(file.to_path_buf()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("optional_tools"),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("db_probe_timeout_ms", self.db_probe_timeout_ms),
            ("tool_timeout_ms", self.tool_timeout_ms),
            ("office_startup_timeout_ms", self.office_startup_timeout_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::ZeroDuration(name));
            }
        }
        self.optional_tool_kinds().map(|_| ())
    }

    pub fn optional_tool_kinds(&self) -> Result<Vec<ToolKind>, SettingsError> {
        self.optional_tools
            .iter()
            .map(|name| ToolKind::from_name(name).ok_or_else(|| SettingsError::UnknownTool(name.clone())))
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn db_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.db_probe_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn office_startup_timeout(&self) -> Duration {
        Duration::from_millis(self.office_startup_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let s = WizardSettings::load(dir.path()).unwrap();
        assert_eq!(s.poll_interval(), Duration::from_secs(1));
        assert_eq!(s.db_probe_timeout(), Duration::from_secs(3));
        assert_eq!(s.office_port, 2002);
        assert!(s.installer_command.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            "poll_interval_ms = 250\noptional_tools = [\"sox\", \"office\"]\ninstaller_command = \"/opt/server/install.sh\"\n",
        )
        .unwrap();
        let s = WizardSettings::load(dir.path()).unwrap();
        assert_eq!(s.poll_interval_ms, 250);
        assert_eq!(s.db_probe_timeout_ms, 3000);
        assert_eq!(
            s.optional_tool_kinds().unwrap(),
            vec![ToolKind::Sox, ToolKind::Office]
        );
        assert_eq!(s.installer_command.as_deref(), Some("/opt/server/install.sh"));
    }

    #[test]
    fn unknown_optional_tool_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            "optional_tools = [\"gimp\"]\n",
        )
        .unwrap();
        let err = WizardSettings::load(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::UnknownTool(ref t) if t == "gimp"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE_NAME), "poll_interval_ms = 0\n").unwrap();
        assert!(matches!(
            WizardSettings::load(dir.path()),
            Err(SettingsError::ZeroDuration("poll_interval_ms"))
        ));
    }
}
