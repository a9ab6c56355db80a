// Unattended mode: feed an answers file through the wizard controller and
// follow the installation on the terminal.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::database::connection::ConnectionProbe;
use crate::database::properties::TomlPropertiesStore;
use crate::exec::SystemCommandRunner;
use crate::install::command::CommandInstaller;
use crate::install::runner::{InstallationRunner, PollEvent, ProgressDisplay};
use crate::models::config::ConfigModel;
use crate::models::messages::StepMessage;
use crate::settings::WizardSettings;
use crate::tools::office::OfficeManagerFactory;
use crate::tools::probe::ToolPathProbe;
use crate::utils::path_resolver::resolve_properties_dir;
use crate::wizard::controller::{
    FinishOutcome, Transition, WizardController, WizardDeps, WizardError, WizardOptions,
};
use crate::wizard::steps::StepId;

#[derive(Debug, Error)]
pub enum UnattendedError {
    #[error("step '{step}' rejected the answers:\n{}", format_messages(.messages))]
    Blocked {
        step: StepId,
        messages: Vec<StepMessage>,
    },
    #[error(transparent)]
    Wizard(#[from] WizardError),
    #[error("installation failed: {0}")]
    InstallFailed(String),
    #[error("installation was not started")]
    NotStarted,
}

fn format_messages(messages: &[StepMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("  {}", m))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read a TOML answers file. Missing sections take their defaults.
pub fn load_answers(path: &Path) -> Result<ConfigModel> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read answers file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse answers file {}", path.display()))
}

pub fn properties_store(settings: &WizardSettings) -> Result<TomlPropertiesStore> {
    let dir = match &settings.properties_dir {
        Some(dir) => dir.clone(),
        None => resolve_properties_dir()?,
    };
    Ok(TomlPropertiesStore::new(dir))
}

pub fn tool_probe(settings: &WizardSettings) -> ToolPathProbe {
    ToolPathProbe::new(
        Arc::new(SystemCommandRunner::new(settings.tool_timeout())),
        Arc::new(OfficeManagerFactory {
            port: settings.office_port,
            startup_timeout: settings.office_startup_timeout(),
        }),
    )
}

/// Real collaborators wired from settings.
pub fn build_deps(settings: &WizardSettings) -> Result<WizardDeps> {
    let command = settings
        .installer_command
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .context(
            "No installer command configured; set installer_command in setup-wizard.toml \
             or SETUP_WIZARD_INSTALLER_COMMAND",
        )?;
    Ok(WizardDeps {
        connection_probe: ConnectionProbe::real(settings.db_probe_timeout()),
        tool_probe: tool_probe(settings),
        properties: Arc::new(properties_store(settings)?),
        runner: InstallationRunner::new(Arc::new(CommandInstaller::from_command_line(command)?)),
    })
}

pub fn build_options(settings: &WizardSettings) -> Result<WizardOptions> {
    Ok(WizardOptions {
        optional_tools: settings.optional_tool_kinds()?,
        poll_interval: settings.poll_interval(),
        ..WizardOptions::default()
    })
}

fn apply_answers(wizard: &mut WizardController, answers: &ConfigModel) -> Result<(), WizardError> {
    match wizard.current() {
        StepId::Database => {
            wizard.select_dialect(answers.database.dialect)?;
            *wizard.database_mut()? = answers.database.clone();
        }
        StepId::Account => *wizard.account_mut()? = answers.account.clone(),
        StepId::Notification => *wizard.notification_mut()? = answers.notification.clone(),
        StepId::Tools => *wizard.tools_mut()? = answers.tools.clone(),
        StepId::Telephony => *wizard.telephony_mut()? = answers.telephony.clone(),
        StepId::Welcome | StepId::Install => {}
    }
    Ok(())
}

/// Walk every step with the answers and start the installation.
pub fn drive(wizard: &mut WizardController, answers: &ConfigModel) -> Result<(), UnattendedError> {
    while !wizard.is_last_step() {
        apply_answers(wizard, answers)?;
        let step = wizard.current();
        match wizard.advance()? {
            Transition::Moved(next) => {
                for m in wizard.messages(step) {
                    warn!("[PHASE: unattended] [STEP: {}] {}", step, m);
                }
                info!("[PHASE: unattended] [STEP: {}] Accepted, now on {}", step, next);
            }
            Transition::Blocked(step) => {
                return Err(UnattendedError::Blocked {
                    step,
                    messages: wizard.messages(step).to_vec(),
                });
            }
        }
    }

    match wizard.finish()? {
        FinishOutcome::Started => Ok(()),
        FinishOutcome::AlreadyStarted => Ok(()),
    }
}

/// Block until the started installation ends. Returns whether the database
/// type changed.
pub fn follow(
    wizard: &WizardController,
    display: &mut dyn ProgressDisplay,
) -> Result<bool, UnattendedError> {
    let poller = wizard.poller().ok_or(UnattendedError::NotStarted)?;
    match poller.watch(display) {
        PollEvent::Completed { dialect_changed } => Ok(dialect_changed),
        PollEvent::Failed(message) => Err(UnattendedError::InstallFailed(message)),
        PollEvent::Progress(_) | PollEvent::Stopped => Err(UnattendedError::NotStarted),
    }
}

/// Terminal progress bar.
pub struct BarDisplay {
    bar: ProgressBar,
}

impl BarDisplay {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.set_message("Installing");
        Self { bar }
    }
}

impl Default for BarDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressDisplay for BarDisplay {
    fn progress(&mut self, percent: u8) {
        self.bar.set_position(u64::from(percent));
    }

    fn failed(&mut self, message: &str) {
        self.bar.abandon_with_message(format!("Failed: {}", message));
    }

    fn completed(&mut self, dialect_changed: bool) {
        self.bar.set_position(100);
        let msg = if dialect_changed {
            "Installed. The database type changed; restart the server to apply it."
        } else {
            "Installed."
        };
        self.bar.finish_with_message(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connection::tests::FixedStub;
    use crate::database::dialect::DbDialect;
    use crate::database::properties::MemoryPropertiesStore;
    use crate::install::runner::tests::ScriptedInstaller;
    use crate::tools::office::tests::StubServices;
    use crate::tools::probe::tests::ScriptedRunner;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded {
        percents: Vec<u8>,
        failed: Option<String>,
        completed: Option<bool>,
    }

    impl ProgressDisplay for Recorded {
        fn progress(&mut self, percent: u8) {
            self.percents.push(percent);
        }
        fn failed(&mut self, message: &str) {
            self.failed = Some(message.to_string());
        }
        fn completed(&mut self, dialect_changed: bool) {
            self.completed = Some(dialect_changed);
        }
    }

    const ANSWERS: &str = r#"
appName = "Team Rooms"

[database]
dialect = "postgresql"
host = "localhost"
port = 5432
database = "om"
login = "om"
password = "om"

[account]
username = "admin"
password = "Str0ng!Pass"
email = "a@b.com"
group = "default"
"#;

    fn wizard(installer: Arc<ScriptedInstaller>, tools: ScriptedRunner, base: ConfigModel) -> WizardController {
        let deps = WizardDeps {
            connection_probe: ConnectionProbe::new(Arc::new(FixedStub::ok())),
            tool_probe: ToolPathProbe::new(Arc::new(tools), Arc::new(StubServices::default())),
            properties: Arc::new(MemoryPropertiesStore::new()),
            runner: InstallationRunner::new(installer),
        };
        let options = WizardOptions {
            poll_interval: Duration::from_millis(5),
            ..WizardOptions::default()
        };
        WizardController::new(deps, options, base)
    }

    #[test]
    fn answers_file_parses_with_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("answers.toml");
        std::fs::write(&path, ANSWERS).unwrap();
        let answers = load_answers(&path).unwrap();
        assert_eq!(answers.app_name, "Team Rooms");
        assert_eq!(answers.database.dialect, DbDialect::Postgresql);
        assert_eq!(answers.notification.smtp_port, 25);
        assert_eq!(answers.account.time_zone, "UTC");
    }

    #[test]
    fn unattended_run_installs_answers() {
        let answers: ConfigModel = toml::from_str(ANSWERS).unwrap();
        let installer = Arc::new(ScriptedInstaller::succeeding(vec![10, 50, 90]));
        let mut w = wizard(installer.clone(), ScriptedRunner::default(), answers.clone());

        drive(&mut w, &answers).unwrap();
        let mut display = Recorded::default();
        let changed = follow(&w, &mut display).unwrap();

        assert!(changed);
        assert_eq!(display.completed, Some(true));
        assert!(display.percents.windows(2).all(|p| p[0] <= p[1]));
        assert_eq!(installer.calls.load(Ordering::SeqCst), 1);
        let seen = installer.seen.lock().unwrap();
        assert_eq!(seen[0].0.app_name, "Team Rooms");
        assert_eq!(seen[0].0.database, answers.database);
    }

    #[test]
    fn blocked_step_reports_messages() {
        let answers: ConfigModel = toml::from_str(ANSWERS).unwrap();
        let installer = Arc::new(ScriptedInstaller::succeeding(vec![]));
        let mut w = wizard(
            installer.clone(),
            ScriptedRunner::failing("ffmpeg", "ffmpeg: not found"),
            answers.clone(),
        );

        let err = drive(&mut w, &answers).unwrap_err();
        match err {
            UnattendedError::Blocked { step, messages } => {
                assert_eq!(step, StepId::Tools);
                assert_eq!(messages[0].field.as_deref(), Some("ffmpegPath"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(installer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn installer_failure_surfaces_message() {
        let answers: ConfigModel = toml::from_str(ANSWERS).unwrap();
        let installer = Arc::new(ScriptedInstaller::failing_after(vec![40], "schema import failed"));
        let mut w = wizard(installer, ScriptedRunner::default(), answers.clone());

        drive(&mut w, &answers).unwrap();
        let mut display = Recorded::default();
        let err = follow(&w, &mut display).unwrap_err();
        assert!(matches!(err, UnattendedError::InstallFailed(ref m) if m.contains("schema import failed")));
        assert!(display.failed.is_some());
        assert!(display.completed.is_none());
    }

    #[test]
    fn missing_installer_command_is_reported() {
        let settings = WizardSettings::default();
        let err = build_deps(&settings).err().unwrap();
        assert!(format!("{:#}", err).contains("installer_command"));
    }
}
