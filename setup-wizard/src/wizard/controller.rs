// Wizard controller: current step, per-step drafts, gates and the one-shot
// installation start.

use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

use crate::database::connection::{ConnectionProbe, ProbeOutcome};
use crate::database::descriptor::ConnectionDescriptor;
use crate::database::dialect::DbDialect;
use crate::database::properties::PropertiesStore;
use crate::install::runner::{InstallationRun, InstallationRunner, ProgressPoller, DEFAULT_POLL_INTERVAL};
use crate::models::config::{AdminAccount, ConfigModel, NotificationSettings, TelephonySettings, ToolSettings};
use crate::models::messages::{has_errors, StepMessage};
use crate::security::crypto::fingerprint;
use crate::tools::probe::{ToolCheck, ToolCheckReport, ToolKind, ToolPathProbe};
use crate::wizard::forms::{
    validate_account, validate_database, validate_notification, validate_telephony,
    validate_tool_fields, AccountPolicy,
};
use crate::wizard::steps::{LastAvailability, StepId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WizardError {
    #[error("jumping to the last step is not available on step '{0}'")]
    LastUnavailable(StepId),
    #[error("step '{0}' has no next step")]
    NoNextStep(StepId),
    #[error("step '{0}' has no previous step")]
    NoPreviousStep(StepId),
    #[error("the {requested} form can only be edited while that step is active (active: {active})")]
    StepNotActive { requested: StepId, active: StepId },
    #[error("installation has started; navigation is locked")]
    NavigationLocked,
    #[error("installation can only be started from the install step (current: {0})")]
    NotOnInstallStep(StepId),
    #[error("installation could not be started: {0}")]
    StartFailed(String),
}

/// Result of a forward move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved(StepId),
    /// The gate failed; see the step's messages.
    Blocked(StepId),
}

impl Transition {
    pub fn step(&self) -> StepId {
        match self {
            Transition::Moved(s) | Transition::Blocked(s) => *s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    Started,
    AlreadyStarted,
}

/// Collaborators the controller drives.
pub struct WizardDeps {
    pub connection_probe: ConnectionProbe,
    pub tool_probe: ToolPathProbe,
    pub properties: Arc<dyn PropertiesStore>,
    pub runner: InstallationRunner,
}

#[derive(Clone)]
pub struct WizardOptions {
    /// Tools whose failed check is only a warning.
    pub optional_tools: Vec<ToolKind>,
    pub poll_interval: Duration,
    pub account_policy: AccountPolicy,
}

impl Default for WizardOptions {
    fn default() -> Self {
        Self {
            optional_tools: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            account_policy: AccountPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct ToolsCache {
    fingerprint: String,
    passed: bool,
    report: ToolCheckReport,
}

fn tools_fingerprint(tools: &ToolSettings) -> String {
    fingerprint(&tools.paths())
}

pub struct WizardController {
    deps: WizardDeps,
    options: WizardOptions,
    current: StepId,
    committed: ConfigModel,
    draft: ConfigModel,
    messages: HashMap<StepId, Vec<StepMessage>>,
    tools_cache: Option<ToolsCache>,
    initial_dialect: DbDialect,
    submitted_dialect: Option<DbDialect>,
    finished: AtomicBool,
    run: OnceLock<InstallationRun>,
}

impl WizardController {
    /// Start on the welcome step. The database section is seeded from the
    /// stored connection properties.
    pub fn new(deps: WizardDeps, options: WizardOptions, base: ConfigModel) -> Self {
        let mut messages: HashMap<StepId, Vec<StepMessage>> = HashMap::new();
        let database = match deps.properties.load(None) {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    "[PHASE: wizard] [STEP: database] Stored connection properties unreadable: {:#}",
                    e
                );
                messages.entry(StepId::Database).or_default().push(StepMessage::warning(
                    None,
                    "Stored connection properties could not be read; defaults are shown",
                ));
                ConnectionDescriptor::default()
            }
        };
        let initial_dialect = database.dialect;

        let mut committed = base;
        committed.database = prepare_for_form(database);
        let draft = committed.clone();

        info!(
            "[PHASE: wizard] [STEP: welcome] Wizard started for '{}' (stored dialect: {})",
            committed.app_name, initial_dialect
        );

        Self {
            deps,
            options,
            current: StepId::Welcome,
            committed,
            draft,
            messages,
            tools_cache: None,
            initial_dialect,
            submitted_dialect: None,
            finished: AtomicBool::new(false),
            run: OnceLock::new(),
        }
    }

    pub fn current(&self) -> StepId {
        self.current
    }

    pub fn is_last_step(&self) -> bool {
        self.current.is_last_step()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Values accepted by completed steps.
    pub fn committed(&self) -> &ConfigModel {
        &self.committed
    }

    /// Committed values plus the active step's pending edits.
    pub fn draft(&self) -> &ConfigModel {
        &self.draft
    }

    pub fn messages(&self, step: StepId) -> &[StepMessage] {
        self.messages.get(&step).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn initial_dialect(&self) -> DbDialect {
        self.initial_dialect
    }

    pub fn is_last_available(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        match self.current.last_availability() {
            LastAvailability::Never => false,
            LastAvailability::Always => true,
            LastAvailability::WhenGatePassed => self.tools_gate_cached(),
        }
    }

    fn tools_gate_cached(&self) -> bool {
        let fp = tools_fingerprint(&self.draft.tools);
        self.tools_cache
            .as_ref()
            .is_some_and(|c| c.passed && c.fingerprint == fp)
    }

    /// Last full tool check, if it still matches the current paths.
    pub fn tool_report(&self) -> Option<&ToolCheckReport> {
        let fp = tools_fingerprint(&self.draft.tools);
        self.tools_cache
            .as_ref()
            .filter(|c| c.fingerprint == fp)
            .map(|c| &c.report)
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    fn ensure_unlocked(&self) -> Result<(), WizardError> {
        if self.is_finished() {
            return Err(WizardError::NavigationLocked);
        }
        Ok(())
    }

    /// Run the current step's gate and move forward if it passes.
    pub fn advance(&mut self) -> Result<Transition, WizardError> {
        self.ensure_unlocked()?;
        let step = self.current;
        let next = step.next().ok_or(WizardError::NoNextStep(step))?;

        let msgs = self.run_gate(step);
        let blocked = has_errors(&msgs);
        self.messages.insert(step, msgs);
        if blocked {
            info!("[PHASE: wizard] [STEP: {}] Gate failed, staying", step);
            return Ok(Transition::Blocked(step));
        }

        self.commit(step);
        self.current = next;
        info!("[PHASE: wizard] [STEP: {}] Advanced to {}", step, next);
        Ok(Transition::Moved(next))
    }

    /// Step back, discarding the active step's pending edits.
    pub fn retreat(&mut self) -> Result<StepId, WizardError> {
        self.ensure_unlocked()?;
        let step = self.current;
        let prev = step.previous().ok_or(WizardError::NoPreviousStep(step))?;
        self.revert(step);
        self.current = prev;
        info!("[PHASE: wizard] [STEP: {}] Went back to {}", step, prev);
        Ok(prev)
    }

    /// Validate the active step's fields and go straight to the install step.
    pub fn jump_to_last(&mut self) -> Result<Transition, WizardError> {
        self.ensure_unlocked()?;
        let step = self.current;
        if !self.is_last_available() {
            return Err(WizardError::LastUnavailable(step));
        }
        let target = step.last().ok_or(WizardError::LastUnavailable(step))?;

        let mut msgs = self.field_messages(step);
        if step == StepId::Tools {
            if let Some(cache) = &self.tools_cache {
                msgs.extend(self.report_messages(&cache.report));
            }
        }
        let blocked = has_errors(&msgs);
        self.messages.insert(step, msgs);
        if blocked {
            return Ok(Transition::Blocked(step));
        }

        self.commit(step);
        self.current = target;
        info!("[PHASE: wizard] [STEP: {}] Jumped to {}", step, target);
        Ok(Transition::Moved(target))
    }

    /// Start the installation with the committed configuration. Only the
    /// first call starts anything.
    pub fn finish(&self) -> Result<FinishOutcome, WizardError> {
        if !self.current.is_last_step() {
            return Err(WizardError::NotOnInstallStep(self.current));
        }
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("[PHASE: install] [STEP: start] finish() called again; ignoring");
            return Ok(FinishOutcome::AlreadyStarted);
        }

        match self.deps.runner.start(self.committed.clone()) {
            Ok(run) => {
                // The CAS above guarantees a single writer.
                let _ = self.run.set(run);
                Ok(FinishOutcome::Started)
            }
            Err(e) => {
                self.finished.store(false, Ordering::SeqCst);
                Err(WizardError::StartFailed(format!("{:#}", e)))
            }
        }
    }

    pub fn installation(&self) -> Option<&InstallationRun> {
        self.run.get()
    }

    /// Poller over the started installation.
    pub fn poller(&self) -> Option<ProgressPoller> {
        let run = self.run.get()?;
        Some(ProgressPoller::new(
            run.state(),
            self.options.poll_interval,
            self.dialect_changed(),
        ))
    }

    /// Whether the database type submitted differs from the stored one.
    pub fn dialect_changed(&self) -> bool {
        self.submitted_dialect
            .is_some_and(|d| d != self.initial_dialect)
    }

    // -------------------------------------------------------------------------
    // Form access (active step only)
    // -------------------------------------------------------------------------

    fn ensure_active(&self, step: StepId) -> Result<(), WizardError> {
        self.ensure_unlocked()?;
        if self.current != step {
            return Err(WizardError::StepNotActive {
                requested: step,
                active: self.current,
            });
        }
        Ok(())
    }

    /// Edit the connection fields. Use [`select_dialect`](Self::select_dialect)
    /// to change the dialect.
    pub fn database_mut(&mut self) -> Result<&mut ConnectionDescriptor, WizardError> {
        self.ensure_active(StepId::Database)?;
        Ok(&mut self.draft.database)
    }

    pub fn account_mut(&mut self) -> Result<&mut AdminAccount, WizardError> {
        self.ensure_active(StepId::Account)?;
        Ok(&mut self.draft.account)
    }

    pub fn notification_mut(&mut self) -> Result<&mut NotificationSettings, WizardError> {
        self.ensure_active(StepId::Notification)?;
        Ok(&mut self.draft.notification)
    }

    pub fn tools_mut(&mut self) -> Result<&mut ToolSettings, WizardError> {
        self.ensure_active(StepId::Tools)?;
        Ok(&mut self.draft.tools)
    }

    pub fn telephony_mut(&mut self) -> Result<&mut TelephonySettings, WizardError> {
        self.ensure_active(StepId::Telephony)?;
        Ok(&mut self.draft.telephony)
    }

    /// Switch dialect: reload that dialect's stored template and reset the
    /// fields that do not carry over.
    pub fn select_dialect(&mut self, dialect: DbDialect) -> Result<(), WizardError> {
        self.ensure_active(StepId::Database)?;
        let mut msgs = Vec::new();
        let descriptor = match self.deps.properties.load(Some(dialect)) {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    "[PHASE: wizard] [STEP: database] Template for {} unreadable: {:#}",
                    dialect, e
                );
                msgs.push(StepMessage::warning(
                    None,
                    format!(
                        "Stored connection properties for {} could not be read; defaults are shown",
                        dialect.display_name()
                    ),
                ));
                ConnectionDescriptor::defaults_for(dialect)
            }
        };
        self.draft.database = prepare_for_form(descriptor);
        self.messages.insert(StepId::Database, msgs);
        info!(
            "[PHASE: wizard] [STEP: database] Dialect switched to {}",
            dialect
        );
        Ok(())
    }

    /// Probe the database without leaving the step.
    pub fn check_database(&mut self) -> Result<ProbeOutcome, WizardError> {
        self.ensure_active(StepId::Database)?;
        let mut msgs = validate_database(&self.draft.database);
        let outcome = if has_errors(&msgs) {
            ProbeOutcome {
                ok: false,
                message: "Fix the highlighted fields first".to_string(),
            }
        } else {
            let outcome = self.deps.connection_probe.probe(&self.draft.database);
            msgs.push(probe_message(&outcome));
            outcome
        };
        self.messages.insert(StepId::Database, msgs);
        Ok(outcome)
    }

    /// Check a single tool now. Does not count as a full check.
    pub fn check_tool(&mut self, tool: ToolKind) -> Result<ToolCheck, WizardError> {
        self.ensure_active(StepId::Tools)?;
        let check = self.deps.tool_probe.check_tool(tool, &self.draft.tools);
        let msgs = self.messages.entry(StepId::Tools).or_default();
        msgs.retain(|m| m.field.as_deref() != Some(tool.field()));
        msgs.extend(tool_message(&check, self.options.optional_tools.contains(&tool)));
        Ok(check)
    }

    /// Check all four tools and remember the result for the current paths.
    pub fn check_all_tools(&mut self) -> Result<ToolCheckReport, WizardError> {
        self.ensure_active(StepId::Tools)?;
        let report = self.run_tool_checks();
        let msgs = self.report_messages(&report);
        self.messages.insert(StepId::Tools, msgs);
        Ok(report)
    }

    fn run_tool_checks(&mut self) -> ToolCheckReport {
        let report = self.deps.tool_probe.check_all(&self.draft.tools);
        let passed = report
            .checks
            .iter()
            .all(|c| c.ok || self.options.optional_tools.contains(&c.tool));
        self.tools_cache = Some(ToolsCache {
            fingerprint: tools_fingerprint(&self.draft.tools),
            passed,
            report: report.clone(),
        });
        report
    }

    fn report_messages(&self, report: &ToolCheckReport) -> Vec<StepMessage> {
        report
            .checks
            .iter()
            .flat_map(|c| tool_message(c, self.options.optional_tools.contains(&c.tool)))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Gates
    // -------------------------------------------------------------------------

    fn field_messages(&self, step: StepId) -> Vec<StepMessage> {
        match step {
            StepId::Welcome | StepId::Install => Vec::new(),
            StepId::Database => validate_database(&self.draft.database),
            StepId::Account => validate_account(&self.draft.account, &self.options.account_policy),
            StepId::Notification => validate_notification(&self.draft.notification),
            StepId::Tools => validate_tool_fields(&self.draft.tools),
            StepId::Telephony => validate_telephony(&self.draft.telephony),
        }
    }

    fn run_gate(&mut self, step: StepId) -> Vec<StepMessage> {
        let mut msgs = self.field_messages(step);
        if has_errors(&msgs) {
            return msgs;
        }
        match step {
            StepId::Database => msgs.extend(self.database_gate()),
            StepId::Tools => {
                let report = if self.tools_gate_cached() {
                    self.tools_cache
                        .as_ref()
                        .map(|c| c.report.clone())
                        .unwrap_or_default()
                } else {
                    self.run_tool_checks()
                };
                msgs.extend(self.report_messages(&report));
            }
            _ => {}
        }
        msgs
    }

    fn database_gate(&mut self) -> Vec<StepMessage> {
        let outcome = self.deps.connection_probe.probe(&self.draft.database);
        let mut msgs = vec![probe_message(&outcome)];
        if !outcome.ok {
            return msgs;
        }
        if let Err(e) = self.deps.properties.patch(&self.draft.database) {
            warn!(
                "[PHASE: wizard] [STEP: database] Failed to patch connection properties: {:#}",
                e
            );
            msgs.push(StepMessage::error(
                None,
                format!("Could not save the connection properties: {:#}", e),
            ));
            return msgs;
        }
        self.submitted_dialect = Some(self.draft.database.dialect);
        msgs
    }

    fn commit(&mut self, step: StepId) {
        match step {
            StepId::Welcome | StepId::Install => {}
            StepId::Database => self.committed.database = self.draft.database.clone(),
            StepId::Account => self.committed.account = self.draft.account.clone(),
            StepId::Notification => self.committed.notification = self.draft.notification.clone(),
            StepId::Tools => self.committed.tools = self.draft.tools.clone(),
            StepId::Telephony => self.committed.telephony = self.draft.telephony.clone(),
        }
    }

    fn revert(&mut self, step: StepId) {
        match step {
            StepId::Welcome | StepId::Install => {}
            StepId::Database => self.draft.database = self.committed.database.clone(),
            StepId::Account => self.draft.account = self.committed.account.clone(),
            StepId::Notification => self.draft.notification = self.committed.notification.clone(),
            StepId::Tools => self.draft.tools = self.committed.tools.clone(),
            StepId::Telephony => self.draft.telephony = self.committed.telephony.clone(),
        }
    }
}

/// Credentials are never pre-filled for server dialects; the embedded
/// dialect has no network endpoint.
fn prepare_for_form(mut d: ConnectionDescriptor) -> ConnectionDescriptor {
    if d.dialect.is_embedded() {
        d.host.clear();
        d.port = 0;
    } else {
        d.login.clear();
        d.password.clear();
    }
    d
}

fn probe_message(outcome: &ProbeOutcome) -> StepMessage {
    if outcome.ok {
        StepMessage::info(None, outcome.message.clone())
    } else {
        StepMessage::error(None, outcome.message.clone())
    }
}

fn tool_message(check: &ToolCheck, optional: bool) -> Option<StepMessage> {
    if check.ok {
        return None;
    }
    let field = Some(check.tool.field());
    Some(if optional {
        StepMessage::warning(field, check.message.clone())
    } else {
        StepMessage::error(field, check.message.clone())
    })
}
