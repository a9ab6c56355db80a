// Progress handoff between the installation thread and the poller.
//
// The runner side writes, the poller side only reads. Percent only grows and
// the terminal error is set at most once, so readers never need a lock.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// Read side of an installation's progress, as seen by the poller.
pub trait ProgressSource: Send + Sync {
    fn progress(&self) -> u8;
    fn failure(&self) -> Option<String>;

    /// Failure, then percent, then failure again: a percentage read after a
    /// failure was recorded is never returned.
    fn snapshot(&self) -> ProgressSnapshot {
        if let Some(e) = self.failure() {
            return ProgressSnapshot::Failed(e);
        }
        let p = self.progress();
        if let Some(e) = self.failure() {
            return ProgressSnapshot::Failed(e);
        }
        if p >= 100 {
            ProgressSnapshot::Completed
        } else {
            ProgressSnapshot::Running(p)
        }
    }
}

#[derive(Debug, Default)]
pub struct ProgressState {
    percent: AtomicU8,
    error: OnceLock<String>,
}

/// Consistent view of a [`ProgressSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressSnapshot {
    Running(u8),
    Failed(String),
    Completed,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the percentage. Lower values and writes after a failure are
    /// ignored. Returns the percentage now stored.
    pub fn report(&self, percent: u8) -> u8 {
        if self.error.get().is_some() {
            return self.percent();
        }
        let p = percent.min(100);
        self.percent.fetch_max(p, Ordering::SeqCst).max(p)
    }

    /// Record the terminal error. Only the first call wins; returns whether
    /// this call set it.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.error.set(message.into()).is_ok()
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.get().map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.snapshot(), ProgressSnapshot::Completed)
    }
}

impl ProgressSource for ProgressState {
    fn progress(&self) -> u8 {
        self.percent()
    }

    fn failure(&self) -> Option<String> {
        self.error.get().cloned()
    }
}

/// Handle given to the installer routine.
///
/// Capped at 99: only the runner marks a run complete, after the routine
/// has returned successfully.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    state: Arc<ProgressState>,
}

pub const INSTALLER_MAX_PERCENT: u8 = 99;

impl ProgressReporter {
    pub fn new(state: Arc<ProgressState>) -> Self {
        Self { state }
    }

    pub fn report(&self, percent: u8) {
        self.state.report(percent.min(INSTALLER_MAX_PERCENT));
    }
}
