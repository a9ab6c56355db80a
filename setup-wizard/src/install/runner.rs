// Background installation runner and progress poller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

use crate::install::progress::{ProgressReporter, ProgressSnapshot, ProgressSource, ProgressState};
use crate::models::config::ConfigModel;

/// The routine that actually installs the server.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn run(
        &self,
        config: ConfigModel,
        reset_content_on_error: bool,
        progress: ProgressReporter,
    ) -> Result<()>;
}

pub struct InstallationRunner {
    installer: Arc<dyn Installer>,
}

impl InstallationRunner {
    pub fn new(installer: Arc<dyn Installer>) -> Self {
        Self { installer }
    }

    /// Start the installer on its own thread with its own runtime.
    pub fn start(&self, config: ConfigModel) -> Result<InstallationRun> {
        let state = Arc::new(ProgressState::new());
        let correlation_id = Uuid::new_v4().to_string();

        let installer = Arc::clone(&self.installer);
        let thread_state = Arc::clone(&state);
        let corr = correlation_id.clone();

        info!(
            "[PHASE: install] [STEP: start] Starting installation (correlation_id={})",
            correlation_id
        );

        let handle = std::thread::Builder::new()
            .name("setup-wizard-install".to_string())
            .spawn(move || run_installer(installer, config, thread_state, corr))
            .context("Failed to spawn installation thread")?;

        Ok(InstallationRun {
            state,
            correlation_id,
            handle: Mutex::new(Some(handle)),
        })
    }
}

fn run_installer(
    installer: Arc<dyn Installer>,
    config: ConfigModel,
    state: Arc<ProgressState>,
    correlation_id: String,
) {
    let reporter = ProgressReporter::new(Arc::clone(&state));
    let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create installer runtime")?;
        rt.block_on(installer.run(config, true, reporter))
    }));

    match outcome {
        Ok(Ok(())) => {
            state.report(100);
            info!(
                "[PHASE: install] [STEP: complete] Installation finished (correlation_id={})",
                correlation_id
            );
        }
        Ok(Err(e)) => {
            error!(
                "[PHASE: install] [STEP: error] Installation failed (correlation_id={}): {:?}",
                correlation_id, e
            );
            state.fail(format!("{:#}", e));
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(
                "[PHASE: install] [STEP: error] Installer panicked (correlation_id={}): {}",
                correlation_id, message
            );
            state.fail(format!("Installer crashed: {}", message));
        }
    }
}

/// A started installation.
pub struct InstallationRun {
    state: Arc<ProgressState>,
    correlation_id: String,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl InstallationRun {
    pub fn state(&self) -> Arc<ProgressState> {
        Arc::clone(&self.state)
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Block until the installation thread exits. Later calls return at once.
    pub fn join(&self) {
        let handle = match self.handle.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(h) = handle {
            if h.join().is_err() {
                warn!("[PHASE: install] [STEP: join] Installation thread ended abnormally");
            }
        }
    }
}

/// What one poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Progress(u8),
    Failed(String),
    /// `dialect_changed` is true when the operator picked a different
    /// database type than the one configured at startup.
    Completed { dialect_changed: bool },
    /// The poller already delivered a terminal event.
    Stopped,
}

impl PollEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollEvent::Progress(_))
    }
}

/// Receives what the poller observes.
pub trait ProgressDisplay {
    fn progress(&mut self, percent: u8);
    fn failed(&mut self, message: &str);
    fn completed(&mut self, dialect_changed: bool);
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct ProgressPoller {
    state: Arc<dyn ProgressSource>,
    interval: Duration,
    dialect_changed: bool,
    stopped: AtomicBool,
}

impl ProgressPoller {
    pub fn new(state: Arc<dyn ProgressSource>, interval: Duration, dialect_changed: bool) -> Self {
        Self {
            state,
            interval,
            dialect_changed,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// One poll, for callers that drive their own timer.
    pub fn tick(&self) -> PollEvent {
        if self.is_stopped() {
            return PollEvent::Stopped;
        }
        match self.state.snapshot() {
            ProgressSnapshot::Running(p) => PollEvent::Progress(p),
            ProgressSnapshot::Failed(message) => {
                if self.stopped.swap(true, Ordering::SeqCst) {
                    return PollEvent::Stopped;
                }
                PollEvent::Failed(message)
            }
            ProgressSnapshot::Completed => {
                if self.stopped.swap(true, Ordering::SeqCst) {
                    return PollEvent::Stopped;
                }
                PollEvent::Completed {
                    dialect_changed: self.dialect_changed,
                }
            }
        }
    }

    /// Poll on the configured interval until a terminal event, forwarding
    /// every observation to `display`. Returns the terminal event.
    pub fn watch(&self, display: &mut dyn ProgressDisplay) -> PollEvent {
        loop {
            let event = self.tick();
            match &event {
                PollEvent::Progress(p) => display.progress(*p),
                PollEvent::Failed(message) => display.failed(message),
                PollEvent::Completed { dialect_changed } => display.completed(*dialect_changed),
                PollEvent::Stopped => {}
            }
            if event.is_terminal() {
                return event;
            }
            std::thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;

    /// Reports the given steps, then succeeds or fails.
    pub struct ScriptedInstaller {
        pub steps: Vec<u8>,
        pub fail_with: Option<String>,
        pub calls: AtomicU32,
        pub seen: Mutex<Vec<(ConfigModel, bool)>>,
    }

    impl ScriptedInstaller {
        pub fn succeeding(steps: Vec<u8>) -> Self {
            Self {
                steps,
                fail_with: None,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn failing_after(steps: Vec<u8>, message: &str) -> Self {
            Self {
                fail_with: Some(message.to_string()),
                ..Self::succeeding(steps)
            }
        }
    }

    #[async_trait]
    impl Installer for ScriptedInstaller {
        async fn run(
            &self,
            config: ConfigModel,
            reset_content_on_error: bool,
            progress: ProgressReporter,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((config, reset_content_on_error));
            for p in &self.steps {
                progress.report(*p);
            }
            match &self.fail_with {
                Some(msg) => Err(anyhow::anyhow!("{}", msg)),
                None => Ok(()),
            }
        }
    }

    /// Waits for a release signal before finishing, so tests can poll mid-run.
    struct GatedInstaller {
        release: Mutex<Option<mpsc::Receiver<()>>>,
    }

    #[async_trait]
    impl Installer for GatedInstaller {
        async fn run(&self, _c: ConfigModel, _r: bool, progress: ProgressReporter) -> Result<()> {
            progress.report(40);
            let rx = self.release.lock().unwrap().take();
            if let Some(rx) = rx {
                let _ = rx.recv();
            }
            Err(anyhow::anyhow!("schema import failed"))
        }
    }

    struct PanickingInstaller;

    #[async_trait]
    impl Installer for PanickingInstaller {
        async fn run(&self, _c: ConfigModel, _r: bool, progress: ProgressReporter) -> Result<()> {
            progress.report(10);
            panic!("index out of range");
        }
    }

    #[derive(Default)]
    struct RecordingDisplay {
        progress: Vec<u8>,
        failed: Option<String>,
        completed: Option<bool>,
    }

    impl ProgressDisplay for RecordingDisplay {
        fn progress(&mut self, percent: u8) {
            self.progress.push(percent);
        }
        fn failed(&mut self, message: &str) {
            self.failed = Some(message.to_string());
        }
        fn completed(&mut self, dialect_changed: bool) {
            self.completed = Some(dialect_changed);
        }
    }

    #[test]
    fn successful_run_records_completion() {
        let installer = Arc::new(ScriptedInstaller::succeeding(vec![10, 50, 80]));
        let run = InstallationRunner::new(installer.clone())
            .start(ConfigModel::default())
            .unwrap();
        run.join();

        assert!(run.state().is_complete());
        assert_eq!(installer.calls.load(Ordering::SeqCst), 1);
        let seen = installer.seen.lock().unwrap();
        assert!(seen[0].1, "installer must be asked to reset content on error");
    }

    #[test]
    fn failure_after_forty_percent_stops_poller_without_completion() {
        let (tx, rx) = mpsc::channel();
        let installer = Arc::new(GatedInstaller {
            release: Mutex::new(Some(rx)),
        });
        let run = InstallationRunner::new(installer)
            .start(ConfigModel::default())
            .unwrap();
        let poller = ProgressPoller::new(run.state(), Duration::from_millis(5), false);

        // Wait until the installer has reported 40 but not yet failed.
        let mut mid = poller.tick();
        while mid != PollEvent::Progress(40) {
            std::thread::sleep(Duration::from_millis(2));
            mid = poller.tick();
        }

        tx.send(()).unwrap();
        run.join();

        assert_eq!(
            poller.tick(),
            PollEvent::Failed("schema import failed".to_string())
        );
        assert_eq!(poller.tick(), PollEvent::Stopped);
        assert!(!run.state().is_complete());
        assert_eq!(run.state().percent(), 40);
    }

    #[test]
    fn panic_in_installer_becomes_terminal_error() {
        let run = InstallationRunner::new(Arc::new(PanickingInstaller))
            .start(ConfigModel::default())
            .unwrap();
        run.join();

        let err = run.state().error().map(str::to_string).unwrap();
        assert!(err.contains("index out of range"), "{}", err);
    }

    #[test]
    fn watch_forwards_progress_then_completion() {
        let installer = Arc::new(ScriptedInstaller::succeeding(vec![25, 75]));
        let run = InstallationRunner::new(installer)
            .start(ConfigModel::default())
            .unwrap();
        let poller = ProgressPoller::new(run.state(), Duration::from_millis(5), true);

        let mut display = RecordingDisplay::default();
        let end = poller.watch(&mut display);

        assert_eq!(end, PollEvent::Completed { dialect_changed: true });
        assert_eq!(display.completed, Some(true));
        assert!(display.failed.is_none());
        assert!(display.progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(display.progress.iter().all(|p| *p < 100));
    }

    /// Fixed reading, for polling without a running installation.
    struct StaticSource(u8);

    impl ProgressSource for StaticSource {
        fn progress(&self) -> u8 {
            self.0
        }

        fn failure(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn poller_reads_any_progress_source() {
        let poller = ProgressPoller::new(Arc::new(StaticSource(55)), Duration::from_millis(5), false);
        assert_eq!(poller.tick(), PollEvent::Progress(55));

        let done = ProgressPoller::new(Arc::new(StaticSource(100)), Duration::from_millis(5), true);
        assert_eq!(done.tick(), PollEvent::Completed { dialect_changed: true });
        assert_eq!(done.tick(), PollEvent::Stopped);
    }

    #[test]
    fn watch_reports_failure_and_no_later_progress() {
        let installer = Arc::new(ScriptedInstaller::failing_after(vec![40], "disk full"));
        let run = InstallationRunner::new(installer)
            .start(ConfigModel::default())
            .unwrap();
        run.join();
        let poller = ProgressPoller::new(run.state(), Duration::from_millis(5), false);

        let mut display = RecordingDisplay::default();
        let end = poller.watch(&mut display);

        assert_eq!(end, PollEvent::Failed("disk full".into()));
        assert!(display.progress.is_empty());
        assert!(display.completed.is_none());
    }
}
