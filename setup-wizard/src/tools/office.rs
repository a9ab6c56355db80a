// Office backend service management.
//
// The document converter talks to a headless office process over a local
// socket. Probing it means starting that process, waiting for the socket,
// and always shutting it down again.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::utils::os_detection::executable_suffix;

pub trait ServiceManager: Send {
    fn start(&mut self) -> Result<()>;
    /// Must be safe to call when `start` failed or was never called.
    fn stop(&mut self) -> Result<()>;
}

/// Builds a service manager for an office installation. `None` means the
/// system default installation.
pub trait ServiceManagerFactory: Send + Sync {
    fn build(&self, office_home: Option<&Path>) -> Result<Box<dyn ServiceManager>>;
}

/// Scoped service: stopped when dropped, whatever happened in between.
pub struct ManagedService {
    inner: Box<dyn ServiceManager>,
}

impl ManagedService {
    pub fn new(inner: Box<dyn ServiceManager>) -> Self {
        Self { inner }
    }

    pub fn start(&mut self) -> Result<()> {
        self.inner.start()
    }
}

impl Drop for ManagedService {
    fn drop(&mut self) {
        if let Err(e) = self.inner.stop() {
            warn!(
                "[PHASE: wizard] [STEP: tools] Failed to stop office service: {:#}",
                e
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct OfficeManagerFactory {
    pub port: u16,
    pub startup_timeout: Duration,
}

impl ServiceManagerFactory for OfficeManagerFactory {
    fn build(&self, office_home: Option<&Path>) -> Result<Box<dyn ServiceManager>> {
        let executable = match office_home {
            Some(home) => find_office_executable(home).with_context(|| {
                format!("No office installation found in {}", home.display())
            })?,
            None => default_office_executable()
                .context("No office installation found; set the office path")?,
        };
        Ok(Box::new(OfficeProcessManager {
            executable,
            port: self.port,
            startup_timeout: self.startup_timeout,
            child: None,
            profile_dir: None,
        }))
    }
}

fn office_binary_name() -> String {
    format!("soffice{}", executable_suffix())
}

/// Locate `soffice` under an office home directory.
pub fn find_office_executable(home: &Path) -> Result<PathBuf> {
    let name = office_binary_name();
    let candidates = [
        home.join("program").join(&name),
        home.join(&name),
        home.join("Contents").join("MacOS").join(&name),
    ];
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{} not found under {}", name, home.display()))
}

fn default_office_executable() -> Result<PathBuf> {
    for name in ["soffice", "libreoffice"] {
        if let Ok(p) = which::which(format!("{}{}", name, executable_suffix())) {
            return Ok(p);
        }
    }
    let homes = [
        "/usr/lib/libreoffice",
        "/opt/libreoffice",
        "/Applications/LibreOffice.app",
        r"C:\Program Files\LibreOffice",
    ];
    homes
        .iter()
        .find_map(|h| find_office_executable(Path::new(h)).ok())
        .ok_or_else(|| anyhow::anyhow!("soffice is not on PATH"))
}

/// Runs a headless office process listening on a local port.
pub struct OfficeProcessManager {
    executable: PathBuf,
    port: u16,
    startup_timeout: Duration,
    child: Option<Child>,
    profile_dir: Option<PathBuf>,
}

impl OfficeProcessManager {
    /// Another listener on the port would answer for a process that never started.
    fn ensure_port_free(&self) -> Result<()> {
        TcpListener::bind(("127.0.0.1", self.port))
            .map(drop)
            .with_context(|| format!("Office port {} is already in use", self.port))
    }

    fn exited(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Ok(None),
        }
    }

    fn wait_for_port(&mut self) -> Result<()> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let deadline = Instant::now() + self.startup_timeout;
        loop {
            if let Some(status) = self.exited()? {
                return Err(anyhow::anyhow!(
                    "Office process exited during startup ({})",
                    status
                ));
            }
            if TcpStream::connect_timeout(&addr, Duration::from_millis(250)).is_ok() {
                // The listener only counts if our process is still the one running.
                return match self.exited()? {
                    Some(status) => Err(anyhow::anyhow!(
                        "Office process exited during startup ({})",
                        status
                    )),
                    None => Ok(()),
                };
            }
            if Instant::now() >= deadline {
                return Err(anyhow::anyhow!(
                    "Office process did not accept connections on port {} within {}s",
                    self.port,
                    self.startup_timeout.as_secs()
                ));
            }
            std::thread::sleep(Duration::from_millis(250));
        }
    }
}

impl ServiceManager for OfficeProcessManager {
    fn start(&mut self) -> Result<()> {
        self.ensure_port_free()?;

        let profile = std::env::temp_dir().join(format!(
            "setup-wizard-office-{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&profile)
            .with_context(|| format!("Failed to create {}", profile.display()))?;
        self.profile_dir = Some(profile.clone());

        let profile_url = url::Url::from_directory_path(&profile)
            .map_err(|_| anyhow::anyhow!("Invalid profile path {}", profile.display()))?;

        info!(
            "[PHASE: wizard] [STEP: tools] Starting office service {} on port {}",
            self.executable.display(),
            self.port
        );
        let child = Command::new(&self.executable)
            .arg("--headless")
            .arg("--invisible")
            .arg("--nologo")
            .arg("--norestore")
            .arg("--nodefault")
            .arg(format!(
                "--accept=socket,host=127.0.0.1,port={};urp;",
                self.port
            ))
            .arg(format!("-env:UserInstallation={}", profile_url))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start {}", self.executable.display()))?;
        self.child = Some(child);

        self.wait_for_port()
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            debug!("[PHASE: wizard] [STEP: tools] Stopping office service");
            if child.try_wait()?.is_none() {
                child.kill().context("Failed to kill office process")?;
            }
            child.wait().context("Failed to reap office process")?;
        }
        if let Some(dir) = self.profile_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                debug!(
                    "[PHASE: wizard] [STEP: tools] Could not remove {}: {}",
                    dir.display(),
                    e
                );
            }
        }
        Ok(())
    }
}
