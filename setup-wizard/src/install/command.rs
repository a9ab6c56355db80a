// Installer adapter that delegates to an external command.
//
// The command receives the collected configuration as JSON on stdin and
// reports progress by printing `PROGRESS <n>` lines on stdout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::exec::mask_arg_for_log;
use crate::install::progress::ProgressReporter;
use crate::install::runner::Installer;
use crate::models::config::ConfigModel;

pub const RESET_ON_ERROR_FLAG: &str = "--reset-on-error";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallerPayload<'a> {
    config: &'a ConfigModel,
    properties: BTreeMap<String, String>,
}

/// Extract the percentage from a `PROGRESS <n>` line.
pub fn parse_progress_line(line: &str) -> Option<u8> {
    let re = Regex::new(r"^\s*PROGRESS\s+(\d{1,3})%?\s*$").ok()?;
    let caps = re.captures(line)?;
    let value: u16 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.min(100) as u8)
}

#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
}

impl CommandInstaller {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line into program and args.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("Installer command is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn run(
        &self,
        config: ConfigModel,
        reset_content_on_error: bool,
        progress: ProgressReporter,
    ) -> Result<()> {
        let mut args = self.args.clone();
        if reset_content_on_error {
            args.push(RESET_ON_ERROR_FLAG.to_string());
        }
        info!(
            "[PHASE: install] [STEP: command] Running installer {} [{}]",
            self.program,
            args.iter().map(|a| mask_arg_for_log(a)).collect::<Vec<_>>().join(", ")
        );

        let payload = serde_json::to_vec(&InstallerPayload {
            config: &config,
            properties: config.to_properties(),
        })
        .context("Failed to serialize installer payload")?;

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start installer '{}'", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to open installer stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to capture installer stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to capture installer stderr"))?;

        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await?;
            Ok::<String, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read installer output")?
        {
            match parse_progress_line(&line) {
                Some(p) => {
                    debug!("[PHASE: install] [STEP: command] progress {}", p);
                    progress.report(p);
                }
                None if !line.trim().is_empty() => {
                    info!("[PHASE: install] [STEP: command] {}", line.trim_end())
                }
                None => {}
            }
        }

        let status = child.wait().await.context("Failed to wait for installer")?;
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                "[PHASE: install] [STEP: command] Installer closed stdin early: {}",
                e
            ),
            Err(e) => warn!("[PHASE: install] [STEP: command] stdin writer failed: {}", e),
        }
        let stderr_text = stderr_task
            .await
            .context("stderr join failed")?
            .context("stderr read failed")?;

        if status.success() {
            return Ok(());
        }

        let last_line = stderr_text
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no error output")
            .trim()
            .to_string();
        Err(anyhow::anyhow!(
            "Installer exited with {}: {}",
            status,
            last_line
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::progress::ProgressState;
    use std::sync::Arc;

    #[test]
    fn progress_lines_are_recognised() {
        assert_eq!(parse_progress_line("PROGRESS 40"), Some(40));
        assert_eq!(parse_progress_line("  PROGRESS 75%  "), Some(75));
        assert_eq!(parse_progress_line("PROGRESS 250"), Some(100));
        assert_eq!(parse_progress_line("progress 40"), None);
        assert_eq!(parse_progress_line("Importing PROGRESS 40"), None);
        assert_eq!(parse_progress_line("PROGRESS"), None);
    }

    #[test]
    fn command_line_is_split() {
        let c = CommandInstaller::from_command_line("/opt/server/bin/admin install --quiet").unwrap();
        assert_eq!(c.program, "/opt/server/bin/admin");
        assert_eq!(c.args, vec!["install".to_string(), "--quiet".to_string()]);
        assert!(CommandInstaller::from_command_line("   ").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_progress_and_receives_config() {
        let dir = tempfile::tempdir().unwrap();
        let captured = dir.path().join("payload.json");
        let script = format!(
            "cat > '{}'; echo PROGRESS 30; echo working; echo PROGRESS 60; [ \"$1\" = \"{}\" ]",
            captured.display(),
            RESET_ON_ERROR_FLAG
        );
        let installer = CommandInstaller::new(
            "sh",
            vec!["-c".into(), script, "installer".into()],
        );

        let state = Arc::new(ProgressState::new());
        let mut config = ConfigModel::default();
        config.account.username = "admin".into();

        installer
            .run(config, true, ProgressReporter::new(state.clone()))
            .await
            .unwrap();

        assert_eq!(state.percent(), 60);
        let payload: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&captured).unwrap()).unwrap();
        assert_eq!(payload["config"]["account"]["username"], "admin");
        assert_eq!(payload["properties"]["admin.username"], "admin");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_last_stderr_line() {
        let installer = CommandInstaller::new(
            "sh",
            vec![
                "-c".into(),
                "cat > /dev/null; echo PROGRESS 40; echo 'schema import failed' >&2; exit 4".into(),
            ],
        );
        let state = Arc::new(ProgressState::new());
        let err = installer
            .run(ConfigModel::default(), false, ProgressReporter::new(state.clone()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("schema import failed"), "{}", err);
        assert_eq!(state.percent(), 40);
    }
}
