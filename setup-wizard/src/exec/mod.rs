// External command execution
//
// Shared helpers for running probe commands with a timeout and a short retry
// on transient spawn failures.
//
// Never log secrets: arguments are masked before they reach the log.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::utils::logging::{mask_connection_string, mask_sensitive};
use crate::utils::runtime::run_blocking;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u128,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, as one string.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

pub(crate) fn mask_arg_for_log(arg: &str) -> String {
    let lower = arg.to_ascii_lowercase();
    if lower.contains("password=")
        || lower.contains("pwd=")
        || lower.contains("secret")
        || lower.contains("token")
    {
        return "***".to_string();
    }

    if arg.contains(';') && lower.contains('=') {
        return mask_connection_string(arg);
    }

    // Paths and flags are what operators need to see when a probe fails.
    if arg.starts_with('-') || arg.contains('/') || arg.contains('\\') || arg.len() <= 16 {
        return arg.to_string();
    }

    mask_sensitive(arg)
}

fn is_transient_exec_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_ascii_lowercase();
    msg.contains("text file busy")
        || msg.contains("resource temporarily unavailable")
        || msg.contains("temporarily")
        || msg.contains("in use")
}

async fn run_cmd_with_timeout_once(
    program: &str,
    args: &[String],
    timeout_dur: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    let started = Instant::now();

    debug!(
        "[PHASE: wizard] [STEP: cmd] run_cmd_with_timeout_once entered (operation={}, program={}, args=[{}], timeout_ms={})",
        operation,
        program,
        args.iter().map(|a| mask_arg_for_log(a)).collect::<Vec<_>>().join(", "),
        timeout_dur.as_millis()
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().with_context(|| {
        format!(
            "Failed to run '{}' (operation={})",
            program, operation
        )
    })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("Failed to capture stdout (operation={})", operation))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("Failed to capture stderr (operation={})", operation))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await?;
        Ok::<String, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await?;
        Ok::<String, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
    });

    let status = match timeout(timeout_dur, child.wait()).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            return Err(anyhow::Error::new(e)).with_context(|| {
                format!(
                    "Command wait failed (operation={}, program={})",
                    operation, program
                )
            });
        }
        Err(_) => {
            warn!(
                "[PHASE: wizard] [STEP: cmd] Timeout reached (operation={}, program={}, timeout_ms={}); attempting to kill process",
                operation,
                program,
                timeout_dur.as_millis()
            );

            if let Err(e) = child.kill().await {
                warn!(
                    "[PHASE: wizard] [STEP: cmd] Failed to kill timed-out process (operation={}, program={}): {}",
                    operation, program, e
                );
            }

            // Reap to avoid zombies.
            let _ = timeout(Duration::from_secs(5), child.wait()).await;

            return Err(anyhow::anyhow!(
                "Command timed out after {}ms (operation={}, program={})",
                timeout_dur.as_millis(),
                operation,
                program
            ));
        }
    };

    let stdout_str = stdout_task
        .await
        .context("stdout join failed")?
        .context("stdout read failed")?;
    let stderr_str = stderr_task
        .await
        .context("stderr join failed")?
        .context("stderr read failed")?;

    let out = CommandOutput {
        exit_code: status.code(),
        stdout: stdout_str,
        stderr: stderr_str,
        duration_ms: started.elapsed().as_millis(),
    };

    debug!(
        "[PHASE: wizard] [STEP: cmd] run_cmd_with_timeout_once exit (operation={}, program={}, exit_code={:?}, duration_ms={}, stdout_len={}, stderr_len={})",
        operation,
        program,
        out.exit_code,
        out.duration_ms,
        out.stdout.len(),
        out.stderr.len()
    );

    Ok(out)
}

/// Run an external command with a timeout and up to 2 retries for transient
/// spawn failures.
///
/// Returns captured stdout/stderr even when exit code is non-zero (caller decides success).
pub async fn run_cmd_with_timeout(
    program: &str,
    args: &[String],
    timeout_dur: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    let started = Instant::now();

    let program_owned = program.to_string();
    let args_owned = args.to_vec();
    let operation_owned = operation.to_string();

    let attempt = move || {
        let program = program_owned.clone();
        let args = args_owned.clone();
        let op = operation_owned.clone();
        async move { run_cmd_with_timeout_once(&program, &args, timeout_dur, &op).await }
    };

    let retry_strategy = ExponentialBackoff::from_millis(100)
        .factor(2)
        .max_delay(Duration::from_secs(1))
        .take(2)
        .map(jitter);

    let result = RetryIf::spawn(retry_strategy, attempt, |e: &anyhow::Error| {
        let transient = is_transient_exec_error(e);
        if transient {
            warn!(
                "[PHASE: wizard] [STEP: cmd] Transient command failure detected; will retry (operation={}, program={}, err={})",
                operation,
                program,
                e
            );
        }
        transient
    })
    .await;

    match &result {
        Ok(out) => info!(
            "[PHASE: wizard] [STEP: cmd] {} finished (program={}, exit_code={:?}, duration_ms={})",
            operation,
            program,
            out.exit_code,
            started.elapsed().as_millis()
        ),
        Err(e) => warn!(
            "[PHASE: wizard] [STEP: cmd] {} failed (program={}, duration_ms={}, err={:#})",
            operation,
            program,
            started.elapsed().as_millis(),
            e
        ),
    }

    result
}

/// Outcome of running an executable: exit status plus everything it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_ok: bool,
    pub combined_output: String,
}

/// Runs `argv[0]` with the remaining arguments and reports the outcome.
/// Spawn failures are reported as a failed result, never as a panic.
pub trait CommandRunner: Send + Sync {
    fn execute(&self, argv: &[String]) -> ExecResult;
}

/// Runs commands as real child processes.
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemCommandRunner {
    fn execute(&self, argv: &[String]) -> ExecResult {
        let Some((program, args)) = argv.split_first() else {
            return ExecResult {
                exit_ok: false,
                combined_output: "No command given".to_string(),
            };
        };

        let outcome = run_blocking(run_cmd_with_timeout(
            program,
            args,
            self.timeout,
            "tool_probe",
        ))
        .and_then(|r| r);

        match outcome {
            Ok(out) => ExecResult {
                exit_ok: out.success(),
                combined_output: out.combined(),
            },
            Err(e) => ExecResult {
                exit_ok: false,
                combined_output: format!("{:#}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_arg_for_log_redacts_passwordish_values() {
        assert_eq!(mask_arg_for_log("Password=PASSWORD_SHOULD_BE_REDACTED"), "***");
        assert_eq!(mask_arg_for_log("pwd=PASSWORD_SHOULD_BE_REDACTED"), "***");
    }

    #[test]
    fn mask_arg_for_log_keeps_flags_and_paths() {
        assert_eq!(mask_arg_for_log("-version"), "-version");
        assert_eq!(mask_arg_for_log("/usr/bin/convert"), "/usr/bin/convert");
        assert!(mask_arg_for_log("abcdefghijklmnopqrstuvwxyz").contains("..."));
    }

    #[test]
    fn combined_output_joins_streams() {
        let out = CommandOutput {
            exit_code: Some(1),
            stdout: "line one\n".into(),
            stderr: "line two\n".into(),
            duration_ms: 1,
        };
        assert_eq!(out.combined(), "line one\nline two");
        assert!(!out.success());
    }

    #[test]
    fn transient_detection_is_narrow() {
        assert!(is_transient_exec_error(&anyhow::anyhow!("Text file busy (os error 26)")));
        assert!(!is_transient_exec_error(&anyhow::anyhow!(
            "No such file or directory (os error 2)"
        )));
        assert!(!is_transient_exec_error(&anyhow::anyhow!("Command timed out after 5ms")));
    }

    #[tokio::test]
    async fn run_cmd_with_timeout_basic_smoke() {
        let timeout_dur = Duration::from_secs(5);

        #[cfg(windows)]
        let (program, args) = (
            "cmd",
            vec!["/C".to_string(), "echo".to_string(), "hello".to_string()],
        );

        #[cfg(not(windows))]
        let (program, args) = ("sh", vec!["-c".to_string(), "echo hello".to_string()]);

        let out = run_cmd_with_timeout(program, &args, timeout_dur, "test_echo")
            .await
            .expect("command should run");
        assert_eq!(out.exit_code, Some(0));
        assert!(out.stdout.to_ascii_lowercase().contains("hello"));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_reports_exit_status_and_output() {
        let runner = SystemCommandRunner::new(Duration::from_secs(5));
        let ok = runner.execute(&["sh".into(), "-c".into(), "echo fine".into()]);
        assert!(ok.exit_ok);
        assert_eq!(ok.combined_output, "fine");

        let bad = runner.execute(&["sh".into(), "-c".into(), "echo broken >&2; exit 3".into()]);
        assert!(!bad.exit_ok);
        assert_eq!(bad.combined_output, "broken");
    }

    #[test]
    fn system_runner_reports_missing_program() {
        let runner = SystemCommandRunner::new(Duration::from_secs(5));
        let res = runner.execute(&["definitely-not-a-real-binary-4711".into()]);
        assert!(!res.exit_ok);
        assert!(res.combined_output.contains("definitely-not-a-real-binary-4711"));
    }

    #[test]
    fn system_runner_rejects_empty_argv() {
        let runner = SystemCommandRunner::new(Duration::from_secs(1));
        assert!(!runner.execute(&[]).exit_ok);
    }
}
