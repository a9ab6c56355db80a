// External tool presence checks.

use log::{info, warn};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::exec::CommandRunner;
use crate::models::config::ToolSettings;
use crate::tools::office::{ManagedService, ServiceManagerFactory};
use crate::utils::os_detection::executable_suffix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ImageMagick,
    Ffmpeg,
    Sox,
    Office,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::ImageMagick,
        ToolKind::Ffmpeg,
        ToolKind::Sox,
        ToolKind::Office,
    ];

    /// Form field the result is reported on.
    pub fn field(&self) -> &'static str {
        match self {
            ToolKind::ImageMagick => "imageMagickPath",
            ToolKind::Ffmpeg => "ffmpegPath",
            ToolKind::Sox => "soxPath",
            ToolKind::Office => "officePath",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::ImageMagick => "ImageMagick",
            ToolKind::Ffmpeg => "FFmpeg",
            ToolKind::Sox => "SoX",
            ToolKind::Office => "Office",
        }
    }

    /// Executable base name and version flag. `None` for the office backend,
    /// which is probed through its service manager.
    pub fn command(&self) -> Option<(&'static str, &'static str)> {
        match self {
            ToolKind::ImageMagick => Some(("convert", "-version")),
            ToolKind::Ffmpeg => Some(("ffmpeg", "-version")),
            ToolKind::Sox => Some(("sox", "--version")),
            ToolKind::Office => None,
        }
    }

    pub fn configured_path<'a>(&self, tools: &'a ToolSettings) -> &'a str {
        match self {
            ToolKind::ImageMagick => &tools.image_magick_path,
            ToolKind::Ffmpeg => &tools.ffmpeg_path,
            ToolKind::Sox => &tools.sox_path,
            ToolKind::Office => &tools.office_path,
        }
    }

    /// Case-insensitive lookup by label or short name (`imagemagick`, `convert`, `ffmpeg`, `sox`, `office`).
    pub fn from_name(name: &str) -> Option<ToolKind> {
        match name.trim().to_ascii_lowercase().as_str() {
            "imagemagick" | "convert" => Some(ToolKind::ImageMagick),
            "ffmpeg" => Some(ToolKind::Ffmpeg),
            "sox" => Some(ToolKind::Sox),
            "office" | "soffice" | "libreoffice" => Some(ToolKind::Office),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCheck {
    pub tool: ToolKind,
    pub ok: bool,
    /// Single line, empty on success.
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCheckReport {
    pub checks: Vec<ToolCheck>,
}

impl ToolCheckReport {
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ToolCheck> {
        self.checks.iter().filter(|c| !c.ok)
    }

    pub fn get(&self, tool: ToolKind) -> Option<&ToolCheck> {
        self.checks.iter().find(|c| c.tool == tool)
    }
}

/// Collapse multi-line tool output into one line.
pub fn strip_line_breaks(text: &str) -> String {
    match Regex::new(r"\r\n|\r|\n") {
        Ok(re) => re.replace_all(text.trim(), " ").to_string(),
        Err(_) => text.trim().replace(['\r', '\n'], " "),
    }
}

/// Full executable path for `base` inside `dir`. With an empty directory the
/// name is resolved through `PATH`, falling back to the bare name.
pub fn executable_path(dir: &str, base: &str) -> String {
    let name = format!("{}{}", base, executable_suffix());
    if dir.trim().is_empty() {
        return which::which(&name)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or(name);
    }
    PathBuf::from(dir.trim())
        .join(name)
        .to_string_lossy()
        .into_owned()
}

pub struct ToolPathProbe {
    runner: Arc<dyn CommandRunner>,
    services: Arc<dyn ServiceManagerFactory>,
}

impl ToolPathProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, services: Arc<dyn ServiceManagerFactory>) -> Self {
        Self { runner, services }
    }

    pub fn check_tool(&self, tool: ToolKind, tools: &ToolSettings) -> ToolCheck {
        let configured = tool.configured_path(tools);
        let result = match tool.command() {
            Some((base, flag)) => self.check_executable(configured, base, flag),
            None => self.check_office(configured),
        };

        let check = match result {
            Ok(()) => ToolCheck {
                tool,
                ok: true,
                message: String::new(),
            },
            Err(message) => ToolCheck {
                tool,
                ok: false,
                message,
            },
        };

        if check.ok {
            info!(
                "[PHASE: wizard] [STEP: tools] {} check passed (path='{}')",
                tool.label(),
                configured
            );
        } else {
            warn!(
                "[PHASE: wizard] [STEP: tools] {} check failed (path='{}'): {}",
                tool.label(),
                configured,
                check.message
            );
        }
        check
    }

    /// Runs every check, even after a failure.
    pub fn check_all(&self, tools: &ToolSettings) -> ToolCheckReport {
        ToolCheckReport {
            checks: ToolKind::ALL
                .iter()
                .map(|tool| self.check_tool(*tool, tools))
                .collect(),
        }
    }

    fn check_executable(&self, dir: &str, base: &str, flag: &str) -> Result<(), String> {
        let program = executable_path(dir, base);
        let result = self.runner.execute(&[program.clone(), flag.to_string()]);
        if result.exit_ok {
            return Ok(());
        }
        let detail = strip_line_breaks(&result.combined_output);
        if detail.is_empty() {
            Err(format!("{} {} failed", program, flag))
        } else {
            Err(detail)
        }
    }

    fn check_office(&self, home: &str) -> Result<(), String> {
        let home = home.trim();
        let home = (!home.is_empty()).then(|| Path::new(home));

        let manager = self
            .services
            .build(home)
            .map_err(|e| strip_line_breaks(&format!("{:#}", e)))?;
        let mut service = ManagedService::new(manager);
        service
            .start()
            .map_err(|e| strip_line_breaks(&format!("{:#}", e)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::exec::ExecResult;
    use crate::tools::office::tests::StubServices;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    /// Answers by executable base name; records every argv.
    #[derive(Default)]
    pub struct ScriptedRunner {
        pub failures: HashMap<String, String>,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        pub fn failing(base: &str, output: &str) -> Self {
            let mut failures = HashMap::new();
            failures.insert(base.to_string(), output.to_string());
            Self {
                failures,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn execute(&self, argv: &[String]) -> ExecResult {
            self.calls.lock().unwrap().push(argv.to_vec());
            let stem = Path::new(&argv[0])
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            match self.failures.get(&stem) {
                Some(out) => ExecResult {
                    exit_ok: false,
                    combined_output: out.clone(),
                },
                None => ExecResult {
                    exit_ok: true,
                    combined_output: format!("{} version 1.0", stem),
                },
            }
        }
    }

    fn probe(runner: ScriptedRunner, services: StubServices) -> (ToolPathProbe, Arc<ScriptedRunner>, Arc<StubServices>) {
        let runner = Arc::new(runner);
        let services = Arc::new(services);
        (
            ToolPathProbe::new(runner.clone(), services.clone()),
            runner,
            services,
        )
    }

    fn tools_in(dir: &str) -> ToolSettings {
        ToolSettings {
            image_magick_path: dir.into(),
            ffmpeg_path: dir.into(),
            sox_path: dir.into(),
            office_path: String::new(),
            ..ToolSettings::default()
        }
    }

    #[test]
    fn builds_platform_executable_path_with_version_flag() {
        let (probe, runner, _) = probe(ScriptedRunner::default(), StubServices::default());
        let check = probe.check_tool(ToolKind::Sox, &tools_in("/opt/sox/bin"));
        assert!(check.ok);

        let calls = runner.calls.lock().unwrap();
        let expected = PathBuf::from("/opt/sox/bin")
            .join(format!("sox{}", executable_suffix()))
            .to_string_lossy()
            .into_owned();
        assert_eq!(calls[0], vec![expected, "--version".to_string()]);
    }

    #[test]
    fn failure_output_is_reported_on_one_line() {
        let (probe, _, _) = probe(
            ScriptedRunner::failing("convert", "convert: not found\r\nsecond line\n"),
            StubServices::default(),
        );
        let check = probe.check_tool(ToolKind::ImageMagick, &tools_in("/usr/local/bin"));
        assert!(!check.ok);
        assert_eq!(check.message, "convert: not found second line");
        assert_eq!(check.tool.field(), "imageMagickPath");
    }

    #[test]
    fn check_all_does_not_short_circuit() {
        let (probe, runner, services) = probe(
            ScriptedRunner::failing("convert", "boom"),
            StubServices::default(),
        );
        let report = probe.check_all(&tools_in("/usr/bin"));

        assert!(!report.all_ok());
        assert_eq!(report.checks.len(), 4);
        assert_eq!(runner.call_count(), 3);
        assert_eq!(services.starts.load(Ordering::SeqCst), 1);
        assert_eq!(
            report.failures().map(|c| c.tool).collect::<Vec<_>>(),
            vec![ToolKind::ImageMagick]
        );
    }

    #[test]
    fn office_probe_always_stops_service() {
        let (probe, _, services) = probe(
            ScriptedRunner::default(),
            StubServices {
                fail_start: Some("could not bind port\n2002".into()),
                ..Default::default()
            },
        );
        let check = probe.check_tool(ToolKind::Office, &ToolSettings::default());
        assert!(!check.ok);
        assert_eq!(check.message, "could not bind port 2002");
        assert_eq!(services.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn office_build_failure_is_reported() {
        let (probe, _, services) = probe(
            ScriptedRunner::default(),
            StubServices {
                fail_build: Some("No office installation found".into()),
                ..Default::default()
            },
        );
        let check = probe.check_tool(ToolKind::Office, &ToolSettings::default());
        assert!(!check.ok);
        assert!(check.message.contains("No office installation"));
        assert_eq!(services.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_dir_uses_bare_or_resolved_name() {
        let path = executable_path("", "definitely-not-a-real-tool-4711");
        assert_eq!(path, format!("definitely-not-a-real-tool-4711{}", executable_suffix()));
    }

    #[test]
    fn tool_names_parse() {
        assert_eq!(ToolKind::from_name("SoX"), Some(ToolKind::Sox));
        assert_eq!(ToolKind::from_name("convert"), Some(ToolKind::ImageMagick));
        assert_eq!(ToolKind::from_name("gimp"), None);
    }
}
