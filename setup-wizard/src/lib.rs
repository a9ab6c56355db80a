// Server setup wizard
// Library entry point

pub mod database;
pub mod exec;
pub mod headless;
pub mod install;
pub mod models;
pub mod security;
pub mod settings;
pub mod tools;
pub mod utils;
pub mod wizard;

use anyhow::Result;
use log::{error, info};
use std::path::{Path, PathBuf};

use crate::database::connection::ConnectionProbe;
use crate::database::properties::PropertiesStore;
use crate::headless::UnattendedError;
use crate::models::config::ToolSettings;
use crate::settings::WizardSettings;
use crate::wizard::controller::WizardController;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

/// Initialize logging with dual format (JSON + human-readable).
fn init_logging(with_stdout: bool) -> Result<PathBuf> {
    let log_dir = utils::path_resolver::resolve_log_folder()?;
    std::fs::create_dir_all(&log_dir)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");
    let json_log_file = log_dir.join(format!("setup-{}.log", timestamp));
    let txt_log_file = log_dir.join(format!("setup-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new().level(log::LevelFilter::Debug);

    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(std::io::stderr()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(fern::log_file(txt_log_file)?),
        );

    dispatch.apply()?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(log_dir)
}

/// Settings from the deployment folder plus environment, with logging up.
fn bootstrap() -> Result<WizardSettings> {
    let deployment = utils::path_resolver::resolve_deployment_folder()?;
    let settings = WizardSettings::load(&deployment)?;
    if let Err(e) = init_logging(settings.log_to_stdout) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }
    info!(
        "[PHASE: initialization] Setup wizard starting on {} (deployment folder: {:?})",
        utils::os_detection::get_os_name(),
        deployment
    );
    Ok(settings)
}

/// Unattended install from an answers file.
pub fn run_unattended(answers_path: &Path) -> i32 {
    let settings = match bootstrap() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Setup wizard: {:#}", e);
            return EXIT_USAGE;
        }
    };

    let prepared = headless::load_answers(answers_path).and_then(|answers| {
        let deps = headless::build_deps(&settings)?;
        let options = headless::build_options(&settings)?;
        Ok((answers, deps, options))
    });
    let (answers, deps, options) = match prepared {
        Ok(p) => p,
        Err(e) => {
            error!("[PHASE: initialization] {:#}", e);
            eprintln!("Setup wizard: {:#}", e);
            return EXIT_USAGE;
        }
    };

    let mut wizard = WizardController::new(deps, options, answers.clone());
    let mut display = headless::BarDisplay::new();
    let result = headless::drive(&mut wizard, &answers)
        .and_then(|()| headless::follow(&wizard, &mut display));

    match result {
        Ok(dialect_changed) => {
            info!(
                "[PHASE: install] [STEP: done] Installation completed (dialect changed: {})",
                dialect_changed
            );
            EXIT_OK
        }
        Err(e) => {
            error!("[PHASE: install] [STEP: done] {}", e);
            eprintln!("Setup wizard: {}", e);
            match e {
                UnattendedError::Blocked { .. } => EXIT_USAGE,
                _ => EXIT_FAILED,
            }
        }
    }
}

/// Probe the tools configured in an answers file (or on `PATH`).
pub fn run_check_tools(answers_path: Option<&Path>) -> i32 {
    let settings = match bootstrap() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Setup wizard: {:#}", e);
            return EXIT_USAGE;
        }
    };

    let tools = match answers_path {
        Some(path) => match headless::load_answers(path) {
            Ok(answers) => answers.tools,
            Err(e) => {
                eprintln!("Setup wizard: {:#}", e);
                return EXIT_USAGE;
            }
        },
        None => ToolSettings::default(),
    };
    let optional = match settings.optional_tool_kinds() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Setup wizard: {}", e);
            return EXIT_USAGE;
        }
    };

    let report = headless::tool_probe(&settings).check_all(&tools);
    let mut blocking = false;
    for check in &report.checks {
        let status = if check.ok {
            "ok"
        } else if optional.contains(&check.tool) {
            "warning"
        } else {
            blocking = true;
            "FAILED"
        };
        println!("{:<12} {:<8} {}", check.tool.label(), status, check.message);
    }

    if blocking {
        EXIT_FAILED
    } else {
        EXIT_OK
    }
}

/// Probe the persisted connection properties.
pub fn run_test_db() -> i32 {
    let settings = match bootstrap() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Setup wizard: {:#}", e);
            return EXIT_USAGE;
        }
    };

    let descriptor = match headless::properties_store(&settings).and_then(|s| s.load(None)) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Setup wizard: {:#}", e);
            return EXIT_USAGE;
        }
    };

    println!("{} ({})", descriptor.dialect.display_name(), descriptor.masked_url());
    let outcome = ConnectionProbe::real(settings.db_probe_timeout()).probe(&descriptor);
    println!("{}", outcome.message);
    if outcome.ok {
        EXIT_OK
    } else {
        EXIT_FAILED
    }
}
