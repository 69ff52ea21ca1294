use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dsupgrade_engine::{
    check_compatibility, spawn_run, Collaborators, Orchestrator, PackageSource, RunConfig,
    RunMonitor,
};
use dsupgrade_installer::{read_history, InstallationLayout, INSTANCE_LOC_FILE_NAME};
use dsupgrade_oracle::{RuleTable, VersionOracle};
use tracing::info;

use crate::completion::write_completions_script;
use crate::logging::{default_log_path, init_logging};
use crate::prompt::ConsoleInteraction;
use crate::render::{
    current_output_style, format_check_lines, format_history_lines, format_outcome_lines,
    render_section_header, RunRenderer,
};
use crate::{Cli, Commands, InstallationArgs, RunArgs};

/// Runs one command and returns the process exit code.
pub(crate) fn run_cli(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Upgrade(args) => run_upgrade(args),
        Commands::Check {
            installation,
            package_dir,
            rules,
        } => {
            let layout = resolve_layout(&installation)?;
            let oracle = load_oracle(rules.as_deref())?;
            let report = check_compatibility(&layout, &package_dir, &oracle)?;
            for line in format_check_lines(&report, current_output_style()) {
                println!("{line}");
            }
            Ok(if report.is_supported() { 0 } else { 1 })
        }
        Commands::History { installation, json } => {
            let layout = resolve_layout(&installation)?;
            let records = read_history(&layout)?;
            if json {
                for record in &records {
                    let line = serde_json::to_string(record)
                        .context("failed to serialize history record")?;
                    println!("{line}");
                }
            } else {
                for line in format_history_lines(&records, current_output_style()) {
                    println!("{line}");
                }
            }
            Ok(0)
        }
        Commands::Completions { shell } => {
            let mut stdout = io::stdout();
            write_completions_script(shell, &mut stdout)?;
            Ok(0)
        }
    }
}

fn run_upgrade(args: RunArgs) -> Result<i32> {
    let log_file = args.log_file.clone().unwrap_or_else(default_log_path);
    init_logging(&log_file, args.verbose)?;

    let layout = resolve_layout(&args.installation)?;
    let config = build_run_config(&args)?;
    let oracle = load_oracle(args.rules.as_deref())?;
    info!(
        install = %layout.install_root().display(),
        instance = %layout.instance_root().display(),
        package = %config.package.as_ref().map(PackageSource::describe).unwrap_or_default(),
        "dsupgrade started"
    );

    let style = current_output_style();
    if let Some(header) = render_section_header(style, "dsupgrade") {
        println!("{header}");
    }
    let renderer = RunRenderer::start(style, config.verbose);
    let mut collaborators = Collaborators::for_installation(&layout);
    if !args.no_prompt {
        collaborators = collaborators.with_interaction(Box::new(ConsoleInteraction::new(
            renderer.progress_bar(),
        )));
    }

    let handle = spawn_run(Orchestrator::new(layout, config, oracle, collaborators))?;
    let mut monitor = RunMonitor::new();
    for event in handle.events().iter() {
        monitor.apply(&event);
        renderer.observe(&event, &monitor);
    }
    let report = handle.join()?;
    renderer.finish();

    for line in format_outcome_lines(&report, style, &log_file) {
        println!("{line}");
    }
    Ok(report.outcome.exit_code())
}

pub(crate) fn resolve_layout(args: &InstallationArgs) -> Result<InstallationLayout> {
    let install_root = match &args.install_root {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to resolve the working directory")?,
    };
    let instance_root = match &args.instance_root {
        Some(path) => path.clone(),
        None => read_instance_location(&install_root)?.unwrap_or_else(|| install_root.clone()),
    };
    Ok(InstallationLayout::new(install_root, instance_root))
}

/// Instance root recorded in `instance.loc`; relative entries are taken from the install root.
fn read_instance_location(install_root: &Path) -> Result<Option<PathBuf>> {
    let path = install_root.join(INSTANCE_LOC_FILE_NAME);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let Some(location) = raw.lines().map(str::trim).find(|line| !line.is_empty()) else {
        return Ok(None);
    };
    let location = PathBuf::from(location);
    if location.is_absolute() {
        Ok(Some(location))
    } else {
        Ok(Some(install_root.join(location)))
    }
}

/// The configuration file, if any, with every given flag laid over it.
pub(crate) fn build_run_config(args: &RunArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };

    if let Some(path) = &args.package {
        config.package = Some(PackageSource::Archive { path: path.clone() });
    } else if let Some(path) = &args.package_dir {
        config.package = Some(PackageSource::Directory { path: path.clone() });
    } else if let Some(url) = &args.package_url {
        config.package = Some(PackageSource::Url {
            url: url.clone(),
            sha256: args.sha256.clone(),
        });
    }

    if args.backup_databases {
        config.perform_database_backup = true;
    }
    if args.start_server {
        config.start_server = Some(true);
    } else if args.stop_server {
        config.start_server = Some(false);
    }
    config.verbose |= args.verbose;
    config.retain_backup |= args.retain_backup;
    if args.inject_error.is_some() {
        config.inject_error = args.inject_error;
    }
    config.inject_verify_error |= args.inject_verify_error;
    config.skip_abort |= args.skip_abort;
    Ok(config)
}

pub(crate) fn load_oracle(rules: Option<&Path>) -> Result<VersionOracle> {
    match rules {
        Some(path) => Ok(VersionOracle::new(RuleTable::load(path)?)),
        None => VersionOracle::builtin(),
    }
}
