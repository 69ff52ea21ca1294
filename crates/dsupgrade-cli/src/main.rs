mod completion;
mod dispatch;
mod logging;
mod prompt;
mod render;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dsupgrade_engine::ProgressStep;

use crate::dispatch::run_cli;

#[derive(Parser, Debug)]
#[command(name = "dsupgrade")]
#[command(about = "Upgrade or revert a directory server installation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Move the installation to the build of a package, newer or older.
    #[command(visible_alias = "revert")]
    Upgrade(RunArgs),
    /// Report whether moving to an extracted package is supported, touching nothing.
    Check {
        #[command(flatten)]
        installation: InstallationArgs,
        #[arg(long)]
        package_dir: PathBuf,
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// List past runs recorded for the instance.
    History {
        #[command(flatten)]
        installation: InstallationArgs,
        #[arg(long)]
        json: bool,
    },
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct InstallationArgs {
    /// Directory holding bin/ and lib/; defaults to the working directory.
    #[arg(long)]
    install_root: Option<PathBuf>,
    /// Directory holding config/ and db/; defaults to instance.loc or the install root.
    #[arg(long)]
    instance_root: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    #[command(flatten)]
    installation: InstallationArgs,
    /// Package archive (.zip or .tar.gz).
    #[arg(long, conflicts_with_all = ["package_dir", "package_url"])]
    package: Option<PathBuf>,
    /// Already extracted package directory.
    #[arg(long, conflicts_with = "package_url")]
    package_dir: Option<PathBuf>,
    #[arg(long)]
    package_url: Option<String>,
    /// Expected SHA-256 of the downloaded package.
    #[arg(long, requires = "package_url")]
    sha256: Option<String>,
    #[arg(long)]
    backup_databases: bool,
    #[arg(long, conflicts_with = "stop_server")]
    start_server: bool,
    #[arg(long)]
    stop_server: bool,
    /// Never ask; anything needing confirmation fails the run.
    #[arg(long)]
    no_prompt: bool,
    #[arg(long)]
    verbose: bool,
    /// Keep the full files backup after a successful run.
    #[arg(long)]
    retain_backup: bool,
    /// Compatibility rule table replacing the built-in one.
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Run configuration file (TOML); flags override its fields.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long, hide = true, value_parser = parse_step)]
    inject_error: Option<ProgressStep>,
    #[arg(long, hide = true)]
    inject_verify_error: bool,
    #[arg(long, hide = true)]
    skip_abort: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliCompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

fn parse_step(value: &str) -> Result<ProgressStep, String> {
    ProgressStep::parse(value).ok_or_else(|| format!("unknown step '{value}'"))
}

fn main() {
    let cli = Cli::parse();
    let code = match run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}
