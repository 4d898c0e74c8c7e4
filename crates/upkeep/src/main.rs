mod error;
mod logging;
mod publish;
mod settings;
mod single_instance;
mod stores;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use upkeep_core::{BlockDelta, LogFacade, UpdaterContext};
use upkeep_platform::AppPaths;

use crate::error::AppError;
use crate::publish::ManifestArgs;
use crate::settings::Settings;
use crate::single_instance::SingleInstance;
use crate::stores::StoreArgs;

/// Exit status of `check` when at least one installation has updates.
const EXIT_UPDATES_AVAILABLE: u8 = 5;

#[derive(Debug, Parser)]
#[command(name = "upkeep", version, about = "Keeps installed resources in sync with their manifest feeds")]
struct Cli {
    /// Print debug output on the terminal.
    #[arg(long, global = true)]
    debug: bool,
    /// Directory relative store, archive and cache paths resolve against.
    #[arg(long, global = true)]
    working_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report pending updates; exits with 5 when there are any.
    Check(StoreArgs),
    /// Install every pending update.
    Update(StoreArgs),
    /// Write a manifest.json for a release.
    Manifest(ManifestArgs),
    /// Write a delta patch turning BASE into TARGET.
    Delta {
        base: PathBuf,
        target: PathBuf,
        out: PathBuf,
    },
    /// Write the .sha1 sidecar of an archive.
    Checksum { file: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let paths = match AppPaths::new() {
        Ok(paths) => paths,
        Err(error) => {
            eprintln!("error: {}", AppError::from(error));
            return ExitCode::FAILURE;
        }
    };
    let settings = Settings::load(&paths.settings_file());
    logging::init_logging(
        &paths,
        cli.debug || settings.debug_logging,
        settings.max_log_size_bytes,
    );

    match run(cli, &settings, &paths).await {
        Ok(code) => code,
        Err(error) => {
            log::error!("{error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, settings: &Settings, paths: &AppPaths) -> Result<ExitCode, AppError> {
    let working_dir = match cli.working_dir {
        Some(dir) => dir,
        None => std::env::current_dir()
            .map_err(|error| AppError::io("failed to read", &PathBuf::from("."), error))?,
    };

    match cli.command {
        Command::Check(args) => {
            let files = args.store_files()?;
            let _instance = SingleInstance::acquire(&paths.instance_lock_file())?;
            let ctx = context(settings, &working_dir)?;
            let summary = stores::check(&files, &ctx).await;
            log::debug!("Check finished: {summary:?}");
            if summary.updates > 0 {
                Ok(ExitCode::from(EXIT_UPDATES_AVAILABLE))
            } else if summary.failed_stores > 0 {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Command::Update(args) => {
            let files = args.store_files()?;
            let _instance = SingleInstance::acquire(&paths.instance_lock_file())?;
            let ctx = context(settings, &working_dir)?;
            let summary = stores::update(&files, &ctx).await;
            log::info!(
                "{} resource(s) updated, {} failed",
                summary.done,
                summary.failed
            );
            Ok(if summary.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Manifest(args) => {
            let path = publish::write_manifest(&args)?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Delta { base, target, out } => {
            let size = publish::write_delta(&BlockDelta::default(), &base, &target, &out)?;
            println!("{} ({size} bytes)", out.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Checksum { file } => {
            let sidecar = publish::write_checksum(&file)?;
            println!("{}", sidecar.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn context(settings: &Settings, working_dir: &std::path::Path) -> Result<UpdaterContext, AppError> {
    let config = settings.updater_config(working_dir);
    Ok(UpdaterContext::new(config, Arc::new(LogFacade))?)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn check_accepts_repeated_store_flags() {
        let cli = Cli::try_parse_from([
            "upkeep",
            "check",
            "--store",
            "a.json",
            "--store",
            "b.json",
            "--store-dir",
            "stores",
        ])
        .expect("arguments should parse");

        let Command::Check(args) = cli.command else {
            panic!("expected the check command");
        };
        assert_eq!(args.stores.len(), 2);
        assert_eq!(args.store_dirs.len(), 1);
    }

    #[test]
    fn manifest_defaults_to_plugin_type() {
        let cli = Cli::try_parse_from([
            "upkeep",
            "manifest",
            "--id",
            "S4Forge",
            "--name",
            "Forge",
            "--version",
            "1.0.0",
            "--asset-uri",
            "https://example.invalid/S4Forge.zip",
            "--ignore",
            "logs/",
            "--out",
            "release",
            "--debug",
        ])
        .expect("arguments should parse");

        assert!(cli.debug);
        let Command::Manifest(args) = cli.command else {
            panic!("expected the manifest command");
        };
        assert_eq!(args.kind, "plugin");
        assert_eq!(args.ignored_entries, vec!["logs/".to_string()]);
        assert!(!args.clear_residual_files);
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
