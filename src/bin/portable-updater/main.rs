//! portable-updater CLI entry point.
//!
//! Exit status is the library error's exit code; `0` means the command
//! succeeded or had nothing to do.

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use portable_updater::config::{SettingsLoad, UpdaterConfig};
use portable_updater::context::InstallationContext;
use portable_updater::upgrade::{
    CheckOutcome, HttpSource, StagingStore, UpdateApplier, UpdateChecker,
};
use portable_updater::Error;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();
    let settings = match cli.load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error[{}]: {e}", e.kind());
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    // Initialize tracing
    let level = cli.log_level.clone().unwrap_or_else(|| match &settings {
        SettingsLoad::Loaded(config) => config.log_level.clone(),
        SettingsLoad::Missing | SettingsLoad::Malformed(_) => "info".to_string(),
    });
    init_tracing(&level, cli.json);

    info!("portable-updater v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.apply_overrides(settings.into_config());
    let ctx = cli.context()?;

    let result = match cli.command {
        Command::Check => run_check(ctx, config).await,
        Command::Apply => run_apply(ctx, &config),
        Command::Status => run_status(&ctx),
        Command::InitConfig => run_init_config(&cli.config_path()?),
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(Error::NoStagedUpdate) => {
            println!("no staged update");
            Ok(ExitCode::from(Error::NoStagedUpdate.exit_code()))
        }
        Err(e) => {
            error!("{e}");
            eprintln!("error[{}]: {e}", e.kind());
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn run_check(ctx: InstallationContext, config: UpdaterConfig) -> portable_updater::Result<()> {
    let source = HttpSource::new(&config)?;
    let checker = UpdateChecker::new(ctx, config, source);

    match checker.check().await? {
        CheckOutcome::UpToDate { current, latest } => {
            println!("up to date ({current}, latest {latest})");
        }
        CheckOutcome::Staged(update) => {
            let verified = if update.verified { "verified" } else { "unverified" };
            println!(
                "staged {} ({verified}) at {}",
                update.version,
                update.staging_dir.display()
            );
            if let Some(changelog) = update.changelog {
                println!("\n{changelog}");
            }
        }
    }
    Ok(())
}

fn run_apply(ctx: InstallationContext, config: &UpdaterConfig) -> portable_updater::Result<()> {
    let report = UpdateApplier::new(ctx, config).apply()?;
    println!("applied {}", report.version);
    println!("backup: {}", report.backup.display());
    for path in &report.skipped {
        println!("left in place: {}", path.display());
    }
    println!("restart the application to finish the update");
    Ok(())
}

fn run_status(ctx: &InstallationContext) -> portable_updater::Result<()> {
    let store = StagingStore::new(ctx.updates_dir());
    println!("installed: {}", ctx.current_version());
    println!("platform:  {}", ctx.platform());

    let staged = store.staged_versions()?;
    if staged.is_empty() {
        println!("staged:    none");
    } else {
        println!("staged:    {}", staged.join(", "));
    }

    match store.backups()?.last() {
        Some(path) => println!("backup:    {}", path.display()),
        None => println!("backup:    none"),
    }
    Ok(())
}

fn run_init_config(path: &std::path::Path) -> portable_updater::Result<()> {
    if path.exists() {
        println!("config already exists at {}", path.display());
        return Ok(());
    }
    UpdaterConfig::default().to_file(path)?;
    println!("wrote default config to {}", path.display());
    Ok(())
}
