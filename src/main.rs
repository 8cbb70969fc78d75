mod app;
mod commands;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "padel-sync")]
#[command(about = "Optimistic sync client for padel club reservations")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/padel-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Guard flushes the log file on exit
  let _guard = init_tracing(args.verbose)?;

  // Load configuration
  let config = padel_sync::Config::load(args.config.as_deref())?;

  let app = app::App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}

fn init_tracing(verbose: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("PADEL_SYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  if verbose {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("padel-sync");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&log_dir, "padel-sync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}
