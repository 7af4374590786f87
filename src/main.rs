mod cache;
mod commands;
mod config;
mod gitlab;
mod logging;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "labpal")]
#[command(about = "A command palette for GitLab")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/labpal/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _log_guard = logging::init(&config::Config::log_dir()?)?;

  // Needs neither a config file nor a token
  if let commands::Command::ClearCache = args.command {
    return commands::clear_cache().await;
  }

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  commands::run(args.command, &config).await
}
