mod atomic_file;
mod config;
mod error;
mod logging;
mod m3u;
mod merge;
mod ports;
mod services;
mod state;
mod track;

#[cfg(test)]
mod test_utils;

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{Result, eyre::Context};

use crate::{
    config::Config,
    logging::setup_logging,
    services::playlist_sync::{
        Direction, LocalLayout, Outcome, PlaylistSyncService, SyncOptions, SyncSummary,
    },
    services::remote::RemoteHttpAdapter,
    state::StateStore,
    track::TrackIndex,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "PLAYLIST_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Console log level
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// File log level (default: debug)
    #[arg(long, default_value = "debug", global = true)]
    log_file_level: log::LevelFilter,

    /// Path to log file
    #[arg(long, env = "PLAYLIST_SYNC_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync local M3U playlists with the remote service
    Sync(SyncArgs),
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(ClapArgs, Debug)]
struct SyncArgs {
    /// Only push local changes to the remote
    #[arg(long, conflicts_with = "download")]
    upload: bool,

    /// Only pull remote changes into local files
    #[arg(long)]
    download: bool,

    /// Propagate deletions of tracks and whole playlists
    #[arg(long)]
    delete: bool,

    /// Show what would be done without changing anything
    #[arg(short, long)]
    pretend: bool,

    /// Bearer token for the remote service
    #[arg(long, env = "PLAYLIST_SYNC_REMOTE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Playlist names to sync (case-insensitive); all when omitted
    names: Vec<String>,
}

impl SyncArgs {
    fn direction(&self) -> Direction {
        match (self.upload, self.download) {
            (true, _) => Direction::Upload,
            (_, true) => Direction::Download,
            _ => Direction::Both,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    setup_logging(args.log_level, args.log_file.clone(), args.log_file_level)?;

    log::debug!("Playlist sync starting");

    match args.command {
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                log::debug!("Creating default config");
                let path = Config::create_default()?;
                log::info!("Default config at {}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        },
        Commands::Sync(sync_args) => {
            log::debug!("Loading configuration");
            let config = {
                if let Some(config) = &args.config {
                    Config::from_file(config)
                } else {
                    Config::load()
                }
            }
            .with_context(|| "Failed to load playlist-sync config")?;

            let summary = tokio::select! {
                summary = run_sync(&config, &sync_args) => summary?,
                _ = tokio::signal::ctrl_c() => {
                    log::warn!("Interrupted; playlists already synced keep their state");
                    std::process::exit(130);
                }
            };

            print_summary(&summary);
            if summary.has_failures() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn run_sync(config: &Config, args: &SyncArgs) -> Result<SyncSummary> {
    let index_path = config.track_index_path();
    let tracks = TrackIndex::load(&index_path)?;
    log::debug!("Track index has {} track(s)", tracks.len());

    let state_path = config.state_path()?;
    let legacy_path = config.legacy_state_path();
    let state = StateStore::open(&state_path, Some(&legacy_path), !args.pretend)?;
    log::debug!("Playlist state at {}", state.path().display());

    let remote_config = config.remote();
    let token = args.token.clone().or_else(|| remote_config.token.clone());
    let remote = RemoteHttpAdapter::new(config.remote_url()?, token, remote_config.retries);

    let layout = LocalLayout {
        playlist_dir: config.playlist_dir(),
        library_dir: config.library_dir(),
        relative_to: config.relative_to(),
    };
    let options = SyncOptions {
        direction: args.direction(),
        propagate_deletions: args.delete,
        pretend: args.pretend,
        concurrent_inserts: config.concurrent_inserts(),
        concurrency: config.concurrency(),
    };

    let service = PlaylistSyncService::new(remote, tracks, state, layout, options);
    Ok(service.sync(&args.names).await)
}

fn print_summary(summary: &SyncSummary) {
    if summary.reports.is_empty() {
        println!("No playlists to sync");
        return;
    }
    for report in &summary.reports {
        println!("{}: {}", report.name, report.outcome);
        for notice in &report.notices {
            println!("    {}", notice);
        }
    }

    let conflicts = summary
        .reports
        .iter()
        .filter(|report| report.outcome == Outcome::MergedConflict)
        .count();
    if conflicts > 0 {
        println!(
            "{} playlist(s) have conflicts; edit the marked sections and run sync again",
            conflicts
        );
    }
}
