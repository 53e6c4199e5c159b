use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::{error, warn};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{Mutex, mpsc};

use crate::config::{ConfigOverrides, LauncherConfig};
use crate::engine::LauncherEngine;
use crate::engine::state::{AppState, UserAction};
use crate::error::LauncherError;
use crate::process::{ProcessLauncher, VersionProfileBuilder};
use crate::storage::StorageManager;
use crate::ui::TerminalReporter;

mod config;
mod engine;
mod env;
mod error;
mod identity;
mod networking;
mod process;
mod storage;
mod sync;
mod ui;
mod util;

#[cfg(test)]
mod test_support;

const EXIT_LAUNCH_FAILED: u8 = 1;
const EXIT_NO_PLAYER_NAME: u8 = 2;
const EXIT_SYNC_DEGRADED: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    name = "ZMODS Launcher",
    author,
    version,
    about = "Keeps the server's mod set in sync and starts Minecraft Forge"
)]
struct Cli {
    /// Read settings from this JSON file instead of the one in the app directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Manifest listing the mods the server expects.
    #[arg(long)]
    manifest_url: Option<String>,

    /// Minecraft directory holding versions/, libraries/ and mods/.
    #[arg(long)]
    game_dir: Option<PathBuf>,

    /// Java executable used to start the game.
    #[arg(long)]
    java: Option<PathBuf>,

    /// Player name; defaults to the last one used.
    #[arg(short = 'u', long)]
    player_name: Option<String>,

    /// Number of mods verified or downloaded at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Play with whatever mods are already installed.
    #[arg(long, conflicts_with = "sync_only")]
    skip_sync: bool,

    /// Synchronize mods and exit without starting the game.
    #[arg(long)]
    sync_only: bool,

    /// Print launcher version and exit.
    #[arg(long)]
    version_only: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.version_only {
        println!("ZMODS Launcher {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let Some(runtime) = build_runtime() else {
        return ExitCode::from(EXIT_LAUNCH_FAILED);
    };
    runtime.block_on(run(cli))
}

fn build_runtime() -> Option<Runtime> {
    match Runtime::new() {
        Ok(rt) => Some(rt),
        Err(err) => {
            warn!(
                "main: failed to create multithreaded runtime ({}); trying single-threaded runtime",
                err
            );
            match Builder::new_current_thread().enable_all().build() {
                Ok(rt) => Some(rt),
                Err(fallback_err) => {
                    error!("main: failed to create any Tokio runtime ({})", fallback_err);
                    None
                }
            }
        }
    }
}

async fn run(cli: Cli) -> ExitCode {
    let app_dir = env::default_app_dir();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| env::config_path(&app_dir));
    let config = match LauncherConfig::load(&config_path) {
        Ok(config) => config.apply(ConfigOverrides {
            manifest_url: cli.manifest_url.clone(),
            game_dir: cli.game_dir.clone(),
            java_path: cli.java.clone(),
            concurrency: cli.concurrency,
        }),
        Err(err) => {
            error!("main: {err}");
            eprintln!("{err}");
            return ExitCode::from(EXIT_LAUNCH_FAILED);
        }
    };
    if let Err(err) = env::ensure_base_dirs(&app_dir, &config.mods_dir()) {
        warn!("main: unable to create launcher folders: {err}");
    }
    println!("{}", config.launcher_name);

    let process = ProcessLauncher::new(Arc::new(VersionProfileBuilder), app_dir.clone());
    let engine = LauncherEngine::new(config, StorageManager::new(app_dir), process);
    let engine = Arc::new(Mutex::new(engine));
    let mut ui = TerminalReporter::new();
    ui.render(&AppState::Initialising);

    let first = if cli.skip_sync {
        UserAction::SkipSync
    } else {
        UserAction::Synchronize
    };
    // The task owns the only sender, so `follow` ends if the task dies.
    let (sync_tx, mut sync_rx) = mpsc::unbounded_channel();
    let sync_engine = engine.clone();
    let sync_task = tokio::spawn(async move {
        let mut locked = sync_engine.lock().await;
        locked.handle_action(first, &sync_tx).await
    });

    let synced = ui.follow(&mut sync_rx, AppState::can_launch).await;
    if let Err(err) = sync_task.await {
        error!("main: synchronization task failed: {err}");
        return ExitCode::from(EXIT_LAUNCH_FAILED);
    }
    let Some(synced) = synced.filter(AppState::can_launch) else {
        return ExitCode::from(EXIT_LAUNCH_FAILED);
    };

    if cli.sync_only {
        return match synced {
            AppState::ReadyToPlay { .. } => ExitCode::SUCCESS,
            _ => ExitCode::from(EXIT_SYNC_DEGRADED),
        };
    }

    let play = UserAction::ClickPlay {
        player_name: cli.player_name,
    };
    let (play_tx, mut play_rx) = mpsc::unbounded_channel();
    let play_task = tokio::spawn(async move {
        let mut locked = engine.lock().await;
        locked.handle_action(play, &play_tx).await
    });
    let result = play_task.await;
    while let Ok(state) = play_rx.try_recv() {
        ui.render(&state);
    }

    match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(LauncherError::AuthInput)) => {
            eprintln!("Pass --player-name to choose a name.");
            ExitCode::from(EXIT_NO_PLAYER_NAME)
        }
        Ok(Err(_)) => ExitCode::from(EXIT_LAUNCH_FAILED),
        Err(err) => {
            error!("main: launch task failed: {err}");
            ExitCode::from(EXIT_LAUNCH_FAILED)
        }
    }
}
