use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config::LauncherConfig;
use crate::engine::models::{SyncOutcome, SyncReport};
use crate::engine::state::{AppState, UserAction};
use crate::error::LauncherError;
use crate::identity::Identity;
use crate::networking::NetworkClient;
use crate::process::ProcessLauncher;
use crate::storage::StorageManager;
use crate::sync::{Reconciler, SyncEvent, SyncPhase};
use crate::util::progress_percent;

pub mod models;
pub mod state;

pub struct LauncherEngine {
    pub state: AppState,
    config: LauncherConfig,
    reconciler: Reconciler,
    storage: StorageManager,
    process: ProcessLauncher,
}

impl LauncherEngine {
    pub fn new(config: LauncherConfig, storage: StorageManager, process: ProcessLauncher) -> Self {
        let network = NetworkClient::new(config.request_timeout(), config.download_timeout());
        let reconciler = Reconciler::new(&config, network);
        Self {
            state: AppState::Initialising,
            config,
            reconciler,
            storage,
            process,
        }
    }

    pub async fn handle_action(
        &mut self,
        action: UserAction,
        updates: &mpsc::UnboundedSender<AppState>,
    ) -> Result<(), LauncherError> {
        match action {
            UserAction::Synchronize => {
                info!("action: Synchronize");
                self.bootstrap(updates).await;
                Ok(())
            }
            UserAction::SkipSync => {
                info!("action: SkipSync");
                let state = AppState::Degraded {
                    version: self.config.version_id(),
                    reason: "synchronization skipped".into(),
                };
                self.set_state(state, updates);
                Ok(())
            }
            UserAction::ClickPlay { player_name } => {
                info!("action: ClickPlay");
                self.play(player_name, updates).await
            }
        }
    }

    /// Reconcile the mods directory, streaming progress as `AppState` updates.
    pub async fn bootstrap(&mut self, updates: &mpsc::UnboundedSender<AppState>) -> SyncReport {
        info!("bootstrap: starting mod synchronization");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconciler = &mut self.reconciler;
        let run = async move {
            let report = reconciler.run(&tx).await;
            drop(tx);
            report
        };
        let forward = async {
            while let Some(event) = rx.recv().await {
                if let Some(state) = state_for_event(event) {
                    updates.send(state).ok();
                }
            }
        };
        let (report, ()) = tokio::join!(run, forward);
        debug!("bootstrap: reconciler ended in {:?}", self.reconciler.phase());

        let version = self.config.version_id();
        let state = match &report.outcome {
            SyncOutcome::Ready => {
                info!("bootstrap: mods up to date, ready to play {version}");
                AppState::ReadyToPlay { version }
            }
            SyncOutcome::Degraded(reason) => {
                for failure in &report.deletion_failures {
                    warn!("bootstrap: could not remove {}: {}", failure.name, failure.reason);
                }
                warn!("bootstrap: continuing with local mods: {reason}");
                AppState::Degraded {
                    version,
                    reason: reason.clone(),
                }
            }
        };
        self.set_state(state, updates);
        report
    }

    async fn play(
        &mut self,
        player_name: Option<String>,
        updates: &mpsc::UnboundedSender<AppState>,
    ) -> Result<(), LauncherError> {
        if !self.state.can_launch() {
            warn!("play: ignored while state is {:?}", self.state);
            return Err(LauncherError::Launch(
                "mods are still being synchronized".into(),
            ));
        }

        let name = match player_name {
            Some(name) => Some(name),
            None => self.storage.read_player_name().await,
        };
        let identity = match Identity::from_name(name.as_deref().unwrap_or_default()) {
            Ok(identity) => identity,
            Err(err) => {
                // Stay launchable so the user can retry with a name.
                warn!("play: {err}");
                updates.send(AppState::Error(err.to_string())).ok();
                return Err(err);
            }
        };

        self.set_state(AppState::Launching, updates);
        match self.process.launch(&self.config, &identity) {
            Ok(_child) => {
                if let Err(err) = self.storage.write_player_name(&identity.username).await {
                    warn!("play: unable to remember player name: {err}");
                }
                self.set_state(AppState::Playing, updates);
                info!("game launched successfully");
                Ok(())
            }
            Err(err) => {
                self.set_state(AppState::Error(format!("Error starting Minecraft: {err}")), updates);
                error!("launch failed: {err}");
                Err(err)
            }
        }
    }

    fn set_state(&mut self, state: AppState, updates: &mpsc::UnboundedSender<AppState>) {
        debug!("engine: state -> {:?}", state);
        self.state = state.clone();
        updates.send(state).ok();
    }
}

fn state_for_event(event: SyncEvent) -> Option<AppState> {
    match event {
        SyncEvent::Phase(SyncPhase::Fetching) => Some(AppState::FetchingManifest),
        SyncEvent::Phase(_) => None,
        SyncEvent::Deleted { name } => Some(AppState::Deleting { file: name }),
        SyncEvent::DeleteFailed { name, reason } => {
            debug!("engine: keeping {name} for now: {reason}");
            None
        }
        SyncEvent::Checking { name } => Some(AppState::Verifying { file: name }),
        SyncEvent::Downloading {
            name,
            downloaded,
            total,
            speed,
        } => Some(AppState::Downloading {
            file: name,
            progress: progress_percent(downloaded, total),
            speed,
        }),
        SyncEvent::EntryDone {
            name,
            completed,
            total,
            ..
        } => Some(AppState::EntryDone {
            file: name,
            completed,
            total,
        }),
    }
}
