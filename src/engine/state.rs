// The central source of truth for the front end.
#[derive(Clone, Debug, PartialEq)]
pub enum AppState {
    Initialising,
    FetchingManifest,
    Deleting {
        file: String,
    },
    Verifying {
        file: String,
    },
    Downloading {
        file: String,
        progress: f32,
        speed: String,
    },
    EntryDone {
        file: String,
        completed: usize,
        total: usize,
    },
    ReadyToPlay {
        version: String,
    },
    Degraded {
        version: String,
        reason: String,
    },
    Launching,
    Playing,
    Error(String),
}

impl AppState {
    /// Sync is finished one way or another and launch may be attempted.
    pub fn can_launch(&self) -> bool {
        matches!(
            self,
            AppState::ReadyToPlay { .. } | AppState::Degraded { .. }
        )
    }

    pub fn status_text(&self) -> String {
        match self {
            AppState::Initialising => "Welcome!".into(),
            AppState::FetchingManifest => "Checking for mod updates...".into(),
            AppState::Deleting { file } => format!("Removing {file}..."),
            AppState::Verifying { file } => format!("Verifying {file}..."),
            AppState::Downloading { file, .. } => format!("Downloading {file}..."),
            AppState::EntryDone {
                completed, total, ..
            } => format!("{completed}/{total} mods checked"),
            AppState::ReadyToPlay { .. } => "All set, ready to play!".into(),
            AppState::Degraded { reason, .. } => {
                format!("Update failed, check your connection. ({reason})")
            }
            AppState::Launching => "Starting Minecraft...".into(),
            AppState::Playing => "Minecraft started.".into(),
            AppState::Error(msg) => msg.clone(),
        }
    }
}

// Actions triggered by the user from the front end.
#[derive(Clone, Debug)]
pub enum UserAction {
    Synchronize,
    SkipSync,
    ClickPlay { player_name: Option<String> },
}
