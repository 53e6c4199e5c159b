use std::path::PathBuf;

use tokio::fs;

use crate::error::{LauncherError, io_err};
use crate::identity::sanitize_player_name;

const PLAYER_NAME_FILE: &str = "player_name.txt";

#[derive(Clone)]
pub struct StorageManager {
    base_dir: PathBuf,
}

impl StorageManager {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Last name used for a successful launch, if any.
    pub async fn read_player_name(&self) -> Option<String> {
        let path = self.base_dir.join(PLAYER_NAME_FILE);
        fs::read(&path)
            .await
            .ok()
            .and_then(|bytes| sanitize_player_name(&String::from_utf8_lossy(&bytes)))
    }

    pub async fn write_player_name(&self, name: &str) -> Result<(), LauncherError> {
        let path = self.base_dir.join(PLAYER_NAME_FILE);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        fs::write(&path, name.as_bytes())
            .await
            .map_err(|e| io_err(&path, e))
    }
}
