use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::{LauncherError, io_err};

const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/zmods/launcher-server/main/minecraft/manifest.json";

/// Everything the launcher needs to know, built once at startup and passed by
/// reference to the engine, reconciler, and process launcher.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LauncherConfig {
    pub launcher_name: String,
    pub manifest_url: String,
    pub game_dir: PathBuf,
    pub mods_subdir: String,
    pub managed_extension: String,
    pub minecraft_version: String,
    pub loader_version: String,
    pub java_path: Option<PathBuf>,
    pub jvm_arguments: Vec<String>,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub concurrency: usize,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            launcher_name: "ZMODS".into(),
            manifest_url: DEFAULT_MANIFEST_URL.into(),
            game_dir: env::game_dir(&env::default_app_dir()),
            mods_subdir: "mods".into(),
            managed_extension: "jar".into(),
            minecraft_version: "1.20.1".into(),
            loader_version: "47.3.0".into(),
            java_path: None,
            jvm_arguments: vec!["-Xmx4G".into(), "-Xms2G".into()],
            request_timeout_secs: 30,
            download_timeout_secs: 600,
            concurrency: 1,
        }
    }
}

/// Values given on the command line; each one wins over the config file.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub manifest_url: Option<String>,
    pub game_dir: Option<PathBuf>,
    pub java_path: Option<PathBuf>,
    pub concurrency: Option<usize>,
}

impl LauncherConfig {
    /// Load `path` on top of the defaults. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, LauncherError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("config: {} not found; using defaults", path.display());
                return Ok(Self::default());
            }
            Err(err) => return Err(io_err(path, err)),
        };
        let config: LauncherConfig = serde_json::from_str(&raw)
            .map_err(|e| LauncherError::Parse(format!("{}: {e}", path.display())))?;
        info!("config: loaded {}", path.display());
        Ok(config)
    }

    pub fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(url) = overrides.manifest_url {
            self.manifest_url = url;
        }
        if let Some(dir) = overrides.game_dir {
            self.game_dir = dir;
        }
        if let Some(java) = overrides.java_path {
            self.java_path = Some(java);
        }
        if let Some(concurrency) = overrides.concurrency {
            self.concurrency = concurrency;
        }
        self.concurrency = self.concurrency.max(1);
        self
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.game_dir.join(&self.mods_subdir)
    }

    /// Installed version profile to launch, e.g. `1.20.1-forge-47.3.0`.
    pub fn version_id(&self) -> String {
        format!(
            "{}-forge-{}",
            self.minecraft_version, self.loader_version
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Case-insensitive extension match; `extension` has no leading dot.
pub fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
