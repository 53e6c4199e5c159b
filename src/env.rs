use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "zmods-launcher";

/// Returns the root directory used by the launcher.
pub fn default_app_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".local").join("share")),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR_NAME)
}

pub fn game_dir(app_dir: &Path) -> PathBuf {
    app_dir.join("game")
}

pub fn runtime_dir(app_dir: &Path) -> PathBuf {
    app_dir.join("runtime")
}

pub fn logs_dir(app_dir: &Path) -> PathBuf {
    app_dir.join("logs")
}

pub fn config_path(app_dir: &Path) -> PathBuf {
    app_dir.join("config.json")
}

/// Location of the `java` binary inside a JDK/JRE root.
pub fn java_binary(root: &Path) -> PathBuf {
    if cfg!(target_os = "windows") {
        root.join("bin").join("java.exe")
    } else {
        root.join("bin").join("java")
    }
}

/// Create the on-disk folder layout expected by the launcher.
pub fn ensure_base_dirs(app_dir: &Path, mods_dir: &Path) -> std::io::Result<()> {
    let folders = [
        app_dir.to_path_buf(),
        runtime_dir(app_dir),
        logs_dir(app_dir),
        mods_dir.to_path_buf(),
    ];

    for dir in folders {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
