use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{LauncherError, io_err};

const BLOCK_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of the file at `path`, read in fixed-size blocks.
pub fn sha256_file(path: &Path) -> Result<String, LauncherError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let read = file.read(&mut buf).map_err(|e| io_err(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// [`sha256_file`] on the blocking pool.
pub async fn sha256_file_async(path: PathBuf) -> Result<String, LauncherError> {
    let display = path.clone();
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(|e| io_err(display, std::io::Error::other(e)))?
}
