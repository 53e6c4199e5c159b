use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{LauncherError, io_err};
use crate::util::format_speed;

/// What landed on disk after a streamed download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Downloaded {
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl NetworkClient {
    pub fn new(request_timeout: Duration, download_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .user_agent(concat!("zmods-launcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self {
            client,
            request_timeout,
            download_timeout,
        }
    }

    /// Single-attempt GET returning the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, LauncherError> {
        debug!("network: GET {url}");
        let resp = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| LauncherError::network(url, e))?
            .error_for_status()
            .map_err(|e| LauncherError::network(url, e))?;
        resp.text()
            .await
            .map_err(|e| LauncherError::network(url, format!("body error: {e}")))
    }

    /// Download a file to `dest`, hashing it on the way, and call `progress`
    /// with (downloaded, total, speed_text).
    pub async fn download_to_path<F>(
        &self,
        url: &str,
        dest: &Path,
        mut progress: F,
    ) -> Result<Downloaded, LauncherError>
    where
        F: FnMut(u64, Option<u64>, &str),
    {
        let response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| LauncherError::network(url, e))?
            .error_for_status()
            .map_err(|e| LauncherError::network(url, e))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        let mut file = File::create(dest).await.map_err(|e| io_err(dest, e))?;

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut last_tick = Instant::now();
        let mut last_bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| LauncherError::network(url, format!("stream error: {e}")))?;
            file.write_all(&chunk).await.map_err(|e| io_err(dest, e))?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            let since = last_tick.elapsed().as_secs_f32();
            if since > 0.2 {
                let speed = (downloaded - last_bytes) as f32 / since;
                progress(downloaded, total, &format_speed(speed));
                last_tick = Instant::now();
                last_bytes = downloaded;
            }
        }

        // Final callback.
        progress(downloaded, total, "0 B/s");

        file.flush().await.map_err(|e| io_err(dest, e))?;

        if let Some(total) = total
            && downloaded < total
        {
            return Err(LauncherError::network(
                url,
                format!("download incomplete: received {downloaded} of {total} bytes"),
            ));
        }

        Ok(Downloaded {
            bytes: downloaded,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }
}
