use std::path::{Path, PathBuf};

use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::http::build_http_client;
use crate::core::provision::Checksum;

/// Checksum-verified downloader. Payloads are held in memory: they are
/// handed straight to the cache store. Parallelism comes from the executor
/// running several provision stages at once.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> PipelineResult<Self> {
        Ok(Self {
            client: build_http_client()?,
        })
    }

    /// Fetch `url`, verifying the body against `checksum` before returning
    /// it. A mismatch is an `Integrity` error; nothing is returned.
    pub async fn fetch(&self, url: &str, checksum: Option<&Checksum>) -> PipelineResult<Vec<u8>> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        if let Some(expected) = checksum {
            expected.verify(url, &bytes)?;
        }
        debug!("Fetched {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }
}

/// Read a local file, verifying it against `checksum`.
pub async fn read_verified(path: &Path, checksum: Option<&Checksum>) -> PipelineResult<Vec<u8>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    if let Some(expected) = checksum {
        expected.verify(&path.display().to_string(), &bytes)?;
    }
    Ok(bytes)
}

/// Write `bytes` to `dest`, creating parent directories. The handle is
/// flushed and dropped before returning.
pub async fn write_file(dest: &Path, bytes: &[u8]) -> PipelineResult<PathBuf> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::io(parent, e))?;
    }
    {
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| PipelineError::io(dest, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| PipelineError::io(dest, e))?;
        file.flush().await.map_err(|e| PipelineError::io(dest, e))?;
    }
    Ok(dest.to_path_buf())
}
