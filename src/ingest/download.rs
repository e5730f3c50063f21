//! Streaming payload download.
//!
//! Payloads stream into a hidden `.<name>.part` file next to their final location and
//! are renamed into place only once the byte count checks out, so a file under its
//! final name is always complete.

use crate::validation::{payload_filename, validate_payload_size, PayloadError};
use async_trait::async_trait;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(u16),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("truncated download: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path, source: std::io::Error) -> DownloadError {
    DownloadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Fetches a payload to local storage and returns where it landed. The returned path
/// always names a complete file.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PathBuf, DownloadError>;
}

pub struct HttpDownloader {
    client: reqwest::Client,
    dir: PathBuf,
    max_bytes: u64,
}

impl HttpDownloader {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration, max_bytes: u64) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("postbox/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            dir: dir.into(),
            max_bytes,
        })
    }

    async fn stream_to(&self, mut response: reqwest::Response, part: &Path) -> Result<u64, DownloadError> {
        let mut file = fs::File::create(part).await.map_err(|e| io_error(part, e))?;
        let mut received: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            received += chunk.len() as u64;
            if received > self.max_bytes {
                return Err(PayloadError::SizeExceeded {
                    limit: self.max_bytes,
                }
                .into());
            }
            file.write_all(&chunk).await.map_err(|e| io_error(part, e))?;
        }
        file.flush().await.map_err(|e| io_error(part, e))?;
        file.sync_all().await.map_err(|e| io_error(part, e))?;
        Ok(received)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<PathBuf, DownloadError> {
        let name = payload_filename(url)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        let final_path = self.dir.join(&name);
        let part = self.dir.join(format!(".{}.part", name));

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }
        let expected = response.content_length();
        if let Some(len) = expected {
            validate_payload_size(len, self.max_bytes)?;
        }

        let received = match self.stream_to(response, &part).await {
            Ok(n) => n,
            Err(e) => {
                discard(&part).await;
                return Err(e);
            }
        };
        let verified = validate_payload_size(received, self.max_bytes)
            .map_err(DownloadError::from)
            .and_then(|_| match expected {
                Some(expected) if expected != received => Err(DownloadError::Truncated { expected, received }),
                _ => Ok(()),
            });
        if let Err(e) = verified {
            discard(&part).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&part, &final_path).await {
            discard(&part).await;
            return Err(io_error(&final_path, e));
        }
        debug!("downloaded {} bytes to {}", received, final_path.display());
        Ok(final_path)
    }
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("cannot remove partial download {}: {}", path.display(), e);
        }
    }
}
