use reqwest::{Client, Response};
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

// Image transfers are large and sequential, so the request timeout is generous.
pub fn build_client() -> Client {
    let timeout = env_secs("HTTP_TIMEOUT_SECS").unwrap_or(300);
    let connect = env_secs("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(10);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("body read failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("write to {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Writes a response body to `path` chunk by chunk, creating parent directories.
pub async fn stream_to_file(mut response: Response, path: &Path) -> Result<u64, StreamError> {
    let io_err = |source| StreamError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;
    Ok(written)
}
