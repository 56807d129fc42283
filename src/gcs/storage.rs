use crate::models::ObjectPath;
use async_trait::async_trait;
use futures_util::StreamExt;
use gcloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
use gcloud_storage::client::{Client, ClientConfig};
use gcloud_storage::http::objects::download::Range;
use gcloud_storage::http::objects::get::GetObjectRequest;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum GcsError {
    #[error("unable to load service account key {path}: {message}")]
    Credentials { path: String, message: String },
    #[error("download of {path} failed: {message}")]
    Request { path: String, message: String },
    #[error("write to {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fetches objects from a cloud bucket into local files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, object: &ObjectPath, local: &Path) -> Result<u64, GcsError>;
}

pub struct GcsStorage {
    client: Client,
}

impl GcsStorage {
    /// Builds a client from a service-account key file.
    ///
    /// `GCS_ENDPOINT_URL` or `STORAGE_EMULATOR_HOST` point the client at an emulator;
    /// the key is not read in that case and requests go out anonymously.
    pub async fn from_key_file(path: &Path) -> Result<Self, GcsError> {
        let config = match endpoint_override() {
            Some(endpoint) => {
                info!(target = "upc_import.gcs", endpoint = %endpoint, "using custom storage endpoint");
                ClientConfig {
                    storage_endpoint: endpoint,
                    ..ClientConfig::default()
                }
                .anonymous()
            }
            None => {
                let credentials_err = |err: &dyn std::fmt::Display| GcsError::Credentials {
                    path: path.display().to_string(),
                    message: err.to_string(),
                };
                let credentials = CredentialsFile::new_from_file(path.display().to_string())
                    .await
                    .map_err(|err| credentials_err(&err))?;
                ClientConfig::default()
                    .with_credentials(credentials)
                    .await
                    .map_err(|err| credentials_err(&err))?
            }
        };
        debug!(target = "upc_import.gcs", "storage client ready");
        Ok(Self {
            client: Client::new(config),
        })
    }
}

#[async_trait]
impl ObjectStore for GcsStorage {
    async fn download(&self, object: &ObjectPath, local: &Path) -> Result<u64, GcsError> {
        let request_err = |err: gcloud_storage::http::Error| GcsError::Request {
            path: object.to_string(),
            message: err.to_string(),
        };
        let io_err = |source| GcsError::Io {
            path: local.display().to_string(),
            source,
        };

        let stream = self
            .client
            .download_streamed_object(&object_request(object), &Range::default())
            .await
            .map_err(request_err)?;
        let mut stream = std::pin::pin!(stream);

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = tokio::fs::File::create(local).await.map_err(io_err)?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(request_err)?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;

        debug!(target = "upc_import.gcs", object = %object, bytes = written, "downloaded object");
        Ok(written)
    }
}

fn object_request(object: &ObjectPath) -> GetObjectRequest {
    GetObjectRequest {
        bucket: object.bucket.clone(),
        object: object.key.clone(),
        ..Default::default()
    }
}

fn endpoint_override() -> Option<String> {
    std::env::var("GCS_ENDPOINT_URL")
        .ok()
        .or_else(|| std::env::var("STORAGE_EMULATOR_HOST").ok().map(|host| emulator_url(&host)))
}

// STORAGE_EMULATOR_HOST is usually a bare host:port.
fn emulator_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}
