use crate::http::{StreamError, build_client, stream_to_file};
use crate::platform::MediaPlatform;
use crate::platform::config::{API_TOKEN, LIST_PAGE_SIZE, SERVER_ADDRESS, api_root};
use crate::platform::models::{
    BulkImageEntry, DatasetInfo, HashEntry, ImageInfo, ListPage, NameFilter, ProjectInfo, TeamInfo,
    WorkspaceInfo,
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{
    Client, Response, StatusCode,
    multipart::{Form, Part},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("missing SERVER_ADDRESS or API_TOKEN in env")]
    MissingCredentials,
    #[error("{method} request failed: {message}")]
    Request {
        method: &'static str,
        message: String,
    },
    #[error("{method} returned HTTP {status}: {body}")]
    Status {
        method: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{method} invalid response: {message}")]
    Deserialize {
        method: &'static str,
        message: String,
    },
    #[error("unable to read {path}: {message}")]
    LocalFile { path: String, message: String },
    #[error("names and paths differ in length ({names} != {paths})")]
    MismatchedBatch { names: usize, paths: usize },
    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[derive(Debug, Clone)]
pub struct PlatformClient {
    api_root: String,
    token: String,
    http: Client,
}

impl PlatformClient {
    pub fn new(server_address: &str, token: &str) -> Result<Self, PlatformError> {
        if server_address.trim().is_empty() || token.trim().is_empty() {
            return Err(PlatformError::MissingCredentials);
        }
        Ok(Self {
            api_root: api_root(server_address),
            token: token.to_string(),
            http: build_client(),
        })
    }

    pub fn from_env() -> Result<Self, PlatformError> {
        Self::new(&SERVER_ADDRESS, &API_TOKEN)
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_root)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: &'static str,
        body: &B,
    ) -> Result<Response, PlatformError> {
        self.http
            .post(self.url(method))
            .header("x-api-key", &self.token)
            .json(body)
            .send()
            .await
            .map_err(|err| PlatformError::Request {
                method,
                message: err.to_string(),
            })
    }

    async fn call<B, R>(&self, method: &'static str, body: &B) -> Result<R, PlatformError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = check_status(method, self.send(method, body).await?).await?;
        response
            .json::<R>()
            .await
            .map_err(|err| PlatformError::Deserialize {
                method,
                message: err.to_string(),
            })
    }

    /// Like [`call`](Self::call) but maps a 404 or a null body to `None`.
    async fn call_optional<B, R>(
        &self,
        method: &'static str,
        body: &B,
    ) -> Result<Option<R>, PlatformError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(method, body).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(method, response).await?;
        response
            .json::<Option<R>>()
            .await
            .map_err(|err| PlatformError::Deserialize {
                method,
                message: err.to_string(),
            })
    }

    async fn list_all<T: DeserializeOwned>(
        &self,
        method: &'static str,
        mut body: Value,
    ) -> Result<Vec<T>, PlatformError> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            body["page"] = json!(page);
            body["per_page"] = json!(LIST_PAGE_SIZE);
            let batch: ListPage<T> = self.call(method, &body).await?;
            let received = batch.entities.len();
            items.extend(batch.entities);
            if received == 0 || page >= batch.pages_count {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    async fn first_by_name<T: DeserializeOwned>(
        &self,
        method: &'static str,
        parent_field: &'static str,
        parent_id: u64,
        name: &str,
    ) -> Result<Option<T>, PlatformError> {
        let mut body = json!({ "filter": NameFilter::equals(name) });
        body[parent_field] = json!(parent_id);
        let mut found: Vec<T> = self.list_all(method, body).await?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    async fn known_hashes(&self, hashes: &[String]) -> Result<HashSet<String>, PlatformError> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }
        let found: Vec<HashEntry> = self.call("images.internal.hashes.list", hashes).await?;
        Ok(found.into_iter().map(|entry| entry.hash).collect())
    }

    async fn upload_contents(&self, contents: Vec<(String, Vec<u8>)>) -> Result<(), PlatformError> {
        const METHOD: &str = "images.bulk.upload";
        let mut form = Form::new();
        for (idx, (hash, bytes)) in contents.into_iter().enumerate() {
            let part = Part::bytes(bytes)
                .file_name(hash)
                .mime_str("application/octet-stream")
                .map_err(|err| PlatformError::Request {
                    method: METHOD,
                    message: err.to_string(),
                })?;
            form = form.part(format!("{idx}-file"), part);
        }
        let response = self
            .http
            .post(self.url(METHOD))
            .header("x-api-key", &self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|err| PlatformError::Request {
                method: METHOD,
                message: err.to_string(),
            })?;
        check_status(METHOD, response).await?;
        Ok(())
    }
}

async fn check_status(method: &'static str, response: Response) -> Result<Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::Status {
        method,
        status,
        body,
    })
}

/// Content hash in the form the platform indexes images by.
pub fn content_hash(bytes: &[u8]) -> String {
    BASE64.encode(Sha256::digest(bytes))
}

#[async_trait]
impl MediaPlatform for PlatformClient {
    async fn team_info(&self, id: u64) -> Result<Option<TeamInfo>, PlatformError> {
        self.call_optional("teams.info", &json!({ "id": id })).await
    }

    async fn workspace_info(&self, id: u64) -> Result<Option<WorkspaceInfo>, PlatformError> {
        self.call_optional("workspaces.info", &json!({ "id": id }))
            .await
    }

    async fn workspace_by_name(
        &self,
        team_id: u64,
        name: &str,
    ) -> Result<Option<WorkspaceInfo>, PlatformError> {
        self.first_by_name("workspaces.list", "teamId", team_id, name)
            .await
    }

    async fn create_workspace(
        &self,
        team_id: u64,
        name: &str,
    ) -> Result<WorkspaceInfo, PlatformError> {
        self.call(
            "workspaces.add",
            &json!({ "teamId": team_id, "name": name, "description": "" }),
        )
        .await
    }

    async fn project_by_name(
        &self,
        workspace_id: u64,
        name: &str,
    ) -> Result<Option<ProjectInfo>, PlatformError> {
        self.first_by_name("projects.list", "workspaceId", workspace_id, name)
            .await
    }

    async fn create_project(
        &self,
        workspace_id: u64,
        name: &str,
    ) -> Result<ProjectInfo, PlatformError> {
        self.call(
            "projects.add",
            &json!({ "workspaceId": workspace_id, "name": name, "type": "images" }),
        )
        .await
    }

    async fn dataset_by_name(
        &self,
        project_id: u64,
        name: &str,
    ) -> Result<Option<DatasetInfo>, PlatformError> {
        self.first_by_name("datasets.list", "projectId", project_id, name)
            .await
    }

    async fn create_dataset(
        &self,
        project_id: u64,
        name: &str,
    ) -> Result<DatasetInfo, PlatformError> {
        self.call(
            "datasets.add",
            &json!({ "projectId": project_id, "name": name }),
        )
        .await
    }

    async fn list_images(&self, dataset_id: u64) -> Result<Vec<ImageInfo>, PlatformError> {
        self.list_all("images.list", json!({ "datasetId": dataset_id }))
            .await
    }

    async fn upload_image_paths(
        &self,
        dataset_id: u64,
        names: &[String],
        paths: &[PathBuf],
    ) -> Result<Vec<ImageInfo>, PlatformError> {
        if names.len() != paths.len() {
            return Err(PlatformError::MismatchedBatch {
                names: names.len(),
                paths: paths.len(),
            });
        }
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut hashed = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes =
                tokio::fs::read(path)
                    .await
                    .map_err(|err| PlatformError::LocalFile {
                        path: path.display().to_string(),
                        message: err.to_string(),
                    })?;
            hashed.push((content_hash(&bytes), bytes));
        }

        let hashes: Vec<String> = hashed.iter().map(|(hash, _)| hash.clone()).collect();
        let known = self.known_hashes(&hashes).await?;
        let mut seen = HashSet::new();
        let missing: Vec<(String, Vec<u8>)> = hashed
            .into_iter()
            .filter(|(hash, _)| !known.contains(hash) && seen.insert(hash.clone()))
            .collect();
        debug!(
            target = "upc_import.platform",
            dataset_id,
            total = names.len(),
            new_contents = missing.len(),
            "uploading image batch"
        );
        if !missing.is_empty() {
            self.upload_contents(missing).await?;
        }

        let images: Vec<BulkImageEntry> = names
            .iter()
            .zip(hashes)
            .map(|(name, hash)| BulkImageEntry {
                title: name.clone(),
                hash,
            })
            .collect();
        self.call(
            "images.bulk.add",
            &json!({ "datasetId": dataset_id, "images": images }),
        )
        .await
    }

    async fn download_file(
        &self,
        team_id: u64,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), PlatformError> {
        const METHOD: &str = "file-storage.download";
        let response = self
            .send(METHOD, &json!({ "teamId": team_id, "path": remote_path }))
            .await?;
        let response = check_status(METHOD, response).await?;
        let bytes = stream_to_file(response, local_path).await?;
        debug!(target = "upc_import.platform", team_id, remote_path = %remote_path, bytes, "downloaded team file");
        Ok(())
    }
}
