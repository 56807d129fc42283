pub mod client;
pub mod config;
pub mod models;

pub use client::{PlatformClient, PlatformError};
pub use models::{DatasetInfo, ImageInfo, ProjectInfo, TeamInfo, WorkspaceInfo};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Operations the importer needs from the media platform.
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    async fn team_info(&self, id: u64) -> Result<Option<TeamInfo>, PlatformError>;
    async fn workspace_info(&self, id: u64) -> Result<Option<WorkspaceInfo>, PlatformError>;

    async fn workspace_by_name(
        &self,
        team_id: u64,
        name: &str,
    ) -> Result<Option<WorkspaceInfo>, PlatformError>;
    async fn create_workspace(&self, team_id: u64, name: &str)
    -> Result<WorkspaceInfo, PlatformError>;

    async fn project_by_name(
        &self,
        workspace_id: u64,
        name: &str,
    ) -> Result<Option<ProjectInfo>, PlatformError>;
    async fn create_project(
        &self,
        workspace_id: u64,
        name: &str,
    ) -> Result<ProjectInfo, PlatformError>;

    async fn dataset_by_name(
        &self,
        project_id: u64,
        name: &str,
    ) -> Result<Option<DatasetInfo>, PlatformError>;
    async fn create_dataset(&self, project_id: u64, name: &str)
    -> Result<DatasetInfo, PlatformError>;

    async fn list_images(&self, dataset_id: u64) -> Result<Vec<ImageInfo>, PlatformError>;

    /// Uploads local files as images named `names[i]`; the slices are parallel.
    async fn upload_image_paths(
        &self,
        dataset_id: u64,
        names: &[String],
        paths: &[PathBuf],
    ) -> Result<Vec<ImageInfo>, PlatformError>;

    /// Copies a file from the team file store to local disk.
    async fn download_file(
        &self,
        team_id: u64,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), PlatformError>;
}

pub async fn get_or_create_workspace<P: MediaPlatform + ?Sized>(
    api: &P,
    team_id: u64,
    name: &str,
) -> Result<WorkspaceInfo, PlatformError> {
    if let Some(existing) = api.workspace_by_name(team_id, name).await? {
        return Ok(existing);
    }
    info!(target = "upc_import.platform", team_id, name = %name, "creating workspace");
    api.create_workspace(team_id, name).await
}

pub async fn get_or_create_project<P: MediaPlatform + ?Sized>(
    api: &P,
    workspace_id: u64,
    name: &str,
) -> Result<ProjectInfo, PlatformError> {
    if let Some(existing) = api.project_by_name(workspace_id, name).await? {
        return Ok(existing);
    }
    info!(target = "upc_import.platform", workspace_id, name = %name, "creating project");
    api.create_project(workspace_id, name).await
}

pub async fn get_or_create_dataset<P: MediaPlatform + ?Sized>(
    api: &P,
    project_id: u64,
    name: &str,
) -> Result<DatasetInfo, PlatformError> {
    if let Some(existing) = api.dataset_by_name(project_id, name).await? {
        return Ok(existing);
    }
    info!(target = "upc_import.platform", project_id, name = %name, "creating dataset");
    api.create_dataset(project_id, name).await
}
