use crate::catalog::Catalog;
use crate::config::{ImportConfig, InputFile};
use crate::gcs::{GcsError, GcsStorage, ObjectStore};
use crate::links::read_links;
use crate::models::{LinkRecord, StageReport};
use crate::plan::{ImportPlan, PlanError, PlannedImage, build_plan};
use crate::platform::{
    DatasetInfo, MediaPlatform, TeamInfo, get_or_create_dataset, get_or_create_project,
    get_or_create_workspace,
};
use crate::progress::Progress;
use serde::Serialize;
use serde_json::{Value, json};
use std::{
    collections::HashSet,
    future::Future,
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Runs the whole import against one platform team.
pub struct Importer<P> {
    platform: P,
    config: ImportConfig,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub uploaded: usize,
    pub skipped: usize,
    pub datasets: usize,
    pub stages: Vec<StageReport>,
}

/// Links and catalog loaded from scratch space.
#[derive(Debug)]
pub struct ImportInputs {
    pub links: Vec<LinkRecord>,
    pub catalog: Catalog,
}

impl<P: MediaPlatform> Importer<P> {
    pub fn new(platform: P, config: ImportConfig) -> Self {
        Self { platform, config }
    }

    pub async fn run(&self) -> Result<ImportSummary, PipelineError> {
        self.run_with(|key_path| async move { GcsStorage::from_key_file(&key_path).await })
            .await
    }

    /// Runs every stage, opening the object store from the fetched key file once the
    /// plan is known to be valid.
    pub async fn run_with<S, F, Fut>(&self, open_storage: F) -> Result<ImportSummary, PipelineError>
    where
        S: ObjectStore,
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<S, GcsError>>,
    {
        let mut stages = Vec::new();

        let team = self
            .capture_stage("validate_target", &mut stages, self.validate_target())
            .await?;
        self.capture_stage("fetch_inputs", &mut stages, self.fetch_inputs(team.id))
            .await?;
        let inputs = self
            .capture_stage("load_inputs", &mut stages, async { self.load_inputs() })
            .await?;
        let plan = self
            .capture_stage("build_plan", &mut stages, async {
                plan_stage(&inputs)
            })
            .await?;

        let storage = open_storage(self.config.gs_key_file().local)
            .await
            .map_err(|err| PipelineError::invalid_input("storage_auth", err.to_string()))?;

        let started = Instant::now();
        let mut summary = self.import_plan(team.id, &plan, &storage).await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed("upload", elapsed_ms);
        stages.push(StageReport::new(
            "upload",
            elapsed_ms,
            json!({
                "uploaded": summary.uploaded,
                "skipped": summary.skipped,
                "datasets": summary.datasets,
            }),
        ));
        stages.append(&mut summary.stages);
        summary.stages = stages;

        info!(
            target = "upc_import.pipeline",
            uploaded = summary.uploaded,
            skipped = summary.skipped,
            datasets = summary.datasets,
            "import finished"
        );
        Ok(summary)
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }

    /// The configured team and workspace must both exist.
    pub async fn validate_target(&self) -> Result<StageOutcome<TeamInfo>, PipelineError> {
        const STAGE: &str = "validate_target";
        let team_id = self.config.team_id;
        let team = self
            .platform
            .team_info(team_id)
            .await
            .map_err(|err| PipelineError::internal(STAGE, err.to_string()))?
            .ok_or_else(|| {
                PipelineError::invalid_input(STAGE, format!("Team with id={team_id} not found"))
            })?;

        let workspace_id = self.config.workspace_id;
        let workspace = self
            .platform
            .workspace_info(workspace_id)
            .await
            .map_err(|err| PipelineError::internal(STAGE, err.to_string()))?
            .ok_or_else(|| {
                PipelineError::invalid_input(
                    STAGE,
                    format!("Workspace with id={workspace_id} not found"),
                )
            })?;

        let output = json!({ "team": team.name, "workspace": workspace.name });
        Ok(StageOutcome::new(team, output))
    }

    pub async fn fetch_inputs(&self, team_id: u64) -> Result<StageOutcome<()>, PipelineError> {
        let files: [InputFile; 3] = [
            self.config.links_file(),
            self.config.catalog_file(),
            self.config.gs_key_file(),
        ];
        for file in &files {
            debug!(target = "upc_import.pipeline", remote = %file.remote, local = %file.local.display(), "fetching input");
            self.platform
                .download_file(team_id, &file.remote, &file.local)
                .await
                .map_err(|err| PipelineError::internal("fetch_inputs", err.to_string()))?;
        }
        let output = json!({
            "files": files.iter().map(|f| f.remote.as_str()).collect::<Vec<_>>(),
        });
        Ok(StageOutcome::new((), output))
    }

    pub fn load_inputs(&self) -> Result<StageOutcome<ImportInputs>, PipelineError> {
        const STAGE: &str = "load_inputs";
        let links = read_links(&self.config.links_file().local)
            .map_err(|err| PipelineError::invalid_input(STAGE, err.to_string()))?;
        info!(target = "upc_import.pipeline", count = links.len(), "Number of links");

        let catalog = Catalog::open(&self.config.catalog_file().local, &self.config.columns)
            .map_err(|err| PipelineError::invalid_input(STAGE, err.to_string()))?;
        info!(target = "upc_import.pipeline", size = catalog.len(), "Size of catalog");
        if catalog.is_empty() {
            warn!(target = "upc_import.pipeline", "catalog has no rows, every dataset falls back to unknown");
        }

        let output = json!({ "links": links.len(), "catalog_rows": catalog.len() });
        Ok(StageOutcome::new(ImportInputs { links, catalog }, output))
    }

    /// Creates the remote hierarchy for every plan group and uploads missing images.
    pub async fn import_plan<S: ObjectStore + ?Sized>(
        &self,
        team_id: u64,
        plan: &ImportPlan,
        storage: &S,
    ) -> Result<ImportSummary, PipelineError> {
        const STAGE: &str = "upload";
        let internal = |err: crate::platform::PlatformError| {
            PipelineError::internal(STAGE, err.to_string())
        };

        let mut progress = Progress::new("Processing", plan.total_links());
        let mut summary = ImportSummary::default();
        for group in plan.groups() {
            let workspace = get_or_create_workspace(&self.platform, team_id, group.category)
                .await
                .map_err(internal)?;
            let project = get_or_create_project(&self.platform, workspace.id, group.project)
                .await
                .map_err(internal)?;
            let dataset_name = plan.dataset_name(group.upc);
            let dataset = get_or_create_dataset(&self.platform, project.id, &dataset_name)
                .await
                .map_err(internal)?;

            self.upload_group(&dataset, group.links, storage, &mut progress, &mut summary)
                .await?;
            summary.datasets += 1;
        }
        Ok(summary)
    }

    async fn upload_group<S: ObjectStore + ?Sized>(
        &self,
        dataset: &DatasetInfo,
        links: &[PlannedImage],
        storage: &S,
        progress: &mut Progress,
        summary: &mut ImportSummary,
    ) -> Result<(), PipelineError> {
        const STAGE: &str = "upload";
        // Lets an interrupted import resume without duplicating images.
        let mut existing: HashSet<String> = self
            .platform
            .list_images(dataset.id)
            .await
            .map_err(|err| PipelineError::internal(STAGE, err.to_string()))?
            .into_iter()
            .map(|image| image.name)
            .collect();

        let temp_dir = self.config.temp_dir();
        for batch in links.chunks(self.config.batch_size) {
            let mut names: Vec<String> = Vec::with_capacity(batch.len());
            let mut temp = TempBatch::default();
            for image in batch {
                if existing.contains(&image.name) || names.contains(&image.name) {
                    summary.skipped += 1;
                    progress.iter_done();
                    continue;
                }
                let local = temp_dir.join(&image.name);
                temp.track(local.clone());
                storage
                    .download(&image.object, &local)
                    .await
                    .map_err(|err| PipelineError::internal(STAGE, err.to_string()))?;
                names.push(image.name.clone());
            }
            if names.is_empty() {
                continue;
            }

            let uploaded = self
                .platform
                .upload_image_paths(dataset.id, &names, temp.paths())
                .await;
            drop(temp);
            uploaded.map_err(|err| PipelineError::internal(STAGE, err.to_string()))?;

            crate::metrics::batch_uploaded(dataset.id, names.len());
            summary.uploaded += names.len();
            progress.iters_done(names.len());
            existing.extend(names);
        }
        Ok(())
    }
}

fn plan_stage(inputs: &ImportInputs) -> Result<StageOutcome<ImportPlan>, PipelineError> {
    let plan = build_plan(&inputs.links, &inputs.catalog)
        .map_err(|err: PlanError| PipelineError::invalid_input("build_plan", err.to_string()))?;
    let output = json!({ "groups": plan.group_count(), "links": plan.total_links() });
    Ok(StageOutcome::new(plan, output))
}

/// Local copies of one upload batch; removed on drop.
#[derive(Debug, Default)]
struct TempBatch {
    paths: Vec<PathBuf>,
}

impl TempBatch {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for TempBatch {
    fn drop(&mut self) {
        for path in &self.paths {
            silent_remove(path);
        }
    }
}

fn silent_remove(path: &Path) {
    if let Err(err) = std::fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        debug!(target = "upc_import.pipeline", path = %path.display(), error = %err, "temp file not removed");
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogRow;
    use crate::models::ObjectPath;
    use crate::platform::{ImageInfo, PlatformError, ProjectInfo, WorkspaceInfo};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeState {
        next_id: u64,
        workspaces: Vec<WorkspaceInfo>,
        projects: Vec<ProjectInfo>,
        datasets: Vec<DatasetInfo>,
        images: HashMap<u64, Vec<ImageInfo>>,
        upload_calls: Vec<(u64, Vec<String>)>,
        files: HashMap<String, Vec<u8>>,
    }

    #[derive(Default)]
    struct FakePlatform {
        state: Mutex<FakeState>,
        missing_team: bool,
        fail_upload: bool,
    }

    impl FakePlatform {
        fn uploads(&self) -> Vec<(u64, Vec<String>)> {
            self.state.lock().unwrap().upload_calls.clone()
        }

        fn seed_file(&self, remote: &str, bytes: impl Into<Vec<u8>>) {
            let mut state = self.state.lock().unwrap();
            state.files.insert(remote.into(), bytes.into());
        }

        fn seed_image(&self, dataset_id: u64, name: &str) {
            let mut state = self.state.lock().unwrap();
            state.images.entry(dataset_id).or_default().push(ImageInfo {
                id: 1000,
                name: name.into(),
                hash: None,
            });
        }

        fn seed_dataset(&self, workspace: &str, project: &str, dataset: &str) -> u64 {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let ws = WorkspaceInfo {
                id: state.next_id,
                name: workspace.into(),
                team_id: Some(4),
            };
            state.next_id += 1;
            let pr = ProjectInfo {
                id: state.next_id,
                name: project.into(),
                workspace_id: Some(ws.id),
            };
            state.next_id += 1;
            let ds = DatasetInfo {
                id: state.next_id,
                name: dataset.into(),
                project_id: Some(pr.id),
            };
            let id = ds.id;
            state.workspaces.push(ws);
            state.projects.push(pr);
            state.datasets.push(ds);
            id
        }
    }

    #[async_trait]
    impl MediaPlatform for FakePlatform {
        async fn team_info(&self, id: u64) -> Result<Option<TeamInfo>, PlatformError> {
            Ok((!self.missing_team).then(|| TeamInfo {
                id,
                name: "team".into(),
            }))
        }

        async fn workspace_info(&self, id: u64) -> Result<Option<WorkspaceInfo>, PlatformError> {
            Ok(Some(WorkspaceInfo {
                id,
                name: "home".into(),
                team_id: Some(4),
            }))
        }

        async fn workspace_by_name(
            &self,
            team_id: u64,
            name: &str,
        ) -> Result<Option<WorkspaceInfo>, PlatformError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .workspaces
                .iter()
                .find(|w| w.name == name && w.team_id == Some(team_id))
                .cloned())
        }

        async fn create_workspace(
            &self,
            team_id: u64,
            name: &str,
        ) -> Result<WorkspaceInfo, PlatformError> {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let info = WorkspaceInfo {
                id: state.next_id,
                name: name.into(),
                team_id: Some(team_id),
            };
            state.workspaces.push(info.clone());
            Ok(info)
        }

        async fn project_by_name(
            &self,
            workspace_id: u64,
            name: &str,
        ) -> Result<Option<ProjectInfo>, PlatformError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .projects
                .iter()
                .find(|p| p.name == name && p.workspace_id == Some(workspace_id))
                .cloned())
        }

        async fn create_project(
            &self,
            workspace_id: u64,
            name: &str,
        ) -> Result<ProjectInfo, PlatformError> {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let info = ProjectInfo {
                id: state.next_id,
                name: name.into(),
                workspace_id: Some(workspace_id),
            };
            state.projects.push(info.clone());
            Ok(info)
        }

        async fn dataset_by_name(
            &self,
            project_id: u64,
            name: &str,
        ) -> Result<Option<DatasetInfo>, PlatformError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .datasets
                .iter()
                .find(|d| d.name == name && d.project_id == Some(project_id))
                .cloned())
        }

        async fn create_dataset(
            &self,
            project_id: u64,
            name: &str,
        ) -> Result<DatasetInfo, PlatformError> {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let info = DatasetInfo {
                id: state.next_id,
                name: name.into(),
                project_id: Some(project_id),
            };
            state.datasets.push(info.clone());
            Ok(info)
        }

        async fn list_images(&self, dataset_id: u64) -> Result<Vec<ImageInfo>, PlatformError> {
            let state = self.state.lock().unwrap();
            Ok(state.images.get(&dataset_id).cloned().unwrap_or_default())
        }

        async fn upload_image_paths(
            &self,
            dataset_id: u64,
            names: &[String],
            paths: &[PathBuf],
        ) -> Result<Vec<ImageInfo>, PlatformError> {
            assert_eq!(names.len(), paths.len());
            for path in paths {
                assert!(path.exists(), "temp file missing at upload: {path:?}");
            }
            let mut state = self.state.lock().unwrap();
            state.upload_calls.push((dataset_id, names.to_vec()));
            if self.fail_upload {
                return Err(PlatformError::Request {
                    method: "images.bulk.add",
                    message: "boom".into(),
                });
            }
            let infos: Vec<ImageInfo> = names
                .iter()
                .map(|name| ImageInfo {
                    id: 1,
                    name: name.clone(),
                    hash: None,
                })
                .collect();
            state
                .images
                .entry(dataset_id)
                .or_default()
                .extend(infos.clone());
            Ok(infos)
        }

        async fn download_file(
            &self,
            _team_id: u64,
            remote_path: &str,
            local_path: &Path,
        ) -> Result<(), PlatformError> {
            let bytes = self
                .state
                .lock()
                .unwrap()
                .files
                .get(remote_path)
                .cloned()
                .unwrap_or_default();
            crate::config::ensure_parent_dir(local_path).expect("parent");
            std::fs::write(local_path, bytes).expect("write");
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeStorage {
        fail_on: Option<String>,
        downloads: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ObjectStore for FakeStorage {
        async fn download(&self, object: &ObjectPath, local: &Path) -> Result<u64, GcsError> {
            if let Some(fail_on) = &self.fail_on
                && object.key.ends_with(fail_on.as_str())
            {
                return Err(GcsError::Request {
                    path: object.to_string(),
                    message: "HTTP 403 Forbidden".into(),
                });
            }
            crate::config::ensure_parent_dir(local).expect("parent");
            std::fs::write(local, b"jpeg").expect("write");
            self.downloads.lock().unwrap().push(object.key.clone());
            Ok(4)
        }
    }

    fn config(scratch: &Path) -> ImportConfig {
        ImportConfig {
            scratch_dir: scratch.to_path_buf(),
            ..ImportConfig::default()
        }
    }

    fn catalog() -> Catalog {
        Catalog::from_rows(vec![CatalogRow {
            upc: "12345".into(),
            subcategory: "Bebidas".into(),
        }])
    }

    fn plan(urls: &[(&str, &str)]) -> ImportPlan {
        let links: Vec<LinkRecord> = urls
            .iter()
            .map(|(url, upc)| LinkRecord {
                url: url.to_string(),
                upc: upc.to_string(),
            })
            .collect();
        build_plan(&links, &catalog()).expect("plan")
    }

    fn temp_files(scratch: &Path) -> usize {
        std::fs::read_dir(scratch.join("temp"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn example_link_creates_hierarchy_and_uploads() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let importer = Importer::new(FakePlatform::default(), config(scratch.path()));
        let plan = plan(&[("gs://bucket/CatA/Proj1/012345/img1.jpg", "012345")]);

        let summary = importer
            .import_plan(4, &plan, &FakeStorage::default())
            .await
            .expect("import");

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.datasets, 1);
        let state = importer.platform.state.lock().unwrap();
        assert_eq!(state.workspaces[0].name, "CatA");
        assert_eq!(state.projects[0].name, "Proj1");
        assert_eq!(state.datasets[0].name, "Bebidas_012345");
        assert_eq!(
            state.upload_calls,
            vec![(state.datasets[0].id, vec!["img1.jpg".to_string()])]
        );
        drop(state);
        assert_eq!(temp_files(scratch.path()), 0);
    }

    #[tokio::test]
    async fn rerun_skips_images_already_present() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let platform = FakePlatform::default();
        let dataset_id = platform.seed_dataset("CatA", "Proj1", "Bebidas_012345");
        platform.seed_image(dataset_id, "img1.jpg");
        let importer = Importer::new(platform, config(scratch.path()));
        let plan = plan(&[
            ("gs://bucket/CatA/Proj1/012345/img1.jpg", "012345"),
            ("gs://bucket/CatA/Proj1/012345/img2.jpg", "012345"),
        ]);
        let storage = FakeStorage::default();

        let summary = importer
            .import_plan(4, &plan, &storage)
            .await
            .expect("import");

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(
            importer.platform.uploads(),
            vec![(dataset_id, vec!["img2.jpg".to_string()])]
        );
        assert_eq!(
            *storage.downloads.lock().unwrap(),
            vec!["CatA/Proj1/012345/img2.jpg".to_string()]
        );
        assert_eq!(importer.platform.state.lock().unwrap().datasets.len(), 1);
    }

    #[tokio::test]
    async fn fully_uploaded_dataset_makes_no_upload_call() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let platform = FakePlatform::default();
        let dataset_id = platform.seed_dataset("CatA", "Proj1", "Bebidas_012345");
        platform.seed_image(dataset_id, "img1.jpg");
        let importer = Importer::new(platform, config(scratch.path()));
        let plan = plan(&[("gs://bucket/CatA/Proj1/012345/img1.jpg", "012345")]);

        let summary = importer
            .import_plan(4, &plan, &FakeStorage::default())
            .await
            .expect("import");

        assert_eq!(summary.skipped, 1);
        assert!(importer.platform.uploads().is_empty());
    }

    #[tokio::test]
    async fn uploads_in_fixed_size_batches() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mut cfg = config(scratch.path());
        cfg.batch_size = 2;
        let importer = Importer::new(FakePlatform::default(), cfg);
        let urls: Vec<(String, &str)> = (1..=5)
            .map(|i| (format!("gs://b/CatA/Proj1/012345/img{i}.jpg"), "012345"))
            .collect();
        let refs: Vec<(&str, &str)> = urls.iter().map(|(u, c)| (u.as_str(), *c)).collect();

        importer
            .import_plan(4, &plan(&refs), &FakeStorage::default())
            .await
            .expect("import");

        let sizes: Vec<usize> = importer
            .platform
            .uploads()
            .iter()
            .map(|(_, names)| names.len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(temp_files(scratch.path()), 0);
    }

    #[tokio::test]
    async fn failed_upload_still_removes_temp_files() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let platform = FakePlatform {
            fail_upload: true,
            ..FakePlatform::default()
        };
        let importer = Importer::new(platform, config(scratch.path()));
        let plan = plan(&[
            ("gs://bucket/CatA/Proj1/012345/img1.jpg", "012345"),
            ("gs://bucket/CatA/Proj1/012345/img2.jpg", "012345"),
        ]);

        let err = importer
            .import_plan(4, &plan, &FakeStorage::default())
            .await
            .expect_err("upload fails");

        assert_eq!(err.kind(), PipelineErrorKind::Internal);
        assert_eq!(err.stage(), "upload");
        assert_eq!(importer.platform.uploads().len(), 1);
        assert_eq!(temp_files(scratch.path()), 0);
    }

    #[tokio::test]
    async fn failed_download_removes_earlier_batch_files() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let importer = Importer::new(FakePlatform::default(), config(scratch.path()));
        let plan = plan(&[
            ("gs://bucket/CatA/Proj1/012345/img1.jpg", "012345"),
            ("gs://bucket/CatA/Proj1/012345/img2.jpg", "012345"),
        ]);
        let storage = FakeStorage {
            fail_on: Some("img2.jpg".into()),
            ..FakeStorage::default()
        };

        let err = importer
            .import_plan(4, &plan, &storage)
            .await
            .expect_err("download fails");

        assert!(err.detail().contains("403"));
        assert!(importer.platform.uploads().is_empty());
        assert_eq!(temp_files(scratch.path()), 0);
    }

    #[tokio::test]
    async fn workspace_follows_each_groups_category() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let importer = Importer::new(FakePlatform::default(), config(scratch.path()));
        let plan = plan(&[
            ("gs://b/CatA/Proj1/012345/a.jpg", "012345"),
            ("gs://b/CatB/Proj1/777/b.jpg", "777"),
        ]);

        importer
            .import_plan(4, &plan, &FakeStorage::default())
            .await
            .expect("import");

        let state = importer.platform.state.lock().unwrap();
        let names: Vec<&str> = state.workspaces.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["CatA", "CatB"]);
        let datasets: Vec<&str> = state.datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(datasets, vec!["Bebidas_012345", "unknown_777"]);
    }

    #[tokio::test]
    async fn duplicate_names_in_one_dataset_upload_once() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let importer = Importer::new(FakePlatform::default(), config(scratch.path()));
        let plan = plan(&[
            ("gs://b1/CatA/Proj1/012345/a.jpg", "012345"),
            ("gs://b2/CatA/Proj1/012345/a.jpg", "012345"),
        ]);

        let summary = importer
            .import_plan(4, &plan, &FakeStorage::default())
            .await
            .expect("import");

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn missing_team_is_fatal() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let platform = FakePlatform {
            missing_team: true,
            ..FakePlatform::default()
        };
        let importer = Importer::new(platform, config(scratch.path()));

        let err = importer.run().await.expect_err("no team");
        assert_eq!(err.stage(), "validate_target");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert!(err.detail().contains("id=4"));
    }

    #[tokio::test]
    async fn fetch_inputs_writes_scratch_files() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let platform = FakePlatform::default();
        platform.state.lock().unwrap().files.insert(
            "/favorita_import_01/links.csv".into(),
            b"gs://b/CatA/Proj1/012345/img1.jpg,012345\n".to_vec(),
        );
        let importer = Importer::new(platform, config(scratch.path()));

        importer.fetch_inputs(4).await.expect("fetch");

        for name in ["links.csv", "product_catalog.xlsx", "gs_key.json"] {
            assert!(scratch.path().join(name).exists(), "{name} not fetched");
        }
        let links = read_links(&scratch.path().join("links.csv")).expect("links");
        assert_eq!(links[0].upc, "012345");
    }

    #[test]
    fn upc_mismatch_fails_plan_stage() {
        let inputs = ImportInputs {
            links: vec![LinkRecord {
                url: "gs://bucket/CatA/Proj1/012345/img1.jpg".into(),
                upc: "999999".into(),
            }],
            catalog: catalog(),
        };
        let err = plan_stage(&inputs).expect_err("mismatch");
        assert_eq!(err.stage(), "build_plan");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert!(err.detail().contains("999999"));
    }

    #[tokio::test]
    async fn trailing_slash_key_uploads_under_planned_name() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let platform = FakePlatform::default();
        let dataset_id = platform.seed_dataset("CatA", "Proj1", "Bebidas_012345");
        let importer = Importer::new(platform, config(scratch.path()));
        let plan = plan(&[("gs://bucket/CatA/Proj1/012345/img1.jpg/", "012345")]);
        let storage = FakeStorage::default();

        let summary = importer
            .import_plan(4, &plan, &storage)
            .await
            .expect("import");

        assert_eq!(summary.uploaded, 1);
        assert_eq!(
            importer.platform.uploads(),
            vec![(dataset_id, vec!["img1.jpg".to_string()])]
        );
        assert_eq!(
            *storage.downloads.lock().unwrap(),
            vec!["CatA/Proj1/012345/img1.jpg/".to_string()]
        );
        assert_eq!(temp_files(scratch.path()), 0);
    }

    fn seed_inputs(platform: &FakePlatform, links_csv: &str) {
        platform.seed_file("/favorita_import_01/links.csv", links_csv);
        platform.seed_file(
            "/favorita_import_01/product_catalog.xlsx",
            crate::catalog::catalog_xlsx(&[(12345, "Bebidas")]),
        );
        platform.seed_file("/favorita_import_01/gs_key.json", "{}");
    }

    #[tokio::test]
    async fn run_imports_fetched_inputs_end_to_end() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let platform = FakePlatform::default();
        seed_inputs(
            &platform,
            "gs://bucket/CatA/Proj1/012345/img1.jpg,012345\ngs://bucket/CatA/Proj1/012345/img2.jpg,012345\n",
        );
        let importer = Importer::new(platform, config(scratch.path()));
        let expected_key = scratch.path().join("gs_key.json");
        let downloads: Arc<Mutex<Vec<String>>> = Arc::default();
        let storage = FakeStorage {
            downloads: Arc::clone(&downloads),
            ..FakeStorage::default()
        };

        let summary = importer
            .run_with(move |key_path| async move {
                assert_eq!(key_path, expected_key);
                Ok::<_, GcsError>(storage)
            })
            .await
            .expect("run");

        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.datasets, 1);
        let stages: Vec<&str> = summary.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            stages,
            vec!["validate_target", "fetch_inputs", "load_inputs", "build_plan", "upload"]
        );
        assert_eq!(downloads.lock().unwrap().len(), 2);
        let state = importer.platform.state.lock().unwrap();
        assert_eq!(state.datasets[0].name, "Bebidas_012345");
        assert_eq!(
            state.upload_calls,
            vec![(
                state.datasets[0].id,
                vec!["img1.jpg".to_string(), "img2.jpg".to_string()]
            )]
        );
    }

    #[tokio::test]
    async fn run_stops_on_upc_mismatch_before_any_transfer() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let platform = FakePlatform::default();
        seed_inputs(
            &platform,
            "gs://bucket/CatA/Proj1/012345/img1.jpg,012345\ngs://bucket/CatA/Proj1/012345/img2.jpg,999999\n",
        );
        let importer = Importer::new(platform, config(scratch.path()));
        let downloads: Arc<Mutex<Vec<String>>> = Arc::default();
        let storage = FakeStorage {
            downloads: Arc::clone(&downloads),
            ..FakeStorage::default()
        };

        let err = importer
            .run_with(move |_| async move { Ok::<_, GcsError>(storage) })
            .await
            .expect_err("mismatch");

        assert_eq!(err.stage(), "build_plan");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert!(err.detail().contains("999999"));
        assert!(importer.platform.uploads().is_empty());
        assert!(downloads.lock().unwrap().is_empty());
        assert!(importer.platform.state.lock().unwrap().datasets.is_empty());
    }
}
