use std::path::PathBuf;
use thiserror::Error;

pub const LINKS_FILE: &str = "links.csv";
pub const CATALOG_FILE: &str = "product_catalog.xlsx";
pub const GS_KEY_FILE: &str = "gs_key.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct CatalogColumns {
    pub upc: String,
    pub subcategory: String,
}

impl Default for CatalogColumns {
    fn default() -> Self {
        Self {
            upc: "UPC CODE".into(),
            subcategory: "SUB-CATEGORY SPANISH".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub team_id: u64,
    pub workspace_id: u64,
    /// Directory in the team file store holding the three input files.
    pub directory_path: String,
    pub scratch_dir: PathBuf,
    pub batch_size: usize,
    pub columns: CatalogColumns,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            team_id: 4,
            workspace_id: 14,
            directory_path: "/favorita_import_01".into(),
            scratch_dir: PathBuf::from("/sly_task_data"),
            batch_size: 50,
            columns: CatalogColumns::default(),
        }
    }
}

/// A file fetched from the team file store into scratch space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub remote: String,
    pub local: PathBuf,
}

impl ImportConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let columns = CatalogColumns {
            upc: std::env::var("CATALOG_UPC_COLUMN").unwrap_or(defaults.columns.upc),
            subcategory: std::env::var("CATALOG_SUBCATEGORY_COLUMN")
                .unwrap_or(defaults.columns.subcategory),
        };
        let batch_size = parse_env("UPLOAD_BATCH_SIZE")?.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "UPLOAD_BATCH_SIZE",
                value: "0".into(),
            });
        }
        Ok(Self {
            team_id: parse_env("TEAM_ID")?.unwrap_or(defaults.team_id),
            workspace_id: parse_env("WORKSPACE_ID")?.unwrap_or(defaults.workspace_id),
            directory_path: std::env::var("DIRECTORY_PATH")
                .map(|v| normalize_str_input(&v))
                .unwrap_or(defaults.directory_path),
            scratch_dir: std::env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            batch_size,
            columns,
        })
    }

    pub fn links_file(&self) -> InputFile {
        self.input_file(LINKS_FILE)
    }

    pub fn catalog_file(&self) -> InputFile {
        self.input_file(CATALOG_FILE)
    }

    pub fn gs_key_file(&self) -> InputFile {
        self.input_file(GS_KEY_FILE)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.scratch_dir.join("temp")
    }

    fn input_file(&self, name: &str) -> InputFile {
        InputFile {
            remote: join_remote(&self.directory_path, name),
            local: self.scratch_dir.join(name),
        }
    }
}

/// String inputs may arrive wrapped in quotes, e.g. `"/favorita_import_01"`.
pub fn normalize_str_input(raw: &str) -> String {
    raw.trim().trim_matches('"').trim_matches('\'').to_string()
}

fn join_remote(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
pub fn ensure_parent_dir(path: &std::path::Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
