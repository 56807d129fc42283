use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

const GS_SCHEME: &str = "gs://";
const BROWSER_PREFIX: &str = "https://storage.cloud.google.com/";

/// One row of the links CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub url: String,
    pub upc: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkParseError {
    #[error("unsupported storage url (expected gs:// or https://storage.cloud.google.com/): {0}")]
    UnsupportedScheme(String),
    #[error("storage url has no bucket: {0}")]
    MissingBucket(String),
    #[error("object key needs <category>/<project>/<upc>/<file>: {0}")]
    ShallowKey(String),
}

/// Bucket plus object key inside Google Cloud Storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath {
    pub bucket: String,
    pub key: String,
}

impl ObjectPath {
    pub fn parse(url: &str) -> Result<Self, LinkParseError> {
        let rest = url
            .strip_prefix(GS_SCHEME)
            .or_else(|| url.strip_prefix(BROWSER_PREFIX))
            .ok_or_else(|| LinkParseError::UnsupportedScheme(url.to_string()))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(LinkParseError::MissingBucket(url.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.trim_start_matches('/').to_string(),
        })
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{GS_SCHEME}{}/{}", self.bucket, self.key)
    }
}

/// Position of an image in the import hierarchy, read from the tail of its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLocation {
    pub category: String,
    pub project: String,
    pub upc: String,
    pub file_name: String,
}

impl ImageLocation {
    pub fn from_object_path(path: &ObjectPath) -> Result<Self, LinkParseError> {
        let segments: Vec<&str> = path.key.split('/').filter(|s| !s.is_empty()).collect();
        let [.., category, project, upc, file_name] = segments.as_slice() else {
            return Err(LinkParseError::ShallowKey(path.to_string()));
        };
        Ok(Self {
            category: category.to_string(),
            project: project.to_string(),
            upc: upc.to_string(),
            file_name: file_name.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}
