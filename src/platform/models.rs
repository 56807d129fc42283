#![allow(dead_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TeamInfo {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub team_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub workspace_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub project_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Paged list envelope returned by `*.list` methods.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage<T> {
    #[serde(default = "Vec::new")]
    pub entities: Vec<T>,
    #[serde(default)]
    pub pages_count: u32,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NameFilter {
    pub field: &'static str,
    pub operator: &'static str,
    pub value: String,
}

impl NameFilter {
    pub fn equals(name: &str) -> Vec<Self> {
        vec![Self {
            field: "name",
            operator: "=",
            value: name.to_string(),
        }]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkImageEntry {
    pub title: String,
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub struct HashEntry {
    pub hash: String,
}
