use crate::catalog::Catalog;
use crate::models::{ImageLocation, LinkParseError, LinkRecord, ObjectPath};
use indexmap::IndexMap;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("row {row}: {source}")]
    Link {
        row: usize,
        #[source]
        source: LinkParseError,
    },
    #[error("UPC code from CSV != UPC code from path ({csv:?} != {path:?})")]
    UpcMismatch { csv: String, path: String },
}

/// An object to fetch and the image name it is uploaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedImage {
    pub object: ObjectPath,
    pub name: String,
}

type UpcGroups = IndexMap<String, Vec<PlannedImage>>;
type ProjectGroups = IndexMap<String, UpcGroups>;

/// Images grouped as category -> project -> UPC, in first-seen order.
#[derive(Debug, Default)]
pub struct ImportPlan {
    structure: IndexMap<String, ProjectGroups>,
    subcategories: HashMap<String, String>,
    total_links: usize,
}

/// One dataset's worth of links.
#[derive(Debug, Clone, Copy)]
pub struct Group<'a> {
    pub category: &'a str,
    pub project: &'a str,
    pub upc: &'a str,
    pub links: &'a [PlannedImage],
}

impl ImportPlan {
    pub fn total_links(&self) -> usize {
        self.total_links
    }

    pub fn subcategory(&self, upc: &str) -> Option<&str> {
        self.subcategories.get(upc).map(String::as_str)
    }

    pub fn dataset_name(&self, upc: &str) -> String {
        let subcategory = self
            .subcategory(upc)
            .unwrap_or(crate::catalog::UNKNOWN_SUBCATEGORY);
        format!("{subcategory}_{upc}")
    }

    pub fn groups(&self) -> impl Iterator<Item = Group<'_>> {
        self.structure.iter().flat_map(|(category, projects)| {
            projects.iter().flat_map(move |(project, upcs)| {
                upcs.iter().map(move |(upc, links)| Group {
                    category,
                    project,
                    upc,
                    links,
                })
            })
        })
    }

    pub fn group_count(&self) -> usize {
        self.structure
            .values()
            .flat_map(|projects| projects.values())
            .map(|upcs| upcs.len())
            .sum()
    }
}

pub fn build_plan(links: &[LinkRecord], catalog: &Catalog) -> Result<ImportPlan, PlanError> {
    let mut plan = ImportPlan::default();
    for (idx, link) in links.iter().enumerate() {
        let wrap = |source| PlanError::Link {
            row: idx + 1,
            source,
        };
        let path = ObjectPath::parse(&link.url).map_err(wrap)?;
        let location = ImageLocation::from_object_path(&path).map_err(wrap)?;
        if link.upc != location.upc {
            return Err(PlanError::UpcMismatch {
                csv: link.upc.clone(),
                path: location.upc,
            });
        }

        let upcs = plan
            .structure
            .entry(location.category)
            .or_default()
            .entry(location.project)
            .or_default();
        if !upcs.contains_key(&location.upc) {
            let subcategory = catalog.resolve_subcategory(&location.upc);
            debug!(
                target = "upc_import.plan",
                upc = %location.upc,
                subcategory = %subcategory,
                first_file = %location.file_name,
                "new dataset group"
            );
            plan.subcategories
                .insert(location.upc.clone(), subcategory);
        }
        upcs.entry(location.upc).or_default().push(PlannedImage {
            object: path,
            name: location.file_name,
        });
        plan.total_links += 1;
    }
    Ok(plan)
}
