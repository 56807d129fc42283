use crate::models::LinkRecord;
use std::{io::Read, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinksError {
    #[error("unable to read links file: {0}")]
    Csv(#[from] csv::Error),
    #[error("line {line}: expected <url>,<upc> but found {found} column(s)")]
    ShortRow { line: u64, found: usize },
}

pub fn read_links(path: &Path) -> Result<Vec<LinkRecord>, LinksError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    parse_links(file)
}

/// Parses headerless `<url>,<upc>` rows. Extra columns are ignored.
pub fn parse_links<R: Read>(reader: R) -> Result<Vec<LinkRecord>, LinksError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut links = Vec::new();
    for record in csv.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        match (record.get(0), record.get(1)) {
            (Some(url), Some(upc)) => links.push(LinkRecord {
                url: url.to_string(),
                upc: upc.to_string(),
            }),
            _ => {
                return Err(LinksError::ShortRow {
                    line,
                    found: record.len(),
                });
            }
        }
    }
    Ok(links)
}
