use crate::config::CatalogColumns;
use calamine::{Data, Range, Reader, open_workbook_auto};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

pub const UNKNOWN_SUBCATEGORY: &str = "unknown";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unable to open workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook has no sheets")]
    NoSheets,
    #[error("first sheet is empty")]
    EmptySheet,
    #[error("column {0:?} not found in header row")]
    MissingColumn(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub upc: String,
    pub subcategory: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubcategoryMatch {
    Unique(String),
    Missing,
    Ambiguous(usize),
}

/// Product catalog read from the first sheet of a spreadsheet.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    rows: Vec<CatalogRow>,
}

impl Catalog {
    pub fn open(path: &Path, columns: &CatalogColumns) -> Result<Self, CatalogError> {
        let mut workbook = open_workbook_auto(path)?;
        let first = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or(CatalogError::NoSheets)?;
        let range = workbook.worksheet_range(&first)?;
        Self::from_range(&range, columns)
    }

    pub fn from_range(range: &Range<Data>, columns: &CatalogColumns) -> Result<Self, CatalogError> {
        let mut rows = range.rows();
        let header = rows.next().ok_or(CatalogError::EmptySheet)?;
        let upc_idx = column_index(header, &columns.upc)?;
        let sub_idx = column_index(header, &columns.subcategory)?;

        let rows = rows
            .filter_map(|row| {
                let upc = row.get(upc_idx).map(cell_text).unwrap_or_default();
                if upc.is_empty() {
                    return None;
                }
                let subcategory = row.get(sub_idx).map(cell_text).unwrap_or_default();
                Some(CatalogRow { upc, subcategory })
            })
            .collect();
        Ok(Self { rows })
    }

    #[cfg(test)]
    pub fn from_rows(rows: Vec<CatalogRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn lookup(&self, upc: &str) -> SubcategoryMatch {
        let wanted = normalize_upc(upc);
        let mut hits = self
            .rows
            .iter()
            .filter(|row| normalize_upc(&row.upc) == wanted);
        match (hits.next(), hits.count()) {
            (None, _) => SubcategoryMatch::Missing,
            (Some(row), 0) => SubcategoryMatch::Unique(row.subcategory.clone()),
            (Some(_), rest) => SubcategoryMatch::Ambiguous(rest + 1),
        }
    }

    /// Falls back to [`UNKNOWN_SUBCATEGORY`] when the UPC does not match exactly one row.
    pub fn resolve_subcategory(&self, upc: &str) -> String {
        match self.lookup(upc) {
            SubcategoryMatch::Unique(subcategory) => subcategory,
            SubcategoryMatch::Missing => {
                warn!(target = "upc_import.catalog", upc = %upc, matches = 0, "unknown subcategory");
                UNKNOWN_SUBCATEGORY.to_string()
            }
            SubcategoryMatch::Ambiguous(matches) => {
                warn!(target = "upc_import.catalog", upc = %upc, matches, "unknown subcategory");
                UNKNOWN_SUBCATEGORY.to_string()
            }
        }
    }
}

fn column_index(header: &[Data], name: &str) -> Result<usize, CatalogError> {
    header
        .iter()
        .position(|cell| cell_text(cell) == name)
        .ok_or_else(|| CatalogError::MissingColumn(name.to_string()))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}

/// Digit-only codes compare as integers, so `012345` matches a numeric cell `12345`.
pub fn normalize_upc(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        if stripped.is_empty() {
            "0".to_string()
        } else {
            stripped.to_string()
        }
    } else {
        trimmed.to_string()
    }
}

/// Minimal single-sheet xlsx with a `UPC CODE` / `SUB-CATEGORY SPANISH` header and
/// numeric UPC cells.
#[cfg(test)]
pub fn catalog_xlsx(rows: &[(u64, &str)]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    let mut strings = vec!["UPC CODE".to_string(), "SUB-CATEGORY SPANISH".to_string()];
    let mut sheet_rows =
        String::from(r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>"#);
    for (idx, (upc, subcategory)) in rows.iter().enumerate() {
        let r = idx + 2;
        strings.push(subcategory.to_string());
        sheet_rows.push_str(&format!(
            r#"<row r="{r}"><c r="A{r}"><v>{upc}</v></c><c r="B{r}" t="s"><v>{}</v></c></row>"#,
            strings.len() - 1
        ));
    }
    let shared: String = strings.iter().map(|s| format!("<si><t>{s}</t></si>")).collect();

    let files = [
        (
            "[Content_Types].xml",
            String::from(
                r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/></Types>"#
            ),
        ),
        (
            "_rels/.rels",
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_NS}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
            ),
        ),
        (
            "xl/workbook.xml",
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="{NS}" xmlns:r="{REL_NS}"><sheets><sheet name="Catalog" sheetId="1" r:id="rId1"/></sheets></workbook>"#
            ),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_NS}/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="{REL_NS}/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#
            ),
        ),
        (
            "xl/sharedStrings.xml",
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><sst xmlns="{NS}" count="{n}" uniqueCount="{n}">{shared}</sst>"#,
                n = strings.len()
            ),
        ),
        (
            "xl/worksheets/sheet1.xml",
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="{NS}"><sheetData>{sheet_rows}</sheetData></worksheet>"#
            ),
        ),
    ];

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, body) in files {
        writer.start_file(name, options).expect("zip entry");
        writer.write_all(body.as_bytes()).expect("zip write");
    }
    writer.finish().expect("zip finish").into_inner()
}
